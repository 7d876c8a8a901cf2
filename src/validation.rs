//! Pure validation of untrusted meter payloads and device identifiers.
//!
//! Every problem in a payload is collected in one pass so a single log line
//! reports the complete picture; nothing here touches storage.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::models::Reading;

/// Wire field names of one three-phase sample, in the order the meters
/// send them: voltages, currents, phase powers, power factors, then the
/// cumulative import/export/total energy counters.
pub const REQUIRED_FIELDS: [&str; 15] = [
    "Va", "Vb", "Vc", "Ia", "Ib", "Ic", "Pa", "Pb", "Pc", "PFa", "PFb", "PFc", "Ei", "Ee", "Et",
];

/// Outcome of validating one inbound payload.
///
/// `sanitized` is `Some` iff `errors` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadValidation {
    pub errors: Vec<String>,
    pub sanitized: Option<Reading>,
}

impl PayloadValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self { errors, sanitized: None }
    }
}

/// Validate and sanitize one raw payload.
///
/// `now` is substituted for a missing `time` field; passing it in keeps the
/// function pure and the tests deterministic.
pub fn validate_power_payload(raw: &Value, now: DateTime<Utc>) -> PayloadValidation {
    let Some(obj) = raw.as_object() else {
        return PayloadValidation::invalid(vec!["Data must be a valid JSON object".to_owned()]);
    };

    let mut errors = Vec::new();
    let mut values = [None::<f64>; REQUIRED_FIELDS.len()];

    for (i, field) in REQUIRED_FIELDS.iter().enumerate() {
        match obj.get(*field) {
            None => errors.push(format!("Missing required field: {field}")),
            Some(v) => match parse_number(v) {
                Some(n) => values[i] = Some(n),
                None => errors.push(format!("Field '{field}' must be a valid number, got: {v}")),
            },
        }
    }

    // Timestamp: parse failure is an error; absence substitutes `now`.
    let recorded_at = match obj.get("time") {
        None | Some(Value::Null) => now,
        Some(v) => match parse_timestamp(v) {
            Some(t) => t,
            None => {
                errors.push("Invalid timestamp format in field: time".to_owned());
                now
            }
        },
    };

    // Range checks only on fields that parsed.
    for (i, field) in ["Va", "Vb", "Vc"].iter().enumerate() {
        if let Some(v) = values[i] {
            if !(0.0..=1000.0).contains(&v) {
                errors.push(format!("Voltage {field} should be between 0-1000V"));
            }
        }
    }
    for (i, field) in ["Ia", "Ib", "Ic"].iter().enumerate() {
        if let Some(v) = values[3 + i] {
            if !(0.0..=1000.0).contains(&v) {
                errors.push(format!("Current {field} should be between 0-1000A"));
            }
        }
    }
    for (i, field) in ["PFa", "PFb", "PFc"].iter().enumerate() {
        if let Some(v) = values[9 + i] {
            if !(-1.0..=1.0).contains(&v) {
                errors.push(format!("Power factor {field} should be between -1 and 1"));
            }
        }
    }

    if !errors.is_empty() {
        return PayloadValidation::invalid(errors);
    }

    // All fifteen parsed; unwraps cannot fire past this point.
    let v = |i: usize| values[i].expect("checked complete");
    PayloadValidation {
        errors,
        sanitized: Some(Reading {
            va: v(0),
            vb: v(1),
            vc: v(2),
            ia: v(3),
            ib: v(4),
            ic: v(5),
            pa: v(6),
            pb: v(7),
            pc: v(8),
            pfa: v(9),
            pfb: v(10),
            pfc: v(11),
            energy_import: v(12),
            energy_export: v(13),
            energy_total: v(14),
            recorded_at,
        }),
    }
}

/// Accept JSON numbers and numeric strings; reject everything else and all
/// non-finite values.
fn parse_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Accept RFC3339 strings and unix epoch seconds (integer or fractional) —
/// the two formats meter firmware actually sends.
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Device identifiers
// ---------------------------------------------------------------------------

/// Why a device identifier was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceIdError {
    #[error("device id must be a non-empty string")]
    Empty,
    #[error("device id must be 3-32 characters of letters, numbers, underscores and hyphens")]
    Malformed,
}

/// Check a device identifier: 3–32 chars of `[A-Za-z0-9_-]`.
pub fn validate_device_id(device_id: &str) -> Result<(), DeviceIdError> {
    if device_id.is_empty() {
        return Err(DeviceIdError::Empty);
    }
    let len = device_id.chars().count();
    if !(3..=32).contains(&len)
        || !device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DeviceIdError::Malformed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn full_payload() -> Value {
        json!({
            "Va": 230.1, "Vb": 229.8, "Vc": 231.0,
            "Ia": 5.2, "Ib": 5.1, "Ic": 5.3,
            "Pa": 1196, "Pb": 1172, "Pc": 1224,
            "PFa": 0.98, "PFb": 0.97, "PFc": 0.99,
            "Ei": 1000.5, "Ee": 200.2, "Et": 800.3
        })
    }

    #[test]
    fn full_payload_is_valid() {
        let result = validate_power_payload(&full_payload(), now());
        assert!(result.is_valid(), "errors: {:?}", result.errors);
        let r = result.sanitized.unwrap();
        assert_eq!(r.va, 230.1);
        assert_eq!(r.pa, 1196.0);
        assert_eq!(r.energy_total, 800.3);
    }

    #[test]
    fn non_object_input_is_one_generic_error() {
        for raw in [json!("text"), json!(42), json!([1, 2]), Value::Null] {
            let result = validate_power_payload(&raw, now());
            assert_eq!(result.errors, vec!["Data must be a valid JSON object"]);
            assert!(result.sanitized.is_none());
        }
    }

    #[test]
    fn omitting_each_field_names_it() {
        for field in REQUIRED_FIELDS {
            let mut payload = full_payload();
            payload.as_object_mut().unwrap().remove(field);

            let result = validate_power_payload(&payload, now());
            assert!(!result.is_valid());
            assert_eq!(result.errors, vec![format!("Missing required field: {field}")]);
            assert!(result.sanitized.is_none());
        }
    }

    #[test]
    fn all_problems_reported_in_one_pass() {
        let mut payload = full_payload();
        {
            let obj = payload.as_object_mut().unwrap();
            obj.remove("Va");
            obj.insert("Ia".into(), json!("not-a-number"));
            obj.insert("PFb".into(), json!(1.5));
        }
        let result = validate_power_payload(&payload, now());
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().any(|e| e.contains("Missing required field: Va")));
        assert!(result.errors.iter().any(|e| e.contains("Field 'Ia'")));
        assert!(result.errors.iter().any(|e| e.contains("Power factor PFb")));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let mut payload = full_payload();
        payload.as_object_mut().unwrap().insert("Va".into(), json!("230.5"));
        let result = validate_power_payload(&payload, now());
        assert!(result.is_valid());
        assert_eq!(result.sanitized.unwrap().va, 230.5);
    }

    #[test]
    fn non_finite_strings_are_rejected() {
        for bad in ["inf", "-inf", "NaN"] {
            let mut payload = full_payload();
            payload.as_object_mut().unwrap().insert("Et".into(), json!(bad));
            let result = validate_power_payload(&payload, now());
            assert!(!result.is_valid(), "{bad} must not validate");
            assert!(result.errors[0].contains("Field 'Et'"));
        }
    }

    #[test]
    fn booleans_and_null_are_not_numbers() {
        let mut payload = full_payload();
        payload.as_object_mut().unwrap().insert("Ib".into(), json!(true));
        payload.as_object_mut().unwrap().insert("Ee".into(), Value::Null);
        let result = validate_power_payload(&payload, now());
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn voltage_current_and_pf_ranges() {
        let cases = [
            ("Va", json!(1000.1), "Voltage Va should be between 0-1000V"),
            ("Vb", json!(-0.1), "Voltage Vb should be between 0-1000V"),
            ("Ic", json!(1200), "Current Ic should be between 0-1000A"),
            ("PFa", json!(-1.01), "Power factor PFa should be between -1 and 1"),
            ("PFc", json!(2), "Power factor PFc should be between -1 and 1"),
        ];
        for (field, value, expected) in cases {
            let mut payload = full_payload();
            payload.as_object_mut().unwrap().insert(field.into(), value);
            let result = validate_power_payload(&payload, now());
            assert_eq!(result.errors, vec![expected]);
        }
    }

    #[test]
    fn boundary_values_are_in_range() {
        let mut payload = full_payload();
        {
            let obj = payload.as_object_mut().unwrap();
            obj.insert("Va".into(), json!(0));
            obj.insert("Vb".into(), json!(1000));
            obj.insert("PFa".into(), json!(-1));
            obj.insert("PFb".into(), json!(1));
            obj.insert("Ia".into(), json!(0));
            obj.insert("Ib".into(), json!(1000));
        }
        assert!(validate_power_payload(&payload, now()).is_valid());
    }

    #[test]
    fn missing_time_substitutes_ingestion_time() {
        let result = validate_power_payload(&full_payload(), now());
        assert_eq!(result.sanitized.unwrap().recorded_at, now());
    }

    #[test]
    fn rfc3339_time_is_kept() {
        let mut payload = full_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("time".into(), json!("2024-04-30T08:15:00+07:00"));
        let result = validate_power_payload(&payload, now());
        let t = result.sanitized.unwrap().recorded_at;
        assert_eq!(t.to_rfc3339(), "2024-04-30T01:15:00+00:00");
    }

    #[test]
    fn epoch_seconds_time_is_kept() {
        let mut payload = full_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("time".into(), json!(1_714_550_400));
        let result = validate_power_payload(&payload, now());
        assert_eq!(
            result.sanitized.unwrap().recorded_at,
            DateTime::from_timestamp(1_714_550_400, 0).unwrap()
        );
    }

    #[test]
    fn unparsable_time_is_an_error() {
        let mut payload = full_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("time".into(), json!("yesterday-ish"));
        let result = validate_power_payload(&payload, now());
        assert_eq!(result.errors, vec!["Invalid timestamp format in field: time"]);
        assert!(result.sanitized.is_none());
    }

    #[test]
    fn device_id_accepts_expected_shapes() {
        for id in ["ESP_01", "abc", "meter-42", &"x".repeat(32)] {
            assert_eq!(validate_device_id(id), Ok(()), "{id}");
        }
    }

    #[test]
    fn device_id_rejects_bad_shapes() {
        assert_eq!(validate_device_id(""), Err(DeviceIdError::Empty));
        assert_eq!(validate_device_id("ab"), Err(DeviceIdError::Malformed));
        assert_eq!(validate_device_id(&"x".repeat(33)), Err(DeviceIdError::Malformed));
        assert_eq!(validate_device_id("esp 01"), Err(DeviceIdError::Malformed));
        assert_eq!(validate_device_id("esp/01"), Err(DeviceIdError::Malformed));
    }
}
