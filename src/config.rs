use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Registry database (devices table).
    pub database_url: String,
    /// Readings database (one table per meter).
    pub sensor_database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// MQTT broker to link to for device updates and control commands.
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Client id the service itself connects to the broker with.
    pub mqtt_client_id: String,
    /// Shared secret every meter authenticates with.
    pub mqtt_password: String,
    /// Database health poll interval in seconds.
    pub db_health_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;
        Ok(Self {
            // A single instance commonly hosts both logical databases;
            // fall back to DATABASE_URL when no separate URL is given.
            sensor_database_url: optional("SENSOR_DATABASE_URL", &database_url),
            database_url,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            mqtt_host: optional("MQTT_HOST", "localhost"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_client_id: optional("MQTT_CLIENT_ID", "power-meter-service"),
            mqtt_password: required("MQTT_PASSWORD")?,
            db_health_interval_secs: optional("DB_HEALTH_INTERVAL_SECS", "30")
                .parse()
                .context("DB_HEALTH_INTERVAL_SECS must be a positive integer")?,
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_returns_default_when_unset() {
        assert_eq!(optional("DEFINITELY_NOT_SET_XYZ", "fallback"), "fallback");
    }

    #[test]
    fn required_reports_missing_key() {
        let err = required("DEFINITELY_NOT_SET_XYZ").unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_NOT_SET_XYZ"));
    }
}
