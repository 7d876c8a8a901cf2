//! Broker-facing event handling: connection authentication and inbound
//! message routing.
//!
//! The broker itself (connection accept, topic matching, QoS) is an external
//! collaborator; it drives [`MqttEventHandler`] with one call per event. The
//! [`IngestionCoordinator`] is the production implementation, bridging those
//! events to the device registry and the reading store.

mod link;

pub use link::MqttLink;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::devices::DeviceRegistry;
use crate::error::{DomainError, DomainResult};
use crate::sensors::ReadingStore;
use crate::validation::{validate_device_id, validate_power_payload};

/// Topic suffix meters publish readings on (`{device_id}/update`).
pub const UPDATE_TOPIC_SUFFIX: &str = "/update";

/// Client-id prefixes of dashboard/UI connections, which authenticate like
/// everyone else but are not meters and must not be registered as devices.
pub const DASHBOARD_CLIENT_PREFIXES: [&str; 2] = ["WEB", "dashboard_"];

/// Control topic for one device.
pub fn control_topic_for(device_id: &str) -> String {
    format!("{device_id}/control")
}

/// One entry point per broker event kind. Implementations must not share
/// mutable state across concurrent invocations beyond their injected
/// storage handles.
#[async_trait]
pub trait MqttEventHandler: Send + Sync {
    /// Decide whether a connecting client may proceed. Must never block on
    /// best-effort side work.
    async fn on_connect_attempt(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> DomainResult<()>;

    /// Handle one published message. Failures are local decisions — the
    /// handler logs and drops, it never errors back into the transport.
    async fn on_message(&self, client_id: &str, topic: &str, payload: &[u8]);

    async fn on_disconnect(&self, client_id: &str);
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Bridges the pub/sub transport to the registry and the reading store.
#[derive(Clone)]
pub struct IngestionCoordinator {
    registry: DeviceRegistry,
    store: ReadingStore,
    secret: String,
}

impl IngestionCoordinator {
    pub fn new(registry: DeviceRegistry, store: ReadingStore, secret: impl Into<String>) -> Self {
        Self { registry, store, secret: secret.into() }
    }
}

#[async_trait]
impl MqttEventHandler for IngestionCoordinator {
    async fn on_connect_attempt(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> DomainResult<()> {
        let username = authenticate(&self.secret, client_id, username, password)?;
        info!(client_id = %client_id, "Client authenticated");

        // Meters are registered as a detached best-effort side action; a
        // registry failure must not affect the authentication decision.
        if !is_dashboard_client(client_id) {
            if let Some(owner) = username {
                let registry = self.registry.clone();
                let device_id = client_id.to_owned();
                tokio::spawn(async move {
                    if let Err(e) = registry.upsert(&device_id, &device_id, &owner).await {
                        warn!(
                            device_id = %device_id,
                            error = %e,
                            "Best-effort device registration failed"
                        );
                    }
                });
            } else {
                debug!(client_id = %client_id, "No username on connect; skipping registration");
            }
        }

        Ok(())
    }

    async fn on_message(&self, client_id: &str, topic: &str, payload: &[u8]) {
        if !topic.ends_with(UPDATE_TOPIC_SUFFIX) {
            debug!(client_id = %client_id, topic = %topic, "Ignoring non-update topic");
            return;
        }

        let raw: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    client_id = %client_id,
                    topic = %topic,
                    error = %e,
                    "Failed to parse update message; dropping"
                );
                return;
            }
        };

        // Device id from the payload, falling back to the connection id.
        let device_id = raw
            .get("espid")
            .and_then(|v| v.as_str())
            .unwrap_or(client_id)
            .to_owned();

        if let Err(e) = validate_device_id(&device_id) {
            warn!(device_id = %device_id, reason = %e, "Invalid device id in update; dropping");
            return;
        }

        let result = validate_power_payload(&raw, Utc::now());
        let Some(reading) = result.sanitized else {
            warn!(
                device_id = %device_id,
                errors = %result.errors.join("; "),
                "Invalid power meter data; dropping"
            );
            return;
        };

        match self.store.append(&device_id, &reading).await {
            Ok(row_id) => {
                debug!(device_id = %device_id, row_id, "Update stored");
            }
            Err(DomainError::StoreUnavailable(e)) => {
                // No durable local buffering: meters resend on their own
                // interval, so the sample is dropped once logged.
                warn!(
                    device_id = %device_id,
                    error = %e,
                    "Reading store unavailable; dropping update"
                );
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to store update; dropping");
            }
        }
    }

    async fn on_disconnect(&self, client_id: &str) {
        info!(client_id = %client_id, "Client disconnected");
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Shared-secret credential check. Returns the case-folded username, if one
/// was supplied. Rejection reasons describe the failure shape without ever
/// echoing the configured secret or the attempted password.
fn authenticate(
    secret: &str,
    client_id: &str,
    username: Option<&str>,
    password: Option<&[u8]>,
) -> DomainResult<Option<String>> {
    if client_id.is_empty() {
        return Err(DomainError::AuthenticationFailed("no client id provided".into()));
    }

    let Some(password) = password else {
        return Err(DomainError::AuthenticationFailed("no password provided".into()));
    };

    let decoded = std::str::from_utf8(password).map_err(|_| {
        DomainError::AuthenticationFailed("invalid password encoding".into())
    })?;

    if decoded != secret {
        return Err(DomainError::AuthenticationFailed("invalid credentials".into()));
    }

    Ok(username.map(|u| u.to_lowercase()))
}

fn is_dashboard_client(client_id: &str) -> bool {
    DASHBOARD_CLIENT_PREFIXES
        .iter()
        .any(|prefix| client_id.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::PgPool;

    const SECRET: &str = "meter-secret";

    // -----------------------------------------------------------------------
    // authenticate
    // -----------------------------------------------------------------------

    #[test]
    fn valid_credentials_pass_and_fold_username() {
        let user = authenticate(SECRET, "ESP_01", Some("Alice"), Some(SECRET.as_bytes())).unwrap();
        assert_eq!(user.as_deref(), Some("alice"));
    }

    #[test]
    fn username_is_optional() {
        let user = authenticate(SECRET, "ESP_01", None, Some(SECRET.as_bytes())).unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn missing_password_is_rejected() {
        let err = authenticate(SECRET, "ESP_01", None, None).unwrap_err();
        assert!(err.to_string().contains("no password provided"));
    }

    #[test]
    fn undecodable_password_is_rejected() {
        let err = authenticate(SECRET, "ESP_01", None, Some(&[0xff, 0xfe])).unwrap_err();
        assert!(err.to_string().contains("invalid password encoding"));
    }

    #[test]
    fn wrong_password_is_rejected_without_leaking() {
        let err = authenticate(SECRET, "ESP_01", None, Some(b"guess")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid credentials"));
        assert!(!msg.contains(SECRET));
        assert!(!msg.contains("guess"));
    }

    #[test]
    fn empty_client_id_is_rejected() {
        let err = authenticate(SECRET, "", None, Some(SECRET.as_bytes())).unwrap_err();
        assert!(err.to_string().contains("no client id"));
    }

    #[test]
    fn dashboard_prefixes_are_recognised() {
        assert!(is_dashboard_client("WEB_7f3a"));
        assert!(is_dashboard_client("dashboard_1a2b"));
        assert!(!is_dashboard_client("ESP_01"));
    }

    #[test]
    fn control_topic_is_per_device() {
        assert_eq!(control_topic_for("ESP_01"), "ESP_01/control");
    }

    // -----------------------------------------------------------------------
    // Coordinator (database-backed)
    // -----------------------------------------------------------------------

    fn coordinator(pool: PgPool) -> IngestionCoordinator {
        IngestionCoordinator::new(
            DeviceRegistry::new(pool.clone()),
            ReadingStore::new(pool),
            SECRET,
        )
    }

    fn example_payload() -> Vec<u8> {
        json!({
            "Va": 230.1, "Vb": 229.8, "Vc": 231.0,
            "Ia": 5.2, "Ib": 5.1, "Ic": 5.3,
            "Pa": 1196, "Pb": 1172, "Pc": 1224,
            "PFa": 0.98, "PFb": 0.97, "PFc": 0.99,
            "Ei": 1000.5, "Ee": 200.2, "Et": 800.3
        })
        .to_string()
        .into_bytes()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_message_end_to_end(pool: PgPool) {
        let c = coordinator(pool.clone());

        let before = Utc::now();
        c.on_message("ESP_01", "ESP_01/update", &example_payload()).await;
        let after = Utc::now();

        let rows = ReadingStore::new(pool).latest("ESP_01", 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.va, 230.1);
        assert_eq!(row.pfc, 0.99);
        assert_eq!(row.energy_total, 800.3);
        // No `time` field → ingestion timestamp substituted.
        assert!(row.recorded_at >= before && row.recorded_at <= after);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn espid_field_overrides_client_id(pool: PgPool) {
        let c = coordinator(pool.clone());

        let mut payload: serde_json::Value =
            serde_json::from_slice(&example_payload()).unwrap();
        payload.as_object_mut().unwrap().insert("espid".into(), json!("ESP_42"));
        c.on_message("other-client", "other-client/update", payload.to_string().as_bytes())
            .await;

        let store = ReadingStore::new(pool);
        assert_eq!(store.latest("ESP_42", 10).await.unwrap().len(), 1);
        assert!(store.latest("other-client", 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn invalid_payload_is_dropped_without_insert(pool: PgPool) {
        let c = coordinator(pool.clone());

        c.on_message("ESP_01", "ESP_01/update", b"not json at all").await;
        c.on_message("ESP_01", "ESP_01/update", br#"{"Va": 230.1}"#).await;

        assert!(ReadingStore::new(pool).latest("ESP_01", 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn invalid_device_id_is_dropped(pool: PgPool) {
        let c = coordinator(pool.clone());
        // Client id too short, no espid in payload.
        c.on_message("ab", "ab/update", &example_payload()).await;
        assert!(ReadingStore::new(pool).latest("ab_table", 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn non_update_topics_are_ignored(pool: PgPool) {
        let c = coordinator(pool.clone());
        c.on_message("ESP_01", "ESP_01/status", &example_payload()).await;
        assert!(ReadingStore::new(pool).latest("ESP_01", 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn auth_registers_meter_in_background(pool: PgPool) {
        let c = coordinator(pool.clone());

        c.on_connect_attempt("ESP_01", Some("Alice"), Some(SECRET.as_bytes()))
            .await
            .unwrap();

        // Registration is detached; poll briefly for it to land.
        let registry = DeviceRegistry::new(pool);
        let mut device = None;
        for _ in 0..50 {
            device = registry.get_by_device_id("ESP_01").await.unwrap();
            if device.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let device = device.expect("device should be registered after auth");
        assert_eq!(device.username, "alice");
        assert_eq!(device.name, "ESP_01");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn dashboard_clients_are_not_registered(pool: PgPool) {
        let c = coordinator(pool.clone());

        c.on_connect_attempt("WEB_7f3a", Some("alice"), Some(SECRET.as_bytes()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(DeviceRegistry::new(pool)
            .get_by_device_id("WEB_7f3a")
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn rejected_connection_creates_no_state(pool: PgPool) {
        let c = coordinator(pool.clone());

        let err = c
            .on_connect_attempt("ESP_01", Some("alice"), Some(b"wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AuthenticationFailed(_)));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(DeviceRegistry::new(pool)
            .get_by_device_id("ESP_01")
            .await
            .unwrap()
            .is_none());
    }
}
