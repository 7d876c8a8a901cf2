pub mod models;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// First-attempt backoff for the initial database connection.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff ceiling; also the steady-state health poll interval default.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Bounded initial-connection attempts before giving up at startup.
const MAX_CONNECT_ATTEMPTS: u32 = 8;

/// How long an `acquire` may wait before the pool reports unavailability.
/// Exhaustion must surface as an error, not a hang.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Process-owned handle to the two logical databases: the registry database
/// (devices table) and the readings database (one table per meter).
///
/// Dependency-injected into the registry, the reading store and the
/// ingestion coordinator; there is no module-level pool singleton.
#[derive(Debug, Clone)]
pub struct Db {
    registry: PgPool,
    readings: PgPool,
}

impl Db {
    /// Connect to both databases, retrying each with capped exponential
    /// backoff (1s doubling to 30s) across a bounded number of attempts.
    pub async fn open(database_url: &str, sensor_database_url: &str) -> Result<Self> {
        let registry = connect_with_backoff(database_url, "registry").await?;
        let readings = if sensor_database_url == database_url {
            registry.clone()
        } else {
            connect_with_backoff(sensor_database_url, "readings").await?
        };
        Ok(Self { registry, readings })
    }

    /// Wrap already-open pools. Used by tests to point both logical
    /// databases at one test-provisioned instance.
    pub fn from_pools(registry: PgPool, readings: PgPool) -> Self {
        Self { registry, readings }
    }

    pub fn registry_pool(&self) -> &PgPool {
        &self.registry
    }

    pub fn readings_pool(&self) -> &PgPool {
        &self.readings
    }

    /// Ping both databases. Returns `false` on the first failure.
    pub async fn health_check(&self) -> bool {
        for (name, pool) in [("registry", &self.registry), ("readings", &self.readings)] {
            if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
                warn!(database = name, error = %e, "Database health check failed");
                return false;
            }
        }
        true
    }

    pub async fn close(&self) {
        self.registry.close().await;
        self.readings.close().await;
    }
}

async fn connect_with_backoff(database_url: &str, name: &str) -> Result<PgPool> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!(database = name, attempt, "Database connected");
                return Ok(pool);
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(
                    database = name,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "Database connection failed; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("{name} database unreachable after {MAX_CONNECT_ATTEMPTS} attempts")
                });
            }
        }
    }
    unreachable!("loop returns on every path")
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-device table naming
// ---------------------------------------------------------------------------

/// Derive the readings table name for a device.
///
/// Device identifiers come from device-controlled input, so every dynamic
/// table reference goes through here: the identifier must already satisfy
/// `[A-Za-z0-9_-]{3,32}` (checked again as a hard invariant) and the result
/// is meant to be embedded double-quoted via [`quoted_table`].
pub fn table_name_for(device_id: &str) -> Option<String> {
    let len = device_id.chars().count();
    if !(3..=32).contains(&len) {
        return None;
    }
    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some(format!("meter_{device_id}"))
}

/// Quote a table name produced by [`table_name_for`] for SQL embedding.
/// The allowed charset contains no `"`, so plain wrapping is sufficient.
pub fn quoted_table(table: &str) -> String {
    format!("\"{table}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_prefixes_meter() {
        assert_eq!(table_name_for("ESP_01").as_deref(), Some("meter_ESP_01"));
    }

    #[test]
    fn table_name_allows_hyphen_and_underscore() {
        assert_eq!(
            table_name_for("esp-unit_9").as_deref(),
            Some("meter_esp-unit_9")
        );
    }

    #[test]
    fn table_name_rejects_short_long_and_bad_chars() {
        assert!(table_name_for("ab").is_none());
        assert!(table_name_for(&"x".repeat(33)).is_none());
        assert!(table_name_for("esp.01").is_none());
        assert!(table_name_for("esp;DROP TABLE devices").is_none());
        assert!(table_name_for("esp\"01").is_none());
    }

    #[test]
    fn quoted_table_wraps_in_double_quotes() {
        assert_eq!(quoted_table("meter_ESP_01"), "\"meter_ESP_01\"");
    }
}
