use sqlx::PgPool;
use tracing::info;

use crate::db::models::Device;
use crate::error::{DomainError, DomainResult};

/// Tracks which meter belongs to which account.
///
/// Every storage failure surfaces as `RegistryUnavailable`; callers treat
/// that as a degraded service, never as fatal.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    pool: PgPool,
}

impl DeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-or-update keyed by `device_id`. On conflict the display name
    /// and owner are overwritten and `updated_at` refreshed — a device that
    /// re-registers under another account changes hands (last writer wins).
    pub async fn upsert(
        &self,
        device_id: &str,
        name: &str,
        username: &str,
    ) -> DomainResult<Device> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (device_id, name, username)
            VALUES ($1, $2, $3)
            ON CONFLICT (device_id) DO UPDATE
                SET name = EXCLUDED.name,
                    username = EXCLUDED.username,
                    updated_at = now()
            RETURNING id, device_id, name, username, created_at, updated_at
            "#,
        )
        .bind(device_id)
        .bind(name)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(DomainError::RegistryUnavailable)?;

        info!(device_id = %device_id, username = %username, "Device upserted");
        Ok(device)
    }

    pub async fn get_by_device_id(&self, device_id: &str) -> DomainResult<Option<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT id, device_id, name, username, created_at, updated_at \
             FROM devices WHERE device_id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DomainError::RegistryUnavailable)
    }

    /// All devices owned by `username`, most recently updated first.
    pub async fn list_by_owner(&self, username: &str) -> DomainResult<Vec<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT id, device_id, name, username, created_at, updated_at \
             FROM devices WHERE username = $1 ORDER BY updated_at DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(DomainError::RegistryUnavailable)
    }

    /// Rename a device. `NotFound` if no row matches — ownership is checked
    /// by the caller before getting here.
    pub async fn update_name(&self, device_id: &str, new_name: &str) -> DomainResult<Device> {
        let updated = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET name = $2, updated_at = now()
            WHERE device_id = $1
            RETURNING id, device_id, name, username, created_at, updated_at
            "#,
        )
        .bind(device_id)
        .bind(new_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DomainError::RegistryUnavailable)?;

        let device = updated.ok_or(DomainError::NotFound)?;
        info!(device_id = %device_id, name = %new_name, "Device renamed");
        Ok(device)
    }
}
