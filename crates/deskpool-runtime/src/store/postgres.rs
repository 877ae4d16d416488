//! PostgreSQL record store.
//!
//! Records live in a `containers` table. A unique index over the host port
//! of live rows makes the database reject a second record on a taken port,
//! which surfaces as [`StoreError::PortConflict`].

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskpool_common::constants::DEFAULT_OPERATION_TIMEOUT_SECS;
use deskpool_common::types::{ContainerRecord, ContainerStatus, RecordId, RuntimeId};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};

use super::{NewRecord, RecordStore, StoreError};

const MAX_CONNECTIONS: u32 = 5;

const HOST_PORT_INDEX: &str = "containers_live_host_port";

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS containers (
        id BIGSERIAL PRIMARY KEY,
        container_id TEXT NOT NULL,
        internal_port INTEGER NOT NULL,
        host_port INTEGER NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS containers_live_host_port
        ON containers (host_port)
        WHERE status IN ('created', 'running', 'stopped')",
];

const COLUMNS: &str = "id, container_id, internal_port, host_port, status, created_at";

/// Record store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Connects to `database_url` and creates the schema if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the URL is invalid, the server is
    /// unreachable, or the schema cannot be created.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
            .connect(database_url)
            .await?;
        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        tracing::info!("connected to PostgreSQL record store");
        Ok(store)
    }

    /// Wraps an existing pool without touching the schema.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `containers` table and its host-port index if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            let _ = sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn port_holder(&self, host_port: u16) -> Option<RecordId> {
        let row = sqlx::query("SELECT id FROM containers WHERE host_port = $1")
            .bind(i32::from(host_port))
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()?;
        row.try_get::<i64, _>("id").ok().and_then(|raw| record_id(raw).ok())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, record: NewRecord) -> Result<ContainerRecord, StoreError> {
        let sql = format!(
            "INSERT INTO containers (container_id, internal_port, host_port, status) \
             VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(record.runtime_id.as_str())
            .bind(i32::from(record.internal_port))
            .bind(i32::from(record.host_port))
            .bind(record.status.as_str())
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(row) => record_from_row(&row),
            Err(e) if is_host_port_violation(&e) => Err(StoreError::PortConflict {
                port: record.host_port,
                holder: self.port_holder(record.host_port).await,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<ContainerRecord>, StoreError> {
        let Ok(raw) = db_id(id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {COLUMNS} FROM containers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(raw)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_status(&self, id: RecordId, status: ContainerStatus) -> Result<(), StoreError> {
        let affected = sqlx::query("UPDATE containers SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(db_id(id)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        let affected = sqlx::query("DELETE FROM containers WHERE id = $1")
            .bind(db_id(id)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn list_host_ports(&self) -> Result<BTreeSet<u16>, StoreError> {
        let rows = sqlx::query("SELECT host_port FROM containers")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| port(row.try_get("host_port")?, "host_port"))
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM containers ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn is_host_port_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint().is_none_or(|c| c == HOST_PORT_INDEX)
        }
        _ => false,
    }
}

fn record_from_row(row: &PgRow) -> Result<ContainerRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(ContainerRecord {
        id: record_id(row.try_get("id")?)?,
        runtime_id: RuntimeId::new(row.try_get::<String, _>("container_id")?),
        internal_port: port(row.try_get("internal_port")?, "internal_port")?,
        host_port: port(row.try_get("host_port")?, "host_port")?,
        status: status.parse::<ContainerStatus>().map_err(|e| StoreError::Corrupt {
            message: e.to_string(),
        })?,
        created_at,
    })
}

fn record_id(raw: i64) -> Result<RecordId, StoreError> {
    u64::try_from(raw)
        .map(RecordId::new)
        .map_err(|_| StoreError::Corrupt {
            message: format!("negative id {raw}"),
        })
}

fn db_id(id: RecordId) -> Result<i64, StoreError> {
    i64::try_from(id.get()).map_err(|_| StoreError::NotFound { id })
}

fn port(raw: i32, column: &str) -> Result<u16, StoreError> {
    u16::try_from(raw).map_err(|_| StoreError::Corrupt {
        message: format!("{column} {raw} is not a valid port"),
    })
}
