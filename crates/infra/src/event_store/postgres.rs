//! Postgres-backed event store implementation.
//!
//! Two tables hold everything: `jitney_events` (one row per event, primary key
//! `(aggregate_type, aggregate_id, version)`) and `jitney_snapshots` (one row per
//! snapshot, same key). Payloads and headers are stored as JSONB.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{Span, info, instrument};

use jitney_core::AggregateId;

use super::r#trait::{
    EventDescriptor, EventStore, EventStoreError, Headers, SnapshotDescriptor, StreamStorage, require_aggregate_type,
};

pub(crate) const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jitney_events (
        position BIGSERIAL UNIQUE,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        version BIGINT NOT NULL CHECK (version >= 0),
        timestamp TIMESTAMPTZ NOT NULL,
        event_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}'::jsonb,
        PRIMARY KEY (aggregate_type, aggregate_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jitney_snapshots (
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        version BIGINT NOT NULL CHECK (version >= 0),
        timestamp TIMESTAMPTZ NOT NULL,
        snapshot_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        headers JSONB NOT NULL DEFAULT '{}'::jsonb,
        PRIMARY KEY (aggregate_type, aggregate_id, version)
    )
    "#,
];

/// Postgres-backed append-only event store.
///
/// ## Optimistic Concurrency
///
/// `check_concurrency` compares `MAX(version)` of the stream with the version the save
/// started from. Batches are inserted in one transaction that re-reads the stream version
/// first; if another writer still commits in between, the primary key rejects the
/// duplicate version and the whole batch fails with `Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect a small pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the event and snapshot tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        info!("event store schema ready");
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn open_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Box<dyn StreamStorage>, EventStoreError> {
        require_aggregate_type(aggregate_type)?;
        Ok(Box::new(PostgresStream {
            pool: self.pool.clone(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        }))
    }

    #[instrument(skip(self), fields(event_count), err)]
    async fn replay_all(&self) -> Result<Vec<EventDescriptor>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, version, timestamp, event_type, payload, headers
            FROM jitney_events
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replay_all", e))?;

        let events = decode_event_rows(&rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }
}

struct PostgresStream {
    pool: Arc<PgPool>,
    aggregate_type: String,
    aggregate_id: AggregateId,
}

impl PostgresStream {
    fn owns(&self, event: &EventDescriptor) -> Result<(), EventStoreError> {
        if event.aggregate_type != self.aggregate_type || event.aggregate_id != self.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "event for {}/{} appended to stream {}/{}",
                event.aggregate_type, event.aggregate_id, self.aggregate_type, self.aggregate_id
            )));
        }
        Ok(())
    }

    /// Newest persisted version of the stream, `-1` when it is empty.
    async fn current_version(&self, conn: &mut PgConnection) -> Result<i64, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(version), -1) AS current_version
            FROM jitney_events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(&self.aggregate_type)
        .bind(self.aggregate_id.as_uuid())
        .fetch_one(conn)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;

        row.try_get("current_version")
            .map_err(|e| EventStoreError::storage(format!("failed to read current_version: {e}")))
    }
}

async fn insert_event(conn: &mut PgConnection, event: &EventDescriptor) -> Result<(), EventStoreError> {
    sqlx::query(
        r#"
        INSERT INTO jitney_events (
            aggregate_type, aggregate_id, version, timestamp, event_type, payload, headers
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&event.aggregate_type)
    .bind(event.aggregate_id.as_uuid())
    .bind(event.version)
    .bind(event.timestamp)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(headers_to_json(&event.headers)?)
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_event", e))?;
    Ok(())
}

#[async_trait]
impl StreamStorage for PostgresStream {
    #[instrument(
        skip(self),
        fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id, current_version),
        err
    )]
    async fn check_concurrency(&self, original_version: i64) -> Result<(), EventStoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        let current = self.current_version(&mut conn).await?;
        Span::current().record("current_version", current);

        if current != original_version {
            return Err(EventStoreError::Concurrency(format!(
                "stream {}/{} is at version {current}, save started from {original_version}",
                self.aggregate_type, self.aggregate_id
            )));
        }
        Ok(())
    }

    async fn append(&self, event: EventDescriptor) -> Result<(), EventStoreError> {
        self.append_batch(vec![event]).await
    }

    /// Insert the batch in one transaction, after re-reading the stream version inside it.
    /// Any failure rolls the whole batch back.
    #[instrument(
        skip(self, events),
        fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id, event_count = events.len()),
        err
    )]
    async fn append_batch(&self, events: Vec<EventDescriptor>) -> Result<(), EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        for event in &events {
            self.owns(event)?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = self.current_version(&mut tx).await?;
        if first.version != current + 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency(format!(
                "stream {}/{} is at version {current}, batch starts at {}",
                self.aggregate_type, self.aggregate_id, first.version
            )));
        }

        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id), err)]
    async fn read(&self, from_version: i64, to_version: i64) -> Result<Vec<EventDescriptor>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, version, timestamp, event_type, payload, headers
            FROM jitney_events
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND version BETWEEN $3 AND $4
            ORDER BY version ASC
            "#,
        )
        .bind(&self.aggregate_type)
        .bind(self.aggregate_id.as_uuid())
        .bind(from_version)
        .bind(to_version)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read", e))?;

        decode_event_rows(&rows)
    }

    #[instrument(
        skip(self),
        fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id, snapshot_found),
        err
    )]
    async fn latest_snapshot(&self) -> Result<Option<SnapshotDescriptor>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, version, timestamp, snapshot_type, payload, headers
            FROM jitney_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(&self.aggregate_type)
        .bind(self.aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_snapshot", e))?;

        Span::current().record("snapshot_found", row.is_some());
        match row {
            Some(row) => {
                let snapshot = SnapshotRow::from_row(&row)
                    .map_err(|e| EventStoreError::storage(format!("failed to decode snapshot row: {e}")))?;
                Ok(Some(snapshot.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, snapshot),
        fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id, version = snapshot.version),
        err
    )]
    async fn append_snapshot(&self, snapshot: SnapshotDescriptor) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO jitney_snapshots (
                aggregate_type, aggregate_id, version, timestamp, snapshot_type, payload, headers
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (aggregate_type, aggregate_id, version)
            DO UPDATE SET
                payload = EXCLUDED.payload,
                headers = EXCLUDED.headers,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(snapshot.version)
        .bind(snapshot.timestamp)
        .bind(&snapshot.snapshot_type)
        .bind(&snapshot.payload)
        .bind(headers_to_json(&snapshot.headers)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_snapshot", e))?;

        Ok(())
    }
}

/// Database row shape of `jitney_events`.
#[derive(Debug, Clone, PartialEq)]
struct EventRow {
    aggregate_type: String,
    aggregate_id: uuid::Uuid,
    version: i64,
    timestamp: DateTime<Utc>,
    event_type: String,
    payload: JsonValue,
    headers: JsonValue,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            version: row.try_get("version")?,
            timestamp: row.try_get("timestamp")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            headers: row.try_get("headers")?,
        })
    }
}

impl TryFrom<EventRow> for EventDescriptor {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            aggregate_type: row.aggregate_type,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            version: row.version,
            timestamp: row.timestamp,
            event_type: row.event_type,
            payload: row.payload,
            headers: headers_from_json(row.headers)?,
        })
    }
}

/// Database row shape of `jitney_snapshots`.
#[derive(Debug, Clone, PartialEq)]
struct SnapshotRow {
    aggregate_type: String,
    aggregate_id: uuid::Uuid,
    version: i64,
    timestamp: DateTime<Utc>,
    snapshot_type: String,
    payload: JsonValue,
    headers: JsonValue,
}

impl<'r> FromRow<'r, PgRow> for SnapshotRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            version: row.try_get("version")?,
            timestamp: row.try_get("timestamp")?,
            snapshot_type: row.try_get("snapshot_type")?,
            payload: row.try_get("payload")?,
            headers: row.try_get("headers")?,
        })
    }
}

impl TryFrom<SnapshotRow> for SnapshotDescriptor {
    type Error = EventStoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            aggregate_type: row.aggregate_type,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            version: row.version,
            timestamp: row.timestamp,
            snapshot_type: row.snapshot_type,
            payload: row.payload,
            headers: headers_from_json(row.headers)?,
        })
    }
}

fn decode_event_rows(rows: &[PgRow]) -> Result<Vec<EventDescriptor>, EventStoreError> {
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let event = EventRow::from_row(row)
            .map_err(|e| EventStoreError::storage(format!("failed to decode event row: {e}")))?;
        events.push(event.try_into()?);
    }
    Ok(events)
}

fn headers_to_json(headers: &Headers) -> Result<JsonValue, EventStoreError> {
    Ok(serde_json::to_value(headers)?)
}

fn headers_from_json(value: JsonValue) -> Result<Headers, EventStoreError> {
    if value.is_null() {
        return Ok(Headers::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => EventStoreError::storage(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => EventStoreError::storage(format!("unexpected row not found in {operation}")),
        other => EventStoreError::storage(format!("sqlx error in {operation}: {other}")),
    }
}
