//! SQLite-backed repositories and rate counters
//!
//! One connection guarded by a mutex; every statement runs on the blocking
//! pool. Timestamps are stored as unix epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{FootprintError, Result};
use crate::models::{
    EmailConnection, NewPrivacyRequest, NewRequestEvent, NewServiceAccount, OwnerId,
    PrivacyRequest, RequestEvent, RequestStatus, ServiceAccount,
};
use crate::rate_limiter::CounterStore;
use crate::repository::{
    ConnectionRepository, PrivacyRequestRepository, RequestEventRepository,
    ServiceAccountRepository,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS service_accounts (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id        INTEGER NOT NULL,
        domain          TEXT NOT NULL,
        name            TEXT NOT NULL,
        first_seen      INTEGER NOT NULL,   -- unix epoch ms
        last_seen       INTEGER NOT NULL,
        evidence_count  INTEGER NOT NULL DEFAULT 1,

        UNIQUE(owner_id, domain)
    );

    CREATE TABLE IF NOT EXISTS privacy_requests (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id        INTEGER NOT NULL,
        service_id      INTEGER NOT NULL REFERENCES service_accounts(id),
        request_type    TEXT NOT NULL,      -- 'unsubscribe' | 'delete_close'
        status          TEXT NOT NULL,      -- 'pending' | 'needs_info' | 'completed'
        thread_id       TEXT,
        message_id      TEXT,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_requests_owner_status ON privacy_requests(owner_id, status);

    CREATE TABLE IF NOT EXISTS request_events (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id      INTEGER NOT NULL REFERENCES privacy_requests(id),
        event_type      TEXT NOT NULL,
        payload         TEXT NOT NULL DEFAULT '{}',
        created_at      INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_request ON request_events(request_id, created_at);

    CREATE TABLE IF NOT EXISTS email_connections (
        id                       INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id                 INTEGER NOT NULL,
        provider                 TEXT NOT NULL,
        refresh_token_encrypted  TEXT NOT NULL,
        scope                    TEXT NOT NULL,
        created_at               INTEGER NOT NULL,

        UNIQUE(owner_id, provider)
    );

    CREATE TABLE IF NOT EXISTS rate_counters (
        key         TEXT PRIMARY KEY,
        count       INTEGER NOT NULL,
        expires_at  INTEGER NOT NULL
    );
";

const SERVICE_COLUMNS: &str =
    "id, owner_id, domain, name, first_seen, last_seen, evidence_count";
const REQUEST_COLUMNS: &str =
    "id, owner_id, service_id, request_type, status, thread_id, message_id, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, request_id, event_type, payload, created_at";
const CONNECTION_COLUMNS: &str =
    "id, owner_id, provider, refresh_token_encrypted, scope, created_at";

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(FootprintError::Storage(format!(
                "timestamp {} out of range",
                ms
            ))),
        )
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = FootprintError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceAccount> {
    Ok(ServiceAccount {
        id: row.get(0)?,
        owner: row.get(1)?,
        domain: row.get(2)?,
        name: row.get(3)?,
        first_seen: millis_column(row, 4)?,
        last_seen: millis_column(row, 5)?,
        evidence_count: row.get(6)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<PrivacyRequest> {
    Ok(PrivacyRequest {
        id: row.get(0)?,
        owner: row.get(1)?,
        service_id: row.get(2)?,
        request_type: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        thread_id: row.get(5)?,
        message_id: row.get(6)?,
        created_at: millis_column(row, 7)?,
        updated_at: millis_column(row, 8)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<RequestEvent> {
    Ok(RequestEvent {
        id: row.get(0)?,
        request_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        created_at: millis_column(row, 4)?,
    })
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<EmailConnection> {
    Ok(EmailConnection {
        id: row.get(0)?,
        owner: row.get(1)?,
        provider: row.get(2)?,
        refresh_token_encrypted: row.get(3)?,
        scope: row.get(4)?,
        created_at: millis_column(row, 5)?,
    })
}

/// Durable store shared by the CLI and the background worker
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        info!("Opened database at {}", path.display());
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        debug!("Database schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| FootprintError::Storage("database lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| FootprintError::Storage(format!("database task failed: {}", e)))?
    }
}

#[async_trait]
impl ServiceAccountRepository for SqliteStore {
    async fn insert_service(&self, account: NewServiceAccount) -> Result<ServiceAccount> {
        self.with_conn(move |conn| {
            let seen = to_millis(account.seen_at);
            let row = conn.query_row(
                &format!(
                    "INSERT INTO service_accounts (owner_id, domain, name, first_seen, last_seen, evidence_count)
                     VALUES (?1, ?2, ?3, ?4, ?4, 1)
                     RETURNING {}",
                    SERVICE_COLUMNS
                ),
                params![account.owner, account.domain, account.name, seen],
                service_from_row,
            )?;
            Ok(row)
        })
        .await
    }

    async fn get_service(&self, id: i64) -> Result<Option<ServiceAccount>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM service_accounts WHERE id = ?1", SERVICE_COLUMNS),
                    params![id],
                    service_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn services_for_owner(&self, owner: OwnerId) -> Result<Vec<ServiceAccount>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM service_accounts WHERE owner_id = ?1 ORDER BY id",
                SERVICE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![owner], service_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn find_service_by_domain(
        &self,
        owner: OwnerId,
        domain: &str,
    ) -> Result<Option<ServiceAccount>> {
        let domain = domain.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM service_accounts WHERE owner_id = ?1 AND domain = ?2",
                        SERVICE_COLUMNS
                    ),
                    params![owner, domain],
                    service_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn record_evidence(&self, id: i64, seen_at: DateTime<Utc>) -> Result<ServiceAccount> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE service_accounts
                     SET evidence_count = evidence_count + 1, last_seen = ?2
                     WHERE id = ?1
                     RETURNING {}",
                    SERVICE_COLUMNS
                ),
                params![id, to_millis(seen_at)],
                service_from_row,
            )
            .optional()?
            .ok_or_else(|| FootprintError::NotFound(format!("service account {}", id)))
        })
        .await
    }
}

#[async_trait]
impl PrivacyRequestRepository for SqliteStore {
    async fn insert_request(&self, request: NewPrivacyRequest) -> Result<PrivacyRequest> {
        self.with_conn(move |conn| {
            let created = to_millis(request.created_at);
            let row = conn.query_row(
                &format!(
                    "INSERT INTO privacy_requests
                        (owner_id, service_id, request_type, status, thread_id, message_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     RETURNING {}",
                    REQUEST_COLUMNS
                ),
                params![
                    request.owner,
                    request.service_id,
                    request.request_type.as_str(),
                    RequestStatus::Pending.as_str(),
                    request.thread_id,
                    request.message_id,
                    created,
                ],
                request_from_row,
            )?;
            Ok(row)
        })
        .await
    }

    async fn get_request(&self, id: i64) -> Result<Option<PrivacyRequest>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM privacy_requests WHERE id = ?1", REQUEST_COLUMNS),
                    params![id],
                    request_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn requests_for_owner(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM privacy_requests WHERE owner_id = ?1 ORDER BY id",
                REQUEST_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![owner], request_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn requests_by_status(
        &self,
        owner: OwnerId,
        statuses: &[RequestStatus],
    ) -> Result<Vec<PrivacyRequest>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut values = vec![Value::Integer(owner)];
        values.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));

        self.with_conn(move |conn| {
            let placeholders = (2..=values.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM privacy_requests
                 WHERE owner_id = ?1 AND status IN ({})
                 ORDER BY id",
                REQUEST_COLUMNS, placeholders
            ))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), request_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn open_requests_with_thread(&self, owner: OwnerId) -> Result<Vec<PrivacyRequest>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM privacy_requests
                 WHERE owner_id = ?1
                   AND status IN (?2, ?3)
                   AND thread_id IS NOT NULL AND thread_id != ''
                 ORDER BY id",
                REQUEST_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        owner,
                        RequestStatus::Pending.as_str(),
                        RequestStatus::NeedsInfo.as_str()
                    ],
                    request_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update_status(
        &self,
        id: i64,
        expected: RequestStatus,
        new_status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE privacy_requests SET status = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?2 AND status != ?5",
                params![
                    id,
                    expected.as_str(),
                    new_status.as_str(),
                    to_millis(at),
                    RequestStatus::Completed.as_str(),
                ],
            )?;
            if changed == 1 {
                return Ok(true);
            }

            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM privacy_requests WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match exists {
                Some(_) => Ok(false),
                None => Err(FootprintError::NotFound(format!("privacy request {}", id))),
            }
        })
        .await
    }
}

#[async_trait]
impl RequestEventRepository for SqliteStore {
    async fn append_event(&self, event: NewRequestEvent) -> Result<RequestEvent> {
        self.with_conn(move |conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO request_events (request_id, event_type, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     RETURNING {}",
                    EVENT_COLUMNS
                ),
                params![
                    event.request_id,
                    event.event_type,
                    event.payload,
                    to_millis(event.created_at)
                ],
                event_from_row,
            )?;
            Ok(row)
        })
        .await
    }

    async fn events_for_request(&self, request_id: i64) -> Result<Vec<RequestEvent>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM request_events WHERE request_id = ?1 ORDER BY created_at, id",
                EVENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![request_id], event_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ConnectionRepository for SqliteStore {
    async fn upsert_connection(
        &self,
        owner: OwnerId,
        provider: &str,
        refresh_token_encrypted: &str,
        scope: &str,
    ) -> Result<EmailConnection> {
        let provider = provider.to_string();
        let token = refresh_token_encrypted.to_string();
        let scope = scope.to_string();
        self.with_conn(move |conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO email_connections (owner_id, provider, refresh_token_encrypted, scope, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(owner_id, provider) DO UPDATE SET
                        refresh_token_encrypted = excluded.refresh_token_encrypted,
                        scope = excluded.scope
                     RETURNING {}",
                    CONNECTION_COLUMNS
                ),
                params![owner, provider, token, scope, to_millis(Utc::now())],
                connection_from_row,
            )?;
            Ok(row)
        })
        .await
    }

    async fn get_connection(
        &self,
        owner: OwnerId,
        provider: &str,
    ) -> Result<Option<EmailConnection>> {
        let provider = provider.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM email_connections WHERE owner_id = ?1 AND provider = ?2",
                        CONNECTION_COLUMNS
                    ),
                    params![owner, provider],
                    connection_from_row,
                )
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = to_millis(Utc::now());
            let expires_at = now + ttl.as_millis() as i64;

            let tx = conn.transaction()?;
            tx.execute("DELETE FROM rate_counters WHERE expires_at <= ?1", params![now])?;
            let count: i64 = tx.query_row(
                "INSERT INTO rate_counters (key, count, expires_at) VALUES (?1, 1, ?2)
                 ON CONFLICT(key) DO UPDATE SET count = count + 1
                 RETURNING count",
                params![key, expires_at],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
