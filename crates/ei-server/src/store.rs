//! Analysis persistence.
//!
//! Every transition is a guarded update on the current status, so exactly one
//! worker claims a queued record and a terminal record is never rewritten.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ei_core::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::record::{AnalysisRecord, AnalysisStatus, Completion};

/// Message stored on records a restart left running.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// CRUD over analysis records keyed by `(tenant_id, id)`.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persist a new queued record.
    async fn insert(&self, record: &AnalysisRecord) -> Result<()>;

    /// Look up a record for a tenant.
    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<AnalysisRecord>>;

    /// Move the oldest queued record to running and return it.
    async fn claim_next(&self) -> Result<Option<AnalysisRecord>>;

    /// Move a running record to its terminal state.
    async fn complete(&self, tenant_id: &str, id: &str, completion: Completion) -> Result<AnalysisRecord>;

    /// Fail every running record with `message`; returns how many.
    async fn fail_running(&self, message: &str) -> Result<usize>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

fn not_found(id: &str) -> Error {
    Error::NotFound(id.to_string())
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

type Key = (String, String);

#[derive(Default)]
struct MemoryInner {
    records: HashMap<Key, AnalysisRecord>,
    queue: VecDeque<Key>,
}

/// In-memory store. Records are lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn insert(&self, record: &AnalysisRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (record.tenant_id.clone(), record.id.clone());
        if inner.records.contains_key(&key) {
            return Err(Error::Store(format!("analysis {} already exists", record.id)));
        }
        if record.status == AnalysisStatus::Queued {
            inner.queue.push_back(key.clone());
        }
        inner.records.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<AnalysisRecord>> {
        let key = (tenant_id.to_string(), id.to_string());
        Ok(self.inner.lock().await.records.get(&key).cloned())
    }

    async fn claim_next(&self) -> Result<Option<AnalysisRecord>> {
        let mut inner = self.inner.lock().await;
        while let Some(key) = inner.queue.pop_front() {
            if let Some(rec) = inner.records.get_mut(&key)
                && rec.status == AnalysisStatus::Queued
            {
                rec.start(Utc::now())?;
                return Ok(Some(rec.clone()));
            }
        }
        Ok(None)
    }

    async fn complete(&self, tenant_id: &str, id: &str, completion: Completion) -> Result<AnalysisRecord> {
        let key = (tenant_id.to_string(), id.to_string());
        let mut inner = self.inner.lock().await;
        let rec = inner.records.get_mut(&key).ok_or_else(|| not_found(id))?;
        rec.finish(completion, Utc::now())?;
        Ok(rec.clone())
    }

    async fn fail_running(&self, message: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut n = 0;
        for rec in inner.records.values_mut().filter(|r| r.status == AnalysisStatus::Running) {
            rec.finish(Completion::Failed(message.to_string()), now)?;
            n += 1;
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Durable store on a single SQLite connection (WAL). Statements run on the
/// blocking pool.
pub struct SqliteStore {
    conn: Arc<parking_lot::Mutex<Connection>>,
}

const COLUMNS: &str = "id, tenant_id, request, request_fingerprint, status, result_full, \
     error_message, created_at, started_at, completed_at";

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(store_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS analyses (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                request TEXT NOT NULL,
                request_fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                result_full TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                UNIQUE (tenant_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_analyses_status_seq ON analyses(status, seq);",
        )
        .map_err(store_err)?;
        Ok(Self { conn: Arc::new(parking_lot::Mutex::new(conn)) })
    }

    /// Run `f` against the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| Error::Internal(format!("sqlite task failed: {e}")))?
    }

    fn read(conn: &Connection, tenant_id: &str, id: &str) -> Result<Option<AnalysisRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM analyses WHERE tenant_id = ?1 AND id = ?2");
        let raw = conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.query_row(params![tenant_id, id], RawRow::from_row).optional())
            .map_err(store_err)?;
        raw.map(RawRow::into_record).transpose()
    }
}

/// Column values before JSON and timestamp decoding.
struct RawRow {
    id: String,
    tenant_id: String,
    request: String,
    request_fingerprint: String,
    status: String,
    result_full: Option<String>,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            request: row.get(2)?,
            request_fingerprint: row.get(3)?,
            status: row.get(4)?,
            result_full: row.get(5)?,
            error_message: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<AnalysisRecord> {
        let ts = |s: &str| -> Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)).map_err(store_err)
        };
        Ok(AnalysisRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            request: serde_json::from_str(&self.request)?,
            request_fingerprint: self.request_fingerprint,
            status: self.status.parse()?,
            result_full: self.result_full.as_deref().map(serde_json::from_str).transpose()?,
            error_message: self.error_message,
            created_at: ts(&self.created_at)?,
            started_at: self.started_at.as_deref().map(ts).transpose()?,
            completed_at: self.completed_at.as_deref().map(ts).transpose()?,
        })
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn insert(&self, record: &AnalysisRecord) -> Result<()> {
        let request = serde_json::to_string(&record.request)?;
        let result_full = record.result_full.as_ref().map(serde_json::to_string).transpose()?;
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO analyses ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    record.id,
                    record.tenant_id,
                    request,
                    record.request_fingerprint,
                    record.status.as_str(),
                    result_full,
                    record.error_message,
                    record.created_at.to_rfc3339(),
                    record.started_at.map(|t| t.to_rfc3339()),
                    record.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<AnalysisRecord>> {
        let (tenant_id, id) = (tenant_id.to_string(), id.to_string());
        self.with_conn(move |conn| Self::read(conn, &tenant_id, &id)).await
    }

    async fn claim_next(&self) -> Result<Option<AnalysisRecord>> {
        self.with_conn(|conn| loop {
            let next: Option<(String, String)> = conn
                .query_row(
                    "SELECT tenant_id, id FROM analyses WHERE status = 'queued' ORDER BY seq LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(store_err)?;
            let Some((tenant_id, id)) = next else {
                return Ok(None);
            };
            let claimed = conn
                .execute(
                    "UPDATE analyses SET status = 'running', started_at = ?3
                     WHERE tenant_id = ?1 AND id = ?2 AND status = 'queued'",
                    params![tenant_id, id, Utc::now().to_rfc3339()],
                )
                .map_err(store_err)?;
            if claimed == 1 {
                return Self::read(conn, &tenant_id, &id);
            }
        })
        .await
    }

    async fn complete(&self, tenant_id: &str, id: &str, completion: Completion) -> Result<AnalysisRecord> {
        let to = completion.status();
        let (result_full, error_message) = match completion {
            Completion::Success(v) => (Some(serde_json::to_string(&v)?), None),
            Completion::Failed(msg) => (None, Some(msg)),
        };
        let (tenant_id, id) = (tenant_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE analyses SET status = ?3, result_full = ?4, error_message = ?5, completed_at = ?6
                     WHERE tenant_id = ?1 AND id = ?2 AND status = 'running'",
                    params![tenant_id, id, to.as_str(), result_full, error_message, Utc::now().to_rfc3339()],
                )
                .map_err(store_err)?;
            let rec = Self::read(conn, &tenant_id, &id)?.ok_or_else(|| not_found(&id))?;
            if changed == 0 {
                return Err(Error::InvalidTransition { id, from: rec.status.to_string(), to: to.to_string() });
            }
            Ok(rec)
        })
        .await
    }

    async fn fail_running(&self, message: &str) -> Result<usize> {
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE analyses SET status = 'failed', error_message = ?1, completed_at = ?2
                 WHERE status = 'running'",
                params![message, Utc::now().to_rfc3339()],
            )
            .map_err(store_err)
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ei_core::{AnalysisRequest, Method};

    fn record(tenant: &str) -> AnalysisRecord {
        let req = AnalysisRequest::new(
            Method::Did,
            vec!["3550308".into()],
            vec!["3509502".into()],
            vec!["pib_log".into()],
            2015,
            2010,
            2020,
        );
        AnalysisRecord::queued(tenant, req).unwrap()
    }

    async fn exercise(store: &dyn AnalysisStore) {
        let a = record("t1");
        let b = record("t2");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        assert!(store.insert(&a).await.is_err());

        assert!(store.get("t2", &a.id).await.unwrap().is_none(), "tenant-scoped lookup");
        assert_eq!(store.get("t1", &a.id).await.unwrap().unwrap(), a);

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, a.id, "oldest first");
        assert_eq!(first.status, AnalysisStatus::Running);
        assert!(first.started_at.is_some());
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.id, b.id);
        assert!(store.claim_next().await.unwrap().is_none());

        let done = store
            .complete("t1", &a.id, Completion::Success(serde_json::json!({"x": 1.5})))
            .await
            .unwrap();
        assert_eq!(done.status, AnalysisStatus::Success);
        assert_eq!(done.result_full, Some(serde_json::json!({"x": 1.5})));
        assert!(done.error_message.is_none());

        let err = store.complete("t1", &a.id, Completion::Failed("again".into())).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(store.get("t1", &a.id).await.unwrap().unwrap().status, AnalysisStatus::Success);

        assert_eq!(store.fail_running(INTERRUPTED_BY_RESTART).await.unwrap(), 1);
        let b_now = store.get("t2", &b.id).await.unwrap().unwrap();
        assert_eq!(b_now.status, AnalysisStatus::Failed);
        assert_eq!(b_now.error_message.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert!(b_now.result_full.is_none());

        let missing = store.complete("t1", "nope", Completion::Failed("x".into())).await.unwrap_err();
        assert_eq!(missing.kind(), "not_found");
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise(&SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn busy_sqlite_connection_does_not_stall_the_runtime() {
        use std::time::{Duration, Instant};

        let store = SqliteStore::open_in_memory().unwrap();
        let a = record("t1");
        store.insert(&a).await.unwrap();

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let conn = Arc::clone(&store.conn);
            std::thread::spawn(move || {
                let _guard = conn.lock();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
            })
        };
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let (found, ticked_after) = tokio::join!(store.get("t1", &a.id), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            started.elapsed()
        });
        assert!(ticked_after < Duration::from_millis(200), "runtime stalled for {ticked_after:?}");
        assert_eq!(found.unwrap().unwrap().id, a.id);
        holder.join().unwrap();
    }
}
