//! SQLite-backed durable record store.
//!
//! One connection behind a mutex; every statement runs on the blocking pool.
//! A commit is one SQL transaction, so a failed insert leaves no rows behind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction};

use sentiment_api::{
    NewSentimentRecord, PipelineError, RecordId, RecordQuery, RecordStore, SentimentRecord,
    SortOrder, StoreTransaction,
};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS sentiment (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    created   TEXT    NOT NULL,
    text      TEXT    NOT NULL,
    score     REAL    NOT NULL CHECK (score BETWEEN -1.0 AND 1.0),
    magnitude REAL    CHECK (magnitude IS NULL OR magnitude >= 0.0)
);
CREATE INDEX IF NOT EXISTS sentiment_created ON sentiment (created);
";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("sqlite: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("create directory '{}': {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("database schema v{found} is newer than this build supports")]
    SchemaTooNew { found: i32 },

    #[error("corrupt row {id}: {detail}")]
    Corrupt { id: i64, detail: String },

    #[error("connection mutex poisoned")]
    Poisoned,

    #[error("blocking task: {0}")]
    Join(String),
}

// ═══════════════════════════════════════════════════════════════
//  SqliteStore
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SqliteStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        migrate(&mut conn)?;
        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn migrate(conn: &mut Connection) -> Result<(), SqliteStoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(SqliteStoreError::SchemaTooNew { found: version });
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Run `task` against the connection on the blocking pool.
async fn run<T, F>(conn: Arc<Mutex<Connection>>, task: F) -> Result<T, SqliteStoreError>
where
    F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().map_err(|_| SqliteStoreError::Poisoned)?;
        task(&mut *guard)
    })
    .await
    .map_err(|e| SqliteStoreError::Join(e.to_string()))?
}

type RowValues = (i64, String, String, f64, Option<f64>);

fn row_values(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowValues> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record(
    (id, created, text, score, magnitude): RowValues,
) -> Result<SentimentRecord, SqliteStoreError> {
    let created_at = DateTime::parse_from_rfc3339(&created)
        .map_err(|e| SqliteStoreError::Corrupt {
            id,
            detail: format!("created '{created}': {e}"),
        })?
        .with_timezone(&Utc);
    Ok(SentimentRecord {
        id: RecordId::new(id.to_string()),
        created_at,
        text,
        score: score as f32,
        magnitude: magnitude.map(|m| m as f32),
    })
}

fn insert_row(
    tx: &Transaction<'_>,
    record: NewSentimentRecord,
) -> Result<SentimentRecord, SqliteStoreError> {
    tx.execute(
        "INSERT INTO sentiment (created, text, score, magnitude) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            record.text,
            f64::from(record.score.value()),
            record.score.magnitude().map(f64::from),
        ],
    )?;
    let id = RecordId::new(tx.last_insert_rowid().to_string());
    Ok(SentimentRecord::from_new(id, record))
}

impl RecordStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, PipelineError>> + Send + '_>>
    {
        let conn = self.conn.clone();
        Box::pin(async move {
            Ok(Box::new(SqliteTransaction {
                conn,
                staged: Vec::new(),
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn list(
        &self,
        query: &RecordQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send + '_>> {
        let query = query.clone();
        let conn = self.conn.clone();
        Box::pin(async move {
            run(conn, move |conn| {
                let direction = match query.order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                let sql = format!(
                    "SELECT id, created, text, score, magnitude FROM sentiment \
                     ORDER BY id {direction} LIMIT ?1"
                );
                // LIMIT -1 = no limit
                let limit = query
                    .limit
                    .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                    .unwrap_or(-1);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], row_values)?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(into_record(row?)?);
                }
                Ok(records)
            })
            .await
            .map_err(|e| PipelineError::store_read_failed(e.to_string()))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  SqliteTransaction
// ═══════════════════════════════════════════════════════════════

/// Staged inserts. The SQL transaction only exists inside `commit`, so
/// nothing holds the connection while the caller awaits other work.
struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
    staged: Vec<NewSentimentRecord>,
}

impl StoreTransaction for SqliteTransaction {
    fn insert(&mut self, record: NewSentimentRecord) -> Result<(), PipelineError> {
        self.staged.push(record);
        Ok(())
    }

    fn commit(
        self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send>> {
        let SqliteTransaction { conn, staged } = *self;
        Box::pin(async move {
            run(conn, move |conn| {
                // Dropping `tx` on any early return rolls back.
                let tx = conn.transaction()?;
                let mut committed = Vec::with_capacity(staged.len());
                for record in staged {
                    committed.push(insert_row(&tx, record)?);
                }
                tx.commit()?;
                Ok(committed)
            })
            .await
            .map_err(|e| PipelineError::store_write_failed(e.to_string()))
        })
    }

    fn rollback(
        self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>> {
        Box::pin(async { Ok(()) })
    }
}
