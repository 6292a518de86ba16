use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::ParrotStore;
use crate::error::StoreError;
use crate::report::{Report, ReportDraft};
use crate::transcript::{
    recent_conversations, NewTranscriptEntry, RecentConversation, Role, TranscriptEntry,
};
use crate::util::now_ms;

const TARGET: &str = "sqlite_store";

/// Clock used to stamp inserted rows.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms()
    }
}

/// Storage location for the SQLite database.
#[derive(Debug, Clone)]
pub enum SqlitePath {
    File(PathBuf),
    Memory,
}

impl SqlitePath {
    fn to_manager(&self) -> SqliteConnectionManager {
        match self {
            SqlitePath::File(path) => {
                SqliteConnectionManager::file(path).with_flags(Self::open_flags())
            }
            SqlitePath::Memory => SqliteConnectionManager::memory().with_flags(Self::open_flags()),
        }
    }

    fn open_flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }

    fn as_path(&self) -> Option<&Path> {
        match self {
            SqlitePath::File(path) => Some(path.as_path()),
            SqlitePath::Memory => None,
        }
    }
}

/// Configuration required to bootstrap SQLite persistence.
#[derive(Clone)]
pub struct SqliteConfig {
    pub path: SqlitePath,
    pub pool_size: u32,
    pub busy_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl SqliteConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: SqlitePath::File(path.into()),
            pool_size: 8,
            busy_timeout: Duration::from_millis(250),
            clock: Arc::new(SystemClock),
        }
    }

    /// Every in-memory connection is its own database, so the pool holds one.
    pub fn memory() -> Self {
        Self {
            path: SqlitePath::Memory,
            pool_size: 1,
            busy_timeout: Duration::from_millis(250),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Local report/transcript store backed by a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    db_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Builds the connection pool and runs the migrations.
    pub fn bootstrap(config: SqliteConfig) -> Result<Self> {
        let busy_timeout = config.busy_timeout;
        let in_memory = matches!(config.path, SqlitePath::Memory);
        let manager = config
            .path
            .to_manager()
            .with_init(move |conn| Self::configure_connection(conn, busy_timeout, in_memory));

        let mut builder = Pool::builder().connection_timeout(Duration::from_secs(5));
        builder = if in_memory {
            // Recycling the only connection would drop the database with it.
            builder.max_size(1).idle_timeout(None).max_lifetime(None)
        } else {
            builder.max_size(config.pool_size.max(1))
        };
        let pool = builder
            .build(manager)
            .context("failed to create SQLite connection pool")?;

        {
            let mut conn = pool
                .get()
                .context("failed to acquire SQLite bootstrap connection")?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            db_path: config.path.as_path().map(Path::to_path_buf),
            clock: config.clock,
        })
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|err| anyhow!("failed to obtain SQLite connection: {err}"))
    }

    fn configure_connection(
        conn: &mut Connection,
        busy_timeout: Duration,
        in_memory: bool,
    ) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;
        if !in_memory {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Ok(())
    }

    fn run_migrations(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                project_name TEXT NOT NULL,
                window_from TEXT NOT NULL,
                window_to TEXT NOT NULL,
                generated_at_ms INTEGER NOT NULL,
                summary TEXT NOT NULL,
                raw TEXT NOT NULL DEFAULT '[]',
                source TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS reports_by_project
                ON reports(project_id, generated_at_ms);

            CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'agent', 'system')),
                text TEXT NOT NULL,
                ts INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS transcripts_by_conversation
                ON transcripts(conversation_id, ts);

            CREATE INDEX IF NOT EXISTS transcripts_by_project
                ON transcripts(project_id, ts);
            "#,
        )
        .context("failed to run SQLite migrations")?;
        Ok(())
    }

    pub fn insert_report(&self, draft: &ReportDraft) -> Result<Report> {
        let report = draft.clone().into_report(self.clock.now_ms());
        let raw = serde_json::to_string(&draft.raw).context("failed to serialize raw report")?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO reports (
                project_id, project_name, window_from, window_to,
                generated_at_ms, summary, raw, source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.project_id,
                report.project_name,
                report.from,
                report.to,
                report.generated_at,
                report.summary,
                raw,
                report.source,
            ],
        )
        .context("failed to insert report")?;
        debug!(target: TARGET, project_id = %report.project_id, "report stored");
        Ok(report)
    }

    pub fn load_latest_report(&self, project_id: &str) -> Result<Option<Report>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, project_name, window_from, window_to, generated_at_ms,
                summary, raw, source
            FROM reports WHERE project_id = ?1
            ORDER BY generated_at_ms DESC, id DESC LIMIT 1",
        )?;
        let report = stmt
            .query_row(params![project_id], |row| Self::read_report(row))
            .optional()?;
        Ok(report)
    }

    pub fn insert_transcript(&self, entry: &NewTranscriptEntry) -> Result<TranscriptEntry> {
        let entry = entry.clone().stamped(self.clock.now_ms());
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO transcripts (project_id, conversation_id, role, text, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.project_id,
                entry.conversation_id,
                entry.role.as_str(),
                entry.text,
                entry.ts,
            ],
        )
        .context("failed to insert transcript entry")?;
        Ok(entry)
    }

    pub fn load_transcript(&self, conversation_id: &str) -> Result<Vec<TranscriptEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, conversation_id, role, text, ts
            FROM transcripts WHERE conversation_id = ?1
            ORDER BY ts ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| Self::read_entry(row))?;
        let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Newest `limit` rows for a project, reduced to distinct conversations.
    pub fn load_recent_conversations(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentConversation>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, conversation_id, role, text, ts
            FROM transcripts WHERE project_id = ?1
            ORDER BY ts DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![project_id, limit as i64], |row| Self::read_entry(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recent_conversations(&rows, limit))
    }

    fn read_report(row: &Row) -> rusqlite::Result<Report> {
        let raw = row
            .get::<_, Option<String>>("raw")?
            .and_then(|json| serde_json::from_str::<JsonValue>(&json).ok())
            .unwrap_or_else(|| JsonValue::Array(Vec::new()));

        Ok(Report {
            project_id: row.get("project_id")?,
            project_name: row.get("project_name")?,
            from: row.get("window_from")?,
            to: row.get("window_to")?,
            generated_at: row.get("generated_at_ms")?,
            summary: row.get("summary")?,
            raw: Some(raw),
            source: row.get("source")?,
        })
    }

    fn read_entry(row: &Row) -> rusqlite::Result<TranscriptEntry> {
        let role: String = row.get("role")?;
        let role = role.parse::<Role>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;

        Ok(TranscriptEntry {
            project_id: row.get("project_id")?,
            conversation_id: row.get("conversation_id")?,
            role,
            text: row.get("text")?,
            ts: row.get("ts")?,
        })
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(SqliteStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || operation(store))
            .await
            .map_err(|err| StoreError::Database(anyhow!("SQLite task failed: {err}")))?
            .map_err(StoreError::Database)
    }
}

#[async_trait]
impl ParrotStore for SqliteStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn store_report(&self, draft: &ReportDraft) -> Result<(), StoreError> {
        let draft = draft.clone();
        self.blocking(move |store| store.insert_report(&draft).map(|_| ()))
            .await
    }

    async fn latest_report(&self, project_id: &str) -> Result<Option<Report>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_latest_report(&project_id))
            .await
    }

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.blocking(move |store| store.insert_transcript(&entry).map(|_| ()))
            .await
    }

    async fn list_transcript(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.blocking(move |store| store.load_transcript(&conversation_id))
            .await
    }

    async fn recent_conversations(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentConversation>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_recent_conversations(&project_id, limit))
            .await
    }
}

#[cfg(test)]
impl SqliteStore {
    pub fn run_migrations_for_tests(conn: &mut Connection) -> Result<()> {
        Self::run_migrations(conn)
    }
}
