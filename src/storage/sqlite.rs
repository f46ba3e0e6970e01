use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::transcript::Segment;

use super::{SessionRecord, SessionStatus, StoreError, SummaryStatus};

/// SQLite-backed session store. A single connection serializes writers;
/// every operation runs on the blocking thread pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply schema
    /// and pragmas.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(&path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|err| StoreError::Background(err.to_string()))?
    }

    pub async fn create_session(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions(id, started_at, status, summary_status)
                 VALUES(?1, ?2, 'active', 'pending')",
                params![id, format_ts(started_at)],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn end_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        audio_path: &str,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let audio_path = audio_path.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET ended_at = ?1, status = 'ended', audio_path = ?2
                 WHERE id = ?3",
                params![format_ts(ended_at), audio_path, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn append_segment(
        &self,
        session_id: &str,
        seg: &Segment,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let seg = seg.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO segments(session_id, speaker, text, start_time, end_time, timestamp)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    seg.speaker,
                    seg.text.trim(),
                    seg.start_time,
                    seg.end_time,
                    format_ts(seg.timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_segments(&self, session_id: &str) -> Result<Vec<Segment>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT speaker, text, start_time, end_time, timestamp
                 FROM segments WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut segments = Vec::new();
            for row in rows {
                let (speaker, text, start_time, end_time, ts) = row?;
                segments.push(Segment {
                    speaker,
                    text,
                    start_time,
                    end_time,
                    timestamp: parse_ts(&ts)?,
                });
            }
            Ok(segments)
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionRecord, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, started_at, ended_at, status, summary, summary_status,
                            summary_preset, audio_path
                     FROM sessions WHERE id = ?1",
                    params![id],
                    scan_session,
                )
                .optional()?;
            match row {
                Some(raw) => raw.into_record(),
                None => Err(StoreError::NotFound),
            }
        })
        .await
    }

    /// Sessions whose `started_at` falls on the given UTC date
    /// (`YYYY-MM-DD`), most recent first.
    pub async fn get_sessions_by_date(
        &self,
        date: &str,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let date = date.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, ended_at, status, summary, summary_status,
                        summary_preset, audio_path
                 FROM sessions WHERE substr(started_at, 1, 10) = ?1
                 ORDER BY started_at DESC",
            )?;
            let rows = stmt.query_map(params![date], scan_session)?;
            let mut sessions = Vec::new();
            for raw in rows {
                sessions.push(raw?.into_record()?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Distinct UTC dates with at least one session, newest first.
    pub async fn get_dates(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT substr(started_at, 1, 10) AS date
                 FROM sessions ORDER BY date DESC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut dates = Vec::new();
            for date in rows {
                dates.push(date?);
            }
            Ok(dates)
        })
        .await
    }

    pub async fn update_summary(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let summary = summary.to_string();
        let preset = preset.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET summary = ?1, summary_status = ?2, summary_preset = ?3
                 WHERE id = ?4",
                params![summary, status.as_str(), preset, session_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Record a summary request in the idempotency ledger. Returns `true`
    /// when this (session, prompt-hash) pair was not claimed before.
    pub async fn claim_summary_request(
        &self,
        session_id: &str,
        prompt_hash: &str,
    ) -> Result<bool, StoreError> {
        let session_id = session_id.to_string();
        let prompt_hash = prompt_hash.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO summary_requests(session_id, prompt_hash, created_at)
                 VALUES(?1, ?2, ?3)",
                params![session_id, prompt_hash, format_ts(Utc::now())],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

/// Raw row before timestamp/status parsing, so that row mapping stays in
/// rusqlite's error type and conversion in ours.
struct RawSession {
    id: String,
    started_at: String,
    ended_at: Option<String>,
    status: String,
    summary: String,
    summary_status: String,
    summary_preset: String,
    audio_path: String,
}

impl RawSession {
    fn into_record(self) -> Result<SessionRecord, StoreError> {
        Ok(SessionRecord {
            started_at: parse_ts(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_ts).transpose()?,
            status: self.status.parse::<SessionStatus>()?,
            summary_status: self.summary_status.parse::<SummaryStatus>()?,
            id: self.id,
            summary: self.summary,
            summary_preset: self.summary_preset,
            audio_path: self.audio_path,
        })
    }
}

fn scan_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        status: row.get(3)?,
        summary: row.get(4)?,
        summary_status: row.get(5)?,
        summary_preset: row.get(6)?,
        audio_path: row.get(7)?,
    })
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            status TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            summary_status TEXT NOT NULL DEFAULT 'pending',
            summary_preset TEXT NOT NULL DEFAULT '',
            audio_path TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            speaker INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            timestamp TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS summary_requests (
            session_id TEXT NOT NULL,
            prompt_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(session_id, prompt_hash)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
        CREATE INDEX IF NOT EXISTS idx_segments_session_id ON segments(session_id, timestamp);",
    )?;

    Ok(())
}

#[async_trait::async_trait]
impl crate::session::Store for SqliteStore {
    async fn create_session(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Ok(SqliteStore::create_session(self, id, started_at).await?)
    }

    async fn end_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        audio_path: &str,
    ) -> anyhow::Result<()> {
        Ok(SqliteStore::end_session(self, id, ended_at, audio_path).await?)
    }

    async fn append_segment(&self, session_id: &str, seg: &Segment) -> anyhow::Result<()> {
        Ok(SqliteStore::append_segment(self, session_id, seg).await?)
    }

    async fn get_segments(&self, session_id: &str) -> anyhow::Result<Vec<Segment>> {
        Ok(SqliteStore::get_segments(self, session_id).await?)
    }

    async fn update_summary(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) -> anyhow::Result<()> {
        Ok(SqliteStore::update_summary(self, session_id, summary, status, preset).await?)
    }

    async fn claim_summary_request(
        &self,
        session_id: &str,
        prompt_hash: &str,
    ) -> anyhow::Result<bool> {
        Ok(SqliteStore::claim_summary_request(self, session_id, prompt_hash).await?)
    }
}
