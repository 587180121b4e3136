//! SQLite persistence for the radio queue.
//!
//! Enabled by `AIRADIO_DB_PATH`. The queue is rewritten in one transaction on
//! every change, so a restart resumes the same station (advanced to the new
//! wall-clock time). rusqlite is synchronous; every call goes through
//! `spawn_blocking`.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use crate::scheduler::RadioState;
use crate::track::{Locator, QueueEntry, TrackCandidate, TrackSource};

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS radio_queue (
            id            TEXT PRIMARY KEY,
            position      INTEGER NOT NULL,
            source        TEXT NOT NULL,
            locator_kind  TEXT NOT NULL,
            locator       TEXT NOT NULL,
            href          TEXT NOT NULL,
            display_name  TEXT NOT NULL,
            author        TEXT NOT NULL,
            title         TEXT NOT NULL,
            caption       TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            task_id       TEXT NOT NULL,
            duration      REAL NOT NULL,
            queued_at     REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_radio_queue_position ON radio_queue(position);

        CREATE TABLE IF NOT EXISTS radio_meta (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Queue rows in play order, plus the stored start time of the front entry.
fn db_load_queue(conn: &Connection) -> anyhow::Result<(Vec<QueueEntry>, Option<f64>)> {
    db_init(conn)?;

    let started_at: Option<String> = conn
        .query_row("SELECT value FROM radio_meta WHERE key = 'started_at'", [], |row| row.get(0))
        .optional()?;
    let started_at = started_at.and_then(|s| s.parse::<f64>().ok());

    let mut stmt = conn.prepare(
        "SELECT id, source, locator_kind, locator, href, display_name, author, title, caption,
                created_at, task_id, duration, queued_at
         FROM radio_queue ORDER BY position ASC",
    )?;
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id_str: String = row.get(0)?;
        let id = Uuid::parse_str(&id_str).map_err(|e| anyhow::anyhow!("invalid UUID in DB (id={id_str}): {e}"))?;

        let source_str: String = row.get(1)?;
        let Some(source) = TrackSource::parse(&source_str) else {
            warn!("skipping queue row {id}: unknown source {source_str:?}");
            continue;
        };

        let kind: String = row.get(2)?;
        let value: String = row.get(3)?;
        let locator = match kind.as_str() {
            "path" => Locator::Path(PathBuf::from(value)),
            "url" => Locator::Url(value),
            other => {
                warn!("skipping queue row {id}: unknown locator kind {other:?}");
                continue;
            }
        };

        let mut track = TrackCandidate::new(source, locator, row.get(11)?);
        track.href = row.get(4)?;
        track.display_name = row.get(5)?;
        track.author = row.get(6)?;
        track.title = row.get(7)?;
        track.caption = row.get(8)?;
        track.created_at = row.get(9)?;
        track.task_id = row.get(10)?;

        out.push(QueueEntry { id, track, queued_at: row.get(12)? });
    }

    Ok((out, started_at))
}

fn db_save_queue(conn: &mut Connection, state: &RadioState) -> anyhow::Result<()> {
    db_init(conn)?;

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM radio_queue", [])?;

    for (position, e) in state.queue().iter().enumerate() {
        let t = &e.track;
        tx.execute(
            "INSERT INTO radio_queue (id, position, source, locator_kind, locator, href, display_name,
                                      author, title, caption, created_at, task_id, duration, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                e.id.to_string(),
                position as i64,
                t.source.as_str(),
                t.locator.kind(),
                t.locator.value(),
                t.href,
                t.display_name,
                t.author,
                t.title,
                t.caption,
                t.created_at,
                t.task_id,
                t.duration_seconds,
                e.queued_at
            ],
        )?;
    }

    match state.started_at() {
        Some(t) => {
            tx.execute(
                "INSERT INTO radio_meta (key, value) VALUES ('started_at', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![t.to_string()],
            )?;
        }
        None => {
            tx.execute("DELETE FROM radio_meta WHERE key = 'started_at'", [])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Handle on the queue database.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self, now: f64) -> anyhow::Result<RadioState> {
        let path = self.path.clone();
        let (entries, started_at) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = Connection::open(path)?;
            db_load_queue(&conn)
        })
        .await??;
        Ok(RadioState::restore(entries, started_at, now))
    }

    /// Restored state, or an empty station if the database can't be read.
    pub async fn load_or_empty(&self, now: f64) -> RadioState {
        match self.load(now).await {
            Ok(state) => {
                info!("restored {} queued track(s) from {}", state.len(), self.path.display());
                state
            }
            Err(e) => {
                warn!("failed to load queue from {}: {e}", self.path.display());
                RadioState::new()
            }
        }
    }

    pub async fn save(&self, state: RadioState) -> anyhow::Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = Connection::open(path)?;
            db_save_queue(&mut conn, &state)
        })
        .await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, source: TrackSource, locator: Locator) -> QueueEntry {
        let mut t = TrackCandidate::new(source, locator, 123.5);
        t.display_name = name.into();
        t.author = "someone".into();
        t.href = format!("/api_audio/{name}");
        QueueEntry::new(t, 1_700_000_000.25)
    }

    #[tokio::test]
    async fn save_then_load_keeps_order_and_start() {
        let tmp = tempfile::tempdir().unwrap();
        let store = QueueStore::new(tmp.path().join("radio.db"));

        let mut st = RadioState::new();
        st.push(entry("a.mp3", TrackSource::Generated, Locator::Path("/x/a.mp3".into())), 500.0);
        st.push(entry("b.mp3", TrackSource::RemoteMirror, Locator::Url("https://h/b.mp3".into())), 501.0);
        store.save(st.clone()).await.unwrap();

        let back = store.load(510.0).await.unwrap();
        assert_eq!(back, st);
        assert_eq!(back.started_at(), Some(500.0));
    }

    #[tokio::test]
    async fn empty_save_clears_start() {
        let tmp = tempfile::tempdir().unwrap();
        let store = QueueStore::new(tmp.path().join("radio.db"));

        let mut st = RadioState::new();
        st.push(entry("a.mp3", TrackSource::Archive, Locator::Path("/x/a.mp3".into())), 5.0);
        store.save(st).await.unwrap();
        store.save(RadioState::new()).await.unwrap();

        let back = store.load(9.0).await.unwrap();
        assert!(back.is_empty());
        assert_eq!(back.started_at(), None);
    }

    #[tokio::test]
    async fn unreadable_db_falls_back_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not-a-db");
        std::fs::write(&path, b"definitely not sqlite, just some bytes that are long enough").unwrap();
        let store = QueueStore::new(path);
        assert!(store.load_or_empty(1.0).await.is_empty());
    }
}
