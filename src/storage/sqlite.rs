//! SQLite Conversation Log
//!
//! Information Hiding:
//! - Table layout and SQL hidden behind `HistoryStore`
//! - The single connection is serialized through a mutex and driven from
//!   tokio's blocking pool, so callers stay async
//! - Row ids give a strict per-database insertion order; `created_time` is
//!   kept for compatibility with existing readers of the `chats` table

use super::HistoryStore;
use crate::history::{ConversationKey, Role, StoreError, Turn};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    role TEXT NOT NULL,
    message TEXT NOT NULL,
    created_time TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_chats_conversation ON chats (user_id, chat_id, id);
";

/// Durable history backed by one SQLite connection
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Task(format!("create {:?}: {}", parent, e)))?;
            }
            Connection::open(path)?
        };
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::info!("[SqliteHistoryStore] Schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append_turn(&self, key: &ConversationKey, turn: &Turn) -> Result<(), StoreError> {
        let user_id = key.user_id().to_string();
        let chat_id = key.chat_id().to_string();
        let role = turn.role;
        let content = turn.content.clone();

        let row_id = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO chats (user_id, chat_id, message, role) VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, chat_id, content, role],
                )?;
                let row_id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(row_id)
            })
            .await?;

        tracing::debug!(
            conversation = %key,
            role = %turn.role,
            row_id,
            "[SqliteHistoryStore] Appended turn"
        );
        Ok(())
    }

    async fn read_recent_turns(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let user_id = key.user_id().to_string();
        let chat_id = key.chat_id().to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut turns = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT role, message FROM chats
                     WHERE user_id = ?1 AND chat_id = ?2
                     ORDER BY id DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![user_id, chat_id, limit], |row| {
                    Ok(Turn {
                        role: row.get::<_, Role>(0)?,
                        content: row.get(1)?,
                    })
                })?;
                let turns = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(turns)
            })
            .await?;

        // Newest-first from the query; callers get oldest-first
        turns.reverse();

        tracing::debug!(
            conversation = %key,
            loaded = turns.len(),
            "[SqliteHistoryStore] Loaded recent turns"
        );
        Ok(turns)
    }
}
