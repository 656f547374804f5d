//! In-memory registry of upload sessions.
//!
//! Each session owns a private DuckDB connection with exactly one table. The
//! registry is the only owner; callers borrow an `Arc<Session>` for the span
//! of one request. Sessions idle longer than the TTL are unusable at once
//! (checked lazily in [`SessionStore::get`]) and are dropped by the background
//! sweeper within one sweep interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ingest::schema::TableSchema;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Session not found or expired")]
    NotFound,
}

pub struct Session {
    pub id: String,
    pub schema: TableSchema,
    pub row_count: usize,
    /// First rows of the table as JSON, used for prompts and session info
    pub head_rows: Vec<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    last_access: Mutex<Instant>,
    turn: tokio::sync::Mutex<()>,
    conn: Arc<Mutex<Connection>>,
}

impl Session {
    pub fn table_name(&self) -> &str {
        &self.schema.name
    }

    /// Shared handle to the session's connection. Lock it only on a blocking thread.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Waits for earlier turns on this session to finish. The guard serializes chat turns.
    pub async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.idle_for() > ttl
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("table", &self.schema.name)
            .field("row_count", &self.row_count)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Store without a background sweeper; expiry is then only lazy or via [`sweep`](Self::sweep).
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            sweeper: Mutex::new(None),
        }
    }

    /// Creates the store and spawns the periodic sweeper on the current tokio runtime.
    pub fn start(ttl: Duration, sweep_interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new(ttl));
        let weak: Weak<Self> = Arc::downgrade(&store);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(store) => {
                        store.sweep();
                    }
                    None => break,
                }
            }
        });

        *store.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(
            "Session store started (ttl {}s, sweep every {}s)",
            ttl.as_secs(),
            sweep_interval.as_secs()
        );
        store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a freshly loaded table under a new session id.
    pub fn create(
        &self,
        conn: Connection,
        schema: TableSchema,
        row_count: usize,
        head_rows: Vec<Map<String, Value>>,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            id: Uuid::new_v4().simple().to_string(),
            schema,
            row_count,
            head_rows,
            created_at: Utc::now(),
            last_access: Mutex::new(Instant::now()),
            turn: tokio::sync::Mutex::new(()),
            conn: Arc::new(Mutex::new(conn)),
        });

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), Arc::clone(&session));
        info!(
            "Created session {} ({} rows, {} columns)",
            session.id,
            row_count,
            session.schema.columns.len()
        );
        session
    }

    /// Looks up a live session. Does not reset its TTL.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, StoreError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        if session.is_expired(self.ttl) {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            // Re-check under the write lock: a concurrent touch may have revived it
            if sessions.get(id).is_some_and(|s| s.is_expired(self.ttl)) {
                sessions.remove(id);
                info!("Session {} expired", id);
            }
            return Err(StoreError::NotFound);
        }
        Ok(session)
    }

    /// Resets the idle clock of a session.
    pub fn touch(&self, id: &str) -> Result<(), StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get(id).ok_or(StoreError::NotFound)?;
        session.touch();
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            info!("Deleted session {}", id);
        }
        removed
    }

    /// Drops every session idle longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.is_expired(self.ttl))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        // Connections close here, outside the map lock
        let count = expired.len();
        drop(expired);
        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        } else {
            debug!("Session sweep found nothing to remove");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the sweeper and drops every session.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        info!("Session store shut down, released {} sessions", drained.len());
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
