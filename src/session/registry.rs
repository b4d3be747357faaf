//! Live sessions keyed by browser cookie

use super::Session;
use crate::gateway::GatewayBuilder;
use crate::secrets::{ConfigError, Credential};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Shared handle on one session. Holding the lock means owning the
/// submit/reply cycle.
pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    session: SessionHandle,
    last_seen: Instant,
}

/// All sessions served by this process
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
    credential: Result<Credential, ConfigError>,
    builder: Arc<dyn GatewayBuilder>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        credential: Result<Credential, ConfigError>,
        builder: Arc<dyn GatewayBuilder>,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            credential,
            builder,
            idle_ttl,
        }
    }

    /// Look up the caller's session, starting a new one when the id is
    /// unknown or absent. Returns the id the caller should keep.
    pub async fn get_or_create(
        &self,
        id: Option<&str>,
    ) -> Result<(String, SessionHandle), ConfigError> {
        let mut sessions = self.sessions.write().await;

        if let Some(id) = id {
            if let Some(entry) = sessions.get_mut(id) {
                entry.last_seen = Instant::now();
                return Ok((id.to_string(), entry.session.clone()));
            }
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::initialize(&session_id, &self.credential, self.builder.as_ref())?;
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(
            session_id.clone(),
            Entry {
                session: handle.clone(),
                last_seen: Instant::now(),
            },
        );
        tracing::info!(session = %session_id, live = sessions.len(), "Session started");

        Ok((session_id, handle))
    }

    /// Remove and end a session. Waits for an in-flight reply to settle.
    pub async fn end(&self, id: &str) -> bool {
        let entry = self.sessions.write().await.remove(id);
        match entry {
            Some(entry) => {
                entry.session.lock().await.end().await;
                true
            }
            None => false,
        }
    }

    /// End sessions idle longer than the TTL. Sessions with a reply in
    /// flight are left alone.
    pub async fn expire_idle(&self) -> usize {
        let expired: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| {
                    entry.last_seen.elapsed() >= self.idle_ttl && entry.session.try_lock().is_ok()
                })
                .map(|(id, _)| id.clone())
                .collect();

            stale
                .iter()
                .filter_map(|id| sessions.remove(id))
                .map(|entry| entry.session)
                .collect()
        };

        for session in &expired {
            session.lock().await.end().await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired idle sessions");
        }
        expired.len()
    }

    /// End every session, releasing remote files
    pub async fn shutdown(&self) {
        let drained: Vec<Entry> = self.sessions.write().await.drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.session.lock().await.end().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
