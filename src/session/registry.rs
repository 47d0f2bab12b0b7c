//! Logged-in sessions keyed by user id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::heartbeat::HeartRateSource;
use super::{Pair, Session, SessionSettings};
use crate::errors::AppError;
use crate::gateway::RemoteSyncGateway;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Serializes login and logout per user so their status writes never interleave.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    gateway: Arc<dyn RemoteSyncGateway>,
    settings: Arc<SessionSettings>,
    source: Arc<dyn HeartRateSource>,
}

impl SessionRegistry {
    pub fn new(
        gateway: Arc<dyn RemoteSyncGateway>,
        settings: SessionSettings,
        source: Arc<dyn HeartRateSource>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_locks: Mutex::new(HashMap::new()),
            gateway,
            settings: Arc::new(settings),
            source,
        }
    }

    /// Start a session, replacing any session the user already had.
    pub async fn login(
        &self,
        user_id: &str,
        partner_id: Option<&str>,
    ) -> Result<Arc<Session>, AppError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        let partner_id = partner_id.map(str::trim).filter(|p| !p.is_empty());
        if partner_id == Some(user_id) {
            return Err(AppError::Validation(
                "A user cannot be their own partner".to_string(),
            ));
        }

        let user_lock = self.user_lock(user_id).await;
        let _guard = user_lock.lock().await;

        let previous = self.sessions.write().await.remove(user_id);
        if let Some(previous) = previous {
            info!(user_id, "Replacing existing session");
            previous.logout().await;
        }

        let session = Session::login(
            Pair {
                user_id: user_id.to_string(),
                partner_id: partner_id.map(str::to_string),
            },
            self.gateway.clone(),
            self.settings.clone(),
            self.source.clone(),
        )
        .await;

        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn get(&self, user_id: &str) -> Result<Arc<Session>, AppError> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No session for {}", user_id)))
    }

    pub async fn logout(&self, user_id: &str) -> Result<(), AppError> {
        let user_lock = self.user_lock(user_id).await;
        let _guard = user_lock.lock().await;

        let session = self
            .sessions
            .write()
            .await
            .remove(user_id)
            .ok_or_else(|| AppError::NotFound(format!("No session for {}", user_id)))?;
        session.logout().await;
        Ok(())
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Log every session out.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        let count = sessions.len();
        for (_, session) in sessions {
            session.logout().await;
        }
        info!(count, "All sessions closed");
    }
}
