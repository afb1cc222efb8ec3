use std::collections::HashMap;

use async_trait::async_trait;
use color_eyre::Report;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Backend, SessionState};

/// Keeps sessions in the process, they are lost on restart
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<Uuid, SessionState>>,
}

impl MemoryBackend {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is stored
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionState>, Report> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn store(&self, session_id: Uuid, state: &SessionState) -> Result<(), Report> {
        self.sessions
            .write()
            .await
            .insert(session_id, state.clone());
        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), Report> {
        self.sessions.write().await.remove(&session_id);
        Ok(())
    }
}
