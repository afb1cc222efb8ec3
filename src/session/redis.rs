use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::{eyre::Context, Report};
use redis::AsyncCommands;
use tracing::{debug, debug_span, trace, Instrument};
use uuid::Uuid;

use super::{Backend, SessionState};

/// Sessions expire after 30 days without being written
const SESSION_TTL_SECONDS: usize = 60 * 60 * 24 * 30;

/// Sessions stored as JSON strings under `session:<id>`
#[derive(Clone, Debug)]
pub struct RedisBackend {
    client: Arc<redis::Client>,
}

impl RedisBackend {
    /// Does not connect yet, connections are opened per request
    pub fn open(url: &str) -> Result<Self, Report> {
        let client = redis::Client::open(url).wrap_err("Parsing redis url")?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, Report> {
        self.client
            .get_async_connection()
            .await
            .wrap_err("Getting redis connection")
    }
}

fn key(session_id: Uuid) -> String {
    format!("session:{session_id}")
}

#[async_trait]
impl Backend for RedisBackend {
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionState>, Report> {
        async move {
            let mut connection = self.connection().await?;
            let json: Option<String> = connection
                .get(key(session_id))
                .await
                .wrap_err("Getting session")?;
            trace!(found = json.is_some());

            json.map(|json| {
                serde_json::from_str(&json).wrap_err("Deserializing session from Redis")
            })
            .transpose()
        }
        .instrument(debug_span!("Loading session", ?session_id))
        .await
    }

    async fn store(&self, session_id: Uuid, state: &SessionState) -> Result<(), Report> {
        async move {
            let json = serde_json::to_string(state).wrap_err("Serializing session")?;
            let mut connection = self.connection().await?;
            connection
                .set_ex::<_, _, ()>(key(session_id), json, SESSION_TTL_SECONDS)
                .await
                .wrap_err("Setting session")?;
            debug!("Session stored");
            Ok(())
        }
        .instrument(debug_span!("Storing session", ?session_id))
        .await
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), Report> {
        async move {
            let mut connection = self.connection().await?;
            connection
                .del::<_, ()>(key(session_id))
                .await
                .wrap_err("Deleting session")?;
            Ok(())
        }
        .instrument(debug_span!("Removing session", ?session_id))
        .await
    }
}
