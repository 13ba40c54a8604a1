//! Application state shared across all request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_rusqlite::Connection;

use crate::common::config::ServerConfig;
use crate::common::errors::ChatLogResult;
use crate::common::identity::UserRole;
use crate::storage::{
    Authenticator, ChatLogRecord, ChatLogStore, SqliteChatLogStore, SqliteUserStore, UserAccount,
    UserDirectory,
};

use super::routes::ChatLogResponse;

/// Id of the account provisioned from `bootstrap_admin_key`.
pub const BOOTSTRAP_ADMIN_ID: &str = "admin";

/// Shared application state.
pub struct AppState {
    /// Chat log persistence.
    pub chat_logs: Arc<dyn ChatLogStore>,
    /// Credential resolution.
    pub auth: Arc<dyn Authenticator>,
    /// Display-name lookup.
    pub users: Arc<dyn UserDirectory>,
    /// Service configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Open the configured database and build the state.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn new(config: ServerConfig) -> ChatLogResult<Arc<Self>> {
        tracing::info!(path = %config.storage.sqlite_path.display(), "opening chat log database");
        let conn = Arc::new(Connection::open(&config.storage.sqlite_path).await?);

        let chat_logs =
            SqliteChatLogStore::new(Arc::clone(&conn), config.storage.chat_log_table.clone())
                .await?;
        let users = Arc::new(SqliteUserStore::new(conn, config.storage.user_table.clone()).await?);

        if let Some(key) = &config.bootstrap_admin_key {
            users
                .upsert_user(
                    UserAccount::new(BOOTSTRAP_ADMIN_ID, "Administrator", UserRole::Admin)
                        .with_api_key(key.clone()),
                )
                .await?;
            tracing::info!(user_id = BOOTSTRAP_ADMIN_ID, "provisioned bootstrap admin account");
        }

        Ok(Self::from_parts(
            Arc::new(chat_logs),
            users.clone(),
            users,
            config,
        ))
    }

    /// Assemble state from already constructed collaborators.
    #[must_use]
    pub fn from_parts(
        chat_logs: Arc<dyn ChatLogStore>,
        auth: Arc<dyn Authenticator>,
        users: Arc<dyn UserDirectory>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chat_logs,
            auth,
            users,
            config,
        })
    }

    /// Resolve owners to display names. A failing directory degrades to the
    /// placeholder name instead of failing the request.
    async fn display_names(&self, logs: &[ChatLogRecord]) -> HashMap<String, String> {
        let ids = logs.iter().map(|log| log.user_id.clone()).collect();
        match self.users.display_names(ids).await {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "user directory lookup failed");
                HashMap::new()
            }
        }
    }

    fn respond(&self, log: ChatLogRecord, names: &HashMap<String, String>) -> ChatLogResponse {
        let user_name = names
            .get(&log.user_id)
            .cloned()
            .unwrap_or_else(|| self.config.unknown_user_name.clone());
        ChatLogResponse::new(log, user_name)
    }

    /// Convert records to responses carrying the owner's display name.
    pub async fn render(&self, logs: Vec<ChatLogRecord>) -> Vec<ChatLogResponse> {
        let names = self.display_names(&logs).await;
        logs.into_iter()
            .map(|log| self.respond(log, &names))
            .collect()
    }

    /// Render a single record.
    pub async fn render_one(&self, log: ChatLogRecord) -> ChatLogResponse {
        let names = self.display_names(std::slice::from_ref(&log)).await;
        self.respond(log, &names)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::storage::ChatLogEntry;

    fn memory_config(bootstrap_admin_key: Option<&str>) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.storage.sqlite_path = PathBuf::from(":memory:");
        config.bootstrap_admin_key = bootstrap_admin_key.map(str::to_string);
        config
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_provisioned() {
        let state = AppState::new(memory_config(Some("boot-key"))).await.unwrap();

        let admin = state.auth.authenticate("boot-key").await.unwrap().unwrap();
        assert_eq!(admin.id, BOOTSTRAP_ADMIN_ID);
        assert!(admin.is_admin());
        assert!(state.auth.authenticate("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_without_bootstrap_key_no_account_exists() {
        let state = AppState::new(memory_config(None)).await.unwrap();
        assert!(state.auth.authenticate("").await.unwrap().is_none());

        let names = state
            .users
            .display_names(vec![BOOTSTRAP_ADMIN_ID.to_string()])
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_render_uses_names_and_placeholder() {
        let state = AppState::new(memory_config(Some("boot-key"))).await.unwrap();
        let owned = state
            .chat_logs
            .create(ChatLogEntry::new("c1", BOOTSTRAP_ADMIN_ID, "llama3"))
            .await
            .unwrap();
        let orphan = state
            .chat_logs
            .create(ChatLogEntry::new("c2", "ghost", "llama3"))
            .await
            .unwrap();

        let rendered = state.render(vec![owned, orphan]).await;
        assert_eq!(rendered[0].user_name, "Administrator");
        assert_eq!(rendered[1].user_name, state.config.unknown_user_name);
    }
}
