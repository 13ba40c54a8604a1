//! User accounts backing authentication and display-name lookup.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use tokio_rusqlite::Connection;

use crate::common::clock::{Clock, SystemClock};
use crate::common::errors::{ChatLogError, ChatLogResult};
use crate::common::identity::{AuthUser, UserRole};
use crate::storage::chat_log_store::StoreFuture;

/// Resolves a bearer credential to a caller.
pub trait Authenticator: Send + Sync {
    /// Look up the account owning `api_key`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn authenticate(&self, api_key: &str) -> StoreFuture<'_, ChatLogResult<Option<AuthUser>>>;
}

/// Resolves user ids to display names.
pub trait UserDirectory: Send + Sync {
    /// Map each known id to its display name. Unknown ids are absent from the result.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn display_names(
        &self,
        user_ids: Vec<String>,
    ) -> StoreFuture<'_, ChatLogResult<HashMap<String, String>>>;
}

/// Ids bound per `IN (...)` query, below `SQLite`'s host parameter limit.
const NAME_LOOKUP_BATCH: usize = 500;

/// Hex-encoded SHA-256 digest of an API key. Only digests are stored.
#[must_use]
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// An account as provisioned in the user table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAccount {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role.
    pub role: UserRole,
    /// Bearer credential, if the account can sign in.
    pub api_key: Option<String>,
}

impl UserAccount {
    /// Build an account without a credential.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            api_key: None,
        }
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// `SQLite` implementation of the user directory and authenticator.
pub struct SqliteUserStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteUserStore {
    /// Default table name.
    pub const DEFAULT_TABLE: &'static str = "users";

    /// Initialize the user store, creating the table if needed.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, table: impl Into<String>) -> ChatLogResult<Self> {
        let table = table.into();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL,
                    api_key_hash TEXT UNIQUE,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    /// Save or update an account, keeping its original `created_at`.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the API key belongs to another account.
    pub async fn upsert_user(&self, account: UserAccount) -> ChatLogResult<()> {
        let table = self.table.clone();
        let now = SystemClock.now();
        let UserAccount {
            id,
            name,
            role,
            api_key,
        } = account;
        let role = role.as_str();
        let api_key_hash = api_key.as_deref().map(hash_api_key);

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (id, name, role, api_key_hash, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                         ON CONFLICT(id) DO UPDATE SET
                            name = excluded.name,
                            role = excluded.role,
                            api_key_hash = excluded.api_key_hash,
                            updated_at = excluded.updated_at"
                    ),
                    rusqlite::params![id, name, role, api_key_hash, now],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

impl Authenticator for SqliteUserStore {
    fn authenticate(&self, api_key: &str) -> StoreFuture<'_, ChatLogResult<Option<AuthUser>>> {
        let api_key_hash = hash_api_key(api_key);
        Box::pin(async move {
            let table = self.table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT id, name, role FROM {table} WHERE api_key_hash = ?1"),
                            rusqlite::params![api_key_hash],
                            |row| {
                                let id: String = row.get(0)?;
                                let name: String = row.get(1)?;
                                let role: String = row.get(2)?;
                                Ok((id, name, role))
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            match row {
                Some((id, name, role)) => {
                    let role = role.parse::<UserRole>().map_err(|err| {
                        ChatLogError::InvalidRecord(format!("user {id}: {err}"))
                    })?;
                    Ok(Some(AuthUser { id, name, role }))
                }
                None => Ok(None),
            }
        })
    }
}

impl UserDirectory for SqliteUserStore {
    fn display_names(
        &self,
        user_ids: Vec<String>,
    ) -> StoreFuture<'_, ChatLogResult<HashMap<String, String>>> {
        Box::pin(async move {
            let ids: Vec<String> = user_ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
            if ids.is_empty() {
                return Ok(HashMap::new());
            }

            let table = self.table.clone();
            let names = self
                .conn
                .call(move |conn| {
                    let mut names = HashMap::with_capacity(ids.len());
                    for batch in ids.chunks(NAME_LOOKUP_BATCH) {
                        let placeholders = vec!["?"; batch.len()].join(", ");
                        let mut stmt = conn.prepare_cached(&format!(
                            "SELECT id, name FROM {table} WHERE id IN ({placeholders})"
                        ))?;
                        let rows = stmt.query_map(rusqlite::params_from_iter(batch), |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })?;
                        for row in rows {
                            let (id, name) = row?;
                            names.insert(id, name);
                        }
                    }
                    Ok(names)
                })
                .await?;

            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteUserStore {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        SqliteUserStore::new(conn, SqliteUserStore::DEFAULT_TABLE)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_by_api_key() {
        let users = store().await;
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::User).with_api_key("key-1"))
            .await
            .unwrap();

        let user = users.authenticate("key-1").await.unwrap().unwrap();
        assert_eq!(user, AuthUser::new("u1", "Alice", UserRole::User));
        assert!(users.authenticate("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_role_and_key() {
        let users = store().await;
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::Pending).with_api_key("old"))
            .await
            .unwrap();
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::Admin).with_api_key("new"))
            .await
            .unwrap();

        assert!(users.authenticate("old").await.unwrap().is_none());
        let user = users.authenticate("new").await.unwrap().unwrap();
        assert!(user.is_admin());
    }

    #[tokio::test]
    async fn test_api_keys_are_stored_as_digests() {
        let users = store().await;
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::User).with_api_key("key-1"))
            .await
            .unwrap();

        let stored: Option<String> = users
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT api_key_hash FROM users WHERE id = 'u1'", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        let stored = stored.unwrap();
        assert_ne!(stored, "key-1");
        assert_eq!(stored, hash_api_key("key-1"));
        assert_eq!(stored.len(), 64);
    }

    #[tokio::test]
    async fn test_display_names_handles_large_id_sets() {
        let users = store().await;
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::User))
            .await
            .unwrap();

        let mut ids: Vec<String> = (0..NAME_LOOKUP_BATCH * 3).map(|i| format!("ghost-{i}")).collect();
        ids.push("u1".to_string());
        let names = users.display_names(ids).await.unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names["u1"], "Alice");
    }

    #[tokio::test]
    async fn test_display_names_skips_unknown_ids() {
        let users = store().await;
        users
            .upsert_user(UserAccount::new("u1", "Alice", UserRole::User))
            .await
            .unwrap();
        users
            .upsert_user(UserAccount::new("u2", "Bob", UserRole::User))
            .await
            .unwrap();

        let names = users
            .display_names(vec!["u1".into(), "u1".into(), "ghost".into(), "u2".into()])
            .await
            .unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names["u1"], "Alice");
        assert_eq!(names["u2"], "Bob");
        assert!(users.display_names(Vec::new()).await.unwrap().is_empty());
    }
}
