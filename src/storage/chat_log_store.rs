//! Chat log store keyed by conversation id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::{ErrorCode, OptionalExtension};
use tokio_rusqlite::Connection;

use crate::common::clock::{Clock, SystemClock};
use crate::common::errors::{ChatLogError, ChatLogResult};
use crate::storage::record::{ChatLogEntry, ChatLogRecord, PageQuery};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const COLUMNS: &str = "conversation_id, user_id, model, messages, response, created_at, updated_at";

/// Chat log store trait.
///
/// Every method is one statement or one transaction. Absence is reported as
/// `None`, `false` or `0`; `Err` always means the storage call itself failed.
pub trait ChatLogStore: Send + Sync {
    /// Insert a new record with `created_at == updated_at == now`.
    ///
    /// # Errors
    /// Returns `DuplicateKey` if the conversation id exists, `InvalidRecord`
    /// for blank identifiers, or a storage error.
    fn create(&self, entry: ChatLogEntry) -> StoreFuture<'_, ChatLogResult<ChatLogRecord>>;

    /// Fetch one record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> StoreFuture<'_, ChatLogResult<Option<ChatLogRecord>>>;

    /// List a user's records, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_user_id(
        &self,
        user_id: &str,
        query: PageQuery,
    ) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>>;

    /// List a conversation's records, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_conversation_id(
        &self,
        conversation_id: &str,
        query: PageQuery,
    ) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>>;

    /// List every record, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_all(&self, query: PageQuery) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>>;

    /// Overwrite the mutable fields of an existing record.
    ///
    /// Returns `None` without creating anything when the conversation is absent.
    ///
    /// # Errors
    /// Returns `InvalidRecord` for blank identifiers or a storage error.
    fn update(&self, entry: ChatLogEntry) -> StoreFuture<'_, ChatLogResult<Option<ChatLogRecord>>>;

    /// Delete one record, returning whether it existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_by_conversation_id(&self, conversation_id: &str)
    -> StoreFuture<'_, ChatLogResult<bool>>;

    /// Delete all of a user's records, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_by_user_id(&self, user_id: &str) -> StoreFuture<'_, ChatLogResult<usize>>;

    /// Delete every record, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_all(&self) -> StoreFuture<'_, ChatLogResult<usize>>;

    /// Count every record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count_all(&self) -> StoreFuture<'_, ChatLogResult<u64>>;
}

/// Raw row before the message JSON is decoded.
struct StoredRow {
    conversation_id: String,
    user_id: String,
    model: String,
    messages: String,
    response: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            conversation_id: row.get(0)?,
            user_id: row.get(1)?,
            model: row.get(2)?,
            messages: row.get(3)?,
            response: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_record(self) -> ChatLogResult<ChatLogRecord> {
        Ok(ChatLogRecord {
            messages: serde_json::from_str(&self.messages)?,
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            model: self.model,
            response: self.response,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn decode_rows(rows: Vec<StoredRow>) -> ChatLogResult<Vec<ChatLogRecord>> {
    rows.into_iter().map(StoredRow::into_record).collect()
}

/// `SQLite` implementation of the chat log store.
pub struct SqliteChatLogStore {
    conn: Arc<Connection>,
    table: String,
    clock: Arc<dyn Clock>,
}

impl SqliteChatLogStore {
    /// Default table name.
    pub const DEFAULT_TABLE: &'static str = "chat_log";

    /// Initialize the store on an existing connection, creating the table if needed.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, table: impl Into<String>) -> ChatLogResult<Self> {
        let table = table.into();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    conversation_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    model TEXT NOT NULL,
                    messages TEXT NOT NULL,
                    response TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {table_name}_user_id_idx
                    ON {table_name} (user_id);
                CREATE INDEX IF NOT EXISTS {table_name}_created_at_idx
                    ON {table_name} (created_at);
                CREATE INDEX IF NOT EXISTS {table_name}_updated_at_idx
                    ON {table_name} (updated_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            table,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the timestamp source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run a filtered, ordered, paginated select.
    ///
    /// `filter` is a `WHERE` fragment binding `?1`; `?2` is the optional model,
    /// `?3`/`?4` are limit/offset.
    async fn select_page(
        &self,
        filter: &'static str,
        key: Option<String>,
        order: &'static str,
        query: PageQuery,
    ) -> ChatLogResult<Vec<ChatLogRecord>> {
        let table = self.table.clone();
        let limit = i64::from(query.limit);
        let offset = i64::from(query.skip);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS}
                     FROM {table}
                     WHERE {filter} AND (?2 IS NULL OR model = ?2)
                     ORDER BY {order}
                     LIMIT ?3 OFFSET ?4"
                ))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![key, query.model, limit, offset],
                        StoredRow::from_row,
                    )?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        decode_rows(rows)
    }
}

impl ChatLogStore for SqliteChatLogStore {
    fn create(&self, entry: ChatLogEntry) -> StoreFuture<'_, ChatLogResult<ChatLogRecord>> {
        Box::pin(async move {
            entry.validate()?;
            let table = self.table.clone();
            let messages = serde_json::to_string(&entry.messages)?;
            let record = entry.into_record(self.clock.now());

            let conversation_id = record.conversation_id.clone();
            let user_id = record.user_id.clone();
            let model = record.model.clone();
            let response = record.response.clone();
            let now = record.created_at;

            let inserted = self
                .conn
                .call(move |conn| {
                    let result = conn.execute(
                        &format!(
                            "INSERT INTO {table} ({COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)"
                        ),
                        rusqlite::params![conversation_id, user_id, model, messages, response, now],
                    );
                    match result {
                        Ok(_) => Ok(true),
                        Err(rusqlite::Error::SqliteFailure(err, _))
                            if err.code == ErrorCode::ConstraintViolation =>
                        {
                            Ok(false)
                        }
                        Err(err) => Err(err.into()),
                    }
                })
                .await?;

            if !inserted {
                return Err(ChatLogError::DuplicateKey(record.conversation_id));
            }
            Ok(record)
        })
    }

    fn get_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> StoreFuture<'_, ChatLogResult<Option<ChatLogRecord>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {COLUMNS} FROM {table} WHERE conversation_id = ?1"),
                            rusqlite::params![conversation_id],
                            StoredRow::from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            row.map(StoredRow::into_record).transpose()
        })
    }

    fn list_by_user_id(
        &self,
        user_id: &str,
        query: PageQuery,
    ) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.select_page(
                "user_id = ?1",
                Some(user_id),
                "created_at DESC, rowid DESC",
                query,
            )
            .await
        })
    }

    fn list_by_conversation_id(
        &self,
        conversation_id: &str,
        query: PageQuery,
    ) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            self.select_page(
                "conversation_id = ?1",
                Some(conversation_id),
                "created_at ASC, rowid ASC",
                query,
            )
            .await
        })
    }

    fn list_all(&self, query: PageQuery) -> StoreFuture<'_, ChatLogResult<Vec<ChatLogRecord>>> {
        Box::pin(async move {
            self.select_page("?1 IS NULL", None, "created_at DESC, rowid DESC", query)
                .await
        })
    }

    fn update(&self, entry: ChatLogEntry) -> StoreFuture<'_, ChatLogResult<Option<ChatLogRecord>>> {
        Box::pin(async move {
            entry.validate()?;
            let table = self.table.clone();
            let messages = serde_json::to_string(&entry.messages)?;
            let now = self.clock.now();
            let ChatLogEntry {
                conversation_id,
                user_id,
                model,
                response,
                ..
            } = entry;

            let row = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    // MAX keeps updated_at >= created_at even if the clock steps back.
                    let changed = tx.execute(
                        &format!(
                            "UPDATE {table}
                             SET user_id = ?2, model = ?3, messages = ?4, response = ?5,
                                 updated_at = MAX(?6, created_at)
                             WHERE conversation_id = ?1"
                        ),
                        rusqlite::params![conversation_id, user_id, model, messages, response, now],
                    )?;
                    let row = if changed == 0 {
                        None
                    } else {
                        tx.query_row(
                            &format!("SELECT {COLUMNS} FROM {table} WHERE conversation_id = ?1"),
                            rusqlite::params![conversation_id],
                            StoredRow::from_row,
                        )
                        .optional()?
                    };
                    tx.commit()?;
                    Ok(row)
                })
                .await?;
            row.map(StoredRow::into_record).transpose()
        })
    }

    fn delete_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> StoreFuture<'_, ChatLogResult<bool>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let removed = self
                .conn
                .call(move |conn| {
                    let removed = conn.execute(
                        &format!("DELETE FROM {table} WHERE conversation_id = ?1"),
                        rusqlite::params![conversation_id],
                    )?;
                    Ok(removed)
                })
                .await?;
            Ok(removed > 0)
        })
    }

    fn delete_by_user_id(&self, user_id: &str) -> StoreFuture<'_, ChatLogResult<usize>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let removed = self
                .conn
                .call(move |conn| {
                    let removed = conn.execute(
                        &format!("DELETE FROM {table} WHERE user_id = ?1"),
                        rusqlite::params![user_id],
                    )?;
                    Ok(removed)
                })
                .await?;
            Ok(removed)
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, ChatLogResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let removed = self
                .conn
                .call(move |conn| Ok(conn.execute(&format!("DELETE FROM {table}"), [])?))
                .await?;
            Ok(removed)
        })
    }

    fn count_all(&self) -> StoreFuture<'_, ChatLogResult<u64>> {
        Box::pin(async move {
            let table = self.table.clone();
            let count = self
                .conn
                .call(move |conn| {
                    let count: i64 =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                            row.get(0)
                        })?;
                    Ok(count)
                })
                .await?;
            u64::try_from(count)
                .map_err(|_| ChatLogError::InvalidRecord("negative row count".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::common::clock::ManualClock;
    use crate::storage::record::Message;

    const START: i64 = 1_700_000_000;

    async fn store() -> (SqliteChatLogStore, Arc<ManualClock>) {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let store = SqliteChatLogStore::new(conn, SqliteChatLogStore::DEFAULT_TABLE)
            .await
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    fn message(role: &str, content: &str) -> Message {
        match json!({ "role": role, "content": content }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn entry(conversation_id: &str, user_id: &str) -> ChatLogEntry {
        ChatLogEntry::new(conversation_id, user_id, "llama3")
            .with_messages(vec![message("user", "hi")])
            .with_response("hello")
    }

    #[tokio::test]
    async fn test_create_then_get_returns_input_with_timestamps() {
        let (store, _clock) = store().await;
        let created = store.create(entry("conv-1", "u1")).await.unwrap();
        let fetched = store.get_by_conversation_id("conv-1").await.unwrap().unwrap();

        assert_eq!(created, fetched);
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.model, "llama3");
        assert_eq!(fetched.messages, vec![message("user", "hi")]);
        assert_eq!(fetched.response.as_deref(), Some("hello"));
        assert_eq!(fetched.created_at, START);
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails_without_overwrite() {
        let (store, clock) = store().await;
        store.create(entry("conv-1", "u1")).await.unwrap();
        clock.advance(10);

        let err = store
            .create(ChatLogEntry::new("conv-1", "u2", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatLogError::DuplicateKey(ref id) if id == "conv-1"));

        let kept = store.get_by_conversation_id("conv-1").await.unwrap().unwrap();
        assert_eq!(kept.user_id, "u1");
        assert_eq!(kept.model, "llama3");
        assert_eq!(kept.created_at, START);
    }

    #[tokio::test]
    async fn test_blank_conversation_id_is_rejected() {
        let (store, _clock) = store().await;
        let err = store.create(entry("", "u1")).await.unwrap_err();
        assert!(matches!(err, ChatLogError::InvalidRecord(_)));
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_overwrites_fields_and_bumps_updated_at() {
        let (store, clock) = store().await;
        store.create(entry("conv-1", "u1")).await.unwrap();
        clock.advance(30);

        let updated = store
            .update(
                ChatLogEntry::new("conv-1", "u1", "mistral")
                    .with_messages(vec![message("user", "hi"), message("assistant", "hey")]),
            )
            .await
            .unwrap()
            .unwrap();
        let fetched = store.get_by_conversation_id("conv-1").await.unwrap().unwrap();

        assert_eq!(updated, fetched);
        assert_eq!(fetched.model, "mistral");
        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.response, None);
        assert_eq!(fetched.created_at, START);
        assert_eq!(fetched.updated_at, START + 30);
        assert!(fetched.updated_at > fetched.created_at);
    }

    #[tokio::test]
    async fn test_update_never_moves_updated_at_before_created_at() {
        let (store, clock) = store().await;
        store.create(entry("conv-1", "u1")).await.unwrap();
        clock.set(START - 100);

        let updated = store.update(entry("conv-1", "u1")).await.unwrap().unwrap();
        assert_eq!(updated.updated_at, START);
    }

    #[tokio::test]
    async fn test_update_missing_returns_none_and_creates_nothing() {
        let (store, _clock) = store().await;
        let result = store.update(entry("ghost", "u1")).await.unwrap();

        assert!(result.is_none());
        assert!(store.get_by_conversation_id("ghost").await.unwrap().is_none());
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_by_user_id_is_newest_first_and_paginated() {
        let (store, clock) = store().await;
        for id in ["a", "b", "c", "d"] {
            store.create(entry(id, "u1")).await.unwrap();
            clock.advance(1);
        }
        store.create(entry("other", "u2")).await.unwrap();

        let all = store.list_by_user_id("u1", PageQuery::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.conversation_id.as_str()).collect();
        assert_eq!(ids, ["d", "c", "b", "a"]);
        assert!(all.windows(2).all(|w| w[0].created_at > w[1].created_at));

        let page = store.list_by_user_id("u1", PageQuery::new(1, 2)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.conversation_id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[tokio::test]
    async fn test_list_by_conversation_id_returns_only_that_conversation() {
        let (store, clock) = store().await;
        let created = store.create(entry("conv-1", "u1")).await.unwrap();
        clock.advance(1);
        store.create(entry("conv-2", "u1")).await.unwrap();
        store.create(entry("conv-3", "u2")).await.unwrap();

        let logs = store
            .list_by_conversation_id("conv-1", PageQuery::default())
            .await
            .unwrap();
        assert_eq!(logs, vec![created]);

        let missing = store
            .list_by_conversation_id("ghost", PageQuery::default())
            .await
            .unwrap();
        assert!(missing.is_empty());

        let skipped = store
            .list_by_conversation_id("conv-1", PageQuery::new(1, 50))
            .await
            .unwrap();
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn test_model_filter_narrows_listing() {
        let (store, clock) = store().await;
        store.create(entry("a", "u1")).await.unwrap();
        clock.advance(1);
        store
            .create(ChatLogEntry::new("b", "u1", "mistral"))
            .await
            .unwrap();

        let logs = store
            .list_by_user_id("u1", PageQuery::default().with_model("mistral"))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].conversation_id, "b");

        let all = store
            .list_all(PageQuery::default().with_model("llama3"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].conversation_id, "a");
    }

    #[tokio::test]
    async fn test_delete_then_get_returns_none() {
        let (store, _clock) = store().await;
        store.create(entry("conv-1", "u1")).await.unwrap();

        assert!(store.delete_by_conversation_id("conv-1").await.unwrap());
        assert!(store.get_by_conversation_id("conv-1").await.unwrap().is_none());
        assert!(!store.delete_by_conversation_id("conv-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_user_id_leaves_other_users() {
        let (store, _clock) = store().await;
        store.create(entry("a", "u1")).await.unwrap();
        store.create(entry("b", "u1")).await.unwrap();
        store.create(entry("c", "u2")).await.unwrap();

        assert_eq!(store.delete_by_user_id("u1").await.unwrap(), 2);
        assert!(store
            .list_by_user_id("u1", PageQuery::default())
            .await
            .unwrap()
            .is_empty());
        assert!(store.get_by_conversation_id("c").await.unwrap().is_some());
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_and_list_all() {
        let (store, clock) = store().await;
        store.create(entry("a", "u1")).await.unwrap();
        clock.advance(1);
        store.create(entry("b", "u2")).await.unwrap();

        let ids: Vec<_> = store
            .list_all(PageQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.conversation_id)
            .collect();
        assert_eq!(ids, ["b", "a"]);

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count_all().await.unwrap(), 0);
    }
}
