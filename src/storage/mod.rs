//! Persistent storage for chat logs and user accounts.

pub mod chat_log_store;
pub mod record;
pub mod user_store;

pub use chat_log_store::{ChatLogStore, SqliteChatLogStore, StoreFuture};
pub use record::{ChatLogEntry, ChatLogRecord, Message, PageQuery};
pub use user_store::{Authenticator, SqliteUserStore, UserAccount, UserDirectory};
