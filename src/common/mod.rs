//! Core types shared by the store and the HTTP layer.

pub mod clock;
pub mod config;
pub mod errors;
pub mod identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PaginationConfig, ServerConfig, StorageConfig};
pub use errors::{ChatLogError, ChatLogResult};
pub use identity::{AuthUser, UserRole};
