//! Conversation history: turns, addressing, and the two-tier coordinator

mod coordinator;
mod error;
mod key;
mod locks;
mod turn;

pub use coordinator::{HistoryCoordinator, HistoryPolicy, HistoryStats};
pub use error::{CacheDegraded, HistoryError, StoreError};
pub use key::ConversationKey;
pub use turn::{Role, Turn, UnknownRole};
