//! Message store: typed access to messages, conversations, and channels.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use model::{CanonicalChannel, ChannelRow, Conversation, Message, MessageStatus};
pub use traits::MessageStore;
