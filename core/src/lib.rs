/// ChatSync - incremental conversation-state synchronizer
///
/// Keeps a folder's chat list and an open conversation's timeline consistent
/// with a stream of server update events, pages in history on demand, and
/// reconciles speculative sends with their server-confirmed identities.

pub mod error;
pub mod config;
pub mod types;
pub mod events;
pub mod identity_map;
pub mod hydrate;
pub mod collaborator;
pub mod chat_list;
pub mod message_list;
pub mod dispatch;
pub mod runtime;
pub mod memory;

pub use error::{SyncError, Result};
pub use config::SyncConfig;
pub use chat_list::ChatListReconciler;
pub use message_list::MessageListReconciler;
pub use identity_map::IdentityMap;
pub use events::{Effect, Topic, UpdateEvent};
pub use dispatch::Dispatcher;
pub use collaborator::{PaginationSource, SendCollaborator};
pub use runtime::{spawn_chat_list, spawn_conversation, ChatListHandle, ConversationHandle};
pub use memory::{Fixture, MemorySource};
