/// Update events pushed by the server, and the follow-up work they can request
use crate::types::{
    ChatActivity, ChatId, ChatPosition, Folder, MessageId, MessagePreview, RawChat, RawMessage,
    ReactionGroup, UnreadCounter,
};
use serde::{Deserialize, Serialize};

/// One fact that changed on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// A conversation became known to the client
    NewChat { chat: RawChat },

    /// A conversation moved inside a folder (removed sentinel = left the folder)
    ChatPosition { chat_id: ChatId, position: ChatPosition },

    /// The last message of a conversation changed
    ChatLastMessage {
        chat_id: ChatId,
        last_message: Option<MessagePreview>,
        #[serde(default)]
        positions: Vec<ChatPosition>,
    },

    /// One unread counter changed; counters are reported independently
    ChatCounters { chat_id: ChatId, counter: UnreadCounter },

    /// Typing/uploading started, changed or stopped (`None`)
    ChatAction {
        chat_id: ChatId,
        activity: Option<ChatActivity>,
    },

    /// The conversation left `folder`
    ChatRemoved { chat_id: ChatId, folder: Folder },

    ChatOnline { chat_id: ChatId, is_online: bool },

    ChatMuted { chat_id: ChatId, is_muted: bool },

    ChatTitle { chat_id: ChatId, title: String },

    ChatPhoto { chat_id: ChatId, photo: Option<String> },

    NewMessage { message: RawMessage },

    /// Messages were deleted, by confirmed id
    MessagesDeleted { chat_id: ChatId, message_ids: Vec<i64> },

    SendSucceeded {
        chat_id: ChatId,
        old_id: String,
        new_id: i64,
    },

    SendFailed {
        chat_id: ChatId,
        old_id: String,
        new_id: i64,
        #[serde(default)]
        reason: String,
    },

    MessageContentChanged { chat_id: ChatId, message_id: i64 },

    MessageContentOpened { chat_id: ChatId, message_id: i64 },

    /// Reactions on a message changed
    MessageInteraction {
        chat_id: ChatId,
        message_id: i64,
        reactions: Vec<ReactionGroup>,
    },

    /// The peer read our outgoing messages up to `last_read_outbox_id`
    ReadOutbox {
        chat_id: ChatId,
        last_read_outbox_id: i64,
    },
}

/// Subscription key of the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every chat list reconciler; each one filters for its own folder
    ChatList,
    /// The timeline of one conversation
    Conversation(ChatId),
}

impl UpdateEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            UpdateEvent::NewChat { chat } => chat.id,
            UpdateEvent::NewMessage { message } => message.chat_id,
            UpdateEvent::ChatPosition { chat_id, .. }
            | UpdateEvent::ChatLastMessage { chat_id, .. }
            | UpdateEvent::ChatCounters { chat_id, .. }
            | UpdateEvent::ChatAction { chat_id, .. }
            | UpdateEvent::ChatRemoved { chat_id, .. }
            | UpdateEvent::ChatOnline { chat_id, .. }
            | UpdateEvent::ChatMuted { chat_id, .. }
            | UpdateEvent::ChatTitle { chat_id, .. }
            | UpdateEvent::ChatPhoto { chat_id, .. }
            | UpdateEvent::MessagesDeleted { chat_id, .. }
            | UpdateEvent::SendSucceeded { chat_id, .. }
            | UpdateEvent::SendFailed { chat_id, .. }
            | UpdateEvent::MessageContentChanged { chat_id, .. }
            | UpdateEvent::MessageContentOpened { chat_id, .. }
            | UpdateEvent::MessageInteraction { chat_id, .. }
            | UpdateEvent::ReadOutbox { chat_id, .. } => *chat_id,
        }
    }

    /// Where the dispatcher delivers this event
    pub fn topic(&self) -> Topic {
        match self {
            UpdateEvent::NewChat { .. }
            | UpdateEvent::ChatPosition { .. }
            | UpdateEvent::ChatLastMessage { .. }
            | UpdateEvent::ChatCounters { .. }
            | UpdateEvent::ChatAction { .. }
            | UpdateEvent::ChatRemoved { .. }
            | UpdateEvent::ChatOnline { .. }
            | UpdateEvent::ChatMuted { .. }
            | UpdateEvent::ChatTitle { .. }
            | UpdateEvent::ChatPhoto { .. } => Topic::ChatList,
            _ => Topic::Conversation(self.chat_id()),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateEvent::NewChat { .. } => "new_chat",
            UpdateEvent::ChatPosition { .. } => "chat_position",
            UpdateEvent::ChatLastMessage { .. } => "chat_last_message",
            UpdateEvent::ChatCounters { .. } => "chat_counters",
            UpdateEvent::ChatAction { .. } => "chat_action",
            UpdateEvent::ChatRemoved { .. } => "chat_removed",
            UpdateEvent::ChatOnline { .. } => "chat_online",
            UpdateEvent::ChatMuted { .. } => "chat_muted",
            UpdateEvent::ChatTitle { .. } => "chat_title",
            UpdateEvent::ChatPhoto { .. } => "chat_photo",
            UpdateEvent::NewMessage { .. } => "new_message",
            UpdateEvent::MessagesDeleted { .. } => "messages_deleted",
            UpdateEvent::SendSucceeded { .. } => "send_succeeded",
            UpdateEvent::SendFailed { .. } => "send_failed",
            UpdateEvent::MessageContentChanged { .. } => "message_content_changed",
            UpdateEvent::MessageContentOpened { .. } => "message_content_opened",
            UpdateEvent::MessageInteraction { .. } => "message_interaction",
            UpdateEvent::ReadOutbox { .. } => "read_outbox",
        }
    }
}

/// Collaborator work requested by a reconciler while applying an event.
/// The runtime performs it and feeds the result back through the update queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Fetch a conversation the event referenced but the list does not hold
    HydrateChat(ChatId),
    /// Re-read the authoritative counters after the shown one dropped to zero
    RefreshCounters(ChatId),
    /// Re-read one message and replace it in place
    RefetchMessage(MessageId),
}
