/// Shared types for the chat list and the conversation timeline
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server identifier of a conversation
pub type ChatId = i64;

/// Server identifier of a user
pub type UserId = i64;

/// Message identifier: speculative until the server confirms the send
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Confirmed(i64),
    Speculative(String),
}

impl MessageId {
    pub fn confirmed(&self) -> Option<i64> {
        match self {
            MessageId::Confirmed(id) => Some(*id),
            MessageId::Speculative(_) => None,
        }
    }

    pub fn is_speculative(&self) -> bool {
        matches!(self, MessageId::Speculative(_))
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId::Confirmed(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Confirmed(id) => write!(f, "{}", id),
            MessageId::Speculative(id) => write!(f, "{}", id),
        }
    }
}

/// Named view over a subset of conversations ("main", "archive", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Folder(pub String);

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn main() -> Self {
        Self::new("main")
    }

    pub fn archive() -> Self {
        Self::new("archive")
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque ordering token of a conversation within one folder. Larger ranks higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortKey(pub i64);

impl SortKey {
    /// A conversation with this key is no longer part of the folder
    pub const REMOVED: SortKey = SortKey(0);

    pub fn is_removed(&self) -> bool {
        *self == Self::REMOVED
    }
}

/// Placement of a conversation inside one folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPosition {
    pub folder: Folder,
    pub sort_key: SortKey,
    #[serde(default)]
    pub is_pinned: bool,
}

/// Unread badge shown on a chat row; only one kind is shown at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum UnreadState {
    #[default]
    None,
    Count(u32),
    Mention,
    Reaction,
}

impl UnreadState {
    /// Which counter this state is derived from
    pub fn kind(&self) -> Option<CounterKind> {
        match self {
            UnreadState::None => None,
            UnreadState::Count(_) => Some(CounterKind::Unread),
            UnreadState::Mention => Some(CounterKind::Mention),
            UnreadState::Reaction => Some(CounterKind::Reaction),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Unread,
    Mention,
    Reaction,
}

/// Last reported value of each counter. The server reports them independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnreadCounters {
    #[serde(default)]
    pub unread: u32,
    #[serde(default)]
    pub mentions: u32,
    #[serde(default)]
    pub reactions: u32,
}

impl UnreadCounters {
    /// reaction > mention > plain count > none
    pub fn resolve(&self) -> UnreadState {
        if self.reactions > 0 {
            UnreadState::Reaction
        } else if self.mentions > 0 {
            UnreadState::Mention
        } else if self.unread > 0 {
            UnreadState::Count(self.unread)
        } else {
            UnreadState::None
        }
    }

    pub fn set(&mut self, counter: UnreadCounter) {
        match counter {
            UnreadCounter::Unread(n) => self.unread = n,
            UnreadCounter::Mention(n) => self.mentions = n,
            UnreadCounter::Reaction(n) => self.reactions = n,
        }
    }
}

/// One counter as carried by a counters-changed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum UnreadCounter {
    Unread(u32),
    Mention(u32),
    Reaction(u32),
}

impl UnreadCounter {
    pub fn kind(&self) -> CounterKind {
        match self {
            UnreadCounter::Unread(_) => CounterKind::Unread,
            UnreadCounter::Mention(_) => CounterKind::Mention,
            UnreadCounter::Reaction(_) => CounterKind::Reaction,
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            UnreadCounter::Unread(n) | UnreadCounter::Mention(n) | UnreadCounter::Reaction(n) => *n,
        }
    }
}

/// Short-lived activity shown instead of the preview ("typing…")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatActivity {
    Typing { who: Option<String> },
    RecordingVoice { who: Option<String> },
    UploadingPhoto { who: Option<String> },
    UploadingDocument { who: Option<String> },
    ChoosingSticker { who: Option<String> },
}

impl ChatActivity {
    pub fn label(&self) -> String {
        let (who, what) = match self {
            ChatActivity::Typing { who } => (who, "typing…"),
            ChatActivity::RecordingVoice { who } => (who, "recording voice…"),
            ChatActivity::UploadingPhoto { who } => (who, "sending photo…"),
            ChatActivity::UploadingDocument { who } => (who, "sending file…"),
            ChatActivity::ChoosingSticker { who } => (who, "choosing sticker…"),
        };
        match who {
            Some(name) => format!("{} is {}", name, what),
            None => what.to_string(),
        }
    }
}

/// Preview of the last message as carried by chat events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub text: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
}

/// Chat record as returned by the pagination collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChat {
    pub id: ChatId,
    pub title: String,
    #[serde(default)]
    pub positions: Vec<ChatPosition>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub counters: UnreadCounters,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub photo: Option<String>,
}

impl RawChat {
    pub fn position_in(&self, folder: &Folder) -> Option<&ChatPosition> {
        self.positions.iter().find(|p| &p.folder == folder)
    }
}

/// One row of the chat list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ChatId,
    pub sort_key: Option<SortKey>,
    pub title: String,
    pub last_activity_time: Option<DateTime<Utc>>,
    pub last_preview: Option<String>,
    pub unread_state: UnreadState,
    pub counters: UnreadCounters,
    pub transient_activity: Option<ChatActivity>,
    pub is_muted: bool,
    pub is_pinned: bool,
    pub is_online: bool,
    pub photo: Option<String>,
}

impl ConversationSummary {
    /// Map a raw record into a row of `folder`.
    ///
    /// Returns `None` when the record is placed in other folders only, or when
    /// its key here is the removed sentinel. A record without any position is
    /// kept with no sort key and ranks by id.
    pub fn from_raw(raw: &RawChat, folder: &Folder) -> Option<Self> {
        let position = raw.position_in(folder);
        if position.is_none() && !raw.positions.is_empty() {
            return None;
        }
        if position.map(|p| p.sort_key.is_removed()).unwrap_or(false) {
            return None;
        }

        Some(Self {
            id: raw.id,
            sort_key: position.map(|p| p.sort_key),
            title: raw.title.clone(),
            last_activity_time: raw.last_message.as_ref().map(|m| m.time),
            last_preview: raw.last_message.as_ref().map(|m| m.text.clone()),
            unread_state: raw.counters.resolve(),
            counters: raw.counters,
            transient_activity: None,
            is_muted: raw.is_muted,
            is_pinned: position.map(|p| p.is_pinned).unwrap_or(false),
            is_online: raw.is_online,
            photo: raw.photo.clone(),
        })
    }

    /// Activity text while one is running, otherwise the last preview
    pub fn subtitle(&self) -> Option<String> {
        match &self.transient_activity {
            Some(activity) => Some(activity.label()),
            None => self.last_preview.clone(),
        }
    }
}

/// Lifecycle of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sending,
    Delivered,
    Seen,
    Failed,
}

/// Local send state carried by raw outgoing records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendingState {
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Emoji(String),
    CustomEmoji(i64),
    Paid,
}

/// All reactions of one kind on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub kind: ReactionKind,
    pub count: u32,
    #[serde(default)]
    pub is_chosen: bool,
    /// Most recent reactors first
    #[serde(default)]
    pub recent_reactors: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderDisplay {
    pub name: String,
    pub hidden: bool,
}

/// Denormalized preview of the message being replied to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyReference {
    pub message_id: MessageId,
    pub sender_name: Option<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    VoiceNote {
        duration_secs: u32,
        #[serde(default)]
        waveform: Vec<u8>,
        #[serde(default)]
        is_listened: bool,
    },
    Photo {
        #[serde(default)]
        caption: Option<String>,
        width: u32,
        height: u32,
    },
    Sticker {
        emoji: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    /// Service message rendered as a centered pill
    Announcement {
        text: String,
    },
}

impl MessageContent {
    /// Text used for reply previews and chat list previews
    pub fn preview_text(&self) -> String {
        match self {
            MessageContent::Text { text } | MessageContent::Announcement { text } => text.clone(),
            MessageContent::VoiceNote { .. } => "Voice message".to_string(),
            MessageContent::Photo { caption, .. } => match caption.as_deref() {
                Some(c) if !c.is_empty() => format!("Photo, {}", c),
                _ => "Photo".to_string(),
            },
            MessageContent::Sticker { emoji } => format!("{} Sticker", emoji),
            MessageContent::Location { .. } => "Location".to_string(),
        }
    }
}

/// Message record as returned by the pagination and send collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_outgoing: bool,
    #[serde(default)]
    pub sending_state: Option<SendingState>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
    pub content: MessageContent,
}

/// One row of a conversation timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ChatId,
    pub sender_id: UserId,
    pub sender: SenderDisplay,
    pub timestamp: DateTime<Utc>,
    pub is_outgoing: bool,
    /// Unset for incoming messages
    pub delivery_state: Option<DeliveryState>,
    pub reactions: Vec<ReactionGroup>,
    pub reply: Option<ReplyReference>,
    pub content: MessageContent,
}

/// Rendered timeline entry: a message or a synthetic day boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    Message(Message),
    DateSeparator { date: NaiveDate },
}

impl TimelineItem {
    /// Stable identity of the entry; separators derive theirs from the date
    pub fn key(&self) -> String {
        match self {
            TimelineItem::Message(m) => format!("msg:{}", m.id),
            TimelineItem::DateSeparator { date } => format!("date:{}", date),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            TimelineItem::Message(m) => Some(m),
            TimelineItem::DateSeparator { .. } => None,
        }
    }
}

/// Pagination status surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    /// Recoverable; the presentation layer offers a retry
    Failed(String),
}

/// Immutable chat list view for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListSnapshot {
    pub folder: Folder,
    pub revision: u64,
    pub load_state: LoadState,
    pub chats: Vec<ConversationSummary>,
}

impl ChatListSnapshot {
    pub fn ids(&self) -> Vec<ChatId> {
        self.chats.iter().map(|c| c.id).collect()
    }
}

/// Immutable timeline view for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSnapshot {
    pub chat_id: ChatId,
    pub revision: u64,
    pub load_state: LoadState,
    pub items: Vec<TimelineItem>,
}

impl TimelineSnapshot {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().filter_map(TimelineItem::as_message)
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.messages().map(|m| m.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_chat(id: ChatId, positions: Vec<ChatPosition>) -> RawChat {
        RawChat {
            id,
            title: format!("chat {}", id),
            positions,
            last_message: None,
            counters: UnreadCounters::default(),
            is_muted: false,
            is_online: false,
            photo: None,
        }
    }

    #[test]
    fn test_unread_precedence() {
        let mut counters = UnreadCounters {
            unread: 4,
            mentions: 1,
            reactions: 2,
        };
        assert_eq!(counters.resolve(), UnreadState::Reaction);
        counters.set(UnreadCounter::Reaction(0));
        assert_eq!(counters.resolve(), UnreadState::Mention);
        counters.set(UnreadCounter::Mention(0));
        assert_eq!(counters.resolve(), UnreadState::Count(4));
        counters.set(UnreadCounter::Unread(0));
        assert_eq!(counters.resolve(), UnreadState::None);
    }

    #[test]
    fn test_summary_from_raw_respects_folder() {
        let main = Folder::main();
        let placed = raw_chat(
            1,
            vec![ChatPosition {
                folder: Folder::archive(),
                sort_key: SortKey(10),
                is_pinned: false,
            }],
        );
        assert!(ConversationSummary::from_raw(&placed, &main).is_none());
        assert_eq!(
            ConversationSummary::from_raw(&placed, &Folder::archive())
                .unwrap()
                .sort_key,
            Some(SortKey(10))
        );

        let unplaced = raw_chat(2, Vec::new());
        assert_eq!(ConversationSummary::from_raw(&unplaced, &main).unwrap().sort_key, None);

        let removed = raw_chat(
            3,
            vec![ChatPosition {
                folder: main.clone(),
                sort_key: SortKey::REMOVED,
                is_pinned: false,
            }],
        );
        assert!(ConversationSummary::from_raw(&removed, &main).is_none());
    }

    #[test]
    fn test_subtitle_prefers_activity() {
        let mut summary = ConversationSummary::from_raw(&raw_chat(1, Vec::new()), &Folder::main()).unwrap();
        summary.last_preview = Some("see you".to_string());
        assert_eq!(summary.subtitle().as_deref(), Some("see you"));

        summary.transient_activity = Some(ChatActivity::Typing {
            who: Some("Ann".to_string()),
        });
        assert_eq!(summary.subtitle().as_deref(), Some("Ann is typing…"));
    }

    #[test]
    fn test_message_id_json_shape() {
        let confirmed: MessageId = serde_json::from_str("42").unwrap();
        assert_eq!(confirmed, MessageId::Confirmed(42));
        let speculative: MessageId = serde_json::from_str("\"local-7\"").unwrap();
        assert_eq!(speculative, MessageId::Speculative("local-7".to_string()));
        assert_eq!(speculative.to_string(), "local-7");
    }
}
