/// In-memory collaborator: serves pages from a fixture and simulates sends.
/// Backs the replay binary and the integration tests.
use crate::collaborator::{HistoryDirection, HistoryRequest, PaginationSource, SendCollaborator, VoiceNote};
use crate::error::{Result, SyncError};
use crate::events::UpdateEvent;
use crate::types::{
    ChatId, Folder, MessageContent, MessageId, RawChat, RawMessage, ReactionKind, SendingState, UserId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Initial server state plus a script of events to replay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub own_user_id: UserId,
    #[serde(default)]
    pub chats: Vec<RawChat>,
    /// Two-party chats; their timelines hide sender names
    #[serde(default)]
    pub private_chats: Vec<ChatId>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub events: Vec<UpdateEvent>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(SyncError::Io)?;
        serde_json::from_str(&raw).map_err(SyncError::Serialization)
    }
}

/// Switches for failure injection
#[derive(Debug, Default)]
struct Faults {
    pagination: bool,
    sends: bool,
    unknown_chats: HashSet<ChatId>,
}

#[derive(Debug, Default)]
struct ServerState {
    chats: Vec<RawChat>,
    /// Per chat, ordered by id
    messages: HashMap<ChatId, Vec<RawMessage>>,
    /// Speculative sends not yet resolved
    outbox: HashMap<String, RawMessage>,
    next_local: u64,
    faults: Faults,
}

#[derive(Clone)]
pub struct MemorySource {
    own_user_id: UserId,
    state: Arc<RwLock<ServerState>>,
    chat_fetches: Arc<AtomicUsize>,
    message_fetches: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(own_user_id: UserId) -> Self {
        Self {
            own_user_id,
            state: Arc::new(RwLock::new(ServerState::default())),
            chat_fetches: Arc::new(AtomicUsize::new(0)),
            message_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn from_fixture(fixture: &Fixture) -> Self {
        let source = Self::new(fixture.own_user_id);
        for chat in &fixture.chats {
            source.put_chat(chat.clone()).await;
        }
        for message in &fixture.messages {
            source.put_message(message.clone()).await;
        }
        source
    }

    /// Add or replace a chat record
    pub async fn put_chat(&self, chat: RawChat) {
        let mut state = self.state.write().await;
        state.chats.retain(|c| c.id != chat.id);
        state.chats.push(chat);
    }

    /// Add or replace a confirmed message
    pub async fn put_message(&self, message: RawMessage) {
        let mut state = self.state.write().await;
        let history = state.messages.entry(message.chat_id).or_default();
        history.retain(|m| m.id != message.id);
        history.push(message);
        history.sort_by_key(|m| m.id.confirmed().unwrap_or(i64::MAX));
    }

    pub async fn fail_pagination(&self, fail: bool) {
        self.state.write().await.faults.pagination = fail;
    }

    pub async fn fail_sends(&self, fail: bool) {
        self.state.write().await.faults.sends = fail;
    }

    /// Make `fetch_chat` report the chat as missing
    pub async fn hide_chat(&self, chat_id: ChatId) {
        self.state.write().await.faults.unknown_chats.insert(chat_id);
    }

    pub async fn unhide_chat(&self, chat_id: ChatId) {
        self.state.write().await.faults.unknown_chats.remove(&chat_id);
    }

    /// Number of single-chat fetches served so far
    pub fn chat_fetches(&self) -> usize {
        self.chat_fetches.load(Ordering::SeqCst)
    }

    pub fn message_fetches(&self) -> usize {
        self.message_fetches.load(Ordering::SeqCst)
    }

    /// Server accepts a pending send: stores it under the next id and returns
    /// the event the feed would carry
    pub async fn confirm_send(&self, local_id: &str) -> Result<UpdateEvent> {
        let mut state = self.state.write().await;
        let mut message = state
            .outbox
            .remove(local_id)
            .ok_or_else(|| SyncError::NotFound(format!("pending send {}", local_id)))?;
        let new_id = state
            .messages
            .get(&message.chat_id)
            .and_then(|h| h.iter().filter_map(|m| m.id.confirmed()).max())
            .unwrap_or(0)
            + 1;
        message.id = MessageId::Confirmed(new_id);
        message.sending_state = None;
        let chat_id = message.chat_id;
        state.messages.entry(chat_id).or_default().push(message);

        Ok(UpdateEvent::SendSucceeded {
            chat_id,
            old_id: local_id.to_string(),
            new_id,
        })
    }

    /// Server rejects a pending send
    pub async fn reject_send(&self, local_id: &str, reason: &str) -> Result<UpdateEvent> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .remove(local_id)
            .ok_or_else(|| SyncError::NotFound(format!("pending send {}", local_id)))?;
        // failed sends still burn a server id
        let new_id = state
            .messages
            .get(&message.chat_id)
            .and_then(|h| h.iter().filter_map(|m| m.id.confirmed()).max())
            .unwrap_or(0)
            + 1;

        Ok(UpdateEvent::SendFailed {
            chat_id: message.chat_id,
            old_id: local_id.to_string(),
            new_id,
            reason: reason.to_string(),
        })
    }

    async fn queue_send(&self, chat_id: ChatId, content: MessageContent) -> Result<RawMessage> {
        let mut state = self.state.write().await;
        if state.faults.sends {
            return Err(SyncError::Send("send rejected".to_string()));
        }
        state.next_local += 1;
        let local_id = format!("local-{}", state.next_local);
        let message = RawMessage {
            id: MessageId::Speculative(local_id.clone()),
            chat_id,
            sender_id: self.own_user_id,
            sender_name: "You".to_string(),
            date: chrono::Utc::now(),
            is_outgoing: true,
            sending_state: Some(SendingState::Pending),
            reply_to: None,
            reactions: Vec::new(),
            content,
        };
        state.outbox.insert(local_id, message.clone());
        Ok(message)
    }
}

#[async_trait]
impl PaginationSource for MemorySource {
    async fn fetch_chats(&self, folder: &Folder, limit: usize) -> Result<Vec<RawChat>> {
        let state = self.state.read().await;
        if state.faults.pagination {
            return Err(SyncError::Pagination("chat list unavailable".to_string()));
        }
        let mut chats: Vec<RawChat> = state
            .chats
            .iter()
            .filter(|c| c.position_in(folder).map(|p| !p.sort_key.is_removed()).unwrap_or(false))
            .cloned()
            .collect();
        chats.sort_by_key(|c| std::cmp::Reverse(c.position_in(folder).map(|p| p.sort_key)));
        chats.truncate(limit);
        debug!("Serving {} chats of {}", chats.len(), folder);
        Ok(chats)
    }

    async fn fetch_chat(&self, chat_id: ChatId) -> Result<RawChat> {
        self.chat_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.faults.unknown_chats.contains(&chat_id) {
            return Err(SyncError::NotFound(format!("chat {}", chat_id)));
        }
        state
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("chat {}", chat_id)))
    }

    async fn fetch_messages(&self, request: HistoryRequest) -> Result<Vec<RawMessage>> {
        self.message_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.faults.pagination {
            return Err(SyncError::Pagination("history unavailable".to_string()));
        }
        let history = state
            .messages
            .get(&request.chat_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let id_of = |m: &RawMessage| m.id.confirmed().unwrap_or(i64::MAX);

        let page: Vec<RawMessage> = match (request.direction, request.pivot) {
            (HistoryDirection::Older, pivot) => {
                let older: Vec<&RawMessage> = history
                    .iter()
                    .filter(|m| pivot.map(|p| id_of(*m) < p).unwrap_or(true))
                    .collect();
                let skip = older.len().saturating_sub(request.limit);
                older.into_iter().skip(skip).cloned().collect()
            }
            (HistoryDirection::Newer, pivot) => history
                .iter()
                .filter(|m| pivot.map(|p| id_of(*m) > p).unwrap_or(true))
                .take(request.limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }

    async fn fetch_message(&self, chat_id: ChatId, message_id: i64) -> Result<RawMessage> {
        let state = self.state.read().await;
        state
            .messages
            .get(&chat_id)
            .and_then(|h| h.iter().find(|m| m.id == MessageId::Confirmed(message_id)))
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("message {} in chat {}", message_id, chat_id)))
    }
}

#[async_trait]
impl SendCollaborator for MemorySource {
    fn own_user_id(&self) -> UserId {
        self.own_user_id
    }

    async fn send_text(&self, chat_id: ChatId, text: String) -> Result<RawMessage> {
        self.queue_send(chat_id, MessageContent::Text { text }).await
    }

    async fn send_voice_note(&self, chat_id: ChatId, note: VoiceNote) -> Result<RawMessage> {
        self.queue_send(
            chat_id,
            MessageContent::VoiceNote {
                duration_secs: note.duration_secs,
                waveform: note.waveform,
                is_listened: false,
            },
        )
        .await
    }

    async fn send_reaction(&self, chat_id: ChatId, message_id: i64, reaction: ReactionKind) -> Result<()> {
        let state = self.state.read().await;
        if state.faults.sends {
            return Err(SyncError::Send("reaction rejected".to_string()));
        }
        debug!("Reaction {:?} on {} in chat {}", reaction, message_id, chat_id);
        Ok(())
    }
}
