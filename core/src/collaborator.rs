/// Contracts of the external collaborators the reconcilers call into
use crate::error::Result;
use crate::types::{ChatId, Folder, RawChat, RawMessage, ReactionKind, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryDirection {
    Older,
    Newer,
}

/// One page request relative to a pivot message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub chat_id: ChatId,
    /// `None` asks for the newest page
    pub pivot: Option<i64>,
    pub direction: HistoryDirection,
    pub limit: usize,
}

impl HistoryRequest {
    pub fn newest(chat_id: ChatId, limit: usize) -> Self {
        Self {
            chat_id,
            pivot: None,
            direction: HistoryDirection::Older,
            limit,
        }
    }

    pub fn older(chat_id: ChatId, pivot: i64, limit: usize) -> Self {
        Self {
            chat_id,
            pivot: Some(pivot),
            direction: HistoryDirection::Older,
            limit,
        }
    }

    pub fn newer(chat_id: ChatId, pivot: i64, limit: usize) -> Self {
        Self {
            chat_id,
            pivot: Some(pivot),
            direction: HistoryDirection::Newer,
            limit,
        }
    }
}

/// Fetches chats and history on demand.
///
/// Implementations must tolerate repeated and overlapping requests; the
/// reconcilers deduplicate whatever comes back.
#[async_trait]
pub trait PaginationSource: Send + Sync {
    /// Up to `limit` chats of `folder`, highest ranked first
    async fn fetch_chats(&self, folder: &Folder, limit: usize) -> Result<Vec<RawChat>>;

    async fn fetch_chat(&self, chat_id: ChatId) -> Result<RawChat>;

    /// Messages strictly before (`Older`) or after (`Newer`) the pivot,
    /// ordered oldest to newest
    async fn fetch_messages(&self, request: HistoryRequest) -> Result<Vec<RawMessage>>;

    async fn fetch_message(&self, chat_id: ChatId, message_id: i64) -> Result<RawMessage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNote {
    pub path: PathBuf,
    pub duration_secs: u32,
    pub waveform: Vec<u8>,
}

/// Starts sends. Each call returns the speculative entity at once; the
/// outcome arrives later as `SendSucceeded`/`SendFailed` on the event feed.
#[async_trait]
pub trait SendCollaborator: Send + Sync {
    /// The current user, used to attribute local reactions
    fn own_user_id(&self) -> UserId;

    async fn send_text(&self, chat_id: ChatId, text: String) -> Result<RawMessage>;

    async fn send_voice_note(&self, chat_id: ChatId, note: VoiceNote) -> Result<RawMessage>;

    /// Toggle `reaction` on a confirmed message
    async fn send_reaction(&self, chat_id: ChatId, message_id: i64, reaction: ReactionKind) -> Result<()>;
}
