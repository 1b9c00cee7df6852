/// Chat list reconciler: one folder's ordered, de-duplicated conversation rows
use crate::events::{Effect, UpdateEvent};
use crate::types::{
    ChatId, ChatListSnapshot, ChatPosition, ConversationSummary, Folder, LoadState, RawChat,
    UnreadCounter, UnreadState,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Sort key descending; rows without a key come after keyed rows and rank
/// among themselves by id descending. Equal keys compare equal so a stable
/// sort keeps their previous relative order.
pub fn compare_summaries(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    match (a.sort_key, b.sort_key) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.id.cmp(&a.id),
    }
}

pub struct ChatListReconciler {
    folder: Folder,
    chats: Vec<ConversationSummary>,
    revision: u64,
    load_state: LoadState,
}

impl ChatListReconciler {
    pub fn new(folder: Folder) -> Self {
        Self {
            folder,
            chats: Vec::new(),
            revision: 0,
            load_state: LoadState::Idle,
        }
    }

    pub fn folder(&self) -> &Folder {
        &self.folder
    }

    pub fn chats(&self) -> &[ConversationSummary] {
        &self.chats
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn get(&self, id: ChatId) -> Option<&ConversationSummary> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: ChatId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<ChatId> {
        self.chats.iter().map(|c| c.id).collect()
    }

    pub fn snapshot(&self) -> ChatListSnapshot {
        ChatListSnapshot {
            folder: self.folder.clone(),
            revision: self.revision,
            load_state: self.load_state.clone(),
            chats: self.chats.clone(),
        }
    }

    pub fn set_load_state(&mut self, state: LoadState) {
        if self.load_state != state {
            self.load_state = state;
            self.bump();
        }
    }

    /// Replace the whole collection with one page. Safe to repeat.
    pub fn replace_all(&mut self, page: Vec<RawChat>) {
        let mut seen = HashSet::new();
        let mut chats: Vec<ConversationSummary> = page
            .iter()
            .filter_map(|raw| ConversationSummary::from_raw(raw, &self.folder))
            .filter(|summary| seen.insert(summary.id))
            .collect();
        chats.sort_by(compare_summaries);

        self.chats = chats;
        self.bump();
    }

    /// Insert rows we do not have yet; rows already present keep their live state
    pub fn merge_page(&mut self, page: Vec<RawChat>) -> usize {
        let mut inserted = 0;
        for raw in &page {
            if self.insert_raw(raw) {
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.sort();
            self.bump();
        }
        inserted
    }

    /// Result of a lazy hydrate. Returns true if the chat is now in the list.
    pub fn insert_hydrated(&mut self, raw: RawChat) -> bool {
        if self.contains(raw.id) {
            return true;
        }
        if self.insert_raw(&raw) {
            self.sort();
            self.bump();
            true
        } else {
            false
        }
    }

    /// Authoritative counters after a `RefreshCounters` effect
    pub fn refresh_counters(&mut self, raw: &RawChat) -> bool {
        let Some(chat) = self.chats.iter_mut().find(|c| c.id == raw.id) else {
            return false;
        };
        let state = raw.counters.resolve();
        if chat.counters == raw.counters && chat.unread_state == state {
            return false;
        }
        chat.counters = raw.counters;
        chat.unread_state = state;
        self.bump();
        true
    }

    /// Apply one event. Returns collaborator work the event calls for.
    pub fn apply(&mut self, event: &UpdateEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let changed = match event {
            UpdateEvent::NewChat { chat } => {
                if self.insert_raw(chat) {
                    self.sort();
                    true
                } else {
                    false
                }
            }
            UpdateEvent::ChatPosition { chat_id, position } => {
                self.apply_position(*chat_id, position, &mut effects)
            }
            UpdateEvent::ChatLastMessage {
                chat_id,
                last_message,
                positions,
            } => {
                let in_folder = positions.iter().find(|p| p.folder == self.folder);
                if let Some(chat) = self.chats.iter_mut().find(|c| c.id == *chat_id) {
                    chat.last_preview = last_message.as_ref().map(|m| m.text.clone());
                    if let Some(m) = last_message {
                        chat.last_activity_time = Some(m.time);
                    }
                    // a new last message supersedes whatever activity was running
                    chat.transient_activity = None;
                    if let Some(position) = in_folder {
                        self.apply_position(*chat_id, position, &mut effects);
                    }
                    true
                } else if positions.is_empty() || in_folder.is_some() {
                    match in_folder {
                        Some(position) if position.sort_key.is_removed() => false,
                        _ => {
                            debug!("Last message for unknown chat {}, hydrating", chat_id);
                            effects.push(Effect::HydrateChat(*chat_id));
                            false
                        }
                    }
                } else {
                    false
                }
            }
            UpdateEvent::ChatCounters { chat_id, counter } => {
                self.apply_counter(*chat_id, *counter, &mut effects)
            }
            UpdateEvent::ChatAction { chat_id, activity } => self.update(*chat_id, |chat| {
                if chat.transient_activity == *activity {
                    return false;
                }
                chat.transient_activity = activity.clone();
                true
            }),
            UpdateEvent::ChatRemoved { chat_id, folder } => {
                *folder == self.folder && self.remove(*chat_id)
            }
            UpdateEvent::ChatOnline { chat_id, is_online } => self.update(*chat_id, |chat| {
                std::mem::replace(&mut chat.is_online, *is_online) != *is_online
            }),
            UpdateEvent::ChatMuted { chat_id, is_muted } => self.update(*chat_id, |chat| {
                std::mem::replace(&mut chat.is_muted, *is_muted) != *is_muted
            }),
            UpdateEvent::ChatTitle { chat_id, title } => self.update(*chat_id, |chat| {
                if chat.title == *title {
                    return false;
                }
                chat.title = title.clone();
                true
            }),
            UpdateEvent::ChatPhoto { chat_id, photo } => self.update(*chat_id, |chat| {
                if chat.photo == *photo {
                    return false;
                }
                chat.photo = photo.clone();
                true
            }),
            // timeline events are not ours
            _ => false,
        };

        if changed {
            self.bump();
        }
        effects
    }

    fn apply_position(&mut self, chat_id: ChatId, position: &ChatPosition, effects: &mut Vec<Effect>) -> bool {
        if position.folder != self.folder {
            return false;
        }
        if position.sort_key.is_removed() {
            return self.remove(chat_id);
        }
        match self.chats.iter_mut().find(|c| c.id == chat_id) {
            Some(chat) => {
                let moved = chat.sort_key != Some(position.sort_key);
                let repinned = chat.is_pinned != position.is_pinned;
                chat.sort_key = Some(position.sort_key);
                chat.is_pinned = position.is_pinned;
                if moved {
                    self.sort();
                }
                moved || repinned
            }
            None => {
                debug!("Position for unknown chat {}, hydrating", chat_id);
                effects.push(Effect::HydrateChat(chat_id));
                false
            }
        }
    }

    fn apply_counter(&mut self, chat_id: ChatId, counter: UnreadCounter, effects: &mut Vec<Effect>) -> bool {
        let Some(chat) = self.chats.iter_mut().find(|c| c.id == chat_id) else {
            return false;
        };
        let before = (chat.counters, chat.unread_state);
        chat.counters.set(counter);

        if counter.value() == 0 {
            // The other counters may be stale; show nothing until re-read
            if chat.unread_state.kind() == Some(counter.kind()) {
                chat.unread_state = UnreadState::None;
                effects.push(Effect::RefreshCounters(chat_id));
            }
        } else {
            chat.unread_state = chat.counters.resolve();
        }

        before != (chat.counters, chat.unread_state)
    }

    /// Check-then-insert without sorting. Returns true if a row was added.
    fn insert_raw(&mut self, raw: &RawChat) -> bool {
        if self.contains(raw.id) {
            debug!("Chat {} already listed in {}", raw.id, self.folder);
            return false;
        }
        match ConversationSummary::from_raw(raw, &self.folder) {
            Some(summary) => {
                self.chats.push(summary);
                true
            }
            None => false,
        }
    }

    fn update<F>(&mut self, chat_id: ChatId, f: F) -> bool
    where
        F: FnOnce(&mut ConversationSummary) -> bool,
    {
        match self.chats.iter_mut().find(|c| c.id == chat_id) {
            Some(chat) => f(chat),
            None => false,
        }
    }

    fn remove(&mut self, chat_id: ChatId) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != chat_id);
        self.chats.len() != before
    }

    fn sort(&mut self) {
        // Vec::sort_by is stable
        self.chats.sort_by(compare_summaries);
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessagePreview, SortKey, UnreadCounters};
    use chrono::{TimeZone, Utc};

    fn position(sort_key: i64) -> ChatPosition {
        ChatPosition {
            folder: Folder::main(),
            sort_key: SortKey(sort_key),
            is_pinned: false,
        }
    }

    fn raw(id: ChatId, sort_key: i64) -> RawChat {
        RawChat {
            id,
            title: format!("chat {}", id),
            positions: vec![position(sort_key)],
            last_message: None,
            counters: UnreadCounters::default(),
            is_muted: false,
            is_online: false,
            photo: None,
        }
    }

    fn new_chat(id: ChatId, sort_key: i64) -> UpdateEvent {
        UpdateEvent::NewChat { chat: raw(id, sort_key) }
    }

    fn move_chat(id: ChatId, sort_key: i64) -> UpdateEvent {
        UpdateEvent::ChatPosition {
            chat_id: id,
            position: position(sort_key),
        }
    }

    fn counter(id: ChatId, counter: UnreadCounter) -> UpdateEvent {
        UpdateEvent::ChatCounters { chat_id: id, counter }
    }

    #[test]
    fn test_position_scenario() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&new_chat(2, 200));
        assert_eq!(list.ids(), vec![2, 1]);

        list.apply(&move_chat(1, 300));
        assert_eq!(list.ids(), vec![1, 2]);

        list.apply(&move_chat(2, SortKey::REMOVED.0));
        assert_eq!(list.ids(), vec![1]);
    }

    #[test]
    fn test_new_chat_is_deduplicated() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&new_chat(1, 500));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(1).unwrap().sort_key, Some(SortKey(100)));
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&new_chat(2, 100));
        list.apply(&new_chat(3, 100));
        let before = list.ids();

        list.apply(&new_chat(4, 50));
        list.apply(&UpdateEvent::ChatTitle {
            chat_id: 2,
            title: "renamed".to_string(),
        });
        list.apply(&move_chat(4, 60));

        assert_eq!(&list.ids()[..3], &before[..]);
        assert_eq!(list.ids()[3], 4);
    }

    #[test]
    fn test_rows_without_sort_key_rank_by_id() {
        let mut list = ChatListReconciler::new(Folder::main());
        let mut unplaced = raw(5, 0);
        unplaced.positions.clear();
        let mut other = raw(9, 0);
        other.positions.clear();

        list.replace_all(vec![unplaced, raw(1, 10), other]);
        assert_eq!(list.ids(), vec![1, 9, 5]);
    }

    #[test]
    fn test_position_for_unknown_chat_requests_hydrate() {
        let mut list = ChatListReconciler::new(Folder::main());
        let effects = list.apply(&move_chat(7, 10));
        assert_eq!(effects, vec![Effect::HydrateChat(7)]);
        assert!(list.is_empty());

        // hydrated record arrives
        assert!(list.insert_hydrated(raw(7, 10)));
        assert!(list.insert_hydrated(raw(7, 10)));
        assert_eq!(list.ids(), vec![7]);
    }

    #[test]
    fn test_position_in_other_folder_is_ignored() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        let effects = list.apply(&UpdateEvent::ChatPosition {
            chat_id: 1,
            position: ChatPosition {
                folder: Folder::archive(),
                sort_key: SortKey::REMOVED,
                is_pinned: false,
            },
        });
        assert!(effects.is_empty());
        assert_eq!(list.ids(), vec![1]);
    }

    #[test]
    fn test_last_message_updates_in_place_or_hydrates() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&UpdateEvent::ChatAction {
            chat_id: 1,
            activity: Some(crate::types::ChatActivity::Typing { who: None }),
        });

        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let effects = list.apply(&UpdateEvent::ChatLastMessage {
            chat_id: 1,
            last_message: Some(MessagePreview {
                text: "hello".to_string(),
                time,
            }),
            positions: Vec::new(),
        });
        assert!(effects.is_empty());
        let chat = list.get(1).unwrap();
        assert_eq!(chat.last_preview.as_deref(), Some("hello"));
        assert_eq!(chat.last_activity_time, Some(time));
        assert_eq!(chat.transient_activity, None);

        let effects = list.apply(&UpdateEvent::ChatLastMessage {
            chat_id: 2,
            last_message: None,
            positions: vec![position(10)],
        });
        assert_eq!(effects, vec![Effect::HydrateChat(2)]);
    }

    #[test]
    fn test_activity_clears_back_to_preview() {
        let mut list = ChatListReconciler::new(Folder::main());
        let mut chat = raw(1, 100);
        chat.last_message = Some(MessagePreview {
            text: "last words".to_string(),
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        });
        list.apply(&UpdateEvent::NewChat { chat });

        list.apply(&UpdateEvent::ChatAction {
            chat_id: 1,
            activity: Some(crate::types::ChatActivity::RecordingVoice {
                who: Some("Bo".to_string()),
            }),
        });
        assert_eq!(list.get(1).unwrap().subtitle().as_deref(), Some("Bo is recording voice…"));

        list.apply(&UpdateEvent::ChatAction {
            chat_id: 1,
            activity: None,
        });
        assert_eq!(list.get(1).unwrap().subtitle().as_deref(), Some("last words"));
    }

    #[test]
    fn test_unread_precedence_and_refresh() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));

        list.apply(&counter(1, UnreadCounter::Mention(2)));
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Mention);
        list.apply(&counter(1, UnreadCounter::Reaction(1)));
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Reaction);
        // lower-precedence counter does not take over
        list.apply(&counter(1, UnreadCounter::Unread(5)));
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Reaction);

        // active kind drops to zero: cleared, authoritative re-read requested
        let effects = list.apply(&counter(1, UnreadCounter::Reaction(0)));
        assert_eq!(effects, vec![Effect::RefreshCounters(1)]);
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::None);

        let mut fresh = raw(1, 100);
        fresh.counters = UnreadCounters {
            unread: 5,
            mentions: 2,
            reactions: 0,
        };
        assert!(list.refresh_counters(&fresh));
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Mention);
    }

    #[test]
    fn test_zero_on_inactive_counter_keeps_state() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&counter(1, UnreadCounter::Reaction(1)));

        let effects = list.apply(&counter(1, UnreadCounter::Mention(0)));
        assert!(effects.is_empty());
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Reaction);
    }

    #[test]
    fn test_plain_count_clears_to_none() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&counter(1, UnreadCounter::Unread(3)));
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::Count(3));

        let effects = list.apply(&counter(1, UnreadCounter::Unread(0)));
        assert_eq!(effects, vec![Effect::RefreshCounters(1)]);
        assert_eq!(list.get(1).unwrap().unread_state, UnreadState::None);
    }

    #[test]
    fn test_field_updates_are_noops_for_unknown_chats() {
        let mut list = ChatListReconciler::new(Folder::main());
        let revision = list.revision();
        for event in [
            UpdateEvent::ChatMuted { chat_id: 3, is_muted: true },
            UpdateEvent::ChatOnline { chat_id: 3, is_online: true },
            UpdateEvent::ChatTitle { chat_id: 3, title: "x".to_string() },
            counter(3, UnreadCounter::Unread(1)),
        ] {
            assert!(list.apply(&event).is_empty());
        }
        assert!(list.is_empty());
        assert_eq!(list.revision(), revision);
    }

    #[test]
    fn test_removed_from_folder() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        list.apply(&new_chat(2, 200));

        list.apply(&UpdateEvent::ChatRemoved {
            chat_id: 2,
            folder: Folder::archive(),
        });
        assert_eq!(list.len(), 2);

        list.apply(&UpdateEvent::ChatRemoved {
            chat_id: 2,
            folder: Folder::main(),
        });
        assert_eq!(list.ids(), vec![1]);
    }

    #[test]
    fn test_replace_all_is_reentrant() {
        let mut list = ChatListReconciler::new(Folder::main());
        let page = vec![raw(1, 10), raw(2, 20), raw(2, 20)];
        list.replace_all(page.clone());
        list.replace_all(page);
        assert_eq!(list.ids(), vec![2, 1]);
    }

    #[test]
    fn test_merge_page_keeps_live_state() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.replace_all(vec![raw(1, 10)]);
        list.apply(&move_chat(1, 30));

        let inserted = list.merge_page(vec![raw(1, 10), raw(2, 20)]);
        assert_eq!(inserted, 1);
        assert_eq!(list.ids(), vec![1, 2]);
        assert_eq!(list.get(1).unwrap().sort_key, Some(SortKey(30)));
    }

    #[test]
    fn test_revision_only_moves_on_change() {
        let mut list = ChatListReconciler::new(Folder::main());
        list.apply(&new_chat(1, 100));
        let revision = list.revision();

        list.apply(&UpdateEvent::ChatMuted { chat_id: 1, is_muted: false });
        list.apply(&move_chat(1, 100));
        assert_eq!(list.revision(), revision);

        list.apply(&UpdateEvent::ChatMuted { chat_id: 1, is_muted: true });
        assert_eq!(list.revision(), revision + 1);
    }
}
