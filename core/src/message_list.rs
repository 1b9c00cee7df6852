/// Message list reconciler: one conversation's timeline
///
/// Messages live in slots of an arena. `order` holds the visible sequence of
/// slots and `index` maps the current id of each message to its slot, so an
/// id swap only rewrites the index and never moves the entry.
use crate::collaborator::{HistoryRequest, PaginationSource};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::{Effect, UpdateEvent};
use crate::identity_map::IdentityMap;
use crate::types::{
    ChatId, DeliveryState, LoadState, Message, MessageId, RawMessage, ReactionGroup, ReactionKind,
    ReplyReference, SenderDisplay, SendingState, TimelineItem, TimelineSnapshot, UserId,
};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

type Slot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    First,
    Last,
    At(usize),
}

/// Where a fetched page goes relative to what is already shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEdge {
    Older,
    Newer,
}

pub struct MessageListReconciler {
    chat_id: ChatId,
    /// Two-party chats hide sender names
    is_private: bool,
    slots: Vec<Option<Message>>,
    free: Vec<Slot>,
    order: Vec<Slot>,
    index: HashMap<MessageId, Slot>,
    identities: IdentityMap,
    /// Confirmed ids deleted while the view is open; stale pages must not revive them
    deleted: HashSet<i64>,
    last_read_outbox: i64,
    day_offset: FixedOffset,
    max_recent_reactors: usize,
    revision: u64,
    load_state: LoadState,
}

impl MessageListReconciler {
    pub fn new(chat_id: ChatId, is_private: bool, config: &SyncConfig) -> Self {
        // validated config keeps the offset in range; fall back to UTC otherwise
        let day_offset = FixedOffset::east_opt(config.utc_offset_secs).unwrap_or_else(|| Utc.fix());
        Self {
            chat_id,
            is_private,
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            index: HashMap::new(),
            identities: IdentityMap::new(),
            deleted: HashSet::new(),
            last_read_outbox: 0,
            day_offset,
            max_recent_reactors: config.max_recent_reactors,
            revision: 0,
            load_state: LoadState::Idle,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).and_then(|slot| self.slots[*slot].as_ref())
    }

    /// Messages in visible order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(move |slot| self.slots[*slot].as_ref())
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages().map(|m| m.id.clone()).collect()
    }

    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        let slot = self.index.get(id)?;
        self.order.iter().position(|s| s == slot)
    }

    /// Pivot for `load_older`
    pub fn oldest_confirmed_id(&self) -> Option<i64> {
        self.messages().find_map(|m| m.id.confirmed())
    }

    /// Pivot for `load_newer`
    pub fn newest_confirmed_id(&self) -> Option<i64> {
        self.order
            .iter()
            .rev()
            .filter_map(|slot| self.slots[*slot].as_ref())
            .find_map(|m| m.id.confirmed())
    }

    pub fn set_load_state(&mut self, state: LoadState) {
        if self.load_state != state {
            self.load_state = state;
            self.bump();
        }
    }

    /// The view closed; speculative identities and tombstones are no longer needed
    pub fn close(&mut self) {
        self.identities.clear();
        self.deleted.clear();
    }

    /// Deleted on the server during this view's lifetime
    pub fn is_deleted(&self, id: &MessageId) -> bool {
        id.confirmed().map(|id| self.deleted.contains(&id)).unwrap_or(false)
    }

    /// Timeline with a date separator between adjacent messages on different days
    pub fn timeline(&self) -> Vec<TimelineItem> {
        let mut items = Vec::with_capacity(self.order.len());
        let mut previous_day: Option<NaiveDate> = None;
        for message in self.messages() {
            let day = self.day_of(message.timestamp);
            if let Some(prev) = previous_day {
                if prev != day {
                    items.push(TimelineItem::DateSeparator { date: day });
                }
            }
            previous_day = Some(day);
            items.push(TimelineItem::Message(message.clone()));
        }
        items
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            chat_id: self.chat_id,
            revision: self.revision,
            load_state: self.load_state.clone(),
            items: self.timeline(),
        }
    }

    /// Turn a collaborator record into a timeline message
    pub fn map_raw(&self, raw: RawMessage) -> Message {
        let delivery_state = if raw.is_outgoing {
            Some(match raw.sending_state {
                Some(SendingState::Pending) => DeliveryState::Sending,
                Some(SendingState::Failed) => DeliveryState::Failed,
                None => match raw.id.confirmed() {
                    Some(id) if id <= self.last_read_outbox => DeliveryState::Seen,
                    _ => DeliveryState::Delivered,
                },
            })
        } else {
            None
        };

        let reply = raw.reply_to.map(|target| match self.get(&target) {
            Some(original) => ReplyReference {
                message_id: target,
                sender_name: Some(original.sender.name.clone()),
                preview: Some(original.content.preview_text()),
            },
            None => ReplyReference {
                message_id: target,
                sender_name: None,
                preview: None,
            },
        });

        let mut reactions = raw.reactions;
        self.bound_reactors(&mut reactions);

        Message {
            id: raw.id,
            conversation_id: raw.chat_id,
            sender_id: raw.sender_id,
            sender: SenderDisplay {
                name: raw.sender_name,
                hidden: raw.is_outgoing || self.is_private,
            },
            timestamp: raw.date,
            is_outgoing: raw.is_outgoing,
            delivery_state,
            reactions,
            reply,
            content: raw.content,
        }
    }

    /// Insert one message, replacing any stale copy with the same id.
    /// Failed sends are refused. Returns true if the message was inserted.
    pub fn insert(&mut self, message: Message, position: InsertPosition) -> bool {
        if message.delivery_state == Some(DeliveryState::Failed) {
            debug!("Refusing failed message {} in chat {}", message.id, self.chat_id);
            return false;
        }
        if self.is_deleted(&message.id) {
            debug!("Refusing deleted message {} in chat {}", message.id, self.chat_id);
            return false;
        }
        self.detach(&message.id);
        let at = match position {
            InsertPosition::First => 0,
            InsertPosition::Last => self.order.len(),
            InsertPosition::At(i) => i.min(self.order.len()),
        };
        self.place(message, at);
        self.bump();
        true
    }

    /// Merge a fetched page (oldest to newest). Entries already shown are
    /// refreshed where they stand. New entries go next to the page's nearest
    /// earlier neighbour that is shown, or before its first shown entry, or at
    /// `edge` when the page does not overlap at all. Merging the same page
    /// twice leaves the same timeline. Returns how many entries were added.
    pub fn merge_page(&mut self, page: Vec<RawMessage>, edge: PageEdge) -> usize {
        let mut batch = Vec::with_capacity(page.len());
        for raw in page {
            if raw.chat_id != self.chat_id || self.is_deleted(&raw.id) {
                continue;
            }
            batch.push(self.map_raw(raw));
        }
        // a page may repeat an id; keep its last copy
        let mut seen = HashSet::new();
        let mut deduped: Vec<Message> = batch
            .into_iter()
            .rev()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        deduped.reverse();

        let mut changed = false;
        let mut added = 0;
        // new entries not yet anchored to a shown neighbour
        let mut leading: Vec<Message> = Vec::new();
        // where the next new entry goes, once anchored
        let mut cursor: Option<usize> = None;

        for message in deduped {
            let failed = message.delivery_state == Some(DeliveryState::Failed);
            match self.index.get(&message.id).copied() {
                Some(_) if failed => {
                    changed |= self.detach(&message.id).is_some();
                }
                Some(slot) => {
                    let mut at = self.order.iter().position(|s| *s == slot).unwrap_or(0);
                    if cursor.is_none() {
                        for pending in leading.drain(..) {
                            self.place(pending, at);
                            at += 1;
                            added += 1;
                        }
                    }
                    if self.slots[slot].as_ref() != Some(&message) {
                        self.slots[slot] = Some(message);
                        changed = true;
                    }
                    cursor = Some(at + 1);
                }
                None if failed => {}
                None => match cursor {
                    Some(at) => {
                        self.place(message, at);
                        cursor = Some(at + 1);
                        added += 1;
                    }
                    None => leading.push(message),
                },
            }
        }

        if !leading.is_empty() {
            let mut at = match edge {
                PageEdge::Older => 0,
                PageEdge::Newer => self.order.len(),
            };
            for pending in leading {
                self.place(pending, at);
                at += 1;
                added += 1;
            }
        }
        if changed || added > 0 {
            self.bump();
        }
        added
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let removed = self.detach(id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Re-key an entry in place. Fails if `old` is absent or `new` is taken.
    pub fn reassign(&mut self, old: &MessageId, new: MessageId) -> bool {
        if self.index.contains_key(&new) {
            return false;
        }
        let Some(slot) = self.index.remove(old) else {
            return false;
        };
        if let Some(message) = self.slots[slot].as_mut() {
            message.id = new.clone();
        }
        self.index.insert(new, slot);
        self.bump();
        true
    }

    /// Replace a re-fetched message at the same position
    pub fn replace_in_place(&mut self, raw: RawMessage) -> bool {
        let Some(&slot) = self.index.get(&raw.id) else {
            debug!("Refetched message {} no longer shown", raw.id);
            return false;
        };
        let message = self.map_raw(raw);
        if message.delivery_state == Some(DeliveryState::Failed) {
            debug!("Refetched message {} failed to send, removing", message.id);
            self.remove(&message.id);
            return false;
        }
        self.slots[slot] = Some(message);
        self.bump();
        true
    }

    /// Show our own reaction toggle before the server confirms it
    pub fn apply_local_reaction(&mut self, id: &MessageId, kind: &ReactionKind, me: UserId) -> bool {
        let max = self.max_recent_reactors;
        let Some(message) = self.message_mut(id) else {
            return false;
        };
        match message.reactions.iter().position(|g| &g.kind == kind) {
            Some(i) => {
                let group = &mut message.reactions[i];
                if group.is_chosen {
                    group.is_chosen = false;
                    group.count = group.count.saturating_sub(1);
                    group.recent_reactors.retain(|u| *u != me);
                    if group.count == 0 {
                        message.reactions.remove(i);
                    }
                } else {
                    group.is_chosen = true;
                    group.count += 1;
                    group.recent_reactors.retain(|u| *u != me);
                    group.recent_reactors.insert(0, me);
                    group.recent_reactors.truncate(max);
                }
            }
            None => message.reactions.push(ReactionGroup {
                kind: kind.clone(),
                count: 1,
                is_chosen: true,
                recent_reactors: vec![me],
            }),
        }
        self.bump();
        true
    }

    /// Apply one live event. Returns collaborator work the event calls for.
    pub fn apply(&mut self, event: &UpdateEvent) -> Vec<Effect> {
        if event.chat_id() != self.chat_id {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match event {
            UpdateEvent::NewMessage { message } => {
                if self.contains(&message.id) {
                    debug!("Message {} already shown, dropping duplicate", message.id);
                } else {
                    let message = self.map_raw(message.clone());
                    self.insert(message, InsertPosition::Last);
                }
            }
            UpdateEvent::MessagesDeleted { message_ids, .. } => {
                let mut changed = false;
                for id in message_ids {
                    self.deleted.insert(*id);
                    changed |= self.detach(&MessageId::Confirmed(*id)).is_some();
                    if let Some(speculative) = self.identities.resolve(*id).map(str::to_string) {
                        changed |= self.detach(&MessageId::Speculative(speculative)).is_some();
                    }
                }
                if changed {
                    self.bump();
                }
            }
            UpdateEvent::SendSucceeded { old_id, new_id, .. } => {
                self.identities.record(old_id, *new_id);
                self.confirm_send(old_id, *new_id);
            }
            UpdateEvent::SendFailed {
                old_id,
                new_id,
                reason,
                ..
            } => {
                self.identities.record_failure(old_id, *new_id);
                warn!("Send of {} in chat {} failed: {}", old_id, self.chat_id, reason);
                self.remove(&MessageId::Speculative(old_id.clone()));
            }
            UpdateEvent::MessageContentChanged { message_id, .. }
            | UpdateEvent::MessageContentOpened { message_id, .. } => {
                let id = MessageId::Confirmed(*message_id);
                if self.contains(&id) {
                    effects.push(Effect::RefetchMessage(id));
                }
            }
            UpdateEvent::MessageInteraction {
                message_id, reactions, ..
            } => {
                let mut reactions = reactions.clone();
                self.bound_reactors(&mut reactions);
                let changed = match self.message_mut(&MessageId::Confirmed(*message_id)) {
                    Some(message) if message.reactions != reactions => {
                        message.reactions = reactions;
                        true
                    }
                    _ => false,
                };
                if changed {
                    self.bump();
                }
            }
            UpdateEvent::ReadOutbox {
                last_read_outbox_id, ..
            } => {
                if self.promote_seen(*last_read_outbox_id) {
                    self.bump();
                }
            }
            _ => {}
        }
        effects
    }

    fn confirm_send(&mut self, old_id: &str, new_id: i64) {
        let old = MessageId::Speculative(old_id.to_string());
        let new = MessageId::Confirmed(new_id);
        if !self.contains(&old) {
            return;
        }
        if self.contains(&new) {
            // the confirmed copy was already delivered as a new message
            debug!("Message {} already shown, dropping speculative {}", new_id, old_id);
            self.remove(&old);
            return;
        }
        self.reassign(&old, new.clone());
        let cursor = self.last_read_outbox;
        if let Some(message) = self.message_mut(&new) {
            message.delivery_state = Some(if new_id <= cursor {
                DeliveryState::Seen
            } else {
                DeliveryState::Delivered
            });
        }
    }

    /// delivered → seen for every confirmed id up to `cursor`
    fn promote_seen(&mut self, cursor: i64) -> bool {
        if cursor <= self.last_read_outbox {
            return false;
        }
        self.last_read_outbox = cursor;
        let mut changed = false;
        for message in self.slots.iter_mut().flatten() {
            let read = message.id.confirmed().map(|id| id <= cursor).unwrap_or(false);
            if read && message.delivery_state == Some(DeliveryState::Delivered) {
                message.delivery_state = Some(DeliveryState::Seen);
                changed = true;
            }
        }
        changed
    }

    fn bound_reactors(&self, reactions: &mut [ReactionGroup]) {
        for group in reactions.iter_mut() {
            group.recent_reactors.truncate(self.max_recent_reactors);
        }
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_mut()
    }

    fn day_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.day_offset).date_naive()
    }

    /// Take a message out of the arena without touching the revision
    fn detach(&mut self, id: &MessageId) -> Option<Message> {
        let slot = self.index.remove(id)?;
        if let Some(pos) = self.order.iter().position(|s| *s == slot) {
            self.order.remove(pos);
        }
        self.free.push(slot);
        self.slots[slot].take()
    }

    fn place(&mut self, message: Message, at: usize) {
        let id = message.id.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(message);
                slot
            }
            None => {
                self.slots.push(Some(message));
                self.slots.len() - 1
            }
        };
        self.order.insert(at, slot);
        self.index.insert(id, slot);
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

/// Newest page plus one older page when the newest holds a single message
pub async fn fetch_initial_page(source: &dyn PaginationSource, chat_id: ChatId, limit: usize) -> Result<Vec<RawMessage>> {
    let mut page = source.fetch_messages(HistoryRequest::newest(chat_id, limit)).await?;
    if page.len() == 1 {
        if let Some(pivot) = page[0].id.confirmed() {
            let mut older = source
                .fetch_messages(HistoryRequest::older(chat_id, pivot, limit))
                .await?;
            older.append(&mut page);
            page = older;
        }
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageContent;
    use chrono::TimeZone;

    const DAY: i64 = 86_400;
    const T0: i64 = 1_700_000_000 - 1_700_000_000 % DAY;

    fn raw(id: MessageId, secs: i64, outgoing: bool) -> RawMessage {
        RawMessage {
            id,
            chat_id: 1,
            sender_id: if outgoing { 10 } else { 20 },
            sender_name: if outgoing { "Me" } else { "Ann" }.to_string(),
            date: Utc.timestamp_opt(secs, 0).unwrap(),
            is_outgoing: outgoing,
            sending_state: None,
            reply_to: None,
            reactions: Vec::new(),
            content: MessageContent::Text {
                text: "hi".to_string(),
            },
        }
    }

    fn incoming(id: i64, secs: i64) -> RawMessage {
        raw(MessageId::Confirmed(id), secs, false)
    }

    fn speculative(local: &str) -> RawMessage {
        let mut m = raw(MessageId::Speculative(local.to_string()), T0 + 100, true);
        m.sending_state = Some(SendingState::Pending);
        m
    }

    fn list() -> MessageListReconciler {
        MessageListReconciler::new(1, false, &SyncConfig::default())
    }

    fn confirmed(id: i64) -> MessageId {
        MessageId::Confirmed(id)
    }

    fn local(id: &str) -> MessageId {
        MessageId::Speculative(id.to_string())
    }

    #[test]
    fn test_send_lifecycle_scenario() {
        let mut timeline = list();
        let message = timeline.map_raw(speculative("local-7"));
        assert!(timeline.insert(message, InsertPosition::Last));
        assert_eq!(
            timeline.get(&local("local-7")).unwrap().delivery_state,
            Some(DeliveryState::Sending)
        );

        timeline.apply(&UpdateEvent::SendSucceeded {
            chat_id: 1,
            old_id: "local-7".to_string(),
            new_id: 42,
        });
        assert!(!timeline.contains(&local("local-7")));
        assert_eq!(timeline.ids(), vec![confirmed(42)]);
        assert_eq!(
            timeline.get(&confirmed(42)).unwrap().delivery_state,
            Some(DeliveryState::Delivered)
        );

        timeline.apply(&UpdateEvent::ReadOutbox {
            chat_id: 1,
            last_read_outbox_id: 50,
        });
        assert_eq!(
            timeline.get(&confirmed(42)).unwrap().delivery_state,
            Some(DeliveryState::Seen)
        );
    }

    #[test]
    fn test_reassign_keeps_position() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(1, T0), incoming(2, T0 + 1)], PageEdge::Older);
        let message = timeline.map_raw(speculative("local-1"));
        timeline.insert(message, InsertPosition::At(1));

        timeline.apply(&UpdateEvent::SendSucceeded {
            chat_id: 1,
            old_id: "local-1".to_string(),
            new_id: 99,
        });
        assert_eq!(timeline.ids(), vec![confirmed(1), confirmed(99), confirmed(2)]);
    }

    #[test]
    fn test_delete_after_confirmation() {
        let mut timeline = list();
        let message = timeline.map_raw(speculative("local-7"));
        timeline.insert(message, InsertPosition::Last);
        timeline.apply(&UpdateEvent::SendSucceeded {
            chat_id: 1,
            old_id: "local-7".to_string(),
            new_id: 42,
        });

        timeline.apply(&UpdateEvent::MessagesDeleted {
            chat_id: 1,
            message_ids: vec![42],
        });
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_delete_resolves_speculative_entry() {
        let mut timeline = list();
        let message = timeline.map_raw(speculative("local-3"));
        timeline.insert(message, InsertPosition::Last);
        // the confirmed copy shows up before the send confirmation
        timeline.apply(&UpdateEvent::NewMessage {
            message: raw(confirmed(42), T0 + 100, true),
        });
        timeline.identities.record("local-3", 42);
        assert_eq!(timeline.len(), 2);

        timeline.apply(&UpdateEvent::MessagesDeleted {
            chat_id: 1,
            message_ids: vec![42],
        });
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_confirmation_after_duplicate_keeps_one_entry() {
        let mut timeline = list();
        let message = timeline.map_raw(speculative("local-3"));
        timeline.insert(message, InsertPosition::Last);
        timeline.apply(&UpdateEvent::NewMessage {
            message: raw(confirmed(42), T0 + 100, true),
        });

        timeline.apply(&UpdateEvent::SendSucceeded {
            chat_id: 1,
            old_id: "local-3".to_string(),
            new_id: 42,
        });
        assert_eq!(timeline.ids(), vec![confirmed(42)]);
    }

    #[test]
    fn test_send_failure_removes_entry() {
        let mut timeline = list();
        let message = timeline.map_raw(speculative("local-9"));
        timeline.insert(message, InsertPosition::Last);

        timeline.apply(&UpdateEvent::SendFailed {
            chat_id: 1,
            old_id: "local-9".to_string(),
            new_id: 77,
            reason: "flood wait".to_string(),
        });
        assert!(timeline.is_empty());
        assert_eq!(timeline.identities().resolve(77), Some("local-9"));
    }

    #[test]
    fn test_insert_refuses_failed_and_replaces_stale_copy() {
        let mut timeline = list();
        let mut failed = speculative("local-1");
        failed.sending_state = Some(SendingState::Failed);
        let failed = timeline.map_raw(failed);
        assert!(!timeline.insert(failed, InsertPosition::Last));
        assert!(timeline.is_empty());

        timeline.merge_page(vec![incoming(1, T0), incoming(2, T0 + 1)], PageEdge::Older);
        let mut fresh = timeline.map_raw(incoming(1, T0));
        fresh.content = MessageContent::Text {
            text: "edited".to_string(),
        };
        assert!(timeline.insert(fresh, InsertPosition::Last));
        assert_eq!(timeline.ids(), vec![confirmed(2), confirmed(1)]);
    }

    #[test]
    fn test_new_message_duplicate_is_dropped() {
        let mut timeline = list();
        timeline.apply(&UpdateEvent::NewMessage { message: incoming(5, T0) });
        let revision = timeline.revision();
        timeline.apply(&UpdateEvent::NewMessage { message: incoming(5, T0) });
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.revision(), revision);
    }

    #[test]
    fn test_merge_page_is_idempotent() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(10, T0 + 10), incoming(11, T0 + 11)], PageEdge::Older);

        let older = vec![incoming(7, T0 + 7), incoming(8, T0 + 8), incoming(9, T0 + 9)];
        timeline.merge_page(older.clone(), PageEdge::Older);
        let once = timeline.ids();
        timeline.merge_page(older, PageEdge::Older);
        assert_eq!(timeline.ids(), once);
        assert_eq!(
            once,
            vec![confirmed(7), confirmed(8), confirmed(9), confirmed(10), confirmed(11)]
        );
    }

    #[test]
    fn test_reloading_newest_page_keeps_order() {
        let mut timeline = list();
        let newest = vec![incoming(8, T0 + 8), incoming(9, T0 + 9), incoming(10, T0 + 10)];
        timeline.merge_page(newest.clone(), PageEdge::Older);
        timeline.merge_page(
            vec![incoming(5, T0 + 5), incoming(6, T0 + 6), incoming(7, T0 + 7)],
            PageEdge::Older,
        );
        let before = timeline.ids();

        assert_eq!(timeline.merge_page(newest, PageEdge::Older), 0);
        assert_eq!(timeline.ids(), before);
        assert_eq!(before, (5..=10).map(confirmed).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_older_page_twice_with_another_between() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(10, T0 + 10), incoming(11, T0 + 11)], PageEdge::Older);
        let first = vec![incoming(7, T0 + 7), incoming(8, T0 + 8), incoming(9, T0 + 9)];
        timeline.merge_page(first.clone(), PageEdge::Older);
        timeline.merge_page(
            vec![incoming(4, T0 + 4), incoming(5, T0 + 5), incoming(6, T0 + 6)],
            PageEdge::Older,
        );
        timeline.merge_page(first, PageEdge::Older);

        assert_eq!(timeline.ids(), (4..=11).map(confirmed).collect::<Vec<_>>());
    }

    #[test]
    fn test_overlapping_page_fills_around_shown_entries() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(3, T0 + 3), incoming(4, T0 + 4)], PageEdge::Older);
        timeline.apply(&UpdateEvent::NewMessage {
            message: incoming(6, T0 + 6),
        });

        // 2 precedes the first shown entry, 5 follows 4
        let mut edited = incoming(4, T0 + 4);
        edited.content = MessageContent::Text {
            text: "edited".to_string(),
        };
        let added = timeline.merge_page(
            vec![incoming(2, T0 + 2), incoming(3, T0 + 3), edited, incoming(5, T0 + 5)],
            PageEdge::Older,
        );
        assert_eq!(added, 2);
        assert_eq!(timeline.ids(), (2..=6).map(confirmed).collect::<Vec<_>>());
        assert_eq!(timeline.get(&confirmed(4)).unwrap().content.preview_text(), "edited");
    }

    #[test]
    fn test_deleted_message_is_not_revived_by_stale_page() {
        let mut timeline = list();
        let page = vec![incoming(1, T0 + 1), incoming(2, T0 + 2), incoming(3, T0 + 3)];
        timeline.merge_page(page.clone(), PageEdge::Older);
        timeline.apply(&UpdateEvent::MessagesDeleted {
            chat_id: 1,
            message_ids: vec![2],
        });

        timeline.merge_page(page.clone(), PageEdge::Older);
        timeline.apply(&UpdateEvent::NewMessage {
            message: incoming(2, T0 + 2),
        });
        assert_eq!(timeline.ids(), vec![confirmed(1), confirmed(3)]);
        assert!(timeline.is_deleted(&confirmed(2)));

        timeline.close();
        timeline.merge_page(page, PageEdge::Older);
        assert_eq!(timeline.ids(), (1..=3).map(confirmed).collect::<Vec<_>>());
    }

    #[test]
    fn test_refetched_failed_send_is_removed() {
        let mut timeline = list();
        timeline.merge_page(vec![raw(confirmed(5), T0, true)], PageEdge::Older);

        let mut failed = raw(confirmed(5), T0, true);
        failed.sending_state = Some(SendingState::Failed);
        assert!(!timeline.replace_in_place(failed));
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_date_separators() {
        let mut timeline = list();
        timeline.merge_page(
            vec![
                incoming(1, T0 + 10),
                incoming(2, T0 + 20),
                incoming(3, T0 + DAY + 5),
                incoming(4, T0 + 3 * DAY),
            ],
            PageEdge::Older,
        );
        let items = timeline.timeline();
        let keys: Vec<String> = items.iter().map(TimelineItem::key).collect();

        let day = |offset: i64| {
            Utc.timestamp_opt(T0 + offset, 0)
                .unwrap()
                .date_naive()
                .to_string()
        };
        assert_eq!(
            keys,
            vec![
                "msg:1".to_string(),
                "msg:2".to_string(),
                format!("date:{}", day(DAY)),
                "msg:3".to_string(),
                format!("date:{}", day(3 * DAY)),
                "msg:4".to_string(),
            ]
        );
    }

    #[test]
    fn test_date_separators_follow_offset() {
        let config = SyncConfig {
            utc_offset_secs: 3600,
            ..SyncConfig::default()
        };
        let mut timeline = MessageListReconciler::new(1, false, &config);
        // 23:30 and 23:50 UTC; the second is already the next day at +01:00
        timeline.merge_page(
            vec![incoming(1, T0 + DAY - 1800), incoming(2, T0 + DAY - 600)],
            PageEdge::Older,
        );
        assert_eq!(timeline.timeline().len(), 2);

        let mut shifted = list();
        shifted.merge_page(
            vec![incoming(1, T0 + DAY - 4000), incoming(2, T0 + DAY - 600)],
            PageEdge::Older,
        );
        assert_eq!(shifted.timeline().len(), 2);

        let mut split = MessageListReconciler::new(1, false, &config);
        split.merge_page(
            vec![incoming(1, T0 + DAY - 4000), incoming(2, T0 + DAY - 600)],
            PageEdge::Older,
        );
        assert_eq!(split.timeline().len(), 3);
    }

    #[test]
    fn test_read_outbox_is_a_range_scan() {
        let mut timeline = list();
        timeline.merge_page(
            vec![
                raw(confirmed(1), T0, true),
                raw(confirmed(2), T0 + 1, true),
                incoming(3, T0 + 2),
                raw(confirmed(4), T0 + 3, true),
            ],
            PageEdge::Older,
        );
        timeline.apply(&UpdateEvent::ReadOutbox {
            chat_id: 1,
            last_read_outbox_id: 2,
        });

        let states: Vec<Option<DeliveryState>> =
            timeline.messages().map(|m| m.delivery_state).collect();
        assert_eq!(
            states,
            vec![
                Some(DeliveryState::Seen),
                Some(DeliveryState::Seen),
                None,
                Some(DeliveryState::Delivered),
            ]
        );

        // cursor never moves backwards
        timeline.apply(&UpdateEvent::ReadOutbox {
            chat_id: 1,
            last_read_outbox_id: 1,
        });
        let msg = timeline.get(&confirmed(2)).unwrap();
        assert_eq!(msg.delivery_state, Some(DeliveryState::Seen));
    }

    #[test]
    fn test_interaction_replaces_reactions_only() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(1, T0)], PageEdge::Older);
        let reactions = vec![ReactionGroup {
            kind: ReactionKind::Emoji("👍".to_string()),
            count: 5,
            is_chosen: false,
            recent_reactors: vec![1, 2, 3, 4, 5],
        }];
        timeline.apply(&UpdateEvent::MessageInteraction {
            chat_id: 1,
            message_id: 1,
            reactions,
        });

        let message = timeline.get(&confirmed(1)).unwrap();
        assert_eq!(message.reactions[0].count, 5);
        assert_eq!(message.reactions[0].recent_reactors, vec![1, 2, 3]);
        assert_eq!(message.content, MessageContent::Text { text: "hi".to_string() });
    }

    #[test]
    fn test_content_events_request_refetch() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(1, T0), incoming(2, T0 + 1)], PageEdge::Older);

        let effects = timeline.apply(&UpdateEvent::MessageContentOpened {
            chat_id: 1,
            message_id: 1,
        });
        assert_eq!(effects, vec![Effect::RefetchMessage(confirmed(1))]);
        assert!(timeline
            .apply(&UpdateEvent::MessageContentChanged {
                chat_id: 1,
                message_id: 9,
            })
            .is_empty());

        let mut refetched = incoming(1, T0);
        refetched.content = MessageContent::VoiceNote {
            duration_secs: 3,
            waveform: Vec::new(),
            is_listened: true,
        };
        assert!(timeline.replace_in_place(refetched));
        assert_eq!(timeline.position_of(&confirmed(1)), Some(0));
        assert!(matches!(
            timeline.get(&confirmed(1)).unwrap().content,
            MessageContent::VoiceNote { is_listened: true, .. }
        ));
    }

    #[test]
    fn test_local_reaction_toggle() {
        let mut timeline = list();
        timeline.merge_page(vec![incoming(1, T0)], PageEdge::Older);
        let heart = ReactionKind::Emoji("❤️".to_string());

        assert!(timeline.apply_local_reaction(&confirmed(1), &heart, 10));
        let group = &timeline.get(&confirmed(1)).unwrap().reactions[0];
        assert_eq!((group.count, group.is_chosen), (1, true));
        assert_eq!(group.recent_reactors, vec![10]);

        assert!(timeline.apply_local_reaction(&confirmed(1), &heart, 10));
        assert!(timeline.get(&confirmed(1)).unwrap().reactions.is_empty());
        assert!(!timeline.apply_local_reaction(&confirmed(5), &heart, 10));
    }

    #[test]
    fn test_sender_display_and_reply_preview() {
        let mut group_chat = list();
        group_chat.merge_page(vec![incoming(1, T0)], PageEdge::Older);
        let mut reply = raw(confirmed(2), T0 + 1, true);
        reply.reply_to = Some(confirmed(1));
        let mapped = group_chat.map_raw(reply);

        assert!(mapped.sender.hidden);
        let reference = mapped.reply.unwrap();
        assert_eq!(reference.sender_name.as_deref(), Some("Ann"));
        assert_eq!(reference.preview.as_deref(), Some("hi"));
        assert!(!group_chat.get(&confirmed(1)).unwrap().sender.hidden);

        let private = MessageListReconciler::new(1, true, &SyncConfig::default());
        assert!(private.map_raw(incoming(1, T0)).sender.hidden);
    }

    #[test]
    fn test_events_for_other_chats_are_ignored() {
        let mut timeline = list();
        let mut other = incoming(1, T0);
        other.chat_id = 2;
        timeline.apply(&UpdateEvent::NewMessage { message: other });
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_close_clears_identities() {
        let mut timeline = list();
        timeline.apply(&UpdateEvent::SendSucceeded {
            chat_id: 1,
            old_id: "local-1".to_string(),
            new_id: 5,
        });
        assert_eq!(timeline.identities().len(), 1);
        timeline.close();
        assert!(timeline.identities().is_empty());
    }
}
