/// Serialized update contexts: one task per chat list and per open conversation.
///
/// A task owns its reconciler and handles live events, collaborator results
/// and commands one at a time, so no reconciler is ever touched concurrently.
/// Collaborator calls run in spawned tasks and report back through the
/// owning task's outcome channel. Views read snapshots from a watch channel.
use crate::chat_list::ChatListReconciler;
use crate::collaborator::{HistoryRequest, PaginationSource, SendCollaborator, VoiceNote};
use crate::config::SyncConfig;
use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{Result, SyncError};
use crate::events::{Effect, Topic};
use crate::hydrate::HydrateTracker;
use crate::identity_map::Resolution;
use crate::message_list::{fetch_initial_page, InsertPosition, MessageListReconciler, PageEdge};
use crate::types::{
    ChatId, ChatListSnapshot, Folder, LoadState, MessageId, RawChat, RawMessage, ReactionKind,
    TimelineSnapshot,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run collaborator work off the update context and queue its outcome
fn spawn_work<T, F>(outcomes: &mpsc::Sender<T>, work: F)
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let tx = outcomes.clone();
    tokio::spawn(async move {
        // the context may be gone by now
        let _ = tx.send(work.await).await;
    });
}

async fn wait_for_snapshot<T, P>(mut rx: watch::Receiver<T>, mut predicate: P) -> Result<T>
where
    T: Clone,
    P: FnMut(&T) -> bool,
{
    loop {
        let current = rx.borrow_and_update().clone();
        if predicate(&current) {
            return Ok(current);
        }
        rx.changed()
            .await
            .map_err(|_| SyncError::ChannelClosed("snapshot feed".to_string()))?;
    }
}

fn closed<T>(_: T) -> SyncError {
    SyncError::ChannelClosed("update context stopped".to_string())
}

// ---------------------------------------------------------------------------
// Chat list
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ChatListCommand {
    LoadInitial,
    LoadMore,
    Retry,
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatPage {
    Initial,
    More,
}

enum ChatListOutcome {
    Page {
        page: ChatPage,
        result: Result<Vec<RawChat>>,
    },
    Hydrated {
        chat_id: ChatId,
        result: Result<RawChat>,
    },
    CountersRefreshed {
        chat_id: ChatId,
        result: Result<RawChat>,
    },
}

struct ChatListContext {
    reconciler: ChatListReconciler,
    source: Arc<dyn PaginationSource>,
    page_size: usize,
    hydrates: HydrateTracker<ChatId>,
    refreshes: HydrateTracker<ChatId>,
    page_in_flight: Option<ChatPage>,
    failed_page: Option<ChatPage>,
    outcomes: mpsc::Sender<ChatListOutcome>,
    in_flight: usize,
    flush_waiters: Vec<oneshot::Sender<()>>,
    snapshots: watch::Sender<ChatListSnapshot>,
    published: u64,
}

impl ChatListContext {
    async fn run(
        mut self,
        mut events: Subscription,
        mut outcomes: mpsc::Receiver<ChatListOutcome>,
        mut commands: mpsc::Receiver<ChatListCommand>,
    ) {
        info!("Chat list for {} started", self.reconciler.folder());
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => {
                    let effects = self.reconciler.apply(&event);
                    self.run_effects(effects);
                }
                Some(outcome) = outcomes.recv() => self.on_outcome(outcome),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
            self.publish();
        }
        info!("Chat list for {} stopped", self.reconciler.folder());
    }

    fn on_command(&mut self, command: ChatListCommand) {
        match command {
            ChatListCommand::LoadInitial => self.start_page(ChatPage::Initial),
            ChatListCommand::LoadMore => self.start_page(ChatPage::More),
            ChatListCommand::Retry => match self.failed_page {
                Some(page) => self.start_page(page),
                None => debug!("Nothing to retry for {}", self.reconciler.folder()),
            },
            ChatListCommand::Flush(waiter) => self.flush_waiters.push(waiter),
        }
    }

    fn start_page(&mut self, page: ChatPage) {
        if self.page_in_flight.is_some() {
            debug!("Chat page already loading, dropping {:?}", page);
            return;
        }
        let limit = match page {
            ChatPage::Initial => self.page_size,
            ChatPage::More => self.reconciler.len() + self.page_size,
        };
        self.page_in_flight = Some(page);
        self.reconciler.set_load_state(LoadState::Loading);

        let source = self.source.clone();
        let folder = self.reconciler.folder().clone();
        self.in_flight += 1;
        spawn_work(&self.outcomes, async move {
            let result = source.fetch_chats(&folder, limit).await;
            ChatListOutcome::Page { page, result }
        });
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::HydrateChat(chat_id) => {
                    if !self.hydrates.begin(&chat_id) {
                        continue;
                    }
                    let source = self.source.clone();
                    self.in_flight += 1;
                    spawn_work(&self.outcomes, async move {
                        let result = source.fetch_chat(chat_id).await;
                        ChatListOutcome::Hydrated { chat_id, result }
                    });
                }
                Effect::RefreshCounters(chat_id) => {
                    if !self.refreshes.begin(&chat_id) {
                        continue;
                    }
                    let source = self.source.clone();
                    self.in_flight += 1;
                    spawn_work(&self.outcomes, async move {
                        let result = source.fetch_chat(chat_id).await;
                        ChatListOutcome::CountersRefreshed { chat_id, result }
                    });
                }
                Effect::RefetchMessage(id) => debug!("Chat list ignores refetch of {}", id),
            }
        }
    }

    fn on_outcome(&mut self, outcome: ChatListOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            ChatListOutcome::Page { page, result } => {
                self.page_in_flight = None;
                match result {
                    Ok(chats) => {
                        match page {
                            ChatPage::Initial => self.reconciler.replace_all(chats),
                            ChatPage::More => {
                                let added = self.reconciler.merge_page(chats);
                                debug!("Merged {} more chats", added);
                            }
                        }
                        self.failed_page = None;
                        self.reconciler.set_load_state(LoadState::Idle);
                    }
                    Err(e) => {
                        warn!("Loading chats of {} failed: {}", self.reconciler.folder(), e);
                        self.failed_page = Some(page);
                        self.reconciler.set_load_state(LoadState::Failed(e.to_string()));
                    }
                }
            }
            ChatListOutcome::Hydrated { chat_id, result } => match result {
                Ok(raw) => {
                    let inserted = self.reconciler.insert_hydrated(raw);
                    self.hydrates.complete(&chat_id, inserted);
                }
                Err(e) => {
                    debug!("Hydrating chat {} failed: {}", chat_id, e);
                    self.hydrates.complete(&chat_id, false);
                }
            },
            ChatListOutcome::CountersRefreshed { chat_id, result } => match result {
                Ok(raw) => {
                    self.reconciler.refresh_counters(&raw);
                    self.refreshes.complete(&chat_id, true);
                }
                Err(e) => {
                    debug!("Refreshing counters of chat {} failed: {}", chat_id, e);
                    self.refreshes.complete(&chat_id, false);
                }
            },
        }
    }

    fn publish(&mut self) {
        if self.reconciler.revision() != self.published {
            self.published = self.reconciler.revision();
            self.snapshots.send_replace(self.reconciler.snapshot());
        }
        if self.in_flight == 0 {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

/// Owner side of a running chat list. Dropping it stops the context.
pub struct ChatListHandle {
    commands: mpsc::Sender<ChatListCommand>,
    snapshots: watch::Receiver<ChatListSnapshot>,
    task: JoinHandle<()>,
}

/// Start the update context for one folder. The subscription is taken before
/// this returns, so no event published afterwards is missed.
pub fn spawn_chat_list(
    folder: Folder,
    dispatcher: &Dispatcher,
    source: Arc<dyn PaginationSource>,
    config: SyncConfig,
) -> ChatListHandle {
    let events = dispatcher.subscribe(Topic::ChatList);
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (outcome_tx, outcome_rx) = mpsc::channel(config.command_buffer.max(1));
    let reconciler = ChatListReconciler::new(folder);
    let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());

    let context = ChatListContext {
        published: reconciler.revision(),
        reconciler,
        source,
        page_size: config.chat_page_size,
        hydrates: HydrateTracker::new(config.max_hydrate_attempts),
        refreshes: HydrateTracker::new(config.max_hydrate_attempts),
        page_in_flight: None,
        failed_page: None,
        outcomes: outcome_tx,
        in_flight: 0,
        flush_waiters: Vec::new(),
        snapshots: snapshot_tx,
    };
    let task = tokio::spawn(context.run(events, outcome_rx, command_rx));

    ChatListHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        task,
    }
}

impl ChatListHandle {
    pub fn snapshot(&self) -> ChatListSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Change notifications; each carries a fresh revision
    pub fn subscribe(&self) -> watch::Receiver<ChatListSnapshot> {
        self.snapshots.clone()
    }

    pub async fn wait_for<P>(&self, predicate: P) -> Result<ChatListSnapshot>
    where
        P: FnMut(&ChatListSnapshot) -> bool,
    {
        wait_for_snapshot(self.snapshots.clone(), predicate).await
    }

    pub async fn load_initial(&self) -> Result<()> {
        self.commands.send(ChatListCommand::LoadInitial).await.map_err(closed)
    }

    pub async fn load_more(&self) -> Result<()> {
        self.commands.send(ChatListCommand::LoadMore).await.map_err(closed)
    }

    /// Repeat the last failed page load
    pub async fn retry(&self) -> Result<()> {
        self.commands.send(ChatListCommand::Retry).await.map_err(closed)
    }

    /// Resolves once every event published before the call is applied and
    /// no collaborator call is outstanding
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(ChatListCommand::Flush(tx)).await.map_err(closed)?;
        rx.await.map_err(closed)
    }

    pub async fn shutdown(self) -> Result<()> {
        let Self { commands, task, .. } = self;
        drop(commands);
        task.await
            .map_err(|e| SyncError::ChannelClosed(format!("chat list task: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

enum ConversationCommand {
    LoadInitial,
    LoadOlder,
    LoadNewer,
    Retry,
    SendText {
        text: String,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    SendVoiceNote {
        note: VoiceNote,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    SendReaction {
        message_id: i64,
        reaction: ReactionKind,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush(oneshot::Sender<()>),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryPage {
    Initial,
    Older,
    Newer,
}

enum ConversationOutcome {
    Page {
        page: HistoryPage,
        result: Result<Vec<RawMessage>>,
    },
    Refetched {
        message_id: i64,
        result: Result<RawMessage>,
    },
    Sent {
        result: Result<RawMessage>,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    Reacted {
        message_id: i64,
        reaction: ReactionKind,
        result: Result<()>,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct ConversationContext {
    reconciler: MessageListReconciler,
    source: Arc<dyn PaginationSource>,
    sender: Arc<dyn SendCollaborator>,
    page_size: usize,
    refetches: HydrateTracker<i64>,
    page_in_flight: Option<HistoryPage>,
    failed_page: Option<HistoryPage>,
    outcomes: mpsc::Sender<ConversationOutcome>,
    in_flight: usize,
    flush_waiters: Vec<oneshot::Sender<()>>,
    snapshots: watch::Sender<TimelineSnapshot>,
    published: u64,
}

impl ConversationContext {
    async fn run(
        mut self,
        mut events: Subscription,
        mut outcomes: mpsc::Receiver<ConversationOutcome>,
        mut commands: mpsc::Receiver<ConversationCommand>,
    ) {
        let chat_id = self.reconciler.chat_id();
        info!("Conversation {} opened", chat_id);
        loop {
            let keep_running = tokio::select! {
                biased;
                Some(event) = events.recv() => {
                    let effects = self.reconciler.apply(&event);
                    self.run_effects(effects);
                    true
                }
                Some(outcome) = outcomes.recv() => {
                    self.on_outcome(outcome);
                    true
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => false,
                },
            };
            self.publish();
            if !keep_running {
                break;
            }
        }
        self.reconciler.close();
        // pending flushes would otherwise wait on a dead context
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("Conversation {} closed", chat_id);
    }

    /// Returns false when the context should stop
    fn on_command(&mut self, command: ConversationCommand) -> bool {
        match command {
            ConversationCommand::LoadInitial => self.start_page(HistoryPage::Initial),
            ConversationCommand::LoadOlder => self.start_page(HistoryPage::Older),
            ConversationCommand::LoadNewer => self.start_page(HistoryPage::Newer),
            ConversationCommand::Retry => match self.failed_page {
                Some(page) => self.start_page(page),
                None => debug!("Nothing to retry for chat {}", self.reconciler.chat_id()),
            },
            ConversationCommand::SendText { text, reply } => {
                let sender = self.sender.clone();
                let chat_id = self.reconciler.chat_id();
                self.in_flight += 1;
                spawn_work(&self.outcomes, async move {
                    let result = sender.send_text(chat_id, text).await;
                    ConversationOutcome::Sent { result, reply }
                });
            }
            ConversationCommand::SendVoiceNote { note, reply } => {
                let sender = self.sender.clone();
                let chat_id = self.reconciler.chat_id();
                self.in_flight += 1;
                spawn_work(&self.outcomes, async move {
                    let result = sender.send_voice_note(chat_id, note).await;
                    ConversationOutcome::Sent { result, reply }
                });
            }
            ConversationCommand::SendReaction {
                message_id,
                reaction,
                reply,
            } => self.send_reaction(message_id, reaction, reply),
            ConversationCommand::Flush(waiter) => self.flush_waiters.push(waiter),
            ConversationCommand::Close => return false,
        }
        true
    }

    fn start_page(&mut self, requested: HistoryPage) {
        if self.page_in_flight.is_some() {
            debug!("History page already loading, dropping {:?}", requested);
            return;
        }
        let chat_id = self.reconciler.chat_id();
        let limit = self.page_size;
        // paging from an empty timeline starts from the newest page
        let (page, request) = match requested {
            HistoryPage::Initial => (HistoryPage::Initial, None),
            HistoryPage::Older => match self.reconciler.oldest_confirmed_id() {
                Some(pivot) => (requested, Some(HistoryRequest::older(chat_id, pivot, limit))),
                None => (HistoryPage::Initial, None),
            },
            HistoryPage::Newer => match self.reconciler.newest_confirmed_id() {
                Some(pivot) => (requested, Some(HistoryRequest::newer(chat_id, pivot, limit))),
                None => (HistoryPage::Initial, None),
            },
        };
        self.page_in_flight = Some(page);
        self.reconciler.set_load_state(LoadState::Loading);

        let source = self.source.clone();
        self.in_flight += 1;
        spawn_work(&self.outcomes, async move {
            let result = match request {
                Some(request) => source.fetch_messages(request).await,
                None => fetch_initial_page(source.as_ref(), chat_id, limit).await,
            };
            ConversationOutcome::Page { page, result }
        });
    }

    fn send_reaction(&mut self, message_id: i64, reaction: ReactionKind, reply: oneshot::Sender<Result<()>>) {
        let me = self.sender.own_user_id();
        let id = MessageId::Confirmed(message_id);
        if !self.reconciler.apply_local_reaction(&id, &reaction, me) {
            let _ = reply.send(Err(SyncError::NotFound(format!("message {}", message_id))));
            return;
        }
        let sender = self.sender.clone();
        let chat_id = self.reconciler.chat_id();
        self.in_flight += 1;
        spawn_work(&self.outcomes, async move {
            let result = sender.send_reaction(chat_id, message_id, reaction.clone()).await;
            ConversationOutcome::Reacted {
                message_id,
                reaction,
                result,
                reply,
            }
        });
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::RefetchMessage(id) => {
                    let Some(message_id) = id.confirmed() else {
                        continue;
                    };
                    if !self.refetches.begin(&message_id) {
                        continue;
                    }
                    let source = self.source.clone();
                    let chat_id = self.reconciler.chat_id();
                    self.in_flight += 1;
                    spawn_work(&self.outcomes, async move {
                        let result = source.fetch_message(chat_id, message_id).await;
                        ConversationOutcome::Refetched { message_id, result }
                    });
                }
                other => debug!("Conversation ignores {:?}", other),
            }
        }
    }

    fn on_outcome(&mut self, outcome: ConversationOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            ConversationOutcome::Page { page, result } => {
                self.page_in_flight = None;
                match result {
                    Ok(messages) => {
                        let edge = match page {
                            HistoryPage::Newer => PageEdge::Newer,
                            HistoryPage::Initial | HistoryPage::Older => PageEdge::Older,
                        };
                        let added = self.reconciler.merge_page(messages, edge);
                        debug!("Chat {}: {:?} page added {} messages", self.reconciler.chat_id(), page, added);
                        self.failed_page = None;
                        self.reconciler.set_load_state(LoadState::Idle);
                    }
                    Err(e) => {
                        warn!("Loading history of chat {} failed: {}", self.reconciler.chat_id(), e);
                        self.failed_page = Some(page);
                        self.reconciler.set_load_state(LoadState::Failed(e.to_string()));
                    }
                }
            }
            ConversationOutcome::Refetched { message_id, result } => match result {
                Ok(raw) => {
                    self.reconciler.replace_in_place(raw);
                    self.refetches.complete(&message_id, true);
                }
                Err(e) => {
                    debug!("Refetching message {} failed: {}", message_id, e);
                    self.refetches.complete(&message_id, false);
                }
            },
            ConversationOutcome::Sent { result, reply } => {
                let result = result.map(|raw| self.place_sent(raw));
                if let Err(e) = &result {
                    warn!("Send in chat {} failed: {}", self.reconciler.chat_id(), e);
                }
                let _ = reply.send(result);
            }
            ConversationOutcome::Reacted {
                message_id,
                reaction,
                result,
                reply,
            } => {
                if let Err(e) = &result {
                    warn!("Reaction on message {} failed: {}", message_id, e);
                    let me = self.sender.own_user_id();
                    // toggling again undoes the local change
                    self.reconciler
                        .apply_local_reaction(&MessageId::Confirmed(message_id), &reaction, me);
                }
                let _ = reply.send(result);
            }
        }
    }

    /// Show a freshly started send. The outcome may already have arrived on
    /// the event feed, in which case the identity map says where it went.
    fn place_sent(&mut self, mut raw: RawMessage) -> MessageId {
        let resolution = match &raw.id {
            MessageId::Speculative(local) => self.reconciler.identities().lookup(local),
            MessageId::Confirmed(_) => None,
        };
        match resolution {
            Some(Resolution::Confirmed(new_id)) => {
                raw.id = MessageId::Confirmed(new_id);
                raw.sending_state = None;
            }
            Some(Resolution::Failed(_)) => {
                debug!("Send {} already failed, not shown", raw.id);
                return raw.id;
            }
            None => {}
        }
        let id = raw.id.clone();
        if !self.reconciler.contains(&id) {
            let message = self.reconciler.map_raw(raw);
            self.reconciler.insert(message, InsertPosition::Last);
        }
        id
    }

    fn publish(&mut self) {
        if self.reconciler.revision() != self.published {
            self.published = self.reconciler.revision();
            self.snapshots.send_replace(self.reconciler.snapshot());
        }
        if self.in_flight == 0 {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

/// Owner side of an open conversation
pub struct ConversationHandle {
    chat_id: ChatId,
    commands: mpsc::Sender<ConversationCommand>,
    snapshots: watch::Receiver<TimelineSnapshot>,
    task: JoinHandle<()>,
}

/// Open a conversation view. `is_private` hides sender names.
pub fn spawn_conversation(
    chat_id: ChatId,
    is_private: bool,
    dispatcher: &Dispatcher,
    source: Arc<dyn PaginationSource>,
    sender: Arc<dyn SendCollaborator>,
    config: SyncConfig,
) -> ConversationHandle {
    let events = dispatcher.subscribe(Topic::Conversation(chat_id));
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (outcome_tx, outcome_rx) = mpsc::channel(config.command_buffer.max(1));
    let reconciler = MessageListReconciler::new(chat_id, is_private, &config);
    let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot());

    let context = ConversationContext {
        published: reconciler.revision(),
        reconciler,
        source,
        sender,
        page_size: config.message_page_size,
        refetches: HydrateTracker::new(config.max_hydrate_attempts),
        page_in_flight: None,
        failed_page: None,
        outcomes: outcome_tx,
        in_flight: 0,
        flush_waiters: Vec::new(),
        snapshots: snapshot_tx,
    };
    let task = tokio::spawn(context.run(events, outcome_rx, command_rx));

    ConversationHandle {
        chat_id,
        commands: command_tx,
        snapshots: snapshot_rx,
        task,
    }
}

impl ConversationHandle {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshots.clone()
    }

    pub async fn wait_for<P>(&self, predicate: P) -> Result<TimelineSnapshot>
    where
        P: FnMut(&TimelineSnapshot) -> bool,
    {
        wait_for_snapshot(self.snapshots.clone(), predicate).await
    }

    pub async fn load_initial(&self) -> Result<()> {
        self.command(ConversationCommand::LoadInitial).await
    }

    /// Ignored while another page is loading
    pub async fn load_older(&self) -> Result<()> {
        self.command(ConversationCommand::LoadOlder).await
    }

    pub async fn load_newer(&self) -> Result<()> {
        self.command(ConversationCommand::LoadNewer).await
    }

    pub async fn retry(&self) -> Result<()> {
        self.command(ConversationCommand::Retry).await
    }

    /// Start a text send; returns the id the new entry is shown under
    pub async fn send_text(&self, text: impl Into<String>) -> Result<MessageId> {
        let (reply, rx) = oneshot::channel();
        self.command(ConversationCommand::SendText {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(closed)?
    }

    pub async fn send_voice_note(&self, note: VoiceNote) -> Result<MessageId> {
        let (reply, rx) = oneshot::channel();
        self.command(ConversationCommand::SendVoiceNote { note, reply }).await?;
        rx.await.map_err(closed)?
    }

    /// Toggle our reaction. Shown at once and undone if the server refuses.
    pub async fn send_reaction(&self, message_id: i64, reaction: ReactionKind) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ConversationCommand::SendReaction {
            message_id,
            reaction,
            reply,
        })
        .await?;
        rx.await.map_err(closed)?
    }

    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(ConversationCommand::Flush(tx)).await?;
        rx.await.map_err(closed)
    }

    /// Close the view. Speculative identities are discarded.
    pub async fn close(self) -> Result<()> {
        self.command(ConversationCommand::Close).await?;
        self.task
            .await
            .map_err(|e| SyncError::ChannelClosed(format!("conversation task: {}", e)))
    }

    async fn command(&self, command: ConversationCommand) -> Result<()> {
        self.commands.send(command).await.map_err(closed)
    }
}
