/// Topic-keyed publish/subscribe registry for update events
///
/// Each subscription owns its receiving end; dropping it unregisters it, so a
/// reconciler's subscription lives exactly as long as the reconciler.
use crate::events::{Topic, UpdateEvent};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Subscribers = HashMap<Topic, Vec<(u64, mpsc::Sender<Arc<UpdateEvent>>)>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Subscribers,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    buffer: usize,
}

pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<Arc<UpdateEvent>>,
    registry: Weak<Mutex<Registry>>,
}

impl Dispatcher {
    /// `buffer` bounds each subscriber's queue; a full queue makes `publish` wait
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(topic.clone())
            .or_default()
            .push((id, tx));
        debug!("Subscription {} on {:?}", id, topic);

        Subscription {
            id,
            topic,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        lock(&self.registry)
            .subscribers
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver one event to every subscriber of its topic, in publish order.
    /// Returns how many subscribers received it.
    pub async fn publish(&self, event: UpdateEvent) -> usize {
        let topic = event.topic();
        let senders: Vec<(u64, mpsc::Sender<Arc<UpdateEvent>>)> = lock(&self.registry)
            .subscribers
            .get(&topic)
            .cloned()
            .unwrap_or_default();
        if senders.is_empty() {
            trace!("No subscribers for {} on {:?}", event.kind(), topic);
            return 0;
        }

        let event = Arc::new(event);
        let results = join_all(senders.iter().map(|(_, tx)| tx.send(event.clone()))).await;

        let mut delivered = 0;
        let mut closed = Vec::new();
        for ((id, _), result) in senders.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(_) => closed.push(*id),
            }
        }
        if !closed.is_empty() {
            let mut registry = lock(&self.registry);
            if let Some(list) = registry.subscribers.get_mut(&topic) {
                list.retain(|(id, _)| !closed.contains(id));
            }
        }
        delivered
    }
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// `None` once the dispatcher is gone
    pub async fn recv(&mut self) -> Option<Arc<UpdateEvent>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(list) = registry.subscribers.get_mut(&self.topic) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.subscribers.remove(&self.topic);
            }
        }
    }
}

// The registry holds no invariants a panicking holder could break.
fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
