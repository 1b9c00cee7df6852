/// Speculative → confirmed message identities for one open conversation
use std::collections::HashMap;

/// What a speculative send turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(i64),
    /// The send failed; the server still assigned `new_id`
    Failed(i64),
}

impl Resolution {
    pub fn id(&self) -> i64 {
        match self {
            Resolution::Confirmed(id) | Resolution::Failed(id) => *id,
        }
    }
}

/// Lives exactly as long as the conversation view; `clear` on close.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    forward: HashMap<String, Resolution>,
    reverse: HashMap<i64, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed send. Last write wins for the same `old`.
    pub fn record(&mut self, old: &str, new: i64) {
        self.insert(old, Resolution::Confirmed(new));
    }

    /// Record a failed send so later deletes by `new` still resolve
    pub fn record_failure(&mut self, old: &str, new: i64) {
        self.insert(old, Resolution::Failed(new));
    }

    fn insert(&mut self, old: &str, resolution: Resolution) {
        if let Some(previous) = self.forward.insert(old.to_string(), resolution) {
            let stale = previous.id();
            if stale != resolution.id() && self.reverse.get(&stale).map(String::as_str) == Some(old) {
                self.reverse.remove(&stale);
            }
        }
        self.reverse.insert(resolution.id(), old.to_string());
    }

    /// Speculative id that was confirmed as `confirmed`, if any
    pub fn resolve(&self, confirmed: i64) -> Option<&str> {
        self.reverse.get(&confirmed).map(String::as_str)
    }

    pub fn lookup(&self, speculative: &str) -> Option<Resolution> {
        self.forward.get(speculative).copied()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
