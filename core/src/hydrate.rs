/// Bounded lazy re-fetch of entities that events referenced before we knew them
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HydrateTracker<K> {
    in_flight: HashSet<K>,
    attempts: HashMap<K, u32>,
    max_attempts: u32,
}

impl<K: Hash + Eq + Clone + std::fmt::Debug> HydrateTracker<K> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            in_flight: HashSet::new(),
            attempts: HashMap::new(),
            max_attempts,
        }
    }

    /// Returns true if a fetch for `key` should start now
    pub fn begin(&mut self, key: &K) -> bool {
        if self.in_flight.contains(key) {
            debug!("Fetch for {:?} already in flight", key);
            return false;
        }
        let attempts = self.attempts.get(key).copied().unwrap_or(0);
        if attempts >= self.max_attempts {
            if attempts == self.max_attempts {
                warn!("Giving up on {:?} after {} fetches", key, attempts);
                // bump past the cap so the warning fires once
                self.attempts.insert(key.clone(), attempts + 1);
            }
            return false;
        }
        self.attempts.insert(key.clone(), attempts + 1);
        self.in_flight.insert(key.clone());
        true
    }

    /// `resolved` = the entity is now tracked; its attempt budget is restored
    pub fn complete(&mut self, key: &K, resolved: bool) {
        self.in_flight.remove(key);
        if resolved {
            self.attempts.remove(key);
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains(key)
    }
}
