/// Repository: the live set of messages waiting to expire.
///
/// One lock guards the whole map. Every accessor takes it for the duration
/// of an in-memory operation only; callers never hold it across I/O and
/// never see the map itself, only copies.
pub mod snapshot;

pub use snapshot::SnapshotStore;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::types::{Birth, MessageId};

/// A point-in-time copy of the repository contents.
pub type Entries = HashMap<MessageId, Birth>;

#[derive(Debug, Default)]
pub struct Repository {
    entries: Mutex<Entries>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message or move its birth.
    pub fn upsert(&self, id: MessageId, birth: Birth) {
        self.lock().insert(id, birth);
    }

    /// Drop a message. Returns whether it was tracked.
    pub fn remove(&self, id: &MessageId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drop a message only if it still carries `birth`.
    ///
    /// Loses to a concurrent reset: a message whose countdown restarted
    /// after `birth` was sampled stays tracked.
    pub fn remove_if_birth(&self, id: &MessageId, birth: Birth) -> bool {
        let mut entries = self.lock();
        if entries.get(id) == Some(&birth) {
            entries.remove(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn birth_of(&self, id: &MessageId) -> Option<Birth> {
        self.lock().get(id).copied()
    }

    /// Independent copy of every entry.
    pub fn snapshot_copy(&self) -> Entries {
        self.lock().clone()
    }

    /// Swap in a whole new working set (reconciliation).
    pub fn replace(&self, entries: Entries) {
        *self.lock() = entries;
    }

    /// Message with the smallest birth, `None` when empty.
    pub fn earliest(&self) -> Option<(MessageId, Birth)> {
        self.earliest_by(|_, birth| birth)
    }

    /// Minimum under a caller ordering, evaluated under the lock.
    ///
    /// Ties are broken by message id so repeated scans agree.
    pub fn earliest_by<K, F>(&self, mut key: F) -> Option<(MessageId, Birth)>
    where
        K: Ord,
        F: FnMut(&MessageId, Birth) -> K,
    {
        self.lock()
            .iter()
            .map(|(id, birth)| (key(id, *birth), id, *birth))
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, id, birth)| (id.clone(), birth))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic elsewhere cannot leave the map half-written: every critical
    // section is a single map call.
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
