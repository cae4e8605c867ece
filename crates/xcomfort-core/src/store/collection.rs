// ── Generic reactive collection ──
//
// Concurrent keyed storage with push-based change notification via a
// `watch` snapshot. Entries are immutable `Arc`s; an update swaps the
// `Arc` only when the value really changed, so `Arc::ptr_eq` between
// two snapshots tells whether an entry moved.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

pub type Snapshot<K, T> = Arc<BTreeMap<K, Arc<T>>>;

/// What [`Collection::upsert_with`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

impl Upsert {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

pub(crate) struct Collection<K, T> {
    items: DashMap<K, Arc<T>>,
    snapshot: watch::Sender<Snapshot<K, T>>,
}

impl<K, T> Collection<K, T>
where
    K: Copy + Ord + Hash + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(BTreeMap::new()));
        Self {
            items: DashMap::new(),
            snapshot,
        }
    }

    /// Create the entry with `create` if absent, then `apply` the update.
    ///
    /// An update that leaves the value equal reports
    /// [`Upsert::Unchanged`] and publishes nothing.
    pub(crate) fn upsert_with(
        &self,
        key: K,
        create: impl FnOnce() -> T,
        apply: impl FnOnce(&mut T),
    ) -> Upsert {
        let outcome = match self.items.entry(key) {
            Entry::Vacant(slot) => {
                let mut item = create();
                apply(&mut item);
                slot.insert(Arc::new(item));
                Upsert::Created
            }
            Entry::Occupied(mut slot) => {
                let mut item = T::clone(slot.get());
                apply(&mut item);
                if item == **slot.get() {
                    Upsert::Unchanged
                } else {
                    slot.insert(Arc::new(item));
                    Upsert::Updated
                }
            }
        };
        if outcome.changed() {
            self.rebuild_snapshot();
        }
        outcome
    }

    pub(crate) fn get(&self, key: K) -> Option<Arc<T>> {
        self.items.get(&key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn snapshot(&self) -> Snapshot<K, T> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot<K, T>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.items.clear();
        self.rebuild_snapshot();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn rebuild_snapshot(&self) {
        let items: BTreeMap<K, Arc<T>> = self
            .items
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(items));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_update_keeps_the_same_arc() {
        let collection: Collection<u32, String> = Collection::new();
        collection.upsert_with(1, String::new, |s| s.push('a'));
        let before = collection.get(1).unwrap();

        let outcome = collection.upsert_with(1, String::new, |s| *s = "a".into());
        assert_eq!(outcome, Upsert::Unchanged);
        assert!(Arc::ptr_eq(&before, &collection.get(1).unwrap()));

        assert_eq!(collection.upsert_with(1, String::new, |s| s.push('b')), Upsert::Updated);
        assert!(!Arc::ptr_eq(&before, &collection.get(1).unwrap()));
    }

    #[test]
    fn clear_empties_the_snapshot() {
        let collection: Collection<u32, u8> = Collection::new();
        collection.upsert_with(3, || 0, |v| *v = 7);
        assert_eq!(collection.snapshot().len(), 1);
        collection.clear();
        assert!(collection.is_empty());
        assert!(collection.snapshot().is_empty());
    }
}
