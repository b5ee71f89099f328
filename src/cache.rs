//! Read-mostly access to the published topology snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::topology::SlotMap;

/// Process-wide holder of the current [`SlotMap`].
///
/// Readers load a consistent snapshot without taking a lock; the monitor
/// replaces the whole map atomically on every successful refresh.  A torn
/// map can never be observed.
pub struct SlotCache {
    map: ArcSwap<SlotMap>,
}

impl SlotCache {
    pub(crate) fn new() -> SlotCache {
        SlotCache {
            map: ArcSwap::from_pointee(SlotMap::empty()),
        }
    }

    /// Returns the current snapshot for administrative fan-out.
    pub fn slot_maps(&self) -> Arc<SlotMap> {
        self.map.load_full()
    }

    /// The version of the currently published snapshot.
    pub fn version(&self) -> u64 {
        self.map.load().version()
    }

    /// Resolves a slot to the pool serving it, together with the version
    /// the answer was taken from.
    ///
    /// A `None` pool means the slot is unmapped at this version; the
    /// dispatcher treats that as a retriable miss that forces a refresh.
    pub fn get_pool(&self, slot: u16) -> (u64, Option<String>) {
        let map = self.map.load();
        (map.version(), map.pool_for_slot(slot).map(String::from))
    }

    pub(crate) fn publish(&self, map: SlotMap) {
        self.map.store(Arc::new(map));
    }
}
