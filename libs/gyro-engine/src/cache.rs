//! Latest-value cache
//!
//! Keeps the most recent record per device. "Most recent" means highest
//! `sequence`; wall-clock time never takes part in the comparison, so the
//! cache converges under duplicate or out-of-order delivery.
//!
//! The map is split into lock stripes selected by hashing the device id.
//! Writes to one device serialize on its stripe, unrelated devices only
//! contend when they hash to the same stripe, and readers clone an `Arc`
//! so they never observe a half-written record.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::Arc;

use parking_lot::RwLock;

use gyro_api::TelemetryRecord;

/// Default number of lock stripes
pub const DEFAULT_STRIPES: usize = 16;

/// Outcome of [`LatestValueCache::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// First record seen for this device
    Inserted,
    /// Replaced an older record
    Replaced,
    /// Stored record has an equal or higher sequence; nothing changed
    Stale,
}

type Stripe = RwLock<HashMap<String, Arc<TelemetryRecord>>>;

/// Device → most recent record
#[derive(Debug)]
pub struct LatestValueCache {
    stripes: Box<[Stripe]>,
    hasher: RandomState,
}

impl LatestValueCache {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Stripe count is rounded up to a power of two.
    pub fn with_stripes(stripes: usize) -> Self {
        let n = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn stripe(&self, device_id: &str) -> &Stripe {
        let hash = self.hasher.hash_one(device_id) as usize;
        &self.stripes[hash & (self.stripes.len() - 1)]
    }

    /// Store `record` iff it is newer than what the device already has.
    pub fn update(&self, record: Arc<TelemetryRecord>) -> CacheUpdate {
        let mut map = self.stripe(&record.device_id).write();
        match map.get_mut(&record.device_id) {
            Some(stored) if record.sequence > stored.sequence => {
                *stored = record;
                CacheUpdate::Replaced
            }
            Some(_) => CacheUpdate::Stale,
            None => {
                map.insert(record.device_id.clone(), record);
                CacheUpdate::Inserted
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<TelemetryRecord>> {
        self.stripe(device_id).read().get(device_id).cloned()
    }

    /// Snapshot of every device, sorted by device id.
    ///
    /// Stripes are read one at a time, so the snapshot is per-device
    /// consistent but not a single point in time across devices.
    pub fn get_all(&self) -> BTreeMap<String, Arc<TelemetryRecord>> {
        let mut all = BTreeMap::new();
        for stripe in self.stripes.iter() {
            let map = stripe.read();
            all.extend(map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        }
        all
    }

    /// Drop every entry. Returns how many devices were cleared.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        for stripe in self.stripes.iter() {
            let mut map = stripe.write();
            cleared += map.len();
            map.clear();
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatestValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
