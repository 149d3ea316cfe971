//! Keyed registry of active ranging or monitoring subscriptions.
//!
//! At most one subscription exists per [`RegionKey`]. A second start for an
//! active key is rejected and the first consumer stays bound. Lookups for
//! incoming events take the same lock as insert/remove, and the send happens
//! under that lock. A consumer therefore never receives an event after its
//! entry was removed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::consumer::{Consumer, ConsumerId};
use crate::error::{BeaconError, Concern};
use crate::region::{BeaconRegion, RegionKey};

/// One active subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    region: BeaconRegion,
    consumer: Consumer<T>,
}

impl<T> Subscription<T> {
    /// The subscribed region.
    #[must_use]
    pub const fn region(&self) -> &BeaconRegion {
        &self.region
    }

    /// Id of the bound consumer.
    #[must_use]
    pub const fn consumer_id(&self) -> ConsumerId {
        self.consumer.id()
    }

    /// Close the consumer's channel without data.
    pub fn close(self) {
        self.consumer.close();
    }
}

/// Outcome of [`SubscriptionRegistry::insert_if_absent`].
#[derive(Debug)]
pub enum Insertion<T> {
    /// The entry was created.
    Inserted,
    /// An entry already existed; the rejected consumer is handed back.
    AlreadyActive(Consumer<T>),
}

/// Registry for one concern.
#[derive(Debug)]
pub struct SubscriptionRegistry<T> {
    concern: Concern,
    entries: Mutex<HashMap<RegionKey, Subscription<T>>>,
}

impl<T> SubscriptionRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new(concern: Concern) -> Self {
        Self {
            concern,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Which concern this registry tracks.
    #[must_use]
    pub const fn concern(&self) -> Concern {
        self.concern
    }

    /// Bind `consumer` to the region's key unless the key is already active.
    pub fn insert_if_absent(&self, region: BeaconRegion, consumer: Consumer<T>) -> Insertion<T> {
        let key = region.key();
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            debug!(
                concern = %self.concern,
                key = %key,
                bound = %existing.consumer_id(),
                rejected = %consumer.id(),
                "subscription already active, ignoring start"
            );
            return Insertion::AlreadyActive(consumer);
        }
        entries.insert(key, Subscription { region, consumer });
        Insertion::Inserted
    }

    /// Remove the entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotSubscribed`] if no entry exists.
    pub fn remove(&self, key: &RegionKey) -> Result<Subscription<T>, BeaconError> {
        self.lock()
            .remove(key)
            .ok_or_else(|| BeaconError::NotSubscribed {
                concern: self.concern,
                key: key.to_string(),
            })
    }

    /// Deliver an event to the consumer bound to `key`.
    ///
    /// The payload is only built when a consumer is found. A miss is logged
    /// and dropped; events routinely race with stop.
    pub fn deliver(&self, key: &RegionKey, payload: impl FnOnce() -> T) -> bool {
        let entries = self.lock();
        match entries.get(key) {
            Some(subscription) => subscription.consumer.event(payload()),
            None => {
                warn!(concern = %self.concern, key = %key, "no consumer for region, event dropped");
                false
            }
        }
    }

    /// Deliver an error to the entry for `key`, but only while it is still
    /// bound to consumer `id`.
    pub fn notify_error(&self, key: &RegionKey, id: ConsumerId, error: BeaconError) -> bool {
        let entries = self.lock();
        match entries.get(key) {
            Some(subscription) if subscription.consumer_id() == id => {
                subscription.consumer.error(error)
            }
            _ => false,
        }
    }

    /// Drop every entry without signalling the consumers. Returns how many
    /// entries were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Whether `key` has an active entry.
    #[must_use]
    pub fn contains(&self, key: &RegionKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of active entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keys of all active entries, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<RegionKey> {
        let mut keys: Vec<RegionKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RegionKey, Subscription<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
