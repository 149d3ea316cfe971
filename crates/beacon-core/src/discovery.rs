//! Device discovery: the single-subscriber slot and the discovered-device log.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::consumer::{Consumer, ConsumerId};
use crate::error::{BeaconError, Result};
use crate::types::{ConfigurableDevice, DiscoveryEvent, MacAddress};

/// Append-only log of every device seen during discovery.
///
/// Lookups search newest-first, so a re-discovered device resolves to its
/// latest attributes.
#[derive(Debug, Default)]
pub struct DiscoveredDeviceSet {
    devices: Mutex<Vec<ConfigurableDevice>>,
}

impl DiscoveredDeviceSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a discovery snapshot.
    pub fn extend(&self, devices: &[ConfigurableDevice]) {
        self.lock().extend_from_slice(devices);
    }

    /// Most recently added descriptor for `mac`.
    #[must_use]
    pub fn find_latest(&self, mac: &MacAddress) -> Option<ConfigurableDevice> {
        self.lock()
            .iter()
            .rev()
            .find(|device| &device.mac_address == mac)
            .cloned()
    }

    /// Number of recorded sightings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was discovered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConfigurableDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide discovery subscriber slot.
#[derive(Debug, Default)]
pub struct DiscoverySlot {
    subscriber: Mutex<Option<Consumer<DiscoveryEvent>>>,
}

impl DiscoverySlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the slot. Hands the consumer back if the slot is taken; the
    /// first subscriber wins.
    ///
    /// # Errors
    ///
    /// Returns the rejected consumer when discovery is already active.
    pub fn occupy(
        &self,
        consumer: Consumer<DiscoveryEvent>,
    ) -> std::result::Result<(), Consumer<DiscoveryEvent>> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref() {
            debug!(
                active = %active.id(),
                rejected = %consumer.id(),
                "discovery already active, ignoring start"
            );
            return Err(consumer);
        }
        *slot = Some(consumer);
        Ok(())
    }

    /// Empty the slot, returning the subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotDiscovering`] if the slot was empty.
    pub fn vacate(&self) -> Result<Consumer<DiscoveryEvent>> {
        self.lock().take().ok_or(BeaconError::NotDiscovering)
    }

    /// Drop the subscriber without signalling it.
    pub fn clear(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Deliver a snapshot to the subscriber, if any.
    pub fn deliver(&self, devices: &[ConfigurableDevice]) -> bool {
        let slot = self.lock();
        match slot.as_ref() {
            Some(subscriber) => subscriber.event(DiscoveryEvent {
                devices: devices.to_vec(),
            }),
            None => {
                warn!(count = devices.len(), "no consumer for discovered devices, event dropped");
                false
            }
        }
    }

    /// Deliver an error to the subscriber while it is still consumer `id`.
    pub fn notify_error(&self, id: ConsumerId, error: BeaconError) -> bool {
        match self.lock().as_ref() {
            Some(subscriber) if subscriber.id() == id => subscriber.error(error),
            _ => false,
        }
    }

    /// Whether a subscriber is present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Consumer<DiscoveryEvent>>> {
        self.subscriber.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
