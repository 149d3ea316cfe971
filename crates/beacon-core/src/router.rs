//! Routes subsystem events to the consumers that asked for them.
//!
//! The router is the single listener the core installs for each concern.
//! For every event it computes the region key, looks the consumer up in the
//! matching registry, and delivers a translated payload with the channel kept
//! open. Events for the same key are forwarded in arrival order. Nothing is
//! batched or reordered.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::discovery::{DiscoveredDeviceSet, DiscoverySlot};
use crate::error::Concern;
use crate::gateway::{DiscoveryListener, MonitoringListener, RangingListener};
use crate::region::BeaconRegion;
use crate::registry::SubscriptionRegistry;
use crate::types::{
    Beacon, ConfigurableDevice, MonitoringEvent, RangingEvent, RegionState,
};

/// Shared routing tables.
#[derive(Debug)]
pub struct EventRouter {
    ranging: SubscriptionRegistry<RangingEvent>,
    monitoring: SubscriptionRegistry<MonitoringEvent>,
    discovery: DiscoverySlot,
    discovered: Arc<DiscoveredDeviceSet>,
}

impl EventRouter {
    /// Create a router that records discovered devices into `discovered`.
    #[must_use]
    pub fn new(discovered: Arc<DiscoveredDeviceSet>) -> Self {
        Self {
            ranging: SubscriptionRegistry::new(Concern::Ranging),
            monitoring: SubscriptionRegistry::new(Concern::Monitoring),
            discovery: DiscoverySlot::new(),
            discovered,
        }
    }

    /// Ranging subscriptions.
    #[must_use]
    pub const fn ranging(&self) -> &SubscriptionRegistry<RangingEvent> {
        &self.ranging
    }

    /// Monitoring subscriptions.
    #[must_use]
    pub const fn monitoring(&self) -> &SubscriptionRegistry<MonitoringEvent> {
        &self.monitoring
    }

    /// Discovery subscriber slot.
    #[must_use]
    pub const fn discovery(&self) -> &DiscoverySlot {
        &self.discovery
    }

    /// Device log shared with the connection manager.
    #[must_use]
    pub fn discovered(&self) -> &DiscoveredDeviceSet {
        &self.discovered
    }

    fn route_monitoring(&self, region: &BeaconRegion, state: RegionState) {
        let key = region.key();
        debug!(key = %key, state = %state, "region transition");
        self.monitoring
            .deliver(&key, || MonitoringEvent::from_hardware(region, state));
    }
}

impl RangingListener for EventRouter {
    fn on_beacons_discovered(&self, region: &BeaconRegion, beacons: &[Beacon]) {
        let key = region.key();
        trace!(key = %key, count = beacons.len(), "beacons ranged");
        self.ranging
            .deliver(&key, || RangingEvent::from_hardware(region, beacons));
    }
}

impl MonitoringListener for EventRouter {
    fn on_region_entered(&self, region: &BeaconRegion) {
        self.route_monitoring(region, RegionState::Entered);
    }

    fn on_region_exited(&self, region: &BeaconRegion) {
        self.route_monitoring(region, RegionState::Exited);
    }
}

impl DiscoveryListener for EventRouter {
    fn on_devices_discovered(&self, devices: &[ConfigurableDevice]) {
        trace!(count = devices.len(), "configurable devices discovered");
        self.discovered.extend(devices);
        self.discovery.deliver(devices);
    }
}
