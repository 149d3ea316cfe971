//! The public façade tying registries, router and connection manager together.
//!
//! Every operation returns as soon as local validation and bookkeeping are
//! done. Hardware outcomes arrive later on the consumer handle passed in.

use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::config::BeaconConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::consumer::Consumer;
use crate::discovery::DiscoveredDeviceSet;
use crate::error::{BeaconError, Result, SubsystemResult};
use crate::gateway::SubsystemGateway;
use crate::region::{BeaconRegion, RegionDescriptor, RegionKey};
use crate::registry::{Insertion, SubscriptionRegistry};
use crate::router::EventRouter;
use crate::types::{ConnectionInfo, DiscoveryEvent, MonitoringEvent, RangingEvent, Setting};

/// Entry point for consumers of the beacon subsystem.
pub struct BeaconCore {
    gateway: Arc<dyn SubsystemGateway>,
    router: Arc<EventRouter>,
    connections: ConnectionManager,
    ranging_listener: OnceLock<()>,
    monitoring_listener: OnceLock<()>,
    discovery_listener: OnceLock<()>,
}

impl BeaconCore {
    /// Create a core bound to `gateway`.
    ///
    /// No listener is installed until the first subscription of its kind.
    /// Setting writes run on the Tokio runtime current at construction. A
    /// core built outside any runtime falls back to the runtime current at
    /// each write call.
    #[must_use]
    pub fn new(gateway: Arc<dyn SubsystemGateway>, config: &BeaconConfig) -> Self {
        Self::build(gateway, config, Handle::try_current().ok())
    }

    /// Create a core whose setting writes run on `runtime`, so write
    /// operations may be called from any thread.
    #[must_use]
    pub fn with_runtime(
        gateway: Arc<dyn SubsystemGateway>,
        config: &BeaconConfig,
        runtime: Handle,
    ) -> Self {
        Self::build(gateway, config, Some(runtime))
    }

    fn build(
        gateway: Arc<dyn SubsystemGateway>,
        config: &BeaconConfig,
        runtime: Option<Handle>,
    ) -> Self {
        let discovered = Arc::new(DiscoveredDeviceSet::new());
        let router = Arc::new(EventRouter::new(Arc::clone(&discovered)));
        let connections = ConnectionManager::new(
            Arc::clone(&gateway),
            discovered,
            config.connection.setting_timeout(),
            runtime,
        );
        Self {
            gateway,
            router,
            connections,
            ranging_listener: OnceLock::new(),
            monitoring_listener: OnceLock::new(),
            discovery_listener: OnceLock::new(),
        }
    }

    // ========================================================================
    // Ranging
    // ========================================================================

    /// Start ranging a region.
    ///
    /// If the region's key is already ranged this is a silent no-op and the
    /// first consumer stays bound. A subsystem failure is delivered to
    /// `consumer`; the entry stays registered until an explicit stop.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidRegion`] for a malformed descriptor.
    pub fn start_ranging(
        &self,
        descriptor: &RegionDescriptor,
        consumer: Consumer<RangingEvent>,
    ) -> Result<()> {
        self.start_ranging_region(BeaconRegion::from_descriptor(descriptor, false)?, consumer);
        Ok(())
    }

    /// Start ranging a region over the secure channel.
    ///
    /// Same semantics as [`BeaconCore::start_ranging`]; secure and plain
    /// ranging of the same triple share one registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidRegion`] for a malformed descriptor.
    pub fn start_secure_ranging(
        &self,
        descriptor: &RegionDescriptor,
        consumer: Consumer<RangingEvent>,
    ) -> Result<()> {
        self.start_ranging_region(BeaconRegion::from_descriptor(descriptor, true)?, consumer);
        Ok(())
    }

    /// Stop ranging a region.
    ///
    /// The bound consumer receives `Closed`; the result of the subsystem
    /// stop is returned to the caller.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidRegion`], [`BeaconError::NotSubscribed`], or
    /// [`BeaconError::Subsystem`] if the subsystem refuses to stop.
    pub fn stop_ranging(&self, descriptor: &RegionDescriptor) -> Result<()> {
        self.stop_ranging_region(&BeaconRegion::from_descriptor(descriptor, false)?)
    }

    /// Stop ranging a region over the secure channel.
    ///
    /// # Errors
    ///
    /// As [`BeaconCore::stop_ranging`].
    pub fn stop_secure_ranging(&self, descriptor: &RegionDescriptor) -> Result<()> {
        self.stop_ranging_region(&BeaconRegion::from_descriptor(descriptor, true)?)
    }

    fn start_ranging_region(&self, region: BeaconRegion, consumer: Consumer<RangingEvent>) {
        start_subscription(
            self.router.ranging(),
            region,
            consumer,
            || self.install_ranging_listener(),
            |region| self.gateway.start_ranging(region),
        );
    }

    fn stop_ranging_region(&self, region: &BeaconRegion) -> Result<()> {
        stop_subscription(self.router.ranging(), region, || self.gateway.stop_ranging(region))
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Start monitoring a region for enter/exit transitions.
    ///
    /// Same registry semantics as [`BeaconCore::start_ranging`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidRegion`] for a malformed descriptor.
    pub fn start_monitoring(
        &self,
        descriptor: &RegionDescriptor,
        consumer: Consumer<MonitoringEvent>,
    ) -> Result<()> {
        let region = BeaconRegion::from_descriptor(descriptor, false)?;
        start_subscription(
            self.router.monitoring(),
            region,
            consumer,
            || self.install_monitoring_listener(),
            |region| self.gateway.start_monitoring(region),
        );
        Ok(())
    }

    /// Stop monitoring a region.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidRegion`], [`BeaconError::NotSubscribed`], or
    /// [`BeaconError::Subsystem`] if the subsystem refuses to stop.
    pub fn stop_monitoring(&self, descriptor: &RegionDescriptor) -> Result<()> {
        let region = BeaconRegion::from_descriptor(descriptor, false)?;
        let key = region.key();
        stop_subscription(self.router.monitoring(), &region, || {
            self.gateway.stop_monitoring(&key)
        })
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Start discovering configurable devices.
    ///
    /// While discovery is active further calls are ignored; the first
    /// subscriber keeps receiving snapshots.
    pub fn start_discovery(&self, consumer: Consumer<DiscoveryEvent>) {
        let id = consumer.id();
        if self.router.discovery().occupy(consumer).is_err() {
            return;
        }
        self.install_discovery_listener();

        info!(consumer = %id, "starting device discovery");
        if let Err(err) = self.gateway.start_discovery() {
            error!(error = %err, "could not start discovery");
            self.router
                .discovery()
                .notify_error(id, BeaconError::Subsystem(err));
        }
    }

    /// Stop discovering configurable devices.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotDiscovering`] if discovery is inactive, or
    /// [`BeaconError::Subsystem`] if the subsystem refuses to stop.
    pub fn stop_discovery(&self) -> Result<()> {
        let subscriber = self.router.discovery().vacate()?;
        subscriber.close();

        info!("stopping device discovery");
        self.gateway.stop_discovery().map_err(|err| {
            error!(error = %err, "could not stop discovery");
            BeaconError::Subsystem(err)
        })
    }

    // ========================================================================
    // Device connection and settings
    // ========================================================================

    /// Connect to a discovered device by MAC address.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::UnknownDevice`] if the address was never
    /// discovered.
    pub fn connect_to_device(&self, mac: &str, consumer: Consumer<ConnectionInfo>) -> Result<()> {
        self.connections.connect(mac, consumer)
    }

    /// Disconnect the connected device.
    pub fn disconnect_device(&self, consumer: Consumer<()>) {
        self.connections.disconnect(consumer);
    }

    /// Write the proximity UUID of the connected device.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidSetting`] for a malformed UUID,
    /// [`BeaconError::NotConnected`] without a connected device,
    /// [`BeaconError::NoRuntime`] when no runtime can run the write.
    pub fn write_proximity_uuid(&self, uuid: &str, consumer: Consumer<Setting>) -> Result<()> {
        let setting = Setting::proximity_uuid(uuid)?;
        self.connections.write_setting(setting, consumer)
    }

    /// Write the major value of the connected device.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotConnected`] without a connected device.
    pub fn write_major(&self, major: u16, consumer: Consumer<Setting>) -> Result<()> {
        self.connections.write_setting(Setting::Major(major), consumer)
    }

    /// Write the minor value of the connected device.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotConnected`] without a connected device.
    pub fn write_minor(&self, minor: u16, consumer: Consumer<Setting>) -> Result<()> {
        self.connections.write_setting(Setting::Minor(minor), consumer)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Forget every subscription and the discovery subscriber.
    ///
    /// The subsystem is not told to stop anything; ranging, monitoring and
    /// discovery keep running and their events are dropped until a new
    /// subscription claims them.
    pub fn reset(&self) {
        let ranging = self.router.ranging().clear();
        let monitoring = self.router.monitoring().clear();
        let discovery = self.router.discovery().clear();
        info!(ranging, monitoring, discovery, "consumer context reset");
    }

    /// Disconnect the device silently and release the subsystem.
    pub fn shutdown(&self) {
        info!("shutting down beacon core");
        self.connections.release();
        self.gateway.shutdown();
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Keys currently ranged.
    #[must_use]
    pub fn ranging_keys(&self) -> Vec<RegionKey> {
        self.router.ranging().keys()
    }

    /// Keys currently monitored.
    #[must_use]
    pub fn monitoring_keys(&self) -> Vec<RegionKey> {
        self.router.monitoring().keys()
    }

    /// Whether a discovery subscriber is bound.
    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.router.discovery().is_active()
    }

    /// Number of device sightings recorded by discovery.
    #[must_use]
    pub fn discovered_device_count(&self) -> usize {
        self.router.discovered().len()
    }

    /// State of the device connection slot.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    fn install_ranging_listener(&self) {
        self.ranging_listener.get_or_init(|| {
            debug!("installing ranging listener");
            self.gateway.set_ranging_listener(self.router.clone());
        });
    }

    fn install_monitoring_listener(&self) {
        self.monitoring_listener.get_or_init(|| {
            debug!("installing monitoring listener");
            self.gateway.set_monitoring_listener(self.router.clone());
        });
    }

    fn install_discovery_listener(&self) {
        self.discovery_listener.get_or_init(|| {
            debug!("installing discovery listener");
            self.gateway.set_discovery_listener(self.router.clone());
        });
    }
}

impl std::fmt::Debug for BeaconCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconCore")
            .field("router", &self.router)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

fn start_subscription<T>(
    registry: &SubscriptionRegistry<T>,
    region: BeaconRegion,
    consumer: Consumer<T>,
    install_listener: impl FnOnce(),
    start: impl FnOnce(&BeaconRegion) -> SubsystemResult<()>,
) {
    let key = region.key();
    let id = consumer.id();
    if let Insertion::AlreadyActive(_) = registry.insert_if_absent(region.clone(), consumer) {
        return;
    }
    install_listener();

    info!(
        concern = %registry.concern(),
        key = %key,
        consumer = %id,
        secure = region.is_secure(),
        "starting subscription"
    );
    if let Err(err) = start(&region) {
        // The entry stays registered; only an explicit stop clears it.
        error!(
            concern = %registry.concern(),
            key = %key,
            error = %err,
            "subsystem refused start"
        );
        registry.notify_error(&key, id, BeaconError::Subsystem(err));
    }
}

fn stop_subscription<T>(
    registry: &SubscriptionRegistry<T>,
    region: &BeaconRegion,
    stop: impl FnOnce() -> SubsystemResult<()>,
) -> Result<()> {
    let key = region.key();
    let subscription = registry.remove(&key)?;
    let consumer = subscription.consumer_id();
    subscription.close();

    info!(concern = %registry.concern(), key = %key, consumer = %consumer, "stopping subscription");
    stop().map_err(|err| {
        error!(concern = %registry.concern(), key = %key, error = %err, "subsystem refused stop");
        BeaconError::Subsystem(err)
    })
}
