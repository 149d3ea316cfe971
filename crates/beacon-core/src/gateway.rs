//! Boundary to the external beacon subsystem.
//!
//! The radio scanning, the transport to the hardware, and the proximity
//! computations all live behind [`SubsystemGateway`]. The core only issues
//! start/stop requests through it, and receives events through the listener
//! traits it installs.
//!
//! Listeners may be invoked on any thread, at any time, including
//! synchronously from inside a gateway call. The core never holds one of its
//! own locks while calling into the gateway.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{SubsystemError, SubsystemResult};
use crate::region::{BeaconRegion, RegionKey};
use crate::types::{Beacon, ConfigurableDevice, ConnectionInfo, Setting, SettingId};

/// Receives ranging results.
pub trait RangingListener: Send + Sync {
    /// All beacons currently visible in `region`.
    fn on_beacons_discovered(&self, region: &BeaconRegion, beacons: &[Beacon]);
}

/// Receives monitoring transitions.
pub trait MonitoringListener: Send + Sync {
    /// The device entered `region`.
    fn on_region_entered(&self, region: &BeaconRegion);

    /// The device left `region`.
    fn on_region_exited(&self, region: &BeaconRegion);
}

/// Receives discovery ticks.
pub trait DiscoveryListener: Send + Sync {
    /// All configurable devices currently visible.
    fn on_devices_discovered(&self, devices: &[ConfigurableDevice]);
}

/// Receives the outcome of one connection attempt.
pub trait ConnectionListener: Send + Sync {
    /// The link is up.
    fn on_connected(&self);

    /// The link could not be established.
    fn on_connection_failed(&self, error: SubsystemError);

    /// The link went down.
    fn on_disconnected(&self);
}

/// A connection handle to one configurable device.
pub trait DeviceLink: Send + Sync {
    /// Begin connecting; the outcome is reported to `listener`.
    fn connect(&self, listener: Arc<dyn ConnectionListener>);

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Close the link. Confirmation arrives via
    /// [`ConnectionListener::on_disconnected`].
    fn close(&self);

    /// Device information cached by the link after connecting.
    ///
    /// # Errors
    ///
    /// Fails if the cached settings are incomplete.
    fn connection_info(&self) -> SubsystemResult<ConnectionInfo>;

    /// Read one setting from the device.
    fn read_setting(&self, id: SettingId) -> BoxFuture<'static, SubsystemResult<Setting>>;

    /// Write one setting to the device; resolves with the stored value.
    fn write_setting(&self, value: Setting) -> BoxFuture<'static, SubsystemResult<Setting>>;
}

/// Façade over the beacon subsystem's primitives.
///
/// Start/stop calls may fail synchronously; everything else completes
/// through the installed listeners.
pub trait SubsystemGateway: Send + Sync {
    /// Install the ranging listener. Called at most once per core.
    fn set_ranging_listener(&self, listener: Arc<dyn RangingListener>);

    /// Install the monitoring listener. Called at most once per core.
    fn set_monitoring_listener(&self, listener: Arc<dyn MonitoringListener>);

    /// Install the discovery listener. Called at most once per core.
    fn set_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>);

    /// Begin ranging `region`. Secure regions use the secure channel.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn start_ranging(&self, region: &BeaconRegion) -> SubsystemResult<()>;

    /// Stop ranging `region`.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn stop_ranging(&self, region: &BeaconRegion) -> SubsystemResult<()>;

    /// Begin monitoring `region`.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn start_monitoring(&self, region: &BeaconRegion) -> SubsystemResult<()>;

    /// Stop monitoring the region registered under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn stop_monitoring(&self, key: &RegionKey) -> SubsystemResult<()>;

    /// Begin discovering configurable devices.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn start_discovery(&self) -> SubsystemResult<()>;

    /// Stop discovering configurable devices.
    ///
    /// # Errors
    ///
    /// Fails if the subsystem refuses the request.
    fn stop_discovery(&self) -> SubsystemResult<()>;

    /// Create a link to a discovered device. The link does not connect
    /// until [`DeviceLink::connect`] is called.
    ///
    /// # Errors
    ///
    /// Fails if the connection service is unavailable.
    fn open_connection(&self, device: &ConfigurableDevice) -> SubsystemResult<Arc<dyn DeviceLink>>;

    /// Release the subsystem's beacon service.
    fn shutdown(&self) {}
}
