//! In-memory beacon subsystem for tests and the scenario runner.
//!
//! [`MockGateway`] records every call it receives and lets the caller push
//! hardware events through whichever listeners the core installed.
//! [`MockLink`] holds a small settings table and counts reads, writes and
//! closes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};
use tracing::debug;
use uuid::Uuid;

use crate::error::{SubsystemError, SubsystemResult};
use crate::gateway::{
    ConnectionListener, DeviceLink, DiscoveryListener, MonitoringListener, RangingListener,
    SubsystemGateway,
};
use crate::region::{BeaconRegion, RegionKey};
use crate::types::{
    Beacon, ConfigurableDevice, ConnectionInfo, DeviceSettingsSnapshot, MacAddress, Proximity,
    Setting, SettingId,
};

/// Proximity UUID every fresh [`MockLink`] reports.
pub const DEFAULT_PROXIMITY_UUID: Uuid = Uuid::from_u128(0xB940_7F30_F5F8_466E_AFF9_2555_6B57_FE6D);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call received by [`MockGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// Ranging listener installed.
    SetRangingListener,
    /// Monitoring listener installed.
    SetMonitoringListener,
    /// Discovery listener installed.
    SetDiscoveryListener,
    /// Ranging started.
    StartRanging {
        /// Key of the ranged region.
        key: RegionKey,
        /// Whether the secure channel was requested.
        secure: bool,
    },
    /// Ranging stopped.
    StopRanging(RegionKey),
    /// Monitoring started.
    StartMonitoring(RegionKey),
    /// Monitoring stopped.
    StopMonitoring(RegionKey),
    /// Discovery started.
    StartDiscovery,
    /// Discovery stopped.
    StopDiscovery,
    /// A link was opened.
    OpenConnection(MacAddress),
    /// The service was released.
    Shutdown,
}

/// Gateway operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `start_ranging`
    StartRanging,
    /// `stop_ranging`
    StopRanging,
    /// `start_monitoring`
    StartMonitoring,
    /// `stop_monitoring`
    StopMonitoring,
    /// `start_discovery`
    StartDiscovery,
    /// `stop_discovery`
    StopDiscovery,
    /// `open_connection`
    OpenConnection,
}

#[derive(Default)]
struct Listeners {
    ranging: Option<Arc<dyn RangingListener>>,
    monitoring: Option<Arc<dyn MonitoringListener>>,
    discovery: Option<Arc<dyn DiscoveryListener>>,
}

/// Recording [`SubsystemGateway`].
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    listeners: Mutex<Listeners>,
    failures: Mutex<HashSet<FailPoint>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    auto_connect: AtomicBool,
}

impl MockGateway {
    /// Gateway whose links wait for [`MockLink::complete_connect`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway whose links report connected as soon as they are asked to.
    #[must_use]
    pub fn with_auto_connect() -> Self {
        let gateway = Self::new();
        gateway.auto_connect.store(true, Ordering::SeqCst);
        gateway
    }

    /// Make `point` fail from now on.
    pub fn fail(&self, point: FailPoint) {
        lock(&self.failures).insert(point);
    }

    /// Let `point` succeed again.
    pub fn recover(&self, point: FailPoint) {
        lock(&self.failures).remove(&point);
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &GatewayCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    /// Every link opened so far, oldest first.
    #[must_use]
    pub fn links(&self) -> Vec<Arc<MockLink>> {
        lock(&self.links).clone()
    }

    /// The most recently opened link.
    #[must_use]
    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        lock(&self.links).last().cloned()
    }

    /// Report ranged beacons. Returns `false` if no ranging listener is set.
    pub fn emit_beacons(&self, region: &BeaconRegion, beacons: &[Beacon]) -> bool {
        let listener = lock(&self.listeners).ranging.clone();
        listener.is_some_and(|listener| {
            listener.on_beacons_discovered(region, beacons);
            true
        })
    }

    /// Report a region entry. Returns `false` if no monitoring listener is set.
    pub fn emit_entered(&self, region: &BeaconRegion) -> bool {
        let listener = lock(&self.listeners).monitoring.clone();
        listener.is_some_and(|listener| {
            listener.on_region_entered(region);
            true
        })
    }

    /// Report a region exit. Returns `false` if no monitoring listener is set.
    pub fn emit_exited(&self, region: &BeaconRegion) -> bool {
        let listener = lock(&self.listeners).monitoring.clone();
        listener.is_some_and(|listener| {
            listener.on_region_exited(region);
            true
        })
    }

    /// Report discovered devices. Returns `false` if no discovery listener is set.
    pub fn emit_devices(&self, devices: &[ConfigurableDevice]) -> bool {
        let listener = lock(&self.listeners).discovery.clone();
        listener.is_some_and(|listener| {
            listener.on_devices_discovered(devices);
            true
        })
    }

    fn record(&self, call: GatewayCall) {
        debug!(call = ?call, "mock gateway call");
        lock(&self.calls).push(call);
    }

    fn outcome(&self, point: FailPoint) -> SubsystemResult<()> {
        if lock(&self.failures).contains(&point) {
            Err(SubsystemError::new(format!("{point:?} refused by mock subsystem")))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("calls", &lock(&self.calls).len())
            .field("links", &lock(&self.links).len())
            .finish_non_exhaustive()
    }
}

impl SubsystemGateway for MockGateway {
    fn set_ranging_listener(&self, listener: Arc<dyn RangingListener>) {
        self.record(GatewayCall::SetRangingListener);
        lock(&self.listeners).ranging = Some(listener);
    }

    fn set_monitoring_listener(&self, listener: Arc<dyn MonitoringListener>) {
        self.record(GatewayCall::SetMonitoringListener);
        lock(&self.listeners).monitoring = Some(listener);
    }

    fn set_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.record(GatewayCall::SetDiscoveryListener);
        lock(&self.listeners).discovery = Some(listener);
    }

    fn start_ranging(&self, region: &BeaconRegion) -> SubsystemResult<()> {
        self.record(GatewayCall::StartRanging {
            key: region.key(),
            secure: region.is_secure(),
        });
        self.outcome(FailPoint::StartRanging)
    }

    fn stop_ranging(&self, region: &BeaconRegion) -> SubsystemResult<()> {
        self.record(GatewayCall::StopRanging(region.key()));
        self.outcome(FailPoint::StopRanging)
    }

    fn start_monitoring(&self, region: &BeaconRegion) -> SubsystemResult<()> {
        self.record(GatewayCall::StartMonitoring(region.key()));
        self.outcome(FailPoint::StartMonitoring)
    }

    fn stop_monitoring(&self, key: &RegionKey) -> SubsystemResult<()> {
        self.record(GatewayCall::StopMonitoring(key.clone()));
        self.outcome(FailPoint::StopMonitoring)
    }

    fn start_discovery(&self) -> SubsystemResult<()> {
        self.record(GatewayCall::StartDiscovery);
        self.outcome(FailPoint::StartDiscovery)
    }

    fn stop_discovery(&self) -> SubsystemResult<()> {
        self.record(GatewayCall::StopDiscovery);
        self.outcome(FailPoint::StopDiscovery)
    }

    fn open_connection(&self, device: &ConfigurableDevice) -> SubsystemResult<Arc<dyn DeviceLink>> {
        self.record(GatewayCall::OpenConnection(device.mac_address.clone()));
        self.outcome(FailPoint::OpenConnection)?;
        let link = Arc::new(MockLink::new(
            device.clone(),
            self.auto_connect.load(Ordering::SeqCst),
        ));
        lock(&self.links).push(Arc::clone(&link));
        Ok(link)
    }

    fn shutdown(&self) {
        self.record(GatewayCall::Shutdown);
    }
}

#[derive(Default)]
struct LinkState {
    listener: Option<Arc<dyn ConnectionListener>>,
    connected: bool,
}

/// In-memory [`DeviceLink`].
pub struct MockLink {
    device: ConfigurableDevice,
    auto_connect: bool,
    state: Mutex<LinkState>,
    settings: Mutex<HashMap<SettingId, Setting>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    closes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    incomplete_info: AtomicBool,
    deferred_close: AtomicBool,
}

impl MockLink {
    /// Link to `device` holding the default settings.
    #[must_use]
    pub fn new(device: ConfigurableDevice, auto_connect: bool) -> Self {
        let settings = [
            Setting::ProximityUuid(DEFAULT_PROXIMITY_UUID),
            Setting::Major(1),
            Setting::Minor(1),
        ]
        .into_iter()
        .map(|setting| (setting.id(), setting))
        .collect();

        Self {
            device,
            auto_connect,
            state: Mutex::new(LinkState::default()),
            settings: Mutex::new(settings),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            incomplete_info: AtomicBool::new(false),
            deferred_close: AtomicBool::new(false),
        }
    }

    /// Device this link targets.
    #[must_use]
    pub const fn device(&self) -> &ConfigurableDevice {
        &self.device
    }

    /// Report the pending connection as established.
    pub fn complete_connect(&self) {
        let listener = {
            let mut state = lock(&self.state);
            state.connected = true;
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener.on_connected();
        }
    }

    /// Report the pending connection as failed.
    pub fn fail_connect(&self, message: &str) {
        let listener = lock(&self.state).listener.take();
        if let Some(listener) = listener {
            listener.on_connection_failed(SubsystemError::new(message));
        }
    }

    /// Overwrite a stored setting without counting a write.
    pub fn set_setting(&self, value: Setting) {
        lock(&self.settings).insert(value.id(), value);
    }

    /// Currently stored value of a setting.
    #[must_use]
    pub fn setting(&self, id: SettingId) -> Option<Setting> {
        lock(&self.settings).get(&id).copied()
    }

    /// Make reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make [`DeviceLink::connection_info`] fail.
    pub fn report_incomplete_info(&self, incomplete: bool) {
        self.incomplete_info.store(incomplete, Ordering::SeqCst);
    }

    /// Hold close confirmations until [`MockLink::confirm_close`].
    ///
    /// The listener stays attached meanwhile, so a connect confirmation can
    /// still arrive after the close was requested.
    pub fn defer_close(&self, defer: bool) {
        self.deferred_close.store(defer, Ordering::SeqCst);
    }

    /// Deliver the disconnect confirmation held back by a deferred close.
    pub fn confirm_close(&self) {
        let listener = lock(&self.state).listener.take();
        if let Some(listener) = listener {
            listener.on_disconnected();
        }
    }

    /// Number of reads issued.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes issued.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of times the link was closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("mac", &self.device.mac_address)
            .field("connected", &lock(&self.state).connected)
            .finish_non_exhaustive()
    }
}

impl DeviceLink for MockLink {
    fn connect(&self, listener: Arc<dyn ConnectionListener>) {
        lock(&self.state).listener = Some(listener);
        if self.auto_connect {
            self.complete_connect();
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = lock(&self.state);
            state.connected = false;
            if self.deferred_close.load(Ordering::SeqCst) {
                return;
            }
        }
        self.confirm_close();
    }

    fn connection_info(&self) -> SubsystemResult<ConnectionInfo> {
        if self.incomplete_info.load(Ordering::SeqCst) {
            return Err(SubsystemError::new("device settings are incomplete"));
        }
        let settings = lock(&self.settings);
        let (
            Some(Setting::ProximityUuid(uuid)),
            Some(Setting::Major(major)),
            Some(Setting::Minor(minor)),
        ) = (
            settings.get(&SettingId::ProximityUuid).copied(),
            settings.get(&SettingId::Major).copied(),
            settings.get(&SettingId::Minor).copied(),
        )
        else {
            return Err(SubsystemError::new("device settings are incomplete"));
        };

        Ok(ConnectionInfo {
            battery_percentage: 87,
            color: "ice".to_string(),
            mac_address: self.device.mac_address.clone(),
            major,
            minor,
            name: format!("beacon {}", self.device.device_id),
            uuid,
            settings: DeviceSettingsSnapshot {
                advertising_interval_millis: 950,
                battery_level: 87,
                broadcasting_power: self.device.tx_power,
                firmware: self.device.app_version.clone(),
                hardware: "D3.4".to_string(),
            },
        })
    }

    fn read_setting(&self, id: SettingId) -> BoxFuture<'static, SubsystemResult<Setting>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail_reads.load(Ordering::SeqCst) {
            Err(SubsystemError::new(format!("Could not recover current {id}")))
        } else {
            lock(&self.settings)
                .get(&id)
                .copied()
                .ok_or_else(|| SubsystemError::new(format!("{id} is not available")))
        };
        future::ready(result).boxed()
    }

    fn write_setting(&self, value: Setting) -> BoxFuture<'static, SubsystemResult<Setting>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(SubsystemError::new(format!("Could not change {}", value.id())))
        } else {
            self.set_setting(value);
            Ok(value)
        };
        future::ready(result).boxed()
    }
}

/// A plausible discovered device with address `mac`.
#[must_use]
pub fn sample_device(mac: &MacAddress, rssi: i16) -> ConfigurableDevice {
    ConfigurableDevice {
        mac_address: mac.clone(),
        device_type: "proximity_beacon".to_string(),
        tx_power: -12,
        app_version: "4.13.2".to_string(),
        bootloader_version: "4.1.0".to_string(),
        device_id: mac.as_str().replace(':', "").to_lowercase(),
        discovery_time: Utc::now(),
        is_close: rssi > -60,
        is_shaken: false,
        rssi,
    }
}

/// A plausible ranged beacon.
#[must_use]
pub fn sample_beacon(mac: &MacAddress, major: u16, minor: u16, rssi: i16) -> Beacon {
    Beacon {
        proximity_uuid: DEFAULT_PROXIMITY_UUID,
        major,
        minor,
        mac_address: mac.clone(),
        rssi,
        proximity: Some(if rssi > -60 {
            Proximity::Near
        } else {
            Proximity::Far
        }),
        accuracy: 2.5,
    }
}
