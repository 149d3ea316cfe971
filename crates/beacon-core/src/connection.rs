//! Single-slot device connection manager and the write-with-verify protocol.
//!
//! The core holds at most one device connection. Targeting a different
//! device forces the current link closed before the new attempt starts.
//! Each attempt carries a [`ConnectionId`]. Callbacks from an attempt that has
//! since been replaced are ignored, except disconnect confirmations, which
//! still complete a pending disconnect.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnecting -> Idle
//!            \-> Failed -> Idle
//! ```
//!
//! Setting writes first read the current value and skip the write when it
//! already matches. UUID, major and minor all follow that same policy.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::consumer::Consumer;
use crate::discovery::DiscoveredDeviceSet;
use crate::error::{BeaconError, Result, SubsystemError, SubsystemResult};
use crate::gateway::{ConnectionListener, DeviceLink, SubsystemGateway};
use crate::types::{ConfigurableDevice, ConnectionInfo, MacAddress, Setting};

/// Lifecycle of the connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Idle,
    /// An attempt is in flight.
    Connecting,
    /// The link is up.
    Connected,
    /// A close was requested and its confirmation is pending.
    Disconnecting,
    /// The last attempt failed; transient, immediately followed by `Idle`.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identifies one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The device the slot currently targets.
struct DeviceConnection {
    id: ConnectionId,
    device: ConfigurableDevice,
    link: Option<Arc<dyn DeviceLink>>,
}

struct ConnectionSlot {
    state: ConnectionState,
    current: Option<DeviceConnection>,
    pending_connect: Option<Consumer<ConnectionInfo>>,
    pending_disconnect: Option<Consumer<()>>,
    next_id: u64,
}

impl ConnectionSlot {
    fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current.as_ref().is_some_and(|c| c.id == id)
    }

    fn transition(&mut self, to: ConnectionState) {
        debug!(from = %self.state, to = %to, "connection state change");
        self.state = to;
    }
}

struct Shared {
    gateway: Arc<dyn SubsystemGateway>,
    discovered: Arc<DiscoveredDeviceSet>,
    slot: Mutex<ConnectionSlot>,
    setting_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_connected(&self, id: ConnectionId) {
        let (consumer, link, mac) = {
            let mut slot = self.lock();
            if !slot.is_current(id) {
                debug!(attempt = %id, "stale connect confirmation ignored");
                return;
            }
            if slot.state != ConnectionState::Connecting {
                // Disconnect already requested; its confirmation settles the consumer.
                debug!(attempt = %id, state = %slot.state, "late connect confirmation ignored");
                return;
            }
            slot.transition(ConnectionState::Connected);
            let current = slot.current.as_ref();
            let link = current.and_then(|c| c.link.clone());
            let mac = current.map(|c| c.device.mac_address.clone());
            (slot.pending_connect.take(), link, mac)
        };

        if let Some(mac) = &mac {
            info!(attempt = %id, mac = %mac, "device connected");
        }

        let (Some(consumer), Some(link)) = (consumer, link) else {
            return;
        };
        match link.connection_info() {
            Ok(info) => {
                consumer.done(Some(info));
            }
            Err(err) => {
                error!(attempt = %id, error = %err, "connected but device info is incomplete");
                consumer.error(BeaconError::Marshal(err.message().to_string()));
            }
        }
    }

    fn handle_failed(&self, id: ConnectionId, err: SubsystemError) {
        let consumer = {
            let mut slot = self.lock();
            if !slot.is_current(id) {
                debug!(attempt = %id, error = %err, "stale connect failure ignored");
                return;
            }
            slot.transition(ConnectionState::Failed);
            slot.current = None;
            slot.transition(ConnectionState::Idle);
            slot.pending_connect.take()
        };

        error!(attempt = %id, error = %err, "device connection failed");
        if let Some(consumer) = consumer {
            consumer.error(BeaconError::Subsystem(err));
        }
    }

    fn handle_disconnected(&self, id: ConnectionId) {
        let (disconnect_consumer, orphaned_connect) = {
            let mut slot = self.lock();
            let mut orphaned = None;
            if slot.is_current(id) {
                if let Some(current) = slot.current.as_mut() {
                    current.link = None;
                }
                orphaned = slot.pending_connect.take();
                slot.transition(ConnectionState::Idle);
            }
            (slot.pending_disconnect.take(), orphaned)
        };

        info!(attempt = %id, "device disconnected");
        if let Some(consumer) = orphaned_connect {
            consumer.error(BeaconError::subsystem(
                "device disconnected before the connection completed",
            ));
        }
        if let Some(consumer) = disconnect_consumer {
            consumer.done(None);
        }
    }
}

/// Listener handed to the gateway for one attempt.
struct AttemptListener {
    id: ConnectionId,
    shared: Weak<Shared>,
}

impl ConnectionListener for AttemptListener {
    fn on_connected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_connected(self.id);
        }
    }

    fn on_connection_failed(&self, error: SubsystemError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_failed(self.id, error);
        }
    }

    fn on_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_disconnected(self.id);
        }
    }
}

/// Result of a successful write-with-verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The device already held the requested value; nothing was written.
    Unchanged(Setting),
    /// The value was written; carries what the device stored.
    Written(Setting),
}

impl WriteOutcome {
    /// The setting value the device now holds.
    #[must_use]
    pub const fn value(&self) -> Setting {
        match self {
            Self::Unchanged(value) | Self::Written(value) => *value,
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    future: BoxFuture<'static, SubsystemResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(BeaconError::Subsystem),
        Err(_) => Err(BeaconError::subsystem(format!(
            "setting {operation} timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Read the setting, and write `requested` only if it differs.
///
/// A failed read stops the protocol before any write is issued.
///
/// # Errors
///
/// Returns [`BeaconError::Subsystem`] if the read or the write fails or
/// exceeds `limit`.
pub async fn verify_and_write(
    link: &dyn DeviceLink,
    requested: Setting,
    limit: Duration,
) -> Result<WriteOutcome> {
    let current = bounded(limit, "read", link.read_setting(requested.id()))
        .await
        .map_err(|err| {
            warn!(setting = %requested.id(), error = %err, "could not read current value");
            err
        })?;

    if current == requested {
        debug!(current = %current, "value unchanged, skipping write");
        return Ok(WriteOutcome::Unchanged(current));
    }

    debug!(current = %current, requested = %requested, "writing new value");
    let stored = bounded(limit, "write", link.write_setting(requested))
        .await
        .map_err(|err| {
            warn!(requested = %requested, error = %err, "could not write value");
            err
        })?;
    info!(stored = %stored, "setting written");
    Ok(WriteOutcome::Written(stored))
}

/// Owner of the single device connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    runtime: Option<Handle>,
}

impl ConnectionManager {
    /// Create a manager resolving MAC addresses through `discovered`.
    ///
    /// Setting writes are spawned on `runtime`, or on the runtime current at
    /// the write call when `None`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn SubsystemGateway>,
        discovered: Arc<DiscoveredDeviceSet>,
        setting_timeout: Duration,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                gateway,
                discovered,
                slot: Mutex::new(ConnectionSlot {
                    state: ConnectionState::Idle,
                    current: None,
                    pending_connect: None,
                    pending_disconnect: None,
                    next_id: 0,
                }),
                setting_timeout,
            }),
            runtime,
        }
    }

    /// Current state of the slot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// MAC address of the device the slot targets, if any.
    #[must_use]
    pub fn current_device(&self) -> Option<MacAddress> {
        self.shared
            .lock()
            .current
            .as_ref()
            .map(|c| c.device.mac_address.clone())
    }

    /// Connect to a previously discovered device.
    ///
    /// The outcome arrives on `consumer`: `Done(Some(info))` on success,
    /// `Error(Subsystem)` if the link fails, `Error(Marshal)` if the link is
    /// up but its info is incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::UnknownDevice`] if `mac` was never discovered.
    pub fn connect(&self, mac: &str, consumer: Consumer<ConnectionInfo>) -> Result<()> {
        let mac: MacAddress = mac
            .parse()
            .map_err(|_| BeaconError::UnknownDevice(mac.to_string()))?;
        let device = self
            .shared
            .discovered
            .find_latest(&mac)
            .ok_or_else(|| BeaconError::UnknownDevice(mac.to_string()))?;

        let (replaced, superseded, id) = {
            let mut slot = self.shared.lock();

            let same_device = slot
                .current
                .as_ref()
                .is_some_and(|c| c.device.mac_address == mac);
            if same_device {
                match slot.state {
                    ConnectionState::Connected => {
                        let link = slot.current.as_ref().and_then(|c| c.link.clone());
                        drop(slot);
                        if let Some(link) = link {
                            debug!(mac = %mac, "already connected, reporting current info");
                            match link.connection_info() {
                                Ok(info) => consumer.done(Some(info)),
                                Err(err) => {
                                    consumer.error(BeaconError::Marshal(err.message().to_string()))
                                }
                            };
                        }
                        return Ok(());
                    }
                    ConnectionState::Connecting => {
                        debug!(
                            mac = %mac,
                            consumer = %consumer.id(),
                            "already connecting, rebinding consumer"
                        );
                        let superseded = slot.pending_connect.replace(consumer);
                        drop(slot);
                        notify_superseded(superseded);
                        return Ok(());
                    }
                    _ => {}
                }
            }

            let replaced = slot.current.take().and_then(|c| c.link);
            let id = slot.allocate_id();
            slot.current = Some(DeviceConnection {
                id,
                device: device.clone(),
                link: None,
            });
            let superseded = slot.pending_connect.replace(consumer);
            slot.transition(ConnectionState::Connecting);
            (replaced, superseded, id)
        };

        notify_superseded(superseded);

        if let Some(previous) = replaced {
            info!(mac = %mac, "switching devices, closing previous connection");
            previous.close();
        }

        info!(attempt = %id, mac = %mac, "connecting to device");
        let link = match self.shared.gateway.open_connection(&device) {
            Ok(link) => link,
            Err(err) => {
                self.shared.handle_failed(id, err);
                return Ok(());
            }
        };

        let attached = {
            let mut slot = self.shared.lock();
            match slot.current.as_mut() {
                Some(current) if current.id == id => {
                    current.link = Some(Arc::clone(&link));
                    true
                }
                _ => false,
            }
        };

        if attached {
            link.connect(Arc::new(AttemptListener {
                id,
                shared: Arc::downgrade(&self.shared),
            }));
        } else {
            debug!(attempt = %id, "attempt superseded before the link opened");
        }
        Ok(())
    }

    /// Disconnect the current device.
    ///
    /// `consumer` receives `Done(None)` once the subsystem confirms. With no
    /// active or connecting link, it is completed immediately.
    pub fn disconnect(&self, consumer: Consumer<()>) {
        let (link, cancelled) = {
            let mut slot = self.shared.lock();
            let active = matches!(
                slot.state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            let link = if active {
                slot.current.as_mut().and_then(|c| c.link.take())
            } else {
                None
            };

            match link {
                Some(link) => {
                    slot.pending_disconnect = Some(consumer);
                    slot.transition(ConnectionState::Disconnecting);
                    (Some(link), None)
                }
                None => {
                    let cancelled = if active {
                        // Connecting, link not opened yet: abandon the attempt.
                        slot.current = None;
                        slot.transition(ConnectionState::Idle);
                        slot.pending_connect.take()
                    } else {
                        None
                    };
                    drop(slot);
                    debug!("no active connection, disconnect is a no-op");
                    consumer.done(None);
                    (None, cancelled)
                }
            }
        };

        if let Some(pending) = cancelled {
            pending.error(BeaconError::subsystem("connection attempt cancelled by disconnect"));
        }
        if let Some(link) = link {
            info!("closing device connection");
            link.close();
        }
    }

    /// Close any link without signalling consumers. Used at shutdown.
    pub fn release(&self) {
        let link = {
            let mut slot = self.shared.lock();
            let link = slot.current.take().and_then(|c| c.link);
            slot.pending_connect = None;
            slot.transition(ConnectionState::Idle);
            link
        };
        if let Some(link) = link {
            info!("releasing device connection");
            link.close();
        }
    }

    /// Write `value` to the connected device using write-with-verify.
    ///
    /// Returns immediately; `consumer` receives `Done(Some(value))` when the
    /// device holds the value, or `Error(Subsystem)` if the read or the write
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotConnected`] without a connected device, or
    /// [`BeaconError::NoRuntime`] if the manager holds no runtime handle and
    /// the caller is outside any runtime.
    pub fn write_setting(&self, value: Setting, consumer: Consumer<Setting>) -> Result<()> {
        let link = self.connected_link()?;
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(BeaconError::NoRuntime)?;
        let limit = self.shared.setting_timeout;
        let span = info_span!("setting_write", setting = %value.id(), consumer = %consumer.id());

        runtime.spawn(
            async move {
                match verify_and_write(link.as_ref(), value, limit).await {
                    Ok(outcome) => consumer.done(Some(outcome.value())),
                    Err(err) => consumer.error(err),
                };
            }
            .instrument(span),
        );
        Ok(())
    }

    fn connected_link(&self) -> Result<Arc<dyn DeviceLink>> {
        let slot = self.shared.lock();
        if slot.state != ConnectionState::Connected {
            return Err(BeaconError::NotConnected);
        }
        slot.current
            .as_ref()
            .and_then(|c| c.link.clone())
            .filter(|link| link.is_connected())
            .ok_or(BeaconError::NotConnected)
    }
}

fn notify_superseded(consumer: Option<Consumer<ConnectionInfo>>) {
    if let Some(consumer) = consumer {
        consumer.error(BeaconError::subsystem(
            "connection attempt superseded by a new connect request",
        ));
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("device", &self.current_device())
            .finish_non_exhaustive()
    }
}
