//! Payload types shared between the subsystem boundary and consumers.
//!
//! Hardware-side values ([`Beacon`], [`ConfigurableDevice`]) come from the
//! beacon subsystem. Consumer-side events ([`RangingEvent`],
//! [`MonitoringEvent`], [`DiscoveryEvent`], [`ConnectionInfo`]) are produced
//! from them by pure translation functions. Field names serialize in the
//! camelCase shape consumers already expect.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::BeaconError;
use crate::region::{parse_canonical_uuid, uuid_to_canonical_string, BeaconRegion};

static MAC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC regex is valid")
});

/// Check whether a string is a colon-separated MAC address.
#[must_use]
pub fn is_valid_mac_address(mac: &str) -> bool {
    MAC_REGEX.is_match(mac)
}

/// A Bluetooth MAC address, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// The address as `AA:BB:CC:DD:EE:FF`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_valid_mac_address(s) {
            Ok(Self(s.to_uppercase()))
        } else {
            Err(BeaconError::UnknownDevice(s.to_string()))
        }
    }
}

impl TryFrom<String> for MacAddress {
    type Error = BeaconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

fn serialize_uuid_upper<S: Serializer>(uuid: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&uuid_to_canonical_string(uuid))
}

// ============================================================================
// Ranging
// ============================================================================

/// Coarse proximity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    /// Within a few centimetres.
    Immediate,
    /// Within a few metres.
    Near,
    /// Further away.
    Far,
    /// Not enough signal to tell.
    Unknown,
}

/// A beacon packet as reported by the subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    /// Proximity UUID broadcast by the beacon.
    pub proximity_uuid: Uuid,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// Hardware address.
    pub mac_address: MacAddress,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Proximity computed by the subsystem, if it could compute one.
    pub proximity: Option<Proximity>,
    /// Distance estimate in metres computed by the subsystem.
    pub accuracy: f64,
}

/// One visible beacon in a ranging event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconSighting {
    /// Proximity UUID.
    #[serde(rename = "proximityUUID", serialize_with = "serialize_uuid_upper")]
    pub proximity_uuid: Uuid,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// Coarse proximity bucket.
    pub proximity: Proximity,
    /// Hardware address.
    pub mac_address: MacAddress,
    /// Distance estimate in metres.
    pub accuracy: f64,
    /// Signal strength in dBm.
    pub rssi: i16,
}

impl From<&Beacon> for BeaconSighting {
    fn from(beacon: &Beacon) -> Self {
        Self {
            proximity_uuid: beacon.proximity_uuid,
            major: beacon.major,
            minor: beacon.minor,
            proximity: beacon.proximity.unwrap_or(Proximity::Unknown),
            mac_address: beacon.mac_address.clone(),
            accuracy: beacon.accuracy,
            rssi: beacon.rssi,
        }
    }
}

/// Region as echoed back to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    /// Region identifier.
    pub identifier: String,
    /// Proximity UUID, if the region has one.
    #[serde(rename = "proximityUUID")]
    pub proximity_uuid: Option<String>,
    /// Major value, if any.
    pub major: Option<u16>,
    /// Minor value, if any.
    pub minor: Option<u16>,
}

impl From<&BeaconRegion> for RegionInfo {
    fn from(region: &BeaconRegion) -> Self {
        Self {
            identifier: region.identifier().to_string(),
            proximity_uuid: region.uuid().as_ref().map(uuid_to_canonical_string),
            major: region.major(),
            minor: region.minor(),
        }
    }
}

/// Everything currently visible in a ranged region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangingEvent {
    /// The queried region.
    pub region: RegionInfo,
    /// All visible beacons, in subsystem order.
    pub beacons: Vec<BeaconSighting>,
}

impl RangingEvent {
    /// Translate a subsystem ranging callback.
    #[must_use]
    pub fn from_hardware(region: &BeaconRegion, beacons: &[Beacon]) -> Self {
        Self {
            region: RegionInfo::from(region),
            beacons: beacons.iter().map(BeaconSighting::from).collect(),
        }
    }
}

// ============================================================================
// Monitoring
// ============================================================================

/// Region transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    /// The device entered the region.
    Entered,
    /// The device left the region.
    Exited,
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entered => f.write_str("entered"),
            Self::Exited => f.write_str("exited"),
        }
    }
}

/// A monitoring transition for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringEvent {
    /// The monitored region.
    pub region: RegionInfo,
    /// Transition.
    pub state: RegionState,
}

impl MonitoringEvent {
    /// Translate a subsystem monitoring callback.
    #[must_use]
    pub fn from_hardware(region: &BeaconRegion, state: RegionState) -> Self {
        Self {
            region: RegionInfo::from(region),
            state,
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// A device advertising the configuration protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurableDevice {
    /// Hardware address.
    pub mac_address: MacAddress,
    /// Device family reported by the subsystem.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Advertised transmit power.
    pub tx_power: i8,
    /// Application firmware version.
    pub app_version: String,
    /// Bootloader version.
    pub bootloader_version: String,
    /// Cloud device identifier.
    pub device_id: String,
    /// When the packet was seen.
    pub discovery_time: DateTime<Utc>,
    /// Whether the device is very close to the receiver.
    pub is_close: bool,
    /// Whether the device was recently shaken.
    pub is_shaken: bool,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// Snapshot of all devices visible in one discovery tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryEvent {
    /// Visible devices, in subsystem order.
    pub devices: Vec<ConfigurableDevice>,
}

// ============================================================================
// Device connection
// ============================================================================

/// Settings reported by a freshly connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettingsSnapshot {
    /// Advertising interval in milliseconds.
    pub advertising_interval_millis: u32,
    /// Battery level in percent.
    pub battery_level: u8,
    /// Broadcast power in dBm.
    pub broadcasting_power: i8,
    /// Firmware version.
    pub firmware: String,
    /// Hardware revision.
    pub hardware: String,
}

/// Connection-info payload delivered on a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Battery level in percent.
    pub battery_percentage: u8,
    /// Casing colour code.
    pub color: String,
    /// Hardware address.
    pub mac_address: MacAddress,
    /// Current major value.
    pub major: u16,
    /// Current minor value.
    pub minor: u16,
    /// Device name.
    pub name: String,
    /// Current proximity UUID.
    #[serde(serialize_with = "serialize_uuid_upper")]
    pub uuid: Uuid,
    /// Nested settings snapshot.
    pub settings: DeviceSettingsSnapshot,
}

/// Identifies a writable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    /// Proximity UUID.
    ProximityUuid,
    /// Major value.
    Major,
    /// Minor value.
    Minor,
}

impl fmt::Display for SettingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProximityUuid => f.write_str("proximity UUID"),
            Self::Major => f.write_str("major"),
            Self::Minor => f.write_str("minor"),
        }
    }
}

/// A setting value read from or written to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "setting", content = "value", rename_all = "camelCase")]
pub enum Setting {
    /// Proximity UUID.
    #[serde(rename = "proximityUUID", serialize_with = "serialize_uuid_upper")]
    ProximityUuid(Uuid),
    /// Major value.
    Major(u16),
    /// Minor value.
    Minor(u16),
}

impl Setting {
    /// Parse a proximity UUID setting from its 8-4-4-4-12 form.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidSetting`] for any other form.
    pub fn proximity_uuid(raw: &str) -> Result<Self, BeaconError> {
        parse_canonical_uuid(raw)
            .map(Self::ProximityUuid)
            .map_err(|raw| BeaconError::InvalidSetting(format!("invalid UUID '{raw}'")))
    }

    /// Which setting this value belongs to.
    #[must_use]
    pub const fn id(&self) -> SettingId {
        match self {
            Self::ProximityUuid(_) => SettingId::ProximityUuid,
            Self::Major(_) => SettingId::Major,
            Self::Minor(_) => SettingId::Minor,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProximityUuid(uuid) => {
                write!(f, "proximity UUID {}", uuid_to_canonical_string(uuid))
            }
            Self::Major(value) => write!(f, "major {value}"),
            Self::Minor(value) => write!(f, "minor {value}"),
        }
    }
}
