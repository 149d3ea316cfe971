//! # beacon-core
//!
//! Subscription and event-routing core for the beacon-bridge system.
//!
//! This crate provides:
//! - Region-keyed subscriptions for beacon ranging and region monitoring
//! - A single-subscriber discovery slot for configurable devices
//! - A single-slot device connection with write-with-verify settings
//! - Translation of hardware events into consumer payloads
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`core`] - The [`BeaconCore`] façade every consumer talks to
//! - [`region`] - Region descriptors, hardware regions and the canonical region key
//! - [`registry`] - Key-to-consumer subscription registries
//! - [`discovery`] - Discovery slot and the discovered-device log
//! - [`router`] - Routing of subsystem callbacks to consumers
//! - [`connection`] - Device connection state machine and setting writes
//! - [`gateway`] - Traits bounding the external beacon subsystem
//! - [`consumer`] - Consumer handles and the signals they carry
//! - [`types`] - Hardware and consumer payload types
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod consumer;
pub mod core;
pub mod discovery;
pub mod error;
pub mod gateway;
#[cfg(any(test, feature = "mock-gateway"))]
pub mod mock;
pub mod region;
pub mod registry;
pub mod router;
pub mod types;

// Re-export primary types for convenience
pub use crate::core::BeaconCore;
pub use config::{
    BeaconConfig, ConfigError, ConfigResult, ConnectionConfig, LogFormat, LoggingConfig,
};
pub use connection::{ConnectionId, ConnectionManager, ConnectionState, WriteOutcome};
pub use consumer::{channel, Consumer, ConsumerId, ConsumerStream, Signal};
pub use error::{BeaconError, Concern, Result, SubsystemError, SubsystemResult};
pub use gateway::{
    ConnectionListener, DeviceLink, DiscoveryListener, MonitoringListener, RangingListener,
    SubsystemGateway,
};
#[cfg(any(test, feature = "mock-gateway"))]
pub use mock::{GatewayCall, MockGateway, MockLink};
pub use region::{is_valid_uuid, BeaconRegion, RegionDescriptor, RegionKey};
pub use types::{
    is_valid_mac_address, Beacon, BeaconSighting, ConfigurableDevice, ConnectionInfo,
    DiscoveryEvent, MacAddress, MonitoringEvent, Proximity, RangingEvent, RegionInfo,
    RegionState, Setting, SettingId,
};
