//! Unified error types for the beacon core library.
//!
//! [`BeaconError`] covers every failure a core operation can report, either
//! synchronously to the caller or asynchronously through a consumer handle.
//! Failures surfaced by the beacon subsystem itself are wrapped in
//! [`SubsystemError`], which keeps the subsystem's own message.
//!
//! # Propagation
//!
//! - **Validation errors** (`InvalidRegion`, `NotSubscribed`, `NotDiscovering`,
//!   `UnknownDevice`, `NotConnected`, `InvalidSetting`) are returned from the
//!   operation itself and never touch the registries.
//! - **Subsystem errors** arrive later on the consumer handle that owns the
//!   operation. They never remove a registry entry.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_discovering(active: bool) -> Result<()> {
//!     if !active {
//!         return Err(BeaconError::NotDiscovering);
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_discovering(false).is_err());
//! ```

use std::fmt;

use thiserror::Error;

/// The two keyed subscription concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Continuous reporting of visible beacons in a region.
    Ranging,
    /// Enter/exit transitions for a region.
    Monitoring,
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ranging => f.write_str("ranging"),
            Self::Monitoring => f.write_str("monitoring"),
        }
    }
}

/// A failure reported by the external beacon subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubsystemError {
    message: String,
}

impl SubsystemError {
    /// Wrap a subsystem failure message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message reported by the subsystem.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for calls into the beacon subsystem.
pub type SubsystemResult<T> = std::result::Result<T, SubsystemError>;

/// The unified error type for all core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    // =========================================================================
    // VALIDATION ERRORS
    // =========================================================================
    /// The region descriptor is malformed (e.g. the UUID is not 8-4-4-4-12 hex).
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// A stop was requested for a region that has no active subscription.
    #[error("Region {key} is not subscribed for {concern}, can't stop {concern}")]
    NotSubscribed {
        /// The concern the stop targeted.
        concern: Concern,
        /// The region key that had no entry.
        key: String,
    },

    /// A discovery stop was requested while no discovery is active.
    #[error("Devices are not being discovered, can't stop discovery")]
    NotDiscovering,

    /// The requested MAC address was never seen during discovery.
    #[error("Could not find device '{0}' to connect to. Discover devices first.")]
    UnknownDevice(String),

    /// A setting write was requested without a connected device.
    #[error("No device is connected")]
    NotConnected,

    /// A setting value could not be parsed.
    #[error("Invalid setting value: {0}")]
    InvalidSetting(String),

    /// A setting write was requested but no async runtime is available to run it.
    #[error("No async runtime available to run the setting write")]
    NoRuntime,

    // =========================================================================
    // SUBSYSTEM ERRORS
    // =========================================================================
    /// The beacon subsystem reported a failure.
    #[error("Beacon subsystem error: {0}")]
    Subsystem(#[from] SubsystemError),

    /// An operation succeeded but its result could not be assembled for delivery.
    #[error("Operation succeeded, could not marshal result: {0}")]
    Marshal(String),
}

/// A specialized [`Result`] type for core operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Shorthand for a [`BeaconError::Subsystem`] with the given message.
    pub fn subsystem(message: impl Into<String>) -> Self {
        Self::Subsystem(SubsystemError::new(message))
    }

    /// Returns `true` if this error was detected locally, before any state change.
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegion(_)
                | Self::NotSubscribed { .. }
                | Self::NotDiscovering
                | Self::UnknownDevice(_)
                | Self::NotConnected
                | Self::InvalidSetting(_)
                | Self::NoRuntime
        )
    }

    /// Returns `true` if this error originated in the beacon subsystem.
    #[inline]
    #[must_use]
    pub const fn is_subsystem_error(&self) -> bool {
        matches!(self, Self::Subsystem(_) | Self::Marshal(_))
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRegion(_) => "INVALID_REGION",
            Self::NotSubscribed { .. } => "NOT_SUBSCRIBED",
            Self::NotDiscovering => "NOT_DISCOVERING",
            Self::UnknownDevice(_) => "UNKNOWN_DEVICE",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidSetting(_) => "INVALID_SETTING",
            Self::NoRuntime => "NO_RUNTIME",
            Self::Subsystem(_) => "SUBSYSTEM_ERROR",
            Self::Marshal(_) => "MARSHAL_ERROR",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
