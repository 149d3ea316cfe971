//! Beacon regions and their canonical registry keys.
//!
//! A region is an identity UUID plus optional major/minor attributes. The
//! registries index subscriptions by [`RegionKey`], which is derived from the
//! `(uuid, major, minor)` triple and compared by value.
//!
//! Each absent field is replaced by the sentinel `"0"` before the parts are
//! joined with `':'`. A region with no UUID and `major = 0` therefore shares a
//! key with one whose major is simply absent. That collision is kept as is.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BeaconError, Result};

/// Placeholder for an absent key component.
pub const KEY_SENTINEL: &str = "0";

/// Separator between key components.
pub const KEY_DELIMITER: char = ':';

/// Canonical 8-4-4-4-12 hex grouping.
static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
        .expect("UUID regex is valid")
});

/// Check whether a string is a UUID in canonical 8-4-4-4-12 hex form.
///
/// # Examples
///
/// ```
/// use beacon_core::region::is_valid_uuid;
///
/// assert!(is_valid_uuid("B9407F30-F5F8-466E-AFF9-25556B57FE6D"));
/// assert!(!is_valid_uuid("B9407F30F5F8466EAFF925556B57FE6D"));
/// ```
#[must_use]
pub fn is_valid_uuid(uuid: &str) -> bool {
    UUID_REGEX.is_match(uuid)
}

/// Parse a canonical UUID string, rejecting every other textual form.
///
/// # Errors
///
/// Returns the offending input if it is not 8-4-4-4-12 hex.
pub fn parse_canonical_uuid(uuid: &str) -> std::result::Result<Uuid, String> {
    if !is_valid_uuid(uuid) {
        return Err(uuid.to_string());
    }
    Uuid::parse_str(uuid).map_err(|_| uuid.to_string())
}

/// Uppercase hyphenated rendering used in keys and payloads.
#[must_use]
pub fn uuid_to_canonical_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}

/// Canonical, comparable key for a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey(String);

impl RegionKey {
    /// Build a key from raw parts, substituting [`KEY_SENTINEL`] for absent ones.
    ///
    /// # Examples
    ///
    /// ```
    /// use beacon_core::region::RegionKey;
    ///
    /// assert_eq!(RegionKey::from_parts(None, Some(1), Some(2)).as_str(), "0:1:2");
    /// ```
    #[must_use]
    pub fn from_parts(uuid: Option<&str>, major: Option<u16>, minor: Option<u16>) -> Self {
        let uuid = uuid.unwrap_or(KEY_SENTINEL);
        let major = major.map_or_else(|| KEY_SENTINEL.to_string(), |m| m.to_string());
        let minor = minor.map_or_else(|| KEY_SENTINEL.to_string(), |m| m.to_string());
        Self(format!("{uuid}{KEY_DELIMITER}{major}{KEY_DELIMITER}{minor}"))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A region request as received from a consumer.
///
/// Numeric fields outside `0..=65535` are treated as absent, matching how the
/// original payloads were read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    /// Optional caller-chosen identifier.
    #[serde(default)]
    pub identifier: Option<String>,

    /// Proximity UUID in 8-4-4-4-12 form.
    #[serde(default)]
    pub uuid: Option<String>,

    /// Major value.
    #[serde(default)]
    pub major: Option<i64>,

    /// Minor value.
    #[serde(default)]
    pub minor: Option<i64>,
}

impl RegionDescriptor {
    /// Descriptor for a UUID with optional major/minor.
    pub fn new(uuid: impl Into<String>, major: Option<u16>, minor: Option<u16>) -> Self {
        Self {
            identifier: None,
            uuid: Some(uuid.into()),
            major: major.map(i64::from),
            minor: minor.map(i64::from),
        }
    }
}

/// A validated beacon region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconRegion {
    identifier: String,
    uuid: Option<Uuid>,
    major: Option<u16>,
    minor: Option<u16>,
    secure: bool,
}

impl BeaconRegion {
    /// Validate a descriptor into a region.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidRegion`] if the UUID is present but not
    /// in canonical 8-4-4-4-12 form.
    pub fn from_descriptor(descriptor: &RegionDescriptor, secure: bool) -> Result<Self> {
        let uuid = descriptor
            .uuid
            .as_deref()
            .map(parse_canonical_uuid)
            .transpose()
            .map_err(|raw| BeaconError::InvalidRegion(format!("invalid UUID '{raw}'")))?;

        let major = descriptor.major.and_then(|v| u16::try_from(v).ok());
        let minor = descriptor.minor.and_then(|v| u16::try_from(v).ok());

        let mut region = Self::new(uuid, major, minor).with_secure(secure);
        if let Some(identifier) = &descriptor.identifier {
            region.identifier.clone_from(identifier);
        }
        Ok(region)
    }

    /// Build a region directly; the identifier defaults to the key string.
    #[must_use]
    pub fn new(uuid: Option<Uuid>, major: Option<u16>, minor: Option<u16>) -> Self {
        let canonical = uuid.as_ref().map(uuid_to_canonical_string);
        let identifier = RegionKey::from_parts(canonical.as_deref(), major, minor).0;
        Self {
            identifier,
            uuid,
            major,
            minor,
            secure: false,
        }
    }

    /// Mark the region as a secure-channel region.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Override the identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// The registry key for this region. The identifier and secure flag do
    /// not participate.
    #[must_use]
    pub fn key(&self) -> RegionKey {
        let canonical = self.uuid.as_ref().map(uuid_to_canonical_string);
        RegionKey::from_parts(canonical.as_deref(), self.major, self.minor)
    }

    /// Region identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Proximity UUID, if any.
    #[must_use]
    pub const fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Major value, if any.
    #[must_use]
    pub const fn major(&self) -> Option<u16> {
        self.major
    }

    /// Minor value, if any.
    #[must_use]
    pub const fn minor(&self) -> Option<u16> {
        self.minor
    }

    /// Whether the secure channel was requested.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for BeaconRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.identifier, self.key())?;
        if self.secure {
            f.write_str(" (secure)")?;
        }
        Ok(())
    }
}
