//! Device Abstraction - Accelerator Identity and Storage Classes
//!
//! Identifies accelerator devices on a node and the storage classes (array
//! classes) that back device memory. A communicator binds each process to
//! exactly one device and only operates directly on the storage classes its
//! backend advertises.
//!
//! # Example
//! ```rust
//! use gradsync_core::{DeviceId, StorageClass};
//!
//! let device = DeviceId::for_rank(1);
//! assert_eq!(device.index(), 1);
//! assert_eq!(device.to_string(), "device:1");
//!
//! let class = StorageClass::new("CudaCachedArray");
//! assert_eq!(class.as_str(), "CudaCachedArray");
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

// =============================================================================
// DeviceId
// =============================================================================

/// Index of an accelerator device on the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl DeviceId {
    /// Returns the device bound to a process rank.
    ///
    /// One device per rank, ordered identically on every member of the group.
    #[must_use]
    pub const fn for_rank(rank: usize) -> Self {
        Self(rank)
    }

    /// Returns the device index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

// =============================================================================
// StorageClass
// =============================================================================

/// Identifier of the array class backing a buffer (host array, device array,
/// cached device array, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageClass(String);

impl StorageClass {
    /// Creates a storage class identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this class appears in `allowed`.
    #[must_use]
    pub fn is_one_of(&self, allowed: &[StorageClass]) -> bool {
        allowed.iter().any(|c| c == self)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageClass {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// =============================================================================
// Tests
// =============================================================================
