//! Memory - Device Pointers
//!
//! Opaque addresses into device memory. Gradient variables hand these out
//! once their data is materialized on the device; collective engines and
//! kernels receive them together with an element count and dtype.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

/// An address in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(u64);

impl DevicePtr {
    /// Wraps a raw device address.
    #[must_use]
    pub const fn from_raw(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw device address.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
