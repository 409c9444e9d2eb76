//! Streams - Ordered Device Work Queues
//!
//! A stream is an ordered, non-blocking queue of device operations.
//! Operations on one stream execute in issuance order; across streams the
//! order is unspecified unless explicitly synchronized.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

// =============================================================================
// StreamId
// =============================================================================

/// Handle of a stream created by an [`Accelerator`](crate::Accelerator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Wraps a raw backend stream handle.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw backend stream handle.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

// =============================================================================
// StreamFlags
// =============================================================================

/// Creation flags for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFlags {
    /// Implicitly synchronizes with the device's legacy default stream.
    Default,
    /// Does not synchronize with the default stream.
    #[default]
    NonBlocking,
}

impl StreamFlags {
    /// Returns the flags for the requested blocking behavior.
    #[must_use]
    pub const fn from_non_blocking(non_blocking: bool) -> Self {
        if non_blocking {
            Self::NonBlocking
        } else {
            Self::Default
        }
    }
}
