//! Error Types - Gradsync Core Error Handling
//!
//! Error type shared by every accelerator backend: device selection, stream
//! management, device memory access and kernel launches.
//!
//! # Key Features
//! - Unified error type for all accelerator operations
//! - Detailed error context for debugging
//! - Integration with `std::error::Error`
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

use crate::device::DeviceId;
use crate::dtype::DType;
use crate::memory::DevicePtr;
use crate::stream::StreamId;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for accelerator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested device does not exist on this node.
    #[error("Device not available: {device} (node has {count} devices)")]
    DeviceNotAvailable {
        /// The unavailable device.
        device: DeviceId,
        /// Number of devices on the node.
        count: usize,
    },

    /// An operation needed an active device but none was selected.
    #[error("No active device selected")]
    NoActiveDevice,

    /// The stream id is unknown or already destroyed.
    #[error("Unknown stream: {stream}")]
    UnknownStream {
        /// The offending stream.
        stream: StreamId,
    },

    /// A device pointer does not refer to a live allocation.
    #[error("Invalid device pointer: {ptr}")]
    InvalidPointer {
        /// The offending pointer.
        ptr: DevicePtr,
    },

    /// An access would run past the end of an allocation.
    #[error("Out of bounds: {count} elements requested from allocation of {len}")]
    OutOfBounds {
        /// Elements requested.
        count: usize,
        /// Elements available.
        len: usize,
    },

    /// The data type is not supported by this operation.
    #[error("Unsupported dtype {dtype} for {operation}")]
    UnsupportedDType {
        /// The rejected data type.
        dtype: DType,
        /// The operation that rejected it.
        operation: &'static str,
    },

    /// A queued stream operation failed when it executed.
    #[error("Stream operation failed on {stream}: {message}")]
    StreamOpFailed {
        /// The stream the operation was queued on.
        stream: StreamId,
        /// Description of the failure.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    InternalError {
        /// Description of the internal error.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for accelerator operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new stream-operation failure.
    #[must_use]
    pub fn stream_op(stream: StreamId, message: impl Into<String>) -> Self {
        Self::StreamOpFailed {
            stream,
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DeviceNotAvailable {
            device: DeviceId(3),
            count: 2,
        };
        assert!(err.to_string().contains("device:3"));
        assert!(err.to_string().contains("2 devices"));
    }

    #[test]
    fn test_stream_op_helper() {
        let err = Error::stream_op(StreamId::from_raw(7), "collective mismatch");
        assert!(matches!(err, Error::StreamOpFailed { .. }));
        assert!(err.to_string().contains("collective mismatch"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::NoActiveDevice, Error::NoActiveDevice);
    }
}
