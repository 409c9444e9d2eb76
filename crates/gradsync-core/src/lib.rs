//! Gradsync Core - Device Runtime Layer for Gradient Synchronization
//!
//! This crate provides the accelerator abstractions a gradient communicator
//! drives: device identity, storage classes, element types, device pointers,
//! streams, and the [`Accelerator`] trait that ties them together.
//!
//! # Key Features
//! - Device binding by process rank
//! - Whole-device and single-stream barriers
//! - Stream-ordered elementwise kernels
//! - A simulated backend for exercising multi-process protocols in one process
//!
//! # Example
//! ```rust
//! use gradsync_core::{Accelerator, DType, DeviceId, SimAccelerator, SimCluster, StreamFlags};
//!
//! let acc = SimAccelerator::new(SimCluster::new(1));
//! acc.set_device(DeviceId(0)).unwrap();
//! let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
//! let ptr = acc.alloc(vec![2.0, 4.0]).unwrap();
//!
//! acc.divide_in_place(stream, ptr, 2, DType::F32, 2).unwrap();
//! acc.synchronize_stream(stream).unwrap();
//! assert_eq!(acc.cluster().read(ptr, 2).unwrap(), vec![1.0, 2.0]);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::len_without_is_empty)]

pub mod backends;
pub mod device;
pub mod dtype;
pub mod error;
pub mod memory;
pub mod stream;

// =============================================================================
// Re-exports
// =============================================================================

pub use backends::{Accelerator, SimAccelerator, SimCluster, StreamOp};
pub use device::{DeviceId, StorageClass};
pub use dtype::DType;
pub use error::{Error, Result};
pub use memory::DevicePtr;
pub use stream::{StreamFlags, StreamId};

// =============================================================================
// Version Information
// =============================================================================

/// Returns the version of the gradsync-core crate.
#[must_use]
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
