//! Backends - Accelerator Implementations
//!
//! This module defines the [`Accelerator`] trait, the device-runtime seam a
//! communicator drives, and the backends that implement it.
//!
//! # Available Backends
//! - `sim` - simulated accelerator: host memory stands in for device memory and
//!   stream operations are deferred closures executed in FIFO order when the
//!   stream or the whole device is synchronized
//!
//! Hardware runtimes implement the same trait outside this crate.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::device::{DeviceId, StorageClass};
use crate::dtype::DType;
use crate::error::Result;
use crate::memory::DevicePtr;
use crate::stream::{StreamFlags, StreamId};

// =============================================================================
// Backend Modules
// =============================================================================

pub mod sim;

// =============================================================================
// Re-exports
// =============================================================================

pub use sim::{SimAccelerator, SimCluster, StreamOp};

// =============================================================================
// Accelerator Trait
// =============================================================================

/// Device runtime used by a communicator.
///
/// One instance belongs to one process. Methods take `&self`; backends keep
/// their mutable state behind locks, as the process is driven by one thread
/// but the handle may be shared with helpers such as a collective engine.
pub trait Accelerator: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Returns the number of devices visible to this process.
    fn device_count(&self) -> usize;

    /// Selects the active device for every subsequent call from this process.
    fn set_device(&self, device: DeviceId) -> Result<()>;

    /// Returns the active device, if one was selected.
    fn current_device(&self) -> Option<DeviceId>;

    /// Blocks until all outstanding work on the active device completes,
    /// whatever stream it was queued on.
    fn synchronize_device(&self) -> Result<()>;

    /// Creates a stream on the active device.
    fn create_stream(&self, flags: StreamFlags) -> Result<StreamId>;

    /// Destroys a stream.
    fn destroy_stream(&self, stream: StreamId) -> Result<()>;

    /// Blocks until every operation queued on `stream` completes.
    fn synchronize_stream(&self, stream: StreamId) -> Result<()>;

    /// Queues an elementwise `x / divisor` over `count` elements at `ptr`.
    ///
    /// Does not block; the kernel runs after everything already queued on
    /// `stream`.
    fn divide_in_place(
        &self,
        stream: StreamId,
        ptr: DevicePtr,
        count: usize,
        dtype: DType,
        divisor: usize,
    ) -> Result<()>;

    /// Returns the storage classes this backend operates on directly.
    fn storage_classes(&self) -> Vec<StorageClass>;
}
