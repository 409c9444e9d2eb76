//! Communicator - Process-Wide Gradient Communicator
//!
//! Owns the process identity, the engine handle and the reduction stream.
//! Created by [`Communicator::init`], used for any number of all-reduce
//! rounds, released once by [`Communicator::finalize`] (or on drop).
//!
//! Collectives take `&mut self`: one driver per communicator.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::Arc;

use gradsync_core::{Accelerator, DeviceId, StorageClass, StreamId};

use crate::allreduce::AllReduceReport;
use crate::bootstrap::ProcessIdentity;
use crate::collectives::CollectiveOp;
use crate::config::CommConfig;
use crate::engine::{CollectiveEngine, RawCommunicator};
use crate::error::{CommError, Result};
use crate::registry::ParameterRegistry;
use crate::sync::stream_barrier;

// =============================================================================
// CommunicatorHandle
// =============================================================================

/// The engine handle and the stream reductions are queued on.
pub struct CommunicatorHandle {
    raw: Box<dyn RawCommunicator>,
    stream: StreamId,
}

impl CommunicatorHandle {
    pub(crate) fn new(raw: Box<dyn RawCommunicator>, stream: StreamId) -> Self {
        Self { raw, stream }
    }

    /// Returns the reduction stream.
    #[must_use]
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub(crate) fn raw_mut(&mut self) -> &mut dyn RawCommunicator {
        self.raw.as_mut()
    }
}

// =============================================================================
// Communicator
// =============================================================================

/// Gradient communicator of one process.
pub struct Communicator {
    identity: ProcessIdentity,
    config: CommConfig,
    accelerator: Arc<dyn Accelerator>,
    engine: Arc<dyn CollectiveEngine>,
    handle: Option<CommunicatorHandle>,
}

impl Communicator {
    pub(crate) fn from_parts(
        identity: ProcessIdentity,
        config: CommConfig,
        accelerator: Arc<dyn Accelerator>,
        engine: Arc<dyn CollectiveEngine>,
        handle: CommunicatorHandle,
    ) -> Self {
        Self {
            identity,
            config,
            accelerator,
            engine,
            handle: Some(handle),
        }
    }

    /// Returns the identity of this process.
    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.identity.rank()
    }

    /// Returns the number of processes.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.identity.world_size()
    }

    /// Returns the device bound to this process.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.identity.device()
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Returns the accelerator.
    #[must_use]
    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accelerator
    }

    /// Returns the name of the collective engine.
    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Returns true until [`Communicator::finalize`] runs.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the reduction stream.
    pub fn stream(&self) -> Result<StreamId> {
        self.handle
            .as_ref()
            .map(CommunicatorHandle::stream)
            .ok_or(CommError::NotInitialized)
    }

    pub(crate) fn handle_mut(&mut self) -> Result<&mut CommunicatorHandle> {
        self.handle.as_mut().ok_or(CommError::NotInitialized)
    }

    /// Storage classes the accelerator's kernels accept without a copy.
    #[must_use]
    pub fn allowed_storage_classes(&self) -> Vec<StorageClass> {
        self.accelerator.storage_classes()
    }

    /// Returns true if `op` has an implementation.
    #[must_use]
    pub fn supports(&self, op: CollectiveOp) -> bool {
        op.is_supported()
    }

    /// Runs collective `op` over the gradients of `registry`.
    ///
    /// Unsupported collectives fail with [`CommError::Unimplemented`] before
    /// touching any buffer, stream or barrier.
    pub fn run(
        &mut self,
        op: CollectiveOp,
        registry: &dyn ParameterRegistry,
        division: bool,
    ) -> Result<AllReduceReport> {
        match op {
            CollectiveOp::AllReduce => self.all_reduce_in_place(registry, division),
            CollectiveOp::Reduce
            | CollectiveOp::ReduceScatter
            | CollectiveOp::Broadcast
            | CollectiveOp::AllGather
            | CollectiveOp::AllReduceAsync
            | CollectiveOp::ReduceAsync
            | CollectiveOp::ReduceScatterAsync
            | CollectiveOp::BroadcastAsync
            | CollectiveOp::AllGatherAsync => Err(CommError::Unimplemented { op }),
        }
    }

    /// Drains and destroys the stream, then destroys the engine handle.
    ///
    /// Fails with [`CommError::NotInitialized`] if already finalized. The
    /// handle is released even if draining the stream fails.
    pub fn finalize(&mut self) -> Result<()> {
        let mut handle = self.handle.take().ok_or(CommError::NotInitialized)?;
        let stream = handle.stream;

        let drained = stream_barrier(self.accelerator.as_ref(), stream);
        let destroyed_stream = self.accelerator.destroy_stream(stream);
        let destroyed_raw = handle.raw.destroy();

        tracing::info!(rank = self.rank(), "communicator finalized");
        drained?;
        destroyed_stream?;
        destroyed_raw
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(err) = self.finalize() {
                tracing::warn!(rank = self.rank(), error = %err, "finalize on drop failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
