//! Bootstrap - Communicator Initialization
//!
//! Turns an ambient process group into an initialized [`Communicator`]:
//!
//! 1. query rank and size from the process group
//! 2. bind the accelerator device whose index equals the rank
//! 3. wait for every member to bind
//! 4. generate a unique group id on the root
//! 5. broadcast the id bytes from the root
//! 6. create the per-rank communicator handle
//! 7. create the reduction stream
//!
//! Every failure is reported with the stage it happened in, and resources
//! created before the failure are released. Device binding assumes one
//! device per rank, ordered identically on every member.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::sync::Arc;

use gradsync_core::{Accelerator, DeviceId, StreamFlags};

use crate::communicator::{Communicator, CommunicatorHandle};
use crate::config::CommConfig;
use crate::engine::CollectiveEngine;
use crate::error::{CommError, Result};
use crate::process_group::ProcessGroup;
use crate::unique_id::{UniqueGroupId, UNIQUE_ID_BYTES};

/// Rank that generates and broadcasts the unique group id.
pub const ROOT_RANK: usize = 0;

// =============================================================================
// InitStage
// =============================================================================

/// Step of communicator initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStage {
    /// Querying rank and size from the process group.
    GroupQuery,
    /// Selecting the device for this rank.
    DeviceBind,
    /// Waiting for every member to bind its device.
    GroupBarrier,
    /// Generating the unique group id on the root.
    UniqueIdGenerate,
    /// Broadcasting the unique group id.
    UniqueIdBroadcast,
    /// Creating the communicator handle.
    HandleCreate,
    /// Creating the reduction stream.
    StreamCreate,
}

impl InitStage {
    /// Every stage in execution order.
    pub const ALL: [InitStage; 7] = [
        InitStage::GroupQuery,
        InitStage::DeviceBind,
        InitStage::GroupBarrier,
        InitStage::UniqueIdGenerate,
        InitStage::UniqueIdBroadcast,
        InitStage::HandleCreate,
        InitStage::StreamCreate,
    ];

    /// Returns the human-readable name of the stage.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            InitStage::GroupQuery => "group query",
            InitStage::DeviceBind => "device bind",
            InitStage::GroupBarrier => "group barrier",
            InitStage::UniqueIdGenerate => "unique id generate",
            InitStage::UniqueIdBroadcast => "unique id broadcast",
            InitStage::HandleCreate => "handle create",
            InitStage::StreamCreate => "stream create",
        }
    }
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// ProcessIdentity
// =============================================================================

/// Rank, group size and bound device of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    rank: usize,
    world_size: usize,
    device: DeviceId,
}

impl ProcessIdentity {
    /// Validates rank and size and derives the device from the rank.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(CommError::invalid_group("process group is empty"));
        }
        if rank >= world_size {
            return Err(CommError::invalid_group(format!(
                "rank {rank} outside group of {world_size}"
            )));
        }
        Ok(Self {
            rank,
            world_size,
            device: DeviceId::for_rank(rank),
        })
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the number of processes.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Returns the device bound to this process.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Returns true for the rank that generates the unique id.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rank == ROOT_RANK
    }
}

// =============================================================================
// Initialization
// =============================================================================

trait StageExt<T> {
    fn at(self, stage: InitStage) -> Result<T>;
}

impl<T, E: Into<CommError>> StageExt<T> for core::result::Result<T, E> {
    fn at(self, stage: InitStage) -> Result<T> {
        self.map_err(|e| CommError::init(stage, e.into()))
    }
}

impl Communicator {
    /// Bootstraps a communicator for this process.
    ///
    /// Collective over `group`: every member must call it. Either returns an
    /// initialized communicator or a [`CommError::Initialization`] naming the
    /// failed stage.
    pub fn init(
        group: &dyn ProcessGroup,
        accelerator: Arc<dyn Accelerator>,
        engine: Arc<dyn CollectiveEngine>,
        config: CommConfig,
    ) -> Result<Self> {
        let result = Self::bootstrap(group, accelerator, engine, config);
        match &result {
            Ok(comm) => tracing::info!(
                rank = comm.rank(),
                world_size = comm.world_size(),
                device = %comm.device(),
                "communicator initialized"
            ),
            Err(err) => tracing::error!(stage = ?err.stage(), error = %err, "communicator init failed"),
        }
        result
    }

    fn bootstrap(
        group: &dyn ProcessGroup,
        accelerator: Arc<dyn Accelerator>,
        engine: Arc<dyn CollectiveEngine>,
        config: CommConfig,
    ) -> Result<Self> {
        let identity = group
            .size()
            .and_then(|size| ProcessIdentity::new(group.rank()?, size))
            .at(InitStage::GroupQuery)?;
        let rank = identity.rank();
        tracing::debug!(rank, world_size = identity.world_size(), group = group.name(), "group queried");

        accelerator
            .set_device(identity.device())
            .at(InitStage::DeviceBind)?;

        group.barrier().at(InitStage::GroupBarrier)?;

        let mut id_bytes = [0u8; UNIQUE_ID_BYTES];
        if identity.is_root() {
            let id = engine
                .generate_unique_id()
                .at(InitStage::UniqueIdGenerate)?;
            id_bytes = id.into_bytes();
        }

        group
            .broadcast_bytes(&mut id_bytes, ROOT_RANK)
            .at(InitStage::UniqueIdBroadcast)?;
        let id = UniqueGroupId::from_bytes(id_bytes);
        tracing::debug!(rank, id = %id, "unique id received");

        let mut raw = engine
            .create_communicator(identity.world_size(), &id, rank)
            .at(InitStage::HandleCreate)?;

        let flags = StreamFlags::from_non_blocking(config.stream.non_blocking);
        let stream = match accelerator.create_stream(flags) {
            Ok(stream) => stream,
            Err(err) => {
                if let Err(destroy_err) = raw.destroy() {
                    tracing::warn!(rank, error = %destroy_err, "releasing handle after failed init");
                }
                return Err(CommError::init(InitStage::StreamCreate, err.into()));
            }
        };

        Ok(Communicator::from_parts(
            identity,
            config,
            accelerator,
            engine,
            CommunicatorHandle::new(raw, stream),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
