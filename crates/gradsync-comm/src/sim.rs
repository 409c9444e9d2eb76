//! Simulated Collective Engine - In-Process Communicator Groups
//!
//! A collective engine for [`SimAccelerator`] ranks that share one
//! [`SimCluster`]. Reductions are queued on the caller's stream and, when the
//! stream is synchronized, rendezvous with the same call of every peer.
//! Calls are matched by issue order: the n-th reduction of every member forms
//! one round. A round whose members disagree on element count, dtype or
//! operation fails on every member.
//!
//! [`SimWorld`] wires up a whole simulated node for tests and demos.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use gradsync_core::backends::sim::SIM_ARRAY;
use gradsync_core::{
    DType, DevicePtr, Error as DeviceError, SimAccelerator, SimCluster, StorageClass, StreamId,
};
use parking_lot::{Condvar, Mutex};

use crate::engine::{CollectiveEngine, RawCommunicator, ReduceOp};
use crate::error::{CommError, Result};
use crate::process_group::ThreadGroup;
use crate::registry::GradientVariable;
use crate::unique_id::UniqueGroupId;

// =============================================================================
// Rounds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    count: usize,
    dtype: DType,
    op: ReduceOp,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} of {} x {}", self.op, self.count, self.dtype)
    }
}

#[derive(Debug)]
struct Round {
    contributions: Vec<Option<(Signature, Vec<f32>)>>,
    arrived: usize,
    result: Option<core::result::Result<Vec<f32>, String>>,
    readers_left: usize,
}

impl Round {
    fn new(world_size: usize) -> Self {
        Self {
            contributions: vec![None; world_size],
            arrived: 0,
            result: None,
            readers_left: world_size,
        }
    }

    fn reduce(&self, seq: u64) -> core::result::Result<Vec<f32>, String> {
        let mut members = self.contributions.iter().enumerate();
        let Some((_, Some((first, data)))) = members.next() else {
            return Err(format!("round {seq} closed without rank 0"));
        };

        let mut acc = data.clone();
        for (rank, contribution) in members {
            let Some((signature, data)) = contribution else {
                return Err(format!("round {seq} closed without rank {rank}"));
            };
            if signature != first {
                return Err(format!(
                    "collective mismatch in round {seq}: rank 0 issued {first}, rank {rank} issued {signature}"
                ));
            }
            first.op.accumulate(&mut acc, data);
        }
        Ok(acc)
    }
}

/// Membership of one rank in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Pending,
    Joined,
    Left,
}

/// Shared state of one communicator group.
#[derive(Debug)]
struct SimGroup {
    world_size: usize,
    members: Mutex<Vec<Membership>>,
    rounds: Mutex<HashMap<u64, Round>>,
    ready: Condvar,
}

impl SimGroup {
    fn new(world_size: usize) -> Self {
        Self {
            world_size,
            members: Mutex::new(vec![Membership::Pending; world_size]),
            rounds: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        }
    }

    /// Contributes `data` to round `seq` and blocks until every member has.
    fn rendezvous(
        &self,
        seq: u64,
        rank: usize,
        signature: Signature,
        data: Vec<f32>,
    ) -> core::result::Result<Vec<f32>, String> {
        let mut rounds = self.rounds.lock();
        let round = rounds
            .entry(seq)
            .or_insert_with(|| Round::new(self.world_size));
        round.contributions[rank] = Some((signature, data));
        round.arrived += 1;
        if round.arrived == self.world_size {
            round.result = Some(round.reduce(seq));
            self.ready.notify_all();
        }

        while rounds.get(&seq).is_some_and(|r| r.result.is_none()) {
            self.ready.wait(&mut rounds);
        }

        let Some(round) = rounds.get_mut(&seq) else {
            return Err(format!("round {seq} vanished"));
        };
        let result = match &round.result {
            Some(result) => result.clone(),
            None => Err(format!("round {seq} has no result")),
        };
        round.readers_left -= 1;
        if round.readers_left == 0 {
            rounds.remove(&seq);
        }
        result
    }
}

// =============================================================================
// SimFabric
// =============================================================================

/// Group registry of a simulated node, shared by every rank's engine.
#[derive(Debug, Default)]
pub struct SimFabric {
    issued: Mutex<HashSet<UniqueGroupId>>,
    groups: Mutex<HashMap<UniqueGroupId, Arc<SimGroup>>>,
}

impl SimFabric {
    /// Creates an empty fabric.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of groups with at least one live member.
    #[must_use]
    pub fn live_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// Returns true if `id` was generated and its group is not yet retired.
    #[must_use]
    pub fn is_issued(&self, id: &UniqueGroupId) -> bool {
        self.issued.lock().contains(id)
    }

    /// Marks `rank` as gone. Once every rank has joined and left, the group
    /// and its id are retired.
    ///
    /// Lock order is `groups`, then `members`, then `issued`.
    fn leave(&self, id: &UniqueGroupId, group: &SimGroup, rank: usize) -> bool {
        let mut groups = self.groups.lock();
        let mut members = group.members.lock();
        if members[rank] != Membership::Joined {
            return false;
        }
        members[rank] = Membership::Left;
        if members.iter().all(|m| *m == Membership::Left) {
            groups.remove(id);
            self.issued.lock().remove(id);
            tracing::debug!(id = %id, "group retired");
        }
        true
    }
}

// =============================================================================
// SimCollectiveEngine
// =============================================================================

/// Collective engine of one simulated rank.
pub struct SimCollectiveEngine {
    fabric: Arc<SimFabric>,
    accelerator: Arc<SimAccelerator>,
}

impl SimCollectiveEngine {
    /// Creates the engine of the process owning `accelerator`.
    #[must_use]
    pub fn new(fabric: Arc<SimFabric>, accelerator: Arc<SimAccelerator>) -> Self {
        Self {
            fabric,
            accelerator,
        }
    }

    /// Returns the shared fabric.
    #[must_use]
    pub fn fabric(&self) -> &Arc<SimFabric> {
        &self.fabric
    }
}

impl CollectiveEngine for SimCollectiveEngine {
    fn name(&self) -> &str {
        "sim"
    }

    fn generate_unique_id(&self) -> Result<UniqueGroupId> {
        let id = UniqueGroupId::random();
        self.fabric.issued.lock().insert(id);
        tracing::debug!(id = %id, "unique id generated");
        Ok(id)
    }

    fn create_communicator(
        &self,
        world_size: usize,
        id: &UniqueGroupId,
        rank: usize,
    ) -> Result<Box<dyn RawCommunicator>> {
        if rank >= world_size {
            return Err(CommError::invalid_group(format!(
                "rank {rank} outside group of {world_size}"
            )));
        }

        // The map stays locked until this rank is recorded, so a concurrent
        // `leave` cannot retire the group in between.
        let mut groups = self.fabric.groups.lock();
        if !self.fabric.is_issued(id) {
            return Err(CommError::UnknownGroupId {
                id: id.short_hex(),
            });
        }
        let group = Arc::clone(
            groups
                .entry(*id)
                .or_insert_with(|| Arc::new(SimGroup::new(world_size))),
        );
        if group.world_size != world_size {
            return Err(CommError::invalid_group(format!(
                "group {id} has {} members, joined as one of {world_size}",
                group.world_size
            )));
        }
        {
            let mut members = group.members.lock();
            if members[rank] != Membership::Pending {
                return Err(CommError::invalid_group(format!(
                    "rank {rank} already joined group {id}"
                )));
            }
            members[rank] = Membership::Joined;
        }
        drop(groups);

        tracing::debug!(id = %id, rank, world_size, "joined communicator group");
        Ok(Box::new(SimCommunicator {
            id: *id,
            rank,
            group,
            fabric: Arc::clone(&self.fabric),
            accelerator: Arc::clone(&self.accelerator),
            next_seq: 0,
            destroyed: false,
        }))
    }
}

// =============================================================================
// SimCommunicator
// =============================================================================

/// One member's handle in a simulated group.
pub struct SimCommunicator {
    id: UniqueGroupId,
    rank: usize,
    group: Arc<SimGroup>,
    fabric: Arc<SimFabric>,
    accelerator: Arc<SimAccelerator>,
    next_seq: u64,
    destroyed: bool,
}

impl SimCommunicator {
    fn check_buffer(&self, ptr: DevicePtr, count: usize) -> Result<()> {
        let cluster = self.accelerator.cluster();
        cluster.check_range(ptr, count)?;
        let device = self.accelerator.active_device()?;
        let owner = cluster.device_of(ptr)?;
        if owner != device {
            return Err(CommError::communication(format!(
                "buffer {ptr} lives on {owner}, rank {} is bound to {device}",
                self.rank
            )));
        }
        Ok(())
    }
}

impl RawCommunicator for SimCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.group.world_size
    }

    fn all_reduce(
        &mut self,
        send: DevicePtr,
        recv: DevicePtr,
        count: usize,
        dtype: DType,
        op: ReduceOp,
        stream: StreamId,
    ) -> Result<()> {
        if self.destroyed {
            return Err(CommError::NotInitialized);
        }
        if dtype != DType::F32 {
            return Err(DeviceError::UnsupportedDType {
                dtype,
                operation: "all_reduce",
            }
            .into());
        }
        self.check_buffer(send, count)?;
        self.check_buffer(recv, count)?;

        let seq = self.next_seq;
        let signature = Signature { count, dtype, op };
        let rank = self.rank;
        let group = Arc::clone(&self.group);
        let cluster = Arc::clone(self.accelerator.cluster());

        self.accelerator.enqueue(
            stream,
            Box::new(move || {
                let data = cluster.read(send, count)?;
                let reduced = group
                    .rendezvous(seq, rank, signature, data)
                    .map_err(|message| DeviceError::stream_op(stream, message))?;
                cluster.write(recv, &reduced)
            }),
        )?;
        self.next_seq += 1;

        tracing::trace!(rank, seq, count, %stream, "all_reduce queued");
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(CommError::NotInitialized);
        }
        self.destroyed = true;
        self.fabric.leave(&self.id, &self.group, self.rank);
        tracing::debug!(id = %self.id, rank = self.rank, "left communicator group");
        Ok(())
    }
}

// =============================================================================
// SimGradient
// =============================================================================

/// A gradient buffer that starts on the host and moves to the active device
/// of its rank on first pointer access.
pub struct SimGradient {
    accelerator: Arc<SimAccelerator>,
    host: Vec<f32>,
    storage_class: StorageClass,
    device: Mutex<Option<DevicePtr>>,
}

impl SimGradient {
    /// Creates a host-resident gradient.
    #[must_use]
    pub fn new(accelerator: Arc<SimAccelerator>, data: Vec<f32>) -> Self {
        Self {
            accelerator,
            host: data,
            storage_class: StorageClass::new(SIM_ARRAY),
            device: Mutex::new(None),
        }
    }

    /// Reports `class` as the backing storage class.
    #[must_use]
    pub fn with_storage_class(mut self, class: impl Into<StorageClass>) -> Self {
        self.storage_class = class.into();
        self
    }

    /// Returns true once the data lives on a device.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.device.lock().is_some()
    }

    /// Returns the current values, from the device if materialized.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        match *self.device.lock() {
            Some(ptr) => Ok(self.accelerator.cluster().read(ptr, self.host.len())?),
            None => Ok(self.host.clone()),
        }
    }

    fn materialize(&self) -> Result<DevicePtr> {
        let mut device = self.device.lock();
        if let Some(ptr) = *device {
            return Ok(ptr);
        }
        let ptr = self.accelerator.alloc(self.host.clone())?;
        *device = Some(ptr);
        Ok(ptr)
    }
}

impl GradientVariable for SimGradient {
    fn num_elements(&self) -> usize {
        self.host.len()
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn storage_class(&self) -> StorageClass {
        self.storage_class.clone()
    }

    fn read_ptr(&self) -> Result<DevicePtr> {
        self.materialize()
    }

    fn write_ptr(&self) -> Result<DevicePtr> {
        self.materialize()
    }
}

impl Drop for SimGradient {
    fn drop(&mut self) {
        if let Some(ptr) = self.device.get_mut().take() {
            let _ = self.accelerator.cluster().free(ptr);
        }
    }
}

// =============================================================================
// SimWorld
// =============================================================================

/// Everything one simulated process needs to bootstrap a communicator.
pub struct SimMember {
    /// Process-group membership.
    pub group: ThreadGroup,
    /// The process's accelerator.
    pub accelerator: Arc<SimAccelerator>,
    /// The process's collective engine.
    pub engine: Arc<SimCollectiveEngine>,
}

impl SimMember {
    /// Creates a host-resident gradient owned by this member.
    #[must_use]
    pub fn gradient(&self, data: Vec<f32>) -> Arc<SimGradient> {
        Arc::new(SimGradient::new(Arc::clone(&self.accelerator), data))
    }
}

/// A simulated node: one cluster, one fabric, one member per rank.
pub struct SimWorld {
    cluster: Arc<SimCluster>,
    fabric: Arc<SimFabric>,
    members: Vec<SimMember>,
}

impl SimWorld {
    /// Creates `world_size` ranks with one device each.
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        Self::with_devices(world_size, world_size)
    }

    /// Creates `world_size` ranks on a node with `device_count` devices.
    #[must_use]
    pub fn with_devices(world_size: usize, device_count: usize) -> Self {
        let cluster = SimCluster::new(device_count);
        let fabric = SimFabric::new();
        let members = ThreadGroup::create(world_size)
            .into_iter()
            .map(|group| {
                let accelerator = Arc::new(SimAccelerator::new(Arc::clone(&cluster)));
                let engine = Arc::new(SimCollectiveEngine::new(
                    Arc::clone(&fabric),
                    Arc::clone(&accelerator),
                ));
                SimMember {
                    group,
                    accelerator,
                    engine,
                }
            })
            .collect();
        Self {
            cluster,
            fabric,
            members,
        }
    }

    /// Returns the shared node.
    #[must_use]
    pub fn cluster(&self) -> &Arc<SimCluster> {
        &self.cluster
    }

    /// Returns the shared fabric.
    #[must_use]
    pub fn fabric(&self) -> &Arc<SimFabric> {
        &self.fabric
    }

    /// Returns the members in rank order.
    #[must_use]
    pub fn members(&self) -> &[SimMember] {
        &self.members
    }

    /// Consumes the world, returning the members in rank order.
    #[must_use]
    pub fn into_members(self) -> Vec<SimMember> {
        self.members
    }
}

// =============================================================================
// Tests
// =============================================================================
