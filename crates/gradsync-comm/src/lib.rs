//! Gradsync Comm - Gradient All-Reduce Communicator
//!
//! Synchronizes gradient buffers across the processes of a data-parallel
//! training job. Each process binds the device whose index equals its rank,
//! joins a collective-engine group through a bootstrap over its process
//! group, and then reduces its gradients in place once per step.
//!
//! # Features
//!
//! ## Bootstrap
//! - **Process group** - rank, size, barrier and byte broadcast
//! - **Stage-tagged init** - failures name the step that failed
//!
//! ## Reduction
//! - **In-place all-reduce** - one sum per gradient, in registry order
//! - **Averaging** - optional divide by the group size on the same stream
//! - **Two-phase synchronization** - device barrier before, stream barrier after
//! - **Capability probing** - unsupported collectives fail without side effects
//!
//! ## Simulation
//! - Threads as processes, host memory as device memory, deferred streams
//!
//! # Example
//!
//! ```rust
//! use gradsync_comm::prelude::*;
//! use gradsync_comm::sim::SimWorld;
//! use gradsync_core::DeviceId;
//!
//! let world = SimWorld::new(1);
//! let member = &world.members()[0];
//! let mut comm = Communicator::init(
//!     &member.group,
//!     member.accelerator.clone(),
//!     member.engine.clone(),
//!     CommConfig::default(),
//! )
//! .unwrap();
//!
//! let grad = member.gradient(vec![1.0, 2.0]);
//! let registry = GradientRegistry::single(DeviceId(0), vec![named("w", grad.clone())]).unwrap();
//! comm.all_reduce_in_place(&registry, true).unwrap();
//! assert_eq!(grad.to_vec().unwrap(), vec![1.0, 2.0]);
//! comm.finalize().unwrap();
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
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::unused_self)]
#![allow(clippy::match_same_arms)]

pub mod allreduce;
pub mod bootstrap;
pub mod collectives;
pub mod communicator;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod process_group;
pub mod registry;
pub mod sim;
pub mod sync;
pub mod unique_id;

// =============================================================================
// Re-exports
// =============================================================================

pub use allreduce::AllReduceReport;
pub use bootstrap::{InitStage, ProcessIdentity, ROOT_RANK};
pub use collectives::CollectiveOp;
pub use communicator::{Communicator, CommunicatorHandle};
pub use config::{CommConfig, ConfigError, StreamConfig};
pub use engine::{CollectiveEngine, RawCommunicator, ReduceOp};
pub use error::{CommError, Result};
pub use process_group::{ProcessGroup, ThreadGroup};
pub use registry::{
    named, DeviceContext, GradientRegistry, GradientVariable, NamedGradient, ParameterRegistry,
};
pub use sim::{SimCollectiveEngine, SimFabric, SimGradient, SimMember, SimWorld};
pub use sync::{device_barrier, stream_barrier};
pub use unique_id::{UniqueGroupId, UNIQUE_ID_BYTES};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for gradient synchronization.
pub mod prelude {
    pub use crate::{
        named,
        AllReduceReport,
        CollectiveEngine,
        CollectiveOp,
        CommConfig,
        CommError,
        Communicator,
        GradientRegistry,
        GradientVariable,
        InitStage,
        ParameterRegistry,
        ProcessGroup,
    };

    pub use gradsync_core::Accelerator;
}

// =============================================================================
// Version Information
// =============================================================================

/// Returns the version of the gradsync-comm crate.
#[must_use]
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
