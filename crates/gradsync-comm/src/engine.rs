//! Engine - Collective Communication Engine Abstractions
//!
//! The collective-communication engine generates unique ids, creates
//! per-rank communicator handles, and queues reductions on device streams.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use gradsync_core::{DType, DevicePtr, StreamId};

use crate::error::Result;
use crate::unique_id::UniqueGroupId;

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
///
/// The gradient all-reduce only issues [`ReduceOp::Sum`]; the other variants
/// round out the engine's operation set for direct [`RawCommunicator`] use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum all values.
    Sum,
    /// Compute product of all values.
    Product,
    /// Find minimum value.
    Min,
    /// Find maximum value.
    Max,
}

impl ReduceOp {
    /// Applies the reduction operation to two f32 values.
    #[must_use]
    pub fn apply_f32(&self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Product => a * b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    /// Folds `src` into `acc` elementwise.
    pub fn accumulate(&self, acc: &mut [f32], src: &[f32]) {
        for (a, &b) in acc.iter_mut().zip(src) {
            *a = self.apply_f32(*a, b);
        }
    }
}

// =============================================================================
// Engine Traits
// =============================================================================

/// A per-rank membership handle in a communicator group.
///
/// Created once by [`CollectiveEngine::create_communicator`] and destroyed
/// once with [`RawCommunicator::destroy`].
pub trait RawCommunicator: Send {
    /// Returns this member's rank.
    fn rank(&self) -> usize;

    /// Returns the number of members.
    fn world_size(&self) -> usize;

    /// Queues a reduction of `count` elements from `send` into `recv` on
    /// `stream`. `send == recv` reduces in place.
    ///
    /// Every member must issue the same sequence of calls. An `Ok` means the
    /// request was accepted; failures during execution surface when the
    /// stream is synchronized.
    fn all_reduce(
        &mut self,
        send: DevicePtr,
        recv: DevicePtr,
        count: usize,
        dtype: DType,
        op: ReduceOp,
        stream: StreamId,
    ) -> Result<()>;

    /// Releases the handle.
    fn destroy(&mut self) -> Result<()>;
}

/// Collective-communication engine.
pub trait CollectiveEngine: Send + Sync {
    /// Returns the name of the engine.
    fn name(&self) -> &str;

    /// Generates a fresh group id. Called on the root only.
    fn generate_unique_id(&self) -> Result<UniqueGroupId>;

    /// Joins the group identified by `id` as `rank` of `world_size`.
    fn create_communicator(
        &self,
        world_size: usize,
        id: &UniqueGroupId,
        rank: usize,
    ) -> Result<Box<dyn RawCommunicator>>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_op_apply() {
        assert_eq!(ReduceOp::Sum.apply_f32(1.0, 2.0), 3.0);
        assert_eq!(ReduceOp::Product.apply_f32(2.0, 3.0), 6.0);
        assert_eq!(ReduceOp::Min.apply_f32(2.0, 3.0), 2.0);
        assert_eq!(ReduceOp::Max.apply_f32(2.0, 3.0), 3.0);
    }

    #[test]
    fn test_accumulate() {
        let mut acc = vec![1.0, 2.0, 3.0];
        ReduceOp::Sum.accumulate(&mut acc, &[5.0, 6.0, 7.0]);
        assert_eq!(acc, vec![6.0, 8.0, 10.0]);
        ReduceOp::Max.accumulate(&mut acc, &[0.0, 9.0, 0.0]);
        assert_eq!(acc, vec![6.0, 9.0, 10.0]);
    }
}
