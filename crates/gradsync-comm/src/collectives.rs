//! Collectives - Operation Kinds and Capability Queries
//!
//! Every collective the communicator names. Only the in-place all-reduce is
//! implemented; the others are contract points that fail with
//! [`CommError::Unimplemented`](crate::CommError::Unimplemented) so callers can
//! check capability instead of finding out mid-training.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

// =============================================================================
// CollectiveOp
// =============================================================================

/// Kind of collective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    /// In-place sum of every gradient across the group, optionally averaged.
    AllReduce,
    /// Sum into the root rank only.
    Reduce,
    /// Sum, then scatter one shard to each rank.
    ReduceScatter,
    /// Copy the root's buffers to every rank.
    Broadcast,
    /// Concatenate every rank's buffers on every rank.
    AllGather,
    /// Non-blocking all-reduce.
    AllReduceAsync,
    /// Non-blocking reduce.
    ReduceAsync,
    /// Non-blocking reduce-scatter.
    ReduceScatterAsync,
    /// Non-blocking broadcast.
    BroadcastAsync,
    /// Non-blocking all-gather.
    AllGatherAsync,
}

impl CollectiveOp {
    /// Every collective kind, blocking variants first.
    pub const ALL: [CollectiveOp; 10] = [
        Self::AllReduce,
        Self::Reduce,
        Self::ReduceScatter,
        Self::Broadcast,
        Self::AllGather,
        Self::AllReduceAsync,
        Self::ReduceAsync,
        Self::ReduceScatterAsync,
        Self::BroadcastAsync,
        Self::AllGatherAsync,
    ];

    /// Returns the operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AllReduce => "all_reduce",
            Self::Reduce => "reduce",
            Self::ReduceScatter => "reduce_scatter",
            Self::Broadcast => "broadcast",
            Self::AllGather => "all_gather",
            Self::AllReduceAsync => "all_reduce_async",
            Self::ReduceAsync => "reduce_async",
            Self::ReduceScatterAsync => "reduce_scatter_async",
            Self::BroadcastAsync => "broadcast_async",
            Self::AllGatherAsync => "all_gather_async",
        }
    }

    /// Returns true for the non-blocking variants.
    #[must_use]
    pub const fn is_async(self) -> bool {
        matches!(
            self,
            Self::AllReduceAsync
                | Self::ReduceAsync
                | Self::ReduceScatterAsync
                | Self::BroadcastAsync
                | Self::AllGatherAsync
        )
    }

    /// Returns true if the communicator implements this collective.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::AllReduce)
    }
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_all_reduce_supported() {
        let supported: Vec<_> = CollectiveOp::ALL
            .iter()
            .filter(|op| op.is_supported())
            .collect();
        assert_eq!(supported, vec![&CollectiveOp::AllReduce]);
    }

    #[test]
    fn test_async_variants() {
        assert_eq!(CollectiveOp::ALL.iter().filter(|op| op.is_async()).count(), 5);
        assert!(!CollectiveOp::AllReduce.is_async());
        assert!(CollectiveOp::AllReduceAsync.is_async());
    }

    #[test]
    fn test_names_are_distinct() {
        let mut names: Vec<_> = CollectiveOp::ALL.iter().map(|op| op.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CollectiveOp::ALL.len());
    }
}
