//! `ProcessGroup` - Process Group Bootstrap Abstraction
//!
//! The message-passing layer that gives every process its rank and the group
//! size, a full-group barrier, and a fixed-size byte broadcast from a root.
//! The communicator only uses it during bootstrap.
//!
//! [`ThreadGroup`] runs a group of threads as if they were processes.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CommError, Result};

// =============================================================================
// ProcessGroup Trait
// =============================================================================

/// Bootstrap collaborator: the ambient process group.
pub trait ProcessGroup: Send + Sync {
    /// Returns the name of the implementation.
    fn name(&self) -> &str;

    /// Returns the number of processes in the group.
    fn size(&self) -> Result<usize>;

    /// Returns the rank of this process.
    fn rank(&self) -> Result<usize>;

    /// Blocks until every member has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Overwrites `buf` on every member with the root's bytes.
    ///
    /// Every member must pass a buffer of the same length.
    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<()>;
}

// =============================================================================
// Shared State for ThreadGroup
// =============================================================================

#[derive(Debug)]
struct Posted {
    data: Vec<u8>,
    readers_left: usize,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Members waiting in the current barrier.
    arrived: usize,
    /// Completed barriers.
    generation: u64,
    /// Root payloads by broadcast sequence number.
    broadcasts: HashMap<u64, Posted>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<GroupState>,
    changed: Condvar,
}

// =============================================================================
// ThreadGroup
// =============================================================================

/// One member of an in-process group whose members are threads.
#[derive(Debug)]
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<Shared>,
    next_broadcast: Mutex<u64>,
}

impl ThreadGroup {
    /// Creates the members of a group of `size`, in rank order.
    #[must_use]
    pub fn create(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(GroupState::default()),
            changed: Condvar::new(),
        });

        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                shared: Arc::clone(&shared),
                next_broadcast: Mutex::new(0),
            })
            .collect()
    }

    /// Creates a group with a single member.
    #[must_use]
    pub fn single() -> Self {
        Self {
            rank: 0,
            shared: Arc::new(Shared {
                size: 1,
                state: Mutex::new(GroupState::default()),
                changed: Condvar::new(),
            }),
            next_broadcast: Mutex::new(0),
        }
    }
}

impl ProcessGroup for ThreadGroup {
    fn name(&self) -> &str {
        "threads"
    }

    fn size(&self) -> Result<usize> {
        Ok(self.shared.size)
    }

    fn rank(&self) -> Result<usize> {
        Ok(self.rank)
    }

    fn barrier(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.changed.notify_all();
            return Ok(());
        }

        while state.generation == generation {
            self.shared.changed.wait(&mut state);
        }
        Ok(())
    }

    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<()> {
        let size = self.shared.size;
        if root >= size {
            return Err(CommError::invalid_group(format!(
                "broadcast root {root} outside group of {size}"
            )));
        }

        let seq = {
            let mut next = self.next_broadcast.lock();
            let seq = *next;
            *next += 1;
            seq
        };

        let mut state = self.shared.state.lock();

        if self.rank == root {
            if size > 1 {
                state.broadcasts.insert(
                    seq,
                    Posted {
                        data: buf.to_vec(),
                        readers_left: size - 1,
                    },
                );
                self.shared.changed.notify_all();
            }
            return Ok(());
        }

        while !state.broadcasts.contains_key(&seq) {
            self.shared.changed.wait(&mut state);
        }

        let Some(posted) = state.broadcasts.get_mut(&seq) else {
            return Err(CommError::invalid_group("broadcast payload vanished"));
        };
        let result = if posted.data.len() == buf.len() {
            buf.copy_from_slice(&posted.data);
            Ok(())
        } else {
            Err(CommError::invalid_group(format!(
                "broadcast of {} bytes received into buffer of {}",
                posted.data.len(),
                buf.len()
            )))
        };

        posted.readers_left -= 1;
        if posted.readers_left == 0 {
            state.broadcasts.remove(&seq);
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
