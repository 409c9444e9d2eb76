//! Bootstrap, lifecycle and capability tests

mod common;

use gradsync_comm::{
    CollectiveOp, CommConfig, CommError, Communicator, InitStage, ProcessGroup, Result, SimWorld, UNIQUE_ID_BYTES,
};
use std::sync::Arc;

use gradsync_core::{
    Accelerator, DType, DeviceId, DevicePtr, Error as DeviceError, SimAccelerator, StorageClass,
    StreamFlags, StreamId,
};
use parking_lot::Mutex;

use common::{init, init_with, registry, run_ranks, world};

/// Forwards to an inner group, recording broadcast payloads and optionally
/// flipping a byte of what this member received.
struct Tampering<'a> {
    inner: &'a dyn ProcessGroup,
    corrupt: bool,
    received: Mutex<Vec<Vec<u8>>>,
}

impl<'a> Tampering<'a> {
    fn new(inner: &'a dyn ProcessGroup, corrupt: bool) -> Self {
        Self {
            inner,
            corrupt,
            received: Mutex::new(Vec::new()),
        }
    }
}

impl ProcessGroup for Tampering<'_> {
    fn name(&self) -> &str {
        "tampering"
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    fn rank(&self) -> Result<usize> {
        self.inner.rank()
    }

    fn barrier(&self) -> Result<()> {
        self.inner.barrier()
    }

    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<()> {
        self.inner.broadcast_bytes(buf, root)?;
        if self.corrupt {
            buf[UNIQUE_ID_BYTES / 2] ^= 0x5a;
        }
        self.received.lock().push(buf.to_vec());
        Ok(())
    }
}

#[test]
fn test_every_member_receives_the_same_id() {
    let members = world(4);
    let ids = run_ranks(&members, |m| {
        let group = Tampering::new(&m.group, false);
        let comm = init_with(&group, m, CommConfig::default()).unwrap();
        assert!(comm.is_initialized());
        let received = group.received.lock().clone();
        received
    });

    for received in &ids {
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].len(), UNIQUE_ID_BYTES);
        assert_eq!(received[0], ids[0][0]);
    }
}

#[test]
fn test_corrupted_id_fails_handle_creation() {
    let members = world(2);
    let results = run_ranks(&members, |m| {
        let corrupt = m.group.rank().unwrap() == 1;
        let group = Tampering::new(&m.group, corrupt);
        init_with(&group, m, CommConfig::default()).map(|comm| comm.rank())
    });

    assert_eq!(results[0].as_ref().ok(), Some(&0));
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.stage(), Some(InitStage::HandleCreate));
    match err {
        CommError::Initialization { source, .. } => {
            assert!(matches!(**source, CommError::UnknownGroupId { .. }));
        }
        other => panic!("expected initialization failure, got {other:?}"),
    }
    assert!(err.to_string().contains("handle create"));
}

#[test]
fn test_missing_device_fails_device_bind() {
    let members = SimWorld::with_devices(1, 0).into_members();
    let err = init(&members[0], CommConfig::default()).err().unwrap();
    assert_eq!(err.stage(), Some(InitStage::DeviceBind));
    assert!(err.is_fatal());
}

#[test]
fn test_rank_binds_matching_device() {
    let members = world(3);
    let bound = run_ranks(&members, |m| {
        let comm = init(m, CommConfig::default()).unwrap();
        (comm.rank(), m.accelerator.current_device().unwrap().index())
    });
    for (rank, device) in bound {
        assert_eq!(rank, device);
    }
}

#[test]
fn test_stream_flags_follow_config() {
    let members = world(1);
    let m = &members[0];
    let config = CommConfig::default()
        .with_overrides(|key| (key == "GRADSYNC_STREAM_NON_BLOCKING").then(|| "false".into()))
        .unwrap();
    let comm = init(m, config).unwrap();
    let stream = comm.stream().unwrap();
    assert_eq!(m.accelerator.stream_flags(stream).unwrap(), StreamFlags::Default);
}

#[test]
fn test_unsupported_collectives_touch_nothing() {
    let members = world(1);
    let m = &members[0];
    let mut comm = init(m, CommConfig::default()).unwrap();
    let stream = comm.stream().unwrap();
    let (registry, grads) = registry(m, &[vec![1.0, 2.0]]);

    for op in CollectiveOp::ALL {
        if op == CollectiveOp::AllReduce {
            continue;
        }
        assert!(!comm.supports(op));
        let err = comm.run(op, &registry, true).unwrap_err();
        assert!(matches!(err, CommError::Unimplemented { op: o } if o == op));
        assert!(err.to_string().contains(op.name()));
        assert!(!grads[0].is_materialized());
        assert_eq!(m.accelerator.pending(stream).unwrap(), 0);
    }

    assert!(comm.supports(CollectiveOp::AllReduce));
    let report = comm.run(CollectiveOp::AllReduce, &registry, true).unwrap();
    assert_eq!(report.parameters, 1);
    assert_eq!(grads[0].to_vec().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_finalize_is_single_shot() {
    let members = world(2);
    let results = run_ranks(&members, |m| {
        let mut comm = init(m, CommConfig::default()).unwrap();
        let stream = comm.stream().unwrap();
        comm.finalize().unwrap();

        let second = comm.finalize();
        let (registry, _grads) = registry(m, &[vec![1.0]]);
        let after = comm.all_reduce_in_place(&registry, true);
        let stream_gone = m.accelerator.synchronize_stream(stream).is_err();
        (second, after.map(|_| ()), stream_gone)
    });

    for (second, after, stream_gone) in results {
        assert!(matches!(second, Err(CommError::NotInitialized)));
        assert!(matches!(after, Err(CommError::NotInitialized)));
        assert!(stream_gone);
    }
}

#[test]
fn test_fresh_group_after_finalize() {
    let world = SimWorld::new(2);
    let first = run_ranks(world.members(), |m| {
        let mut comm = init(m, CommConfig::default()).unwrap();
        comm.finalize().unwrap();
    });
    assert_eq!(first.len(), 2);
    assert_eq!(world.fabric().live_groups(), 0);

    let sums = run_ranks(world.members(), |m| {
        let mut comm = init(m, CommConfig::default()).unwrap();
        let (registry, grads) = registry(m, &[vec![1.0]]);
        comm.all_reduce_in_place(&registry, false).unwrap();
        grads[0].to_vec().unwrap()
    });
    assert_eq!(sums, vec![vec![2.0], vec![2.0]]);
}

/// A backend whose devices refuse to create streams.
struct StreamlessAccelerator {
    inner: Arc<SimAccelerator>,
}

impl Accelerator for StreamlessAccelerator {
    fn name(&self) -> &str {
        "streamless"
    }

    fn device_count(&self) -> usize {
        self.inner.device_count()
    }

    fn set_device(&self, device: DeviceId) -> gradsync_core::Result<()> {
        self.inner.set_device(device)
    }

    fn current_device(&self) -> Option<DeviceId> {
        self.inner.current_device()
    }

    fn synchronize_device(&self) -> gradsync_core::Result<()> {
        self.inner.synchronize_device()
    }

    fn create_stream(&self, _flags: StreamFlags) -> gradsync_core::Result<StreamId> {
        Err(DeviceError::internal("out of stream slots"))
    }

    fn destroy_stream(&self, stream: StreamId) -> gradsync_core::Result<()> {
        self.inner.destroy_stream(stream)
    }

    fn synchronize_stream(&self, stream: StreamId) -> gradsync_core::Result<()> {
        self.inner.synchronize_stream(stream)
    }

    fn divide_in_place(
        &self,
        stream: StreamId,
        ptr: DevicePtr,
        count: usize,
        dtype: DType,
        divisor: usize,
    ) -> gradsync_core::Result<()> {
        self.inner.divide_in_place(stream, ptr, count, dtype, divisor)
    }

    fn storage_classes(&self) -> Vec<StorageClass> {
        self.inner.storage_classes()
    }
}

#[test]
fn test_stream_create_failure_releases_handle() {
    let world = SimWorld::new(1);
    let m = &world.members()[0];
    let accelerator = Arc::new(StreamlessAccelerator {
        inner: m.accelerator.clone(),
    });

    let err = Communicator::init(&m.group, accelerator, m.engine.clone(), CommConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.stage(), Some(InitStage::StreamCreate));
    assert!(err.to_string().contains("out of stream slots"));
    assert_eq!(world.fabric().live_groups(), 0);
}
