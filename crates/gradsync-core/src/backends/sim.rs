//! Simulated Accelerator - In-Process Device Runtime
//!
//! Simulates the device side of a multi-process node so the synchronization
//! protocol can be exercised without hardware. Threads play the role of
//! processes and share one [`SimCluster`]; each thread owns a
//! [`SimAccelerator`].
//!
//! # Model
//! - Device memory is a table of host `Vec<f32>` allocations keyed by address
//! - Streams are FIFO queues of boxed closures ([`StreamOp`])
//! - Nothing queued on a stream runs until that stream, or the whole device,
//!   is synchronized; results are therefore invisible before a barrier
//! - Queued operations execute on the thread that synchronizes
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Accelerator;
use crate::device::{DeviceId, StorageClass};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::memory::DevicePtr;
use crate::stream::{StreamFlags, StreamId};

/// Storage class of memory allocated by the simulated accelerator.
pub const SIM_ARRAY: &str = "SimArray";

/// Storage class of cached allocations of the simulated accelerator.
pub const SIM_CACHED_ARRAY: &str = "SimCachedArray";

const BASE_ADDRESS: u64 = 0x7000_0000;
const ALIGNMENT: u64 = 256;

/// A deferred device operation.
pub type StreamOp = Box<dyn FnOnce() -> Result<()> + Send>;

// =============================================================================
// SimCluster
// =============================================================================

/// One device allocation.
#[derive(Debug)]
struct SimAllocation {
    device: DeviceId,
    data: RwLock<Vec<f32>>,
}

/// Devices and device memory of a simulated node, shared by every rank.
#[derive(Debug)]
pub struct SimCluster {
    device_count: usize,
    next_addr: AtomicU64,
    next_stream: AtomicU64,
    allocations: RwLock<HashMap<u64, Arc<SimAllocation>>>,
}

impl SimCluster {
    /// Creates a node with `device_count` devices.
    #[must_use]
    pub fn new(device_count: usize) -> Arc<Self> {
        Arc::new(Self {
            device_count,
            next_addr: AtomicU64::new(BASE_ADDRESS),
            next_stream: AtomicU64::new(1),
            allocations: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the number of devices on the node.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.device_count
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device.index() < self.device_count {
            Ok(())
        } else {
            Err(Error::DeviceNotAvailable {
                device,
                count: self.device_count,
            })
        }
    }

    /// Allocates device memory holding `data` on `device`.
    pub fn alloc(&self, device: DeviceId, data: Vec<f32>) -> Result<DevicePtr> {
        self.check_device(device)?;
        let bytes = (data.len().max(1) as u64) * DType::F32.size_of() as u64;
        let span = bytes.div_ceil(ALIGNMENT) * ALIGNMENT;
        let addr = self.next_addr.fetch_add(span, Ordering::Relaxed);
        self.allocations.write().insert(
            addr,
            Arc::new(SimAllocation {
                device,
                data: RwLock::new(data),
            }),
        );
        Ok(DevicePtr::from_raw(addr))
    }

    /// Releases an allocation.
    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.allocations
            .write()
            .remove(&ptr.as_raw())
            .map(|_| ())
            .ok_or(Error::InvalidPointer { ptr })
    }

    fn allocation(&self, ptr: DevicePtr) -> Result<Arc<SimAllocation>> {
        self.allocations
            .read()
            .get(&ptr.as_raw())
            .cloned()
            .ok_or(Error::InvalidPointer { ptr })
    }

    /// Returns the number of elements of the allocation at `ptr`.
    pub fn len(&self, ptr: DevicePtr) -> Result<usize> {
        Ok(self.allocation(ptr)?.data.read().len())
    }

    /// Returns the device an allocation lives on.
    pub fn device_of(&self, ptr: DevicePtr) -> Result<DeviceId> {
        Ok(self.allocation(ptr)?.device)
    }

    /// Checks that `count` elements starting at `ptr` are addressable.
    pub fn check_range(&self, ptr: DevicePtr, count: usize) -> Result<()> {
        let len = self.len(ptr)?;
        if count > len {
            return Err(Error::OutOfBounds { count, len });
        }
        Ok(())
    }

    /// Copies `count` elements out of device memory.
    pub fn read(&self, ptr: DevicePtr, count: usize) -> Result<Vec<f32>> {
        let alloc = self.allocation(ptr)?;
        let data = alloc.data.read();
        if count > data.len() {
            return Err(Error::OutOfBounds {
                count,
                len: data.len(),
            });
        }
        Ok(data[..count].to_vec())
    }

    /// Copies `values` into device memory starting at `ptr`.
    pub fn write(&self, ptr: DevicePtr, values: &[f32]) -> Result<()> {
        self.update(ptr, values.len(), |dst| dst.copy_from_slice(values))
    }

    /// Applies `f` to the first `count` elements at `ptr`.
    pub fn update<F>(&self, ptr: DevicePtr, count: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut [f32]),
    {
        let alloc = self.allocation(ptr)?;
        let mut data = alloc.data.write();
        if count > data.len() {
            return Err(Error::OutOfBounds {
                count,
                len: data.len(),
            });
        }
        f(&mut data[..count]);
        Ok(())
    }

    fn next_stream_id(&self) -> StreamId {
        StreamId::from_raw(self.next_stream.fetch_add(1, Ordering::Relaxed))
    }
}

// =============================================================================
// SimAccelerator
// =============================================================================

/// A simulated stream.
struct SimStream {
    device: DeviceId,
    flags: StreamFlags,
    queue: Mutex<VecDeque<StreamOp>>,
}

/// Per-process handle on a [`SimCluster`].
pub struct SimAccelerator {
    cluster: Arc<SimCluster>,
    current: Mutex<Option<DeviceId>>,
    streams: Mutex<BTreeMap<StreamId, Arc<SimStream>>>,
    storage_classes: Vec<StorageClass>,
}

impl SimAccelerator {
    /// Creates a process-local accelerator over a shared node.
    #[must_use]
    pub fn new(cluster: Arc<SimCluster>) -> Self {
        Self {
            cluster,
            current: Mutex::new(None),
            streams: Mutex::new(BTreeMap::new()),
            storage_classes: vec![
                StorageClass::new(SIM_ARRAY),
                StorageClass::new(SIM_CACHED_ARRAY),
            ],
        }
    }

    /// Returns the shared node.
    #[must_use]
    pub fn cluster(&self) -> &Arc<SimCluster> {
        &self.cluster
    }

    /// Returns the active device or fails.
    pub fn active_device(&self) -> Result<DeviceId> {
        (*self.current.lock()).ok_or(Error::NoActiveDevice)
    }

    /// Allocates memory holding `data` on the active device.
    pub fn alloc(&self, data: Vec<f32>) -> Result<DevicePtr> {
        let device = self.active_device()?;
        self.cluster.alloc(device, data)
    }

    fn stream(&self, stream: StreamId) -> Result<Arc<SimStream>> {
        self.streams
            .lock()
            .get(&stream)
            .cloned()
            .ok_or(Error::UnknownStream { stream })
    }

    /// Returns the flags a stream was created with.
    pub fn stream_flags(&self, stream: StreamId) -> Result<StreamFlags> {
        Ok(self.stream(stream)?.flags)
    }

    /// Queues an operation on `stream` without running it.
    pub fn enqueue(&self, stream: StreamId, op: StreamOp) -> Result<()> {
        self.stream(stream)?.queue.lock().push_back(op);
        Ok(())
    }

    /// Returns the number of operations waiting on `stream`.
    pub fn pending(&self, stream: StreamId) -> Result<usize> {
        Ok(self.stream(stream)?.queue.lock().len())
    }

    fn drain(id: StreamId, stream: &SimStream) -> Result<()> {
        loop {
            // The lock is released before running the op: collective ops block
            // on peers and must not hold the queue.
            let op = stream.queue.lock().pop_front();
            let Some(op) = op else {
                return Ok(());
            };
            if let Err(err) = op() {
                let dropped = {
                    let mut queue = stream.queue.lock();
                    let n = queue.len();
                    queue.clear();
                    n
                };
                if dropped > 0 {
                    tracing::warn!(stream = %id, dropped, "discarding queued work after failure");
                }
                return Err(match err {
                    Error::StreamOpFailed { .. } => err,
                    other => Error::stream_op(id, other.to_string()),
                });
            }
        }
    }
}

impl Accelerator for SimAccelerator {
    fn name(&self) -> &str {
        "sim"
    }

    fn device_count(&self) -> usize {
        self.cluster.device_count()
    }

    fn set_device(&self, device: DeviceId) -> Result<()> {
        self.cluster.check_device(device)?;
        *self.current.lock() = Some(device);
        tracing::debug!(%device, "active device selected");
        Ok(())
    }

    fn current_device(&self) -> Option<DeviceId> {
        *self.current.lock()
    }

    fn synchronize_device(&self) -> Result<()> {
        let device = self.active_device()?;
        let streams: Vec<(StreamId, Arc<SimStream>)> = self
            .streams
            .lock()
            .iter()
            .filter(|(_, s)| s.device == device)
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();
        for (id, stream) in streams {
            Self::drain(id, &stream)?;
        }
        Ok(())
    }

    fn create_stream(&self, flags: StreamFlags) -> Result<StreamId> {
        let device = self.active_device()?;
        let id = self.cluster.next_stream_id();
        self.streams.lock().insert(
            id,
            Arc::new(SimStream {
                device,
                flags,
                queue: Mutex::new(VecDeque::new()),
            }),
        );
        tracing::debug!(stream = %id, %device, ?flags, "stream created");
        Ok(id)
    }

    fn destroy_stream(&self, stream: StreamId) -> Result<()> {
        let removed = self
            .streams
            .lock()
            .remove(&stream)
            .ok_or(Error::UnknownStream { stream })?;
        let pending = removed.queue.lock().len();
        if pending > 0 {
            tracing::warn!(%stream, pending, "stream destroyed with queued work");
        }
        Ok(())
    }

    fn synchronize_stream(&self, stream: StreamId) -> Result<()> {
        let s = self.stream(stream)?;
        Self::drain(stream, &s)
    }

    fn divide_in_place(
        &self,
        stream: StreamId,
        ptr: DevicePtr,
        count: usize,
        dtype: DType,
        divisor: usize,
    ) -> Result<()> {
        if dtype != DType::F32 {
            return Err(Error::UnsupportedDType {
                dtype,
                operation: "divide_in_place",
            });
        }
        if divisor == 0 {
            return Err(Error::internal("division by a zero world size"));
        }
        self.cluster.check_range(ptr, count)?;
        let cluster = Arc::clone(&self.cluster);
        let divisor = divisor as f32;
        self.enqueue(
            stream,
            Box::new(move || {
                cluster.update(ptr, count, |values| {
                    for v in values.iter_mut() {
                        *v /= divisor;
                    }
                })
            }),
        )
    }

    fn storage_classes(&self) -> Vec<StorageClass> {
        self.storage_classes.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerator(devices: usize) -> SimAccelerator {
        let acc = SimAccelerator::new(SimCluster::new(devices));
        acc.set_device(DeviceId(0)).unwrap();
        acc
    }

    #[test]
    fn test_set_device_out_of_range() {
        let acc = SimAccelerator::new(SimCluster::new(2));
        assert!(acc.set_device(DeviceId(1)).is_ok());
        let err = acc.set_device(DeviceId(2)).unwrap_err();
        assert!(matches!(err, Error::DeviceNotAvailable { count: 2, .. }));
        assert_eq!(acc.current_device(), Some(DeviceId(1)));
    }

    #[test]
    fn test_stream_requires_device() {
        let acc = SimAccelerator::new(SimCluster::new(1));
        assert_eq!(
            acc.create_stream(StreamFlags::NonBlocking).unwrap_err(),
            Error::NoActiveDevice
        );
    }

    #[test]
    fn test_alloc_read_write() {
        let acc = accelerator(1);
        let ptr = acc.alloc(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(acc.cluster().read(ptr, 3).unwrap(), vec![1.0, 2.0, 3.0]);
        acc.cluster().write(ptr, &[4.0, 5.0]).unwrap();
        assert_eq!(acc.cluster().read(ptr, 3).unwrap(), vec![4.0, 5.0, 3.0]);
        assert!(acc.cluster().read(ptr, 4).is_err());
        acc.cluster().free(ptr).unwrap();
        assert_eq!(
            acc.cluster().len(ptr).unwrap_err(),
            Error::InvalidPointer { ptr }
        );
    }

    #[test]
    fn test_divide_is_deferred_until_sync() {
        let acc = accelerator(1);
        let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let ptr = acc.alloc(vec![2.0, 4.0, 6.0]).unwrap();

        acc.divide_in_place(stream, ptr, 3, DType::F32, 2).unwrap();
        assert_eq!(acc.pending(stream).unwrap(), 1);
        assert_eq!(acc.cluster().read(ptr, 3).unwrap(), vec![2.0, 4.0, 6.0]);

        acc.synchronize_stream(stream).unwrap();
        assert_eq!(acc.pending(stream).unwrap(), 0);
        assert_eq!(acc.cluster().read(ptr, 3).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_stream_ops_run_in_fifo_order() {
        let acc = accelerator(1);
        let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let ptr = acc.alloc(vec![10.0]).unwrap();

        let cluster = Arc::clone(acc.cluster());
        acc.enqueue(
            stream,
            Box::new(move || cluster.update(ptr, 1, |v| v[0] += 2.0)),
        )
        .unwrap();
        acc.divide_in_place(stream, ptr, 1, DType::F32, 4).unwrap();

        acc.synchronize_stream(stream).unwrap();
        assert_eq!(acc.cluster().read(ptr, 1).unwrap(), vec![3.0]);
    }

    #[test]
    fn test_device_sync_drains_every_stream_on_device() {
        let acc = accelerator(1);
        let a = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let b = acc.create_stream(StreamFlags::Default).unwrap();
        let ptr = acc.alloc(vec![8.0]).unwrap();

        acc.divide_in_place(a, ptr, 1, DType::F32, 2).unwrap();
        acc.divide_in_place(b, ptr, 1, DType::F32, 2).unwrap();
        acc.synchronize_device().unwrap();

        assert_eq!(acc.pending(a).unwrap(), 0);
        assert_eq!(acc.pending(b).unwrap(), 0);
        assert_eq!(acc.cluster().read(ptr, 1).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_failed_op_discards_rest_of_queue() {
        let acc = accelerator(1);
        let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let ptr = acc.alloc(vec![8.0]).unwrap();

        acc.enqueue(stream, Box::new(|| Err(Error::internal("boom"))))
            .unwrap();
        acc.divide_in_place(stream, ptr, 1, DType::F32, 2).unwrap();

        let err = acc.synchronize_stream(stream).unwrap_err();
        assert!(matches!(err, Error::StreamOpFailed { .. }));
        assert!(err.to_string().contains("boom"));
        assert_eq!(acc.pending(stream).unwrap(), 0);
        assert_eq!(acc.cluster().read(ptr, 1).unwrap(), vec![8.0]);
    }

    #[test]
    fn test_divide_rejects_bad_requests() {
        let acc = accelerator(1);
        let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let ptr = acc.alloc(vec![1.0, 2.0]).unwrap();

        assert!(matches!(
            acc.divide_in_place(stream, ptr, 2, DType::F64, 2),
            Err(Error::UnsupportedDType { .. })
        ));
        assert!(matches!(
            acc.divide_in_place(stream, ptr, 3, DType::F32, 2),
            Err(Error::OutOfBounds { count: 3, len: 2 })
        ));
        assert_eq!(acc.pending(stream).unwrap(), 0);
    }

    #[test]
    fn test_destroy_stream() {
        let acc = accelerator(1);
        let stream = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        acc.destroy_stream(stream).unwrap();
        assert_eq!(
            acc.synchronize_stream(stream).unwrap_err(),
            Error::UnknownStream { stream }
        );
        assert!(acc.destroy_stream(stream).is_err());
    }

    #[test]
    fn test_storage_classes() {
        let acc = accelerator(1);
        let classes = acc.storage_classes();
        assert!(StorageClass::from(SIM_ARRAY).is_one_of(&classes));
        assert!(!StorageClass::from("CpuArray").is_one_of(&classes));
    }
}
