//! Sync - Device and Stream Barriers
//!
//! Blocking waits that bracket a reduction round. The device barrier waits
//! for every stream of the bound device; the stream barrier waits for the
//! reduction stream only. Failures of queued work are communication failures.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::time::Instant;

use gradsync_core::{Accelerator, Error as DeviceError, StreamId};

use crate::error::{CommError, Result};

fn classify(err: DeviceError) -> CommError {
    match err {
        DeviceError::StreamOpFailed { .. } => CommError::communication(err.to_string()),
        other => CommError::Device(other),
    }
}

/// Blocks until all previously issued work on the bound device completes.
pub fn device_barrier(accelerator: &dyn Accelerator) -> Result<()> {
    let start = Instant::now();
    accelerator.synchronize_device().map_err(classify)?;
    tracing::debug!(elapsed = ?start.elapsed(), "device barrier");
    Ok(())
}

/// Blocks until all previously issued work on `stream` completes.
pub fn stream_barrier(accelerator: &dyn Accelerator, stream: StreamId) -> Result<()> {
    let start = Instant::now();
    accelerator.synchronize_stream(stream).map_err(classify)?;
    tracing::debug!(%stream, elapsed = ?start.elapsed(), "stream barrier");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradsync_core::{DeviceId, SimAccelerator, SimCluster, StreamFlags};

    #[test]
    fn test_barriers_run_queued_work() {
        let acc = SimAccelerator::new(SimCluster::new(1));
        acc.set_device(DeviceId(0)).unwrap();
        let s = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        let ptr = acc.alloc(vec![8.0]).unwrap();

        acc.divide_in_place(s, ptr, 1, gradsync_core::DType::F32, 2)
            .unwrap();
        stream_barrier(&acc, s).unwrap();
        assert_eq!(acc.cluster().read(ptr, 1).unwrap(), vec![4.0]);

        acc.divide_in_place(s, ptr, 1, gradsync_core::DType::F32, 2)
            .unwrap();
        device_barrier(&acc).unwrap();
        assert_eq!(acc.cluster().read(ptr, 1).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_failed_work_is_a_communication_error() {
        let acc = SimAccelerator::new(SimCluster::new(1));
        acc.set_device(DeviceId(0)).unwrap();
        let s = acc.create_stream(StreamFlags::NonBlocking).unwrap();
        acc.enqueue(s, Box::new(|| Err(DeviceError::internal("boom"))))
            .unwrap();
        assert!(matches!(
            stream_barrier(&acc, s),
            Err(CommError::Communication { .. })
        ));
    }

    #[test]
    fn test_unknown_stream_is_a_device_error() {
        let acc = SimAccelerator::new(SimCluster::new(1));
        acc.set_device(DeviceId(0)).unwrap();
        assert!(matches!(
            stream_barrier(&acc, StreamId::from_raw(99)),
            Err(CommError::Device(DeviceError::UnknownStream { .. }))
        ));
    }
}
