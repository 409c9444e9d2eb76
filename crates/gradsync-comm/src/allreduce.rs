//! All-Reduce - In-Place Gradient Reduction
//!
//! One reduction round over the gradients of device context 0:
//!
//! 1. device barrier, so the backward pass has finished writing gradients
//! 2. materialize every gradient on the device and check its storage class
//! 3. queue one in-place sum per gradient on the reduction stream
//! 4. optionally queue a divide by the group size behind each sum
//! 5. stream barrier, after which every rank holds identical values
//!
//! Every rank must present the same parameters in the same order. Nothing
//! synchronizes between parameters or between the sum and the divide; stream
//! order alone sequences them.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::Arc;

use gradsync_core::StorageClass;

use crate::communicator::Communicator;
use crate::engine::ReduceOp;
use crate::error::{CommError, Result};
use crate::registry::{NamedGradient, ParameterRegistry};
use crate::sync::{device_barrier, stream_barrier};

/// Summary of a completed reduction round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllReduceReport {
    /// Gradients reduced.
    pub parameters: usize,
    /// Elements reduced across all gradients.
    pub elements: usize,
    /// Whether results were divided by the group size.
    pub divided: bool,
    /// Gradients whose storage class the accelerator does not list.
    pub storage_class_warnings: usize,
}

impl Communicator {
    /// Sums every gradient of context 0 across the group in place, then
    /// divides by the group size if `division` is set.
    ///
    /// Collective: every rank must call it with the same parameters in the
    /// same order. On return the results are visible to the caller.
    pub fn all_reduce_in_place(
        &mut self,
        registry: &dyn ParameterRegistry,
        division: bool,
    ) -> Result<AllReduceReport> {
        let stream = self.stream()?;
        let gradients = self.context_gradients(registry)?;
        let accelerator = Arc::clone(self.accelerator());
        let world_size = self.world_size();
        let rank = self.rank();

        device_barrier(accelerator.as_ref())?;

        let allowed = if self.config().check_storage_class {
            Some(self.allowed_storage_classes())
        } else {
            None
        };
        let mut report = AllReduceReport {
            divided: division,
            ..AllReduceReport::default()
        };
        for (name, grad) in gradients {
            grad.read_ptr()?;
            if let Some(allowed) = &allowed {
                let class = grad.storage_class();
                if !class.is_one_of(allowed) {
                    tracing::warn!(
                        rank,
                        parameter = %name,
                        storage_class = %class,
                        allowed = %join(allowed),
                        "gradient storage class not accepted by the accelerator; reducing in place anyway"
                    );
                    report.storage_class_warnings += 1;
                }
            }
        }

        let handle = self.handle_mut()?;
        for (name, grad) in gradients {
            let send = grad.read_ptr()?;
            let recv = grad.write_ptr()?;
            let count = grad.num_elements();
            handle
                .raw_mut()
                .all_reduce(send, recv, count, grad.dtype(), ReduceOp::Sum, stream)
                .map_err(|e| {
                    CommError::communication(format!("all_reduce of '{name}' rejected: {e}"))
                })?;
            tracing::debug!(rank, parameter = %name, count, "all_reduce issued");
            report.parameters += 1;
            report.elements += count;
        }

        if division {
            for (_, grad) in gradients {
                let ptr = grad.write_ptr()?;
                accelerator.divide_in_place(
                    stream,
                    ptr,
                    grad.num_elements(),
                    grad.dtype(),
                    world_size,
                )?;
            }
        }

        stream_barrier(accelerator.as_ref(), stream)?;
        tracing::debug!(
            rank,
            parameters = report.parameters,
            elements = report.elements,
            divided = division,
            "all_reduce round complete"
        );
        Ok(report)
    }

    fn context_gradients<'r>(
        &self,
        registry: &'r dyn ParameterRegistry,
    ) -> Result<&'r [NamedGradient]> {
        let count = registry.num_contexts();
        if count > 1 {
            if self.config().strict_contexts {
                return Err(CommError::MultipleContexts { count });
            }
            tracing::warn!(
                rank = self.rank(),
                contexts = count,
                "only device context 0 is reduced; the others are ignored"
            );
        }
        Ok(registry.gradients(0))
    }
}

fn join(classes: &[StorageClass]) -> String {
    classes
        .iter()
        .map(StorageClass::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Tests
// =============================================================================
