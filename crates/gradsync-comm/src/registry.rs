//! Registry - Gradient Parameter Registry
//!
//! Per device context, the ordered mapping from trainable-parameter name to
//! its gradient buffer. The surrounding framework owns the variables; the
//! communicator borrows raw device pointers for the duration of one
//! reduction call.
//!
//! Iteration order is insertion order and must be identical on every rank:
//! each rank issues one collective per entry, in this order.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashSet;
use std::sync::Arc;

use gradsync_core::{DType, DeviceId, DevicePtr, StorageClass};

use crate::error::{CommError, Result};

// =============================================================================
// Traits
// =============================================================================

/// A gradient buffer owned by the surrounding framework.
pub trait GradientVariable: Send + Sync {
    /// Number of elements.
    fn num_elements(&self) -> usize;

    /// Element type.
    fn dtype(&self) -> DType;

    /// Storage class currently backing the buffer.
    fn storage_class(&self) -> StorageClass;

    /// Returns a read-only device pointer, materializing the data on the
    /// active device first if needed.
    fn read_ptr(&self) -> Result<DevicePtr>;

    /// Returns a read-write device pointer, materializing the data on the
    /// active device first if needed. Host copies become stale.
    fn write_ptr(&self) -> Result<DevicePtr>;
}

/// A named gradient.
pub type NamedGradient = (String, Arc<dyn GradientVariable>);

/// Pairs a gradient with its parameter name.
pub fn named(name: impl Into<String>, grad: Arc<dyn GradientVariable>) -> NamedGradient {
    (name.into(), grad)
}

/// Ordered gradients per device context.
pub trait ParameterRegistry {
    /// Number of device contexts.
    fn num_contexts(&self) -> usize;

    /// Gradients of context `index` in registration order; empty if absent.
    fn gradients(&self, index: usize) -> &[NamedGradient];
}

// =============================================================================
// GradientRegistry
// =============================================================================

/// Gradients registered for one device.
pub struct DeviceContext {
    device: DeviceId,
    gradients: Vec<NamedGradient>,
}

impl DeviceContext {
    /// Returns the device of this context.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Returns the gradients in registration order.
    #[must_use]
    pub fn gradients(&self) -> &[NamedGradient] {
        &self.gradients
    }

    /// Returns the names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.gradients.iter().map(|(name, _)| name.as_str())
    }
}

/// Registry of device contexts and their gradients.
#[derive(Default)]
pub struct GradientRegistry {
    contexts: Vec<DeviceContext>,
}

impl GradientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with one context.
    pub fn single(device: DeviceId, gradients: Vec<NamedGradient>) -> Result<Self> {
        let mut registry = Self::new();
        registry.add_context(device, gradients)?;
        Ok(registry)
    }

    /// Registers the gradients of a device context, returning its index.
    ///
    /// Names must be unique within the context and a device may appear once.
    pub fn add_context(&mut self, device: DeviceId, gradients: Vec<NamedGradient>) -> Result<usize> {
        if self.contexts.iter().any(|c| c.device == device) {
            return Err(CommError::invalid_group(format!(
                "context for {device} already registered"
            )));
        }
        let mut seen = HashSet::new();
        for (name, _) in &gradients {
            if !seen.insert(name.as_str()) {
                return Err(CommError::invalid_group(format!(
                    "duplicate parameter '{name}' in context for {device}"
                )));
            }
        }
        self.contexts.push(DeviceContext { device, gradients });
        Ok(self.contexts.len() - 1)
    }

    /// Removes the context of `device`. Returns false if there was none.
    pub fn remove_context(&mut self, device: DeviceId) -> bool {
        let before = self.contexts.len();
        self.contexts.retain(|c| c.device != device);
        self.contexts.len() != before
    }

    /// Removes every context.
    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    /// Returns the registered contexts.
    #[must_use]
    pub fn contexts(&self) -> &[DeviceContext] {
        &self.contexts
    }

    /// Returns the gradient registered under `name` in context `index`.
    #[must_use]
    pub fn get(&self, index: usize, name: &str) -> Option<&Arc<dyn GradientVariable>> {
        self.gradients(index)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, g)| g)
    }
}

impl ParameterRegistry for GradientRegistry {
    fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    fn gradients(&self, index: usize) -> &[NamedGradient] {
        self.contexts
            .get(index)
            .map_or(&[][..], |c| c.gradients.as_slice())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize);

    impl GradientVariable for Fixed {
        fn num_elements(&self) -> usize {
            self.0
        }
        fn dtype(&self) -> DType {
            DType::F32
        }
        fn storage_class(&self) -> StorageClass {
            StorageClass::new("SimArray")
        }
        fn read_ptr(&self) -> Result<DevicePtr> {
            Ok(DevicePtr::from_raw(0x100))
        }
        fn write_ptr(&self) -> Result<DevicePtr> {
            Ok(DevicePtr::from_raw(0x100))
        }
    }

    fn fixed(name: &str, len: usize) -> NamedGradient {
        named(name, Arc::new(Fixed(len)))
    }

    #[test]
    fn test_order_is_registration_order() {
        let registry = GradientRegistry::single(
            DeviceId(0),
            vec![fixed("w2", 1), fixed("b1", 2), fixed("w1", 3)],
        )
        .unwrap();
        let names: Vec<_> = registry.contexts()[0].names().collect();
        assert_eq!(names, vec!["w2", "b1", "w1"]);
        assert_eq!(registry.num_contexts(), 1);
        assert_eq!(registry.gradients(0).len(), 3);
    }

    #[test]
    fn test_missing_context_is_empty() {
        let registry = GradientRegistry::new();
        assert_eq!(registry.num_contexts(), 0);
        assert!(registry.gradients(0).is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = GradientRegistry::single(DeviceId(0), vec![fixed("w", 1), fixed("w", 2)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_context_lifecycle() {
        let mut registry = GradientRegistry::new();
        assert_eq!(registry.add_context(DeviceId(0), vec![fixed("a", 1)]).unwrap(), 0);
        assert_eq!(registry.add_context(DeviceId(1), vec![fixed("a", 1)]).unwrap(), 1);
        assert!(registry.add_context(DeviceId(1), vec![]).is_err());

        assert!(registry.remove_context(DeviceId(0)));
        assert!(!registry.remove_context(DeviceId(0)));
        assert_eq!(registry.contexts()[0].device(), DeviceId(1));

        registry.clear();
        assert_eq!(registry.num_contexts(), 0);
    }

    #[test]
    fn test_get_by_name() {
        let registry =
            GradientRegistry::single(DeviceId(0), vec![fixed("a", 1), fixed("b", 4)]).unwrap();
        assert_eq!(registry.get(0, "b").unwrap().num_elements(), 4);
        assert!(registry.get(0, "c").is_none());
        assert!(registry.get(1, "a").is_none());
    }
}
