//! Service state management.
//!
//! Wraps the relation kernel shared by all handlers.

use std::sync::Arc;

use crate::config::KernelConfig;
use crate::kernel::RelationKernel;
use crate::schema::RelationRegistry;
use crate::store::DocumentStore;

/// Shared service state.
pub struct ServiceState<S: DocumentStore + 'static> {
    /// The kernel answering every request.
    pub kernel: Arc<RelationKernel<S>>,
}

impl<S: DocumentStore + 'static> ServiceState<S> {
    /// Create service state over a store and registry with default options.
    pub fn new(store: S, registry: RelationRegistry) -> Self {
        Self {
            kernel: Arc::new(RelationKernel::new(Arc::new(store), Arc::new(registry))),
        }
    }

    /// Create service state from configuration.
    ///
    /// Load requests without options use the configured depth and fan-out.
    pub fn from_config(store: S, registry: RelationRegistry, config: &KernelConfig) -> Self {
        Self {
            kernel: Arc::new(RelationKernel::from_config(
                Arc::new(store),
                Arc::new(registry),
                config,
            )),
        }
    }
}

impl<S: DocumentStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            kernel: Arc::clone(&self.kernel),
        }
    }
}
