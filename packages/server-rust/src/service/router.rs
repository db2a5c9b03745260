//! Procedure routing: resolves a request path to its descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use super::procedure::ProcedureDescriptor;

// ---------------------------------------------------------------------------
// ProcedureTable
// ---------------------------------------------------------------------------

/// Read-only snapshot of `{path -> descriptor}` handed to bindings.
///
/// Built once when the registry freezes; shared across request tasks via
/// `Arc` without further synchronization. Paths are matched exactly and
/// case-sensitively.
#[derive(Debug, Default)]
pub struct ProcedureTable {
    by_path: HashMap<String, Arc<ProcedureDescriptor>>,
    /// Registration order, for deterministic listing.
    order: Vec<Arc<ProcedureDescriptor>>,
}

impl ProcedureTable {
    /// Builds a table from descriptors whose paths are already known to be
    /// unique.
    pub(crate) fn from_descriptors(descriptors: &[Arc<ProcedureDescriptor>]) -> Self {
        let by_path = descriptors
            .iter()
            .map(|d| (d.path().to_string(), Arc::clone(d)))
            .collect();
        Self {
            by_path,
            order: descriptors.to_vec(),
        }
    }

    /// Looks up the descriptor for `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Arc<ProcedureDescriptor>> {
        self.by_path.get(path)
    }

    /// Paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|d| d.path())
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcedureDescriptor>> {
        self.order.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
