//! In-flight execution registry.
//!
//! Holds a snapshot of the `ExecutionContext` of every execution that is
//! currently running, keyed by execution ID, so status pollers can read
//! progress without touching the engine's own copy. Each execution only
//! ever writes its own key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::context::ExecutionContext;

#[derive(Debug)]
struct Slot {
    /// Distinguishes successive registrations of the same execution ID.
    generation: u64,
    context: ExecutionContext,
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    slots: DashMap<String, Slot>,
    next_generation: AtomicU64,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight execution.
    ///
    /// Returns `None` if an execution with the same ID is already in flight.
    /// The returned guard removes the entry when dropped.
    pub fn register(self: &Arc<Self>, context: ExecutionContext) -> Option<RegistrationGuard> {
        let execution_id = context.execution_id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.slots.entry(execution_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    generation,
                    context,
                });
                Some(RegistrationGuard {
                    registry: Arc::clone(self),
                    execution_id,
                    generation,
                })
            }
        }
    }

    /// Replace the published snapshot for an execution that is still tracked.
    ///
    /// Returns `false` without inserting anything if the entry is gone, so a
    /// cancelled execution never reappears.
    pub fn refresh(&self, context: &ExecutionContext) -> bool {
        match self.slots.get_mut(&context.execution_id) {
            Some(mut slot) => {
                slot.context = context.clone();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.slots.get(execution_id).map(|slot| slot.context.clone())
    }

    /// Drop the entry for `execution_id`. Returns whether it was present.
    pub fn remove(&self, execution_id: &str) -> bool {
        self.slots.remove(execution_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Releases an execution's registry slot on drop, including on panic or
/// when the execution future is dropped mid-flight.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ExecutionRegistry>,
    execution_id: String,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        // Only remove our own registration; the ID may have been cancelled
        // and reused by a newer execution meanwhile.
        self.registry
            .slots
            .remove_if(&self.execution_id, |_, slot| slot.generation == self.generation);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn context(id: &str) -> ExecutionContext {
        ExecutionContext::new("wf", id, HashMap::new(), 2)
    }

    #[test]
    fn test_register_and_release() {
        let registry = Arc::new(ExecutionRegistry::new());
        let guard = registry.register(context("e1")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("e1").is_some());

        drop(guard);
        assert!(registry.is_empty());
        assert!(registry.get("e1").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Arc::new(ExecutionRegistry::new());
        let _guard = registry.register(context("e1")).unwrap();
        assert!(registry.register(context("e1")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_refresh_publishes_snapshot() {
        let registry = Arc::new(ExecutionRegistry::new());
        let mut ctx = context("e1");
        let _guard = registry.register(ctx.clone()).unwrap();

        ctx.advance_to(1).unwrap();
        ctx.record_step_output("a", json!(1)).unwrap();
        assert!(registry.refresh(&ctx));

        let seen = registry.get("e1").unwrap();
        assert_eq!(seen.current_step(), 1);
        assert_eq!(seen.step_output("a"), Some(&json!(1)));
    }

    #[test]
    fn test_refresh_after_remove_does_not_reinsert() {
        let registry = Arc::new(ExecutionRegistry::new());
        let ctx = context("e1");
        let _guard = registry.register(ctx.clone()).unwrap();

        assert!(registry.remove("e1"));
        assert!(!registry.refresh(&ctx));
        assert!(registry.get("e1").is_none());
        assert!(!registry.remove("e1"));
    }

    #[test]
    fn test_stale_guard_does_not_remove_newer_registration() {
        let registry = Arc::new(ExecutionRegistry::new());
        let old = registry.register(context("e1")).unwrap();
        registry.remove("e1");

        let _new = registry.register(context("e1")).unwrap();
        drop(old);
        assert!(registry.get("e1").is_some());
    }
}
