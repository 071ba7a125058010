//! C9: bounded set of in-flight [`OperationContext`]s with at-most-one
//! admission per fingerprint. A single [`parking_lot::Mutex`] owned by this
//! component serializes registration — the discipline spec §5 calls
//! "single-writer actor" without requiring an actual message-passing task.

use std::collections::HashMap;

use reconcile_core::{OperationContext, OperationType, SyncError, SyncResult, SyncState};

pub struct OperationRegistry {
    max_concurrent: usize,
    active: parking_lot::Mutex<HashMap<String, OperationContext>>,
}

impl OperationRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        OperationRegistry {
            max_concurrent,
            active: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, ctx: OperationContext) -> SyncResult<String> {
        let mut active = self.active.lock();
        if active.len() >= self.max_concurrent {
            return Err(SyncError::TooManyConcurrentOperations {
                max: self.max_concurrent,
            });
        }
        let (family, operation_type) = ctx.fingerprint();
        if active.values().any(|c| c.fingerprint() == (family.clone(), operation_type)) {
            return Err(SyncError::DuplicateOperation {
                family,
                operation: format!("{:?}", operation_type),
            });
        }
        let id = ctx.id.clone();
        active.insert(id.clone(), ctx);
        Ok(id)
    }

    pub fn unregister(&self, id: &str) {
        self.active.lock().remove(id);
    }

    pub fn cancel(&self, id: &str) -> bool {
        let mut active = self.active.lock();
        if let Some(ctx) = active.get_mut(id) {
            ctx.status = SyncState::Cancelled;
            true
        } else {
            false
        }
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.active
            .lock()
            .get(id)
            .map(|c| matches!(c.status, SyncState::Cancelled))
            .unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<OperationContext> {
        self.active.lock().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancels every active operation for `family`, returning how many were
    /// found. Used by `Engine::stop`.
    pub fn cancel_family(&self, family: &str) -> usize {
        let mut active = self.active.lock();
        let mut count = 0;
        for ctx in active.values_mut() {
            if ctx.family == family {
                ctx.status = SyncState::Cancelled;
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_fingerprint() {
        let registry = OperationRegistry::new(3);
        let a = OperationContext::new(OperationType::Full, "todos", None);
        let b = OperationContext::new(OperationType::Full, "todos", None);
        registry.register(a).unwrap();
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateOperation { .. }));
    }

    #[test]
    fn admits_different_families_concurrently() {
        let registry = OperationRegistry::new(3);
        let a = OperationContext::new(OperationType::Full, "todos", None);
        let b = OperationContext::new(OperationType::Full, "notes", None);
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn rejects_beyond_cap() {
        let registry = OperationRegistry::new(1);
        let a = OperationContext::new(OperationType::Full, "todos", None);
        let b = OperationContext::new(OperationType::Full, "notes", None);
        registry.register(a).unwrap();
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, SyncError::TooManyConcurrentOperations { .. }));
    }

    #[test]
    fn cancel_marks_status() {
        let registry = OperationRegistry::new(3);
        let ctx = OperationContext::new(OperationType::Full, "todos", None);
        let id = registry.register(ctx).unwrap();
        assert!(registry.cancel(&id));
        assert!(registry.is_cancelled(&id));
    }
}
