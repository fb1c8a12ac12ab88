//! The prompt decision cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::kind::PermissionKind;

/// Remembered prompt decisions, keyed by kind and canonical resource.
///
/// Only populated when the prompter asks for a decision to be remembered;
/// cleared only by an explicit [`reset`](PromptCache::reset). Read-mostly, so
/// lookups take the shared side of the lock.
#[derive(Default)]
pub struct PromptCache {
    entries: RwLock<HashMap<(PermissionKind, String), bool>>,
}

impl PromptCache {
    /// A remembered decision for this resource, if any.
    pub fn lookup(&self, kind: PermissionKind, resource: &str) -> Option<bool> {
        self.entries
            .read()
            .get(&(kind, resource.to_string()))
            .copied()
    }

    /// Remember a decision.
    pub fn record(&self, kind: PermissionKind, resource: &str, granted: bool) {
        self.entries
            .write()
            .insert((kind, resource.to_string()), granted);
    }

    /// Forget every remembered decision.
    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_then_hits() {
        let cache = PromptCache::default();
        assert_eq!(cache.lookup(PermissionKind::Read, "/tmp/x"), None);

        cache.record(PermissionKind::Read, "/tmp/x", true);
        cache.record(PermissionKind::Net, "example.com", false);

        assert_eq!(cache.lookup(PermissionKind::Read, "/tmp/x"), Some(true));
        assert_eq!(cache.lookup(PermissionKind::Net, "example.com"), Some(false));
        // Kinds do not bleed into each other.
        assert_eq!(cache.lookup(PermissionKind::Write, "/tmp/x"), None);
    }

    #[test]
    fn reset_forgets_everything() {
        let cache = PromptCache::default();
        cache.record(PermissionKind::Env, "PATH", true);
        cache.reset();
        assert_eq!(cache.lookup(PermissionKind::Env, "PATH"), None);
    }
}
