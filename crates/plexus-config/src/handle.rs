use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::snapshot::ConfigSnapshot;

/// Shared handle to the current config snapshot.
///
/// Reads are lock-free pointer loads; a reload stores a new `Arc` and
/// in-flight requests keep whatever snapshot they captured.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<ConfigSnapshot>>,
}

impl ConfigHandle {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// Capture the current snapshot for the duration of a request.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.load_full()
    }

    /// Atomically replace the snapshot (hot reload).
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_does_not_disturb_captured_snapshots() {
        let handle = ConfigHandle::new(ConfigSnapshot::default());
        let before = handle.snapshot();
        let mut next = ConfigSnapshot::default();
        next.api_keys.push(crate::ApiKeyConfig {
            name: "k".into(),
            secret: "s".into(),
            enabled: true,
        });
        handle.replace(next);
        assert!(before.api_keys.is_empty());
        assert_eq!(handle.snapshot().api_keys.len(), 1);
    }
}
