use std::sync::Arc;

use parking_lot::RwLock;

/// Observer registry the orchestrators fire on every externally-visible
/// state change.
///
/// Callbacks run synchronously on the notifying task and in no particular
/// order, so they must be fast; the tray frontend debounces its own
/// redraws.
#[derive(Clone, Default)]
pub struct UpdateBus {
    callbacks: Arc<RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks.write().push(Arc::new(callback));
    }

    pub fn notify(&self) {
        let callbacks: Vec<_> = self.callbacks.read().iter().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for UpdateBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBus")
            .field("subscribers", &self.callbacks.read().len())
            .finish()
    }
}
