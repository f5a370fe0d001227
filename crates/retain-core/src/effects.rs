use std::sync::Arc;

use parking_lot::Mutex;

/// Something that owns resources tied to a state-store entry.
///
/// The store calls `dispose` exactly once, when the entry is swept or the
/// store is cleared. Implementations must not panic and must not block on
/// background work; they only make sure that work has no further effect.
pub trait Disposable: Send + Sync + 'static {
    fn dispose(&self);
}

/// Cleanup guard returned by effects.
#[derive(Clone)]
pub struct Dispose(Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    /// Guard with nothing to clean up.
    pub fn noop() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.lock().take();
        if let Some(f) = f {
            f()
        }
    }

    pub fn is_spent(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl std::fmt::Debug for Dispose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispose")
            .field("spent", &self.is_spent())
            .finish()
    }
}

impl Disposable for Dispose {
    fn dispose(&self) {
        self.run();
    }
}

/// Helper to register cleanup inside an effect.
pub fn on_unmount(f: impl FnOnce() + Send + 'static) -> Dispose {
    Dispose::new(f)
}

/// Mutex-guarded plain value with nothing to release.
///
/// Use it for widget state that only needs to survive across frames (open
/// flags, cursor positions, cached measurements).
#[derive(Debug, Default)]
pub struct StateCell<T>(Mutex<T>);

impl<T> StateCell<T> {
    pub fn new(value: T) -> Self {
        Self(Mutex::new(value))
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = value;
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.lock())
    }
}

impl<T: Send + 'static> Disposable for StateCell<T> {
    fn dispose(&self) {}
}

/// Store payload behind `BuildCx::disposable_effect`: the last dependency
/// value and the cleanup of the effect that ran for it.
pub(crate) struct EffectSlot<K> {
    pub(crate) last_key: Mutex<Option<K>>,
    pub(crate) cleanup: Mutex<Option<Dispose>>,
}

impl<K> EffectSlot<K> {
    pub(crate) fn new() -> Self {
        Self {
            last_key: Mutex::new(None),
            cleanup: Mutex::new(None),
        }
    }
}

impl<K: Send + 'static> Disposable for EffectSlot<K> {
    fn dispose(&self) {
        let cleanup = self.cleanup.lock().take();
        if let Some(d) = cleanup {
            d.run();
        }
    }
}
