//! Single-owner registration slot.
//!
//! Some callbacks have exactly one legitimate consumer, wired up once at
//! composition time. [`RegistrationSlot`] models that: the first
//! registration wins, a second registration is a setup-time invariant
//! violation and is rejected rather than silently replacing the handler.

use parking_lot::Mutex;
use thiserror::Error;

/// A second registration was attempted on an occupied slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("handler already registered for '{0}'")]
pub struct AlreadyRegistered(pub &'static str);

/// Holds at most one handler, set exactly once.
pub struct RegistrationSlot<T> {
    name: &'static str,
    inner: Mutex<Option<T>>,
}

impl<T> RegistrationSlot<T> {
    /// Create an empty slot. `name` identifies the slot in error messages.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(None),
        }
    }

    /// Install the handler. Fails if one is already installed.
    pub fn register(&self, handler: T) -> Result<(), AlreadyRegistered> {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return Err(AlreadyRegistered(self.name));
        }
        *guard = Some(handler);
        Ok(())
    }

    /// Whether a handler is installed.
    pub fn is_registered(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Run `f` against the handler if one is installed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().as_ref().map(f)
    }
}

impl<T> std::fmt::Debug for RegistrationSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationSlot")
            .field("name", &self.name)
            .field("registered", &self.is_registered())
            .finish()
    }
}
