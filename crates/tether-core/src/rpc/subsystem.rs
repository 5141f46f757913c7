//! Scoped access to non-reentrant native subsystems.
//!
//! Some OS services must be initialised before a call and shut down after it,
//! and two threads must never interleave those steps.  [`ExclusiveSubsystem`]
//! runs init, the call, and exit under one lock; exit is tied to a guard so it
//! runs even if the call panics.

use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::rpc::status::StatusCode;

/// A native subsystem with explicit init and exit.
pub trait Subsystem: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Brings the subsystem up.  A failing status aborts the scoped call.
    fn init(&self) -> StatusCode;

    fn exit(&self);
}

/// Serialises init + call + exit of one subsystem.
pub struct ExclusiveSubsystem<S: Subsystem + ?Sized> {
    lock: Mutex<()>,
    subsystem: Box<S>,
}

impl<S: Subsystem + ?Sized> ExclusiveSubsystem<S> {
    pub fn new(subsystem: Box<S>) -> Self {
        Self {
            lock: Mutex::new(()),
            subsystem,
        }
    }

    /// Runs `f` between init and exit while holding the subsystem lock.
    ///
    /// # Errors
    ///
    /// Returns the init status if the subsystem fails to come up; `f` is not
    /// called and exit is skipped in that case.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, StatusCode> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let status = self.subsystem.init();
        if status.is_failure() {
            warn!(subsystem = self.subsystem.name(), %status, "subsystem init failed");
            return Err(status);
        }

        let _exit = ExitGuard {
            subsystem: &*self.subsystem,
        };
        Ok(f(&*self.subsystem))
    }
}

/// Calls `exit` when dropped; declared after the lock guard so it runs first.
struct ExitGuard<'a, S: Subsystem + ?Sized> {
    subsystem: &'a S,
}

impl<S: Subsystem + ?Sized> Drop for ExitGuard<'_, S> {
    fn drop(&mut self) {
        self.subsystem.exit();
    }
}
