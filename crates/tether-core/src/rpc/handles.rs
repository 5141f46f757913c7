//! Registry of native handles the peer currently holds.
//!
//! # Why track handles? (for beginners)
//!
//! When the peer opens a file, the device's OS hands back an integer handle
//! and the peer refers to the file by that number from then on.  If the
//! connection drops, nobody will ever send the matching close.  The registry
//! remembers every open handle and its kind so the session teardown can close
//! them all with the right native call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::rpc::status::StatusCode;

/// What a registered handle refers to; selects the native close routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    File,
    Directory,
    Archive,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::File => "file",
            HandleKind::Directory => "directory",
            HandleKind::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// Native close routine used by [`HandleRegistry::close_all`].
#[cfg_attr(test, mockall::automock)]
pub trait HandleCloser {
    /// Closes `handle` using the routine appropriate for `kind`.
    fn close(&self, handle: u64, kind: HandleKind) -> StatusCode;
}

/// Result of a bulk close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseAllReport {
    pub closed: usize,
    pub failed: usize,
}

/// Lock-protected map of open handle → kind, owned by one session.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    entries: Mutex<BTreeMap<u64, HandleKind>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an open handle.  Returns the previous kind if the value was
    /// already registered, which means the OS reused a handle we never saw
    /// closed.
    pub fn register(&self, handle: u64, kind: HandleKind) -> Option<HandleKind> {
        let previous = self.lock().insert(handle, kind);
        if let Some(old) = previous {
            warn!(handle, %old, new = %kind, "handle registered twice");
        }
        previous
    }

    /// Forgets a handle without closing it.
    pub fn unregister(&self, handle: u64) -> Option<HandleKind> {
        self.lock().remove(&handle)
    }

    /// Closes a registered handle and forgets it in one critical section.
    ///
    /// `close` receives the handle's kind and runs while the registry lock is
    /// held, so a concurrent [`close_all`](Self::close_all) cannot close the
    /// same handle twice.  Returns `None`, without calling `close`, if the
    /// handle is not registered.
    pub fn close_with<F>(&self, handle: u64, close: F) -> Option<StatusCode>
    where
        F: FnOnce(HandleKind) -> StatusCode,
    {
        let mut entries = self.lock();
        let kind = entries.remove(&handle)?;
        let status = close(kind);
        if status.is_failure() {
            warn!(handle, %kind, %status, "native close failed");
        }
        Some(status)
    }

    pub fn kind_of(&self, handle: u64) -> Option<HandleKind> {
        self.lock().get(&handle).copied()
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.lock().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes every registered handle and empties the registry.
    ///
    /// A failing close is logged and counted; it never stops the sweep.
    pub fn close_all(&self, closer: &dyn HandleCloser) -> CloseAllReport {
        let mut entries = self.lock();
        let mut report = CloseAllReport::default();

        for (handle, kind) in std::mem::take(&mut *entries) {
            let status = closer.close(handle, kind);
            if status.is_failure() {
                warn!(handle, %kind, %status, "failed to close handle during teardown");
                report.failed += 1;
            } else {
                report.closed += 1;
            }
        }

        debug!(closed = report.closed, failed = report.failed, "handle registry cleared");
        report
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, HandleKind>> {
        // The map stays consistent even if a holder panicked mid-call.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_register_then_unregister() {
        // Arrange
        let registry = HandleRegistry::new();
        registry.register(7, HandleKind::File);

        // Act
        let removed = registry.unregister(7);

        // Assert
        assert_eq!(removed, Some(HandleKind::File));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_reports_reused_handle() {
        let registry = HandleRegistry::new();
        registry.register(1, HandleKind::File);

        let previous = registry.register(1, HandleKind::Directory);

        assert_eq!(previous, Some(HandleKind::File));
        assert_eq!(registry.kind_of(1), Some(HandleKind::Directory));
    }

    #[test]
    fn test_close_with_runs_close_and_removes_entry() {
        let registry = HandleRegistry::new();
        registry.register(3, HandleKind::Directory);

        let status = registry.close_with(3, |kind| {
            assert_eq!(kind, HandleKind::Directory);
            StatusCode::SUCCESS
        });

        assert_eq!(status, Some(StatusCode::SUCCESS));
        assert!(!registry.contains(3));
    }

    #[test]
    fn test_close_with_unknown_handle_does_not_call_close() {
        let registry = HandleRegistry::new();

        let status = registry.close_with(99, |_| panic!("close must not run"));

        assert_eq!(status, None);
    }

    #[test]
    fn test_close_all_closes_each_handle_exactly_once_despite_failure() {
        // Arrange – three handles; the directory close fails
        let registry = HandleRegistry::new();
        registry.register(10, HandleKind::File);
        registry.register(11, HandleKind::Directory);
        registry.register(12, HandleKind::Archive);

        let mut closer = MockHandleCloser::new();
        closer
            .expect_close()
            .with(eq(10), eq(HandleKind::File))
            .times(1)
            .return_const(StatusCode::SUCCESS);
        closer
            .expect_close()
            .with(eq(11), eq(HandleKind::Directory))
            .times(1)
            .return_const(StatusCode(-1));
        closer
            .expect_close()
            .with(eq(12), eq(HandleKind::Archive))
            .times(1)
            .return_const(StatusCode::SUCCESS);

        // Act
        let report = registry.close_all(&closer);

        // Assert
        assert_eq!(
            report,
            CloseAllReport {
                closed: 2,
                failed: 1,
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_on_empty_registry_calls_nothing() {
        let registry = HandleRegistry::new();
        let mut closer = MockHandleCloser::new();
        closer.expect_close().never();

        let report = registry.close_all(&closer);

        assert_eq!(report, CloseAllReport::default());
    }

    #[test]
    fn test_second_close_all_is_a_no_op() {
        let registry = HandleRegistry::new();
        registry.register(1, HandleKind::File);
        let mut closer = MockHandleCloser::new();
        closer.expect_close().times(1).return_const(StatusCode::SUCCESS);

        registry.close_all(&closer);
        let second = registry.close_all(&closer);

        assert_eq!(second, CloseAllReport::default());
    }
}
