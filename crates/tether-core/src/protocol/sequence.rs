//! Sequence counter for streaming telemetry packets.
//!
//! # Why do telemetry packets carry a sequence number? (for beginners)
//!
//! The controller stream travels over UDP, which may drop or reorder
//! datagrams.  Each packet carries a 32-bit number that increases by one per
//! packet so the receiver can discard anything older than the last packet it
//! applied and can count gaps.
//!
//! The counter is atomic, so the streaming worker and anything inspecting it
//! for diagnostics can share it without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// A monotonically increasing `u32` counter that wraps at `u32::MAX`.
///
/// # Examples
///
/// ```rust
/// use tether_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `value`.
    pub fn starting_at(value: u32) -> Self {
        Self {
            inner: AtomicU32::new(value),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `Relaxed` ordering is enough: the value orders packets, it does not
    /// publish other memory.
    pub fn next(&self) -> u32 {
        // fetch_add wraps on overflow.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will produce.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 0);
    }

    #[test]
    fn test_sequence_counter_wraps_at_u32_max() {
        // Arrange – one step before overflow
        let counter = SequenceCounter::starting_at(u32::MAX);

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u32::MAX);
        assert_eq!(after_wrap, 0, "counter must wrap to 0 after u32::MAX");
    }

    #[test]
    fn test_sequence_counter_values_unique_across_threads() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..500).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
    }

    #[test]
    fn test_current_does_not_increment() {
        let counter = SequenceCounter::new();
        counter.next();

        assert_eq!(counter.current(), 1);
        assert_eq!(counter.next(), 1);
    }
}
