//! Stop flag shared by the walker workers and the driver.
//!
//! The flag is one-shot: once any party requests a stop it stays set for the
//! rest of the walk. Workers check it at every queue poll and every barrier
//! timeout, so a stop is observed after at most one directory scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-shot, multi-writer stop signal.
#[derive(Clone, Debug, Default)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
}

impl StopFlag {
    /// Creates a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcasts a stop to every holder of this flag.
    #[inline]
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once any holder requested a stop.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns `Some(())` while the walk may continue, `None` once stopped.
    ///
    /// This enables use with the `?` operator for early returns.
    #[inline]
    pub fn check(&self) -> Option<()> {
        if self.is_stopped() {
            None
        } else {
            Some(())
        }
    }
}

/// A shared flag raised when an exec subprocess exits unsuccessfully.
#[derive(Clone, Debug, Default)]
pub struct FailureFlag {
    raised: Arc<AtomicBool>,
}

impl FailureFlag {
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_flag_is_not_stopped() {
        let flag = StopFlag::new();
        assert!(!flag.is_stopped());
        assert!(flag.check().is_some());
    }

    #[test]
    fn stop_is_visible_to_clones() {
        let flag = StopFlag::new();
        let other = flag.clone();
        other.request_stop();
        assert!(flag.is_stopped());
        assert!(flag.check().is_none());
    }

    #[test]
    fn stop_from_another_thread() {
        let flag = StopFlag::new();
        let remote = flag.clone();
        std::thread::spawn(move || remote.request_stop())
            .join()
            .unwrap();
        assert!(flag.is_stopped());
    }

    #[test]
    fn failure_flag_stays_raised() {
        let flag = FailureFlag::default();
        assert!(!flag.is_raised());
        flag.clone().raise();
        assert!(flag.is_raised());
    }
}
