//! Cooperative cancellation signal
//!
//! Cancellation is a control signal, not an error. Long loops poll the
//! signal at batch boundaries; awaited external calls get it passed down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Poll point for loops: unwinds with [`Error::Cancelled`] when a stop
    /// was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_stop_requested() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_roundtrip() {
        let signal = StopSignal::new();
        assert!(!signal.is_stop_requested());
        assert!(signal.check().is_ok());

        signal.signal_stop();
        assert!(signal.is_stop_requested());
        assert!(signal.check().expect_err("cancelled").is_cancelled());

        signal.clear();
        assert!(signal.check().is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let a = StopSignal::new();
        let b = a.clone();
        a.signal_stop();
        assert!(b.is_stop_requested());
    }
}
