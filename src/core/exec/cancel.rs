//! Cooperative cancellation shared between a caller and in-flight commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::error::{P4Error, P4Result};

/// Slice used when sleeping or polling a child process.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Clonable cancellation flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self, command: &str) -> P4Result<()> {
        if self.is_cancelled() {
            Err(P4Error::Cancelled {
                command: command.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Sleep for `dur`, waking early on cancel. Returns `false` if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check("sync").is_ok());
        other.cancel();
        assert!(matches!(token.check("sync"), Err(P4Error::Cancelled { .. })));
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
