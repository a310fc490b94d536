//! Re-issue commands whose connection dropped mid-flight.

use std::time::Duration;

use tracing::info;

use super::cancel::CancelToken;
use super::pool::ConnectionPool;
use super::Invocation;
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::Dispatch;

/// Context passed to handlers when a command is re-issued.
pub const RETRY_CONTEXT: &str = "p4 connection dropped: ";

/// Bounded exponential backoff. `max_attempts == 0` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Wait before the attempt following attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

/// Run `inv` on a connection from `pool`, starting over on a fresh connection
/// each time the current one drops. Returns the time spent opening
/// connections.
pub fn run_with_retry(
    pool: &ConnectionPool,
    inv: &Invocation,
    dispatch: &mut Dispatch<'_>,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> P4Result<Duration> {
    let mut init_total = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        cancel.check(&inv.command)?;
        attempt += 1;

        let (mut conn, init) = pool.acquire()?;
        init_total += init;

        let saved = match &inv.credentials {
            Some(c) if c.is_complete() => {
                let saved = conn.credentials();
                conn.set_credentials(Some(c.clone()));
                Some(saved)
            }
            _ => None,
        };

        let res = conn.run(inv, dispatch, cancel);

        if !conn.dropped() {
            if let Some(saved) = saved {
                conn.set_credentials(saved);
            }
            pool.release(conn);
            return res.map(|()| init_total);
        }

        let err = conn.finalize().unwrap_or_default();
        pool.release(conn);
        if let Err(P4Error::Cancelled { .. }) = res {
            return res.map(|()| init_total);
        }
        dispatch.retry(RETRY_CONTEXT, &err);
        info!(command = %inv.command, attempt, "connection dropped: {err}");

        if !policy.allows(attempt) {
            return Err(P4Error::RetriesExhausted {
                command: inv.command.clone(),
                attempts: attempt,
            });
        }
        if !cancel.sleep(policy.backoff(attempt)) {
            return Err(P4Error::Cancelled {
                command: inv.command.clone(),
            });
        }
    }
}
