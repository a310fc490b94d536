//! Idle connection pool, one per protocol.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::connection::{Connection, Connector};
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::Protocol;

/// Idle connections kept per pool unless configured otherwise.
pub const DEFAULT_MAX_IDLE: usize = 16;

pub struct ConnectionPool {
    protocol: Protocol,
    connector: Arc<dyn Connector>,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    max_idle: usize,
}

impl ConnectionPool {
    pub fn new(protocol: Protocol, connector: Arc<dyn Connector>, max_idle: usize) -> Self {
        Self {
            protocol,
            connector,
            idle: Mutex::new(VecDeque::new()),
            max_idle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reuse an idle connection or open a new one. The duration is the time
    /// spent opening, zero on reuse.
    pub fn acquire(&self) -> P4Result<(Box<dyn Connection>, Duration)> {
        if let Some(conn) = self.lock().pop_front() {
            return Ok((conn, Duration::ZERO));
        }
        let start = Instant::now();
        let conn = self.connector.connect(self.protocol).map_err(|e| match e {
            P4Error::ConnectionInit(msg) => P4Error::ConnectionInit(msg),
            other => P4Error::ConnectionInit(format!("error initializing client: {other}")),
        })?;
        debug!(protocol = ?self.protocol, "opened connection");
        Ok((conn, start.elapsed()))
    }

    /// Return a connection. Dropped connections and overflow are discarded.
    pub fn release(&self, conn: Box<dyn Connection>) {
        if conn.dropped() {
            return;
        }
        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push_back(conn);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exec::{CancelToken, Credentials, Invocation};
    use crate::core::tagged::Dispatch;

    struct Stub {
        dropped: bool,
    }

    impl Connection for Stub {
        fn run(&mut self, _inv: &Invocation, _d: &mut Dispatch<'_>, _c: &CancelToken) -> P4Result<()> {
            Ok(())
        }
        fn dropped(&self) -> bool {
            self.dropped
        }
        fn credentials(&self) -> Option<Credentials> {
            None
        }
        fn set_credentials(&mut self, _credentials: Option<Credentials>) {}
        fn finalize(&mut self) -> Option<String> {
            None
        }
    }

    struct StubConnector;

    impl Connector for StubConnector {
        fn connect(&self, _protocol: Protocol) -> P4Result<Box<dyn Connection>> {
            Ok(Box::new(Stub { dropped: false }))
        }
    }

    #[test]
    fn release_caps_idle_and_discards_dropped() {
        let pool = ConnectionPool::new(Protocol::Tagged, Arc::new(StubConnector), 2);
        let conns: Vec<_> = (0..3).map(|_| pool.acquire().unwrap().0).collect();
        for c in conns {
            pool.release(c);
        }
        assert_eq!(pool.idle_count(), 2);

        pool.release(Box::new(Stub { dropped: true }));
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn reuse_reports_zero_init() {
        let pool = ConnectionPool::new(Protocol::Default, Arc::new(StubConnector), DEFAULT_MAX_IDLE);
        let (conn, _) = pool.acquire().unwrap();
        pool.release(conn);
        let (_, init) = pool.acquire().unwrap();
        assert_eq!(init, Duration::ZERO);
        assert_eq!(pool.idle_count(), 0);
    }
}
