//! Per-command timing table.
//!
//! Samples are sent over a channel to a recorder thread so a command never
//! waits on the table lock. A snapshot request travels the same channel, so
//! it observes every sample recorded before it was requested.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

/// Key under which pool connection setup time is recorded.
pub const INIT_CONN_KEY: &str = "_initconn_";

/// Timing summary for one command name, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandStat {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub total_us: u64,
}

impl Default for CommandStat {
    fn default() -> Self {
        Self {
            count: 0,
            min_us: u64::MAX,
            max_us: 0,
            total_us: 0,
        }
    }
}

impl CommandStat {
    fn add(&mut self, us: u64) {
        self.count += 1;
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.total_us += us;
    }

    pub fn mean_us(&self) -> u64 {
        if self.count == 0 { 0 } else { self.total_us / self.count }
    }
}

pub type StatsTable = BTreeMap<String, CommandStat>;

enum Message {
    Sample { key: String, us: u64 },
    Snapshot(Sender<StatsTable>),
}

/// Asynchronously updated statistics table owned by one executor.
pub struct CommandStats {
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for CommandStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandStats {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = thread::spawn(move || {
            let mut table = StatsTable::new();
            for msg in rx {
                match msg {
                    Message::Sample { key, us } => table.entry(key).or_default().add(us),
                    Message::Snapshot(reply) => {
                        let _ = reply.send(table.clone());
                    }
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Record one execution; `init` is non-zero when a fresh connection was
    /// built for it.
    pub fn record(&self, command: &str, exec: Duration, init: Duration) {
        self.send(command, exec);
        if !init.is_zero() {
            self.send(INIT_CONN_KEY, init);
        }
    }

    fn send(&self, key: &str, dur: Duration) {
        if let Some(tx) = &self.tx {
            let us = u64::try_from(dur.as_micros()).unwrap_or(u64::MAX);
            let _ = tx.send(Message::Sample {
                key: key.to_string(),
                us,
            });
        }
    }

    /// Copy of the table including every sample recorded before this call.
    pub fn snapshot(&self) -> StatsTable {
        let Some(tx) = &self.tx else {
            return StatsTable::new();
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        if tx.send(Message::Snapshot(reply_tx)).is_err() {
            return StatsTable::new();
        }
        reply_rx.recv().unwrap_or_default()
    }
}

impl Drop for CommandStats {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sees_prior_samples() {
        let stats = CommandStats::new();
        stats.record("fstat", Duration::from_micros(30), Duration::ZERO);
        stats.record("fstat", Duration::from_micros(10), Duration::from_micros(500));
        stats.record("key", Duration::from_micros(7), Duration::ZERO);

        let table = stats.snapshot();
        let fstat = table["fstat"];
        assert_eq!(fstat.count, 2);
        assert_eq!(fstat.min_us, 10);
        assert_eq!(fstat.max_us, 30);
        assert_eq!(fstat.total_us, 40);
        assert_eq!(fstat.mean_us(), 20);
        assert_eq!(table[INIT_CONN_KEY].count, 1);
        assert_eq!(table["key"].total_us, 7);
    }

    #[test]
    fn independent_instances() {
        let a = CommandStats::new();
        let b = CommandStats::new();
        a.record("sync", Duration::from_micros(1), Duration::ZERO);
        assert!(b.snapshot().is_empty());
    }
}
