//! Typed depot API.
//!
//! [`Perforce`] is a cheap, clonable handle over a shared [`Executor`]. Every
//! operation builds an [`Invocation`], runs it on the process path or through
//! a pooled connection, and parses the result into the records of [`types`].
//! Handles derived with [`Perforce::for_user`] or [`Perforce::with_cancel`]
//! share the executor, so pools and timing statistics stay common.

pub mod changes;
pub mod files;
pub mod fstat;
pub mod grep;
pub mod keys;
pub mod print;
pub mod session;
pub mod spec;
pub mod types;
pub mod unix_diff;

use std::io::Write;
use std::sync::Arc;

use chrono::DateTime;

use crate::core::error::{P4Error, P4Result};
use crate::core::exec::{CancelToken, Credentials, Executor, Invocation, StatsTable};
use crate::core::tagged::{Buffer, OutputHandler, Protocol, Record, Tagged, from_record};
use crate::infra::config::Config;

pub use grep::GrepStatus;
pub use spec::{Client, ClientOption, ViewEntry, append_client_option};
pub use types::*;

/// Server timestamp format used for changelist dates.
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Knobs for operations that split their work into several calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Paths passed to one `edit`/`delete`/`reconcile` call.
    pub paths_per_call: usize,
    /// Files a single `grep` call may cover.
    pub grep_file_ceiling: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            paths_per_call: config.batch.paths_per_call.max(1),
            grep_file_ceiling: config.grep.file_ceiling.max(1),
        }
    }
}

/// Handle to a depot server.
#[derive(Clone)]
pub struct Perforce {
    exec: Arc<Executor>,
    credentials: Option<Credentials>,
    cancel: CancelToken,
    settings: Settings,
}

impl Perforce {
    /// Handle backed by the command-line client described in `config`.
    pub fn new(config: &Config) -> Self {
        let exec = Executor::new(&config.server, config.retry.policy());
        Self::with_executor(Arc::new(exec), Settings::from(config))
    }

    pub fn with_executor(exec: Arc<Executor>, settings: Settings) -> Self {
        Self {
            exec,
            credentials: None,
            cancel: CancelToken::new(),
            settings,
        }
    }

    /// Handle whose calls run as `user`. Other handles are unaffected.
    pub fn for_user(&self, user: &str, password: &str) -> Self {
        Self {
            credentials: Some(Credentials::new(user, password)),
            ..self.clone()
        }
    }

    /// Handle whose calls observe `cancel`.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.exec
    }

    /// Per-command timings recorded so far by the shared executor.
    pub fn stats(&self) -> StatsTable {
        self.exec.stats()
    }

    /// Run a raw command line, e.g. `["sync", "-f", "//depot/..."]`, and
    /// return everything it printed.
    pub fn exec_cmd<S: AsRef<str>>(&self, args: &[S]) -> P4Result<String> {
        self.exec_routed(args, None, None)
    }

    /// Like [`exec_cmd`](Self::exec_cmd), also forwarding output to `sink`
    /// as it is produced.
    pub fn exec_cmd_with_output<S: AsRef<str>>(&self, args: &[S], sink: &mut dyn Write) -> P4Result<String> {
        self.exec_routed(args, None, Some(sink))
    }

    pub(crate) fn exec_with_stdin<S: AsRef<str>>(&self, args: &[S], stdin: Vec<u8>) -> P4Result<String> {
        self.exec_routed(args, Some(stdin), None)
    }

    fn exec_routed<S: AsRef<str>>(
        &self,
        args: &[S],
        stdin: Option<Vec<u8>>,
        sink: Option<&mut dyn Write>,
    ) -> P4Result<String> {
        let mut inv = Invocation::from_argv(args)?.with_credentials(self.credentials.clone());

        if !self.exec.routes_to_pool(&inv.command) {
            inv.stdin = stdin;
            return self.exec.run_process(&inv, sink, &self.cancel);
        }

        let tagged = inv.global_args.iter().any(|a| a == "-ztag");
        inv.global_args.retain(|a| a != "-ztag");
        let mut buffer = Buffer::new(stdin);
        if tagged {
            buffer = buffer.tagged();
        }
        let res = self.exec.run_callback(&inv, &mut buffer, &self.cancel);
        if let Some(sink) = sink {
            sink.write_all(buffer.bytes())
                .map_err(|e| P4Error::io("forwarding command output", e))?;
        }
        res.map(|()| buffer.into_string())
    }

    /// Run `command` through a pooled connection, streaming into `handler`.
    pub(crate) fn run_handler<I, S>(&self, command: &str, args: I, handler: &mut dyn OutputHandler) -> P4Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inv = Invocation::new(command, args).with_credentials(self.credentials.clone());
        self.exec.run_callback(&inv, handler, &self.cancel)
    }
}

/// Render a server timestamp; zero means unset.
pub(crate) fn format_date(time: i64) -> String {
    if time == 0 {
        return String::new();
    }
    DateTime::from_timestamp(time, 0)
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Handler collecting every tagged record bound onto `T`.
pub(crate) struct RecordList<T> {
    pub items: Vec<T>,
}

impl<T> Default for RecordList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Tagged> OutputHandler for RecordList<T> {
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        self.items.push(from_record(stats));
        Ok(())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.items.clear();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_render_in_utc() {
        assert_eq!(format_date(0), "");
        assert_eq!(format_date(1_600_000_000), "2020/09/13 12:26:40");
    }

    #[test]
    fn settings_never_zero() {
        let mut cfg = Config::default();
        cfg.batch.paths_per_call = 0;
        assert_eq!(Settings::from(&cfg).paths_per_call, 1);
    }
}
