//! Command execution.
//!
//! Every server round-trip goes through [`Executor`], which owns the two
//! execution paths:
//!
//! - the process path ([`process`]): spawn the command-line client once per
//!   call and capture its combined output;
//! - the pooled path ([`pool`], [`connection`], [`retry`]): check a
//!   connection out of a tagged or default pool, stream its output into an
//!   [`OutputHandler`], and re-issue the command on a fresh connection when
//!   the old one drops.
//!
//! Timings for both paths land in the executor's [`CommandStats`].

pub mod cancel;
pub mod connection;
pub mod pool;
pub mod process;
pub mod retry;
pub mod stats;

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use cancel::CancelToken;
pub use connection::{Connection, Connector, ProcessConnector};
pub use pool::ConnectionPool;
pub use process::{ExitReport, Launcher, OutputMux, ProcessLauncher};
pub use retry::RetryPolicy;
pub use stats::{CommandStat, CommandStats, StatsTable};

use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::{Dispatch, OutputHandler, Protocol};
use crate::infra::config::ServerConfig;

/// User/password override for one handle.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Both halves present; pooled connections only switch identity then.
    pub fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One command to run. Built fresh per call.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Client options placed before the command, e.g. `-x <file>`.
    pub global_args: Vec<String>,
    pub command: String,
    pub args: Vec<String>,
    pub credentials: Option<Credentials>,
    pub stdin: Option<Vec<u8>>,
    pub protocol: Protocol,
}

impl Invocation {
    pub fn new<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Split `argv` into global options and the command. Leading arguments
    /// starting with `-` are global, along with the value of `-x`/`-c`/`-u`
    /// style options that take one.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> P4Result<Self> {
        const TAKES_VALUE: &[&str] = &["-x", "-c", "-C", "-d", "-H", "-p", "-P", "-u", "-z"];
        let argv: Vec<String> = argv.iter().map(|a| a.as_ref().to_string()).collect();
        let mut i = 0;
        while i < argv.len() && argv[i].starts_with('-') {
            i += if TAKES_VALUE.contains(&argv[i].as_str()) { 2 } else { 1 };
        }
        let Some(command) = argv.get(i) else {
            return Err(P4Error::parse(argv.join(" "), "a command name"));
        };
        Ok(Self {
            global_args: argv[..i].to_vec(),
            command: command.clone(),
            args: argv[i + 1..].to_vec(),
            ..Self::default()
        })
    }

    pub fn with_global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn tagged(mut self) -> Self {
        self.protocol = Protocol::Tagged;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self
            .global_args
            .iter()
            .chain(std::iter::once(&self.command))
            .chain(&self.args)
        {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// Owner of the launch seam, both connection pools and the stats table.
pub struct Executor {
    launcher: Arc<dyn Launcher>,
    tagged: ConnectionPool,
    plain: ConnectionPool,
    api_commands: HashSet<String>,
    retry: RetryPolicy,
    stats: CommandStats,
}

impl Executor {
    /// Executor backed by the real command-line client.
    pub fn new(server: &ServerConfig, retry: RetryPolicy) -> Self {
        let exe = server.exe_path();
        let launcher = Arc::new(ProcessLauncher::new(exe.clone(), &server.charset));
        let connector = Arc::new(ProcessConnector::new(exe, &server.charset));
        Self::with_backends(launcher, connector, server, retry)
    }

    /// Executor over arbitrary backends, e.g. an in-memory server.
    pub fn with_backends(
        launcher: Arc<dyn Launcher>,
        connector: Arc<dyn Connector>,
        server: &ServerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            launcher,
            tagged: ConnectionPool::new(Protocol::Tagged, connector.clone(), server.max_idle),
            plain: ConnectionPool::new(Protocol::Default, connector, server.max_idle),
            api_commands: server.api_commands.iter().cloned().collect(),
            retry,
            stats: CommandStats::new(),
        }
    }

    /// Whether `command` is served by a pooled connection.
    pub fn routes_to_pool(&self, command: &str) -> bool {
        self.api_commands.contains(command)
    }

    /// Process path: spawn, capture combined output, fail on non-zero exit.
    pub fn run_process(
        &self,
        inv: &Invocation,
        external: Option<&mut dyn Write>,
        cancel: &CancelToken,
    ) -> P4Result<String> {
        cancel.check(&inv.command)?;
        debug!(command = %inv.command, args = ?inv.args, "exec");

        let start = Instant::now();
        let mut mux = OutputMux::new(external);
        let report = self.launcher.launch(inv, &mut mux, cancel);
        self.stats.record(&inv.command, start.elapsed(), Duration::ZERO);

        let report = report?;
        let output = mux.into_string();
        if report.success {
            Ok(output)
        } else {
            warn!(command = %inv, status = %report.status, "command failed");
            Err(P4Error::Command {
                command: inv.to_string(),
                status: report.status,
                output,
            })
        }
    }

    /// Pooled path: stream output into `handler`, retrying on dropped
    /// connections. The handler's protocol selects the pool.
    pub fn run_callback(
        &self,
        inv: &Invocation,
        handler: &mut dyn OutputHandler,
        cancel: &CancelToken,
    ) -> P4Result<()> {
        let protocol = handler.protocol();
        let pool = match protocol {
            Protocol::Tagged => &self.tagged,
            Protocol::Default => &self.plain,
        };
        let mut inv = inv.clone();
        inv.protocol = protocol;
        if inv.stdin.is_none() {
            inv.stdin = handler.input();
        }
        debug!(command = %inv.command, args = ?inv.args, ?protocol, "exec pooled");

        let start = Instant::now();
        let mut dispatch = Dispatch::new(handler);
        let res = retry::run_with_retry(pool, &inv, &mut dispatch, &self.retry, cancel);
        let init = res.as_ref().copied().unwrap_or(Duration::ZERO);
        self.stats.record(&inv.command, start.elapsed(), init);

        res?;
        dispatch.finish()
    }

    pub fn stats(&self) -> StatsTable {
        self.stats.snapshot()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Idle connections currently held by the tagged and default pools.
    pub fn idle_connections(&self) -> (usize, usize) {
        (self.tagged.idle_count(), self.plain.idle_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_split_keeps_global_options() {
        let inv = Invocation::from_argv(&["-x", "/tmp/list", "have"]).unwrap();
        assert_eq!(inv.global_args, vec!["-x", "/tmp/list"]);
        assert_eq!(inv.command, "have");
        assert!(inv.args.is_empty());

        let inv = Invocation::from_argv(&["sync", "-f", "//depot/..."]).unwrap();
        assert!(inv.global_args.is_empty());
        assert_eq!(inv.args, vec!["-f", "//depot/..."]);
        assert_eq!(inv.to_string(), "sync -f //depot/...");
    }

    #[test]
    fn argv_without_command_is_rejected() {
        assert!(Invocation::from_argv(&["-x", "file"]).is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let c = Credentials::new("alice", "hunter2");
        assert!(!format!("{c:?}").contains("hunter2"));
        assert!(c.is_complete());
        assert!(!Credentials::new("alice", "").is_complete());
    }
}
