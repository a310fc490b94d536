//! In-memory depot server.
//!
//! [`MockServer`] implements both execution seams, [`Launcher`] for the
//! process path and [`Connector`] for pooled connections, over one shared
//! depot. A [`Perforce`] handle built with [`MockServer::perforce`] runs every
//! typed operation against it exactly as it would against the command-line
//! client: the server renders the client's textual output (tagged or plain)
//! and the library parses it back.
//!
//! The depot lives under `//depot/...` and maps one-to-one onto the
//! workspace `//alice-ws/...` rooted at [`MockServer::root`].
//!
//! ```
//! use p4kit::mock::MockServer;
//!
//! let server = MockServer::new();
//! server.add_file("//depot/readme.txt", "hello\n");
//! let p4 = server.perforce();
//! let files = p4.print_ex(&["//depot/readme.txt"]).unwrap();
//! assert_eq!(files[0].content, b"hello\n");
//! ```

mod commands;
mod state;

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::api::{Perforce, Settings};
use crate::core::error::{P4Error, P4Result};
use crate::core::exec::{
    CancelToken, Connection, Connector, Credentials, ExitReport, Executor, Invocation, Launcher, OutputMux,
    RetryPolicy,
};
use crate::core::tagged::{Dispatch, Protocol, Record, classify};
use crate::infra::config::ServerConfig;

use state::{Request, State};

pub const MOCK_USER: &str = "alice";
pub const MOCK_CLIENT: &str = "alice-ws";
pub const MOCK_HOST: &str = "mockhost";
pub const MOCK_ADDRESS: &str = "mock:1666";
pub const MOCK_ROOT: &str = "/ws";

/// Transport error reported by a simulated drop.
pub const DROP_ERROR: &str = "TCP receive failed";

/// One command as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Effective user: the credential override, else the session user.
    pub user: String,
    /// Command line without client options, e.g. `fstat //depot/a.txt`.
    pub line: String,
    /// Served by a pooled connection rather than a launched process.
    pub pooled: bool,
}

impl Call {
    pub fn command(&self) -> &str {
        self.line.split(' ').next().unwrap_or_default()
    }
}

/// Shared handle to one in-memory server. Clones see the same depot.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// Empty depot with the workspace rooted at [`MOCK_ROOT`].
    pub fn new() -> Self {
        Self::with_root(MOCK_ROOT)
    }

    /// Empty depot with the workspace rooted at `root`, e.g. a temporary
    /// directory whose files `add` should pick up from disk.
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(root.into()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle with default settings and immediate retries.
    pub fn perforce(&self) -> Perforce {
        self.perforce_with(Settings::default())
    }

    pub fn perforce_with(&self, settings: Settings) -> Perforce {
        let exec = self.executor(&ServerConfig::default(), RetryPolicy::immediate(5));
        Perforce::with_executor(Arc::new(exec), settings)
    }

    /// Executor routing through this server with the given pooling and retry
    /// configuration.
    pub fn executor(&self, server: &ServerConfig, retry: RetryPolicy) -> Executor {
        Executor::with_backends(Arc::new(self.clone()), Arc::new(self.clone()), server, retry)
    }

    pub fn root(&self) -> String {
        self.lock().root.clone()
    }

    /// Submit `content` as the next revision of `path` and sync it into the
    /// workspace. Returns the new revision number.
    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) -> u32 {
        self.lock().seed(path, content.into(), true)
    }

    /// Submit a revision from another workspace: the head moves, the local
    /// have-list does not.
    pub fn submit_remote(&self, path: &str, content: impl Into<Vec<u8>>) -> u32 {
        self.lock().seed(path, content.into(), false)
    }

    /// Overwrite the workspace copy of a depot file.
    pub fn write_workspace(&self, path: &str, content: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let depot = state.to_depot(path);
        state.workspace.insert(depot, content.into());
    }

    pub fn workspace(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state.workspace.get(&state.to_depot(path)).cloned()
    }

    /// Head revision number of `path`, deleted heads included.
    pub fn head_rev(&self, path: &str) -> Option<u32> {
        self.lock().head(path).map(|(rev, _)| rev)
    }

    pub fn have_rev(&self, path: &str) -> Option<u32> {
        self.lock().have.get(path).copied()
    }

    /// `(changelist, action)` of an opened file.
    pub fn opened(&self, path: &str) -> Option<(u32, String)> {
        self.lock().opened.get(path).map(|o| (o.cl, o.action.clone()))
    }

    /// `pending` or `submitted`.
    pub fn change_status(&self, cl: u32) -> Option<String> {
        self.lock().changes.get(&cl).map(|c| c.status.clone())
    }

    pub fn set_key(&self, key: &str, value: &str) {
        self.lock().keys.insert(key.to_string(), value.to_string());
    }

    pub fn key(&self, key: &str) -> Option<String> {
        self.lock().keys.get(key).cloned()
    }

    /// Files whose path ends in `suffix` are reported by `ignores`.
    pub fn ignore(&self, suffix: &str) {
        self.lock().ignored.push(suffix.to_string());
    }

    pub fn add_user(&self, user: &str, full_name: &str) {
        self.lock().users.insert(user.to_string(), full_name.to_string());
    }

    /// Words stored in index `name`/`attrib`.
    pub fn index_words(&self, name: &str, attrib: u32) -> Vec<String> {
        self.lock()
            .indexes
            .get(&(name.to_string(), attrib))
            .map(|words| words.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Value recorded by `set`.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.lock().settings.get(key).cloned()
    }

    /// The next `n` pooled commands lose their connection mid-output.
    pub fn drop_next(&self, n: u32) {
        self.lock().drops = n;
    }

    /// Files one `grep` call may search; more fails the call.
    pub fn set_grep_limit(&self, limit: u64) {
        self.lock().grep_limit = Some(limit);
    }

    /// File counts searched by each `grep` call, in call order.
    pub fn grep_file_counts(&self) -> Vec<u64> {
        self.lock().grep_counts.clone()
    }

    pub fn history(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Names of every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|c| c.command().to_string())
            .collect()
    }

    pub fn clear_history(&self) {
        self.lock().calls.clear();
    }
}

fn exit_report(ok: bool) -> ExitReport {
    ExitReport {
        success: ok,
        status: if ok { "exit status: 0" } else { "exit status: 1" }.to_string(),
    }
}

impl Launcher for MockServer {
    fn launch(&self, inv: &Invocation, out: &mut OutputMux<'_>, cancel: &CancelToken) -> P4Result<ExitReport> {
        cancel.check(&inv.command)?;
        let tagged = inv.protocol == Protocol::Tagged || inv.global_args.iter().any(|a| a == "-ztag");
        let req = Request::from_invocation(inv, inv.credentials.as_ref(), tagged)?;
        let reply = self.lock().handle(&req, false);
        out.write_all(reply.out.as_bytes())
            .and_then(|()| out.write_all(reply.err.as_bytes()))
            .map_err(|e| P4Error::io(format!("writing output of p4 {}", inv.command), e))?;
        Ok(exit_report(reply.ok))
    }
}

impl Connector for MockServer {
    fn connect(&self, protocol: Protocol) -> P4Result<Box<dyn Connection>> {
        debug!(?protocol, "mock connection opened");
        Ok(Box::new(MockConnection {
            server: self.clone(),
            protocol,
            credentials: None,
            dropped: false,
        }))
    }
}

/// Pooled session against a [`MockServer`].
struct MockConnection {
    server: MockServer,
    protocol: Protocol,
    credentials: Option<Credentials>,
    dropped: bool,
}

impl MockConnection {
    /// Emit some output, then fail the transport.
    fn drop_midway(&mut self, dispatch: &mut Dispatch<'_>) {
        match self.protocol {
            Protocol::Tagged => {
                let mut partial = Record::new();
                partial.insert("partial".into(), "1".into());
                dispatch.stat(&partial);
            }
            Protocol::Default => dispatch.info(0, "partial"),
        }
        self.dropped = true;
        dispatch.handle_error(DROP_ERROR);
    }
}

impl Connection for MockConnection {
    fn run(&mut self, inv: &Invocation, dispatch: &mut Dispatch<'_>, cancel: &CancelToken) -> P4Result<()> {
        cancel.check(&inv.command)?;
        self.dropped = false;
        let req = Request::from_invocation(inv, self.credentials.as_ref(), self.protocol == Protocol::Tagged)?;

        let mut state = self.server.lock();
        if state.drops > 0 {
            state.drops -= 1;
            state.log(&req, true);
            drop(state);
            self.drop_midway(dispatch);
            return Ok(());
        }
        let reply = state.handle(&req, true);
        drop(state);

        classify::feed(&reply.out, self.protocol, inv.command == "print", dispatch);
        for line in reply.err.lines().map(str::trim).filter(|l| !l.is_empty()) {
            dispatch.handle_error(line);
        }
        if !reply.ok && reply.err.trim().is_empty() {
            dispatch.handle_error(&format!("p4 {} failed", inv.command));
        }
        Ok(())
    }

    fn dropped(&self) -> bool {
        self.dropped
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }

    fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    fn finalize(&mut self) -> Option<String> {
        self.dropped.then(|| DROP_ERROR.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_and_pooled_paths_share_one_depot() {
        let server = MockServer::new();
        server.add_file("//depot/a.txt", "one\n");
        let p4 = server.perforce();

        let raw = p4.exec_cmd(&["sizes", "-s", "//depot/..."]).unwrap();
        assert_eq!(raw.trim(), "//depot/... 1 files 4 bytes");
        let files = p4.files(&["//depot/..."]).unwrap();
        assert_eq!(files[0].depot_file, "//depot/a.txt");

        let history = server.history();
        assert!(!history[0].pooled);
        assert!(history[1].pooled);
        assert_eq!(history[1].command(), "files");
    }

    #[test]
    fn dropped_connection_is_retried_cleanly() {
        let server = MockServer::new();
        server.add_file("//depot/a.txt", "one\n");
        server.drop_next(2);
        let p4 = server.perforce();

        let stat = p4.fstat(&["//depot/a.txt"]).unwrap();
        assert_eq!(stat.file_stats.len(), 1);
        assert_eq!(stat.file_stats[0].head_rev, 1);
        assert_eq!(server.commands(), vec!["fstat", "fstat", "fstat"]);
    }

    #[test]
    fn unknown_command_fails_on_process_path() {
        let p4 = MockServer::new().perforce();
        let err = p4.exec_cmd(&["frobnicate"]).unwrap_err();
        assert!(err.server_text().unwrap().contains("Unknown command."));
    }

    #[test]
    fn credential_override_reaches_the_server() {
        let server = MockServer::new();
        let p4 = server.perforce().for_user("bob", "secret");
        p4.key_set("k", "v").unwrap();
        p4.info().unwrap();
        let history = server.history();
        assert_eq!(history[0].user, "bob");
        assert_eq!(history[1].user, "bob");
        assert_eq!(p4.info().unwrap().user, "bob");
    }
}
