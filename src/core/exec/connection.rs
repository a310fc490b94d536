//! Pooled connections.
//!
//! A [`Connection`] is a reusable session that runs one command at a time
//! and streams its output into a [`Dispatch`]. The [`ProcessConnector`]
//! backs each session with the command-line client, so reuse saves only the
//! pool bookkeeping; an in-process server can implement the same traits.

use std::path::{Path, PathBuf};

use super::cancel::CancelToken;
use super::process::{Stream, command_for, run_child};
use super::{Credentials, Invocation};
use crate::core::error::{P4Error, P4Result, is_dropped_connection};
use crate::core::tagged::classify;
use crate::core::tagged::{Dispatch, Protocol};

/// A live session with the server.
pub trait Connection: Send {
    /// Run one command, reporting output and errors through `dispatch`.
    fn run(&mut self, inv: &Invocation, dispatch: &mut Dispatch<'_>, cancel: &CancelToken) -> P4Result<()>;

    /// Whether the transport failed during the last command.
    fn dropped(&self) -> bool;

    fn credentials(&self) -> Option<Credentials>;

    fn set_credentials(&mut self, credentials: Option<Credentials>);

    /// Tear down after a drop and return the transport error text.
    fn finalize(&mut self) -> Option<String>;
}

/// Factory for fresh connections.
pub trait Connector: Send + Sync {
    fn connect(&self, protocol: Protocol) -> P4Result<Box<dyn Connection>>;
}

/// Opens sessions backed by the command-line client.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    exe: PathBuf,
    charset: String,
}

impl ProcessConnector {
    pub fn new(exe: PathBuf, charset: &str) -> Self {
        Self {
            exe,
            charset: charset.to_string(),
        }
    }
}

fn is_explicit_path(exe: &Path) -> bool {
    exe.components().count() > 1
}

impl Connector for ProcessConnector {
    fn connect(&self, protocol: Protocol) -> P4Result<Box<dyn Connection>> {
        if is_explicit_path(&self.exe) && !self.exe.exists() {
            return Err(P4Error::ConnectionInit(format!(
                "error initializing client: {} does not exist",
                self.exe.display()
            )));
        }
        Ok(Box::new(ProcessConnection {
            exe: self.exe.clone(),
            charset: self.charset.clone(),
            protocol,
            credentials: None,
            dropped: false,
            transport_error: None,
        }))
    }
}

/// Session that spawns the client per command and classifies its output.
#[derive(Debug)]
pub struct ProcessConnection {
    exe: PathBuf,
    charset: String,
    protocol: Protocol,
    credentials: Option<Credentials>,
    dropped: bool,
    transport_error: Option<String>,
}

impl Connection for ProcessConnection {
    fn run(&mut self, inv: &Invocation, dispatch: &mut Dispatch<'_>, cancel: &CancelToken) -> P4Result<()> {
        let mut inv = inv.clone();
        inv.protocol = self.protocol;
        let cmd = command_for(&self.exe, &self.charset, self.credentials.as_ref(), &inv);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run_child(cmd, inv.stdin.as_deref(), cancel, &inv.command, |stream, chunk| {
            match stream {
                Stream::Stdout => stdout.extend_from_slice(chunk),
                Stream::Stderr => stderr.extend_from_slice(chunk),
            }
            Ok(())
        })?;

        let out = String::from_utf8_lossy(&stdout);
        let err = String::from_utf8_lossy(&stderr);
        if is_dropped_connection(&err) {
            self.dropped = true;
            self.transport_error = Some(err.trim().to_string());
        }

        classify::feed(&out, self.protocol, inv.command == "print", dispatch);
        for line in err.lines().map(str::trim).filter(|l| !l.is_empty()) {
            dispatch.handle_error(line);
        }
        if !status.success() && err.trim().is_empty() {
            dispatch.handle_error(&format!("p4 {} exited with {status}", inv.command));
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
        self.transport_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_executable_fails_init() {
        let connector = ProcessConnector::new(PathBuf::from("/no/such/dir/p4"), "utf8");
        let err = connector.connect(Protocol::Tagged).err().unwrap();
        assert!(err.to_string().starts_with("error initializing client:"));
    }

    #[test]
    fn bare_name_defers_to_path_lookup() {
        let connector = ProcessConnector::new(PathBuf::from("p4"), "utf8");
        let conn = connector.connect(Protocol::Default).unwrap();
        assert!(!conn.dropped());
        assert!(conn.credentials().is_none());
    }
}
