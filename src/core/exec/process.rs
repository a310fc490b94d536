//! Process path: one child process per command.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use super::cancel::{CancelToken, POLL_INTERVAL};
use super::{Credentials, Invocation};
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::Protocol;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// How a launched command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub status: String,
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            status: status.to_string(),
        }
    }
}

/// Seam between the executor and whatever runs a command.
pub trait Launcher: Send + Sync {
    /// Run `inv`, writing its combined output to `out`.
    fn launch(&self, inv: &Invocation, out: &mut OutputMux<'_>, cancel: &CancelToken) -> P4Result<ExitReport>;
}

/// Collects output internally and mirrors it to an optional external sink.
pub struct OutputMux<'a> {
    internal: Vec<u8>,
    external: Option<&'a mut dyn Write>,
}

impl<'a> OutputMux<'a> {
    pub fn new(external: Option<&'a mut dyn Write>) -> Self {
        Self {
            internal: Vec::new(),
            external,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.internal
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.internal).into_owned()
    }
}

impl Write for OutputMux<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(ext) = self.external.as_mut() {
            ext.write_all(buf)?;
        }
        self.internal.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.external.as_mut() {
            Some(ext) => ext.flush(),
            None => Ok(()),
        }
    }
}

/// Client options common to every invocation: charset, identity, protocol.
pub fn client_args(charset: &str, credentials: Option<&Credentials>, protocol: Protocol) -> Vec<String> {
    let mut args = vec!["-C".to_string(), charset.to_string()];
    if let Some(c) = credentials {
        if !c.user.is_empty() {
            args.push("-u".into());
            args.push(c.user.clone());
        }
        if !c.password.is_empty() {
            args.push("-P".into());
            args.push(c.password.clone());
        }
    }
    if protocol == Protocol::Tagged {
        args.push("-ztag".into());
    }
    args
}

/// Build the full command line for `inv`.
pub(crate) fn command_for(exe: &Path, charset: &str, credentials: Option<&Credentials>, inv: &Invocation) -> Command {
    let mut cmd = Command::new(exe);
    cmd.args(client_args(charset, credentials, inv.protocol))
        .args(&inv.global_args)
        .arg(&inv.command)
        .args(&inv.args);
    cmd
}

/// Runs the command-line client as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
    charset: String,
}

impl ProcessLauncher {
    pub fn new(exe: PathBuf, charset: &str) -> Self {
        Self {
            exe,
            charset: charset.to_string(),
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, inv: &Invocation, out: &mut OutputMux<'_>, cancel: &CancelToken) -> P4Result<ExitReport> {
        let cmd = command_for(&self.exe, &self.charset, inv.credentials.as_ref(), inv);
        let status = run_child(cmd, inv.stdin.as_deref(), cancel, &inv.command, |_, chunk| {
            out.write_all(chunk)
        })?;
        Ok(status.into())
    }
}

fn spawn_reader<R>(mut pipe: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn `cmd`, feed it `stdin`, and hand every output chunk to `on_chunk`
/// in arrival order. The child is killed if `cancel` fires.
pub(crate) fn run_child<F>(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    cancel: &CancelToken,
    command: &str,
    mut on_chunk: F,
) -> P4Result<ExitStatus>
where
    F: FnMut(Stream, &[u8]) -> io::Result<()>,
{
    let exe = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|source| P4Error::Spawn { exe, source })?;

    let (tx, rx) = mpsc::channel();
    let mut workers = Vec::new();
    if let Some(out) = child.stdout.take() {
        workers.push(spawn_reader(out, Stream::Stdout, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        workers.push(spawn_reader(err, Stream::Stderr, tx.clone()));
    }
    drop(tx);
    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let data = data.to_vec();
        workers.push(thread::spawn(move || {
            let _ = pipe.write_all(&data);
        }));
    }

    let mut failure = None;
    loop {
        if cancel.is_cancelled() {
            failure = Some(P4Error::Cancelled {
                command: command.to_string(),
            });
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((stream, chunk)) => {
                if let Err(e) = on_chunk(stream, &chunk) {
                    failure = Some(P4Error::io(format!("forwarding output of p4 {command}"), e));
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(err) = failure {
        let _ = child.kill();
        let _ = child.wait();
        return Err(err);
    }
    for worker in workers {
        let _ = worker.join();
    }
    child
        .wait()
        .map_err(|e| P4Error::io(format!("waiting for p4 {command}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_mirrors_to_external_sink() {
        let mut sink: Vec<u8> = Vec::new();
        {
            let ext: &mut dyn Write = &mut sink;
            let mut mux = OutputMux::new(Some(ext));
            mux.write_all(b"line one\n").unwrap();
            mux.write_all(b"line two\n").unwrap();
            assert_eq!(mux.into_string(), "line one\nline two\n");
        }
        assert_eq!(sink, b"line one\nline two\n");
    }

    #[test]
    fn client_args_only_add_set_credentials() {
        let creds = Credentials::new("alice", "");
        let args = client_args("utf8", Some(&creds), Protocol::Tagged);
        assert_eq!(args, vec!["-C", "utf8", "-u", "alice", "-ztag"]);
        assert_eq!(client_args("utf8", None, Protocol::Default), vec!["-C", "utf8"]);
    }

    #[cfg(unix)]
    #[test]
    fn run_child_pipes_stdin_through() {
        let mut collected = Vec::new();
        let status = run_child(Command::new("cat"), Some(b"hello"), &CancelToken::new(), "cat", |s, chunk| {
            assert_eq!(s, Stream::Stdout);
            collected.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert!(status.success());
        assert_eq!(collected, b"hello");
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let cmd = Command::new("/definitely/not/a/p4");
        let err = run_child(cmd, None, &CancelToken::new(), "info", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, P4Error::Spawn { .. }));
    }
}
