//! Shared test utilities for integration tests
//!
//! Provides a seeded in-memory depot and a `p4k` command builder
//! used across multiple test files.

#![allow(dead_code)]

use assert_cmd::Command;
use assert_fs::prelude::*;
use p4kit::mock::MockServer;

/// `p4k` with colour and logging pinned so output is stable.
pub fn p4k() -> Command
{
    let mut cmd = Command::cargo_bin("p4k").expect("binary built");
    cmd.env("NO_COLOR", "1")
        .env_remove("P4KIT_LOG");
    cmd
}

/// A depot with a small source tree:
///
/// ```text
/// //depot/readme.txt
/// //depot/src/main.rs
/// //depot/src/lib.rs
/// //depot/docs/guide.md
/// ```
pub fn seeded_server() -> MockServer
{
    let server = MockServer::new();
    server.add_file("//depot/readme.txt", "hello depot\n");
    server.add_file("//depot/src/main.rs", "fn main() {\n    run();\n}\n");
    server.add_file("//depot/src/lib.rs", "pub fn run() {}\n");
    server.add_file("//depot/docs/guide.md", "# Guide\n\nrun the tool\n");
    server
}

/// Temporary directory holding `files` as `(relative path, content)`.
pub fn temp_tree(files: &[(&str, &str)]) -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    for (path, content) in files
    {
        tmp.child(path)
            .write_str(content)
            .expect("write");
    }
    tmp
}
