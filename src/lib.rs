//! **p4kit** - Typed client library and CLI for a Perforce-style depot
//!
//! Commands run either as one-shot client processes or over pooled tagged
//! connections, with dropped connections retried transparently. Output is
//! classified into callbacks and bound onto typed records. A greedy Myers
//! line diff ships alongside for offline comparisons.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Subcommand handlers for the `p4k` binary
pub mod cli_ext {
    /// Server-backed subcommands (describe, fstat, key, grep, ...)
    pub mod depot_cmd;

    /// Offline subcommands (diff, client check)
    pub mod local_cmd;
}

/// Engine: errors, diff, output classification and command execution
pub mod core {
    /// Error taxonomy and server-text classification
    pub mod error;
    pub use error::{P4Error, P4Result};

    /// Greedy Myers line diff
    pub mod diff;
    pub use diff::{DiffLine, DiffTag, compute};

    /// Tagged output: callbacks, classification and record binding
    pub mod tagged;

    /// Process launch, connection pooling, retry and statistics
    pub mod exec;
    pub use exec::{CancelToken, Executor, Invocation, RetryPolicy};
}

/// Typed depot operations over an executor
pub mod api;

/// In-memory server implementing both execution seams
pub mod mock;

/// Infrastructure - configuration and logging
pub mod infra {
    /// Layered configuration with TOML support
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// tracing-subscriber setup for the binary
    pub mod logging;
}

// Strategic re-exports for library consumers
pub use api::{Client, Perforce, Settings};
pub use cli::{AppContext, Cli, Commands};
pub use core::{P4Error, P4Result};
pub use infra::{Config, load_config};
pub use mock::MockServer;
