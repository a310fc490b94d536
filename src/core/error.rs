//! Error taxonomy for the depot client.
//!
//! Every server round-trip ends in either a typed result or one [`P4Error`].
//! Server wording that is turned into a typed error is matched in exactly one
//! place, [`SERVER_ERROR_TABLE`], and transport failures that mean "this
//! connection is gone" are listed in [`DROPPED_CONNECTION_PHRASES`]. Both are
//! brittle by construction: when the server changes its phrasing, update the
//! tables and nothing else.

use std::io;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::tagged::binder::BindError;

/// Result alias used across the library.
pub type P4Result<T> = std::result::Result<T, P4Error>;

/// Library error type.
#[derive(Debug, thiserror::Error)]
pub enum P4Error {
    /// The command-line client could not be started.
    #[error("failed to start `{exe}`: {source}")]
    Spawn {
        exe: String,
        #[source]
        source: io::Error,
    },

    /// A pooled connection could not be initialised.
    #[error("{0}")]
    ConnectionInit(String),

    /// Non-zero exit on the process path; `output` is everything captured.
    #[error("p4 {command} failed ({status}): {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    /// Error block reported through the callback path.
    #[error("p4 api error: {0}")]
    Api(String),

    /// Output did not have the shape we expected.
    #[error("unexpected output (expected {expected}): {line:?}")]
    Parse { line: String, expected: String },

    /// A tagged field could not be bound onto its record.
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("no matching files")]
    NotFound,

    #[error("p4 key not found")]
    KeyNotFound,

    /// Compare-and-swap observed a value other than the expected one.
    #[error("check-and-set mismatch, new value for {key} not set")]
    CasMismatch { key: String },

    /// A shelved file is older than what the workspace already has.
    #[error(
        "Change contains out of date files. You must either sync/resolve or revert them \
         before presubmit checks can run. ({path} is newer than CL: rev {have} vs CL {change_rev})"
    )]
    OutOfDate {
        path: String,
        have: u32,
        change_rev: u32,
    },

    #[error("invalid client spec: {0}")]
    InvalidClient(String),

    #[error("p4 {command}: connection dropped {attempts} times, giving up")]
    RetriesExhausted { command: String, attempts: u32 },

    #[error("p4 {command} cancelled")]
    Cancelled { command: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl P4Error {
    pub(crate) fn parse(line: impl Into<String>, expected: impl Into<String>) -> Self {
        P4Error::Parse {
            line: line.into(),
            expected: expected.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        P4Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Raw server text carried by this error, if any.
    pub fn server_text(&self) -> Option<&str> {
        match self {
            P4Error::Command { output, .. } => Some(output),
            P4Error::Api(msg) => Some(msg),
            _ => None,
        }
    }

    /// Whether the server reported that the target files do not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, P4Error::NotFound)
            || self
                .server_text()
                .is_some_and(|t| matches!(match_server_error(t), Some((ServerErrorKind::NotFound, _))))
    }

    /// Convert a server-reported error into its typed sentinel when its text
    /// matches [`SERVER_ERROR_TABLE`]. `key` scopes CAS matches to one key.
    pub fn classify(self, key: Option<&str>) -> Self {
        let Some(text) = self.server_text() else {
            return self;
        };
        match match_server_error(text) {
            Some((ServerErrorKind::NotFound, _)) => P4Error::NotFound,
            Some((ServerErrorKind::CasMismatch, Some(found))) => match key {
                Some(k) if k != found => self,
                _ => P4Error::CasMismatch { key: found },
            },
            _ => self,
        }
    }
}

/// Typed meaning of a recognised server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// `... - no such file(s).`
    NotFound,
    /// `New value for <key> not set.` from `key --from/--to`.
    CasMismatch,
}

/// One row of the server-text mapping.
#[derive(Debug, Clone, Copy)]
pub struct ServerErrorPattern {
    pub kind: ServerErrorKind,
    /// Regex; an optional `key` capture names the affected key.
    pub pattern: &'static str,
}

/// Server phrases converted into typed errors.
///
/// | kind          | server text                       |
/// |---------------|-----------------------------------|
/// | `NotFound`    | `<path> - no such file(s).`       |
/// | `CasMismatch` | `New value for <key> not set.`    |
pub const SERVER_ERROR_TABLE: &[ServerErrorPattern] = &[
    ServerErrorPattern {
        kind: ServerErrorKind::NotFound,
        pattern: r"no such file\(s\)\.",
    },
    ServerErrorPattern {
        kind: ServerErrorKind::CasMismatch,
        pattern: r"New value for (?P<key>\S+) not set\.",
    },
];

/// Phrases meaning the connection to the server was lost mid-command. A
/// connection whose output contains one of these reports itself dropped and
/// the command is retried on a fresh one.
pub const DROPPED_CONNECTION_PHRASES: &[&str] = &[
    "Partner exited unexpectedly",
    "TCP receive failed",
    "TCP send failed",
    "TCP receive exceeded maximum configured duration",
    "RpcTransport: partial message read",
    "Connection reset by peer",
    "Broken pipe",
];

static COMPILED_TABLE: LazyLock<Vec<(ServerErrorKind, Regex)>> = LazyLock::new(|| {
    SERVER_ERROR_TABLE
        .iter()
        .map(|row| {
            let re = Regex::new(row.pattern).expect("server error table pattern");
            (row.kind, re)
        })
        .collect()
});

/// Match server text against [`SERVER_ERROR_TABLE`], returning the first kind
/// that matches plus the captured key, if the pattern names one.
pub fn match_server_error(text: &str) -> Option<(ServerErrorKind, Option<String>)> {
    COMPILED_TABLE.iter().find_map(|(kind, re)| {
        re.captures(text).map(|caps| {
            let key = caps.name("key").map(|m| m.as_str().to_string());
            (*kind, key)
        })
    })
}

/// Whether server text reports a lost connection.
pub fn is_dropped_connection(text: &str) -> bool {
    DROPPED_CONNECTION_PHRASES.iter().any(|p| text.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_maps_not_found() {
        let text = "//depot/missing/... - no such file(s).\n";
        assert_eq!(match_server_error(text), Some((ServerErrorKind::NotFound, None)));
    }

    #[test]
    fn table_maps_cas_with_key() {
        let got = match_server_error("New value for last_cl not set.\n");
        assert_eq!(got, Some((ServerErrorKind::CasMismatch, Some("last_cl".to_string()))));
    }

    #[test]
    fn classify_ignores_cas_for_other_key() {
        let err = P4Error::Command {
            command: "key".into(),
            status: "exit status: 1".into(),
            output: "New value for other not set.".into(),
        };
        let err = err.classify(Some("mine"));
        assert!(matches!(err, P4Error::Command { .. }));
    }

    #[test]
    fn classify_converts_api_not_found() {
        let err = P4Error::Api("//x/y - no such file(s).".into()).classify(None);
        assert!(matches!(err, P4Error::NotFound));
        assert!(err.is_not_found());
    }

    #[test]
    fn dropped_phrases() {
        assert!(is_dropped_connection("RpcTransport: partial message read"));
        assert!(!is_dropped_connection("Change 12 created."));
    }
}
