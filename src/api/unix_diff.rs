//! Server-side `diff`/`diff2`, parsed from classic unix diff headers.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{DiffChunk, DiffType};
use super::Perforce;
use crate::core::error::{P4Error, P4Result};

/// `L1[,L2]<op>R1[,R2]`, e.g. `2a3`, `4d3`, `12,20c12,20`.
static CHUNK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(,(\d+))?([^,\d])(\d+)(,(\d+))?").expect("diff chunk pattern"));

/// Chunk headers of a diff; the first line is the file header and is
/// skipped, as are the `<`/`>` content lines.
pub fn parse_diff_output(out: &str) -> P4Result<Vec<DiffChunk>> {
    let mut chunks = Vec::new();
    for line in out.split('\n').skip(1) {
        let line = line.trim();
        let Some(caps) = CHUNK_RE.captures(line) else {
            continue;
        };
        let num = |i: usize| -> u32 {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let (left_start, right_start) = (num(1), num(5));
        let diff_type = match &caps[4] {
            "a" => DiffType::Add,
            "c" => DiffType::Change,
            "d" => DiffType::Delete,
            op => return Err(P4Error::parse(line, format!("a, c or d diff operation, got {op}"))),
        };
        chunks.push(DiffChunk {
            left_start,
            left_end: num(3).max(left_start),
            right_start,
            right_end: num(7).max(right_start),
            diff_type,
        });
    }
    Ok(chunks)
}

impl Perforce {
    /// Workspace file against its depot revision.
    pub fn diff(&self, file0: &str, file1: &str) -> P4Result<Vec<DiffChunk>> {
        parse_diff_output(&self.exec_cmd(&["diff", file0, file1])?)
    }

    /// Two depot revisions.
    pub fn diff2(&self, file0: &str, file1: &str) -> P4Result<Vec<DiffChunk>> {
        parse_diff_output(&self.exec_cmd(&["diff2", file0, file1])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_become_chunks() {
        let out = "==== //depot/a.txt#1 (text) - //depot/a.txt#2 (text) ==== content\n2a3\n> new\n4d3\n< gone\n12,20c12,21\n";
        let chunks = parse_diff_output(out).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0],
            DiffChunk {
                left_start: 2,
                left_end: 2,
                right_start: 3,
                right_end: 3,
                diff_type: DiffType::Add,
            }
        );
        assert_eq!(chunks[1].diff_type, DiffType::Delete);
        assert_eq!((chunks[2].left_end, chunks[2].right_end), (20, 21));
    }

    #[test]
    fn unknown_operation_is_an_error() {
        assert!(parse_diff_output("header\n3x4\n").is_err());
    }

    #[test]
    fn header_line_is_never_a_chunk() {
        assert!(parse_diff_output("1a2\n").unwrap().is_empty());
    }
}
