//! Myers line diff.
//!
//! Common prefix and suffix are trimmed first; the shortest edit script for
//! the middle is found with the O((N+M)D) greedy search. When two scripts are
//! equally short the diagonal choice is fixed by a literal rule,
//! `k == -d || (k != d && v[k-1].x < v[k+1].x)`, which decides
//! whether the step taken is a deletion (`v[k+1]`) or an insertion
//! (`v[k-1]`). Changing it changes output for inputs with several minimal
//! scripts, so it must stay as written.

use std::fmt;

use owo_colors::OwoColorize;
use serde::Serialize;

/// Kind of a rendered diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    Equal,
    Insert,
    Delete,
}

impl DiffTag {
    /// Prefix character used in the textual script.
    pub fn symbol(self) -> char {
        match self {
            DiffTag::Equal => '=',
            DiffTag::Insert => '+',
            DiffTag::Delete => '-',
        }
    }
}

/// One line of an edit script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub text: String,
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.symbol(), self.text)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("Expected '{from}' to match '{to}'")]
    Mismatch { from: String, to: String },

    #[error("Unknown edit type '{0}'")]
    UnknownEdit(char),

    #[error("Failed to find minimal diff")]
    NoPath,
}

/// Diff two texts split on `\n`; an empty text has no lines. Returns the
/// script as `+`/`-`/`=` prefixed lines joined with `\n`.
pub fn compute(from: &str, to: &str) -> Result<String, DiffError> {
    let lines = diff_lines(&split_lines(from), &split_lines(to))?;
    Ok(lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Split text the way [`compute`] does.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Diff two line sequences into a tagged edit script.
pub fn diff_lines<S: AsRef<str>>(from: &[S], to: &[S]) -> Result<Vec<DiffLine>, DiffError> {
    let from: Vec<&str> = from.iter().map(AsRef::as_ref).collect();
    let to: Vec<&str> = to.iter().map(AsRef::as_ref).collect();

    let prefix = common_prefix(&from, &to);
    let suffix = common_suffix(&from[prefix..], &to[prefix..]);

    let mid_from = &from[prefix..from.len() - suffix];
    let mid_to = &to[prefix..to.len() - suffix];
    let edits = shortest_edit_script(mid_from, mid_to)?;
    let middle = build_lines(mid_from, mid_to, &edits)?;

    let mut out = Vec::with_capacity(prefix + middle.len() + suffix);
    out.extend(from[..prefix].iter().map(|l| equal(l)));
    out.extend(middle);
    out.extend(from[from.len() - suffix..].iter().map(|l| equal(l)));
    Ok(out)
}

fn equal(text: &str) -> DiffLine {
    DiffLine {
        tag: DiffTag::Equal,
        text: text.to_string(),
    }
}

/// Number of leading lines shared by both sequences.
pub fn common_prefix<S: PartialEq>(from: &[S], to: &[S]) -> usize {
    from.iter().zip(to).take_while(|(a, b)| a == b).count()
}

/// Number of trailing lines shared by both sequences.
pub fn common_suffix<S: PartialEq>(from: &[S], to: &[S]) -> usize {
    from.iter()
        .rev()
        .zip(to.iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
}

#[derive(Clone, Default)]
struct Frontier {
    x: usize,
    path: String,
}

/// Greedy Myers search. `x` walks `to` and `y` walks `from`; the result is a
/// string of `=`, `-` (take from `from`) and `+` (take from `to`).
fn shortest_edit_script(from: &[&str], to: &[&str]) -> Result<String, DiffError> {
    let m = from.len() as isize;
    let n = to.len() as isize;
    let max = m + n;
    if max == 0 {
        return Ok(String::new());
    }

    let mut v = vec![Frontier::default(); (2 * max + 1) as usize];
    let at = |k: isize| (k + max) as usize;

    for d in 0..=max {
        let mut k = -d;
        while k <= d {
            let (mut x, path) = if k == -d || (k != d && v[at(k - 1)].x < v[at(k + 1)].x) {
                let next = &v[at(k + 1)];
                (next.x, format!("{}-", next.path))
            } else {
                let prev = &v[at(k - 1)];
                (prev.x + 1, format!("{}+", prev.path))
            };
            let mut y = x as isize - k;

            let mut same = String::new();
            while (x as isize) < n && y < m && to[x] == from[y as usize] {
                x += 1;
                y += 1;
                same.push('=');
            }

            if x as isize >= n && y >= m {
                // The first step is taken from an unset diagonal.
                let trimmed = path.get(1..).unwrap_or_default();
                return Ok(format!("{trimmed}{same}"));
            }

            let slot = &mut v[at(k)];
            slot.x = x;
            slot.path = path + &same;
            k += 2;
        }
    }

    Err(DiffError::NoPath)
}

fn build_lines(from: &[&str], to: &[&str], edits: &str) -> Result<Vec<DiffLine>, DiffError> {
    let mut lines = Vec::with_capacity(edits.len());
    let (mut fi, mut ti) = (0, 0);

    for edit in edits.chars() {
        match edit {
            '=' => {
                if from[fi] != to[ti] {
                    return Err(DiffError::Mismatch {
                        from: from[fi].to_string(),
                        to: to[ti].to_string(),
                    });
                }
                lines.push(equal(from[fi]));
                fi += 1;
                ti += 1;
            }
            '-' => {
                lines.push(DiffLine {
                    tag: DiffTag::Delete,
                    text: from[fi].to_string(),
                });
                fi += 1;
            }
            '+' => {
                lines.push(DiffLine {
                    tag: DiffTag::Insert,
                    text: to[ti].to_string(),
                });
                ti += 1;
            }
            other => return Err(DiffError::UnknownEdit(other)),
        }
    }

    Ok(lines)
}

/// Render a script for a terminal, inserts green and deletes red.
pub fn render(lines: &[DiffLine], color: bool) -> String {
    let mut out = String::new();
    for line in lines {
        let text = line.to_string();
        let painted = match (color, line.tag) {
            (true, DiffTag::Insert) => text.green().to_string(),
            (true, DiffTag::Delete) => text.red().to_string(),
            (true, DiffTag::Equal) => text.dimmed().to_string(),
            (false, _) => text,
        };
        out.push_str(&painted);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_table() {
        let cases: &[(&[&str], &[&str], usize)] = &[
            (&[], &[], 0),
            (&["x"], &["x"], 1),
            (&["x"], &["y"], 0),
            (&["x", "x"], &["x", "x"], 2),
            (&["x", "x"], &["x", "y"], 1),
            (&["x", "x", "x"], &["x", "x"], 2),
            (&["x", "x", "x"], &["x", "y"], 1),
            (&["x", "x"], &["x", "x", "x"], 2),
            (&["x", "x"], &["x", "y", "x"], 1),
        ];
        for (a, b, want) in cases {
            assert_eq!(common_prefix(a, b), *want, "{a:?} : {b:?}");
        }
    }

    #[test]
    fn suffix_table() {
        let cases: &[(&[&str], &[&str], usize)] = &[
            (&[], &[], 0),
            (&["x"], &["x"], 1),
            (&["x"], &["y"], 0),
            (&["x", "x"], &["x", "x"], 2),
            (&["x", "x"], &["y", "x"], 1),
            (&["x", "x", "x"], &["x", "x"], 2),
            (&["x", "x", "x"], &["y", "x"], 1),
            (&["x", "x"], &["x", "x", "x"], 2),
            (&["x", "x"], &["y", "y", "x"], 1),
        ];
        for (a, b, want) in cases {
            assert_eq!(common_suffix(a, b), *want, "{a:?} : {b:?}");
        }
    }

    #[test]
    fn compute_table() {
        let cases = [
            ("hello", "hello", "=hello"),
            ("hello", "", "-hello"),
            ("", "hello", "+hello"),
            ("", "", ""),
            ("world", "hello\nworld", "+hello\n=world"),
            ("hello\nworld", "hi\nworld", "+hi\n-hello\n=world"),
            ("goodbye\ncruel\nworld", "hello\nworld", "+hello\n-goodbye\n-cruel\n=world"),
            ("1\n2\n3\n4\n5", "1\n2", "=1\n=2\n-3\n-4\n-5"),
            ("1\n2", "1\n2\n3\n4\n5", "=1\n=2\n+3\n+4\n+5"),
            (
                "1\n2\na\nb\nc\nd\ne\n3",
                "x\ny\na\nb\n1\nd\nz",
                "+x\n+y\n-1\n-2\n=a\n=b\n+1\n-c\n=d\n+z\n-e\n-3",
            ),
        ];
        for (from, to, want) in cases {
            assert_eq!(compute(from, to).unwrap(), want, "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn unknown_edit_is_rejected() {
        let err = build_lines(&["a"], &["a"], "=?").unwrap_err();
        assert_eq!(err, DiffError::UnknownEdit('?'));
    }

    #[test]
    fn mismatched_equal_is_rejected() {
        let err = build_lines(&["a"], &["b"], "=").unwrap_err();
        assert!(matches!(err, DiffError::Mismatch { .. }));
    }

    #[test]
    fn render_without_color_is_plain() {
        let lines = diff_lines(&["a", "b"], &["a", "c"]).unwrap();
        insta::assert_snapshot!(render(&lines, false).trim_end(), @r"
        =a
        +c
        -b
        ");
    }
}
