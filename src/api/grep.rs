//! Content search, including the sharded search over trees larger than the
//! server's per-call file limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{debug, instrument, warn};

use super::types::{GrepMatch, Size};
use super::Perforce;
use crate::core::error::P4Result;

/// Progress and results of a [`Perforce::grep_large`] run. Counters are
/// updated as shards are dispatched; each finished shard sends its matches
/// on the channel returned by [`GrepStatus::new`].
#[derive(Debug)]
pub struct GrepStatus {
    pub files_checked: AtomicU64,
    pub bytes_checked: AtomicU64,
    pub total_files: AtomicU64,
    pub total_bytes: AtomicU64,
    results: Sender<Vec<GrepMatch>>,
}

impl GrepStatus {
    pub fn new() -> (Self, Receiver<Vec<GrepMatch>>) {
        let (tx, rx) = mpsc::channel();
        let status = Self {
            files_checked: AtomicU64::new(0),
            bytes_checked: AtomicU64::new(0),
            total_files: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            results: tx,
        };
        (status, rx)
    }

    /// `(files checked, total files)` so far.
    pub fn progress(&self) -> (u64, u64) {
        (
            self.files_checked.load(Ordering::Relaxed),
            self.total_files.load(Ordering::Relaxed),
        )
    }

    fn dispatched(&self, shard: &[Size]) {
        for s in shard {
            self.files_checked.fetch_add(s.file_count, Ordering::Relaxed);
            self.bytes_checked.fetch_add(s.file_size, Ordering::Relaxed);
        }
    }
}

/// Parse one `grep -n` line: `<depot path>#<rev>:<line>:<contents>`.
pub fn parse_grep_line(line: &str) -> Option<GrepMatch> {
    let (head, rest) = line.split_once(':')?;
    let (number, contents) = rest.split_once(':')?;
    let (depot_path, revision) = match head.rsplit_once('#') {
        Some((path, rev)) => (path, rev.parse().unwrap_or(0)),
        None => (head, 0),
    };
    Some(GrepMatch {
        depot_path: depot_path.to_string(),
        revision,
        line_number: number.parse().unwrap_or(0),
        contents: contents.to_string(),
    })
}

/// Group subtrees, smallest first, into shards whose file counts stay
/// within `ceiling`. Subtrees over the ceiling on their own are returned
/// separately for further splitting; empty ones are dropped.
pub fn plan_shards(mut sizes: Vec<Size>, ceiling: u64) -> (Vec<Vec<Size>>, Vec<Size>) {
    sizes.sort_by_key(|s| s.file_count);
    let mut shards = Vec::new();
    let mut oversized = Vec::new();
    let mut current: Vec<Size> = Vec::new();
    let mut count = 0u64;

    for size in sizes {
        if size.file_count > ceiling {
            oversized.push(size);
            continue;
        }
        if count + size.file_count > ceiling {
            if !current.is_empty() {
                shards.push(std::mem::take(&mut current));
            }
            count = 0;
        }
        if size.file_count > 0 {
            count += size.file_count;
            current.push(size);
        }
    }
    if !current.is_empty() {
        shards.push(current);
    }
    (shards, oversized)
}

impl Perforce {
    /// `grep -n -s -e <pattern> <paths>`. Subject to the server's per-call
    /// file limit; use [`grep_large`](Self::grep_large) for big trees.
    pub fn grep<S: AsRef<str>>(&self, pattern: &str, case_sensitive: bool, paths: &[S]) -> P4Result<Vec<GrepMatch>> {
        let mut args = vec!["grep".to_string()];
        if !case_sensitive {
            args.push("-i".into());
        }
        args.extend(["-n", "-s", "-e", pattern].map(String::from));
        args.extend(paths.iter().map(|p| p.as_ref().to_string()));
        let out = self.exec_cmd(&args)?;
        Ok(out.lines().filter_map(parse_grep_line).collect())
    }

    /// Search everything under `root`, splitting the tree into shards that
    /// each stay under the configured file ceiling and grepping the shards
    /// concurrently. Returns once every shard has finished; failed shards are
    /// logged and skipped.
    #[instrument(skip(self, status))]
    pub fn grep_large(&self, pattern: &str, root: &str, case_sensitive: bool, status: &GrepStatus) -> P4Result<()> {
        status.files_checked.store(0, Ordering::Relaxed);
        status.bytes_checked.store(0, Ordering::Relaxed);
        let tree = format!("{}/...", root.trim_end_matches('/'));
        let total = self.sizes(&[&tree])?;
        status.total_files.store(total.total_file_count, Ordering::Relaxed);
        status.total_bytes.store(total.total_file_size, Ordering::Relaxed);

        let mut res = Ok(());
        rayon::scope(|scope| {
            res = self.grep_chunk(scope, pattern, &tree, total.total_file_count, case_sensitive, status);
        });
        res
    }

    fn grep_chunk<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        pattern: &'s str,
        path: &str,
        file_count: u64,
        case_sensitive: bool,
        status: &'s GrepStatus,
    ) -> P4Result<()> {
        let ceiling = self.settings.grep_file_ceiling;
        let shards = if file_count <= ceiling {
            if file_count == 0 {
                return Ok(());
            }
            vec![vec![Size {
                depot_path: path.to_string(),
                file_count,
                file_size: 0,
            }]]
        } else if path.ends_with("/*") {
            // Flat files of one directory cannot be split further.
            warn!(path, file_count, ceiling, "directory over the grep ceiling skipped");
            return Ok(());
        } else {
            let mut children: Vec<String> = self
                .dirs(path)?
                .into_iter()
                .map(|d| format!("{d}/..."))
                .collect();
            if let Some(base) = path.strip_suffix("...") {
                if path.len() > 5 {
                    children.push(format!("{base}*"));
                }
            }
            if children.is_empty() {
                return Ok(());
            }
            let sizes = self.sizes(&children)?;
            let (shards, oversized) = plan_shards(sizes.sizes, ceiling);
            for big in oversized {
                scope.spawn(move |scope| {
                    let res = self.grep_chunk(scope, pattern, &big.depot_path, big.file_count, case_sensitive, status);
                    if let Err(e) = res {
                        warn!(path = %big.depot_path, "grep shard failed: {e}");
                    }
                });
            }
            shards
        };

        for shard in shards {
            status.dispatched(&shard);
            let paths: Vec<String> = shard.into_iter().map(|s| s.depot_path).collect();
            debug!(paths = paths.len(), "dispatching grep shard");
            scope.spawn(move |_| match self.grep(pattern, case_sensitive, &paths) {
                Ok(found) => {
                    let _ = status.results.send(found);
                }
                Err(e) => warn!(first = %paths[0], "grep shard failed: {e}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(path: &str, count: u64) -> Size {
        Size {
            depot_path: path.into(),
            file_count: count,
            file_size: count * 10,
        }
    }

    #[test]
    fn grep_line_parsed() {
        let m = parse_grep_line("//depot/src/a.rs#4:17:fn main() { x: 1 }").unwrap();
        assert_eq!(m.depot_path, "//depot/src/a.rs");
        assert_eq!(m.revision, 4);
        assert_eq!(m.line_number, 17);
        assert_eq!(m.contents, "fn main() { x: 1 }");
        assert!(parse_grep_line("no colons here").is_none());
    }

    #[test]
    fn shards_respect_ceiling() {
        let sizes = vec![
            size("//d/a/...", 6),
            size("//d/b/...", 0),
            size("//d/c/...", 25),
            size("//d/e/...", 4),
            size("//d/f/...", 5),
        ];
        let (shards, oversized) = plan_shards(sizes, 10);
        let names: Vec<Vec<&str>> = shards
            .iter()
            .map(|s| s.iter().map(|x| x.depot_path.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["//d/e/...", "//d/f/..."], vec!["//d/a/..."]]);
        assert_eq!(oversized[0].depot_path, "//d/c/...");
        for shard in &shards {
            assert!(shard.iter().map(|s| s.file_count).sum::<u64>() <= 10);
        }
    }
}
