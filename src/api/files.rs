//! Workspace file commands: open for add/edit/delete, sync, have, opened,
//! sizes and dirs.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::{ActionType, FileType, OpenedFile, Size, SizeCollection, SyncSize, SyncedFile};
use super::Perforce;
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::OutputHandler;

/// Combined length of file arguments passed to one `add` by [`Perforce::add_dir`].
const ADD_DIR_ARG_BUDGET: usize = 4000;

/// `<depot path>#<rev> - <local path>`
static HAVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)#(\d+) - (.+)").expect("have pattern"));

/// `//depot/a.txt#3 - edit change 12 (text)`
static OPENED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(//[^#]+)#[0-9]+ - (\S+) (\S+) (\S+) \((\S+)\)").expect("opened pattern")
});

/// `Server network estimates: files added/updated/deleted=1/2/3, bytes added/updated=4/5`
static SYNC_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=(\d+)/(\d+)/(\d+), .+=(\d+)/(\d+)").expect("sync size pattern"));

/// Best-effort parse of `have` output. Anything that is not a synced file
/// (not on client, no such file, ...) is skipped.
pub fn parse_have(out: &str) -> P4Result<Vec<SyncedFile>> {
    let input = out.replace('\r', "");
    let mut files = Vec::new();
    for line in input.lines() {
        let Some(caps) = HAVE_RE.captures(line) else {
            continue;
        };
        let revision = caps[2]
            .parse()
            .map_err(|_| P4Error::parse(line, "revision number"))?;
        let local = std::path::absolute(&caps[3])
            .map_err(|e| P4Error::io(format!("resolving {}", &caps[3]), e))?;
        files.push(SyncedFile {
            depot_path: caps[1].to_string(),
            local_path: local.to_string_lossy().into_owned(),
            revision,
        });
    }
    Ok(files)
}

pub fn parse_opened(out: &str) -> P4Result<Vec<OpenedFile>> {
    let mut files = Vec::new();
    for line in out.lines() {
        let Some(caps) = OPENED_RE.captures(line) else {
            continue;
        };
        let status: ActionType = caps[2]
            .parse()
            .map_err(|_| P4Error::parse(line, "a known action"))?;
        let cl = match &caps[3] {
            "change" => caps[4]
                .parse()
                .map_err(|_| P4Error::parse(line, "changelist number"))?,
            "default" => 0,
            _ => return Err(P4Error::parse(line, "`change N` or `default change`")),
        };
        files.push(OpenedFile {
            path: caps[1].to_string(),
            status,
            cl,
            file_type: caps[5].parse::<FileType>().ok(),
        });
    }
    Ok(files)
}

/// Parse `sizes -s` lines: `<path> <count> files <bytes> bytes`. Lines with
/// too few words are skipped; a malformed count is an error.
pub fn parse_sizes(out: &str) -> P4Result<SizeCollection> {
    let mut sc = SizeCollection::default();
    for line in out.lines() {
        let words: Vec<&str> = line.split(' ').collect();
        if words.len() < 5 {
            continue;
        }
        let count = words[words.len() - 4]
            .parse::<u64>()
            .map_err(|_| P4Error::parse(line, "<path> <count> files <bytes> bytes"))?;
        let bytes = words[words.len() - 2]
            .parse::<u64>()
            .map_err(|_| P4Error::parse(line, "<path> <count> files <bytes> bytes"))?;
        sc.total_file_count += count;
        sc.total_file_size += bytes;
        sc.sizes.push(Size {
            depot_path: words[0].to_string(),
            file_count: count,
            file_size: bytes,
        });
    }
    Ok(sc)
}

pub fn parse_sync_size(out: &str) -> P4Result<SyncSize> {
    let line = out.trim();
    let caps = SYNC_SIZE_RE
        .captures(line)
        .ok_or_else(|| P4Error::parse(line, "sync -N estimate"))?;
    let n = |i: usize| caps[i].parse::<i64>().unwrap_or_default();
    Ok(SyncSize {
        files_added: n(1),
        files_updated: n(2),
        files_deleted: n(3),
        bytes_added: n(4),
        bytes_deleted: n(5),
    })
}

/// Collects info lines, one per directory.
#[derive(Default)]
struct DirList {
    dirs: Vec<String>,
}

impl OutputHandler for DirList {
    fn output_info(&mut self, _level: u8, info: &str) -> P4Result<()> {
        self.dirs.push(info.to_string());
        Ok(())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.dirs.clear();
    }
}

/// `-c <cl>` when `cl` names a numbered changelist.
fn change_flag(cl: u32) -> Vec<String> {
    if cl == 0 {
        Vec::new()
    } else {
        vec!["-c".to_string(), cl.to_string()]
    }
}

impl Perforce {
    /// Run `<command> <flags> <paths>` in slices of `paths_per_call` paths,
    /// concatenating the output.
    fn run_chunked<S: AsRef<str>>(&self, command: &str, flags: &[String], paths: &[S]) -> P4Result<String> {
        let mut out = String::new();
        if paths.is_empty() {
            return Ok(out);
        }
        for chunk in paths.chunks(self.settings.paths_per_call) {
            let mut args = vec![command.to_string()];
            args.extend(flags.iter().cloned());
            args.extend(chunk.iter().map(|p| p.as_ref().to_string()));
            out.push_str(&self.exec_cmd(&args)?);
        }
        Ok(out)
    }

    pub fn add<S: AsRef<str>>(&self, paths: &[S], options: &[&str]) -> P4Result<String> {
        let flags: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        self.run_chunked("add", &flags, paths)
    }

    /// Open every file under `dir` for add, recursing into subdirectories and
    /// skipping files the workspace ignores.
    pub fn add_dir(&self, dir: &Path, options: &[&str]) -> P4Result<String> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| P4Error::io(format!("reading {}", dir.display()), e))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        let mut files = Vec::new();
        for entry in entries {
            if entry.is_dir() {
                self.add_dir(&entry, options)?;
            } else if entry.is_file() {
                files.push(entry.to_string_lossy().into_owned());
            }
        }

        let mut out = String::new();
        let mut batch: Vec<String> = Vec::new();
        let mut total = 0;
        for file in files {
            if total + file.len() > ADD_DIR_ARG_BUDGET && !batch.is_empty() {
                out.push_str(&self.add(&batch, options)?);
                batch.clear();
                total = 0;
            }
            if !self.ignores(&[&file])?.trim().is_empty() {
                debug!(file = %file, "ignored, not adding");
                continue;
            }
            total += file.len();
            batch.push(file);
        }
        if !batch.is_empty() {
            out.push_str(&self.add(&batch, options)?);
        }
        Ok(out)
    }

    /// Non-empty output names the paths the workspace ignores.
    pub fn ignores<S: AsRef<str>>(&self, paths: &[S]) -> P4Result<String> {
        let mut args = vec!["ignores".to_string(), "-i".into()];
        args.extend(paths.iter().map(|p| p.as_ref().to_string()));
        self.exec_cmd(&args)
    }

    pub fn edit<S: AsRef<str>>(&self, paths: &[S], cl: u32) -> P4Result<String> {
        self.run_chunked("edit", &change_flag(cl), paths)
    }

    pub fn delete<S: AsRef<str>>(&self, paths: &[S], cl: u32) -> P4Result<String> {
        self.run_chunked("delete", &change_flag(cl), paths)
    }

    pub fn reconcile<S: AsRef<str>>(&self, paths: &[S], cl: u32) -> P4Result<String> {
        self.run_chunked("reconcile", &change_flag(cl), paths)
    }

    pub fn revert<S: AsRef<str>>(&self, paths: &[S], options: &[&str]) -> P4Result<String> {
        let flags: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        self.run_chunked("revert", &flags, paths)
    }

    /// Move `from` to `to` inside `cl`; returns the new depot path, read
    /// from `<to>#<rev> - moved from <from>#<rev>`.
    pub fn move_file(&self, cl: u32, from: &str, to: &str) -> P4Result<String> {
        let out = self.exec_cmd(&["move", "-c", &cl.to_string(), from, to])?;
        out.lines()
            .next()
            .filter(|l| l.contains(" - moved from "))
            .and_then(|l| l.split(' ').next())
            .map(|w| w.split('#').next().unwrap_or(w).to_string())
            .ok_or_else(|| P4Error::parse(out.trim(), format!("couldn't move files from {from} to {to}")))
    }

    pub fn sync<S: AsRef<str>>(&self, targets: &[S], options: &[&str]) -> P4Result<String> {
        let mut args = vec!["sync".to_string()];
        args.extend(options.iter().map(|o| o.to_string()));
        args.extend(targets.iter().map(|t| t.as_ref().to_string()));
        self.exec_cmd(&args)
    }

    /// `sync -N` estimate; no targets means the whole depot.
    pub fn sync_size<S: AsRef<str>>(&self, targets: &[S]) -> P4Result<SyncSize> {
        let mut args = vec!["sync".to_string(), "-N".into()];
        if targets.is_empty() {
            args.push("//...".into());
        }
        args.extend(targets.iter().map(|t| t.as_ref().to_string()));
        parse_sync_size(&self.exec_cmd(&args)?)
    }

    /// Opened files, optionally limited to one changelist (`"default"` or a
    /// number).
    pub fn opened(&self, change: Option<&str>) -> P4Result<Vec<OpenedFile>> {
        let mut args = vec!["opened"];
        if let Some(c) = change {
            args.extend(["-c", c]);
        }
        parse_opened(&self.exec_cmd(&args)?)
    }

    /// Synced revision of every file matching `patterns`. The patterns go
    /// through an argument file so long lists stay within command-line
    /// limits.
    pub fn have<S: AsRef<str>>(&self, patterns: &[S]) -> P4Result<Vec<SyncedFile>> {
        let mut file = tempfile::Builder::new()
            .prefix("have_invocation")
            .tempfile()
            .map_err(|e| P4Error::io("creating have argument file", e))?;
        for pattern in patterns {
            writeln!(file, "{}", pattern.as_ref()).map_err(|e| P4Error::io("writing have argument file", e))?;
        }
        file.flush()
            .map_err(|e| P4Error::io("writing have argument file", e))?;
        let path = file.path().to_string_lossy().into_owned();
        let out = self.exec_cmd(&["-x", path.as_str(), "have"])?;
        parse_have(&out)
    }

    /// `sizes -s` totals per path.
    pub fn sizes<S: AsRef<str>>(&self, paths: &[S]) -> P4Result<SizeCollection> {
        let mut args = vec!["sizes".to_string(), "-s".into()];
        args.extend(paths.iter().map(|p| p.as_ref().to_string()));
        parse_sizes(&self.exec_cmd(&args)?)
    }

    /// Immediate subdirectories of `root`. A trailing `...` is treated as `*`.
    pub fn dirs(&self, root: &str) -> P4Result<Vec<String>> {
        let root = match root.strip_suffix("...") {
            Some(base) => format!("{base}*"),
            None => root.to_string(),
        };
        let mut cb = DirList::default();
        match self.run_handler("dirs", [root], &mut cb) {
            Ok(()) => Ok(cb.dirs),
            Err(e) if e.is_not_found() => Ok(cb.dirs),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn have_skips_unsynced_lines() {
        let out = "//depot/a.txt#3 - /ws/a.txt\r\n//depot/b.txt - file(s) not on client.\n//depot/c.txt#1 - /ws/c.txt\n";
        let files = parse_have(out).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].depot_path, "//depot/a.txt");
        assert_eq!(files[0].revision, 3);
        assert_eq!(files[1].local_path, "/ws/c.txt");
    }

    #[test]
    fn opened_lines_parse_changes_and_types() {
        let out = "//depot/a.txt#3 - edit change 12 (text)\n//depot/b.bin#1 - add default change (binary+F)\n";
        let files = parse_opened(out).unwrap();
        assert_eq!(files[0].status, ActionType::Edit);
        assert_eq!(files[0].cl, 12);
        assert_eq!(files[0].file_type, Some(FileType::Text));
        assert_eq!(files[1].cl, 0);
        assert_eq!(files[1].file_type, None);
    }

    #[test]
    fn sizes_sum_totals() {
        let out = "//depot/a/... 10 files 2048 bytes\n//depot/b/... 5 files 100 bytes\n";
        let sc = parse_sizes(out).unwrap();
        assert_eq!(sc.total_file_count, 15);
        assert_eq!(sc.total_file_size, 2148);
        assert_eq!(sc.sizes[1].depot_path, "//depot/b/...");
    }

    #[test]
    fn malformed_size_is_reported() {
        let err = parse_sizes("//depot/a/... 3 files 10 bytes\n//depot/b/... ten files 2048 bytes\n").unwrap_err();
        assert!(matches!(err, P4Error::Parse { ref line, .. } if line.starts_with("//depot/b/")), "{err:?}");
        assert!(parse_sizes("//depot/a/... 3 files many bytes\n").is_err());
    }

    #[test]
    fn short_size_lines_are_skipped() {
        let sc = parse_sizes("\n//depot/a/... 7 files 70 bytes\nno files\n").unwrap();
        assert_eq!(sc.sizes.len(), 1);
        assert_eq!((sc.total_file_count, sc.total_file_size), (7, 70));
        assert_eq!(sc.sizes[0].depot_path, "//depot/a/...");
    }

    #[test]
    fn sync_estimate_parsed() {
        let line = "Server network estimates: files added/updated/deleted=1/2/3, bytes added/updated=400/500\n";
        let s = parse_sync_size(line).unwrap();
        assert_eq!(
            s,
            SyncSize {
                files_added: 1,
                files_updated: 2,
                files_deleted: 3,
                bytes_added: 400,
                bytes_deleted: 500,
            }
        );
        assert!(parse_sync_size("nothing").is_err());
    }
}
