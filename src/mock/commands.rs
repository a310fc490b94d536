//! Command handlers: each renders the text the command-line client would
//! print for the same request.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::DateTime;
use regex::{Regex, RegexBuilder};

use super::MOCK_ADDRESS;
use super::state::{
    Args, OpenFile, Reply, Request, RevSpec, Revision, ShelvedFile, State, not_found, record, render_records,
    split_rev, type_of, wildcard,
};
use crate::api::keys::KEY_UNSET;
use crate::api::{Client, ClientOption, ViewEntry, format_date};
use crate::core::diff::{DiffError, DiffTag, diff_lines, split_lines};
use crate::core::tagged::Record;

const TICKET_LIFETIME_SECS: i64 = 43_200;
const UNKNOWN_COMMAND: &str = "Unknown command.  Try 'p4 help' for info.\n";

/// `-c` value: absent or `default` is the default changelist.
fn change_arg(value: Option<&str>) -> Result<u32, String> {
    match value {
        None | Some("default") => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| format!("Invalid changelist number '{v}'.\n")),
    }
}

fn is_delete(action: &str) -> bool {
    action == "delete" || action == "move/delete"
}

fn is_add(action: &str) -> bool {
    action == "add" || action == "move/add"
}

fn stdin_text(req: &Request) -> String {
    req.stdin
        .as_deref()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

/// Fields and description of a changelist form.
fn parse_form(text: &str) -> (BTreeMap<String, String>, String) {
    let mut fields = BTreeMap::new();
    let mut desc: Vec<&str> = Vec::new();
    let mut current = "";
    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        if let Some(body) = line.strip_prefix('\t') {
            if current == "Description" {
                desc.push(body);
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                current = name;
                fields.insert(name.to_string(), value.trim().to_string());
            }
            None if line.is_empty() && current == "Description" => desc.push(""),
            None => {}
        }
    }
    while desc.last().is_some_and(|l| l.is_empty()) {
        desc.pop();
    }
    (fields, desc.join("\n"))
}

/// `changes` without `-l` cuts descriptions at 31 characters.
fn short_desc(desc: &str) -> String {
    desc.chars().take(31).collect()
}

/// `start` or `start,end`.
fn line_range(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start},{end}")
    }
}

/// Classic unix diff body (`2a3`, `< old`, `---`, `> new`) of two texts.
pub(super) fn unix_diff(from: &str, to: &str) -> Result<String, DiffError> {
    let a = split_lines(from.strip_suffix('\n').unwrap_or(from));
    let b = split_lines(to.strip_suffix('\n').unwrap_or(to));
    let lines = diff_lines(&a, &b)?;

    let mut out = String::new();
    let (mut left, mut right) = (0usize, 0usize);
    let mut i = 0;
    while i < lines.len() {
        if lines[i].tag == DiffTag::Equal {
            left += 1;
            right += 1;
            i += 1;
            continue;
        }
        let mut deleted = Vec::new();
        let mut inserted = Vec::new();
        while i < lines.len() && lines[i].tag != DiffTag::Equal {
            match lines[i].tag {
                DiffTag::Delete => deleted.push(lines[i].text.as_str()),
                DiffTag::Insert => inserted.push(lines[i].text.as_str()),
                DiffTag::Equal => {}
            }
            i += 1;
        }
        let old = line_range(left + 1, left + deleted.len());
        let new = line_range(right + 1, right + inserted.len());
        let header = match (deleted.is_empty(), inserted.is_empty()) {
            (true, _) => format!("{left}a{new}"),
            (false, true) => format!("{old}d{right}"),
            (false, false) => format!("{old}c{new}"),
        };
        let _ = writeln!(out, "{header}");
        for line in &deleted {
            let _ = writeln!(out, "< {line}");
        }
        if !deleted.is_empty() && !inserted.is_empty() {
            out.push_str("---\n");
        }
        for line in &inserted {
            let _ = writeln!(out, "> {line}");
        }
        left += deleted.len();
        right += inserted.len();
    }
    Ok(out)
}

/// Key pattern where `*` matches anything.
fn key_pattern(pattern: &str) -> Result<Regex, String> {
    let re = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    Regex::new(&re).map_err(|e| format!("{pattern} - bad key pattern: {e}\n"))
}

/// Every directory above `path`, e.g. `//depot` and `//depot/src` for
/// `//depot/src/a.rs`.
fn ancestors(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.trim_start_matches("//").split('/').collect();
    (1..parts.len())
        .map(|n| format!("//{}", parts[..n].join("/")))
        .collect()
}

macro_rules! try_reply {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(msg) => return Reply::fail(msg),
        }
    };
}

impl State {
    /// Serve one command.
    pub fn handle(&mut self, req: &Request, pooled: bool) -> Reply {
        self.log(req, pooled);
        match req.command.as_str() {
            "info" => self.cmd_info(req),
            "change" => self.cmd_change(req),
            "changes" => self.cmd_changes(req),
            "describe" => self.cmd_describe(req),
            "fstat" => self.cmd_fstat(req),
            "print" => self.cmd_print(req),
            "files" => self.cmd_files(req),
            "where" => self.cmd_where(req),
            "dirs" => self.cmd_dirs(req),
            "sizes" => self.cmd_sizes(req),
            "grep" => self.cmd_grep(req),
            "sync" => self.cmd_sync(req),
            "have" => self.cmd_have(req),
            "add" => self.cmd_add(req),
            "edit" | "delete" => self.cmd_open(req),
            "reconcile" => self.cmd_reconcile(req),
            "revert" => self.cmd_revert(req),
            "opened" => self.cmd_opened(req),
            "submit" => self.cmd_submit(req),
            "shelve" => self.cmd_shelve(req),
            "unshelve" => self.cmd_unshelve(req),
            "move" => self.cmd_move(req),
            "ignores" => self.cmd_ignores(req),
            "client" => self.cmd_client(req),
            "clients" => self.cmd_clients(),
            "users" => self.cmd_users(),
            "tickets" => self.cmd_tickets(),
            "login" => self.cmd_login(req),
            "set" => self.cmd_set(req),
            "trust" => Reply::ok("Trust already established.\n"),
            "index" => self.cmd_index(req),
            "key" => self.cmd_key(req),
            "keys" => self.cmd_keys(req),
            "diff" => self.cmd_diff(req),
            "diff2" => self.cmd_diff2(req),
            _ => Reply::fail(UNKNOWN_COMMAND),
        }
    }

    fn records(&self, records: &[Record], err: String) -> Reply {
        Reply {
            out: render_records(records),
            ok: err.is_empty(),
            err,
        }
    }

    fn size_of(&self, path: &str, rev: u32) -> usize {
        self.revision(path, RevSpec::Rev(rev))
            .map_or(0, |(_, r)| r.content.len())
    }

    fn date(&self) -> String {
        DateTime::from_timestamp(self.clock, 0)
            .map(|d| d.format("%Y/%m/%d").to_string())
            .unwrap_or_default()
    }

    /// Files touched by a changelist: submitted revisions and opened files.
    fn change_files(&self, cl: u32) -> Vec<String> {
        let mut files: Vec<String> = self
            .depot
            .iter()
            .filter(|(_, revs)| revs.iter().any(|r| r.change == cl))
            .map(|(p, _)| p.clone())
            .collect();
        files.extend(
            self.opened
                .iter()
                .filter(|(_, o)| o.cl == cl)
                .map(|(p, _)| p.clone()),
        );
        files
    }

    fn cmd_info(&self, req: &Request) -> Reply {
        Reply::ok(format!(
            "User name: {}\nClient name: {}\nClient host: {}\nClient root: {}\nServer address: {MOCK_ADDRESS}\n",
            self.user_of(req),
            self.client,
            self.host,
            self.root
        ))
    }

    fn cmd_change(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let cl = args.rest.first().and_then(|c| c.parse::<u32>().ok());
        if args.has("-o") {
            return self.change_form(cl);
        }
        if args.has("-d") {
            let Some(cl) = cl else {
                return Reply::fail("Usage: change -d changelist#\n");
            };
            return self.delete_change(cl);
        }
        if args.has("-i") {
            return self.save_change(req, &stdin_text(req), args.has("-f"));
        }
        Reply::fail("Usage: change [ -o | -i | -d ] [changelist#]\n")
    }

    fn change_form(&self, cl: Option<u32>) -> Reply {
        let (number, user, client, status, desc, time) = match cl {
            Some(cl) => match self.changes.get(&cl) {
                Some(c) => (cl.to_string(), c.user.clone(), c.client.clone(), c.status.clone(), c.desc.clone(), c.time),
                None => return Reply::fail(format!("Change {cl} unknown.\n")),
            },
            None => (
                "new".to_string(),
                self.user.clone(),
                self.client.clone(),
                "new".to_string(),
                "<enter description here>".to_string(),
                self.clock,
            ),
        };

        let mut form = String::from("# A Perforce Change Specification.\n\n");
        let _ = write!(
            form,
            "Change:\t{number}\n\nDate:\t{}\n\nClient:\t{client}\n\nUser:\t{user}\n\nStatus:\t{status}\n\nDescription:\n",
            format_date(time)
        );
        for line in desc.split('\n') {
            let _ = writeln!(form, "\t{line}");
        }
        let files: Vec<(&String, &OpenFile)> = match cl {
            Some(cl) => self.opened.iter().filter(|(_, o)| o.cl == cl).collect(),
            None => Vec::new(),
        };
        if !files.is_empty() {
            form.push_str("\nFiles:\n");
            for (path, open) in files {
                let _ = writeln!(form, "\t{path}\t# {}", open.action);
            }
        }
        Reply::ok(form)
    }

    fn save_change(&mut self, req: &Request, text: &str, force: bool) -> Reply {
        let (fields, desc) = parse_form(text);
        let number = fields.get("Change").map_or("new", String::as_str);
        if number == "new" {
            let user = fields
                .get("User")
                .filter(|u| !u.is_empty())
                .cloned()
                .unwrap_or_else(|| self.user_of(req));
            let client = fields
                .get("Client")
                .filter(|c| !c.is_empty())
                .cloned()
                .unwrap_or_else(|| self.client.clone());
            let cl = self.new_change(user, client, desc);
            return Reply::ok(format!("Change {cl} created.\n"));
        }
        let Ok(cl) = number.parse::<u32>() else {
            return Reply::fail(format!(
                "Error in change specification.\nInvalid changelist number '{number}'.\n"
            ));
        };
        match self.changes.get_mut(&cl) {
            None => Reply::fail(format!("Change {cl} unknown.\n")),
            Some(c) if c.status == "submitted" && !force => Reply::fail(format!(
                "Change {cl} has been submitted; use -f to update its description.\n"
            )),
            Some(c) => {
                c.desc = desc;
                Reply::ok(format!("Change {cl} updated.\n"))
            }
        }
    }

    fn delete_change(&mut self, cl: u32) -> Reply {
        let Some(change) = self.changes.get(&cl) else {
            return Reply::fail(format!("Change {cl} unknown.\n"));
        };
        if change.status == "submitted" {
            return Reply::fail(format!("Change {cl} has been submitted and can't be deleted.\n"));
        }
        let open = self.opened.values().filter(|o| o.cl == cl).count();
        if open > 0 {
            return Reply::fail(format!(
                "Change {cl} has {open} open file(s) associated with it and can't be deleted.\n"
            ));
        }
        if !change.shelved.is_empty() {
            return Reply::fail(format!(
                "Change {cl} has shelved files associated with it and can't be deleted.\n"
            ));
        }
        self.changes.remove(&cl);
        Reply::ok(format!("Change {cl} deleted.\n"))
    }

    fn cmd_changes(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-s", "-u", "-c", "-m"]);
        let max = args
            .value("-m")
            .and_then(|m| m.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let mut patterns = Vec::new();
        for arg in &args.rest {
            patterns.push(try_reply!(wildcard(&self.to_depot(split_rev(arg).0))));
        }

        let records: Vec<Record> = self
            .changes
            .iter()
            .rev()
            .filter(|(_, c)| args.value("-s").is_none_or(|s| c.status == s))
            .filter(|(_, c)| args.value("-u").is_none_or(|u| c.user == u))
            .filter(|(_, c)| args.value("-c").is_none_or(|w| c.client == w))
            .filter(|(cl, _)| {
                patterns.is_empty()
                    || self
                        .change_files(**cl)
                        .iter()
                        .any(|p| patterns.iter().any(|re| re.is_match(p)))
            })
            .take(max)
            .map(|(cl, c)| {
                let desc = if args.has("-l") { c.desc.clone() } else { short_desc(&c.desc) };
                record([
                    ("change", cl.to_string()),
                    ("time", c.time.to_string()),
                    ("user", c.user.clone()),
                    ("client", c.client.clone()),
                    ("status", c.status.clone()),
                    ("changeType", "public".to_string()),
                    ("desc", desc),
                ])
            })
            .collect();
        self.records(&records, String::new())
    }

    fn cmd_describe(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let shelved = args.has("-S");
        let mut records = Vec::new();
        let mut err = String::new();

        for arg in &args.rest {
            let found = arg
                .parse::<u32>()
                .ok()
                .and_then(|cl| self.changes.get(&cl).map(|c| (cl, c)));
            let Some((cl, change)) = found else {
                let _ = writeln!(err, "{arg} - no such changelist.");
                continue;
            };
            let mut rec = record([
                ("change", cl.to_string()),
                ("user", change.user.clone()),
                ("client", change.client.clone()),
                ("time", change.time.to_string()),
                ("desc", change.desc.clone()),
                ("status", change.status.clone()),
                ("changeType", "public".to_string()),
            ]);
            if shelved {
                rec.insert("shelved".into(), String::new());
            }

            let files: Vec<(String, u32, String, String)> = if shelved {
                change
                    .shelved
                    .iter()
                    .map(|(p, s)| (p.clone(), s.rev, s.action.clone(), s.file_type.clone()))
                    .collect()
            } else if change.status == "submitted" {
                self.depot
                    .iter()
                    .flat_map(|(p, revs)| {
                        revs.iter()
                            .enumerate()
                            .filter(|(_, r)| r.change == cl)
                            .map(move |(i, r)| (p.clone(), i as u32 + 1, r.action.clone(), r.file_type.clone()))
                    })
                    .collect()
            } else {
                self.opened
                    .iter()
                    .filter(|(_, o)| o.cl == cl)
                    .map(|(p, o)| (p.clone(), self.base_rev(p), o.action.clone(), o.file_type.clone()))
                    .collect()
            };
            for (i, (path, rev, action, file_type)) in files.into_iter().enumerate() {
                rec.insert(format!("depotFile{i}"), path);
                rec.insert(format!("action{i}"), action);
                rec.insert(format!("type{i}"), file_type);
                rec.insert(format!("rev{i}"), rev.to_string());
            }
            records.push(rec);
        }
        self.records(&records, err)
    }

    fn stat_record(&self, path: &str) -> Record {
        let mut rec = record([
            ("depotFile", path.to_string()),
            ("clientFile", self.local_path(path)),
            ("isMapped", String::new()),
        ]);
        if let Some((rev, r)) = self.head(path) {
            rec.insert("headAction".into(), r.action.clone());
            rec.insert("headType".into(), r.file_type.clone());
            rec.insert("headTime".into(), r.time.to_string());
            rec.insert("headRev".into(), rev.to_string());
            rec.insert("headChange".into(), r.change.to_string());
            rec.insert("headModTime".into(), r.time.to_string());
            rec.insert("fileSize".into(), r.content.len().to_string());
        }
        if let Some(have) = self.have.get(path) {
            rec.insert("haveRev".into(), have.to_string());
        }
        if let Some(open) = self.opened.get(path) {
            let change = if open.cl == 0 { "default".to_string() } else { open.cl.to_string() };
            rec.insert("action".into(), open.action.clone());
            rec.insert("change".into(), change);
            rec.insert("type".into(), open.file_type.clone());
            rec.insert("actionOwner".into(), self.user.clone());
        }
        rec
    }

    fn cmd_fstat(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-e", "-T", "-m", "-F"]);
        let in_change = match args.value("-e") {
            Some(v) => Some(try_reply!(change_arg(Some(v)))),
            None => None,
        };
        let mut records = Vec::new();
        let mut err = String::new();

        for arg in &args.rest {
            let mut paths: BTreeSet<String> = try_reply!(self.resolve(arg, true))
                .into_iter()
                .map(|(p, _)| p)
                .collect();
            paths.extend(try_reply!(self.opened_matching(arg)));
            if let Some(cl) = in_change {
                let files = self.change_files(cl);
                paths.retain(|p| files.contains(p));
            }
            if paths.is_empty() {
                err.push_str(&not_found(arg));
                continue;
            }
            records.extend(paths.iter().map(|p| self.stat_record(p)));
        }
        if let Some(change) = in_change.and_then(|cl| self.changes.get(&cl)) {
            records.push(record([("desc", change.desc.clone())]));
        }
        self.records(&records, err)
    }

    fn file_record(&self, path: &str, rev: u32, r: &Revision) -> Record {
        record([
            ("depotFile", path.to_string()),
            ("rev", rev.to_string()),
            ("change", r.change.to_string()),
            ("action", r.action.clone()),
            ("type", r.file_type.clone()),
            ("time", r.time.to_string()),
            ("fileSize", r.content.len().to_string()),
        ])
    }

    fn cmd_print(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-o"]);
        let quiet = args.has("-q");
        let mut out = String::new();
        let mut err = String::new();

        for arg in &args.rest {
            let found = try_reply!(self.resolve(arg, false));
            if found.is_empty() {
                err.push_str(&not_found(arg));
                continue;
            }
            for (path, rev) in found {
                let Some((_, r)) = self.revision(&path, RevSpec::Rev(rev)) else {
                    continue;
                };
                if req.tagged {
                    for (key, value) in &self.file_record(&path, rev, r) {
                        let _ = writeln!(out, "... {key} {value}");
                    }
                } else if !quiet {
                    let _ = writeln!(out, "{path}#{rev} - {} change {} ({})", r.action, r.change, r.file_type);
                }
                let text = String::from_utf8_lossy(&r.content);
                out.push_str(&text);
                if !text.is_empty() && !text.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        Reply {
            out,
            ok: err.is_empty(),
            err,
        }
    }

    fn cmd_files(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-m"]);
        let mut records = Vec::new();
        let mut err = String::new();
        for arg in &args.rest {
            let found = try_reply!(self.resolve(arg, true));
            if found.is_empty() {
                err.push_str(&not_found(arg));
                continue;
            }
            for (path, rev) in found {
                if let Some((_, r)) = self.revision(&path, RevSpec::Rev(rev)) {
                    let mut rec = self.file_record(&path, rev, r);
                    rec.swap_remove("fileSize");
                    records.push(rec);
                }
            }
        }
        self.records(&records, err)
    }

    fn cmd_where(&self, req: &Request) -> Reply {
        let records: Vec<Record> = req
            .args
            .iter()
            .map(|arg| {
                let depot = self.to_depot(split_rev(arg).0);
                record([
                    ("depotFile", depot.clone()),
                    ("clientFile", self.client_path(&depot)),
                    ("path", self.local_path(&depot)),
                ])
            })
            .collect();
        self.records(&records, String::new())
    }

    fn cmd_dirs(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let mut out = String::new();
        let mut err = String::new();
        for arg in &args.rest {
            let re = try_reply!(wildcard(&self.to_depot(arg)));
            let dirs: BTreeSet<String> = self
                .depot
                .iter()
                .filter(|(_, revs)| revs.last().is_some_and(|r| !r.is_deleted()))
                .flat_map(|(p, _)| ancestors(p))
                .filter(|d| re.is_match(d))
                .collect();
            if dirs.is_empty() {
                err.push_str(&not_found(arg));
            }
            for dir in dirs {
                if req.tagged {
                    out.push_str(&render_records(&[record([("dir", dir)])]));
                } else {
                    let _ = writeln!(out, "{dir}");
                }
            }
        }
        Reply {
            out,
            ok: err.is_empty(),
            err,
        }
    }

    fn cmd_sizes(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-m"]);
        let summary = args.has("-s");
        let mut out = String::new();
        let mut err = String::new();
        for arg in &args.rest {
            let found = try_reply!(self.resolve(arg, false));
            if summary {
                let bytes: usize = found.iter().map(|(p, rev)| self.size_of(p, *rev)).sum();
                let _ = writeln!(out, "{arg} {} files {bytes} bytes", found.len());
                continue;
            }
            if found.is_empty() {
                err.push_str(&not_found(arg));
            }
            for (path, rev) in found {
                let _ = writeln!(out, "{path}#{rev} {} bytes", self.size_of(&path, rev));
            }
        }
        Reply::with_warnings(out, err)
    }

    fn cmd_grep(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-e"]);
        let Some(pattern) = args.value("-e") else {
            return Reply::fail("Usage: grep [ -a -i -n -v -s ] -e pattern file[revRange]...\n");
        };
        let re = try_reply!(
            RegexBuilder::new(pattern)
                .case_insensitive(args.has("-i"))
                .build()
                .map_err(|e| format!("Invalid regular expression: {e}\n"))
        );

        let mut files = BTreeSet::new();
        let mut err = String::new();
        for arg in &args.rest {
            let found = try_reply!(self.resolve(arg, false));
            if found.is_empty() && !args.has("-s") {
                err.push_str(&not_found(arg));
            }
            files.extend(found);
        }
        let count = files.len() as u64;
        self.grep_counts.push(count);
        if let Some(limit) = self.grep_limit {
            if count > limit {
                return Reply::fail(format!("Grep revision limit exceeded (over {limit}).\n"));
            }
        }

        let numbered = args.has("-n");
        let mut out = String::new();
        for (path, rev) in &files {
            let Some((_, r)) = self.revision(path, RevSpec::Rev(*rev)) else {
                continue;
            };
            if r.file_type == "binary" {
                continue;
            }
            for (i, line) in String::from_utf8_lossy(&r.content).lines().enumerate() {
                if !re.is_match(line) {
                    continue;
                }
                if numbered {
                    let _ = writeln!(out, "{path}#{rev}:{}:{line}", i + 1);
                } else {
                    let _ = writeln!(out, "{path}#{rev}:{line}");
                }
            }
        }
        Reply::with_warnings(out, err)
    }

    fn cmd_sync(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let preview = args.has("-N") || args.has("-n");
        let force = args.has("-f");
        let targets = if args.rest.is_empty() { vec!["//..."] } else { args.rest.clone() };

        // depot path -> revision to sync to, `None` to remove
        let mut plan: BTreeMap<String, Option<u32>> = BTreeMap::new();
        let mut warnings = String::new();
        for target in &targets {
            let (path, spec) = split_rev(target);
            let re = try_reply!(wildcard(&self.to_depot(path)));
            let before = plan.len();
            for p in self.depot.keys().filter(|p| re.is_match(p)) {
                if self.opened.contains_key(p) {
                    continue;
                }
                let want = self
                    .revision(p, spec)
                    .filter(|(_, r)| !r.is_deleted())
                    .map(|(rev, _)| rev);
                let have = self.have.get(p).copied();
                if want != have || (force && want.is_some()) {
                    plan.insert(p.clone(), want);
                }
            }
            if plan.len() == before {
                let _ = writeln!(warnings, "{target} - file(s) up-to-date.");
            }
        }

        if preview {
            let (mut added, mut updated, mut deleted) = (0, 0, 0);
            let (mut bytes_added, mut bytes_updated) = (0, 0);
            for (p, want) in &plan {
                let size = want.map_or(0, |rev| self.size_of(p, rev));
                match (self.have.contains_key(p), want) {
                    (false, Some(_)) => {
                        added += 1;
                        bytes_added += size;
                    }
                    (true, Some(_)) => {
                        updated += 1;
                        bytes_updated += size;
                    }
                    (true, None) => deleted += 1,
                    (false, None) => {}
                }
            }
            return Reply::ok(format!(
                "Server network estimates: files added/updated/deleted={added}/{updated}/{deleted}, bytes added/updated={bytes_added}/{bytes_updated}\n"
            ));
        }

        let mut out = String::new();
        for (p, want) in plan {
            let local = self.local_path(&p);
            match want {
                Some(rev) => {
                    let verb = if self.have.contains_key(&p) { "updating" } else { "added as" };
                    let content = self
                        .revision(&p, RevSpec::Rev(rev))
                        .map(|(_, r)| r.content.clone())
                        .unwrap_or_default();
                    self.have.insert(p.clone(), rev);
                    self.workspace.insert(p.clone(), content);
                    let _ = writeln!(out, "{p}#{rev} - {verb} {local}");
                }
                None => {
                    self.have.remove(&p);
                    self.workspace.remove(&p);
                    let _ = writeln!(out, "{p}#none - deleted as {local}");
                }
            }
        }
        Reply::with_warnings(out, warnings)
    }

    fn cmd_have(&self, req: &Request) -> Reply {
        let patterns: Vec<&str> = if req.args.is_empty() {
            vec!["//..."]
        } else {
            req.args.iter().map(String::as_str).collect()
        };
        let mut out = String::new();
        let mut warnings = String::new();
        for pattern in patterns {
            let re = try_reply!(wildcard(&self.to_depot(split_rev(pattern).0)));
            let mut any = false;
            for (path, rev) in self.have.iter().filter(|(p, _)| re.is_match(p)) {
                any = true;
                let _ = writeln!(out, "{path}#{rev} - {}", self.local_path(path));
            }
            if !any {
                let _ = writeln!(warnings, "{pattern} - file(s) not on client.");
            }
        }
        Reply::with_warnings(out, warnings)
    }

    fn cmd_add(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c", "-t"]);
        let cl = try_reply!(change_arg(args.value("-c")));
        try_reply!(self.check_pending(cl));
        let mut out = String::new();
        let mut warnings = String::new();

        for arg in &args.rest {
            let depot = self.to_depot(arg);
            if let Some(open) = self.opened.get(&depot) {
                let _ = writeln!(warnings, "{depot} - currently opened for {}", open.action);
                continue;
            }
            let head = self.head(&depot);
            if head.is_some_and(|(_, r)| !r.is_deleted()) {
                let _ = writeln!(warnings, "{depot} - can't add existing file");
                continue;
            }
            let rev = head.map_or(1, |(rev, _)| rev + 1);
            let from_disk = if arg.starts_with("//") { None } else { std::fs::read(arg).ok() };
            let content = from_disk
                .or_else(|| self.workspace.get(&depot).cloned())
                .unwrap_or_default();
            let file_type = args
                .value("-t")
                .map_or_else(|| type_of(&content).to_string(), str::to_string);
            self.workspace.insert(depot.clone(), content);
            self.opened.insert(
                depot.clone(),
                OpenFile {
                    cl,
                    action: "add".to_string(),
                    file_type,
                    moved_from: None,
                },
            );
            let _ = writeln!(out, "{depot}#{rev} - opened for add");
        }
        Reply::with_warnings(out, warnings)
    }

    /// `edit` and `delete`: open synced files in a changelist.
    fn cmd_open(&mut self, req: &Request) -> Reply {
        let action = req.command.clone();
        let args = Args::parse(&req.args, &["-c", "-t"]);
        let cl = try_reply!(change_arg(args.value("-c")));
        try_reply!(self.check_pending(cl));
        let mut out = String::new();
        let mut warnings = String::new();

        for arg in &args.rest {
            let re = try_reply!(wildcard(&self.to_depot(split_rev(arg).0)));
            let targets: Vec<(String, u32)> = self
                .have
                .iter()
                .filter(|(p, _)| re.is_match(p))
                .map(|(p, rev)| (p.clone(), *rev))
                .collect();
            if targets.is_empty() {
                let _ = writeln!(warnings, "{arg} - file(s) not on client.");
                continue;
            }
            for (path, rev) in targets {
                if let Some(open) = self.opened.get(&path) {
                    let _ = writeln!(warnings, "{path} - currently opened for {}", open.action);
                    continue;
                }
                let file_type = args
                    .value("-t")
                    .map(str::to_string)
                    .or_else(|| self.head(&path).map(|(_, r)| r.file_type.clone()))
                    .unwrap_or_else(|| "text".to_string());
                if action == "delete" {
                    self.workspace.remove(&path);
                }
                self.opened.insert(
                    path.clone(),
                    OpenFile {
                        cl,
                        action: action.clone(),
                        file_type,
                        moved_from: None,
                    },
                );
                let _ = writeln!(out, "{path}#{rev} - opened for {action}");
            }
        }
        Reply::with_warnings(out, warnings)
    }

    fn cmd_reconcile(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c"]);
        let cl = try_reply!(change_arg(args.value("-c")));
        try_reply!(self.check_pending(cl));
        let mut out = String::new();
        let mut warnings = String::new();

        for arg in &args.rest {
            let re = try_reply!(wildcard(&self.to_depot(split_rev(arg).0)));
            let mut changed: Vec<(String, &str)> = Vec::new();
            for (path, rev) in &self.have {
                if !re.is_match(path) || self.opened.contains_key(path) {
                    continue;
                }
                let base = self.revision(path, RevSpec::Rev(*rev)).map(|(_, r)| &r.content);
                match self.workspace.get(path) {
                    None => changed.push((path.clone(), "delete")),
                    Some(content) if Some(content) != base => changed.push((path.clone(), "edit")),
                    Some(_) => {}
                }
            }
            for path in self.workspace.keys() {
                if re.is_match(path) && !self.have.contains_key(path) && !self.opened.contains_key(path) {
                    changed.push((path.clone(), "add"));
                }
            }
            if changed.is_empty() {
                let _ = writeln!(warnings, "{arg} - no file(s) to reconcile.");
                continue;
            }
            for (path, action) in changed {
                let rev = self.base_rev(&path);
                let file_type = self
                    .workspace
                    .get(&path)
                    .map_or("text", |c| type_of(c))
                    .to_string();
                self.opened.insert(
                    path.clone(),
                    OpenFile {
                        cl,
                        action: action.to_string(),
                        file_type,
                        moved_from: None,
                    },
                );
                let _ = writeln!(out, "{path}#{rev} - opened for {action}");
            }
        }
        Reply::with_warnings(out, warnings)
    }

    fn is_unchanged(&self, path: &str) -> bool {
        let base = self
            .have
            .get(path)
            .and_then(|rev| self.revision(path, RevSpec::Rev(*rev)))
            .map(|(_, r)| &r.content);
        base.is_some() && self.workspace.get(path) == base
    }

    fn revert_file(&mut self, path: &str, keep: bool, out: &mut String) {
        let Some(open) = self.opened.remove(path) else {
            return;
        };
        if let Some(from) = open.moved_from.clone() {
            self.revert_file(&from, keep, out);
        }
        if is_add(&open.action) {
            if open.action == "move/add" {
                self.workspace.remove(path);
            }
            let _ = writeln!(out, "{path}#none - was {}, abandoned", open.action);
            return;
        }
        let rev = self.have.get(path).copied();
        let base = rev
            .and_then(|r| self.revision(path, RevSpec::Rev(r)))
            .map(|(_, r)| r.content.clone());
        if let (false, Some(content)) = (keep, base) {
            self.workspace.insert(path.to_string(), content);
        }
        let _ = writeln!(out, "{path}#{} - was {}, reverted", rev.unwrap_or(0), open.action);
    }

    fn cmd_revert(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c"]);
        let only_cl = match args.value("-c") {
            Some(v) => Some(try_reply!(change_arg(Some(v)))),
            None => None,
        };
        let unchanged_only = args.has("-a");
        let keep = args.has("-k");
        let patterns = if args.rest.is_empty() && (unchanged_only || only_cl.is_some()) {
            vec!["//..."]
        } else {
            args.rest.clone()
        };

        let mut out = String::new();
        let mut warnings = String::new();
        for arg in patterns {
            let matched: Vec<String> = try_reply!(self.opened_matching(arg))
                .into_iter()
                .filter(|p| only_cl.is_none_or(|cl| self.opened.get(p).is_some_and(|o| o.cl == cl)))
                .filter(|p| !unchanged_only || self.is_unchanged(p))
                .collect();
            if matched.is_empty() {
                let _ = writeln!(warnings, "{arg} - file(s) not opened on this client.");
                continue;
            }
            for path in matched {
                self.revert_file(&path, keep, &mut out);
            }
        }
        Reply::with_warnings(out, warnings)
    }

    fn cmd_opened(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c"]);
        let only_cl = match args.value("-c") {
            Some(v) => Some(try_reply!(change_arg(Some(v)))),
            None => None,
        };
        let mut patterns = Vec::new();
        for arg in &args.rest {
            patterns.push(try_reply!(wildcard(&self.to_depot(arg))));
        }

        let mut out = String::new();
        for (path, open) in &self.opened {
            if only_cl.is_some_and(|cl| open.cl != cl) {
                continue;
            }
            if !patterns.is_empty() && !patterns.iter().any(|re| re.is_match(path)) {
                continue;
            }
            let change = if open.cl == 0 {
                "default change".to_string()
            } else {
                format!("change {}", open.cl)
            };
            let _ = writeln!(
                out,
                "{path}#{} - {} {change} ({})",
                self.base_rev(path),
                open.action,
                open.file_type
            );
        }
        if out.is_empty() {
            return Reply::with_warnings(out, "File(s) not opened on this client.\n".to_string());
        }
        Reply::ok(out)
    }

    fn cmd_submit(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c", "-d"]);
        let Some(cl) = args.value("-c").and_then(|v| v.parse::<u32>().ok()) else {
            return Reply::fail("Usage: submit -c changelist#\n");
        };
        try_reply!(self.check_pending(cl));
        let files: Vec<(String, OpenFile)> = self
            .opened
            .iter()
            .filter(|(_, o)| o.cl == cl)
            .map(|(p, o)| (p.clone(), o.clone()))
            .collect();
        if files.is_empty() {
            return Reply::fail("No files to submit.\n");
        }

        let stale: Vec<String> = files
            .iter()
            .filter(|(_, o)| !is_add(&o.action))
            .filter_map(|(p, _)| {
                let (head, _) = self.head(p)?;
                let have = self.have.get(p).copied().unwrap_or(0);
                (have < head).then(|| format!("{p} - must resolve #{head}\n"))
            })
            .collect();
        if !stale.is_empty() {
            return Reply::fail(format!(
                "Out of date files must be resolved or reverted.\n{}",
                stale.concat()
            ));
        }

        let time = self.tick();
        let mut out = format!("Submitting change {cl}.\nLocking {} files ...\n", files.len());
        for (path, open) in files {
            let deleting = is_delete(&open.action);
            let content = if deleting {
                Vec::new()
            } else {
                self.workspace.get(&path).cloned().unwrap_or_default()
            };
            let revs = self.depot.entry(path.clone()).or_default();
            revs.push(Revision {
                change: cl,
                action: open.action.clone(),
                file_type: open.file_type.clone(),
                content,
                time,
            });
            let rev = revs.len() as u32;
            if deleting {
                self.have.remove(&path);
                self.workspace.remove(&path);
            } else {
                self.have.insert(path.clone(), rev);
            }
            self.opened.remove(&path);
            let _ = writeln!(out, "{} {path}#{rev}", open.action);
        }
        if let Some(change) = self.changes.get_mut(&cl) {
            change.status = "submitted".to_string();
            change.time = time;
        }
        let _ = writeln!(out, "Change {cl} submitted.");
        Reply::ok(out)
    }

    fn cmd_shelve(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c"]);
        let Some(cl) = args.value("-c").and_then(|v| v.parse::<u32>().ok()) else {
            return Reply::fail("Usage: shelve -c changelist#\n");
        };
        if cl == 0 {
            return Reply::fail("Usage: shelve -c changelist#\n");
        }
        try_reply!(self.check_pending(cl));
        if args.has("-d") {
            if let Some(change) = self.changes.get_mut(&cl) {
                change.shelved.clear();
            }
            return Reply::ok(format!("Shelved change {cl} deleted.\n"));
        }

        let files: Vec<(String, ShelvedFile)> = self
            .opened
            .iter()
            .filter(|(_, o)| o.cl == cl)
            .map(|(p, o)| {
                let shelved = ShelvedFile {
                    rev: self.base_rev(p),
                    action: o.action.clone(),
                    file_type: o.file_type.clone(),
                    content: self.workspace.get(p).cloned().unwrap_or_default(),
                };
                (p.clone(), shelved)
            })
            .collect();
        if files.is_empty() {
            return Reply::fail("No files to shelve.\n");
        }

        let mut out = format!("Shelving files for change {cl}.\n");
        for (path, shelved) in &files {
            let _ = writeln!(out, "{} {path}#{}", shelved.action, shelved.rev);
        }
        let _ = writeln!(out, "Change {cl} files shelved.");
        if let Some(change) = self.changes.get_mut(&cl) {
            change.shelved.extend(files);
        }
        Reply::ok(out)
    }

    fn cmd_unshelve(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-s", "-c"]);
        let Some(source) = args.value("-s").and_then(|v| v.parse::<u32>().ok()) else {
            return Reply::fail("Usage: unshelve -s changelist# [-c changelist#] [-f]\n");
        };
        let target = try_reply!(change_arg(args.value("-c")));
        try_reply!(self.check_pending(target));
        let shelved = match self.changes.get(&source) {
            Some(c) if !c.shelved.is_empty() => c.shelved.clone(),
            Some(_) => return Reply::fail(format!("Change {source} has no shelved files.\n")),
            None => return Reply::fail(format!("Change {source} unknown.\n")),
        };
        let mut patterns = Vec::new();
        for arg in &args.rest {
            patterns.push(try_reply!(wildcard(&self.to_depot(arg))));
        }

        let force = args.has("-f");
        let mut out = String::new();
        let mut warnings = String::new();
        for (path, file) in shelved {
            if !patterns.is_empty() && !patterns.iter().any(|re| re.is_match(&path)) {
                continue;
            }
            if let Some(open) = self.opened.get(&path) {
                if !force {
                    let _ = writeln!(warnings, "{path} - can't unshelve (already opened for {})", open.action);
                    continue;
                }
            }
            if is_delete(&file.action) {
                self.workspace.remove(&path);
            } else {
                self.workspace.insert(path.clone(), file.content);
            }
            self.opened.insert(
                path.clone(),
                OpenFile {
                    cl: target,
                    action: file.action.clone(),
                    file_type: file.file_type,
                    moved_from: None,
                },
            );
            let _ = writeln!(out, "{path}#{} - unshelved, opened for {}", file.rev, file.action);
        }
        Reply {
            ok: !out.is_empty() || warnings.is_empty(),
            out,
            err: warnings,
        }
    }

    fn cmd_move(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-c", "-t"]);
        let cl = try_reply!(change_arg(args.value("-c")));
        try_reply!(self.check_pending(cl));
        let &[from, to] = args.rest.as_slice() else {
            return Reply::fail("Usage: move [-c changelist#] from to\n");
        };
        let (from, to) = (self.to_depot(from), self.to_depot(to));

        let Some(source) = self.opened.get(&from).cloned() else {
            return Reply::fail(format!("{from} - not opened for edit\n"));
        };
        if source.action != "edit" && source.action != "add" {
            return Reply::fail(format!("{from} - not opened for edit\n"));
        }
        if self.opened.contains_key(&to) || self.head(&to).is_some_and(|(_, r)| !r.is_deleted()) {
            return Reply::fail(format!("{to} - can't move to an existing file\n"));
        }

        let rev = self.base_rev(&from);
        let content = self.workspace.remove(&from).unwrap_or_default();
        self.workspace.insert(to.clone(), content);
        if source.action == "add" {
            self.opened.remove(&from);
            self.opened.insert(to.clone(), OpenFile { cl, ..source });
        } else {
            self.opened.insert(
                from.clone(),
                OpenFile {
                    cl,
                    action: "move/delete".to_string(),
                    file_type: source.file_type.clone(),
                    moved_from: None,
                },
            );
            self.opened.insert(
                to.clone(),
                OpenFile {
                    cl,
                    action: "move/add".to_string(),
                    file_type: source.file_type,
                    moved_from: Some(from.clone()),
                },
            );
        }
        Reply::ok(format!("{to}#1 - moved from {from}#{rev}\n"))
    }

    fn cmd_ignores(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let out: String = args
            .rest
            .iter()
            .filter(|p| self.ignored.iter().any(|s| p.ends_with(s.as_str())))
            .map(|p| format!("{p} ignored\n"))
            .collect();
        Reply::ok(out)
    }

    fn default_client(&self, name: &str) -> Client {
        use ClientOption::*;
        Client {
            client: name.to_string(),
            owner: self.user.clone(),
            root: self.root.clone(),
            options: vec![NoAllWrite, NoClobber, NoCompress, Unlocked, NoModtime, NoRmdir],
            submit_options: vec!["submitunchanged".to_string()],
            line_end: "local".to_string(),
            view: vec![ViewEntry {
                source: "//depot/...".to_string(),
                destination: format!("//{name}/..."),
            }],
            host: self.host.clone(),
            description: format!("Created by {}.", self.user),
            ..Client::default()
        }
    }

    fn cmd_client(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        if args.has("-i") {
            let client = match Client::parse(&stdin_text(req)) {
                Ok(c) => c,
                Err(e) => return Reply::fail(format!("Error in client specification.\n{e}\n")),
            };
            let name = client.client.clone();
            if name == self.client {
                self.root = client.root.clone();
            }
            self.clients.insert(name.clone(), client);
            return Reply::ok(format!("Client {name} saved.\n"));
        }

        let name = args
            .rest
            .first()
            .map_or_else(|| self.client.clone(), |n| n.to_string());
        if args.has("-d") {
            return match self.clients.remove(&name) {
                Some(_) => Reply::ok(format!("Client {name} deleted.\n")),
                None => Reply::fail(format!("Client '{name}' doesn't exist.\n")),
            };
        }
        let spec = self
            .clients
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default_client(&name));
        Reply::ok(format!(
            "# A Perforce Client Specification.\n#\n#  Client:      The client name.\n\n{spec}"
        ))
    }

    fn cmd_clients(&self) -> Reply {
        let mut clients = self.clients.clone();
        clients
            .entry(self.client.clone())
            .or_insert_with(|| self.default_client(&self.client));
        let date = self.date();
        let mut out = String::new();
        for (name, client) in &clients {
            let desc = client.description.lines().next().unwrap_or_default();
            let _ = writeln!(out, "Client {name} {date} root {} '{desc}'", client.root);
        }
        Reply::ok(out)
    }

    fn cmd_users(&self) -> Reply {
        let date = self.date();
        let mut out = String::new();
        for (user, name) in &self.users {
            let _ = writeln!(out, "{user} <{user}@example.com> ({name}) accessed {date}");
        }
        Reply::ok(out)
    }

    fn cmd_tickets(&self) -> Reply {
        let mut out = String::new();
        for (user, ticket) in &self.tickets {
            let _ = writeln!(out, "{MOCK_ADDRESS} ({user}) {ticket}");
        }
        Reply::ok(out)
    }

    fn cmd_login(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let user = args
            .rest
            .first()
            .map_or_else(|| self.user_of(req), |u| u.to_string());
        if !self.users.contains_key(&user) {
            return Reply::fail(format!("User {user} doesn't exist.\n"));
        }
        let seed = user
            .bytes()
            .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
        let ticket = format!("{:08X}{seed:024X}", self.tick());
        self.tickets.insert(user.clone(), ticket.clone());

        let mut out = format!("{ticket}\n");
        if req.tagged {
            out.push_str(&render_records(&[record([
                ("User", user),
                ("TicketExpiration", TICKET_LIFETIME_SECS.to_string()),
            ])]));
        }
        Reply::ok(out)
    }

    fn cmd_set(&mut self, req: &Request) -> Reply {
        if req.args.is_empty() {
            let out: String = self
                .settings
                .iter()
                .map(|(k, v)| format!("{k}={v} (set)\n"))
                .collect();
            return Reply::ok(out);
        }
        for arg in &req.args {
            let Some((key, value)) = arg.split_once('=') else {
                return Reply::fail("Usage: set [var=[value]]\n");
            };
            if value.is_empty() {
                self.settings.remove(key);
            } else {
                self.settings.insert(key.to_string(), value.to_string());
            }
        }
        Reply::ok("")
    }

    fn cmd_index(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-a"]);
        let Ok(attrib) = args.value("-a").unwrap_or("0").parse::<u32>() else {
            return Reply::fail("Invalid index attribute.\n");
        };
        let Some(&name) = args.rest.first() else {
            return Reply::fail("Usage: index [-a attrib] [-d] name\n");
        };
        let text = stdin_text(req);
        let words = text.split_whitespace().map(str::to_string);
        let entry = self.indexes.entry((name.to_string(), attrib)).or_default();
        if args.has("-d") {
            for word in words {
                entry.remove(&word);
            }
        } else {
            entry.extend(words);
        }
        Reply::ok("")
    }

    fn key_reply(&self, req: &Request, name: &str, value: &str) -> Reply {
        if req.tagged {
            Reply::ok(render_records(&[record([("key", name), ("value", value)])]))
        } else {
            Reply::ok(format!("{value}\n"))
        }
    }

    fn cmd_key(&mut self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["--from", "--to"]);
        let Some(&name) = args.rest.first() else {
            return Reply::fail("Usage: key [ -d -i ] name [value]\n");
        };
        let current = self
            .keys
            .get(name)
            .cloned()
            .unwrap_or_else(|| KEY_UNSET.to_string());

        if let (Some(from), Some(to)) = (args.value("--from"), args.value("--to")) {
            if current != from {
                return Reply::fail(format!("New value for {name} not set.\n"));
            }
            self.keys.insert(name.to_string(), to.to_string());
            return Reply::ok("");
        }
        if args.has("-d") {
            return match self.keys.remove(name) {
                Some(_) => Reply::ok(format!("Key {name} deleted.\n")),
                None => Reply::fail(format!("No such key '{name}'.\n")),
            };
        }
        if args.has("-i") {
            let Ok(n) = current.parse::<i64>() else {
                return Reply::fail(format!("Can't increment key '{name}'; value is not numeric.\n"));
            };
            let next = (n + 1).to_string();
            self.keys.insert(name.to_string(), next.clone());
            return self.key_reply(req, name, &next);
        }
        match args.rest.get(1) {
            Some(value) => {
                self.keys.insert(name.to_string(), value.to_string());
                Reply::ok("")
            }
            None => self.key_reply(req, name, &current),
        }
    }

    fn cmd_keys(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &["-e", "-m"]);
        let re = try_reply!(key_pattern(args.value("-e").unwrap_or("*")));
        let matched = self.keys.iter().filter(|(k, _)| re.is_match(k));
        if req.tagged {
            let records: Vec<Record> = matched
                .map(|(k, v)| record([("key", k.as_str()), ("value", v.as_str())]))
                .collect();
            return self.records(&records, String::new());
        }
        Reply::ok(matched.map(|(k, v)| format!("{k} = {v}\n")).collect::<String>())
    }

    fn render_diff(&self, left: (String, Vec<u8>), right: (String, Vec<u8>)) -> Reply {
        let from = String::from_utf8_lossy(&left.1);
        let to = String::from_utf8_lossy(&right.1);
        match unix_diff(&from, &to) {
            Ok(body) => Reply::ok(format!("==== {} - {} ====\n{body}", left.0, right.0)),
            Err(e) => Reply::fail(format!("{e}\n")),
        }
    }

    /// One file: its have revision against the workspace copy. Two files:
    /// each resolved as a depot revision or a workspace/local file.
    fn cmd_diff(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        match args.rest.as_slice() {
            &[file] => {
                let depot = self.to_depot(split_rev(file).0);
                let Some(&have) = self.have.get(&depot) else {
                    return Reply::fail(format!("{file} - file(s) not on client.\n"));
                };
                let base = self
                    .revision(&depot, RevSpec::Rev(have))
                    .map(|(_, r)| r.content.clone())
                    .unwrap_or_default();
                let local = self.workspace.get(&depot).cloned().unwrap_or_default();
                self.render_diff((format!("{depot}#{have}"), base), (self.local_path(&depot), local))
            }
            &[a, b] => {
                let Some(left) = self.content_of(a) else {
                    return Reply::fail(not_found(a));
                };
                let Some(right) = self.content_of(b) else {
                    return Reply::fail(not_found(b));
                };
                self.render_diff(left, right)
            }
            _ => Reply::fail("Usage: diff [ -d<flags> ] [files...]\n"),
        }
    }

    fn cmd_diff2(&self, req: &Request) -> Reply {
        let args = Args::parse(&req.args, &[]);
        let &[a, b] = args.rest.as_slice() else {
            return Reply::fail("Usage: diff2 file1 file2\n");
        };
        let side = |arg: &str| {
            let (path, spec) = split_rev(arg);
            let depot = self.to_depot(path);
            self.revision(&depot, spec)
                .filter(|(_, r)| !r.is_deleted())
                .map(|(rev, r)| (format!("{depot}#{rev} ({})", r.file_type), r.content.clone()))
        };
        let Some(left) = side(a) else {
            return Reply::fail(not_found(a));
        };
        let Some(right) = side(b) else {
            return Reply::fail(not_found(b));
        };
        let mut reply = self.render_diff(left, right);
        if reply.ok {
            reply.out = reply.out.replacen(" ====\n", " ==== content\n", 1);
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_diff_headers() {
        let body = unix_diff("a\nb\nc\n", "a\nx\nc\nd\n").unwrap();
        assert_eq!(body, "2c2\n< b\n---\n> x\n3a4\n> d\n");
        assert_eq!(unix_diff("a\nb\n", "b\n").unwrap(), "1d0\n< a\n");
        assert_eq!(unix_diff("", "").unwrap(), "");
    }

    #[test]
    fn forms_keep_blank_description_lines() {
        let form = "Change:\tnew\n\nClient:\tws\n\nDescription:\n\tfirst\n\t\n\tthird\n\nFiles:\n\t//depot/a\t# edit\n";
        let (fields, desc) = parse_form(form);
        assert_eq!(fields["Change"], "new");
        assert_eq!(fields["Client"], "ws");
        assert_eq!(desc, "first\n\nthird");
    }

    #[test]
    fn ancestors_exclude_the_file() {
        assert_eq!(ancestors("//depot/a/b.txt"), vec!["//depot", "//depot/a"]);
    }

    #[test]
    fn default_changelist_spelled_either_way() {
        assert_eq!(change_arg(None), Ok(0));
        assert_eq!(change_arg(Some("default")), Ok(0));
        assert_eq!(change_arg(Some("12")), Ok(12));
        assert!(change_arg(Some("twelve")).is_err());
    }
}
