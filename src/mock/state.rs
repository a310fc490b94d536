//! Depot, workspace and bookkeeping behind a [`MockServer`](super::MockServer).

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use regex::Regex;

use super::{Call, MOCK_CLIENT, MOCK_HOST, MOCK_USER};
use crate::api::Client;
use crate::core::error::{P4Error, P4Result};
use crate::core::exec::{Credentials, Invocation};
use crate::core::tagged::Record;

pub(super) const DEPOT_ROOT: &str = "//depot/";

/// First timestamp handed out; every event advances the clock a minute.
const EPOCH: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub(super) struct Revision {
    pub change: u32,
    pub action: String,
    pub file_type: String,
    pub content: Vec<u8>,
    pub time: i64,
}

impl Revision {
    pub fn is_deleted(&self) -> bool {
        self.action == "delete" || self.action == "move/delete"
    }
}

#[derive(Debug, Clone)]
pub(super) struct OpenFile {
    pub cl: u32,
    pub action: String,
    pub file_type: String,
    /// Source of a `move/add`.
    pub moved_from: Option<String>,
}

#[derive(Debug, Clone)]
pub(super) struct ShelvedFile {
    pub rev: u32,
    pub action: String,
    pub file_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(super) struct ChangeRec {
    pub user: String,
    pub client: String,
    pub desc: String,
    pub status: String,
    pub time: i64,
    pub shelved: BTreeMap<String, ShelvedFile>,
}

/// Revision selector trailing a file argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RevSpec {
    Head,
    Have,
    Rev(u32),
    /// Latest revision submitted at or before a changelist.
    AtChange(u32),
}

/// Split `path#rev` / `path@change` into the path and its selector.
pub(super) fn split_rev(arg: &str) -> (&str, RevSpec) {
    if let Some((path, rev)) = arg.rsplit_once('#') {
        let spec = match rev {
            "head" => RevSpec::Head,
            "have" => RevSpec::Have,
            n => RevSpec::Rev(n.parse().unwrap_or(0)),
        };
        return (path, spec);
    }
    if let Some((path, change)) = arg.rsplit_once('@') {
        if let Ok(cl) = change.parse() {
            return (path, RevSpec::AtChange(cl));
        }
    }
    (arg, RevSpec::Head)
}

/// Compile a depot wildcard: `...` spans directories, `*` does not.
pub(super) fn wildcard(pattern: &str) -> Result<Regex, String> {
    let mut re = String::from("^");
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        if let Some(r) = rest.strip_prefix("...") {
            re.push_str(".*");
            rest = r;
        } else if let Some(r) = rest.strip_prefix('*') {
            re.push_str("[^/]*");
            rest = r;
        } else {
            re.push_str(&regex::escape(&c.to_string()));
            rest = &rest[c.len_utf8()..];
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| format!("{pattern} - bad wildcard: {e}"))
}

pub(super) fn not_found(arg: &str) -> String {
    format!("{arg} - no such file(s).\n")
}

/// Render records the way `-ztag` prints them.
pub(super) fn render_records(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        for (key, value) in record {
            out.push_str("... ");
            out.push_str(key);
            out.push(' ');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub(super) fn record<K: Into<String>, V: ToString>(pairs: impl IntoIterator<Item = (K, V)>) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect()
}

/// File type guessed from content.
pub(super) fn type_of(content: &[u8]) -> &'static str {
    if content.contains(&0) { "binary" } else { "text" }
}

/// One parsed command.
#[derive(Debug, Clone)]
pub(super) struct Request {
    /// Credential override; `None` runs as the session user.
    pub user: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub tagged: bool,
}

impl Request {
    /// Read `inv` as the server would: `-x <file>` arguments are appended
    /// one per line.
    pub fn from_invocation(inv: &Invocation, credentials: Option<&Credentials>, tagged: bool) -> P4Result<Self> {
        let mut args = inv.args.clone();
        let mut globals = inv.global_args.iter();
        while let Some(arg) = globals.next() {
            if arg != "-x" {
                continue;
            }
            let Some(path) = globals.next() else {
                break;
            };
            let text = std::fs::read_to_string(path).map_err(|e| P4Error::io(format!("reading {path}"), e))?;
            args.extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
        }
        Ok(Self {
            user: credentials
                .filter(|c| !c.user.is_empty())
                .map(|c| c.user.clone()),
            command: inv.command.clone(),
            args,
            stdin: inv.stdin.clone(),
            tagged,
        })
    }

    pub fn line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .join(" ")
    }
}

/// Reply to one command: standard output, error text and exit status.
#[derive(Debug, Clone, Default)]
pub(super) struct Reply {
    pub out: String,
    pub err: String,
    pub ok: bool,
}

impl Reply {
    pub fn ok(out: impl Into<String>) -> Self {
        Self {
            out: out.into(),
            err: String::new(),
            ok: true,
        }
    }

    pub fn fail(err: impl Into<String>) -> Self {
        Self {
            out: String::new(),
            err: err.into(),
            ok: false,
        }
    }

    /// Successful reply that still carries per-file warnings.
    pub fn with_warnings(out: String, warnings: String) -> Self {
        Self {
            out,
            err: warnings,
            ok: true,
        }
    }
}

/// Flags before the first positional argument. Flags listed in `valued`
/// consume the following argument.
pub(super) struct Args<'a> {
    flags: Vec<(&'a str, Option<&'a str>)>,
    pub rest: Vec<&'a str>,
}

impl<'a> Args<'a> {
    pub fn parse(args: &'a [String], valued: &[&str]) -> Self {
        let mut flags = Vec::new();
        let mut i = 0;
        while i < args.len() && args[i].starts_with('-') && args[i].len() > 1 {
            let flag = args[i].as_str();
            if valued.contains(&flag) {
                flags.push((flag, args.get(i + 1).map(String::as_str)));
                i += 2;
            } else {
                flags.push((flag, None));
                i += 1;
            }
        }
        Self {
            flags,
            rest: args[i.min(args.len())..].iter().map(String::as_str).collect(),
        }
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|(f, _)| *f == flag)
    }

    pub fn value(&self, flag: &str) -> Option<&'a str> {
        self.flags
            .iter()
            .find(|(f, _)| *f == flag)
            .and_then(|(_, v)| *v)
    }
}

#[derive(Debug)]
pub(super) struct State {
    pub user: String,
    pub client: String,
    pub host: String,
    pub root: String,
    pub clock: i64,
    pub next_change: u32,
    pub changes: BTreeMap<u32, ChangeRec>,
    pub depot: BTreeMap<String, Vec<Revision>>,
    pub have: BTreeMap<String, u32>,
    pub opened: BTreeMap<String, OpenFile>,
    pub workspace: BTreeMap<String, Vec<u8>>,
    pub keys: BTreeMap<String, String>,
    pub clients: BTreeMap<String, Client>,
    pub users: BTreeMap<String, String>,
    pub tickets: BTreeMap<String, String>,
    pub settings: BTreeMap<String, String>,
    pub ignored: Vec<String>,
    pub indexes: BTreeMap<(String, u32), BTreeSet<String>>,
    pub drops: u32,
    pub grep_limit: Option<u64>,
    pub grep_counts: Vec<u64>,
    pub calls: Vec<Call>,
}

impl State {
    pub fn new(root: String) -> Self {
        let mut users = BTreeMap::new();
        users.insert(MOCK_USER.to_string(), "Alice Example".to_string());
        Self {
            user: MOCK_USER.to_string(),
            client: MOCK_CLIENT.to_string(),
            host: MOCK_HOST.to_string(),
            root,
            clock: EPOCH,
            next_change: 1,
            changes: BTreeMap::new(),
            depot: BTreeMap::new(),
            have: BTreeMap::new(),
            opened: BTreeMap::new(),
            workspace: BTreeMap::new(),
            keys: BTreeMap::new(),
            clients: BTreeMap::new(),
            users,
            tickets: BTreeMap::new(),
            settings: BTreeMap::new(),
            ignored: Vec::new(),
            indexes: BTreeMap::new(),
            drops: 0,
            grep_limit: None,
            grep_counts: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn tick(&mut self) -> i64 {
        self.clock += 60;
        self.clock
    }

    pub fn user_of(&self, req: &Request) -> String {
        req.user.clone().unwrap_or_else(|| self.user.clone())
    }

    pub fn log(&mut self, req: &Request, pooled: bool) {
        self.calls.push(Call {
            user: self.user_of(req),
            line: req.line(),
            pooled,
        });
    }

    pub fn new_change(&mut self, user: String, client: String, desc: String) -> u32 {
        let cl = self.next_change;
        self.next_change += 1;
        let time = self.tick();
        self.changes.insert(
            cl,
            ChangeRec {
                user,
                client,
                desc,
                status: "pending".to_string(),
                time,
                shelved: BTreeMap::new(),
            },
        );
        cl
    }

    /// Submit one revision of `path` in its own changelist.
    pub fn seed(&mut self, path: &str, content: Vec<u8>, sync: bool) -> u32 {
        let depot = self.to_depot(path);
        let exists = self.head(&depot).is_some_and(|(_, r)| !r.is_deleted());
        let action = if exists { "edit" } else { "add" };
        let cl = self.new_change(self.user.clone(), self.client.clone(), format!("{action} {depot}"));
        let time = self.tick();
        if let Some(change) = self.changes.get_mut(&cl) {
            change.status = "submitted".to_string();
            change.time = time;
        }
        let revs = self.depot.entry(depot.clone()).or_default();
        revs.push(Revision {
            change: cl,
            action: action.to_string(),
            file_type: type_of(&content).to_string(),
            content: content.clone(),
            time,
        });
        let rev = revs.len() as u32;
        if sync {
            self.have.insert(depot.clone(), rev);
            self.workspace.insert(depot, content);
        }
        rev
    }

    /// Depot path for a depot, workspace or local path.
    pub fn to_depot(&self, path: &str) -> String {
        let path = path.replace('\\', "/");
        if path.starts_with("//") {
            let client_prefix = format!("//{}/", self.client);
            return match path.strip_prefix(&client_prefix) {
                Some(rest) => format!("{DEPOT_ROOT}{rest}"),
                None => path,
            };
        }
        let root = self.root.replace('\\', "/");
        let root = root.trim_end_matches('/');
        let rest = path.strip_prefix(root).unwrap_or(&path);
        format!("{DEPOT_ROOT}{}", rest.trim_start_matches('/'))
    }

    pub fn local_path(&self, depot: &str) -> String {
        let rest = depot.strip_prefix(DEPOT_ROOT).unwrap_or(depot.trim_start_matches('/'));
        format!("{}/{rest}", self.root.trim_end_matches('/'))
    }

    pub fn client_path(&self, depot: &str) -> String {
        let rest = depot.strip_prefix(DEPOT_ROOT).unwrap_or(depot.trim_start_matches('/'));
        format!("//{}/{rest}", self.client)
    }

    pub fn head(&self, path: &str) -> Option<(u32, &Revision)> {
        let revs = self.depot.get(path)?;
        revs.last().map(|r| (revs.len() as u32, r))
    }

    pub fn revision(&self, path: &str, spec: RevSpec) -> Option<(u32, &Revision)> {
        let revs = self.depot.get(path)?;
        let rev = match spec {
            RevSpec::Head => revs.len() as u32,
            RevSpec::Have => *self.have.get(path)?,
            RevSpec::Rev(n) => n,
            RevSpec::AtChange(cl) => revs.iter().take_while(|r| r.change <= cl).count() as u32,
        };
        let idx = (rev as usize).checked_sub(1)?;
        revs.get(idx).map(|r| (rev, r))
    }

    /// Depot files matching one argument, with the selected revision.
    /// Deleted revisions are skipped unless `deleted` is set.
    pub fn resolve(&self, arg: &str, deleted: bool) -> Result<Vec<(String, u32)>, String> {
        let (path, spec) = split_rev(arg);
        let re = wildcard(&self.to_depot(path))?;
        Ok(self
            .depot
            .keys()
            .filter(|p| re.is_match(p))
            .filter_map(|p| {
                let (rev, r) = self.revision(p, spec)?;
                (deleted || !r.is_deleted()).then(|| (p.clone(), rev))
            })
            .collect())
    }

    /// Opened files matching one argument.
    pub fn opened_matching(&self, arg: &str) -> Result<Vec<String>, String> {
        let (path, _) = split_rev(arg);
        let re = wildcard(&self.to_depot(path))?;
        Ok(self.opened.keys().filter(|p| re.is_match(p)).cloned().collect())
    }

    /// Revision a workspace file is based on; adds report `#1`.
    pub fn base_rev(&self, path: &str) -> u32 {
        self.have.get(path).copied().unwrap_or(1)
    }

    /// Changelist must be pending (or the default one) to receive files.
    pub fn check_pending(&self, cl: u32) -> Result<(), String> {
        if cl == 0 {
            return Ok(());
        }
        match self.changes.get(&cl) {
            Some(c) if c.status == "pending" => Ok(()),
            Some(_) => Err(format!("Change {cl} has been submitted.\n")),
            None => Err(format!("Change {cl} unknown.\n")),
        }
    }

    /// Depot or workspace content named by a diff argument.
    pub fn content_of(&self, arg: &str) -> Option<(String, Vec<u8>)> {
        let (path, spec) = split_rev(arg);
        let depot = self.to_depot(path);
        if path.starts_with("//") && !path.starts_with(&format!("//{}/", self.client)) {
            return self
                .revision(&depot, spec)
                .map(|(rev, r)| (format!("{depot}#{rev}"), r.content.clone()));
        }
        let content = self
            .workspace
            .get(&depot)
            .cloned()
            .or_else(|| std::fs::read(path).ok())?;
        Some((self.local_path(&depot), content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_respect_directories() {
        let re = wildcard("//depot/src/*").unwrap();
        assert!(re.is_match("//depot/src/a.rs"));
        assert!(!re.is_match("//depot/src/deep/a.rs"));
        let re = wildcard("//depot/...").unwrap();
        assert!(re.is_match("//depot/src/deep/a.rs"));
        assert!(wildcard("//depot/a+b.txt").unwrap().is_match("//depot/a+b.txt"));
    }

    #[test]
    fn paths_map_between_views() {
        let state = State::new("/ws".into());
        assert_eq!(state.to_depot("/ws/src/a.rs"), "//depot/src/a.rs");
        assert_eq!(state.to_depot("//alice-ws/src/a.rs"), "//depot/src/a.rs");
        assert_eq!(state.local_path("//depot/src/a.rs"), "/ws/src/a.rs");
        assert_eq!(split_rev("//depot/a#3"), ("//depot/a", RevSpec::Rev(3)));
        assert_eq!(split_rev("//depot/...@12"), ("//depot/...", RevSpec::AtChange(12)));
    }

    #[test]
    fn flags_stop_at_first_positional() {
        let args: Vec<String> = ["-c", "5", "-f", "//depot/a", "-x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let parsed = Args::parse(&args, &["-c"]);
        assert_eq!(parsed.value("-c"), Some("5"));
        assert!(parsed.has("-f"));
        assert_eq!(parsed.rest, vec!["//depot/a", "-x"]);
    }
}
