//! Typed records returned by the depot API.
//!
//! Records that arrive as tagged output carry a [`Tagged`] schema mapping
//! server keys onto fields; the rest are built by the text parsers of the
//! operation that produces them.

use std::sync::LazyLock;

use serde::Serialize;

use crate::core::tagged::{Schema, Tagged};

/// A name that is not part of a fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("couldn't find {kind} {name}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $ty:ident, $kind:literal { $($variant:ident => $name:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $ty {
            $($variant),+
        }

        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = $crate::api::types::UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == s)
                    .ok_or_else(|| $crate::api::types::UnknownName { kind: $kind, name: s.to_string() })
            }
        }

        impl ::serde::Serialize for $ty {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }
    };
}

pub(crate) use named_enum;

named_enum!(
    /// What was done to a file in a changelist.
    ActionType, "action" {
        Add => "add",
        Archive => "archive",
        Branch => "branch",
        Delete => "delete",
        Edit => "edit",
        Integrate => "integrate",
        MoveAdd => "move/add",
        MoveDelete => "move/delete",
        Purge => "purge",
    }
);

named_enum!(
    /// Base storage type of a depot file.
    FileType, "file type" {
        Text => "text",
        Binary => "binary",
        Symlink => "symlink",
        Apple => "apple",
        Resource => "resource",
        Unicode => "unicode",
        Utf8 => "utf8",
        Utf16 => "utf16",
    }
);

named_enum!(
    /// Kind of a `diff`/`diff2` chunk.
    DiffType, "diff type" {
        Unknown => "unknown",
        Add => "add",
        Change => "edit",
        Delete => "delete",
        Integrate => "integrate",
    }
);

/// One changelist as listed by `changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Change {
    pub cl: u32,
    pub user: String,
    pub client: String,
    /// `YYYY/MM/DD hh:mm:ss` in UTC, derived from `time`.
    pub date: String,
    pub time: i64,
    pub description: String,
    pub status: String,
}

impl Tagged for Change {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: LazyLock<Schema<Change>> = LazyLock::new(|| {
            Schema::new()
                .tagged("change", |c: &mut Change| &mut c.cl)
                .tagged("user", |c: &mut Change| &mut c.user)
                .tagged("client", |c: &mut Change| &mut c.client)
                .tagged("time", |c: &mut Change| &mut c.time)
                .tagged("desc", |c: &mut Change| &mut c.description)
                .tagged("status", |c: &mut Change| &mut c.status)
        });
        &SCHEMA
    }
}

/// A file revision touched by a changelist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileAction {
    pub depot_path: String,
    pub revision: u32,
    pub action: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub from_file: String,
    pub from_rev: u32,
    pub digest: String,
    pub size: u64,
}

impl Tagged for FileAction {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: LazyLock<Schema<FileAction>> = LazyLock::new(|| {
            Schema::new()
                .tagged("depotFile", |f: &mut FileAction| &mut f.depot_path)
                .tagged("rev", |f: &mut FileAction| &mut f.revision)
                .tagged("action", |f: &mut FileAction| &mut f.action)
                .tagged("type", |f: &mut FileAction| &mut f.file_type)
                .tagged("fromFile", |f: &mut FileAction| &mut f.from_file)
                .tagged("fromRev", |f: &mut FileAction| &mut f.from_rev)
                .tagged("digest", |f: &mut FileAction| &mut f.digest)
                .tagged("fileSize", |f: &mut FileAction| &mut f.size)
        });
        &SCHEMA
    }
}

/// Result of `describe`: the changelist plus its files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Description {
    pub cl: u32,
    pub user: String,
    pub client: String,
    pub date: String,
    pub time: i64,
    pub description: String,
    pub status: String,
    pub shelved: bool,
    pub files: Vec<FileAction>,
}

impl Tagged for Description {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: LazyLock<Schema<Description>> = LazyLock::new(|| {
            Schema::new()
                .tagged("change", |d: &mut Description| &mut d.cl)
                .tagged("user", |d: &mut Description| &mut d.user)
                .tagged("client", |d: &mut Description| &mut d.client)
                .tagged("time", |d: &mut Description| &mut d.time)
                .tagged("desc", |d: &mut Description| &mut d.description)
                .tagged("status", |d: &mut Description| &mut d.status)
                .tagged("shelved", |d: &mut Description| &mut d.shelved)
                .group(
                    "[depotFile,action,type,rev,digest,fromFile,fromRev]",
                    |d: &mut Description| &mut d.files,
                )
        });
        &SCHEMA
    }
}

/// Per-file metadata from `fstat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub action: String,
    pub action_owner: String,
    pub change: u32,
    pub charset: String,
    pub client_file: String,
    pub depot_file: String,
    pub digest: String,
    pub file_size: u64,
    pub have_rev: u32,
    pub head_action: String,
    pub head_change: u32,
    pub head_charset: String,
    pub head_mod_time: i64,
    pub head_rev: u32,
    pub head_time: i64,
    pub head_type: String,
    pub is_mapped: bool,
    pub moved_file: String,
    pub moved_rev: u32,
    pub other_actions: Vec<String>,
    pub other_changes: Vec<u32>,
    pub other_lock0: bool,
    pub other_lock_owner: String,
    pub other_open: i32,
    pub other_opens: Vec<String>,
    pub our_lock: bool,
    pub path: String,
    pub reresolvable: i32,
    pub resolve_actions: Vec<String>,
    pub resolve_base_files: Vec<String>,
    pub resolve_base_revisions: Vec<u32>,
    pub resolve_from_files: Vec<String>,
    pub resolve_start_from_revs: Vec<u32>,
    pub resolve_end_from_revs: Vec<u32>,
    pub resolved: i32,
    pub revtime: i64,
    pub shelved: bool,
    #[serde(rename = "type")]
    pub file_type: String,
    pub unresolved: i32,
    pub work_rev: u32,
}

impl FileStat {
    /// Users and workspaces that have this file open elsewhere.
    pub fn other_users(&self) -> Vec<UserClient> {
        self.other_opens.iter().map(|s| UserClient::parse(s)).collect()
    }
}

impl Tagged for FileStat {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: LazyLock<Schema<FileStat>> = LazyLock::new(|| {
            Schema::new()
                .field("Action", |f: &mut FileStat| &mut f.action)
                .field("ActionOwner", |f: &mut FileStat| &mut f.action_owner)
                .field("Change", |f: &mut FileStat| &mut f.change)
                .field("Charset", |f: &mut FileStat| &mut f.charset)
                .field("ClientFile", |f: &mut FileStat| &mut f.client_file)
                .field("DepotFile", |f: &mut FileStat| &mut f.depot_file)
                .field("Digest", |f: &mut FileStat| &mut f.digest)
                .field("FileSize", |f: &mut FileStat| &mut f.file_size)
                .field("HaveRev", |f: &mut FileStat| &mut f.have_rev)
                .field("HeadAction", |f: &mut FileStat| &mut f.head_action)
                .field("HeadChange", |f: &mut FileStat| &mut f.head_change)
                .field("HeadCharset", |f: &mut FileStat| &mut f.head_charset)
                .field("HeadModTime", |f: &mut FileStat| &mut f.head_mod_time)
                .field("HeadRev", |f: &mut FileStat| &mut f.head_rev)
                .field("HeadTime", |f: &mut FileStat| &mut f.head_time)
                .field("HeadType", |f: &mut FileStat| &mut f.head_type)
                .field("IsMapped", |f: &mut FileStat| &mut f.is_mapped)
                .field("MovedFile", |f: &mut FileStat| &mut f.moved_file)
                .field("MovedRev", |f: &mut FileStat| &mut f.moved_rev)
                .list_tagged("[otherAction]", |f: &mut FileStat| &mut f.other_actions)
                .list_tagged("[otherChange]", |f: &mut FileStat| &mut f.other_changes)
                .field("OtherLock0", |f: &mut FileStat| &mut f.other_lock0)
                .field("OtherLockOwner", |f: &mut FileStat| &mut f.other_lock_owner)
                .field("OtherOpen", |f: &mut FileStat| &mut f.other_open)
                .list_tagged("[otherOpen]", |f: &mut FileStat| &mut f.other_opens)
                .field("OurLock", |f: &mut FileStat| &mut f.our_lock)
                .field("Path", |f: &mut FileStat| &mut f.path)
                .field("Reresolvable", |f: &mut FileStat| &mut f.reresolvable)
                .list_tagged("[resolveAction]", |f: &mut FileStat| &mut f.resolve_actions)
                .list_tagged("[resolveBaseFile]", |f: &mut FileStat| &mut f.resolve_base_files)
                .list_tagged("[resolveBaseRevision]", |f: &mut FileStat| &mut f.resolve_base_revisions)
                .list_tagged("[resolveFromFile]", |f: &mut FileStat| &mut f.resolve_from_files)
                .list_tagged("[resolveStartFromRev]", |f: &mut FileStat| &mut f.resolve_start_from_revs)
                .list_tagged("[resolveEndFromRev]", |f: &mut FileStat| &mut f.resolve_end_from_revs)
                .field("Resolved", |f: &mut FileStat| &mut f.resolved)
                .field("Revtime", |f: &mut FileStat| &mut f.revtime)
                .field("Shelved", |f: &mut FileStat| &mut f.shelved)
                .field("Type", |f: &mut FileStat| &mut f.file_type)
                .field("Unresolved", |f: &mut FileStat| &mut f.unresolved)
                .field("WorkRev", |f: &mut FileStat| &mut f.work_rev)
        });
        &SCHEMA
    }
}

/// `fstat` output: per-file records, plus the changelist description when
/// the query was scoped with `-e`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FstatResult {
    pub file_stats: Vec<FileStat>,
    pub desc: String,
}

/// File revision from `files` or `print`; `content` is filled by `print`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDetails {
    pub directory: String,
    pub depot_file: String,
    pub rev: u32,
    pub change: u32,
    pub action: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub time: i64,
    pub file_size: u64,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl Tagged for FileDetails {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: LazyLock<Schema<FileDetails>> = LazyLock::new(|| {
            Schema::new()
                .field("Directory", |f: &mut FileDetails| &mut f.directory)
                .field("DepotFile", |f: &mut FileDetails| &mut f.depot_file)
                .field("Rev", |f: &mut FileDetails| &mut f.rev)
                .field("Change", |f: &mut FileDetails| &mut f.change)
                .field("Action", |f: &mut FileDetails| &mut f.action)
                .tagged("type", |f: &mut FileDetails| &mut f.file_type)
                .field("Time", |f: &mut FileDetails| &mut f.time)
                .field("FileSize", |f: &mut FileDetails| &mut f.file_size)
        });
        &SCHEMA
    }
}

/// A depot file as synced into the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncedFile {
    pub depot_path: String,
    pub local_path: String,
    pub revision: u32,
}

/// One chunk header of a classic unix diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffChunk {
    pub left_start: u32,
    pub left_end: u32,
    pub right_start: u32,
    pub right_end: u32,
    pub diff_type: DiffType,
}

/// One line matched by `grep`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrepMatch {
    pub depot_path: String,
    pub revision: u32,
    pub line_number: u32,
    pub contents: String,
}

/// Session details from `info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Info {
    pub user: String,
    pub client: String,
    pub host: String,
    pub root: String,
}

/// File count and bytes under one depot path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Size {
    pub depot_path: String,
    pub file_count: u64,
    pub file_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizeCollection {
    pub sizes: Vec<Size>,
    pub total_file_count: u64,
    pub total_file_size: u64,
}

/// A file opened in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedFile {
    pub path: String,
    pub status: ActionType,
    /// 0 for the default changelist.
    pub cl: u32,
    /// `None` for types outside [`FileType`], e.g. `text+x` modifiers.
    pub file_type: Option<FileType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub name: String,
    pub user: String,
    pub id: String,
}

/// Estimate printed by `sync -N`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSize {
    pub files_added: i64,
    pub files_updated: i64,
    pub files_deleted: i64,
    pub bytes_added: i64,
    pub bytes_deleted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct User {
    pub user: String,
    pub email: String,
    pub name: String,
    pub accessed: String,
}

/// `user@client` pairing as reported in `otherOpen` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserClient {
    pub user: String,
    pub client: String,
}

impl UserClient {
    /// Split `user@client`; anything without an `@` yields empty fields.
    pub fn parse(combined: &str) -> Self {
        match combined.split_once('@') {
            Some((user, client)) => Self {
                user: user.to_string(),
                client: client.to_string(),
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tagged::{Record, from_record};

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn names_round_trip() {
        for a in ActionType::ALL {
            assert_eq!(a.name().parse::<ActionType>().unwrap(), *a);
        }
        assert_eq!("move/add".parse::<ActionType>().unwrap(), ActionType::MoveAdd);
        assert_eq!(DiffType::Change.to_string(), "edit");
        let err = "copy".parse::<ActionType>().unwrap_err();
        assert_eq!(err.to_string(), "couldn't find action copy");
    }

    #[test]
    fn describe_record_binds_file_group() {
        let rec = record(&[
            ("change", "120"),
            ("user", "alice"),
            ("status", "pending"),
            ("shelved", ""),
            ("depotFile0", "//depot/a.txt"),
            ("action0", "edit"),
            ("rev0", "3"),
            ("depotFile1", "//depot/b.txt"),
            ("action1", "add"),
            ("rev1", "1"),
            ("fileSize1", "99"),
        ]);
        let d: Description = from_record(&rec);
        assert_eq!(d.cl, 120);
        assert!(d.shelved);
        assert_eq!(d.files.len(), 2);
        assert_eq!(d.files[0].revision, 3);
        assert_eq!(d.files[1].action, "add");
        assert_eq!(d.files[1].size, 0);
    }

    #[test]
    fn fstat_record_binds_lists_and_flags() {
        let rec = record(&[
            ("depotFile", "//depot/a.txt"),
            ("headRev", "7"),
            ("otherOpen", "2"),
            ("otherOpen1", "carol@ws2"),
            ("otherOpen0", "bob@ws1"),
            ("otherLock0", ""),
            ("resolveBaseRevision2", "4"),
        ]);
        let fs: FileStat = from_record(&rec);
        assert_eq!(fs.head_rev, 7);
        assert_eq!(fs.other_open, 2);
        assert!(fs.other_lock0);
        assert_eq!(fs.other_users()[1], UserClient::parse("carol@ws2"));
        assert_eq!(fs.resolve_base_revisions, vec![0, 0, 4]);
    }
}
