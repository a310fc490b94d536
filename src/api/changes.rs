//! Changelist lifecycle: create, update, list, describe, submit, shelve.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::{debug, instrument};

use super::types::{Change, Description, FileAction, SyncedFile};
use super::{Perforce, RecordList, format_date};
use crate::core::error::{P4Error, P4Result};

/// Spec text sent to `change -i` for a brand new changelist.
fn new_change_spec(client: &str, user: &str, desc: &str) -> String {
    let mut spec = String::new();
    let _ = write!(
        spec,
        "Change:\tnew\n\nClient:\t{client}\n\nUser:\t{user}\n\nStatus:\tnew\n\nDescription:\n"
    );
    for line in desc.split('\n') {
        let _ = writeln!(spec, "\t{line}");
    }
    spec
}

/// Changelist number from `Change 123 created.`.
fn parse_created(output: &str) -> P4Result<u32> {
    let first = output.split('\n').next().unwrap_or_default();
    let words: Vec<&str> = first.split(' ').collect();
    if words.len() >= 3 && words[0] == "Change" {
        return words[1]
            .parse()
            .map_err(|_| P4Error::parse(first, "couldn't find CL number"));
    }
    Err(P4Error::parse(first, "couldn't find CL number"))
}

/// Replace the description block of `change -o` output with `desc`.
fn replace_description(form: &str, desc: &str) -> String {
    let mut out = String::new();
    let mut copy = true;
    for line in form.split('\n') {
        if line.starts_with("Description:") {
            let _ = writeln!(out, "{line}");
            for new_line in desc.split('\n') {
                let _ = writeln!(out, "\t{new_line}");
            }
            copy = false;
            continue;
        }
        copy = copy || !line.starts_with('\t');
        if copy {
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

/// Fail if any synced file is newer than its revision in the changelist.
/// Files absent from the workspace are not checked.
pub fn verify_cl(cl_files: &[FileAction], client_files: &[SyncedFile]) -> P4Result<()> {
    let have: HashMap<&str, u32> = client_files
        .iter()
        .map(|f| (f.depot_path.as_str(), f.revision))
        .collect();
    for file in cl_files {
        if let Some(&rev) = have.get(file.depot_path.as_str()) {
            if rev > file.revision {
                return Err(P4Error::OutOfDate {
                    path: file.depot_path.clone(),
                    have: rev,
                    change_rev: file.revision,
                });
            }
        }
    }
    Ok(())
}

impl Perforce {
    /// Create a pending changelist owned by the current user and client.
    pub fn change(&self, desc: &str) -> P4Result<u32> {
        let info = self.info()?;
        let spec = new_change_spec(&info.client, &info.user, desc);
        let out = self.exec_with_stdin(&["change", "-i"], spec.into_bytes())?;
        parse_created(&out)
    }

    /// Replace the description of `cl`, leaving every other field alone.
    pub fn change_update(&self, desc: &str, cl: u32) -> P4Result<()> {
        let form = self.exec_cmd(&["change", "-o", &cl.to_string()])?;
        let updated = replace_description(&form, desc);
        self.exec_with_stdin(&["change", "-i"], updated.into_bytes())?;
        Ok(())
    }

    /// Delete an empty pending changelist.
    pub fn delete_change(&self, cl: u32) -> P4Result<String> {
        self.exec_cmd(&["change", "-d", &cl.to_string()])
    }

    /// `changes <args>` as typed records.
    pub fn changes<S: AsRef<str>>(&self, args: &[S]) -> P4Result<Vec<Change>> {
        let mut cb = RecordList::<Change>::default();
        self.run_handler("changes", args.iter().map(|a| a.as_ref().to_string()), &mut cb)?;
        let mut changes = cb.items;
        for c in &mut changes {
            c.date = format_date(c.time);
        }
        Ok(changes)
    }

    pub fn describe(&self, cls: &[u32]) -> P4Result<Vec<Description>> {
        self.run_describe(Vec::new(), cls)
    }

    /// `describe -S`: the shelved files of each changelist.
    pub fn describe_shelved(&self, cls: &[u32]) -> P4Result<Vec<Description>> {
        self.run_describe(vec!["-S".to_string()], cls)
    }

    fn run_describe(&self, mut args: Vec<String>, cls: &[u32]) -> P4Result<Vec<Description>> {
        args.extend(cls.iter().map(u32::to_string));
        let mut cb = RecordList::<Description>::default();
        self.run_handler("describe", args, &mut cb)?;
        let mut descs = cb.items;
        for d in &mut descs {
            d.date = format_date(d.time);
        }
        Ok(descs)
    }

    pub fn submit<S: AsRef<str>>(&self, cl: u32, options: &[S]) -> P4Result<String> {
        let mut args = vec!["submit".to_string(), "-c".into(), cl.to_string()];
        args.extend(options.iter().map(|o| o.as_ref().to_string()));
        self.exec_cmd(&args)
    }

    /// `unshelve -s <cl> <args>`; pass `-c` in `args` to target another
    /// changelist than the default one.
    pub fn unshelve<S: AsRef<str>>(&self, cl: u32, args: &[S]) -> P4Result<String> {
        let mut cmd = vec!["unshelve".to_string(), "-s".into(), cl.to_string()];
        cmd.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.exec_cmd(&cmd)
    }

    /// Force-unshelve `cl` after checking that no workspace file is newer
    /// than the shelved revision it would overwrite.
    #[instrument(skip(self))]
    pub fn verified_unshelve(&self, cl: u32) -> P4Result<String> {
        let describes = self.describe_shelved(&[cl])?;
        let Some(describe) = describes.first() else {
            return Err(P4Error::parse(
                format!("describe -S {cl}"),
                "one shelved changelist",
            ));
        };
        let patterns: Vec<&str> = describe
            .files
            .iter()
            .map(|f| f.depot_path.as_str())
            .collect();
        let client_files = if patterns.is_empty() {
            Vec::new()
        } else {
            self.have(&patterns)?
        };
        verify_cl(&describe.files, &client_files)?;
        debug!(files = patterns.len(), "shelf verified");
        self.unshelve(cl, &["-f"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_spec_indents_description() {
        let spec = new_change_spec("ws", "alice", "Fix build\n\nDetails");
        assert_eq!(
            spec,
            "Change:\tnew\n\nClient:\tws\n\nUser:\talice\n\nStatus:\tnew\n\nDescription:\n\tFix build\n\t\n\tDetails\n"
        );
    }

    #[test]
    fn created_number_parsed_from_first_line() {
        assert_eq!(parse_created("Change 1234 created.\n").unwrap(), 1234);
        assert!(parse_created("Changelist saved.\n").is_err());
        assert!(parse_created("").is_err());
    }

    #[test]
    fn description_block_replaced_verbatim() {
        let form = "Change:\t12\n\nClient:\tws\n\nStatus:\tpending\n\nDescription:\n\told one\n\told two\n\nFiles:\n\t//depot/a.txt\t# edit\n";
        let got = replace_description(form, "new text\nsecond");
        assert_eq!(
            got,
            "Change:\t12\n\nClient:\tws\n\nStatus:\tpending\n\nDescription:\n\tnew text\n\tsecond\n\nFiles:\n\t//depot/a.txt\t# edit\n\n"
        );
    }

    #[test]
    fn newer_workspace_file_blocks_unshelve() {
        let cl_files = vec![FileAction {
            depot_path: "//depot/a.txt".into(),
            revision: 3,
            ..FileAction::default()
        }];
        let have = vec![SyncedFile {
            depot_path: "//depot/a.txt".into(),
            local_path: "/ws/a.txt".into(),
            revision: 4,
        }];
        let err = verify_cl(&cl_files, &have).unwrap_err();
        assert!(err.to_string().contains("//depot/a.txt is newer than CL: rev 4 vs CL 3"));
        assert!(verify_cl(&cl_files, &[]).is_ok());
    }
}
