//! Classify the command-line client's textual output into callbacks.
//!
//! With `-ztag` the client prints each record as `... key value` lines
//! (`... ... key value` for nested entries) followed by a blank line. Lines
//! that are not tagged are informational. A continuation line without a
//! prefix extends the previous value, which is how multi-line descriptions
//! arrive. `print` interleaves a record with the file payload, so it is
//! read in content mode.

use super::handler::Dispatch;
use super::{Protocol, Record};

const TAG: &str = "... ";

/// Feed one command's standard output into `dispatch`.
pub fn feed(text: &str, protocol: Protocol, content: bool, dispatch: &mut Dispatch<'_>) {
    match (protocol, content) {
        (Protocol::Default, _) => feed_plain(text, dispatch),
        (Protocol::Tagged, false) => feed_tagged(text, dispatch),
        (Protocol::Tagged, true) => feed_content(text, dispatch),
    }
}

/// Nesting depth and remainder of a line.
fn level_of(line: &str) -> (u8, &str) {
    let mut level = 0;
    let mut rest = line;
    while level < 2 {
        match rest.strip_prefix(TAG) {
            Some(r) => {
                rest = r;
                level += 1;
            }
            None => break,
        }
    }
    (level, rest)
}

fn split_tag(rest: &str) -> (&str, &str) {
    match rest.split_once(' ') {
        Some((k, v)) => (k, v),
        None => (rest, ""),
    }
}

fn feed_plain(text: &str, dispatch: &mut Dispatch<'_>) {
    for line in text.lines() {
        let (level, rest) = level_of(line);
        dispatch.info(level, rest);
    }
}

fn feed_tagged(text: &str, dispatch: &mut Dispatch<'_>) {
    for record in parse_records_with(text, |line| dispatch.info(0, line)) {
        dispatch.stat(&record);
    }
}

/// Split tagged output into records. Untagged lines outside a record go to
/// `on_info`.
///
/// A blank line closes the current record only once the next tagged line
/// arrives; an untagged line after blank lines continues the last value with
/// the blank lines kept, so multi-paragraph descriptions survive.
fn parse_records_with(text: &str, mut on_info: impl FnMut(&str)) -> Vec<Record> {
    let mut out = Vec::new();
    let mut current = Record::new();
    let mut last_key: Option<String> = None;
    let mut blanks = 0usize;

    for line in text.lines() {
        if line.is_empty() {
            blanks += 1;
            continue;
        }
        let (level, rest) = level_of(line);
        if level > 0 {
            if blanks > 0 && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            blanks = 0;
            let (key, value) = split_tag(rest);
            current.insert(key.to_string(), value.to_string());
            last_key = Some(key.to_string());
            continue;
        }
        match last_key.as_ref().and_then(|k| current.get_mut(k)) {
            Some(value) => {
                for _ in 0..=blanks {
                    value.push('\n');
                }
                value.push_str(line);
            }
            None => on_info(line),
        }
        blanks = 0;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Parse `-ztag` text into records, discarding untagged lines.
pub fn parse_records(text: &str) -> Vec<Record> {
    parse_records_with(text, |_| {})
}

fn flush_file(record: &mut Record, payload: &mut String, dispatch: &mut Dispatch<'_>) {
    if record.is_empty() {
        return;
    }
    let binary = record.get("type").is_some_and(|t| t.contains("binary"));
    dispatch.stat(record);
    if !payload.is_empty() {
        if binary {
            dispatch.binary(payload.as_bytes());
        } else {
            dispatch.text(payload.as_str());
        }
    }
    record.clear();
    payload.clear();
}

/// Split `print -ztag` output into stat records and their payloads.
///
/// The text stream carries no payload length, so the split is heuristic: a
/// payload line starting with `... depotFile ` opens a new record, and a
/// first payload line starting with `... ` is read as one more field of the
/// stat record. Exact payloads need the pooled path.
fn feed_content(text: &str, dispatch: &mut Dispatch<'_>) {
    let mut record = Record::new();
    let mut payload = String::new();
    let mut in_payload = false;

    for line in text.lines() {
        let starts_record = line.starts_with("... depotFile ");
        if starts_record && (in_payload || record.contains_key("depotFile")) {
            flush_file(&mut record, &mut payload, dispatch);
            in_payload = false;
        }
        if !in_payload && line.starts_with(TAG) {
            let (_, rest) = level_of(line);
            let (key, value) = split_tag(rest);
            record.insert(key.to_string(), value.to_string());
            continue;
        }
        if record.is_empty() {
            dispatch.info(0, line);
            continue;
        }
        in_payload = true;
        payload.push_str(line);
        payload.push('\n');
    }
    flush_file(&mut record, &mut payload, dispatch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::P4Result;
    use crate::core::tagged::handler::OutputHandler;

    #[derive(Default)]
    struct Capture {
        infos: Vec<(u8, String)>,
        stats: Vec<Record>,
        text: String,
        binary: Vec<u8>,
    }

    impl OutputHandler for Capture {
        fn output_binary(&mut self, data: &[u8]) -> P4Result<()> {
            self.binary.extend_from_slice(data);
            Ok(())
        }
        fn output_text(&mut self, data: &str) -> P4Result<()> {
            self.text.push_str(data);
            Ok(())
        }
        fn output_info(&mut self, level: u8, info: &str) -> P4Result<()> {
            self.infos.push((level, info.to_string()));
            Ok(())
        }
        fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
            self.stats.push(stats.clone());
            Ok(())
        }
    }

    fn run(text: &str, protocol: Protocol, content: bool) -> Capture {
        let mut cap = Capture::default();
        let mut d = Dispatch::new(&mut cap);
        feed(text, protocol, content, &mut d);
        d.finish().unwrap();
        cap
    }

    #[test]
    fn tagged_records_split_on_blank_lines() {
        let text = "... depotFile //a\n... headRev 3\n... ... otherOpen0 bob@ws\n\n... depotFile //b\n\n";
        let cap = run(text, Protocol::Tagged, false);
        assert_eq!(cap.stats.len(), 2);
        assert_eq!(cap.stats[0]["headRev"], "3");
        assert_eq!(cap.stats[0]["otherOpen0"], "bob@ws");
        assert_eq!(cap.stats[1]["depotFile"], "//b");
    }

    #[test]
    fn continuation_extends_value() {
        let text = "... change 12\n... desc first line\nsecond line\n... status pending\n";
        let recs = parse_records(text);
        assert_eq!(recs[0]["desc"], "first line\nsecond line");
        assert_eq!(recs[0]["status"], "pending");
    }

    #[test]
    fn paragraphs_stay_in_one_value() {
        let text = "... change 7\n... desc Summary\n\nDetails here\n\n... change 8\n... desc Next\n\n";
        let recs = parse_records(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["desc"], "Summary\n\nDetails here");
        assert_eq!(recs[1]["change"], "8");
    }

    #[test]
    fn untagged_lines_are_info() {
        let cap = run("ABCDEF0123\n... TicketExpiration 43200\n", Protocol::Tagged, false);
        assert_eq!(cap.infos, vec![(0, "ABCDEF0123".to_string())]);
        assert_eq!(cap.stats[0]["TicketExpiration"], "43200");
    }

    #[test]
    fn plain_lines_keep_levels() {
        let cap = run("//depot/a\n... rev 3\n... ... other x\n", Protocol::Default, false);
        assert_eq!(
            cap.infos,
            vec![
                (0, "//depot/a".to_string()),
                (1, "rev 3".to_string()),
                (2, "other x".to_string())
            ]
        );
    }

    #[test]
    fn content_mode_pairs_stat_with_payload() {
        let text = "... depotFile //a.txt\n... type text\nhello\nworld\n... depotFile //b.bin\n... type binary\nBIN\n";
        let cap = run(text, Protocol::Tagged, true);
        assert_eq!(cap.stats.len(), 2);
        assert_eq!(cap.text, "hello\nworld\n");
        assert_eq!(cap.binary, b"BIN\n");
    }

    #[test]
    fn content_mode_tag_lines_are_ambiguous() {
        let text = "... depotFile //a.txt\n... type text\nbody\n... note kept\n";
        let cap = run(text, Protocol::Tagged, true);
        assert_eq!(cap.stats.len(), 1);
        assert_eq!(cap.text, "body\n... note kept\n");

        let text = "... depotFile //a.txt\n... type text\n... looks tagged\nrest\n";
        let cap = run(text, Protocol::Tagged, true);
        assert_eq!(cap.stats[0].get("looks").map(String::as_str), Some("tagged"));
        assert_eq!(cap.text, "rest\n");

        let text = "... depotFile //a.txt\n... type text\nbody\n... depotFile //b.txt\n";
        let cap = run(text, Protocol::Tagged, true);
        assert_eq!(cap.stats.len(), 2);
        assert_eq!(cap.text, "body\n");
    }
}
