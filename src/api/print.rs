//! File contents and depot/local path lookups.

use super::types::FileDetails;
use super::Perforce;
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::{OutputHandler, Protocol, Record, from_record};

/// Collects one [`FileDetails`] per stat record and appends payload chunks
/// to the most recent one.
#[derive(Default)]
struct FileContents {
    files: Vec<FileDetails>,
}

impl OutputHandler for FileContents {
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        self.files.push(from_record(stats));
        Ok(())
    }

    fn output_binary(&mut self, data: &[u8]) -> P4Result<()> {
        let last = self
            .files
            .last_mut()
            .ok_or_else(|| P4Error::parse(String::from_utf8_lossy(data), "expected stats before payload"))?;
        last.content.extend_from_slice(data);
        Ok(())
    }

    fn output_text(&mut self, data: &str) -> P4Result<()> {
        self.output_binary(data.as_bytes())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.files.clear();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

/// Collects the local `path` of every `where` record.
#[derive(Default)]
struct LocalPaths {
    paths: Vec<String>,
}

impl OutputHandler for LocalPaths {
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        let path = stats
            .get("path")
            .ok_or_else(|| P4Error::parse(format!("{stats:?}"), "a 'path' field"))?;
        self.paths.push(path.clone());
        Ok(())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.paths.clear();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

impl Perforce {
    /// `print <args>` as the client prints it, headers included.
    pub fn print<S: AsRef<str>>(&self, args: &[S]) -> P4Result<String> {
        let mut cmd = vec!["print".to_string()];
        cmd.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.exec_cmd(&cmd)
    }

    /// Metadata and content of each file. A missing file fails the whole
    /// call with [`P4Error::NotFound`].
    pub fn print_ex<S: AsRef<str>>(&self, files: &[S]) -> P4Result<Vec<FileDetails>> {
        self.collect_files("print", files)
    }

    /// Metadata of each file revision, without content.
    pub fn files<S: AsRef<str>>(&self, files: &[S]) -> P4Result<Vec<FileDetails>> {
        self.collect_files("files", files)
    }

    fn collect_files<S: AsRef<str>>(&self, command: &str, files: &[S]) -> P4Result<Vec<FileDetails>> {
        let mut cb = FileContents::default();
        self.run_handler(command, files.iter().map(|f| f.as_ref().to_string()), &mut cb)
            .map_err(|e| e.classify(None))?;
        Ok(cb.files)
    }

    /// Local path of one depot or client path.
    pub fn where_(&self, path: &str) -> P4Result<String> {
        let mut cb = LocalPaths::default();
        self.run_handler("where", [path], &mut cb)?;
        cb.paths
            .pop()
            .ok_or_else(|| P4Error::parse(path, "p4 where: a mapped path"))
    }

    /// Local paths of several files, in server order.
    pub fn where_ex<S: AsRef<str>>(&self, paths: &[S]) -> P4Result<Vec<String>> {
        let mut cb = LocalPaths::default();
        self.run_handler("where", paths.iter().map(|p| p.as_ref().to_string()), &mut cb)?;
        Ok(cb.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tagged::Dispatch;
    use crate::core::tagged::classify::feed;

    #[test]
    fn payload_attaches_to_latest_stat() {
        let mut cb = FileContents::default();
        {
            let mut d = Dispatch::new(&mut cb);
            let text = "... depotFile //depot/a.txt\n... rev 2\n... type text\nline one\nline two\n... depotFile //depot/b.bin\n... rev 1\n... type binary\nBIN\n";
            feed(text, Protocol::Tagged, true, &mut d);
            d.finish().unwrap();
        }
        assert_eq!(cb.files.len(), 2);
        assert_eq!(cb.files[0].rev, 2);
        assert_eq!(cb.files[0].content, b"line one\nline two\n");
        assert_eq!(cb.files[1].file_type, "binary");
        assert_eq!(cb.files[1].content, b"BIN\n");
    }

    #[test]
    fn payload_before_stat_is_an_error() {
        let mut cb = FileContents::default();
        let err = cb.output_text("orphan").unwrap_err();
        assert!(err.to_string().contains("expected stats before payload"));
    }
}
