use super::types::{FileStat, FstatResult};
use super::Perforce;
use crate::core::error::P4Result;
use crate::core::tagged::{OutputHandler, Protocol, Record, from_record};

impl OutputHandler for FstatResult {
    /// A record carrying `desc` is the changelist summary (`fstat -e`);
    /// every other record is one file.
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        match stats.get("desc") {
            Some(desc) => self.desc = desc.trim().to_string(),
            None => self.file_stats.push(from_record::<FileStat>(stats)),
        }
        Ok(())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        *self = FstatResult::default();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

impl Perforce {
    /// `fstat <args>`, e.g. `["-Ol", "//depot/a.txt"]`.
    pub fn fstat<S: AsRef<str>>(&self, args: &[S]) -> P4Result<FstatResult> {
        let mut res = FstatResult::default();
        self.run_handler("fstat", args.iter().map(|a| a.as_ref().to_string()), &mut res)?;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn desc_record_sets_summary() {
        let mut res = FstatResult::default();
        res.output_stat(&record(&[("desc", "  Fix build\n")])).unwrap();
        res.output_stat(&record(&[
            ("depotFile", "//depot/a.txt"),
            ("headRev", "4"),
            ("otherOpen1", "bob@ws"),
            ("otherOpen0", "amy@lap"),
        ]))
        .unwrap();

        assert_eq!(res.desc, "Fix build");
        assert_eq!(res.file_stats.len(), 1);
        let stat = &res.file_stats[0];
        assert_eq!(stat.head_rev, 4);
        assert_eq!(stat.other_opens, vec!["amy@lap", "bob@ws"]);
        assert_eq!(stat.other_users()[1].client, "ws");
    }

    #[test]
    fn retry_discards_partial_records() {
        let mut res = FstatResult::default();
        res.output_stat(&record(&[("depotFile", "//depot/a.txt")])).unwrap();
        res.on_retry("p4 connection dropped: ", "TCP receive failed");
        assert!(res.file_stats.is_empty());
    }
}
