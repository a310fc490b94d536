//! Server-side key/value store.
//!
//! `key_cas` is the only server-side concurrency primitive: writers racing
//! on the same key each read, compute and swap, and a stale writer gets
//! [`P4Error::CasMismatch`] and must re-read before trying again.

use indexmap::IndexMap;

use super::Perforce;
use crate::core::error::{P4Error, P4Result};
use crate::core::tagged::{OutputHandler, Protocol, Record};

/// Value the server reports for a key that was never set.
pub const KEY_UNSET: &str = "0";

#[derive(Default)]
struct KeyValues {
    values: IndexMap<String, String>,
}

impl OutputHandler for KeyValues {
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        let key = stats
            .get("key")
            .ok_or_else(|| P4Error::parse(format!("{stats:?}"), "a 'key' field"))?;
        let value = stats
            .get("value")
            .ok_or_else(|| P4Error::parse(format!("{stats:?}"), "a 'value' field"))?;
        self.values.insert(key.clone(), value.clone());
        Ok(())
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.values.clear();
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tagged
    }
}

impl Perforce {
    fn key_query(&self, args: Vec<String>, key: &str) -> P4Result<String> {
        let mut cb = KeyValues::default();
        self.run_handler("key", args, &mut cb)?;
        cb.values
            .swap_remove(key)
            .ok_or(P4Error::KeyNotFound)
    }

    /// Current value of `key`; [`P4Error::KeyNotFound`] when the server
    /// returned no record for it.
    pub fn key_get(&self, key: &str) -> P4Result<String> {
        self.key_query(vec![key.to_string()], key)
    }

    pub fn key_set(&self, key: &str, value: &str) -> P4Result<()> {
        self.exec_cmd(&["key", key, value])?;
        Ok(())
    }

    /// Atomically increment a numeric key and return the new value.
    pub fn key_inc(&self, key: &str) -> P4Result<String> {
        self.key_query(vec!["-i".to_string(), key.to_string()], key)
    }

    /// Set `key` to `new` only if it currently holds `old`.
    pub fn key_cas(&self, key: &str, old: &str, new: &str) -> P4Result<()> {
        match self.exec_cmd(&["key", "--from", old, "--to", new, key]) {
            Ok(_) => Ok(()),
            Err(e) => Err(e.classify(Some(key))),
        }
    }

    /// Every key matching `pattern`, in server order.
    pub fn keys(&self, pattern: &str) -> P4Result<IndexMap<String, String>> {
        let mut cb = KeyValues::default();
        self.run_handler("keys", ["-e", pattern], &mut cb)?;
        Ok(cb.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_value_is_rejected() {
        let mut cb = KeyValues::default();
        let mut rec = Record::new();
        rec.insert("key".into(), "build".into());
        assert!(cb.output_stat(&rec).is_err());
        rec.insert("value".into(), "7".into());
        cb.output_stat(&rec).unwrap();
        assert_eq!(cb.values["build"], "7");
    }
}
