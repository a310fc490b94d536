//! Output callback surface.
//!
//! Typed operations implement [`OutputHandler`] for whatever subset of the
//! callbacks their command produces; unhandled callbacks are logged and
//! dropped. [`Dispatch`] sits between a connection and a handler and folds
//! every handler failure and server error into one message.

use std::fmt::Write as _;

use tracing::{info, warn};

use super::{Protocol, Record};
use crate::core::error::{P4Error, P4Result};

/// Receiver of a command's output.
pub trait OutputHandler {
    /// Raw payload of a binary file.
    fn output_binary(&mut self, data: &[u8]) -> P4Result<()> {
        let _ = data;
        warn!("no handler for binary output");
        Ok(())
    }

    /// Payload of a text file.
    fn output_text(&mut self, data: &str) -> P4Result<()> {
        let _ = data;
        warn!("no handler for text output");
        Ok(())
    }

    /// Informational line; `level` is the nesting depth (0-2).
    fn output_info(&mut self, level: u8, info: &str) -> P4Result<()> {
        let _ = (level, info);
        warn!("no handler for info output");
        Ok(())
    }

    /// One tagged record.
    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        let _ = stats;
        warn!("no handler for stat output");
        Ok(())
    }

    /// Called before a command is re-issued on a fresh connection. Anything
    /// accumulated so far belongs to the abandoned attempt.
    fn on_retry(&mut self, context: &str, err: &str) {
        info!("retrying because: {context}{err}");
    }

    fn protocol(&self) -> Protocol {
        Protocol::Default
    }

    /// Bytes piped to the command's standard input.
    fn input(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Routes connection events into a handler and accumulates errors.
pub struct Dispatch<'a> {
    handler: &'a mut dyn OutputHandler,
    errors: Vec<String>,
}

impl<'a> Dispatch<'a> {
    pub fn new(handler: &'a mut dyn OutputHandler) -> Self {
        Self {
            handler,
            errors: Vec::new(),
        }
    }

    /// Record a server-reported error.
    pub fn handle_error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    pub fn binary(&mut self, data: &[u8]) {
        let res = self.handler.output_binary(data);
        self.absorb(res);
    }

    pub fn text(&mut self, data: &str) {
        let res = self.handler.output_text(data);
        self.absorb(res);
    }

    pub fn info(&mut self, level: u8, info: &str) {
        let res = self.handler.output_info(level, info);
        self.absorb(res);
    }

    pub fn stat(&mut self, stats: &Record) {
        let res = self.handler.output_stat(stats);
        self.absorb(res);
    }

    /// Reset for a new attempt: the handler drops partial output and errors
    /// from the dropped connection are forgotten.
    pub fn retry(&mut self, context: &str, err: &str) {
        self.handler.on_retry(context, err);
        self.errors.clear();
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Close the exchange; any accumulated error becomes [`P4Error::Api`].
    pub fn finish(self) -> P4Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(P4Error::Api(self.errors.join(" : ")))
        }
    }

    fn absorb(&mut self, res: P4Result<()>) {
        if let Err(e) = res {
            self.errors.push(e.to_string());
        }
    }
}

/// Generic handler that reproduces the text the interactive client would
/// print. Used for commands routed through a pooled connection by name.
#[derive(Debug, Default)]
pub struct Buffer {
    output: Vec<u8>,
    input: Option<Vec<u8>>,
    protocol: Protocol,
}

impl Buffer {
    pub fn new(input: Option<Vec<u8>>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    pub fn tagged(mut self) -> Self {
        self.protocol = Protocol::Tagged;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.output
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl OutputHandler for Buffer {
    fn output_binary(&mut self, data: &[u8]) -> P4Result<()> {
        self.output.extend_from_slice(data);
        Ok(())
    }

    fn output_text(&mut self, data: &str) -> P4Result<()> {
        self.output.extend_from_slice(data.as_bytes());
        Ok(())
    }

    fn output_info(&mut self, level: u8, info: &str) -> P4Result<()> {
        const PREFIX: &str = "... ... ";
        if (1..=2).contains(&level) {
            self.output
                .extend_from_slice(&PREFIX.as_bytes()[..4 * level as usize]);
        }
        self.output.extend_from_slice(info.as_bytes());
        self.output.push(b'\n');
        Ok(())
    }

    fn output_stat(&mut self, stats: &Record) -> P4Result<()> {
        let mut line = String::new();
        for (k, v) in stats {
            let level = if k.starts_with("other") { 2 } else { 1 };
            line.clear();
            let _ = write!(line, "{k} {v}");
            self.output_info(level, &line)?;
        }
        self.output_info(0, "")
    }

    fn on_retry(&mut self, _context: &str, _err: &str) {
        self.output.clear();
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn input(&self) -> Option<Vec<u8>> {
        self.input.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_renders_stats_with_levels() {
        let mut buf = Buffer::default();
        let mut rec = Record::new();
        rec.insert("depotFile".into(), "//depot/a.txt".into());
        rec.insert("otherOpen0".into(), "bob@ws".into());
        buf.output_stat(&rec).unwrap();
        buf.output_info(0, "tail").unwrap();
        assert_eq!(
            buf.into_string(),
            "... depotFile //depot/a.txt\n... ... otherOpen0 bob@ws\n\ntail\n"
        );
    }

    #[test]
    fn dispatch_joins_errors() {
        struct Failing;
        impl OutputHandler for Failing {
            fn output_text(&mut self, _data: &str) -> P4Result<()> {
                Err(P4Error::parse("x", "stats before payload"))
            }
        }
        let mut h = Failing;
        let mut d = Dispatch::new(&mut h);
        d.handle_error("first");
        d.text("x");
        let err = d.finish().unwrap_err().to_string();
        assert!(err.starts_with("p4 api error: first : unexpected output"));
    }

    #[test]
    fn retry_clears_partial_output_and_errors() {
        let mut buf = Buffer::default();
        {
            let mut d = Dispatch::new(&mut buf);
            d.info(0, "partial");
            d.handle_error("TCP receive failed");
            d.retry("p4 connection dropped: ", "TCP receive failed");
            d.info(0, "complete");
            assert!(d.finish().is_ok());
        }
        assert_eq!(buf.into_string(), "complete\n");
    }
}
