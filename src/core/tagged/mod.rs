//! Tagged protocol: output callbacks, text classification and field binding.
//!
//! A command's output reaches callers as a stream of callbacks (binary or text
//! payload, leveled info lines, key/value stat records). [`handler`] defines
//! the callback surface, [`classify`] turns the command-line client's textual
//! output into that stream, and [`binder`] maps stat records onto typed
//! structs through per-type schemas.

pub mod binder;
pub mod classify;
pub mod handler;

use indexmap::IndexMap;

/// One tagged record, in server order.
pub type Record = IndexMap<String, String>;

/// Wire protocol requested for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Plain text output, the way the interactive client prints it.
    #[default]
    Default,
    /// Key/value stat records (`-ztag`).
    Tagged,
}

pub use binder::{BindError, FromTagged, Schema, Tagged, bind, bind_record, from_record};
pub use handler::{Buffer, Dispatch, OutputHandler};
