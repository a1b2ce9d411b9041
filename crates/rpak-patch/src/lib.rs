//! Patch edit streams for rpak patch chains.
//!
//! A patch container does not carry its tables and pages directly. Instead
//! it carries an edit stream that rebuilds them from a source stream, the
//! decoded bodies of the older files in its chain. The edit stream is a
//! bitstream of [`PatchCommand`]s plus a pool of literal bytes; the
//! [`PatchEngine`] interprets it incrementally against whatever source and
//! destination windows the loader hands it.

mod command;
mod engine;
mod error;
mod writer;

pub use command::{CommandTable, PatchCommand, PEEK_BITS, WIDTH_BITS};
pub use engine::{EditStream, PatchEngine, PatchProgress, PatchState};
pub use error::{PatchError, Result};
pub use writer::EditStreamWriter;
