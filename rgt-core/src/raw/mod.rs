//! Raw log decoding
//!
//! The raw log is a flat sequence of binary records written by the TE
//! logger. This module decodes it ([`RawLogReader`]), encodes it
//! ([`RawLogWriter`]) and defines the record model.

pub mod level;
pub mod reader;
pub mod record;
pub mod writer;

pub use level::Level;
pub use reader::{RawLogReader, ReadMode, RLF_VERSION_1};
pub use record::{format_duration, RawRecord, Timestamp};
pub use writer::{RawLogWriter, RecordSpec};
