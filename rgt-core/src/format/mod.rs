//! Message text rendering
//!
//! - [`FormatExpander`]: printf-like expansion of record formats
//! - [`xml`]: escaping helpers shared by XML renderers
//! - [`errno`]: TE return code names for `%r`

pub mod errno;
pub mod expander;
pub mod xml;

pub use expander::{Flavor, FormatExpander, DEFAULT_FILE_INLINE_LIMIT};
