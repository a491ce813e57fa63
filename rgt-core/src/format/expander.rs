//! printf-like format expansion
//!
//! Records carry a format string and a list of opaque byte arguments.
//! The expander consumes one argument per conversion:
//!
//! | Conversion        | Argument             | Output                              |
//! |-------------------|----------------------|-------------------------------------|
//! | `%c %d %u %o %x %X` | 32-bit big endian  | low byte as a character, or integer |
//! | `%p`              | N 32-bit words       | `0x` + words as `%08x`, leading zero words skipped |
//! | `%s`              | bytes                | verbatim                            |
//! | `%r`              | 32-bit return code   | `MODULE-ERROR`                      |
//! | `%Tf`             | file path            | file contents (XML) or path (plain) |
//! | `%Tm[[N].[W]]`    | bytes                | hex dump, N tuples of W bytes a row |
//!
//! `%tm` and `%tf` are accepted as aliases of `%Tm` and `%Tf`.
//! `%%` is a literal percent sign. Unknown conversions are emitted as is
//! and consume nothing. When arguments run out the rest of the format is
//! copied verbatim. Trailing newlines are trimmed.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use bytes::Bytes;
use regex::bytes::Regex;
use tracing::warn;

use super::errno;
use super::xml::{escape_attr, escape_text_into};
use crate::error::RgtError;
use crate::raw::RawRecord;

/// Default cap on inlined `%Tf` files
pub const DEFAULT_FILE_INLINE_LIMIT: u64 = 1024 * 1024;

const DEFAULT_DUMP_TUPLES: usize = 16;
const DEFAULT_DUMP_TUPLE_WIDTH: usize = 1;

/// Target markup of an expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Plain,
    Xml,
}

/// Expands record format strings
#[derive(Debug, Clone)]
pub struct FormatExpander {
    flavor: Flavor,
    file_inline_limit: u64,
}

fn dump_layout_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[\[(\d+)\]\.\[(\d+)\]\]").expect("dump layout regex is valid"))
}

/// Output under construction; plain text keeps raw bytes until the end
enum Sink {
    Plain(Vec<u8>),
    Xml(String),
}

impl Sink {
    fn literal(&mut self, bytes: &[u8]) {
        match self {
            Sink::Plain(buf) => buf.extend_from_slice(bytes),
            Sink::Xml(buf) => escape_text_into(buf, bytes),
        }
    }

    fn markup(&mut self, text: &str) {
        match self {
            Sink::Plain(buf) => buf.extend_from_slice(text.as_bytes()),
            Sink::Xml(buf) => buf.push_str(text),
        }
    }

    fn ends_with_newline(&self) -> bool {
        match self {
            Sink::Plain(buf) => buf.is_empty() || buf.ends_with(b"\n"),
            Sink::Xml(buf) => buf.is_empty() || buf.ends_with("<br/>"),
        }
    }

    fn finish(self) -> String {
        match self {
            Sink::Plain(mut buf) => {
                while buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                String::from_utf8_lossy(&buf).into_owned()
            }
            Sink::Xml(mut buf) => {
                while buf.ends_with("<br/>") {
                    buf.truncate(buf.len() - "<br/>".len());
                }
                buf
            }
        }
    }
}

/// Big-endian integer from the first four bytes, left-padded when shorter
fn be_u32(arg: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    let n = arg.len().min(4);
    word[4 - n..].copy_from_slice(&arg[..n]);
    u32::from_be_bytes(word)
}

impl FormatExpander {
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            file_inline_limit: DEFAULT_FILE_INLINE_LIMIT,
        }
    }

    pub fn plain() -> Self {
        Self::new(Flavor::Plain)
    }

    pub fn xml() -> Self {
        Self::new(Flavor::Xml)
    }

    pub fn with_file_inline_limit(mut self, limit: u64) -> Self {
        self.file_inline_limit = limit;
        self
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Expands the record's format with its arguments
    pub fn expand(&self, record: &RawRecord) -> String {
        let (text, missing) = self.expand_parts(record.format_bytes(), record.args());
        if missing {
            let err = RgtError::FormatArity {
                format: record.format().into_owned(),
                supplied: record.args().len(),
                offset: Some(record.offset),
            };
            warn!(error = %err, "rest of format emitted verbatim");
        }
        text
    }

    /// Expands `format` with `args`
    ///
    /// Returns the text and whether arguments ran out.
    pub fn expand_parts(&self, format: &[u8], args: &[Bytes]) -> (String, bool) {
        let mut sink = match self.flavor {
            Flavor::Plain => Sink::Plain(Vec::with_capacity(format.len())),
            Flavor::Xml => Sink::Xml(String::with_capacity(format.len())),
        };
        let mut args = args.iter();
        let mut missing = false;
        let mut lit_start = 0;
        let mut i = 0;

        while i < format.len() {
            if format[i] != b'%' || i + 1 >= format.len() {
                i += 1;
                continue;
            }
            sink.literal(&format[lit_start..i]);
            let spec_start = i;
            let conv = format[i + 1];
            i += 2;

            if conv == b'%' {
                sink.literal(b"%");
                lit_start = i;
                continue;
            }

            let ext = match conv {
                b'T' | b't' => match format.get(i) {
                    Some(b'f') => Some(b'f'),
                    Some(b'm') => Some(b'm'),
                    _ => None,
                },
                _ => None,
            };
            let known = ext.is_some() || b"cduoxXpsr".contains(&conv);
            if !known {
                // emitted verbatim on the next literal flush
                lit_start = spec_start;
                i = spec_start + 1;
                continue;
            }

            let Some(arg) = args.next() else {
                missing = true;
                lit_start = spec_start;
                break;
            };

            match ext {
                Some(b'f') => {
                    i += 1;
                    self.file(&mut sink, arg);
                }
                Some(_) => {
                    i += 1;
                    let (tuples, width) = match dump_layout_regex().captures(&format[i..]) {
                        Some(caps) => {
                            let parse = |idx: usize| {
                                caps.get(idx)
                                    .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                                    .and_then(|s| s.parse::<usize>().ok())
                                    .filter(|v| *v > 0)
                            };
                            let layout = (
                                parse(1).unwrap_or(DEFAULT_DUMP_TUPLES),
                                parse(2).unwrap_or(DEFAULT_DUMP_TUPLE_WIDTH),
                            );
                            i += caps.get(0).map(|m| m.len()).unwrap_or(0);
                            layout
                        }
                        None => (DEFAULT_DUMP_TUPLES, DEFAULT_DUMP_TUPLE_WIDTH),
                    };
                    self.mem_dump(&mut sink, arg, tuples, width);
                }
                None => self.conversion(&mut sink, conv, arg),
            }
            lit_start = i;
        }
        if lit_start < format.len() {
            sink.literal(&format[lit_start..]);
        }

        (sink.finish(), missing)
    }

    fn conversion(&self, sink: &mut Sink, conv: u8, arg: &[u8]) {
        match conv {
            b's' => sink.literal(arg),
            // only the low byte is printed
            b'c' => sink.literal(&[be_u32(arg) as u8]),
            b'd' => sink.markup(&(be_u32(arg) as i32).to_string()),
            b'u' => sink.markup(&be_u32(arg).to_string()),
            b'o' => sink.markup(&format!("{:o}", be_u32(arg))),
            b'x' => sink.markup(&format!("{:x}", be_u32(arg))),
            b'X' => sink.markup(&format!("{:X}", be_u32(arg))),
            b'p' => {
                let words: Vec<&[u8]> = arg.chunks(4).collect();
                let mut text = String::from("0x");
                for (j, word) in words.iter().enumerate() {
                    let value = be_u32(word);
                    if value == 0 && j + 1 < words.len() {
                        continue;
                    }
                    text.push_str(&format!("{:08x}", value));
                }
                if words.is_empty() {
                    text.push_str("00000000");
                }
                sink.markup(&text);
            }
            b'r' => sink.markup(&errno::render(be_u32(arg))),
            _ => {}
        }
    }

    fn mem_dump(&self, sink: &mut Sink, arg: &[u8], tuples: usize, width: usize) {
        let row_len = tuples * width;
        match self.flavor {
            Flavor::Plain => {
                if !sink.ends_with_newline() {
                    sink.markup("\n");
                }
                for row in arg.chunks(row_len) {
                    let line = row
                        .chunks(width)
                        .map(hex::encode_upper)
                        .collect::<Vec<_>>()
                        .join(" ");
                    sink.markup(&line);
                    sink.markup("\n");
                }
            }
            Flavor::Xml => {
                sink.markup("<mem-dump>");
                for row in arg.chunks(row_len) {
                    sink.markup("<row>");
                    for tuple in row.chunks(width) {
                        sink.markup("<elem>");
                        sink.markup(&hex::encode_upper(tuple));
                        sink.markup("</elem>");
                    }
                    sink.markup("</row>");
                }
                sink.markup("</mem-dump>");
            }
        }
    }

    fn file(&self, sink: &mut Sink, arg: &[u8]) {
        if self.flavor == Flavor::Plain {
            sink.literal(arg);
            return;
        }
        let name = String::from_utf8_lossy(arg);
        match self.read_inline_file(Path::new(name.as_ref())) {
            Ok(contents) => {
                sink.markup(&format!("<file name=\"{}\">", escape_attr(&name)));
                sink.literal(&contents);
                sink.markup("</file>");
            }
            Err(reason) => {
                warn!(file = %name, %reason, "file not inlined");
                sink.markup(&format!(
                    "<file name=\"{}\" error=\"{}\"></file>",
                    escape_attr(&name),
                    escape_attr(&reason)
                ));
            }
        }
    }

    fn read_inline_file(&self, path: &Path) -> std::result::Result<Vec<u8>, String> {
        let meta = fs::metadata(path).map_err(|e| e.to_string())?;
        if !meta.is_file() {
            return Err("not a regular file".to_string());
        }
        if meta.len() > self.file_inline_limit {
            return Err(format!(
                "file size {} exceeds inline limit {}",
                meta.len(),
                self.file_inline_limit
            ));
        }
        fs::read(path).map_err(|e| e.to_string())
    }
}

impl Default for FormatExpander {
    fn default() -> Self {
        Self::plain()
    }
}
