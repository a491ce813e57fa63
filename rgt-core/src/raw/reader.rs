//! Raw log reader
//!
//! ## Format (version 1)
//!
//! ```text
//! stream  := version:u8 record*
//! record  := NE:u8 entity[NE] logver:u8 sec:u32be usec:u32be level:u16be
//!            R:u16be payload[R]
//! payload := ulen:u8 user[ulen] flen:u8 fmt[flen] (alen:u8 arg[alen])*
//! ```
//!
//! A record is decoded only once all of its bytes are available. A
//! stream that ends exactly on a record boundary (or with a lone zero
//! padding byte) is a clean end of log.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{trace, warn};

use super::level::Level;
use super::record::{RawRecord, Timestamp};
use crate::arena::{ArenaCursor, RecordArena};
use crate::error::{Result, RgtError};

/// The only raw log format version understood
pub const RLF_VERSION_1: u8 = 1;

/// logver + sec + usec + level + R
const FIXED_HEADER_LEN: usize = 1 + 4 + 4 + 2 + 2;

const BLOCKING_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How the reader reacts when the source has no data right now
///
/// Both modes end at end of file: a read returning zero bytes stops the
/// log. Only a source that reports `WouldBlock`, such as a non-blocking
/// pipe or socket fed by a running logger, is waited on. Tailing a
/// regular file that is still growing is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Keep waiting while the source would block (live tailing)
    Blocking,
    /// Treat a would-block condition as end of input
    NonBlocking,
}

/// Decodes records from a byte stream
#[derive(Debug)]
pub struct RawLogReader<R> {
    inner: R,
    mode: ReadMode,
    offset: u64,
    tolerate_truncation: bool,
    finished: bool,
}

enum Fill {
    Full,
    Partial(usize),
}

impl<R: Read> RawLogReader<R> {
    /// Reads and checks the version byte
    ///
    /// An empty source is an empty log.
    pub fn new(mut inner: R, mode: ReadMode) -> Result<Self> {
        let mut version = [0u8; 1];
        let filled = fill(&mut inner, mode, &mut version).map_err(|e| RgtError::io("<input>", e))?;
        let mut reader = Self {
            inner,
            mode,
            offset: 0,
            tolerate_truncation: false,
            finished: false,
        };
        match filled {
            Fill::Partial(_) => {
                reader.finished = true;
            }
            Fill::Full => {
                if version[0] != RLF_VERSION_1 {
                    return Err(RgtError::BadVersion {
                        version: version[0],
                        offset: Some(0),
                    });
                }
                reader.offset = 1;
            }
        }
        Ok(reader)
    }

    /// Downgrades a partial trailing record to a warning and end of input
    pub fn with_truncation_tolerance(mut self, tolerate: bool) -> Self {
        self.tolerate_truncation = tolerate;
        self
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the next record, `None` on a clean end of input
    pub fn try_fetch_next(&mut self) -> Result<Option<RawRecord>> {
        if self.finished {
            return Ok(None);
        }
        let start = self.offset;

        let mut ne = [0u8; 1];
        if let Fill::Partial(_) = self.read_exact_or_eof(&mut ne)? {
            self.finished = true;
            return Ok(None);
        }
        let ne = ne[0] as usize;

        let mut head = vec![0u8; ne + FIXED_HEADER_LEN];
        match self.read_exact_or_eof(&mut head)? {
            Fill::Full => {}
            Fill::Partial(0) if ne == 0 => {
                trace!(offset = start, "zero padding at end of log");
                self.finished = true;
                return Ok(None);
            }
            Fill::Partial(_) => return self.truncated("record header", start),
        }

        let fixed = &head[ne..];
        let logver = fixed[0];
        let sec = u32::from_be_bytes([fixed[1], fixed[2], fixed[3], fixed[4]]);
        let usec = u32::from_be_bytes([fixed[5], fixed[6], fixed[7], fixed[8]]);
        let raw_level = u16::from_be_bytes([fixed[9], fixed[10]]);
        let payload_len = u16::from_be_bytes([fixed[11], fixed[12]]) as usize;
        trace!(offset = start, logver, payload_len, "record header");

        if payload_len < 2 {
            return Err(RgtError::BadLength {
                field: "payload",
                declared: payload_len,
                available: 2,
                offset: Some(start),
            });
        }

        // entity followed by payload share one arena
        let mut buf = Vec::with_capacity(ne + payload_len);
        buf.extend_from_slice(&head[..ne]);
        buf.resize(ne + payload_len, 0);
        match self.read_exact_or_eof(&mut buf[ne..])? {
            Fill::Full => {}
            Fill::Partial(_) => return self.truncated("record payload", start),
        }

        let level = Level::from_raw(raw_level);
        if level.is_unknown() {
            let err = RgtError::BadLevel {
                level: raw_level,
                offset: Some(start),
            };
            warn!(error = %err, "record kept with level UNKNOWN");
        }

        let arena = RecordArena::new(buf);
        let record = decode_payload(arena, ne, start)?;
        let size = (1 + ne + FIXED_HEADER_LEN + payload_len) as u32;
        Ok(Some(RawRecord {
            timestamp: Timestamp::new(sec, usec),
            level,
            offset: start,
            size,
            ..record
        }))
    }

    fn truncated(&mut self, context: &str, start: u64) -> Result<Option<RawRecord>> {
        self.finished = true;
        let err = RgtError::TruncatedRecord {
            context: context.to_string(),
            offset: Some(start),
        };
        if self.tolerate_truncation {
            warn!(error = %err, "treating partial record as end of log");
            Ok(None)
        } else {
            Err(err)
        }
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<Fill> {
        let result = fill(&mut self.inner, self.mode, buf).map_err(|e| RgtError::io("<input>", e))?;
        self.offset += match result {
            Fill::Full => buf.len() as u64,
            Fill::Partial(n) => n as u64,
        };
        Ok(result)
    }
}

impl<R: Read> Iterator for RawLogReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_fetch_next().transpose()
    }
}

fn fill<R: Read>(inner: &mut R, mode: ReadMode, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => return Ok(Fill::Partial(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => match mode {
                ReadMode::Blocking => thread::sleep(BLOCKING_RETRY_DELAY),
                ReadMode::NonBlocking => return Ok(Fill::Partial(filled)),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Full)
}

fn decode_payload(arena: RecordArena, ne: usize, start: u64) -> Result<RawRecord> {
    let mut cursor = arena.cursor();
    let entity = cursor.take(ne).unwrap_or_default();

    let user = take_field(&mut cursor, "user", start)?;
    let format = take_field(&mut cursor, "format", start)?;
    let mut args = Vec::new();
    while cursor.remaining() > 0 {
        args.push(take_field(&mut cursor, "argument", start)?);
    }

    Ok(RawRecord {
        arena,
        entity,
        user,
        format,
        args,
        timestamp: Timestamp::ZERO,
        level: Level::empty(),
        offset: start,
        size: 0,
    })
}

/// Reads one length-prefixed field
fn take_field(cursor: &mut ArenaCursor<'_>, name: &'static str, start: u64) -> Result<Bytes> {
    let declared = cursor.take_u8().ok_or(RgtError::BadLength {
        field: name,
        declared: 1,
        available: 0,
        offset: Some(start),
    })? as usize;
    let available = cursor.remaining();
    cursor.take(declared).ok_or(RgtError::BadLength {
        field: name,
        declared,
        available,
        offset: Some(start),
    })
}
