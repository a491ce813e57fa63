//! Decoded log records and timestamps

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::level::Level;
use crate::arena::RecordArena;

/// Seconds and microseconds since the epoch, compared lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, usec: 0 };
    pub const MAX: Timestamp = Timestamp {
        sec: u32::MAX,
        usec: u32::MAX,
    };

    pub fn new(sec: u32, usec: u32) -> Self {
        Self { sec, usec }
    }

    pub fn as_micros(self) -> u64 {
        self.sec as u64 * 1_000_000 + self.usec as u64
    }

    /// Microseconds elapsed from `earlier` to `self`, zero if negative
    pub fn micros_since(self, earlier: Timestamp) -> u64 {
        self.as_micros().saturating_sub(earlier.as_micros())
    }

    /// Wall-clock time of day in UTC: `HH:MM:SS` plus milliseconds
    pub fn clock(self) -> (String, u32) {
        let nanos = self.usec.min(999_999) * 1000;
        let hms = DateTime::from_timestamp(self.sec as i64, nanos)
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "00:00:00".to_string());
        (hms, self.usec.min(999_999) / 1000)
    }

    /// `HH:MM:SS.mmm`
    pub fn to_xml_clock(self) -> String {
        let (hms, ms) = self.clock();
        format!("{}.{:03}", hms, ms)
    }

    /// `HH:MM:SS mmm ms`
    pub fn to_live_clock(self) -> String {
        let (hms, ms) = self.clock();
        format!("{} {:03} ms", hms, ms)
    }

    /// Full UTC date, used in node headers
    pub fn to_date(self) -> String {
        DateTime::from_timestamp(self.sec as i64, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

/// Formats a span of microseconds as `H:M:S.ms`
pub fn format_duration(micros: u64) -> String {
    let total_ms = micros / 1000;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    format!(
        "{}:{}:{}.{:03}",
        total_sec / 3600,
        (total_sec / 60) % 60,
        total_sec % 60,
        ms
    )
}

/// One decoded record
///
/// String fields are views into the record's own arena. Cloning a record
/// bumps reference counts only.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub(crate) arena: RecordArena,
    pub(crate) entity: Bytes,
    pub(crate) user: Bytes,
    pub(crate) format: Bytes,
    pub(crate) args: Vec<Bytes>,
    pub timestamp: Timestamp,
    pub level: Level,
    /// Byte offset of the record in the raw log
    pub offset: u64,
    /// Encoded size of the record in the raw log
    pub size: u32,
}

impl RawRecord {
    /// Builds a record outside of any raw log, e.g. a synthesized control
    /// message. All strings are packed into one fresh arena.
    pub fn from_parts(
        entity: &str,
        user: &str,
        timestamp: Timestamp,
        level: Level,
        format: &str,
        args: &[&[u8]],
    ) -> Self {
        let mut buf = Vec::with_capacity(
            entity.len() + user.len() + format.len() + args.iter().map(|a| a.len()).sum::<usize>(),
        );
        let mut spans = Vec::with_capacity(3 + args.len());
        for part in [entity.as_bytes(), user.as_bytes(), format.as_bytes()]
            .into_iter()
            .chain(args.iter().copied())
        {
            let start = buf.len();
            buf.extend_from_slice(part);
            spans.push(start..buf.len());
        }
        let arena = RecordArena::new(buf);
        let mut views = spans.into_iter().map(|span| arena.carve(span));
        let entity = views.next().unwrap_or_default();
        let user = views.next().unwrap_or_default();
        let format = views.next().unwrap_or_default();
        let args = views.collect();

        Self {
            arena,
            entity,
            user,
            format,
            args,
            timestamp,
            level,
            offset: 0,
            size: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn entity(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.entity)
    }

    pub fn user(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.user)
    }

    pub fn format(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.format)
    }

    pub fn entity_bytes(&self) -> &[u8] {
        &self.entity
    }

    pub fn user_bytes(&self) -> &[u8] {
        &self.user
    }

    pub fn format_bytes(&self) -> &[u8] {
        &self.format
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Bytes held by the record's arena
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }
}
