//! Raw log writer
//!
//! Produces version 1 raw logs. Used to build fixtures and by tools that
//! re-emit filtered logs.

use std::io::Write;

use super::level::Level;
use super::reader::RLF_VERSION_1;
use super::record::Timestamp;
use crate::error::{Result, RgtError};

/// A record to be encoded
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub entity: Vec<u8>,
    pub user: Vec<u8>,
    pub timestamp: Timestamp,
    pub level: Level,
    pub format: Vec<u8>,
    pub args: Vec<Vec<u8>>,
}

impl RecordSpec {
    pub fn new(entity: &str, user: &str) -> Self {
        Self {
            entity: entity.as_bytes().to_vec(),
            user: user.as_bytes().to_vec(),
            timestamp: Timestamp::ZERO,
            level: Level::INFO,
            format: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Tester control message at the given time
    pub fn control(sec: u32, usec: u32, format: &str) -> Self {
        Self::new("Tester", "Control")
            .at(sec, usec)
            .level(Level::RING)
            .format(format)
    }

    pub fn at(mut self, sec: u32, usec: u32) -> Self {
        self.timestamp = Timestamp::new(sec, usec);
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = format.as_bytes().to_vec();
        self
    }

    pub fn arg_bytes(mut self, arg: &[u8]) -> Self {
        self.args.push(arg.to_vec());
        self
    }

    pub fn arg_str(self, arg: &str) -> Self {
        self.arg_bytes(arg.as_bytes())
    }

    /// Integer argument in network byte order
    pub fn arg_u32(self, arg: u32) -> Self {
        self.arg_bytes(&arg.to_be_bytes())
    }

    /// Encodes the record without the stream version byte
    pub fn encode(&self) -> Result<Vec<u8>> {
        let short = |field: &'static str, bytes: &[u8]| -> Result<u8> {
            u8::try_from(bytes.len()).map_err(|_| RgtError::BadLength {
                field,
                declared: bytes.len(),
                available: u8::MAX as usize,
                offset: None,
            })
        };

        let mut payload = Vec::new();
        payload.push(short("user", &self.user)?);
        payload.extend_from_slice(&self.user);
        payload.push(short("format", &self.format)?);
        payload.extend_from_slice(&self.format);
        for arg in &self.args {
            payload.push(short("argument", arg)?);
            payload.extend_from_slice(arg);
        }
        let payload_len = u16::try_from(payload.len()).map_err(|_| RgtError::BadLength {
            field: "payload",
            declared: payload.len(),
            available: u16::MAX as usize,
            offset: None,
        })?;

        let mut out = Vec::with_capacity(1 + self.entity.len() + 13 + payload.len());
        out.push(short("entity", &self.entity)?);
        out.extend_from_slice(&self.entity);
        out.push(RLF_VERSION_1);
        out.extend_from_slice(&self.timestamp.sec.to_be_bytes());
        out.extend_from_slice(&self.timestamp.usec.to_be_bytes());
        out.extend_from_slice(&self.level.bits().to_be_bytes());
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

/// Writes a version 1 raw log
#[derive(Debug)]
pub struct RawLogWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> RawLogWriter<W> {
    /// Writes the version byte
    pub fn new(mut inner: W) -> Result<Self> {
        inner
            .write_all(&[RLF_VERSION_1])
            .map_err(|e| RgtError::io("<raw log>", e))?;
        Ok(Self { inner, written: 1 })
    }

    /// Appends a record, returning its offset
    pub fn write_record(&mut self, spec: &RecordSpec) -> Result<u64> {
        let bytes = spec.encode()?;
        let offset = self.written;
        self.inner
            .write_all(&bytes)
            .map_err(|e| RgtError::io("<raw log>", e))?;
        self.written += bytes.len() as u64;
        Ok(offset)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| RgtError::io("<raw log>", e))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
