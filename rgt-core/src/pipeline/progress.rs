//! Percentage indicator for long conversions

use std::io::{self, Write};

/// Writes `\rNN%` whenever the consumed share of the input changes
pub struct Progress<W: Write> {
    out: W,
    total: u64,
    last: Option<u64>,
}

impl Progress<io::Stderr> {
    pub fn stderr(total: u64) -> Self {
        Self::new(io::stderr(), total)
    }
}

impl<W: Write> Progress<W> {
    pub fn new(out: W, total: u64) -> Self {
        Self {
            out,
            total,
            last: None,
        }
    }

    /// Reports `position` bytes consumed
    pub fn update(&mut self, position: u64) {
        if self.total == 0 {
            return;
        }
        let percent = position.min(self.total) * 100 / self.total;
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);
        // write errors on stderr are ignored
        let _ = write!(self.out, "\r{:>2}%", percent);
        let _ = self.out.flush();
    }

    pub fn finish(&mut self) {
        if self.last.is_some() {
            let _ = writeln!(self.out);
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
