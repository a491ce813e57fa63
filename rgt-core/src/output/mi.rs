//! MI message extract

use std::io::Write;

use serde_json::json;

use super::{output_error, NodeView, RenderOptions, Renderer};
use crate::error::Result;
use crate::flow::NodeType;
use crate::format::FormatExpander;
use crate::raw::{Level, RawRecord, Timestamp};

/// Writes the text of MI-level messages, one per line
///
/// With timestamps enabled each line is preceded by `SEC.USEC` and the
/// stream is bracketed by `log_start`/`log_end` markers stamped with the
/// first and last timestamps seen.
pub struct MiRenderer<W: Write> {
    out: W,
    expander: FormatExpander,
    with_timestamps: bool,
    first_ts: Option<Timestamp>,
    last_ts: Option<Timestamp>,
    started: bool,
}

impl<W: Write> MiRenderer<W> {
    pub fn new(out: W, options: &RenderOptions) -> Self {
        Self {
            out,
            expander: FormatExpander::plain().with_file_inline_limit(options.file_inline_limit),
            with_timestamps: options.mi_with_timestamps,
            first_ts: None,
            last_ts: None,
            started: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn marker(&mut self, kind: &str, ts: Timestamp) -> Result<()> {
        writeln!(self.out, "{}\n{}", ts, json!({ "type": kind })).map_err(output_error)
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.with_timestamps && !self.started {
            self.started = true;
            let ts = self.first_ts.unwrap_or_default();
            self.marker("log_start", ts)?;
        }
        Ok(())
    }
}

impl<W: Write> Renderer for MiRenderer<W> {
    fn on_start(&mut self, _kind: NodeType, _node: &NodeView<'_>) -> Result<()> {
        Ok(())
    }

    fn on_end(&mut self, _kind: NodeType, _node: &NodeView<'_>) -> Result<()> {
        Ok(())
    }

    fn on_regular(&mut self, msg: &RawRecord, _nest: u32) -> Result<()> {
        if !msg.level.contains(Level::MI) {
            return Ok(());
        }
        self.ensure_started()?;
        let text = self.expander.expand(msg);
        if self.with_timestamps {
            writeln!(self.out, "{}", msg.timestamp).map_err(output_error)?;
        }
        writeln!(self.out, "{}", text).map_err(output_error)
    }

    fn on_close(&mut self) -> Result<()> {
        if self.with_timestamps {
            self.ensure_started()?;
            let ts = self.last_ts.unwrap_or_default();
            self.marker("log_end", ts)?;
        }
        self.out.flush().map_err(output_error)
    }

    fn observe(&mut self, ts: Timestamp) {
        self.first_ts = Some(self.first_ts.map_or(ts, |first| first.min(ts)));
        self.last_ts = Some(self.last_ts.map_or(ts, |last| last.max(ts)));
    }

    fn name(&self) -> &'static str {
        "mi"
    }
}
