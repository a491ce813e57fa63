//! Raw log index
//!
//! One line per node event, giving the offset of its control message:
//!
//! ```text
//! 1700000000.000100 1 0 1 TEST 12 0
//! 1700000003.250000 420 0 1 PASSED - 419
//! ```
//!
//! Columns are timestamp, offset, parent id, node id, node type or result,
//! TIN (`-` when absent) and distance from the previous event's offset.

use std::io::Write;

use super::{output_error, NodeView, Renderer};
use crate::error::Result;
use crate::flow::NodeType;
use crate::raw::{RawRecord, Timestamp};

pub struct IndexRenderer<W: Write> {
    out: W,
    prev_offset: Option<u64>,
}

impl<W: Write> IndexRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            prev_offset: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, ts: Timestamp, offset: u64, node: &NodeView<'_>, kind: &str) -> Result<()> {
        let len = self.prev_offset.map_or(0, |prev| offset.saturating_sub(prev));
        self.prev_offset = Some(offset);
        let info = node.info;
        let tin = info.tin.map_or_else(|| "-".to_string(), |tin| tin.to_string());
        writeln!(
            self.out,
            "{} {} {} {} {} {} {}",
            ts, offset, info.parent_id, info.id, kind, tin, len
        )
        .map_err(output_error)
    }
}

impl<W: Write> Renderer for IndexRenderer<W> {
    fn on_start(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        if kind == NodeType::Branch {
            return Ok(());
        }
        self.line(node.info.start_ts, node.info.start_offset, node, kind.keyword())
    }

    fn on_end(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        if kind == NodeType::Branch {
            return Ok(());
        }
        self.line(node.info.end_ts, node.info.end_offset, node, node.info.result.keyword())
    }

    fn on_regular(&mut self, _msg: &RawRecord, _nest: u32) -> Result<()> {
        Ok(())
    }

    fn on_close(&mut self) -> Result<()> {
        self.out.flush().map_err(output_error)
    }

    fn name(&self) -> &'static str {
        "index"
    }
}
