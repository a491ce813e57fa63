//! Report renderers
//!
//! Every output flavour implements [`Renderer`]. In streaming modes the
//! pipeline calls the renderer as records arrive; in buffered modes the
//! flow tree drives it from [`crate::flow::FlowTree::traverse`].
//!
//! ```text
//! on_open
//!   on_start(SESSION) on_regular* on_start(BRANCH) ... on_end(BRANCH) on_end(SESSION)
//!   on_regular*                          (after-list messages)
//! on_close
//! ```

pub mod index;
pub mod junit;
pub mod live;
pub mod mi;
pub mod postponed;

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RgtError};
use crate::flow::{NodeInfo, NodeType};
use crate::format::DEFAULT_FILE_INLINE_LIMIT;
use crate::raw::{RawRecord, Timestamp};

pub use index::IndexRenderer;
pub use junit::JunitRenderer;
pub use live::LiveRenderer;
pub use mi::MiRenderer;
pub use postponed::PostponedRenderer;

/// A node as seen by a renderer
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub info: &'a NodeInfo,
    /// Verdict messages collected for a test, in time order
    pub verdicts: &'a [RawRecord],
    /// Artifact messages collected for a test, in time order
    pub artifacts: &'a [RawRecord],
}

impl<'a> NodeView<'a> {
    /// View of a node with nothing collected
    pub fn bare(info: &'a NodeInfo) -> Self {
        Self {
            info,
            verdicts: &[],
            artifacts: &[],
        }
    }
}

/// Output flavour callbacks
///
/// `on_start` and `on_end` receive [`NodeType::Branch`] around each
/// parallel branch of a session; the view is then the session's.
pub trait Renderer {
    /// Called once before any event
    fn on_open(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_start(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()>;

    fn on_end(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()>;

    /// A regular message at step nesting level `nest`
    fn on_regular(&mut self, msg: &RawRecord, nest: u32) -> Result<()>;

    /// Called once after the last event; flushes the output
    fn on_close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sees the timestamp of every record read, including filtered ones
    fn observe(&mut self, _ts: Timestamp) {}

    /// Renderer name for logging
    fn name(&self) -> &'static str;
}

/// Selectable output flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Human readable text, written as records arrive
    Live,
    /// XML report of the whole run
    #[default]
    Postponed,
    /// JUnit XML
    Junit,
    /// MI messages only
    Mi,
    /// Offsets of control events in the raw log
    Index,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Live => "live",
            OutputMode::Postponed => "postponed",
            OutputMode::Junit => "junit",
            OutputMode::Mi => "mi",
            OutputMode::Index => "index",
        }
    }

    /// Whether the mode needs the whole flow tree before rendering
    pub fn is_buffered(&self) -> bool {
        matches!(self, OutputMode::Postponed | OutputMode::Junit)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "live" => Ok(OutputMode::Live),
            "postponed" => Ok(OutputMode::Postponed),
            "junit" => Ok(OutputMode::Junit),
            "mi" => Ok(OutputMode::Mi),
            "index" => Ok(OutputMode::Index),
            other => Err(format!("unknown output mode '{}'", other)),
        }
    }
}

/// Renderer settings taken from the pipeline configuration
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub mi_with_timestamps: bool,
    pub file_inline_limit: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mi_with_timestamps: false,
            file_inline_limit: DEFAULT_FILE_INLINE_LIMIT,
        }
    }
}

/// Builds the renderer for `mode` writing to `out`
pub fn renderer_for<'w>(
    mode: OutputMode,
    out: Box<dyn Write + 'w>,
    options: &RenderOptions,
) -> Box<dyn Renderer + 'w> {
    match mode {
        OutputMode::Live => Box::new(LiveRenderer::new(out, options)),
        OutputMode::Postponed => Box::new(PostponedRenderer::new(out, options)),
        OutputMode::Junit => Box::new(JunitRenderer::new(out, options)),
        OutputMode::Mi => Box::new(MiRenderer::new(out, options)),
        OutputMode::Index => Box::new(IndexRenderer::new(out)),
    }
}

pub(crate) fn output_error(e: io::Error) -> RgtError {
    RgtError::io("<output>", e)
}
