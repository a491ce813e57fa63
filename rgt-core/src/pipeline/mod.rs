//! Record processing loop
//!
//! ```text
//! RawLogReader ──> Pipeline::process_record ──> control? ──> FlowTree
//!                                            └─> regular ──> FilterPolicy ──> Renderer (streaming)
//!                                                                         └─> FlowTree (buffered)
//! Pipeline::finish ──> INCOMPLETE closes ──> FlowTree::traverse ──> Renderer
//! ```
//!
//! [`run`] wires files, the filter document and the renderer together and
//! removes a partially written report when anything fails.

pub mod config;
pub mod progress;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use config::Config;
pub use progress::Progress;

use crate::control::{self, ControlEvent, CONTROL_ENTITY, CONTROL_USER};
use crate::error::{Result, RgtError};
use crate::filter::{FilterLoader, FilterPolicy, Provenance};
use crate::flow::{FlowTree, ResultStatus};
use crate::format::FormatExpander;
use crate::output::{renderer_for, OutputMode, Renderer};
use crate::raw::{Level, RawLogReader, RawRecord, Timestamp};

/// Verdicts starting with this prefix carry the test objective
const OBJECTIVE_PREFIX: &str = "Objective: ";

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub records: u64,
    pub control_messages: u64,
    pub messages_kept: u64,
    pub messages_filtered: u64,
    pub nodes: u64,
    /// Nodes closed as INCOMPLETE at end of input
    pub incomplete_nodes: u64,
    pub last_timestamp: Timestamp,
}

/// One pass over a raw log
pub struct Pipeline<'r> {
    mode: OutputMode,
    process_control: bool,
    stop_at_entity: Option<String>,
    policy: Arc<FilterPolicy>,
    tree: FlowTree,
    renderer: Box<dyn Renderer + 'r>,
    expander: FormatExpander,
    stats: PipelineStats,
    last_offset: u64,
}

impl<'r> Pipeline<'r> {
    pub fn new(config: &Config, policy: Arc<FilterPolicy>, renderer: Box<dyn Renderer + 'r>) -> Self {
        Self {
            mode: config.mode,
            process_control: config.process_control_messages,
            stop_at_entity: config.stop_at_entity.clone(),
            tree: FlowTree::new(policy.clone()),
            policy,
            renderer,
            expander: FormatExpander::plain().with_file_inline_limit(config.file_inline_limit),
            stats: PipelineStats::default(),
            last_offset: 0,
        }
    }

    pub fn tree(&self) -> &FlowTree {
        &self.tree
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn buffered(&self) -> bool {
        self.mode.is_buffered()
    }

    /// Starts the report
    pub fn open(&mut self) -> Result<()> {
        debug!(renderer = self.renderer.name(), "opening report");
        self.renderer.on_open()
    }

    /// Consumes one record
    ///
    /// Returns false once the stop entity has been seen.
    pub fn process_record(&mut self, record: RawRecord) -> Result<bool> {
        self.stats.records += 1;
        self.stats.last_timestamp = self.stats.last_timestamp.max(record.timestamp);
        self.last_offset = record.offset;
        self.renderer.observe(record.timestamp);

        let stop = self
            .stop_at_entity
            .as_deref()
            .is_some_and(|entity| record.entity_bytes() == entity.as_bytes());

        if self.process_control && control::is_tester_control(&record) {
            match control::parse_control(&record) {
                Ok(event) => {
                    self.stats.control_messages += 1;
                    self.apply_control(event, &record)?;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "control message processed as a regular one");
                    self.process_regular(record)?;
                }
                Err(e) => return Err(e),
            }
        } else {
            self.process_regular(record)?;
        }

        if stop {
            info!(entity = ?self.stop_at_entity, "stop entity reached");
        }
        Ok(!stop)
    }

    /// Applies a node start or end to the tree
    pub fn apply_control(&mut self, event: ControlEvent, record: &RawRecord) -> Result<()> {
        match event {
            ControlEvent::Start(info) => {
                let kind = info.node_type;
                let idx = self
                    .tree
                    .add_node(info)
                    .map_err(|e| e.with_offset(record.offset))?;
                self.stats.nodes += 1;
                if !self.buffered() && !self.tree.node_mode(idx).is_excluded() {
                    self.renderer.on_start(kind, &self.tree.view(idx))?;
                }
            }
            ControlEvent::End(end) => {
                let idx = self
                    .tree
                    .close_node(end.parent_id, end.node_id, record.timestamp, end.status, end.error)
                    .map_err(|e| e.with_offset(record.offset))?;
                self.tree.info_mut(idx).end_offset = record.offset;
                if !self.buffered() && !self.tree.node_mode(idx).is_excluded() {
                    let kind = self.tree.info(idx).node_type;
                    self.renderer.on_end(kind, &self.tree.view(idx))?;
                }
            }
        }
        Ok(())
    }

    /// Filters a regular message and renders or stores it
    pub fn process_regular(&mut self, record: RawRecord) -> Result<()> {
        let verdict = self.policy.check_message(
            &record.entity(),
            &record.user(),
            record.level,
            record.timestamp,
        );

        if self.buffered() && verdict.provenance != Provenance::Normal {
            self.collect_result(&record, verdict.provenance);
        }

        if verdict.mode.is_excluded() {
            self.stats.messages_filtered += 1;
            return Ok(());
        }

        if self.buffered() {
            self.tree.attach_message(record);
        } else if self.tree.filter_message(record.timestamp).is_excluded() {
            self.stats.messages_filtered += 1;
            return Ok(());
        } else {
            self.renderer.on_regular(&record, 0)?;
        }
        self.stats.messages_kept += 1;
        Ok(())
    }

    fn collect_result(&mut self, record: &RawRecord, provenance: Provenance) {
        if provenance == Provenance::Verdict {
            let text = self.expander.expand(record);
            if let Some(objective) = text.strip_prefix(OBJECTIVE_PREFIX) {
                if let Some(idx) = self.tree.covering_test(record.timestamp) {
                    self.tree.info_mut(idx).objective = Some(objective.to_string());
                }
                return;
            }
        }
        if !self.tree.attach_result(record.clone(), provenance) {
            debug!(offset = record.offset, ?provenance, "no test covers result message");
        }
    }

    /// Closes what is still open, renders buffered output and closes the report
    pub fn finish(mut self) -> Result<PipelineStats> {
        if self.process_control {
            self.close_unfinished()?;
        }
        if self.buffered() {
            self.tree.traverse(self.renderer.as_mut())?;
        }
        self.renderer.on_close()?;
        info!(
            records = self.stats.records,
            nodes = self.stats.nodes,
            filtered = self.stats.messages_filtered,
            "report complete"
        );
        Ok(self.stats)
    }

    /// Synthesizes an INCOMPLETE end for every node still open, innermost first
    fn close_unfinished(&mut self) -> Result<()> {
        let at = self.stats.last_timestamp;
        while let Some((parent, node)) = self.tree.next_unclosed() {
            let text = format!("{} {} {}", parent, node, ResultStatus::Incomplete);
            let record = RawRecord::from_parts(CONTROL_ENTITY, CONTROL_USER, at, Level::RING, &text, &[])
                .with_offset(self.last_offset);
            warn!(node, parent, "node was not closed, marking it INCOMPLETE");
            let event = control::parse_control(&record)?;
            self.apply_control(event, &record)?;
            self.stats.incomplete_nodes += 1;
        }
        Ok(())
    }
}

/// Converts `config.input` into a report
///
/// A report file left behind by a failed run is removed.
pub fn run(config: &Config) -> Result<PipelineStats> {
    let result = run_to_output(config);
    if let (Err(e), Some(path)) = (&result, &config.output) {
        debug!(error = %e, path = %path.display(), "removing partial report");
        if let Err(remove_err) = fs::remove_file(path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                warn!(error = %remove_err, path = %path.display(), "cannot remove partial report");
            }
        }
    }
    result
}

fn run_to_output(config: &Config) -> Result<PipelineStats> {
    let policy = match &config.filter {
        Some(path) => FilterLoader::load_from_file(path)?,
        None => FilterPolicy::pass_all(),
    };

    let input_name = config.input.display().to_string();
    let input = File::open(&config.input).map_err(|e| RgtError::io(&input_name, e))?;
    let total = input.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = RawLogReader::new(BufReader::new(input), config.read_mode())
        .map_err(|e| relabel_io(e, &input_name))?
        .with_truncation_tolerance(config.incomplete_log);

    let out: Box<dyn Write> = match &config.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| RgtError::io(path.display().to_string(), e))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let renderer = renderer_for(config.mode, out, &config.render_options());
    info!(input = %input_name, mode = %config.mode, "processing raw log");

    let mut pipeline = Pipeline::new(config, Arc::new(policy), renderer);
    let mut progress = config.shows_progress().then(|| Progress::stderr(total));
    pipeline.open()?;

    while let Some(record) = reader.try_fetch_next().map_err(|e| relabel_io(e, &input_name))? {
        if config.is_interrupted() {
            return Err(RgtError::io(
                &input_name,
                io::Error::new(io::ErrorKind::Interrupted, "interrupted"),
            ));
        }
        if let Some(progress) = progress.as_mut() {
            progress.update(reader.offset());
        }
        if !pipeline.process_record(record)? {
            break;
        }
    }
    if let Some(progress) = progress.as_mut() {
        progress.finish();
    }
    pipeline.finish()
}

/// Names the input file in I/O errors raised by the reader
fn relabel_io(e: RgtError, path: &str) -> RgtError {
    match e {
        RgtError::Io { source, .. } => RgtError::io(path, source),
        other => other,
    }
}
