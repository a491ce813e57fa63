//! Pipeline configuration

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::format::DEFAULT_FILE_INLINE_LIMIT;
use crate::output::{OutputMode, RenderOptions};
use crate::raw::ReadMode;

/// Everything one run of the pipeline needs
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw log to read
    pub input: PathBuf,
    /// Report destination, stdout when absent
    pub output: Option<PathBuf>,
    /// Filter XML document
    pub filter: Option<PathBuf>,
    pub mode: OutputMode,
    /// Build the flow tree from Tester control messages
    pub process_control_messages: bool,
    /// Progress on stderr and debug logging
    pub verbose: bool,
    /// Timestamp lines and start/end markers in MI output
    pub mi_with_timestamps: bool,
    /// Treat a partial trailing record as end of input
    pub incomplete_log: bool,
    /// Stop after the first record from this entity
    pub stop_at_entity: Option<String>,
    /// Largest file inlined by `%Tf`
    pub file_inline_limit: u64,
    /// Set asynchronously to abort the run
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: None,
            filter: None,
            mode: OutputMode::default(),
            process_control_messages: true,
            verbose: false,
            mi_with_timestamps: false,
            incomplete_log: false,
            stop_at_entity: None,
            file_inline_limit: DEFAULT_FILE_INLINE_LIMIT,
            interrupt: None,
        }
    }
}

impl Config {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.filter = Some(path.into());
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_control_messages(mut self, process: bool) -> Self {
        self.process_control_messages = process;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_mi_timestamps(mut self, enabled: bool) -> Self {
        self.mi_with_timestamps = enabled;
        self
    }

    pub fn with_incomplete_log(mut self, tolerate: bool) -> Self {
        self.incomplete_log = tolerate;
        self
    }

    pub fn with_stop_at_entity(mut self, entity: impl Into<String>) -> Self {
        self.stop_at_entity = Some(entity.into());
        self
    }

    pub fn with_file_inline_limit(mut self, limit: u64) -> Self {
        self.file_inline_limit = limit;
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Live output waits for the log to grow; other modes stop at EOF
    pub fn read_mode(&self) -> ReadMode {
        match self.mode {
            OutputMode::Live => ReadMode::Blocking,
            _ => ReadMode::NonBlocking,
        }
    }

    /// Progress is only meaningful while buffering
    pub fn shows_progress(&self) -> bool {
        self.verbose && self.mode.is_buffered()
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            mi_with_timestamps: self.mi_with_timestamps,
            file_inline_limit: self.file_inline_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("run.raw");
        assert_eq!(config.mode, OutputMode::Postponed);
        assert!(config.process_control_messages);
        assert!(config.output.is_none());
        assert_eq!(config.read_mode(), ReadMode::NonBlocking);
        assert!(!config.shows_progress());
        assert!(!config.is_interrupted());
    }

    #[test]
    fn test_builder() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = Config::new("run.raw")
            .with_output("out.xml")
            .with_mode(OutputMode::Live)
            .with_verbose(true)
            .with_mi_timestamps(true)
            .with_stop_at_entity("Tester")
            .with_interrupt(flag.clone());
        assert_eq!(config.read_mode(), ReadMode::Blocking);
        assert!(!config.shows_progress());
        assert!(config.render_options().mi_with_timestamps);
        assert_eq!(config.stop_at_entity.as_deref(), Some("Tester"));

        flag.store(true, Ordering::SeqCst);
        assert!(config.is_interrupted());
    }
}
