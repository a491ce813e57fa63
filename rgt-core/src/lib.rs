//! # RGT Core - raw log report generator
//!
//! Turns the binary raw log written by the Test Environment logger into
//! reports:
//!
//! - **raw**: versioned, length-prefixed record stream
//! - **control**: Tester control messages that start and end sessions,
//!   packages and tests
//! - **flow**: execution flow tree with concurrent branches and messages
//!   attached by timestamp
//! - **filter**: entity, branch and duration filters loaded from XML
//! - **output**: live text, XML, JUnit, MI and index renderers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rgt_core::{
//!     Config, FilterPolicy, Pipeline, PostponedRenderer, RawLogReader, RawLogWriter,
//!     ReadMode, RecordSpec, RenderOptions,
//! };
//!
//! // Build a small raw log in memory
//! let mut writer = RawLogWriter::new(Vec::new()).unwrap();
//! writer.write_record(&RecordSpec::control(1, 0, "0 1 TEST %s").arg_str("smoke")).unwrap();
//! writer.write_record(&RecordSpec::new("A", "U").at(2, 0).format("hello")).unwrap();
//! writer.write_record(&RecordSpec::control(3, 0, "0 1 PASSED")).unwrap();
//! let raw = writer.into_inner();
//!
//! // Render it as an XML report
//! let mut report = Vec::new();
//! let renderer = Box::new(PostponedRenderer::new(&mut report, &RenderOptions::default()));
//! let mut pipeline = Pipeline::new(
//!     &Config::new("<memory>"),
//!     Arc::new(FilterPolicy::pass_all()),
//!     renderer,
//! );
//! pipeline.open().unwrap();
//! for record in RawLogReader::new(raw.as_slice(), ReadMode::NonBlocking).unwrap() {
//!     pipeline.process_record(record.unwrap()).unwrap();
//! }
//! let stats = pipeline.finish().unwrap();
//!
//! let xml = String::from_utf8(report).unwrap();
//! assert!(xml.contains(r#"<test name="smoke" result="PASSED">"#));
//! assert_eq!(stats.records, 3);
//! ```

pub mod arena;
pub mod control;
pub mod error;
pub mod filter;
pub mod flow;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod raw;

// Re-export main types
pub use control::{parse_control, ControlEvent, NodeEnd};
pub use error::{ErrorKind, ErrorReport, Result, RgtError};
pub use filter::{FilterLoader, FilterMode, FilterPolicy, Provenance};
pub use flow::{FlowTree, NodeId, NodeInfo, NodeType, ResultStatus};
pub use format::{Flavor, FormatExpander};
pub use output::{
    IndexRenderer, JunitRenderer, LiveRenderer, MiRenderer, NodeView, OutputMode,
    PostponedRenderer, RenderOptions, Renderer,
};
pub use pipeline::{run, Config, Pipeline, PipelineStats};
pub use raw::{Level, RawLogReader, RawLogWriter, RawRecord, ReadMode, RecordSpec, Timestamp};

/// Raw log format version understood by the reader
pub const RAW_LOG_VERSION: u8 = raw::RLF_VERSION_1;
