//! JUnit XML report
//!
//! Tests are grouped into one `<testsuite>` per package; tests run outside
//! any package land in a suite with an empty name. The document is written
//! on close since suite totals come first.

use std::io::Write;

use super::{output_error, NodeView, RenderOptions, Renderer};
use crate::error::Result;
use crate::flow::{NodeType, ResultStatus};
use crate::format::xml::{escape_attr, escape_plain};
use crate::format::FormatExpander;
use crate::raw::{Level, RawRecord};

#[derive(Debug)]
struct TestCase {
    name: String,
    micros: u64,
    result: ResultStatus,
    /// Failure body, or skip message for skipped tests
    details: String,
}

#[derive(Debug, Default)]
struct Suite {
    name: String,
    cases: Vec<TestCase>,
}

impl Suite {
    fn count(&self, pred: impl Fn(&TestCase) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(c)).count()
    }

    fn micros(&self) -> u64 {
        self.cases.iter().map(|c| c.micros).sum()
    }
}

fn seconds(micros: u64) -> String {
    format!("{}.{:03}", micros / 1_000_000, (micros % 1_000_000) / 1000)
}

pub struct JunitRenderer<W: Write> {
    out: W,
    expander: FormatExpander,
    suites: Vec<Suite>,
    /// Suite indices of the packages being walked, innermost last
    packages: Vec<usize>,
    /// Error and warning lines of the test being walked
    test_logs: Option<Vec<String>>,
}

impl<W: Write> JunitRenderer<W> {
    pub fn new(out: W, options: &RenderOptions) -> Self {
        Self {
            out,
            expander: FormatExpander::plain().with_file_inline_limit(options.file_inline_limit),
            suites: Vec::new(),
            packages: Vec::new(),
            test_logs: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn current_suite(&mut self) -> &mut Suite {
        let idx = match self.packages.last() {
            Some(&idx) => idx,
            None => match self.suites.iter().position(|s| s.name.is_empty()) {
                Some(idx) => idx,
                None => {
                    self.suites.push(Suite::default());
                    self.suites.len() - 1
                }
            },
        };
        &mut self.suites[idx]
    }

    fn expand_all(&self, messages: &[RawRecord]) -> Vec<String> {
        messages.iter().map(|m| self.expander.expand(m)).collect()
    }

    fn failure_body(&self, node: &NodeView<'_>, logs: &[String]) -> String {
        let info = node.info;
        let mut body = String::new();
        if !info.params.is_empty() {
            body.push_str("Parameters:\n");
            for param in &info.params {
                body.push_str(&format!("  {}=\"{}\"\n", param.name, param.value));
            }
        }
        if let Some(error) = &info.error {
            body.push_str(&format!("Error: {}\n", error));
        }
        if !logs.is_empty() {
            body.push_str("Logs:\n");
            for line in logs {
                body.push_str(&format!("  {}\n", line));
            }
        }
        for (title, messages) in [("Verdicts", node.verdicts), ("Artifacts", node.artifacts)] {
            if messages.is_empty() {
                continue;
            }
            body.push_str(&format!("{}:\n", title));
            for text in self.expand_all(messages) {
                body.push_str(&format!("  {}\n", text));
            }
        }
        body
    }

    fn write_document(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(self.out, "<testsuites>")?;
        for suite in &self.suites {
            writeln!(
                self.out,
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{}\">",
                escape_attr(&suite.name),
                suite.cases.len(),
                suite.count(|c| !matches!(c.result, ResultStatus::Passed | ResultStatus::Skipped)),
                suite.count(|c| c.result == ResultStatus::Skipped),
                seconds(suite.micros())
            )?;
            for case in &suite.cases {
                let open = format!(
                    "    <testcase classname=\"{}\" name=\"{}\" time=\"{}\"",
                    escape_attr(&suite.name),
                    escape_attr(&case.name),
                    seconds(case.micros)
                );
                match case.result {
                    ResultStatus::Passed => writeln!(self.out, "{}/>", open)?,
                    ResultStatus::Skipped => writeln!(
                        self.out,
                        "{}>\n      <skipped message=\"{}\"/>\n    </testcase>",
                        open,
                        escape_attr(&case.details)
                    )?,
                    result => writeln!(
                        self.out,
                        "{}>\n      <failure message=\"{}\">{}</failure>\n    </testcase>",
                        open,
                        result,
                        escape_plain(&case.details)
                    )?,
                }
            }
            writeln!(self.out, "  </testsuite>")?;
        }
        writeln!(self.out, "</testsuites>")?;
        self.out.flush()
    }
}

impl<W: Write> Renderer for JunitRenderer<W> {
    fn on_start(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        match kind {
            NodeType::Package => {
                self.suites.push(Suite {
                    name: node.info.display_name().to_string(),
                    cases: Vec::new(),
                });
                self.packages.push(self.suites.len() - 1);
            }
            NodeType::Test => self.test_logs = Some(Vec::new()),
            NodeType::Session | NodeType::Branch => {}
        }
        Ok(())
    }

    fn on_end(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        match kind {
            NodeType::Package => {
                self.packages.pop();
            }
            NodeType::Test => {
                let logs = self.test_logs.take().unwrap_or_default();
                let info = node.info;
                let details = match info.result {
                    ResultStatus::Passed => String::new(),
                    ResultStatus::Skipped => self.expand_all(node.verdicts).join("; "),
                    _ => self.failure_body(node, &logs),
                };
                let case = TestCase {
                    name: info.display_name().to_string(),
                    micros: info.duration_micros(),
                    result: info.result,
                    details,
                };
                self.current_suite().cases.push(case);
            }
            NodeType::Session | NodeType::Branch => {}
        }
        Ok(())
    }

    fn on_regular(&mut self, msg: &RawRecord, _nest: u32) -> Result<()> {
        if !msg.level.intersects(Level::ERROR | Level::WARN) {
            return Ok(());
        }
        if let Some(logs) = self.test_logs.as_mut() {
            logs.push(format!(
                "{} {} {}: {}",
                msg.level.name(),
                msg.entity(),
                msg.user(),
                self.expander.expand(msg)
            ));
        }
        Ok(())
    }

    fn on_close(&mut self) -> Result<()> {
        self.suites.retain(|s| !s.cases.is_empty());
        self.write_document().map_err(output_error)
    }

    fn name(&self) -> &'static str {
        "junit"
    }
}
