//! Human readable streaming output

use std::io::Write;

use super::{output_error, NodeView, RenderOptions, Renderer};
use crate::error::Result;
use crate::flow::{NodeType, ResultStatus};
use crate::format::FormatExpander;
use crate::raw::RawRecord;

/// Prints events as they happen
///
/// ```text
/// --->>> Starting TEST "ping"
/// Date: 2024-03-01 10:00:00 UTC
/// Objective: Check the echo reply
/// Parameters: size="64"
///
/// INFO  Agt_A  Ping  10:00:01 250 ms
/// reply received
///
/// <<<--- TEST "ping" PASSED (0:0:1.500)
/// ```
pub struct LiveRenderer<W: Write> {
    out: W,
    expander: FormatExpander,
}

impl<W: Write> LiveRenderer<W> {
    pub fn new(out: W, options: &RenderOptions) -> Self {
        Self {
            out,
            expander: FormatExpander::plain().with_file_inline_limit(options.file_inline_limit),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for LiveRenderer<W> {
    fn on_start(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        if kind == NodeType::Branch {
            return Ok(());
        }
        let info = node.info;
        let mut text = format!("--->>> Starting {} \"{}\"\n", kind, info.display_name());
        text.push_str(&format!("Date: {}\n", info.start_ts.to_date()));
        if let Some(tin) = info.tin {
            text.push_str(&format!("TIN: {}\n", tin));
        }
        if let Some(objective) = &info.objective {
            let label = if kind == NodeType::Test { "Objective" } else { "Title" };
            text.push_str(&format!("{}: {}\n", label, objective));
        }
        if !info.authors.is_empty() {
            text.push_str(&format!("Author: {}\n", info.authors.join(", ")));
        }
        if !info.params.is_empty() {
            let params: Vec<String> = info
                .params
                .iter()
                .map(|p| format!("{}=\"{}\"", p.name, p.value))
                .collect();
            text.push_str(&format!("Parameters: {}\n", params.join(" ")));
        }
        text.push('\n');
        self.out.write_all(text.as_bytes()).map_err(output_error)
    }

    fn on_end(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        if kind == NodeType::Branch {
            return Ok(());
        }
        let info = node.info;
        let mut line = format!(
            "<<<--- {} \"{}\" {}",
            kind,
            info.display_name(),
            info.result
        );
        if let Some(error) = info.error.as_deref().filter(|_| info.result != ResultStatus::Passed) {
            line.push_str(&format!(": {}", error));
        }
        line.push_str(&format!(" ({})\n\n", crate::raw::format_duration(info.duration_micros())));
        self.out.write_all(line.as_bytes()).map_err(output_error)
    }

    fn on_regular(&mut self, msg: &RawRecord, _nest: u32) -> Result<()> {
        let text = self.expander.expand(msg);
        writeln!(
            self.out,
            "{}  {}  {}  {}\n{}\n",
            msg.level.name(),
            msg.entity(),
            msg.user(),
            msg.timestamp.to_live_clock(),
            text
        )
        .map_err(output_error)
    }

    fn on_close(&mut self) -> Result<()> {
        self.out.flush().map_err(output_error)
    }

    fn name(&self) -> &'static str {
        "live"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::NodeInfo;
    use crate::raw::{Level, Timestamp};

    fn render(f: impl FnOnce(&mut LiveRenderer<Vec<u8>>)) -> String {
        let mut renderer = LiveRenderer::new(Vec::new(), &RenderOptions::default());
        f(&mut renderer);
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_node_banners() {
        let mut info = NodeInfo::new(NodeType::Test, 0, 1, Timestamp::new(0, 0))
            .with_name("ping")
            .with_param("size", "64");
        info.objective = Some("Check echo".into());
        info.authors = vec!["dev@example.org".into()];

        let out = render(|r| {
            r.on_start(NodeType::Test, &NodeView::bare(&info)).unwrap();
            info.end_ts = Timestamp::new(1, 500_000);
            info.result = ResultStatus::Failed;
            info.error = Some("no reply".into());
            r.on_end(NodeType::Test, &NodeView::bare(&info)).unwrap();
        });
        assert!(out.starts_with("--->>> Starting TEST \"ping\"\nDate: 1970-01-01 00:00:00 UTC\n"));
        assert!(out.contains("Objective: Check echo\n"));
        assert!(out.contains("Author: dev@example.org\n"));
        assert!(out.contains("Parameters: size=\"64\"\n"));
        assert!(out.contains("<<<--- TEST \"ping\" FAILED: no reply (0:0:1.500)\n"));
    }

    #[test]
    fn test_package_title_and_branch_silence() {
        let mut info = NodeInfo::new(NodeType::Package, 0, 1, Timestamp::new(0, 0)).with_name("suite");
        info.objective = Some("Suite title".into());
        let out = render(|r| {
            r.on_start(NodeType::Package, &NodeView::bare(&info)).unwrap();
            r.on_start(NodeType::Branch, &NodeView::bare(&info)).unwrap();
        });
        assert!(out.contains("Title: Suite title\n"));
        assert_eq!(out.matches("Starting").count(), 1);
    }

    #[test]
    fn test_regular_message() {
        let msg = RawRecord::from_parts("Agt", "Ping", Timestamp::new(61, 250_000), Level::INFO, "n=%u", &[&[0, 0, 0, 7]]);
        let out = render(|r| r.on_regular(&msg, 0).unwrap());
        assert_eq!(out, "INFO  Agt  Ping  00:01:01 250 ms\nn=7\n\n");
    }
}
