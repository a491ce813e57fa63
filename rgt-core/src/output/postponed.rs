//! XML report
//!
//! ```xml
//! <?xml version="1.0"?>
//! <proteos:log_report xmlns:proteos="http://www.oktetlabs.ru/proteos">
//! <test name="ping" result="PASSED" tin="12">
//! <meta>
//! <start-ts>10:00:00.000</start-ts>
//! ...
//! </meta>
//! <logs>
//! <msg level="INFO" entity="A" user="U" ts_val="1.000000" ts="00:00:01.000" nl="0">text</msg>
//! </logs>
//! </test>
//! </proteos:log_report>
//! ```

use std::io::Write;

use super::{output_error, NodeView, RenderOptions, Renderer};
use crate::error::Result;
use crate::flow::NodeType;
use crate::format::xml::{escape_attr, escape_plain};
use crate::format::FormatExpander;
use crate::raw::{format_duration, RawRecord};

pub const PROTEOS_NAMESPACE: &str = "http://www.oktetlabs.ru/proteos";

pub struct PostponedRenderer<W: Write> {
    out: W,
    expander: FormatExpander,
    /// A `<logs>` element is open in the current node
    logs_open: bool,
}

impl<W: Write> PostponedRenderer<W> {
    pub fn new(out: W, options: &RenderOptions) -> Self {
        Self {
            out,
            expander: FormatExpander::xml().with_file_inline_limit(options.file_inline_limit),
            logs_open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).map_err(output_error)
    }

    fn close_logs(&mut self) -> Result<()> {
        if self.logs_open {
            self.logs_open = false;
            self.emit("</logs>\n")?;
        }
        Ok(())
    }

    fn result_list(&self, tag: &str, messages: &[RawRecord]) -> String {
        let mut text = format!("<{}s>", tag);
        for msg in messages {
            text.push_str(&format!("<{}>{}</{}>\n", tag, self.expander.expand(msg), tag));
        }
        text.push_str(&format!("</{}s>\n", tag));
        text
    }

    fn node_header(&self, kind: NodeType, node: &NodeView<'_>) -> String {
        let info = node.info;
        let mut text = format!("<{}", kind.xml_tag());
        if let Some(name) = &info.name {
            text.push_str(&format!(" name=\"{}\"", escape_attr(name)));
        }
        text.push_str(&format!(" result=\"{}\"", info.result));
        if let Some(err) = &info.error {
            text.push_str(&format!(" err=\"{}\"", escape_attr(err)));
        }
        if let Some(tin) = info.tin {
            text.push_str(&format!(" tin=\"{}\"", tin));
        }
        if let Some(hash) = &info.hash {
            text.push_str(&format!(" hash=\"{}\"", escape_attr(hash)));
        }
        text.push_str(">\n");

        if info.n_branches > 1 {
            text.push_str(&format!("<meta n-branches=\"{}\">\n", info.n_branches));
        } else {
            text.push_str("<meta>\n");
        }
        text.push_str(&format!(
            "<start-ts>{}</start-ts>\n<end-ts>{}</end-ts>\n<duration>{}</duration>\n",
            info.start_ts.to_xml_clock(),
            info.end_ts.to_xml_clock(),
            format_duration(info.duration_micros())
        ));
        if let Some(objective) = &info.objective {
            text.push_str(&format!("<objective>{}</objective>\n", escape_plain(objective)));
        }
        if let Some(page) = &info.page {
            text.push_str(&format!("<page>{}</page>\n", escape_plain(page)));
        }
        if !info.authors.is_empty() {
            text.push_str("<authors>");
            for author in &info.authors {
                text.push_str(&format!("<author email=\"{}\"/>", escape_attr(author)));
            }
            text.push_str("</authors>\n");
        }
        if !node.verdicts.is_empty() {
            text.push_str(&self.result_list("verdict", node.verdicts));
        }
        if !node.artifacts.is_empty() {
            text.push_str(&self.result_list("artifact", node.artifacts));
        }
        if !info.params.is_empty() {
            text.push_str("<params>\n");
            for param in &info.params {
                text.push_str(&format!(
                    "<param name=\"{}\" value=\"{}\"/>\n",
                    escape_attr(&param.name),
                    escape_attr(&param.value)
                ));
            }
            text.push_str("</params>\n");
        }
        text.push_str("</meta>\n");
        text
    }
}

impl<W: Write> Renderer for PostponedRenderer<W> {
    fn on_open(&mut self) -> Result<()> {
        self.emit(&format!(
            "<?xml version=\"1.0\"?>\n<proteos:log_report xmlns:proteos=\"{}\">\n",
            PROTEOS_NAMESPACE
        ))
    }

    fn on_start(&mut self, kind: NodeType, node: &NodeView<'_>) -> Result<()> {
        self.close_logs()?;
        if kind == NodeType::Branch {
            return self.emit("<branch>\n");
        }
        let header = self.node_header(kind, node);
        self.emit(&header)
    }

    fn on_end(&mut self, kind: NodeType, _node: &NodeView<'_>) -> Result<()> {
        self.close_logs()?;
        self.emit(&format!("</{}>\n", kind.xml_tag()))
    }

    fn on_regular(&mut self, msg: &RawRecord, nest: u32) -> Result<()> {
        if !self.logs_open {
            self.logs_open = true;
            self.emit("<logs>\n")?;
        }
        let line = format!(
            "<msg level=\"{}\" entity=\"{}\" user=\"{}\" ts_val=\"{}\" ts=\"{}\" nl=\"{}\">{}</msg>\n",
            msg.level.name(),
            escape_attr(&msg.entity()),
            escape_attr(&msg.user()),
            msg.timestamp,
            msg.timestamp.to_xml_clock(),
            nest,
            self.expander.expand(msg)
        );
        self.emit(&line)
    }

    fn on_close(&mut self) -> Result<()> {
        self.close_logs()?;
        self.emit("</proteos:log_report>\n")?;
        self.out.flush().map_err(output_error)
    }

    fn name(&self) -> &'static str {
        "postponed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{NodeInfo, ResultStatus};
    use crate::raw::{Level, Timestamp};

    fn renderer() -> PostponedRenderer<Vec<u8>> {
        PostponedRenderer::new(Vec::new(), &RenderOptions::default())
    }

    fn finish(r: PostponedRenderer<Vec<u8>>) -> String {
        String::from_utf8(r.into_inner()).unwrap()
    }

    #[test]
    fn test_document_skeleton() {
        let mut r = renderer();
        r.on_open().unwrap();
        r.on_close().unwrap();
        assert_eq!(
            finish(r),
            "<?xml version=\"1.0\"?>\n\
             <proteos:log_report xmlns:proteos=\"http://www.oktetlabs.ru/proteos\">\n\
             </proteos:log_report>\n"
        );
    }

    #[test]
    fn test_node_with_meta_and_logs() {
        let mut info = NodeInfo::new(NodeType::Test, 0, 1, Timestamp::new(1, 0))
            .with_name("smoke")
            .with_param("mode", "a<b");
        info.end_ts = Timestamp::new(3, 250_000);
        info.result = ResultStatus::Failed;
        info.error = Some("bad \"x\"".into());
        info.tin = Some(7);
        info.authors = vec!["dev@example.org".into()];
        info.objective = Some("Smoke & mirrors".into());
        let verdict = RawRecord::from_parts("Tester", "Verdict", Timestamp::new(2, 0), Level::RING, "wrong", &[]);
        let verdicts = [verdict];
        let view = NodeView {
            info: &info,
            verdicts: &verdicts,
            artifacts: &[],
        };
        let msg = RawRecord::from_parts("A", "U", Timestamp::new(2, 5_000), Level::INFO, "line1\nline2", &[]);

        let mut r = renderer();
        r.on_start(NodeType::Test, &view).unwrap();
        r.on_regular(&msg, 1).unwrap();
        r.on_end(NodeType::Test, &view).unwrap();
        let out = finish(r);

        assert!(out.starts_with(
            "<test name=\"smoke\" result=\"FAILED\" err=\"bad &quot;x&quot;\" tin=\"7\">\n<meta>\n"
        ));
        assert!(out.contains("<start-ts>00:00:01.000</start-ts>\n<end-ts>00:00:03.250</end-ts>\n"));
        assert!(out.contains("<duration>0:0:2.250</duration>\n"));
        assert!(out.contains("<objective>Smoke &amp; mirrors</objective>\n"));
        assert!(out.contains("<authors><author email=\"dev@example.org\"/></authors>\n"));
        assert!(out.contains("<verdicts><verdict>wrong</verdict>\n</verdicts>\n"));
        assert!(out.contains("<param name=\"mode\" value=\"a&lt;b\"/>\n"));
        assert!(out.contains(
            "<logs>\n<msg level=\"INFO\" entity=\"A\" user=\"U\" ts_val=\"2.005000\" ts=\"00:00:02.005\" nl=\"1\">line1<br/>line2</msg>\n</logs>\n</test>\n"
        ));
    }

    #[test]
    fn test_branches_and_branch_count() {
        let mut info = NodeInfo::new(NodeType::Session, 0, 1, Timestamp::new(0, 0));
        info.end_ts = Timestamp::new(1, 0);
        info.n_branches = 2;
        let view = NodeView::bare(&info);

        let mut r = renderer();
        r.on_start(NodeType::Session, &view).unwrap();
        r.on_start(NodeType::Branch, &view).unwrap();
        r.on_end(NodeType::Branch, &view).unwrap();
        r.on_end(NodeType::Session, &view).unwrap();
        let out = finish(r);
        assert!(out.starts_with("<session result=\"INCOMPLETE\">\n<meta n-branches=\"2\">\n"));
        assert!(out.ends_with("</meta>\n<branch>\n</branch>\n</session>\n"));
    }
}
