//! Flow tree node metadata

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::raw::Timestamp;

/// Tester-assigned node identifier
pub type NodeId = u32;

/// Identifier of the implicit root session
pub const ROOT_ID: NodeId = 0;

/// Kind of a flow tree node
///
/// `Branch` never names a stored node; it tags the branch delimiters
/// emitted while walking a session with parallel children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Session,
    Package,
    Test,
    Branch,
}

impl NodeType {
    /// Keyword used in control messages and the index
    pub fn keyword(&self) -> &'static str {
        match self {
            NodeType::Session => "SESSION",
            NodeType::Package => "PACKAGE",
            NodeType::Test => "TEST",
            NodeType::Branch => "BRANCH",
        }
    }

    /// Element name in XML reports
    pub fn xml_tag(&self) -> &'static str {
        match self {
            NodeType::Session => "session",
            NodeType::Package => "pkg",
            NodeType::Test => "test",
            NodeType::Branch => "branch",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for NodeType {
    type Err = String;

    /// Accepts control keywords, XML tags and MI node types
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(NodeType::Session),
            "package" | "pkg" => Ok(NodeType::Package),
            "test" => Ok(NodeType::Test),
            "branch" => Ok(NodeType::Branch),
            other => Err(format!("unknown node type '{}'", other)),
        }
    }
}

/// Outcome of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    Passed,
    Killed,
    Dumped,
    Skipped,
    Faked,
    Failed,
    Empty,
    Incomplete,
}

impl ResultStatus {
    pub const ALL: [ResultStatus; 8] = [
        ResultStatus::Passed,
        ResultStatus::Killed,
        ResultStatus::Dumped,
        ResultStatus::Skipped,
        ResultStatus::Faked,
        ResultStatus::Failed,
        ResultStatus::Empty,
        ResultStatus::Incomplete,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            ResultStatus::Passed => "PASSED",
            ResultStatus::Killed => "KILLED",
            ResultStatus::Dumped => "DUMPED",
            ResultStatus::Skipped => "SKIPPED",
            ResultStatus::Faked => "FAKED",
            ResultStatus::Failed => "FAILED",
            ResultStatus::Empty => "EMPTY",
            ResultStatus::Incomplete => "INCOMPLETE",
        }
    }

    /// Parses a status keyword; `CORED` is the legacy spelling of `DUMPED`
    pub fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("CORED") {
            return Some(ResultStatus::Dumped);
        }
        Self::ALL
            .into_iter()
            .find(|status| status.keyword().eq_ignore_ascii_case(word))
    }

    /// Keywords recognized at the start of an end-of-node message
    pub fn keywords() -> impl Iterator<Item = (&'static str, ResultStatus)> {
        Self::ALL
            .into_iter()
            .map(|status| (status.keyword(), status))
            .chain(std::iter::once(("CORED", ResultStatus::Dumped)))
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Test parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Everything known about a session, package or test
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub parent_id: NodeId,
    pub node_type: NodeType,
    pub name: Option<String>,
    pub objective: Option<String>,
    pub authors: Vec<String>,
    /// Test identification number
    pub tin: Option<u32>,
    pub page: Option<String>,
    pub hash: Option<String>,
    pub params: Vec<Param>,
    pub start_ts: Timestamp,
    pub end_ts: Timestamp,
    pub result: ResultStatus,
    pub error: Option<String>,
    pub n_branches: usize,
    /// Raw log offset of the start event
    pub start_offset: u64,
    /// Raw log offset of the end event
    pub end_offset: u64,
}

impl NodeInfo {
    pub fn new(node_type: NodeType, parent_id: NodeId, id: NodeId, start_ts: Timestamp) -> Self {
        Self {
            id,
            parent_id,
            node_type,
            name: None,
            objective: None,
            authors: Vec::new(),
            tin: None,
            page: None,
            hash: None,
            params: Vec::new(),
            start_ts,
            end_ts: Timestamp::MAX,
            result: ResultStatus::Incomplete,
            error: None,
            n_branches: 0,
            start_offset: 0,
            end_offset: 0,
        }
    }

    /// The implicit session every log starts in
    pub fn root() -> Self {
        Self::new(NodeType::Session, ROOT_ID, ROOT_ID, Timestamp::ZERO)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    /// Name for display; unnamed sessions show as `session`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(match self.node_type {
            NodeType::Session => "session",
            NodeType::Package => "package",
            NodeType::Test => "test",
            NodeType::Branch => "branch",
        })
    }

    /// Microseconds between start and end, zero while still open
    pub fn duration_micros(&self) -> u64 {
        if self.end_ts == Timestamp::MAX {
            return 0;
        }
        self.end_ts.micros_since(self.start_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parsing() {
        assert_eq!("TEST".parse::<NodeType>().unwrap(), NodeType::Test);
        assert_eq!("pkg".parse::<NodeType>().unwrap(), NodeType::Package);
        assert_eq!("Package".parse::<NodeType>().unwrap(), NodeType::Package);
        assert!("suite".parse::<NodeType>().is_err());
        assert_eq!(NodeType::Package.xml_tag(), "pkg");
    }

    #[test]
    fn test_result_keywords() {
        assert_eq!(ResultStatus::from_keyword("PASSED"), Some(ResultStatus::Passed));
        assert_eq!(ResultStatus::from_keyword("CORED"), Some(ResultStatus::Dumped));
        assert_eq!(ResultStatus::from_keyword("DUMPED"), Some(ResultStatus::Dumped));
        assert_eq!(ResultStatus::from_keyword("MAYBE"), None);
        assert_eq!(ResultStatus::Dumped.to_string(), "DUMPED");
        assert_eq!(ResultStatus::keywords().count(), 9);
    }

    #[test]
    fn test_node_info_duration() {
        let mut info = NodeInfo::new(NodeType::Test, 0, 1, Timestamp::new(10, 0));
        assert_eq!(info.duration_micros(), 0);
        info.end_ts = Timestamp::new(12, 500_000);
        assert_eq!(info.duration_micros(), 2_500_000);
        assert_eq!(info.display_name(), "test");
        assert_eq!(info.with_name("smoke").display_name(), "smoke");
    }
}
