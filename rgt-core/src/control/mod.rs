//! Tester control messages
//!
//! The Tester announces node starts and ends through messages logged by
//! entity `Tester`, user `Control`. Older logs use a compact text grammar
//! ([`text`]); newer ones carry JSON at MI level ([`json`]).

pub mod json;
pub mod text;

use crate::error::Result;
use crate::flow::{NodeId, NodeInfo, ResultStatus};
use crate::raw::{Level, RawRecord};

pub const CONTROL_ENTITY: &str = "Tester";
pub const CONTROL_USER: &str = "Control";

/// End of a node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEnd {
    pub parent_id: NodeId,
    pub node_id: NodeId,
    pub status: ResultStatus,
    pub error: Option<String>,
}

/// Decoded control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Start(NodeInfo),
    End(NodeEnd),
}

impl ControlEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            ControlEvent::Start(info) => info.id,
            ControlEvent::End(end) => end.node_id,
        }
    }
}

/// True for messages that drive the flow tree
pub fn is_tester_control(record: &RawRecord) -> bool {
    record.entity_bytes() == CONTROL_ENTITY.as_bytes()
        && record.user_bytes() == CONTROL_USER.as_bytes()
}

fn is_json(record: &RawRecord) -> bool {
    if record.level.contains(Level::MI) {
        return true;
    }
    record.format_bytes() == b"%s"
        && record
            .args()
            .first()
            .is_some_and(|arg| arg.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{'))
}

/// Decodes a Tester control message
///
/// Errors carry the record offset. A [`crate::RgtError::BadControl`]
/// without a node id means the message could not even be recognized as a
/// control event.
pub fn parse_control(record: &RawRecord) -> Result<ControlEvent> {
    let parsed = if is_json(record) {
        json::parse(record)
    } else {
        text::parse(record)
    };
    parsed.map_err(|e| e.with_offset(record.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RgtError;
    use crate::flow::NodeType;
    use crate::raw::Timestamp;

    fn record(entity: &str, user: &str, level: Level, format: &str, args: &[&str]) -> RawRecord {
        let args: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        RawRecord::from_parts(entity, user, Timestamp::new(1, 0), level, format, &args).with_offset(64)
    }

    #[test]
    fn test_control_detection() {
        assert!(is_tester_control(&record("Tester", "Control", Level::RING, "0 1 PASSED", &[])));
        assert!(!is_tester_control(&record("Tester", "Run", Level::RING, "0 1 PASSED", &[])));
        assert!(!is_tester_control(&record("Agent", "Control", Level::RING, "x", &[])));
    }

    #[test]
    fn test_dispatch_by_form() {
        let text = parse_control(&record("Tester", "Control", Level::RING, "0 1 TEST %s", &["t"])).unwrap();
        assert!(matches!(&text, ControlEvent::Start(info) if info.node_type == NodeType::Test));

        let json = parse_control(&record(
            "Tester",
            "Control",
            Level::RING,
            "%s",
            &[r#" {"id":1,"parent":0,"status":"PASSED"}"#],
        ))
        .unwrap();
        assert_eq!(json.node_id(), 1);

        let mi = parse_control(&record(
            "Tester",
            "Control",
            Level::MI,
            "%s",
            &[r#"{"id":2,"parent":0,"type":"SESSION"}"#],
        ))
        .unwrap();
        assert!(matches!(mi, ControlEvent::Start(info) if info.node_type == NodeType::Session));
    }

    #[test]
    fn test_errors_carry_offset() {
        let err = parse_control(&record("Tester", "Control", Level::RING, "0 7 WHAT", &[])).unwrap_err();
        assert_eq!(err.offset(), Some(64));
        assert!(matches!(err, RgtError::BadControl { node_id: Some(7), .. }));
    }
}
