//! JSON control messages
//!
//! Two layouts are accepted. The flat one:
//!
//! ```json
//! {"id": 5, "parent": 1, "type": "TEST", "name": "ping", "tin": 12,
//!  "authors": [{"email": "dev@example.org"}], "args": [["mtu", "1500"]]}
//! {"id": 5, "parent": 1, "status": "FAILED", "error": "timeout"}
//! ```
//!
//! and the enveloped one:
//!
//! ```json
//! {"type": "test_start", "msg": {"id": 5, "parent": 1, "node_type": "test", "name": "ping"}}
//! {"type": "test_end", "msg": {"id": 5, "parent": 1, "obtained": {"status": "FAILED"}}}
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::{ControlEvent, NodeEnd};
use crate::error::{Result, RgtError};
use crate::flow::{NodeInfo, NodeType, Param, ResultStatus};
use crate::raw::RawRecord;

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
    email: Option<String>,
}

impl Author {
    /// Address when known, otherwise the bare name
    fn into_contact(self) -> Option<String> {
        self.email.or(self.name).filter(|c| !c.is_empty())
    }
}

/// Descriptive fields shared by both layouts
#[derive(Debug, Default, Deserialize)]
struct Description {
    name: Option<String>,
    objective: Option<String>,
    page: Option<String>,
    hash: Option<String>,
    tin: Option<i64>,
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default, alias = "params")]
    args: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct FlatMessage {
    id: u32,
    parent: u32,
    #[serde(rename = "type")]
    node_type: Option<String>,
    status: Option<String>,
    error: Option<String>,
    #[serde(flatten)]
    descr: Description,
}

#[derive(Debug, Deserialize)]
struct Obtained {
    status: String,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    id: u32,
    parent: u32,
    node_type: Option<String>,
    obtained: Option<Obtained>,
    error: Option<String>,
    #[serde(flatten)]
    descr: Description,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    msg: EnvelopeBody,
}

/// Header ids read leniently so later errors can name the node
fn peek_node_id(value: &Value) -> Option<u32> {
    let id = value.get("msg").unwrap_or(value).get("id")?;
    id.as_u64().and_then(|id| u32::try_from(id).ok())
}

/// Parses a JSON control message held in the first argument
pub fn parse(record: &RawRecord) -> Result<ControlEvent> {
    let body = match record.args().first() {
        Some(arg) if record.format_bytes() == b"%s" => arg.as_ref(),
        _ => record.format_bytes(),
    };
    let value: Value = serde_json::from_slice(body).map_err(|e| RgtError::BadControl {
        reason: format!("malformed JSON control message: {}", e),
        node_id: None,
        offset: None,
    })?;
    let node_id = peek_node_id(&value);
    let bad = |reason: String| RgtError::BadControl {
        reason,
        node_id,
        offset: None,
    };

    let enveloped = value.get("msg").is_some_and(Value::is_object)
        && value.get("type").is_some_and(Value::is_string);
    if enveloped {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| bad(format!("malformed control envelope: {}", e)))?;
        from_envelope(envelope, record).map_err(bad)
    } else {
        let flat: FlatMessage = serde_json::from_value(value)
            .map_err(|e| bad(format!("malformed JSON control message: {}", e)))?;
        from_flat(flat, record).map_err(bad)
    }
}

fn from_flat(msg: FlatMessage, record: &RawRecord) -> std::result::Result<ControlEvent, String> {
    if let Some(status) = msg.status {
        return end_event(msg.parent, msg.id, &status, msg.error);
    }
    let node_type = match msg.node_type.as_deref() {
        Some("TEST") => NodeType::Test,
        Some("PACKAGE") => NodeType::Package,
        Some("SESSION") => NodeType::Session,
        Some(other) => return Err(format!("unknown node type '{}'", other)),
        None => return Err("message has neither 'type' nor 'status'".to_string()),
    };
    Ok(ControlEvent::Start(start_info(node_type, msg.parent, msg.id, msg.descr, record)))
}

fn from_envelope(envelope: Envelope, record: &RawRecord) -> std::result::Result<ControlEvent, String> {
    let msg = envelope.msg;
    match envelope.kind.as_str() {
        "test_start" => {
            let node_type: NodeType = msg
                .node_type
                .as_deref()
                .ok_or("start message has no 'node_type'")?
                .parse()?;
            if node_type == NodeType::Branch {
                return Err("a branch is not a node".to_string());
            }
            Ok(ControlEvent::Start(start_info(node_type, msg.parent, msg.id, msg.descr, record)))
        }
        "test_end" => {
            let status = msg
                .obtained
                .map(|o| o.status)
                .ok_or("end message has no 'obtained.status'")?;
            end_event(msg.parent, msg.id, &status, msg.error)
        }
        other => Err(format!("unknown control message type '{}'", other)),
    }
}

fn end_event(
    parent_id: u32,
    node_id: u32,
    status: &str,
    error: Option<String>,
) -> std::result::Result<ControlEvent, String> {
    let status = ResultStatus::from_keyword(status)
        .ok_or_else(|| format!("unexpected status '{}'", status))?;
    Ok(ControlEvent::End(NodeEnd {
        parent_id,
        node_id,
        status,
        error: error.filter(|e| !e.is_empty() && status != ResultStatus::Passed),
    }))
}

fn start_info(
    node_type: NodeType,
    parent_id: u32,
    id: u32,
    descr: Description,
    record: &RawRecord,
) -> NodeInfo {
    let mut info = NodeInfo::new(node_type, parent_id, id, record.timestamp);
    info.start_offset = record.offset;
    info.name = descr.name;
    info.objective = descr.objective.filter(|o| !o.is_empty());
    info.page = descr.page;
    info.hash = descr.hash;
    info.tin = descr.tin.and_then(|tin| u32::try_from(tin).ok());
    info.authors = descr
        .authors
        .into_iter()
        .filter_map(Author::into_contact)
        .map(|a| a.strip_prefix("mailto:").map_or_else(|| a.clone(), str::to_string))
        .collect();
    info.params = descr
        .args
        .into_iter()
        .map(|(name, value)| Param { name, value })
        .collect();
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{Level, Timestamp};

    fn mi(json: &str) -> RawRecord {
        RawRecord::from_parts(
            "Tester",
            "Control",
            Timestamp::new(3, 0),
            Level::MI,
            "%s",
            &[json.as_bytes()],
        )
        .with_offset(17)
    }

    #[test]
    fn test_flat_start() {
        let event = parse(&mi(
            r#"{"id":5,"parent":1,"type":"TEST","name":"ping","objective":"Ping it",
                "tin":12,"page":"p.html","hash":"ab12",
                "authors":[{"email":"dev@example.org"}],
                "args":[["mtu","1500"],["mode","fast"]]}"#,
        ))
        .unwrap();
        let ControlEvent::Start(info) = event else {
            panic!("expected start");
        };
        assert_eq!(info.node_type, NodeType::Test);
        assert_eq!((info.parent_id, info.id), (1, 5));
        assert_eq!(info.name.as_deref(), Some("ping"));
        assert_eq!(info.objective.as_deref(), Some("Ping it"));
        assert_eq!(info.tin, Some(12));
        assert_eq!(info.authors, vec!["dev@example.org"]);
        assert_eq!(info.params, vec![Param::new("mtu", "1500"), Param::new("mode", "fast")]);
        assert_eq!(info.start_offset, 17);
    }

    #[test]
    fn test_flat_end() {
        let event = parse(&mi(r#"{"id":5,"parent":1,"status":"FAILED","error":"timeout"}"#)).unwrap();
        assert_eq!(
            event,
            ControlEvent::End(NodeEnd {
                parent_id: 1,
                node_id: 5,
                status: ResultStatus::Failed,
                error: Some("timeout".into()),
            })
        );
    }

    #[test]
    fn test_envelope() {
        let start = parse(&mi(
            r#"{"type":"test_start","msg":{"id":2,"parent":0,"node_type":"pkg","name":"suite"}}"#,
        ))
        .unwrap();
        let ControlEvent::Start(info) = start else {
            panic!("expected start");
        };
        assert_eq!(info.node_type, NodeType::Package);

        let end = parse(&mi(
            r#"{"type":"test_end","msg":{"id":2,"parent":0,"obtained":{"status":"PASSED"},"error":"x"}}"#,
        ))
        .unwrap();
        let ControlEvent::End(end) = end else {
            panic!("expected end");
        };
        assert_eq!(end.status, ResultStatus::Passed);
        assert_eq!(end.error, None);
    }

    #[test]
    fn test_rejects_bad_json() {
        let garbage = parse(&mi("{not json")).unwrap_err();
        assert!(garbage.is_recoverable());

        for json in [
            r#"{"id":5,"parent":1}"#,
            r#"{"id":5,"parent":1,"type":"test"}"#,
            r#"{"id":5,"parent":1,"status":"MAYBE"}"#,
            r#"{"type":"test_middle","msg":{"id":5,"parent":1}}"#,
        ] {
            let err = parse(&mi(json)).unwrap_err();
            assert!(matches!(err, RgtError::BadControl { node_id: Some(5), .. }), "{}", json);
        }
    }
}
