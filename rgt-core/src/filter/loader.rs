//! Filter document loader
//!
//! ## Document shape
//!
//! ```xml
//! <filters>
//!   <entity-filter name="Agt_*" user="Conf" level="ERROR|WARN"
//!                  from="100.5" to="200" mode="fail"/>
//!   <branch-filter path="/suite/slow" mode="fail"/>
//!   <duration-filter type="test" min="0" max="0.5" mode="fail"/>
//!
//!   <!-- older documents nest branch rules in an entity filter -->
//!   <entity-filter mode="pass">
//!     <branch path="/suite/fast" mode="pass"/>
//!   </entity-filter>
//! </filters>
//! ```
//!
//! Timestamps are `SEC[.FRACTION]`, durations are seconds with an optional
//! fraction. An empty document (or one with no `<filters>` root) loads as
//! a pass-all policy.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use glob::Pattern;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::policy::{BranchRule, DurationRule, EntityRule, FilterMode, FilterPolicy};
use crate::error::{Result, RgtError};
use crate::flow::NodeType;
use crate::raw::{Level, Timestamp};

const ROOT_TAG: &str = "filters";

/// Loads [`FilterPolicy`] documents
#[derive(Debug, Default)]
pub struct FilterLoader {
    source: String,
}

type Attrs = HashMap<String, String>;

/// Entity filter whose children are still being read
struct OpenEntityFilter {
    attrs: Attrs,
    nested_branches: usize,
}

impl FilterLoader {
    pub fn new() -> Self {
        Self {
            source: "<inline>".to_string(),
        }
    }

    /// Loads a filter file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<FilterPolicy> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RgtError::FilterLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let loader = Self {
            source: path.display().to_string(),
        };
        loader.parse(&content)
    }

    /// Loads a filter document held in memory
    pub fn load_from_str(xml: &str) -> Result<FilterPolicy> {
        Self::new().parse(xml)
    }

    fn error(&self, reason: impl Into<String>) -> RgtError {
        RgtError::FilterLoad {
            path: self.source.clone(),
            reason: reason.into(),
        }
    }

    fn parse(&self, xml: &str) -> Result<FilterPolicy> {
        let mut policy = FilterPolicy::pass_all();
        if xml.trim().is_empty() {
            return Ok(policy);
        }

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut in_root = false;
        let mut saw_root = false;
        let mut open_entity: Option<OpenEntityFilter> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| self.error(format!("malformed XML at byte {}: {}", reader.buffer_position(), e)))?;
            match event {
                Event::Start(e) => {
                    let tag = tag_name(&e);
                    depth += 1;
                    if depth == 1 {
                        in_root = tag == ROOT_TAG;
                        saw_root |= in_root;
                        if !in_root {
                            warn!(source = %self.source, root = %tag, "unexpected filter root, no filtering");
                        }
                        continue;
                    }
                    if !in_root {
                        continue;
                    }
                    match (depth, tag.as_str()) {
                        (2, "entity-filter") => {
                            open_entity = Some(OpenEntityFilter {
                                attrs: self.attributes(&e)?,
                                nested_branches: 0,
                            });
                        }
                        (3, "branch") => self.nested_branch(&e, open_entity.as_mut(), &mut policy)?,
                        (2, _) => self.rule(&tag, &e, &mut policy)?,
                        _ => debug!(tag = %tag, "ignoring nested filter element"),
                    }
                }
                Event::Empty(e) => {
                    let tag = tag_name(&e);
                    if depth == 0 {
                        saw_root |= tag == ROOT_TAG;
                        continue;
                    }
                    if !in_root {
                        continue;
                    }
                    match (depth + 1, tag.as_str()) {
                        (3, "branch") => self.nested_branch(&e, open_entity.as_mut(), &mut policy)?,
                        (2, _) => self.rule(&tag, &e, &mut policy)?,
                        _ => debug!(tag = %tag, "ignoring nested filter element"),
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        if let Some(open) = open_entity.take() {
                            if open.nested_branches == 0 {
                                policy.push_entity_rule(self.entity_rule(&open.attrs)?);
                            }
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            warn!(source = %self.source, "filter document has no <filters> root, no filtering");
        }
        Ok(policy)
    }

    fn rule(&self, tag: &str, e: &BytesStart<'_>, policy: &mut FilterPolicy) -> Result<()> {
        let attrs = self.attributes(e)?;
        match tag {
            "entity-filter" => policy.push_entity_rule(self.entity_rule(&attrs)?),
            "branch-filter" => policy.push_branch_rule(self.branch_rule(&attrs, None)?),
            "duration-filter" => policy.push_duration_rule(self.duration_rule(&attrs)?),
            other => return Err(self.error(format!("unknown filter element <{}>", other))),
        }
        Ok(())
    }

    fn nested_branch(
        &self,
        e: &BytesStart<'_>,
        parent: Option<&mut OpenEntityFilter>,
        policy: &mut FilterPolicy,
    ) -> Result<()> {
        let Some(parent) = parent else {
            return Err(self.error("<branch> outside of <entity-filter>"));
        };
        let attrs = self.attributes(e)?;
        let inherited = attrs
            .get("mode")
            .is_none()
            .then(|| parent.attrs.get("mode").cloned())
            .flatten();
        policy.push_branch_rule(self.branch_rule(&attrs, inherited.as_deref())?);
        parent.nested_branches += 1;
        Ok(())
    }

    fn attributes(&self, e: &BytesStart<'_>) -> Result<Attrs> {
        let mut attrs = Attrs::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.error(format!("bad attribute: {}", err)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| self.error(format!("bad value of '{}': {}", key, err)))?
                .into_owned();
            attrs.insert(key, value);
        }
        Ok(attrs)
    }

    fn mode(&self, attrs: &Attrs, fallback: Option<&str>) -> Result<FilterMode> {
        let text = attrs
            .get("mode")
            .map(String::as_str)
            .or(fallback)
            .ok_or_else(|| self.error("filter rule without 'mode'"))?;
        FilterMode::parse(text).ok_or_else(|| self.error(format!("unknown mode '{}'", text)))
    }

    fn pattern(&self, text: &str) -> Result<Pattern> {
        Pattern::new(text).map_err(|e| self.error(format!("bad pattern '{}': {}", text, e)))
    }

    fn entity_rule(&self, attrs: &Attrs) -> Result<EntityRule> {
        let mut rule = EntityRule::new(self.mode(attrs, None)?);
        if let Some(name) = attrs.get("name").or_else(|| attrs.get("entity")) {
            rule = rule.with_entity(self.pattern(name)?);
        }
        if let Some(user) = attrs.get("user") {
            rule = rule.with_user(self.pattern(user)?);
        }
        if let Some(level) = attrs.get("level") {
            rule = rule.with_level(Level::parse_mask(level).map_err(|e| self.error(e))?);
        }
        let from = attrs.get("from").map(|t| self.timestamp(t)).transpose()?;
        let to = attrs.get("to").map(|t| self.timestamp(t)).transpose()?;
        Ok(rule.with_range(from, to))
    }

    fn branch_rule(&self, attrs: &Attrs, inherited_mode: Option<&str>) -> Result<BranchRule> {
        let path = attrs
            .get("path")
            .ok_or_else(|| self.error("branch rule without 'path'"))?;
        Ok(BranchRule::new(path, self.mode(attrs, inherited_mode)?))
    }

    fn duration_rule(&self, attrs: &Attrs) -> Result<DurationRule> {
        let node_type = attrs
            .get("type")
            .ok_or_else(|| self.error("duration rule without 'type'"))?
            .parse::<NodeType>()
            .map_err(|e| self.error(e))?;
        Ok(DurationRule {
            node_type,
            min: attrs.get("min").map(|v| self.seconds(v)).transpose()?,
            max: attrs.get("max").map(|v| self.seconds(v)).transpose()?,
            mode: self.mode(attrs, None)?,
        })
    }

    fn timestamp(&self, text: &str) -> Result<Timestamp> {
        let micros = self.seconds(text)?;
        let sec = u32::try_from(micros / 1_000_000)
            .map_err(|_| self.error(format!("timestamp '{}' out of range", text)))?;
        Ok(Timestamp::new(sec, (micros % 1_000_000) as u32))
    }

    /// Parses `SEC[.FRACTION]` into microseconds
    fn seconds(&self, text: &str) -> Result<u64> {
        let bad = || self.error(format!("bad time value '{}'", text));
        let text = text.trim();
        let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) || frac.len() > 6 {
            return Err(bad());
        }
        let whole: u64 = whole.parse().map_err(|_| bad())?;
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| bad())?
        };
        whole
            .checked_mul(1_000_000)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(bad)
    }
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}
