//! Filter policy evaluation
//!
//! Three independent rule sets decide what reaches the report:
//!
//! - **Entity rules** match a message by entity, user, level and time.
//!   When several match, the most specific one wins.
//! - **Branch rules** match a node by its slash-separated path. The
//!   longest matching path prefix wins.
//! - **Duration rules** match a node by type and duration window. The
//!   first matching rule wins.
//!
//! ## Entity rule specificity
//!
//! ```text
//! score = 4 * has(name) + 2 * has(user) + has(from/to)
//! ties: narrower level mask wins, then the later rule
//! ```
//!
//! A message matching no rule passes.

use glob::Pattern;

use crate::flow::NodeType;
use crate::raw::{Level, Timestamp};

/// Filter decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Pass the message or node
    Include,
    /// Drop the message or node
    Exclude,
    /// No opinion; the caller inherits from context
    Default,
}

impl FilterMode {
    /// Parses `pass`/`fail` (and the synonyms `include`/`exclude`)
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "pass" | "include" => Some(FilterMode::Include),
            "fail" | "exclude" => Some(FilterMode::Exclude),
            "default" => Some(FilterMode::Default),
            _ => None,
        }
    }

    /// Resolves `Default` to `fallback`
    pub fn or(self, fallback: FilterMode) -> FilterMode {
        match self {
            FilterMode::Default => fallback,
            other => other,
        }
    }

    pub fn is_excluded(self) -> bool {
        self == FilterMode::Exclude
    }
}

/// What a message means beyond its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Provenance {
    #[default]
    Normal,
    Verdict,
    Artifact,
}

/// User name of verdict messages
pub const VERDICT_USER: &str = "Verdict";
/// User name of artifact messages
pub const ARTIFACT_USER: &str = "Artifact";
/// Older loggers report verdicts under this user
pub const LEGACY_VERDICT_USER: &str = "TE Log Control-Message";

/// Result of checking one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageVerdict {
    pub mode: FilterMode,
    pub provenance: Provenance,
}

/// Message matching rule
#[derive(Debug, Clone)]
pub struct EntityRule {
    pub entity: Option<Pattern>,
    pub user: Option<Pattern>,
    pub level: Option<Level>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub mode: FilterMode,
}

impl EntityRule {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            entity: None,
            user: None,
            level: None,
            from: None,
            to: None,
            mode,
        }
    }

    pub fn with_entity(mut self, pattern: Pattern) -> Self {
        self.entity = Some(pattern);
        self
    }

    pub fn with_user(mut self, pattern: Pattern) -> Self {
        self.user = Some(pattern);
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_range(mut self, from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn matches(&self, entity: &str, user: &str, level: Level, ts: Timestamp) -> bool {
        self.entity.as_ref().map_or(true, |p| p.matches(entity))
            && self.user.as_ref().map_or(true, |p| p.matches(user))
            && self.level.map_or(true, |mask| mask.intersects(level))
            && self.from.map_or(true, |from| ts >= from)
            && self.to.map_or(true, |to| ts <= to)
    }

    fn score(&self) -> u8 {
        let mut score = 0;
        if self.entity.is_some() {
            score += 4;
        }
        if self.user.is_some() {
            score += 2;
        }
        if self.from.is_some() || self.to.is_some() {
            score += 1;
        }
        score
    }

    /// Bits covered by the level mask; all bits when unrestricted
    fn level_width(&self) -> u32 {
        self.level.map_or(u16::BITS, |mask| mask.bits().count_ones())
    }
}

/// Node path rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRule {
    components: Vec<String>,
    pub mode: FilterMode,
}

impl BranchRule {
    pub fn new(path: &str, mode: FilterMode) -> Self {
        Self {
            components: split_path(path),
            mode,
        }
    }

    pub fn path(&self) -> String {
        format!("/{}", self.components.join("/"))
    }
}

/// Node duration rule; bounds are inclusive microseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationRule {
    pub node_type: NodeType,
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub mode: FilterMode,
}

impl DurationRule {
    fn matches(&self, node_type: NodeType, duration: u64) -> bool {
        self.node_type == node_type
            && self.min.map_or(true, |min| duration >= min)
            && self.max.map_or(true, |max| duration <= max)
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loaded filter rules
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    entity_rules: Vec<EntityRule>,
    branch_rules: Vec<BranchRule>,
    duration_rules: Vec<DurationRule>,
}

impl FilterPolicy {
    /// A policy that passes everything
    pub fn pass_all() -> Self {
        Self::default()
    }

    pub fn with_entity_rule(mut self, rule: EntityRule) -> Self {
        self.entity_rules.push(rule);
        self
    }

    pub fn with_branch_rule(mut self, rule: BranchRule) -> Self {
        self.branch_rules.push(rule);
        self
    }

    pub fn with_duration_rule(mut self, rule: DurationRule) -> Self {
        self.duration_rules.push(rule);
        self
    }

    pub fn push_entity_rule(&mut self, rule: EntityRule) {
        self.entity_rules.push(rule);
    }

    pub fn push_branch_rule(&mut self, rule: BranchRule) {
        self.branch_rules.push(rule);
    }

    pub fn push_duration_rule(&mut self, rule: DurationRule) {
        self.duration_rules.push(rule);
    }

    pub fn is_pass_all(&self) -> bool {
        self.entity_rules.is_empty() && self.branch_rules.is_empty() && self.duration_rules.is_empty()
    }

    pub fn entity_rules(&self) -> &[EntityRule] {
        &self.entity_rules
    }

    /// Returns a copy without the entity rule at `index`
    pub fn without_entity_rule(&self, index: usize) -> Self {
        let mut copy = self.clone();
        if index < copy.entity_rules.len() {
            copy.entity_rules.remove(index);
        }
        copy
    }

    /// Decides whether a message passes and tags what it carries
    pub fn check_message(&self, entity: &str, user: &str, level: Level, ts: Timestamp) -> MessageVerdict {
        let winner = self
            .entity_rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(entity, user, level, ts))
            .max_by(|(ia, a), (ib, b)| {
                a.score()
                    .cmp(&b.score())
                    .then(b.level_width().cmp(&a.level_width()))
                    .then(ia.cmp(ib))
            });

        let mode = match winner {
            Some((_, rule)) => rule.mode.or(FilterMode::Include),
            None => FilterMode::Include,
        };

        MessageVerdict {
            mode,
            provenance: provenance_of(user, level),
        }
    }

    /// Mode of the node at `path`, `Default` when no rule covers it
    pub fn check_branch(&self, path: &str) -> FilterMode {
        let components = split_path(path);
        self.branch_rules
            .iter()
            .filter(|rule| {
                rule.components.len() <= components.len()
                    && rule.components.iter().zip(&components).all(|(a, b)| a == b)
            })
            .max_by_key(|rule| rule.components.len())
            .map_or(FilterMode::Default, |rule| rule.mode)
    }

    /// Whether a node of this type and duration is shown
    pub fn check_duration(&self, node_type: NodeType, duration: u64) -> FilterMode {
        self.duration_rules
            .iter()
            .find(|rule| rule.matches(node_type, duration))
            .map_or(FilterMode::Include, |rule| rule.mode.or(FilterMode::Include))
    }
}

fn provenance_of(user: &str, level: Level) -> Provenance {
    if user == LEGACY_VERDICT_USER {
        return Provenance::Verdict;
    }
    if !level.contains(Level::CONTROL) {
        return Provenance::Normal;
    }
    match user {
        VERDICT_USER => Provenance::Verdict,
        ARTIFACT_USER => Provenance::Artifact,
        _ => Provenance::Normal,
    }
}
