//! Execution flow tree
//!
//! The tree mirrors what the Tester ran: sessions contain packages and
//! tests, packages contain one session, and a session may run children
//! in parallel branches.
//!
//! ```text
//!   root session (id 0)
//!     ├── branch 0: pkg A ──> test 3 ──> test 4      (one after another)
//!     └── branch 1: test 7                           (in parallel with A)
//! ```
//!
//! ## Membership
//!
//! Every node that is not yet closed sits in at most one of two sets:
//!
//! - **open**: may accept a child now (sessions and packages)
//! - **awaiting close**: may be closed but accepts no children (tests,
//!   and sessions whose parallel branches have all finished)
//!
//! A node in the open set with no running children may also be closed.
//!
//! ## Message attachment
//!
//! Each message lands in exactly one queue. Descending from the root, a
//! session hands the message to the first branch whose time window
//! covers it; a message between two sequential children goes to the
//! `after` queue of the earlier child. Closing a node re-routes the
//! messages its subtree holds past the new end timestamp.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::node::{NodeId, NodeInfo, NodeType, ResultStatus, ROOT_ID};
use super::queue::MessageQueue;
use crate::arena::{NodeArena, NodeIdx};
use crate::error::{Result, RgtError};
use crate::filter::{FilterMode, FilterPolicy, Provenance};
use crate::output::{NodeView, Renderer};
use crate::raw::{Level, RawRecord, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchState {
    Active,
    Idle,
}

#[derive(Debug)]
struct Branch {
    first: NodeIdx,
    last: NodeIdx,
    state: BranchState,
    start_ts: Timestamp,
    end_ts: Timestamp,
}

impl Branch {
    fn covers(&self, ts: Timestamp) -> bool {
        self.start_ts <= ts && (self.state == BranchState::Active || ts <= self.end_ts)
    }
}

#[derive(Debug)]
struct TreeNode {
    info: NodeInfo,
    parent: Option<NodeIdx>,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
    path: String,
    mode: FilterMode,
    messages: MessageQueue,
    after: MessageQueue,
    verdicts: MessageQueue,
    artifacts: MessageQueue,
    branches: Vec<Branch>,
    active_branches: usize,
    more_branches: bool,
}

impl TreeNode {
    fn new(info: NodeInfo, parent: Option<NodeIdx>, path: String, mode: FilterMode) -> Self {
        Self {
            info,
            parent,
            prev: None,
            next: None,
            path,
            mode,
            messages: MessageQueue::new(),
            after: MessageQueue::new(),
            verdicts: MessageQueue::new(),
            artifacts: MessageQueue::new(),
            branches: Vec::new(),
            active_branches: 0,
            more_branches: true,
        }
    }

    fn view(&self) -> NodeView<'_> {
        NodeView {
            info: &self.info,
            verdicts: self.verdicts.as_slice(),
            artifacts: self.artifacts.as_slice(),
        }
    }
}

/// Where a message is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Own(NodeIdx),
    After(NodeIdx),
}

/// Set a node currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Open,
    AwaitingClose,
    None,
}

/// Execution flow tree with attached messages
#[derive(Debug)]
pub struct FlowTree {
    nodes: NodeArena<TreeNode>,
    root: NodeIdx,
    by_id: HashMap<NodeId, NodeIdx>,
    open_set: HashMap<NodeId, NodeIdx>,
    close_set: HashMap<NodeId, NodeIdx>,
    policy: Arc<FilterPolicy>,
}

impl Default for FlowTree {
    fn default() -> Self {
        Self::new(Arc::new(FilterPolicy::pass_all()))
    }
}

fn tree_error(node_id: NodeId, reason: String) -> RgtError {
    RgtError::BadTreeOp {
        reason,
        node_id,
        offset: None,
    }
}

impl FlowTree {
    /// Creates a tree holding only the root session
    pub fn new(policy: Arc<FilterPolicy>) -> Self {
        let mut nodes = NodeArena::new();
        let mode = policy.check_branch("/").or(FilterMode::Include);
        let root = nodes.alloc(TreeNode::new(NodeInfo::root(), None, String::new(), mode));
        let mut tree = Self {
            nodes,
            root,
            by_id: HashMap::new(),
            open_set: HashMap::new(),
            close_set: HashMap::new(),
            policy,
        };
        tree.by_id.insert(ROOT_ID, root);
        tree.open_set.insert(ROOT_ID, root);
        tree
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Adds a node below `info.parent_id`
    ///
    /// The parent must be open for children. A parent that has not yet
    /// seen a child finish starts a new parallel branch; otherwise the
    /// node continues the parent's single branch.
    pub fn add_node(&mut self, info: NodeInfo) -> Result<NodeIdx> {
        let id = info.id;
        let parent_id = info.parent_id;
        let node_type = info.node_type;

        if node_type == NodeType::Branch {
            return Err(tree_error(id, format!("node {} cannot be a branch", id)));
        }
        if self.by_id.contains_key(&id) {
            return Err(tree_error(id, format!("node {} already exists", id)));
        }
        let Some(&parent_idx) = self.open_set.get(&parent_id) else {
            return Err(tree_error(
                id,
                format!(
                    "unexpected start of {} {}: node {} does not accept children",
                    node_type, id, parent_id
                ),
            ));
        };

        let parent = self.nodes.get(parent_idx);
        if parent.info.node_type == NodeType::Package
            && (node_type != NodeType::Session || !parent.branches.is_empty())
        {
            return Err(tree_error(
                id,
                format!("package {} accepts a single session, got {} {}", parent_id, node_type, id),
            ));
        }
        let spawn_branch = parent.more_branches;
        if !spawn_branch && !(parent.branches.len() == 1 && parent.active_branches == 0) {
            return Err(tree_error(
                id,
                format!("{} {} cannot spawn new branches", parent.info.node_type, parent_id),
            ));
        }

        let path = match &info.name {
            Some(name) => format!("{}/{}", parent.path, name),
            None => parent.path.clone(),
        };
        let mode = match &info.name {
            Some(_) => self.policy.check_branch(&path).or(parent.mode),
            None => parent.mode,
        };
        let start_ts = info.start_ts;

        let idx = self.nodes.alloc(TreeNode::new(info, Some(parent_idx), path, mode));
        if spawn_branch {
            let parent = self.nodes.get_mut(parent_idx);
            parent.branches.push(Branch {
                first: idx,
                last: idx,
                state: BranchState::Active,
                start_ts,
                end_ts: Timestamp::MAX,
            });
            parent.info.n_branches += 1;
        } else {
            let last = self.nodes.get(parent_idx).branches[0].last;
            self.nodes.get_mut(idx).prev = Some(last);
            self.nodes.get_mut(last).next = Some(idx);
            let branch = &mut self.nodes.get_mut(parent_idx).branches[0];
            branch.last = idx;
            branch.state = BranchState::Active;
            branch.end_ts = Timestamp::MAX;
            self.open_set.remove(&parent_id);
        }
        self.nodes.get_mut(parent_idx).active_branches += 1;
        self.close_set.remove(&parent_id);

        if node_type == NodeType::Test {
            self.close_set.insert(id, idx);
        } else {
            self.open_set.insert(id, idx);
        }
        self.by_id.insert(id, idx);
        debug!(id, parent = parent_id, kind = %node_type, branch = spawn_branch, "node started");
        Ok(idx)
    }

    /// Closes `node_id`, which must be a child of `parent_id`
    pub fn close_node(
        &mut self,
        parent_id: NodeId,
        node_id: NodeId,
        end_ts: Timestamp,
        result: ResultStatus,
        error: Option<String>,
    ) -> Result<NodeIdx> {
        let idx = match self.close_set.get(&node_id) {
            Some(&idx) => idx,
            None => match self.open_set.get(&node_id) {
                Some(&idx) if node_id != ROOT_ID && self.nodes.get(idx).active_branches == 0 => idx,
                _ => {
                    return Err(tree_error(
                        node_id,
                        format!("unexpected end of node {}", node_id),
                    ))
                }
            },
        };

        let node = self.nodes.get_mut(idx);
        if node.info.parent_id != parent_id {
            return Err(tree_error(
                node_id,
                format!(
                    "end of node {} names parent {}, but it was started under {}",
                    node_id, parent_id, node.info.parent_id
                ),
            ));
        }
        let Some(parent_idx) = node.parent else {
            return Err(tree_error(node_id, "the root session cannot be closed".to_string()));
        };
        let end_ts = end_ts.max(node.info.start_ts);
        node.info.end_ts = end_ts;
        node.info.result = result;
        node.info.error = error.filter(|_| result != ResultStatus::Passed);

        self.close_set.remove(&node_id);
        self.open_set.remove(&node_id);

        let mut late = Vec::new();
        self.take_late(idx, end_ts, &mut late);

        let parent = self.nodes.get_mut(parent_idx);
        parent.more_branches = false;
        parent.active_branches = parent.active_branches.saturating_sub(1);
        if let Some(branch) = parent.branches.iter_mut().find(|b| b.last == idx) {
            branch.state = BranchState::Idle;
            branch.end_ts = end_ts;
        }
        let parent_ready = parent.active_branches == 0;
        let single_branch = parent.branches.len() == 1;

        self.open_set.remove(&parent_id);
        if parent_ready {
            if single_branch {
                self.open_set.insert(parent_id, parent_idx);
            } else {
                self.close_set.insert(parent_id, parent_idx);
            }
        }
        if !late.is_empty() {
            debug!(id = node_id, count = late.len(), "rerouting messages past node end");
        }
        for record in late {
            self.attach_message(record);
        }
        debug!(id = node_id, parent = parent_id, %result, "node closed");
        Ok(idx)
    }

    /// Moves out messages stored under `idx` that are later than `end_ts`
    ///
    /// Messages are placed on arrival, while the node's end is still
    /// unknown. Covers the node's own queue and every queue of its subtree.
    fn take_late(&mut self, idx: NodeIdx, end_ts: Timestamp, into: &mut Vec<RawRecord>) {
        let node = self.nodes.get_mut(idx);
        into.extend(node.messages.split_after(end_ts));
        let tails: Vec<NodeIdx> = node.branches.iter().map(|b| b.last).collect();
        for tail in tails {
            let mut cur = Some(tail);
            while let Some(child) = cur {
                let child_node = self.nodes.get_mut(child);
                into.extend(child_node.after.split_after(end_ts));
                cur = child_node.prev;
                self.take_late(child, end_ts, into);
            }
        }
    }

    /// Next node that end of input should close, innermost first
    pub fn next_unclosed(&self) -> Option<(NodeId, NodeId)> {
        self.close_set
            .values()
            .chain(self.open_set.values())
            .copied()
            .filter(|&idx| idx != self.root && self.nodes.get(idx).active_branches == 0)
            .max()
            .map(|idx| {
                let info = &self.nodes.get(idx).info;
                (info.parent_id, info.id)
            })
    }

    pub fn membership(&self, id: NodeId) -> Membership {
        if self.open_set.contains_key(&id) {
            Membership::Open
        } else if self.close_set.contains_key(&id) {
            Membership::AwaitingClose
        } else {
            Membership::None
        }
    }

    pub fn open_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.open_set.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn awaiting_close_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.close_set.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn find(&self, id: NodeId) -> Option<NodeIdx> {
        self.by_id.get(&id).copied()
    }

    pub fn info(&self, idx: NodeIdx) -> &NodeInfo {
        &self.nodes.get(idx).info
    }

    pub fn info_mut(&mut self, idx: NodeIdx) -> &mut NodeInfo {
        &mut self.nodes.get_mut(idx).info
    }

    /// Slash-separated path used for branch filtering
    pub fn path(&self, idx: NodeIdx) -> &str {
        &self.nodes.get(idx).path
    }

    pub fn view(&self, idx: NodeIdx) -> NodeView<'_> {
        self.nodes.get(idx).view()
    }

    /// Effective filter mode of a node
    pub fn node_mode(&self, idx: NodeIdx) -> FilterMode {
        self.nodes.get(idx).mode
    }

    /// Messages stored inside a node and right after it
    pub fn messages(&self, idx: NodeIdx) -> (&[RawRecord], &[RawRecord]) {
        let node = self.nodes.get(idx);
        (node.messages.as_slice(), node.after.as_slice())
    }

    /// Number of messages held by all queues
    pub fn message_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|(_, n)| n.messages.len() + n.after.len())
            .sum()
    }

    fn locate(&self, idx: NodeIdx, ts: Timestamp) -> Option<Slot> {
        let node = self.nodes.get(idx);
        if ts < node.info.start_ts {
            return None;
        }
        if ts > node.info.end_ts {
            return Some(Slot::After(idx));
        }
        if node.info.node_type == NodeType::Test {
            return Some(Slot::Own(idx));
        }

        let branch = node.branches.iter().find(|b| b.covers(ts)).or_else(|| {
            node.branches
                .iter()
                .filter(|b| b.start_ts <= ts)
                .max_by_key(|b| b.end_ts)
        });
        let Some(branch) = branch else {
            return Some(Slot::Own(idx));
        };

        let mut cur = branch.last;
        loop {
            if let Some(slot) = self.locate(cur, ts) {
                return Some(slot);
            }
            match self.nodes.get(cur).prev {
                Some(prev) => cur = prev,
                None => return Some(Slot::Own(idx)),
            }
        }
    }

    /// Stores a message in the one queue its timestamp selects
    pub fn attach_message(&mut self, record: RawRecord) {
        let slot = self
            .locate(self.root, record.timestamp)
            .unwrap_or(Slot::Own(self.root));
        match slot {
            Slot::Own(idx) => self.nodes.get_mut(idx).messages.insert(record),
            Slot::After(idx) => self.nodes.get_mut(idx).after.insert(record),
        }
    }

    /// Innermost test whose lifetime covers `ts`
    pub fn covering_test(&self, ts: Timestamp) -> Option<NodeIdx> {
        match self.locate(self.root, ts)? {
            Slot::Own(idx) if self.nodes.get(idx).info.node_type == NodeType::Test => Some(idx),
            _ => None,
        }
    }

    /// Files a verdict or artifact under the test covering its timestamp
    ///
    /// Returns false when no test covers it.
    pub fn attach_result(&mut self, record: RawRecord, provenance: Provenance) -> bool {
        let Some(idx) = self.covering_test(record.timestamp) else {
            return false;
        };
        let node = self.nodes.get_mut(idx);
        match provenance {
            Provenance::Verdict => node.verdicts.insert(record),
            Provenance::Artifact => node.artifacts.insert(record),
            Provenance::Normal => return false,
        }
        true
    }

    fn mode_at(&self, idx: NodeIdx, ts: Timestamp) -> FilterMode {
        let node = self.nodes.get(idx);
        if ts < node.info.start_ts || ts > node.info.end_ts {
            return FilterMode::Default;
        }
        if node.info.node_type == NodeType::Test {
            return node.mode;
        }

        let mut result = FilterMode::Default;
        let mut covered = false;
        for branch in node.branches.iter().filter(|b| b.covers(ts)) {
            covered = true;
            let mut cur = Some(branch.last);
            result = loop {
                let Some(c) = cur else { break node.mode };
                let child = self.nodes.get(c);
                if ts < child.info.start_ts {
                    cur = child.prev;
                    continue;
                }
                if ts > child.info.end_ts {
                    break node.mode;
                }
                break self.mode_at(c, ts).or(node.mode);
            };
            if result == FilterMode::Include {
                return FilterMode::Include;
            }
        }
        if covered {
            result
        } else {
            node.mode
        }
    }

    /// Mode of the innermost nodes running at `ts`
    ///
    /// Include as soon as any covering node includes.
    pub fn filter_message(&self, ts: Timestamp) -> FilterMode {
        self.mode_at(self.root, ts).or(FilterMode::Include)
    }

    /// Walks the closed tree in execution order
    pub fn traverse(&self, renderer: &mut dyn Renderer) -> Result<()> {
        let mut walk = Walk {
            tree: self,
            renderer,
            nest: 0,
        };
        let root = self.nodes.get(self.root);
        let shown = !root.mode.is_excluded();
        if shown {
            for msg in &root.messages {
                walk.message(msg)?;
            }
        }
        for branch in &root.branches {
            walk.wander(branch.first)?;
        }
        if shown {
            for msg in &root.after {
                walk.message(msg)?;
            }
        }
        Ok(())
    }
}

struct Walk<'t, 'r> {
    tree: &'t FlowTree,
    renderer: &'r mut dyn Renderer,
    nest: u32,
}

impl Walk<'_, '_> {
    fn wander(&mut self, first: NodeIdx) -> Result<()> {
        let tree = self.tree;
        let mut cur = Some(first);
        while let Some(idx) = cur {
            let node = tree.nodes.get(idx);
            let node_type = node.info.node_type;
            let visible = !node.mode.is_excluded()
                && !tree
                    .policy
                    .check_duration(node_type, node.info.duration_micros())
                    .is_excluded();
            let view = node.view();

            if visible {
                self.renderer.on_start(node_type, &view)?;
                for msg in &node.messages {
                    self.message(msg)?;
                }
            }
            for branch in &node.branches {
                if visible {
                    self.renderer.on_start(NodeType::Branch, &view)?;
                }
                self.wander(branch.first)?;
                if visible {
                    self.renderer.on_end(NodeType::Branch, &view)?;
                }
            }
            if visible {
                self.renderer.on_end(node_type, &view)?;
                self.nest = 0;
            }

            let parent_shown = node
                .parent
                .map_or(true, |p| !tree.nodes.get(p).mode.is_excluded());
            if parent_shown {
                for msg in &node.after {
                    self.message(msg)?;
                }
            }
            cur = node.next;
        }
        Ok(())
    }

    /// Emits a message, tracking step nesting
    fn message(&mut self, msg: &RawRecord) -> Result<()> {
        let nest = if msg.level.contains(Level::CONTROL) {
            match msg.user_bytes() {
                b"Step" => {
                    self.nest = 1;
                    0
                }
                b"SubStep" => {
                    self.nest = 2;
                    1
                }
                b"StepPush" => {
                    let level = self.nest;
                    self.nest += 1;
                    level
                }
                b"StepPop" => {
                    self.nest = self.nest.saturating_sub(1);
                    self.nest
                }
                b"StepNext" => self.nest.saturating_sub(1),
                b"StepReset" => {
                    self.nest = 0;
                    return Ok(());
                }
                _ => self.nest,
            }
        } else {
            self.nest
        };
        self.renderer.on_regular(msg, nest)
    }
}
