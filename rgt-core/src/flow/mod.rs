//! Execution flow tracking
//!
//! Control messages from the Tester build a [`FlowTree`] of sessions,
//! packages and tests. Regular messages are either attached to the tree
//! (postponed reports) or checked against it and streamed (live output).

pub mod node;
pub mod queue;
pub mod tree;

pub use node::{NodeId, NodeInfo, NodeType, Param, ResultStatus, ROOT_ID};
pub use queue::MessageQueue;
pub use tree::{FlowTree, Membership};
