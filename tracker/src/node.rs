//! Tracker node records and their pure state queries.

use serde::Serialize;

use crate::arena::ArenaId;

/// Handle to a node in the run's tree.
pub type NodeId = ArenaId;

/// Name of the anchor node created by `start_run`. The root is never
/// opened, closed, or failed directly; drivers acquire the test body as a
/// section beneath it.
pub const ROOT_NAME: &str = "{root}";

/// Traversal state of a single node.
///
/// `NotStarted → Executing → {ExecutingChildren → CompletedSuccessfully | Failed}`,
/// with `NeedsAnotherRun` reachable from any non-terminal state when a later
/// cycle must revisit the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    NotStarted,
    Executing,
    ExecutingChildren,
    NeedsAnotherRun,
    CompletedSuccessfully,
    Failed,
}

/// What kind of guarded block a node tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A named block entered at most once per run.
    Section,
    /// A block executed once per value in a fixed-size sequence, one value
    /// per cycle. `index` is `None` until the first advance.
    Generator { size: usize, index: Option<usize> },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Generator { .. } => "generator",
        }
    }
}

/// One node of the tracker tree.
///
/// Owned by the run's arena; parent and children are handles into it.
/// Children are kept in first-encountered order, which the close logic
/// relies on (a parent completes only once its last-added child has).
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) state: NodeState,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub(crate) fn section(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            state: NodeState::NotStarted,
            kind: NodeKind::Section,
            parent,
            children: Vec::new(),
        }
    }

    pub(crate) fn generator(name: &str, parent: NodeId, size: usize) -> Self {
        Self {
            name: name.to_string(),
            state: NodeState::NotStarted,
            kind: NodeKind::Generator { size, index: None },
            parent: Some(parent),
            children: Vec::new(),
        }
    }

    /// Finished, successfully or not.
    pub(crate) fn is_complete(&self) -> bool {
        matches!(
            self.state,
            NodeState::CompletedSuccessfully | NodeState::Failed
        )
    }

    pub(crate) fn is_successfully_completed(&self) -> bool {
        self.state == NodeState::CompletedSuccessfully
    }

    /// Started but not yet complete.
    pub(crate) fn is_open(&self) -> bool {
        self.state != NodeState::NotStarted && !self.is_complete()
    }
}
