//! Diagnostic snapshot of the tracker tree.
//!
//! The live tree is handle-based and mutable; a snapshot is a plain nested
//! value suitable for logging, serialization, and stable test assertions.
//! Snapshots are never fed back into a run.

use serde::Serialize;

use crate::context::RunContext;
use crate::error::Result;
use crate::node::{NodeId, NodeKind, NodeState};

/// Point-in-time view of one node and its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub state: NodeState,
    #[serde(flatten)]
    pub kind: KindSnapshot,
    pub children: Vec<NodeSnapshot>,
}

/// Kind-specific fields, flattened into the node object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindSnapshot {
    Section,
    Generator { size: usize, index: Option<usize> },
}

impl NodeSnapshot {
    /// Capture the whole tree from the run's root, or `None` outside a run.
    pub fn capture(ctx: &RunContext) -> Option<Self> {
        let root = ctx.root()?;
        Self::capture_from(ctx, root).ok()
    }

    /// Capture the subtree rooted at `id`.
    pub fn capture_from(ctx: &RunContext, id: NodeId) -> Result<Self> {
        let node = ctx.node(id)?;
        let mut children = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            children.push(Self::capture_from(ctx, child)?);
        }
        Ok(Self {
            name: node.name.clone(),
            state: node.state,
            kind: match node.kind {
                NodeKind::Section => KindSnapshot::Section,
                NodeKind::Generator { size, index } => KindSnapshot::Generator { size, index },
            },
            children,
        })
    }

    /// Walk a `/`-separated name path to a descendant.
    pub fn descendant(&self, path: &str) -> Option<&NodeSnapshot> {
        let mut node = self;
        for name in path.split('/') {
            node = node.children.iter().find(|child| child.name == name)?;
        }
        Some(node)
    }
}
