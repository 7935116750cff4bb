//! Run context: cycle boundaries, the tree cursor, and the node state
//! machine.
//!
//! One [`RunContext`] owns the tracker tree for exactly one run. The driver
//! starts a run, then repeatedly starts a cycle and re-executes the test
//! body; guarded blocks acquire their node each time and read back whether
//! it is open. Every `close`/`fail` flags the cycle as completed, which
//! stops any further node from opening until the next `start_cycle`.

use tracing::{debug, trace};

use crate::arena::Arena;
use crate::error::{Result, TrackerError};
use crate::node::{Node, NodeId, NodeKind, NodeState, ROOT_NAME};

/// Where the run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    NotStarted,
    Executing,
    CompletedCycle,
}

/// Per-run cursor and root owner for the tracker tree.
#[derive(Debug)]
pub struct RunContext {
    nodes: Arena<Node>,
    root: Option<NodeId>,
    current: Option<NodeId>,
    phase: RunPhase,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            root: None,
            current: None,
            phase: RunPhase::NotStarted,
        }
    }

    // --- run and cycle boundaries ---

    /// Discard any previous tree and begin a fresh run.
    ///
    /// Creates the root anchor node and returns its handle. The root is
    /// never opened or closed; the test body is acquired as a section
    /// beneath it.
    pub fn start_run(&mut self) -> NodeId {
        self.nodes = Arena::new();
        let root = self.nodes.insert(Node::section(ROOT_NAME, None));
        self.root = Some(root);
        self.current = None;
        self.phase = RunPhase::Executing;
        debug!("run started");
        root
    }

    /// Release the tree. Handles from this run go stale.
    pub fn end_run(&mut self) {
        self.nodes = Arena::new();
        self.root = None;
        self.current = None;
        self.phase = RunPhase::NotStarted;
        debug!("run ended");
    }

    /// Begin one full re-execution of the test body against the existing
    /// tree: the cursor returns to the root and the completed-cycle flag is
    /// cleared.
    pub fn start_cycle(&mut self) -> Result<()> {
        let root = self
            .root
            .ok_or_else(|| TrackerError::invariant("start_cycle called before start_run"))?;
        self.current = Some(root);
        self.phase = RunPhase::Executing;
        trace!("cycle started");
        Ok(())
    }

    /// Flag the current cycle as completed. Nodes acquired afterwards are
    /// recorded but not opened until the next cycle.
    pub fn complete_cycle(&mut self) {
        self.phase = RunPhase::CompletedCycle;
    }

    pub fn completed_cycle(&self) -> bool {
        self.phase == RunPhase::CompletedCycle
    }

    /// The node most recently entered and not yet exited, if any.
    pub fn current_tracker(&self) -> Option<NodeId> {
        self.current
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    // --- node queries ---

    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.node(id)?.name)
    }

    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        Ok(self.node(id)?.state)
    }

    /// Finished, successfully or failed.
    pub fn is_complete(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_complete())
    }

    pub fn is_successfully_completed(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_successfully_completed())
    }

    /// Started but not complete. The caller executes a guarded block only
    /// while its node reports open.
    pub fn is_open(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_open())
    }

    /// Parent handle. Asking for the root's parent is a protocol violation.
    pub fn parent(&self, id: NodeId) -> Result<NodeId> {
        let node = self.node(id)?;
        node.parent
            .ok_or_else(|| TrackerError::invariant(format!("tracker '{}' has no parent", node.name)))
    }

    /// Look up a direct child by name. Sibling names are unique, so the
    /// result is unambiguous.
    pub fn find_child(&self, id: NodeId, name: &str) -> Result<Option<NodeId>> {
        for &child in &self.node(id)?.children {
            if self.node(child)?.name == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Current 0-based position of a generator, `None` before its first
    /// advance. While the generator is open this is always `Some`.
    pub fn generator_index(&self, id: NodeId) -> Result<Option<usize>> {
        let node = self.node(id)?;
        match node.kind {
            NodeKind::Generator { index, .. } => Ok(index),
            NodeKind::Section => Err(TrackerError::KindMismatch {
                name: node.name.clone(),
                existing: "section",
                requested: "generator",
            }),
        }
    }

    // --- acquire ---

    /// Find or create the section named `name` under the current node, and
    /// open it unless it already completed or the cycle is already flagged
    /// complete. The caller reads [`is_open`](Self::is_open) to decide
    /// whether to execute the block.
    pub fn acquire_section(&mut self, name: &str) -> Result<NodeId> {
        let parent = self.current()?;
        let id = match self.find_child(parent, name)? {
            Some(existing) => {
                let node = self.node(existing)?;
                if !matches!(node.kind, NodeKind::Section) {
                    return Err(TrackerError::KindMismatch {
                        name: name.to_string(),
                        existing: node.kind.label(),
                        requested: "section",
                    });
                }
                existing
            }
            None => self.add_child(parent, Node::section(name, Some(parent)))?,
        };
        if !self.completed_cycle() && !self.is_complete(id)? {
            self.open(id)?;
        }
        Ok(id)
    }

    /// Find or create the generator named `name` under the current node,
    /// advance it to its next index when it is due, and open it.
    ///
    /// `size` is fixed on first acquire; re-acquiring with a different size
    /// is rejected. The generator advances only when its subtree is not
    /// mid-traversal (`ExecutingChildren`) and no descendant failure marked
    /// it `NeedsAnotherRun` — in both cases the current index is revisited.
    pub fn acquire_generator(&mut self, name: &str, size: usize) -> Result<NodeId> {
        let parent = self.current()?;
        let id = match self.find_child(parent, name)? {
            Some(existing) => match self.node(existing)?.kind {
                NodeKind::Generator {
                    size: existing_size,
                    ..
                } => {
                    if existing_size != size {
                        return Err(TrackerError::SizeMismatch {
                            name: name.to_string(),
                            existing: existing_size,
                            requested: size,
                        });
                    }
                    existing
                }
                NodeKind::Section => {
                    return Err(TrackerError::KindMismatch {
                        name: name.to_string(),
                        existing: "section",
                        requested: "generator",
                    });
                }
            },
            None => {
                if size == 0 {
                    return Err(TrackerError::invariant(format!(
                        "generator '{name}' must have at least one value"
                    )));
                }
                self.add_child(parent, Node::generator(name, parent, size))?
            }
        };
        if !self.completed_cycle() && !self.is_complete(id)? {
            let state = self.state(id)?;
            if state != NodeState::ExecutingChildren && state != NodeState::NeedsAnotherRun {
                self.advance_generator(id)?;
            }
            self.open(id)?;
        }
        Ok(id)
    }

    // --- state-changing actions ---

    /// Close a node at the end of its block.
    ///
    /// Any descendants still recorded as current are force-closed first, so
    /// a subtree abandoned mid-body (e.g. a generator's) terminates
    /// cleanly. Afterwards the cursor sits at the node's parent and the
    /// cycle is flagged complete.
    pub fn close(&mut self, id: NodeId) -> Result<()> {
        loop {
            let current = self.current()?;
            if current == id {
                break;
            }
            self.close(current)?;
        }

        let state = self.state(id)?;
        match state {
            NodeState::NotStarted | NodeState::CompletedSuccessfully | NodeState::Failed => {
                return Err(TrackerError::invariant(format!(
                    "cannot close tracker '{}' in state {state:?}",
                    self.name(id)?
                )));
            }
            // A later cycle revisits this node.
            NodeState::NeedsAnotherRun => {}
            NodeState::Executing => {
                self.node_mut(id)?.state = NodeState::CompletedSuccessfully;
            }
            NodeState::ExecutingChildren => {
                let children_done = match self.node(id)?.children.last().copied() {
                    None => true,
                    Some(last) => self.node(last)?.is_complete(),
                };
                if children_done {
                    self.node_mut(id)?.state = NodeState::CompletedSuccessfully;
                }
            }
        }

        // A generator is only done once every index has run.
        if let NodeKind::Generator { size, index } = self.node(id)?.kind {
            if self.node(id)?.state == NodeState::CompletedSuccessfully
                && index.is_some_and(|i| i + 1 < size)
            {
                self.node_mut(id)?.state = NodeState::Executing;
            }
        }

        let parent = self.parent(id)?;
        self.current = Some(parent);
        self.complete_cycle();
        let node = self.node(id)?;
        debug!(name = %node.name, state = ?node.state, "tracker closed");
        Ok(())
    }

    /// Record a failure inside a guarded block: the node goes `Failed`
    /// (terminal), its parent is marked as needing another run, and the
    /// cursor unwinds to the parent so sibling branches can still be
    /// explored on a later cycle.
    pub fn fail(&mut self, id: NodeId) -> Result<()> {
        let parent = self.parent(id)?;
        self.node_mut(id)?.state = NodeState::Failed;
        self.mark_as_needing_another_run(parent)?;
        self.current = Some(parent);
        self.complete_cycle();
        let node = self.node(id)?;
        debug!(name = %node.name, "tracker failed");
        Ok(())
    }

    /// Mark a node so that a later cycle revisits it. Does not recurse.
    pub fn mark_as_needing_another_run(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.state = NodeState::NeedsAnotherRun;
        Ok(())
    }

    /// Notify a node that a descendant has begun executing. Ancestors that
    /// are not yet marked `ExecutingChildren` are marked so and the
    /// notification continues upward; it stops at the first ancestor
    /// already marked, whose own ancestors were notified when it first
    /// transitioned.
    pub fn open_child(&mut self, id: NodeId) -> Result<()> {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.node_mut(id)?;
            if node.state == NodeState::ExecutingChildren {
                break;
            }
            node.state = NodeState::ExecutingChildren;
            cursor = node.parent;
        }
        Ok(())
    }

    // --- internals ---

    fn open(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state != NodeState::ExecutingChildren {
            node.state = NodeState::Executing;
        }
        trace!(name = %node.name, state = ?node.state, "tracker opened");
        let parent = node.parent;
        self.current = Some(id);
        if let Some(parent) = parent {
            self.open_child(parent)?;
        }
        Ok(())
    }

    fn advance_generator(&mut self, id: NodeId) -> Result<()> {
        // A new index invalidates the subtree discovered for the previous one.
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in children {
            self.remove_subtree(child);
        }
        let node = self.node_mut(id)?;
        let NodeKind::Generator { index, .. } = &mut node.kind else {
            return Err(TrackerError::invariant(format!(
                "tracker '{}' is not a generator",
                node.name
            )));
        };
        let next = index.map_or(0, |i| i + 1);
        *index = Some(next);
        trace!(name = %node.name, index = next, "generator advanced");
        Ok(())
    }

    fn remove_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(id) {
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }

    fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let id = self.nodes.insert(node);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn current(&self) -> Result<NodeId> {
        self.current
            .ok_or_else(|| TrackerError::invariant("no current tracker (outside a cycle)"))
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| TrackerError::invariant("stale tracker handle"))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TrackerError::invariant("stale tracker handle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Context with a started run and cycle, cursor at the root.
    fn started() -> (RunContext, NodeId) {
        let mut ctx = RunContext::new();
        let root = ctx.start_run();
        ctx.start_cycle().expect("start cycle");
        (ctx, root)
    }

    fn expect_invariant(result: Result<impl std::fmt::Debug>) -> String {
        match result {
            Err(TrackerError::InvariantViolation(message)) => message,
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn start_run_creates_unstarted_root() {
        let mut ctx = RunContext::new();
        let root = ctx.start_run();
        assert_eq!(ctx.name(root).expect("name"), ROOT_NAME);
        assert_eq!(ctx.state(root).expect("state"), NodeState::NotStarted);
        assert_eq!(ctx.current_tracker(), None);
        assert!(!ctx.completed_cycle());
    }

    #[test]
    fn start_cycle_before_start_run_is_rejected() {
        let mut ctx = RunContext::new();
        let message = expect_invariant(ctx.start_cycle());
        assert!(message.contains("start_run"));
    }

    #[test]
    fn acquire_outside_cycle_is_rejected() {
        let mut ctx = RunContext::new();
        ctx.start_run();
        let message = expect_invariant(ctx.acquire_section("a"));
        assert!(message.contains("no current tracker"));
    }

    #[test]
    fn acquire_opens_node_and_moves_cursor() {
        let (mut ctx, root) = started();
        let a = ctx.acquire_section("a").expect("acquire");

        assert!(ctx.is_open(a).expect("open"));
        assert_eq!(ctx.state(a).expect("state"), NodeState::Executing);
        assert_eq!(ctx.current_tracker(), Some(a));
        assert_eq!(ctx.parent(a).expect("parent"), root);
        assert_eq!(ctx.state(root).expect("state"), NodeState::ExecutingChildren);
    }

    #[test]
    fn acquire_creates_once_then_reuses() {
        let (mut ctx, root) = started();
        let a = ctx.acquire_section("a").expect("acquire");
        ctx.close(a).expect("close");

        ctx.start_cycle().expect("cycle 2");
        let again = ctx.acquire_section("a").expect("re-acquire");
        assert_eq!(a, again);
        assert_eq!(ctx.find_child(root, "a").expect("find"), Some(a));
        assert_eq!(ctx.find_child(root, "missing").expect("find"), None);
    }

    #[test]
    fn opening_a_nested_node_marks_all_ancestors() {
        let (mut ctx, root) = started();
        let outer = ctx.acquire_section("outer").expect("outer");
        let inner = ctx.acquire_section("inner").expect("inner");
        let leaf = ctx.acquire_section("leaf").expect("leaf");

        assert_eq!(ctx.state(root).expect("state"), NodeState::ExecutingChildren);
        assert_eq!(ctx.state(outer).expect("state"), NodeState::ExecutingChildren);
        assert_eq!(ctx.state(inner).expect("state"), NodeState::ExecutingChildren);
        assert_eq!(ctx.state(leaf).expect("state"), NodeState::Executing);
        assert_eq!(ctx.current_tracker(), Some(leaf));
    }

    #[test]
    fn completed_section_is_not_reopened() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("acquire");
        ctx.close(a).expect("close");

        ctx.start_cycle().expect("cycle 2");
        let a = ctx.acquire_section("a").expect("re-acquire");
        assert!(!ctx.is_open(a).expect("open"));
        assert!(ctx.is_successfully_completed(a).expect("completed"));
    }

    #[test]
    fn acquire_after_cycle_completed_records_but_does_not_open() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("a");
        ctx.close(a).expect("close a");
        assert!(ctx.completed_cycle());

        let b = ctx.acquire_section("b").expect("b");
        assert_eq!(ctx.state(b).expect("state"), NodeState::NotStarted);
        assert!(!ctx.is_open(b).expect("open"));
    }

    #[test]
    fn section_reacquired_as_generator_is_kind_mismatch() {
        let (mut ctx, _root) = started();
        ctx.acquire_section("block").expect("section");

        ctx.start_cycle().expect("cycle 2");
        let err = ctx.acquire_generator("block", 3).expect_err("mismatch");
        assert_eq!(
            err,
            TrackerError::KindMismatch {
                name: "block".to_string(),
                existing: "section",
                requested: "generator",
            }
        );
    }

    #[test]
    fn generator_reacquired_as_section_is_kind_mismatch() {
        let (mut ctx, _root) = started();
        let g = ctx.acquire_generator("block", 2).expect("generator");
        ctx.close(g).expect("close");

        ctx.start_cycle().expect("cycle 2");
        let err = ctx.acquire_section("block").expect_err("mismatch");
        assert_eq!(
            err,
            TrackerError::KindMismatch {
                name: "block".to_string(),
                existing: "generator",
                requested: "section",
            }
        );
    }

    #[test]
    fn generator_size_is_fixed_at_creation() {
        let (mut ctx, _root) = started();
        let g = ctx.acquire_generator("values", 3).expect("generator");
        ctx.close(g).expect("close");

        ctx.start_cycle().expect("cycle 2");
        let err = ctx.acquire_generator("values", 4).expect_err("mismatch");
        assert_eq!(
            err,
            TrackerError::SizeMismatch {
                name: "values".to_string(),
                existing: 3,
                requested: 4,
            }
        );
    }

    #[test]
    fn zero_size_generator_is_rejected() {
        let (mut ctx, _root) = started();
        let message = expect_invariant(ctx.acquire_generator("empty", 0));
        assert!(message.contains("at least one value"));
    }

    #[test]
    fn generator_starts_at_index_zero() {
        let (mut ctx, _root) = started();
        let g = ctx.acquire_generator("values", 3).expect("generator");
        assert_eq!(ctx.generator_index(g).expect("index"), Some(0));
        assert!(ctx.is_open(g).expect("open"));
    }

    #[test]
    fn generator_index_on_section_is_kind_mismatch() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("acquire");
        let err = ctx.generator_index(a).expect_err("mismatch");
        assert!(matches!(err, TrackerError::KindMismatch { .. }));
    }

    #[test]
    fn close_moves_cursor_to_parent_and_flags_cycle() {
        let (mut ctx, root) = started();
        let a = ctx.acquire_section("a").expect("acquire");
        ctx.close(a).expect("close");

        assert_eq!(ctx.current_tracker(), Some(root));
        assert!(ctx.completed_cycle());
        assert!(ctx.is_successfully_completed(a).expect("completed"));
    }

    #[test]
    fn close_in_terminal_or_unstarted_state_is_invariant_violation() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("a");

        for state in [
            NodeState::NotStarted,
            NodeState::CompletedSuccessfully,
            NodeState::Failed,
        ] {
            ctx.node_mut(a).expect("node").state = state;
            let message = expect_invariant(ctx.close(a));
            assert!(message.contains(&format!("{state:?}")), "{message}");
        }
    }

    #[test]
    fn close_off_the_cursor_chain_is_invariant_violation() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("a");
        ctx.close(a).expect("close");

        // Closing an already-closed node walks the cursor chain up past the
        // root looking for it.
        let message = expect_invariant(ctx.close(a));
        assert!(message.contains("no parent"), "{message}");
    }

    #[test]
    fn close_with_incomplete_last_child_keeps_node_open() {
        let (mut ctx, _root) = started();
        let parent = ctx.acquire_section("parent").expect("parent");
        let a = ctx.acquire_section("a").expect("a");
        ctx.close(a).expect("close a");
        // Recorded but not opened: the cycle is already flagged complete.
        ctx.acquire_section("b").expect("b");

        ctx.close(parent).expect("close parent");
        assert_eq!(
            ctx.state(parent).expect("state"),
            NodeState::ExecutingChildren
        );
        assert!(!ctx.is_complete(parent).expect("complete"));
    }

    #[test]
    fn close_force_closes_descendants_still_current() {
        let (mut ctx, _root) = started();
        let outer = ctx.acquire_section("outer").expect("outer");
        let inner = ctx.acquire_section("inner").expect("inner");
        assert_eq!(ctx.current_tracker(), Some(inner));

        // The outer block ends without the inner one closing itself.
        ctx.close(outer).expect("close outer");
        assert!(ctx.is_successfully_completed(inner).expect("inner"));
        assert!(ctx.is_successfully_completed(outer).expect("outer"));
    }

    #[test]
    fn close_root_is_invariant_violation() {
        let (mut ctx, root) = started();
        let a = ctx.acquire_section("a").expect("a");
        ctx.close(a).expect("close a");

        let message = expect_invariant(ctx.close(root));
        assert!(message.contains("no parent"), "{message}");
    }

    #[test]
    fn parent_of_root_is_invariant_violation() {
        let (ctx, root) = started();
        let message = expect_invariant(ctx.parent(root));
        assert!(message.contains("no parent"), "{message}");
    }

    #[test]
    fn fail_marks_node_and_parent() {
        let (mut ctx, _root) = started();
        let parent = ctx.acquire_section("parent").expect("parent");
        let child = ctx.acquire_section("child").expect("child");

        ctx.fail(child).expect("fail");
        assert_eq!(ctx.state(child).expect("state"), NodeState::Failed);
        assert!(ctx.is_complete(child).expect("complete"));
        assert!(!ctx.is_successfully_completed(child).expect("success"));
        assert_eq!(
            ctx.state(parent).expect("state"),
            NodeState::NeedsAnotherRun
        );
        assert_eq!(ctx.current_tracker(), Some(parent));
        assert!(ctx.completed_cycle());
    }

    #[test]
    fn fail_on_root_is_invariant_violation() {
        let (mut ctx, root) = started();
        let message = expect_invariant(ctx.fail(root));
        assert!(message.contains("no parent"), "{message}");
        // The root must not have been marked failed by the rejected call.
        assert_eq!(ctx.state(root).expect("state"), NodeState::NotStarted);
    }

    #[test]
    fn needs_another_run_survives_close() {
        let (mut ctx, _root) = started();
        let a = ctx.acquire_section("a").expect("a");
        ctx.mark_as_needing_another_run(a).expect("mark");

        ctx.close(a).expect("close");
        assert_eq!(ctx.state(a).expect("state"), NodeState::NeedsAnotherRun);
        assert!(!ctx.is_complete(a).expect("complete"));
    }

    #[test]
    fn generator_advance_invalidates_previous_subtree_handles() {
        let (mut ctx, _root) = started();
        let g = ctx.acquire_generator("values", 2).expect("generator");
        let leaf = ctx.acquire_section("leaf").expect("leaf");
        ctx.close(leaf).expect("close leaf");
        ctx.close(g).expect("close generator");

        ctx.start_cycle().expect("cycle 2");
        let g = ctx.acquire_generator("values", 2).expect("re-acquire");
        assert_eq!(ctx.generator_index(g).expect("index"), Some(1));

        let message = expect_invariant(ctx.is_open(leaf));
        assert!(message.contains("stale"), "{message}");
        assert_eq!(ctx.find_child(g, "leaf").expect("find"), None);
    }

    #[test]
    fn end_run_discards_the_tree() {
        let (mut ctx, root) = started();
        let a = ctx.acquire_section("a").expect("a");
        ctx.end_run();

        assert_eq!(ctx.root(), None);
        assert_eq!(ctx.current_tracker(), None);
        assert!(ctx.is_open(a).is_err());
        assert!(ctx.state(root).is_err());
    }
}
