//! Hierarchical execution tracker for cycle-driven test bodies.
//!
//! A test-execution engine re-runs a test body from its start once per
//! *cycle*. Each guarded block — a named section or a fixed-size generator
//! — asks the [`RunContext`] for its tracker node on every pass and only
//! executes while the node reports open. Across cycles the context opens
//! one unvisited branch at a time, so every leaf block runs in exactly one
//! cycle, failed branches are retired permanently, and their siblings are
//! still explored later.
//!
//! The crate is a pure in-memory core: no I/O, no persistence, one run per
//! context, one thread. Assertion evaluation, reporting, and the driver
//! loop that decides when to stop are external collaborators.
//!
//! - **[`context`]**: run/cycle boundaries, the tree cursor, and the node
//!   state machine.
//! - **[`node`]**: node records — name, state, kind, parent and child
//!   handles.
//! - **[`arena`]**: per-run arena owning every node; generational handles
//!   rule out dangling references when subtrees are torn down.
//! - **[`error`]**: typed protocol errors.
//! - **[`snapshot`]**: serializable diagnostic view of the tree.

pub mod arena;
pub mod context;
pub mod error;
pub mod node;
pub mod snapshot;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use context::RunContext;
pub use error::{Result, TrackerError};
pub use node::{NodeId, NodeState, ROOT_NAME};
pub use snapshot::NodeSnapshot;
