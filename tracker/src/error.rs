//! Tracker protocol errors.
//!
//! Two distinct classes flow through the crate. Protocol misuse by the
//! surrounding engine ([`TrackerError::InvariantViolation`]) is loud and
//! unrecoverable. An assertion failure inside a guarded block is *not* an
//! error here: the engine reports it through [`RunContext::fail`], which
//! succeeds and records the failure in the tree.
//!
//! [`RunContext::fail`]: crate::context::RunContext::fail

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The engine drove the tracker protocol into a state that has no legal
    /// transition: closing an unstarted or finished tracker, asking for the
    /// root's parent, operating outside a run, or presenting a stale handle.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A guarded block was re-acquired under a name that already belongs to
    /// the other node kind.
    #[error("tracker '{name}' already exists as a {existing}, re-acquired as a {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// A generator was re-acquired with a different value count. The count
    /// is fixed when the generator is first encountered.
    #[error("generator '{name}' has {existing} values, re-acquired with {requested}")]
    SizeMismatch {
        name: String,
        existing: usize,
        requested: usize,
    },
}

impl TrackerError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}
