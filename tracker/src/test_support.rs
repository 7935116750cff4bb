//! Test-only helpers for driving tracker runs.
//!
//! Compiled for this crate's own tests and for consumers that enable the
//! `test-support` feature.

use std::sync::Once;

use crate::context::RunContext;
use crate::error::Result;
use crate::node::NodeId;

/// Install a stderr tracing subscriber once.
///
/// Dev diagnostics only: reads `RUST_LOG`, defaults to `warn`. Safe to call
/// from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::{EnvFilter, fmt};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init();
    });
}

/// Start a run and re-execute `body` once per cycle until the tracker it
/// returns reports successful completion. Returns the number of cycles
/// executed.
///
/// `body` plays the test body: it re-acquires its blocks from scratch each
/// cycle and returns the handle the driver watches (conventionally the
/// body's own top-level section).
///
/// # Panics
///
/// Panics if the run does not complete within `max_cycles`; a tracker that
/// stops making progress is a test failure, not a recoverable condition.
pub fn run_to_completion(
    ctx: &mut RunContext,
    max_cycles: usize,
    mut body: impl FnMut(&mut RunContext) -> Result<NodeId>,
) -> Result<usize> {
    ctx.start_run();
    for cycle in 1..=max_cycles {
        ctx.start_cycle()?;
        let watched = body(ctx)?;
        if ctx.is_successfully_completed(watched)? {
            return Ok(cycle);
        }
    }
    panic!("tracker did not complete within {max_cycles} cycles");
}
