//! Structured logging (§10.1).
//!
//! Simplified from the teacher's `logging/mod.rs`, which ships log lines to
//! a supervisor process over a Unix socket — appropriate for a worker inside
//! a larger multi-process system, but this crate is a library plus a
//! standalone demo binary, so a direct `tracing_subscriber` install is all
//! that's needed. `RUST_LOG` drives verbosity the same way it would for any
//! other binary built on `tracing`.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a global `tracing` subscriber. Safe to call more than once —
/// only the first call takes effect, which matters for tests that each spin
/// up their own engine.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        // A second `set_global_default` call from another test in the same
        // process returns Err; that's expected and not a problem.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
