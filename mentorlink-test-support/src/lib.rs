//! Test harnesses for mentorlink.
//!
//! - [`transport::ScriptedTransport`]: an in-memory [`mentorlink::Transport`]
//!   whose sockets the test opens, feeds and closes by hand
//! - [`dispatch::RecordingDispatcher`]: captures everything routed to external stores
//! - [`verify::CacheVerifier`]: checks the message cache for duplicates and order
//! - [`chaos::ChaosMonkey`]: random chunking, duplicate and garbage frames
//! - [`loss::LossGenerator`]: drops heartbeat replies by pattern

pub mod chaos;
pub mod dispatch;
pub mod loss;
pub mod transport;
pub mod verify;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a compact `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer().with_target(true).with_test_writer().compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
