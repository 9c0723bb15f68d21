//! DMIC Streamer - capture audio in triggered sessions and stream it out.
//!
//! This is the library crate behind the `dmic-streamer` binary. It provides
//! the capture pipeline, the serial framing and the host-side receiver.

pub mod capture;
pub mod memory;
pub mod pipeline;
pub mod receiver;
pub mod recorder;
pub mod transport;
pub mod utils;

pub use pipeline::Streamer;
pub use recorder::StreamConfig;
pub use utils::{StreamError, StreamResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
///
/// Logs go to stderr so stdout stays free for the framed stream.
/// `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
