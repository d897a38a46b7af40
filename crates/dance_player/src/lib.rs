//! Streaming point-cloud playback.
//!
//! A background [`scheduler::Scheduler`] decodes one frame file per tick of an
//! absolute 30 Hz timeline and drops it into a single-slot
//! [`mailbox::Mailbox`]. The render loop's [`presenter::FramePresenter`]
//! drains the mailbox, converts each new frame once on the GPU and draws it as
//! instanced billboards whenever a [`placement::PlacementGate`] transform is
//! present.

pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod hud;
pub mod mailbox;
pub mod placement;
pub mod presenter;
pub mod scheduler;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use error::{FrameError, GpuError, PlaybackError};

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
