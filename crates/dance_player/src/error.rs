//! Error types shared by the loader, scheduler and GPU setup.

use std::path::PathBuf;

/// Why a single frame could not be made ready for display.
///
/// Every variant is recoverable: the scheduler logs it and moves on to the
/// next frame index.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Decode(#[from] plyframe::DecodeError),

    #[error("buffer allocation failed: {0}")]
    Alloc(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FrameError {
    /// Short stable name used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::Decode(plyframe::DecodeError::Header(_)) => "header",
            FrameError::Decode(plyframe::DecodeError::Format(_)) => "format",
            FrameError::Decode(plyframe::DecodeError::Size { .. }) => "size",
            FrameError::Alloc(_) => "alloc",
            FrameError::Io { .. } => "io",
        }
    }

    pub(crate) fn from_read(path: PathBuf, err: plyframe::Error) -> Self {
        match err {
            plyframe::Error::Io(source) => FrameError::Io { path, source },
            plyframe::Error::Decode(e) => FrameError::Decode(e),
        }
    }
}

/// Reasons the scheduler refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("frame source list is empty")]
    NoSources,

    #[error("failed to start scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures while bringing up the GPU device or surface.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}
