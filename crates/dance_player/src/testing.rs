//! In-memory frame sources for scheduler and presenter tests.

use crate::error::FrameError;
use crate::scheduler::FrameLoader;
use plyframe::{encode_frame, Frame, PointRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub(crate) type TestFrame = Frame;

pub(crate) struct MemoryLoader {
    files: HashMap<PathBuf, Vec<u8>>,
    sources: Vec<PathBuf>,
}

impl MemoryLoader {
    /// `count` encoded frames of `points` points each. Point `j` of frame `f`
    /// sits at `x = 10 f + j + 1`.
    pub(crate) fn with_frames(count: usize, points: usize) -> (Self, Vec<PathBuf>) {
        let mut files = HashMap::new();
        let mut sources = Vec::new();
        for f in 0..count {
            let records: Vec<_> = (0..points)
                .map(|j| {
                    PointRecord::new(
                        [(10 * f + j + 1) as f32, j as f32, -(j as f32)],
                        [f as u8, j as u8, 255],
                        [0.0; 3],
                    )
                })
                .collect();
            let path = PathBuf::from(format!("mem/frame_{f:04}.ply"));
            files.insert(path.clone(), encode_frame(&records));
            sources.push(path);
        }
        let loader = Self {
            files,
            sources: sources.clone(),
        };
        (loader, sources)
    }

    /// Cuts the last byte off source `index` so it fails with a size error.
    pub(crate) fn corrupt(&mut self, index: usize) {
        if let Some(bytes) = self.files.get_mut(&self.sources[index]) {
            bytes.pop();
        }
    }
}

impl FrameLoader for MemoryLoader {
    type Frame = TestFrame;

    fn load(&self, source: &Path) -> Result<Frame, FrameError> {
        let bytes = self.files.get(source).ok_or_else(|| FrameError::Io {
            path: source.to_path_buf(),
            source: std::io::ErrorKind::NotFound.into(),
        })?;
        Ok(plyframe::decode_frame(bytes)?)
    }
}
