use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectionSource;
use crate::detect::result::{SourceId, SourceReport};
use crate::pipeline::frame_digest;

/// Replays recorded model output, keyed by the SHA-256 of each frame's pixels.
///
/// Used to re-score captured footage without loading the models again.
pub struct ReplaySource {
    id: SourceId,
    frames: HashMap<String, SourceReport>,
}

impl ReplaySource {
    pub fn new(id: impl Into<SourceId>, frames: HashMap<String, SourceReport>) -> Self {
        let frames = frames
            .into_iter()
            .map(|(digest, report)| (digest.to_ascii_lowercase(), report))
            .collect();
        Self {
            id: id.into(),
            frames,
        }
    }

    /// Load a JSON object mapping hex digests to reports.
    pub fn from_path(id: impl Into<SourceId>, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        let frames: HashMap<String, SourceReport> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid replay file {}: {}", path.display(), e))?;
        Ok(Self::new(id, frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl DetectionSource for ReplaySource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn detect(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<SourceReport> {
        let digest = frame_digest(pixels);
        self.frames
            .get(&digest)
            .cloned()
            .ok_or_else(|| anyhow!("no recorded output for frame {}", digest))
    }

    /// An empty recording would fail every frame.
    fn warm_up(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(anyhow!("no recorded frames"));
        }
        Ok(())
    }
}
