use anyhow::Result;

use super::result::{SourceId, SourceReport};

/// One independent detector, typically a single model file.
///
/// Implementations are black boxes to the scoring core: they receive a frame
/// and return either per-object records or per-class counts. Boxes may be
/// returned unclamped; the registry clamps them to the frame and drops
/// malformed records.
pub trait DetectionSource: Send {
    /// Stable identifier used for weights and provenance.
    fn id(&self) -> &SourceId;

    /// Run detection on a frame.
    ///
    /// The pixel slice is read-only and must not be retained past the call.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<SourceReport>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
