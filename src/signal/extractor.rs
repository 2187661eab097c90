use crate::{config::ExtractorConfig, source::Frame};

/// Reduces an accepted frame to one scalar: the mean red level of a centered
/// crop. Blood volume changes modulate red absorption the most under a
/// white light.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    crop_side: usize,
}

impl SignalExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            crop_side: config.crop_side,
        }
    }

    pub fn extract(&self, frame: &Frame<'_>) -> f64 {
        frame.center_mean(self.crop_side).r
    }
}
