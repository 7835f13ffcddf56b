/// Transformation engine seam and the overlay annotator
///
/// The session core treats the transformation as an opaque pure function.
/// OverlayAnnotator is the built-in engine: it composites an overlay image
/// onto the source at a configurable relative position and size.
use image::{imageops, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

/// Identifies this tool's adjustment format
pub const FORMAT_IDENTIFIER: &str = "com.photoannotator.OverlayAnnotator";
/// Revision of the overlay settings layout
pub const FORMAT_VERSION: &str = "0.1";

/// The transformation applied on save
///
/// Implementations must be pure: same source in, same result out, no side
/// effects. The save path runs them on a background task.
pub trait TransformEngine: Send + Sync {
    /// Transform the full-resolution source into the edited image
    fn transform(&self, source: &DynamicImage) -> DynamicImage;

    /// Opaque description of the edit parameters, recorded with every save
    fn adjustment_payload(&self) -> Vec<u8>;
}

/// Placement of the overlay, relative to the source dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Horizontal center of the overlay as a fraction of the source width
    pub anchor_x: f32,
    /// Vertical center of the overlay as a fraction of the source height
    pub anchor_y: f32,
    /// Overlay width as a fraction of the source width
    pub scale: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        // Lower center, roughly where a mustache sits on a portrait
        Self {
            anchor_x: 0.5,
            anchor_y: 0.65,
            scale: 0.4,
        }
    }
}

/// Composites an overlay image onto the source
pub struct OverlayAnnotator {
    overlay: DynamicImage,
    settings: OverlaySettings,
}

impl OverlayAnnotator {
    pub fn new(overlay: DynamicImage, settings: OverlaySettings) -> Self {
        Self { overlay, settings }
    }

    pub fn settings(&self) -> OverlaySettings {
        self.settings
    }
}

impl TransformEngine for OverlayAnnotator {
    fn transform(&self, source: &DynamicImage) -> DynamicImage {
        let target_w = ((source.width() as f32 * self.settings.scale).round() as u32).max(1);
        let aspect = self.overlay.height() as f32 / self.overlay.width().max(1) as f32;
        let target_h = ((target_w as f32 * aspect).round() as u32).max(1);
        let scaled = self
            .overlay
            .resize(target_w, target_h, imageops::FilterType::Lanczos3);

        let center_x = source.width() as f32 * self.settings.anchor_x;
        let center_y = source.height() as f32 * self.settings.anchor_y;
        let left = (center_x - scaled.width() as f32 / 2.0).round() as i64;
        let top = (center_y - scaled.height() as f32 / 2.0).round() as i64;

        let mut composed = source.to_rgba8();
        imageops::overlay(&mut composed, &scaled.to_rgba8(), left, top);
        DynamicImage::ImageRgba8(composed)
    }

    fn adjustment_payload(&self) -> Vec<u8> {
        serde_json::to_vec(&self.settings).expect("overlay settings serialize")
    }
}
