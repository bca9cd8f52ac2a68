use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
/// Gap between the label's baseline and the top edge of the box.
const LABEL_OFFSET: i32 = 10;

/// Burns detection boxes and their labels into an image.
///
/// Labels need a TrueType font; without one only the rectangles are drawn.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn without_font() -> Self {
        Annotator { font: None }
    }

    pub fn from_font_path(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("LABEL_FONT_PATH not set, annotations will have no text labels");
            return Self::without_font();
        };

        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));

        match font {
            Ok(font) => {
                info!(path = %path.display(), "loaded label font");
                Annotator { font: Some(font) }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to load label font, drawing boxes only");
                Self::without_font()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws `bbox` (`[x1, y1, x2, y2]` in pixels) and `label` above it.
    pub fn draw(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str) {
        let x1 = bbox[0] as i32;
        let y1 = bbox[1] as i32;
        let x2 = bbox[2] as i32;
        let y2 = bbox[3] as i32;

        for t in 0..BOX_THICKNESS {
            let width = x2 - x1 - 2 * t + 1;
            let height = y2 - y1 - 2 * t + 1;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x1 + t, y1 + t).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let text_top = y1 - LABEL_OFFSET - LABEL_FONT_SIZE as i32;
            draw_text_mut(
                image,
                BOX_COLOR,
                x1,
                text_top,
                PxScale::from(LABEL_FONT_SIZE),
                font,
                label,
            );
        }
    }
}
