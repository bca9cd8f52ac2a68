use std::path::Path;

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::info;

use crate::detection::{select_best, BestPrediction, Detector};
use crate::draw::Annotator;
use crate::model::ModelError;
use crate::overrides::OverrideTable;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open image: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to read image: {0}")]
    Decode(image::ImageError),
    #[error("detection failed: {0}")]
    Detection(#[from] ModelError),
    #[error("failed to write annotated image: {0}")]
    Encode(image::ImageError),
}

/// Detects on the image at `image_path`, reduces to the best prediction and
/// writes the annotated copy to `output_path` as JPEG.
pub fn process_image(
    detector: &dyn Detector,
    annotator: &Annotator,
    overrides: &OverrideTable,
    image_path: &Path,
    output_path: &Path,
) -> Result<BestPrediction, PipelineError> {
    let image_name = image_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let override_record = overrides.get(image_name);

    // Content decides the format; client-supplied extensions can lie.
    let mut image = ImageReader::open(image_path)
        .and_then(|reader| reader.with_guessed_format())?
        .decode()
        .map_err(PipelineError::Decode)?
        .to_rgb8();
    let candidates = detector.detect(&image)?;

    let best = select_best(&candidates, override_record, |candidate, label| {
        annotator.draw(&mut image, &candidate.bbox, label);
    });

    image
        .save_with_format(output_path, ImageFormat::Jpeg)
        .map_err(PipelineError::Encode)?;

    info!(
        image = image_name,
        candidates = candidates.len(),
        disease = %best.disease_name,
        confidence = %best.confidence,
        overridden = override_record.is_some(),
        "processed image"
    );
    Ok(best)
}
