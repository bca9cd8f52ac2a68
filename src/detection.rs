use image::RgbImage;

use crate::model::ModelError;
use crate::overrides::OverrideRecord;

pub const NO_PREDICTION: &str = "No prediction";

/// One raw detector output, with its box in pixel space of the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub label: String,
}

/// Anything that can turn an image into detection candidates.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BestPrediction {
    pub disease_name: String,
    pub confidence: String,
    pub coordinates: Vec<f32>,
}

impl BestPrediction {
    fn empty(override_record: Option<&OverrideRecord>) -> Self {
        BestPrediction {
            disease_name: override_record
                .map(|r| r.disease_name.clone())
                .unwrap_or_else(|| NO_PREDICTION.to_string()),
            confidence: format_percentage(0.0),
            coordinates: Vec::new(),
        }
    }

    pub fn is_no_prediction(&self) -> bool {
        self.disease_name == NO_PREDICTION
    }
}

pub fn format_percentage(confidence: f64) -> String {
    format!("{:.2}%", confidence * 100.0)
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Reduces the candidates to the single highest-confidence one.
///
/// The comparison is a strict `>` on the detector's raw confidence starting
/// from zero, so the first candidate to reach the maximum keeps it. When an
/// override record is given, its name and confidence replace the reported
/// ones, but the raw confidence still decides which box wins.
///
/// `on_new_best` fires for every candidate that raises the running maximum,
/// with the label text to burn in. Superseded candidates are reported too.
pub fn select_best<F>(
    candidates: &[Detection],
    override_record: Option<&OverrideRecord>,
    mut on_new_best: F,
) -> BestPrediction
where
    F: FnMut(&Detection, &str),
{
    let mut max_confidence = 0.0_f32;
    let mut best = None;

    for candidate in candidates {
        let (disease_name, confidence) = match override_record {
            Some(record) => (record.disease_name.as_str(), record.confidence),
            None => (candidate.label.as_str(), f64::from(candidate.confidence)),
        };

        if candidate.confidence > max_confidence {
            max_confidence = candidate.confidence;
            let percentage = format_percentage(confidence);
            on_new_best(candidate, &format!("{} ({})", disease_name, percentage));

            best = Some(BestPrediction {
                disease_name: disease_name.to_string(),
                confidence: percentage,
                coordinates: candidate.bbox.iter().copied().map(round2).collect(),
            });
        }
    }

    best.unwrap_or_else(|| BestPrediction::empty(override_record))
}
