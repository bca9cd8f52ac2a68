use std::sync::Mutex;

use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Session, SessionOptions, SessionRunArgs, Tensor,
};
use thiserror::Error;
use tracing::debug;

use crate::detection::{Detection, Detector};

/// Square side the image is resized to before inference.
const INPUT_SIZE: u32 = 416;
/// Candidates scoring below this are dropped before reduction.
const MIN_SCORE: f32 = 0.25;

const INPUT_OP: &str = "image_tensor";
const BOXES_OP: &str = "detection_boxes";
const SCORES_OP: &str = "detection_scores";
const CLASSES_OP: &str = "detection_classes";
const COUNT_OP: &str = "num_detections";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("tensorflow error: {0}")]
    Tensorflow(String),
    #[error("operation '{0}' not found in graph")]
    MissingOperation(&'static str),
    #[error("detector output is inconsistent: {0}")]
    MalformedOutput(String),
    #[error("model lock poisoned")]
    Poisoned,
}

impl From<tensorflow::Status> for ModelError {
    fn from(status: tensorflow::Status) -> Self {
        ModelError::Tensorflow(status.to_string())
    }
}

/// A frozen object-detection graph plus its class list.
pub struct Model {
    session: Session,
    graph: Graph,
    labels: Vec<String>,
}

impl Model {
    pub fn new(model_path: &str, labels_path: &str) -> Result<Self, ModelError> {
        let mut graph = Graph::new();
        let model_bytes = std::fs::read(model_path)?;
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        let labels: Vec<String> = std::fs::read_to_string(labels_path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        debug!(classes = labels.len(), "model loaded");

        Ok(Model {
            session,
            graph,
            labels,
        })
    }

    fn operation(&self, name: &'static str) -> Result<Operation, ModelError> {
        self.graph
            .operation_by_name(name)
            .map_err(|err| ModelError::Tensorflow(err.to_string()))?
            .ok_or(ModelError::MissingOperation(name))
    }

    fn preprocess_image(&self, image: &RgbImage) -> Tensor<u8> {
        let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3);

        let mut tensor = Tensor::new(&[1, INPUT_SIZE as u64, INPUT_SIZE as u64, 3]);
        tensor.copy_from_slice(resized.as_raw());
        tensor
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let input_tensor = self.preprocess_image(image);

        let input_operation = self.operation(INPUT_OP)?;
        let boxes_operation = self.operation(BOXES_OP)?;
        let scores_operation = self.operation(SCORES_OP)?;
        let classes_operation = self.operation(CLASSES_OP)?;
        let count_operation = self.operation(COUNT_OP)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &input_tensor);
        let boxes_token = args.request_fetch(&boxes_operation, 0);
        let scores_token = args.request_fetch(&scores_operation, 0);
        let classes_token = args.request_fetch(&classes_operation, 0);
        let count_token = args.request_fetch(&count_operation, 0);
        self.session.run(&mut args)?;

        let boxes: Tensor<f32> = args.fetch(boxes_token)?;
        let scores: Tensor<f32> = args.fetch(scores_token)?;
        let classes: Tensor<f32> = args.fetch(classes_token)?;
        let count: Tensor<f32> = args.fetch(count_token)?;

        let count = count.first().copied().unwrap_or(0.0).max(0.0) as usize;

        decode_detections(
            RawOutput {
                boxes: &boxes,
                scores: &scores,
                classes: &classes,
                count,
            },
            &self.labels,
            image.width(),
            image.height(),
        )
    }
}

/// Flat detector outputs for a batch of one.
pub(crate) struct RawOutput<'a> {
    /// `count * 4` normalized `[ymin, xmin, ymax, xmax]` values.
    pub boxes: &'a [f32],
    pub scores: &'a [f32],
    /// 1-based class ids, encoded as floats.
    pub classes: &'a [f32],
    pub count: usize,
}

/// Converts normalized detector output to pixel-space candidates of a
/// `width` x `height` image, dropping low scores. Order is preserved.
pub(crate) fn decode_detections(
    raw: RawOutput<'_>,
    labels: &[String],
    width: u32,
    height: u32,
) -> Result<Vec<Detection>, ModelError> {
    if raw.boxes.len() < raw.count * 4
        || raw.scores.len() < raw.count
        || raw.classes.len() < raw.count
    {
        return Err(ModelError::MalformedOutput(format!(
            "{} detections reported but got {} boxes, {} scores, {} classes",
            raw.count,
            raw.boxes.len() / 4,
            raw.scores.len(),
            raw.classes.len()
        )));
    }

    let (w, h) = (width as f32, height as f32);

    let detections = (0..raw.count)
        .filter(|&i| raw.scores[i] >= MIN_SCORE)
        .map(|i| {
            let b = &raw.boxes[i * 4..i * 4 + 4];
            let (ymin, xmin, ymax, xmax) = (
                b[0].clamp(0.0, 1.0),
                b[1].clamp(0.0, 1.0),
                b[2].clamp(0.0, 1.0),
                b[3].clamp(0.0, 1.0),
            );
            let class_id = raw.classes[i].round() as usize;

            Detection {
                bbox: [xmin * w, ymin * h, xmax * w, ymax * h],
                confidence: raw.scores[i],
                label: class_id
                    .checked_sub(1)
                    .and_then(|idx| labels.get(idx))
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
            }
        })
        .collect();

    Ok(detections)
}

/// Lets the session be shared across blocking tasks.
pub struct TfDetector {
    model: Mutex<Model>,
}

impl TfDetector {
    pub fn new(model: Model) -> Self {
        TfDetector {
            model: Mutex::new(model),
        }
    }
}

impl Detector for TfDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let model = self.model.lock().map_err(|_| ModelError::Poisoned)?;
        model.predict(image)
    }
}
