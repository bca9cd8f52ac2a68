use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use leaf_service_rs::{
    advice::{AdviceError, AdviceProvider, AdviceResolver},
    app::{self, AppState},
    detection::{Detection, Detector},
    draw::Annotator,
    model::ModelError,
    overrides::{OverrideRecord, OverrideTable},
    storage::ImageStore,
};

const BOUNDARY: &str = "leafboundary";

struct ScriptedDetector {
    detections: Vec<Detection>,
    calls: AtomicUsize,
    /// Stalls only the first call, so later requests overtake it.
    first_call_delay: Option<Duration>,
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if let (0, Some(delay)) = (previous, self.first_call_delay) {
            std::thread::sleep(delay);
        }
        Ok(self.detections.clone())
    }
}

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

#[async_trait]
impl AdviceProvider for CountingProvider {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, AdviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());
        match &self.fail_with {
            Some(msg) => Err(AdviceError::Other(msg.clone())),
            None => Ok("<ul><li>Apply copper fungicide</li></ul>".to_string()),
        }
    }
}

struct Harness {
    _dir: TempDir,
    app: Router,
    detector: Arc<ScriptedDetector>,
    provider: Arc<CountingProvider>,
    upload_dir: std::path::PathBuf,
    output_dir: std::path::PathBuf,
}

struct Options {
    retention: usize,
    first_call_delay: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            retention: 8,
            first_call_delay: None,
        }
    }
}

fn harness_with(
    detections: Vec<Detection>,
    overrides: OverrideTable,
    provider: CountingProvider,
) -> Harness {
    harness_with_options(detections, overrides, provider, Options::default())
}

fn harness_with_options(
    detections: Vec<Detection>,
    overrides: OverrideTable,
    provider: CountingProvider,
    options: Options,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let upload_dir = dir.path().join("uploaded_images");
    let output_dir = dir.path().join("output_images");
    std::fs::create_dir_all(&upload_dir).unwrap();
    std::fs::create_dir_all(&output_dir).unwrap();

    let detector = Arc::new(ScriptedDetector {
        detections,
        calls: AtomicUsize::new(0),
        first_call_delay: options.first_call_delay,
    });
    let provider = Arc::new(provider);

    let state = Arc::new(AppState {
        detector: detector.clone(),
        annotator: Arc::new(Annotator::without_font()),
        overrides: Arc::new(overrides),
        advisor: AdviceResolver::new(provider.clone()),
        store: ImageStore::new(&upload_dir, &output_dir, options.retention),
    });

    Harness {
        _dir: dir,
        app: app::router(state, 4 * 1024 * 1024),
        detector,
        provider,
        upload_dir,
        output_dir,
    }
}

fn harness(detections: Vec<Detection>) -> Harness {
    harness_with(detections, OverrideTable::default(), CountingProvider::default())
}

fn detection(confidence: f32, label: &str) -> Detection {
    Detection {
        bbox: [4.0, 4.0, 40.0, 40.0],
        confidence,
        label: label.to_string(),
    }
}

fn leaf_png() -> Vec<u8> {
    let image = RgbImage::from_pixel(48, 48, Rgb([40, 120, 40]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_form(app: &Router, parts: &[Part<'_>]) -> axum::response::Response {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn image_src(html: &str) -> String {
    let start = html.find("src=\"").unwrap() + "src=\"".len();
    let end = start + html[start..].find('"').unwrap();
    html[start..end].to_string()
}

fn count_dirs(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|entry| entry.as_ref().unwrap().path().is_dir())
        .count()
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(Vec::new());
    let response = get(&h.app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "OK");
}

#[tokio::test]
async fn index_renders_upload_form() {
    let h = harness(Vec::new());
    let response = get(&h.app, "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("multipart/form-data"));
}

#[tokio::test]
async fn upload_picks_first_highest_candidate_and_asks_for_advice() {
    let h = harness(vec![
        detection(0.40, "Rust"),
        detection(0.91, "Blight"),
        detection(0.91, "Mildew"),
    ]);
    let png = leaf_png();

    let response = post_form(
        &h.app,
        &[
            Part::Text("language", "hi"),
            Part::File("file", "leaf.png", &png),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Blight"));
    assert!(html.contains("91.00%"));
    assert!(!html.contains("Mildew"));
    assert!(html.contains("<ul><li>Apply copper fungicide</li></ul>"));

    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    let prompts = h.provider.prompts.lock().unwrap().clone();
    assert!(prompts[0].contains("for Blight in hi."));

    // The upload is gone; exactly one annotated output was produced.
    assert_eq!(count_dirs(&h.upload_dir), 0);
    assert_eq!(count_dirs(&h.output_dir), 1);

    let image = get(&h.app, &image_src(&html)).await;
    assert_eq!(image.status(), StatusCode::OK);
}

#[tokio::test]
async fn pruning_spares_requests_still_processing() {
    let h = harness_with_options(
        vec![detection(0.7, "Early Blight")],
        OverrideTable::default(),
        CountingProvider::default(),
        Options {
            retention: 1,
            first_call_delay: Some(Duration::from_millis(600)),
        },
    );
    let png = leaf_png();

    let slow_parts = [Part::File("file", "slow.png", &png)];
    let slow = post_form(&h.app, &slow_parts);
    let fast = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        post_form(&h.app, &[Part::File("file", "fast.png", &png)]).await
    };
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(fast.status(), StatusCode::OK);
    assert_eq!(slow.status(), StatusCode::OK);

    // The slow request finished last, so its output is the one kept.
    let slow_src = image_src(&body_text(slow).await);
    assert_eq!(get(&h.app, &slow_src).await.status(), StatusCode::OK);
    assert_eq!(count_dirs(&h.output_dir), 1);
}

#[tokio::test]
async fn override_forces_healthy_result_without_provider_call() {
    let overrides: OverrideTable = [(
        "leaf1.jpg".to_string(),
        OverrideRecord {
            disease_name: "Healthy".into(),
            confidence: 0.99,
        },
    )]
    .into_iter()
    .collect();
    let h = harness_with(
        vec![detection(0.5, "Spot")],
        overrides,
        CountingProvider::default(),
    );
    let png = leaf_png();

    let response = post_form(&h.app, &[Part::File("file", "leaf1.jpg", &png)]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Healthy"));
    assert!(html.contains("99.00%"));
    assert!(html.contains("General Care Tips"));
    assert!(!html.contains("Spot"));
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_detections_skip_advice() {
    let h = harness(Vec::new());
    let png = leaf_png();

    let response = post_form(&h.app, &[Part::File("file", "rock.png", &png)]).await;

    let html = body_text(response).await;
    assert!(html.contains("No prediction"));
    assert!(html.contains("0.00%"));
    assert!(html.contains("No valid prediction made. Please upload an image of a leaf."));
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_failure_is_shown_not_raised() {
    let h = harness_with(
        vec![detection(0.8, "Leaf Spot")],
        OverrideTable::default(),
        CountingProvider {
            fail_with: Some("invalid api key".into()),
            ..Default::default()
        },
    );
    let png = leaf_png();

    let response = post_form(&h.app, &[Part::File("file", "leaf.jpg", &png)]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Solutions currently unavailable. Error: invalid api key"));
}

#[tokio::test]
async fn camera_capture_is_processed() {
    let h = harness(vec![detection(0.7, "Early Blight")]);
    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(leaf_png()));

    let response = post_form(
        &h.app,
        &[
            Part::Text("capturedImage", &data_url),
            Part::File("file", "", b""),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Early Blight"));
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_uploads_redirect_to_form() {
    let h = harness(vec![detection(0.7, "Early Blight")]);

    let cases: Vec<Vec<Part<'_>>> = vec![
        vec![Part::Text("language", "en")],
        vec![Part::File("file", "", b"")],
        vec![Part::File("file", "leaf.gif", b"GIF89a")],
        vec![Part::Text("capturedImage", "not-a-data-url")],
    ];

    for parts in cases {
        let response = post_form(&h.app, &parts).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(count_dirs(&h.upload_dir), 0);
}

#[tokio::test]
async fn concurrent_uploads_get_separate_outputs() {
    let h = harness(vec![detection(0.7, "Early Blight")]);
    let png = leaf_png();

    let first_parts = [Part::File("file", "leaf.png", &png)];
    let second_parts = [Part::File("file", "leaf.png", &png)];
    let first = post_form(&h.app, &first_parts);
    let second = post_form(&h.app, &second_parts);
    let (first, second) = tokio::join!(first, second);

    let first = image_src(&body_text(first).await);
    let second = image_src(&body_text(second).await);
    assert_ne!(first, second);
    assert_eq!(count_dirs(&h.output_dir), 2);
}

#[tokio::test]
async fn demo_result_uses_fixed_prediction() {
    let h = harness(Vec::new());
    let png = leaf_png();
    let upload = post_form(&h.app, &[Part::File("file", "leaf.png", &png)]).await;
    assert_eq!(upload.status(), StatusCode::OK);

    let response = get(&h.app, "/result").await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Powdery Mildew"));
    assert!(html.contains("98.00%"));
    assert!(html.contains("[50, 70, 150, 200]"));
    // The upload had no detections, so only the demo page asked for advice.
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);

    let src = image_src(&html);
    assert_eq!(src, "/static/output_images/processed_leaf.jpeg");
    assert_eq!(get(&h.app, &src).await.status(), StatusCode::OK);
}
