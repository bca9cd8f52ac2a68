//! HTML pages for the upload form and the result view.

use crate::detection::BestPrediction;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 820px; margin: 2rem auto; padding: 0 1rem; background: #f4f9f4; color: #1f2d1f; }
h1 { color: #2e7d32; }
.card { background: #fff; border-radius: 8px; padding: 1rem 1.25rem; margin-bottom: 1rem; box-shadow: 0 1px 3px rgba(0,0,0,.1); }
img.result { max-width: 100%; border-radius: 6px; }
label { display: block; margin: .5rem 0 .25rem; font-weight: 600; }
button { background: #2e7d32; color: #fff; border: 0; border-radius: 4px; padding: .5rem 1rem; cursor: pointer; }
video, canvas { max-width: 100%; }
"#;

const CAPTURE_SCRIPT: &str = r#"
const video = document.getElementById('camera');
const canvas = document.getElementById('snapshot');
const captured = document.getElementById('capturedImage');
document.getElementById('start-camera').addEventListener('click', async () => {
  video.srcObject = await navigator.mediaDevices.getUserMedia({ video: true });
  video.hidden = false;
});
document.getElementById('take-photo').addEventListener('click', () => {
  canvas.width = video.videoWidth;
  canvas.height = video.videoHeight;
  canvas.getContext('2d').drawImage(video, 0, 0);
  captured.value = canvas.toDataURL('image/jpeg');
  canvas.hidden = false;
});
"#;

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = html_escape(title),
    )
}

pub fn index_page() -> String {
    let body = format!(
        r#"<h1>Leaf Disease Detection</h1>
<form class="card" method="post" action="/" enctype="multipart/form-data">
<label for="file">Upload a leaf image (png, jpg, jpeg)</label>
<input type="file" id="file" name="file" accept=".png,.jpg,.jpeg">
<label>Or capture one with your camera</label>
<button type="button" id="start-camera">Start camera</button>
<button type="button" id="take-photo">Take photo</button>
<video id="camera" autoplay playsinline hidden></video>
<canvas id="snapshot" hidden></canvas>
<input type="hidden" id="capturedImage" name="capturedImage">
<label for="language">Advice language</label>
<select id="language" name="language">
<option value="en">English</option>
<option value="hi">हिन्दी</option>
</select>
<p><button type="submit">Analyze</button></p>
</form>
<script>{CAPTURE_SCRIPT}</script>"#
    );
    page("Leaf Disease Detection", &body)
}

fn format_coordinates(coordinates: &[f32]) -> String {
    let joined = coordinates
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}

/// `solution` is trusted HTML and is embedded as is.
pub fn result_page(prediction: &BestPrediction, image_path: &str, solution: &str) -> String {
    let body = format!(
        r#"<h1>Detection Result</h1>
<div class="card">
<p><strong>Disease:</strong> {disease}</p>
<p><strong>Confidence:</strong> {confidence}</p>
<p><strong>Coordinates:</strong> {coordinates}</p>
<img class="result" src="{image_path}" alt="Annotated leaf">
</div>
<div class="card">
<h2>Suggested Treatment</h2>
<div class="solution">{solution}</div>
</div>
<p><a href="/">Analyze another leaf</a></p>"#,
        disease = html_escape(&prediction.disease_name),
        confidence = html_escape(&prediction.confidence),
        coordinates = format_coordinates(&prediction.coordinates),
        image_path = html_escape(image_path),
    );
    page("Detection Result", &body)
}
