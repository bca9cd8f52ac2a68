use std::io::Cursor;

use axum::extract::multipart::{Multipart, MultipartError};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
pub const CAPTURED_FILENAME: &str = "captured_image.jpg";
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("no file was submitted")]
    MissingFile,
    #[error("submitted file is empty")]
    EmptyFile,
    #[error("invalid file name '{0}'")]
    InvalidFilename(String),
    #[error("file type not allowed: {0}")]
    DisallowedExtension(String),
    #[error("captured image is not a data URL")]
    MalformedDataUrl,
    #[error("captured image is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("captured image could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

/// A validated image ready to be stored.
#[derive(Debug)]
pub struct Submission {
    pub language: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Raw form fields as they arrived.
#[derive(Debug, Default)]
pub struct SubmissionFields {
    pub language: Option<String>,
    pub captured_image: Option<String>,
    pub file: Option<UploadedFile>,
}

impl SubmissionFields {
    /// A non-empty camera capture takes precedence over a file upload.
    pub fn into_submission(self) -> Result<Submission, IntakeError> {
        let language = self
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        if let Some(data_url) = self.captured_image.filter(|c| !c.is_empty()) {
            let decoded = decode_data_url(&data_url)?;
            return Ok(Submission {
                language,
                filename: CAPTURED_FILENAME.to_string(),
                bytes: reencode_as_jpeg(&decoded)?,
            });
        }

        let file = self.file.ok_or(IntakeError::MissingFile)?;
        let raw_name = file.filename.unwrap_or_default();
        if raw_name.is_empty() {
            return Err(IntakeError::MissingFile);
        }
        let filename =
            sanitize_filename(&raw_name).ok_or_else(|| IntakeError::InvalidFilename(raw_name))?;
        if !allowed_file(&filename) {
            return Err(IntakeError::DisallowedExtension(filename));
        }
        if file.bytes.is_empty() {
            return Err(IntakeError::EmptyFile);
        }

        Ok(Submission {
            language,
            filename,
            bytes: file.bytes,
        })
    }
}

pub async fn read_submission(multipart: &mut Multipart) -> Result<Submission, IntakeError> {
    let mut fields = SubmissionFields::default();

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("language") => fields.language = Some(field.text().await?),
            Some("capturedImage") => fields.captured_image = Some(field.text().await?),
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?.to_vec();
                fields.file = Some(UploadedFile { filename, bytes });
            }
            _ => {}
        }
    }

    fields.into_submission()
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Keeps only the last path component of a client-supplied name.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

/// Decodes the payload of a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, IntakeError> {
    let (_, payload) = data_url
        .split_once(',')
        .ok_or(IntakeError::MalformedDataUrl)?;
    Ok(STANDARD.decode(payload.trim())?)
}

fn reencode_as_jpeg(bytes: &[u8]) -> Result<Vec<u8>, IntakeError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
    Ok(out)
}
