use std::{env, path::Path};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} is missing and {1} is not set")]
    NoSource(String, &'static str),
    #[error("invalid GITHUB_TOKEN format")]
    InvalidToken,
    #[error("failed to download {url}: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("failed to download {url}: {status}")]
    Status { url: String, status: u16 },
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: std::io::Error },
}

async fn download_file(url: &str, path: &str) -> Result<(), FetchError> {
    info!(path, url, "downloading model file");

    let mut header_map = HeaderMap::new();

    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| FetchError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let request_error = |source| FetchError::Request {
        url: url.to_string(),
        source,
    };

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(request_error)?;

    let write_error = |source| FetchError::Write {
        path: path.to_string(),
        source,
    };
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, bytes).await.map_err(write_error)?;
    Ok(())
}

async fn ensure_file(
    path: &str,
    url: Option<&str>,
    url_var: &'static str,
) -> Result<(), FetchError> {
    if Path::new(path).exists() {
        return Ok(());
    }
    let url = url.ok_or_else(|| FetchError::NoSource(path.to_string(), url_var))?;
    download_file(url, path).await
}

/// Downloads the model graph and class list if they are not on disk yet.
pub async fn ensure_files_exist(
    model_path: &str,
    model_url: Option<&str>,
    class_list_path: &str,
    class_list_url: Option<&str>,
) -> Result<(), FetchError> {
    info!("checking model files");
    ensure_file(model_path, model_url, "MODEL_URL").await?;
    ensure_file(class_list_path, class_list_url, "CLASS_LIST_URL").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_files_need_no_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let model = dir.path().join("frozen_graph.pb");
        let classes = dir.path().join("class_list.txt");
        std::fs::write(&model, b"graph").unwrap();
        std::fs::write(&classes, b"Early Blight\n").unwrap();

        ensure_files_exist(
            model.to_str().unwrap(),
            None,
            classes.to_str().unwrap(),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_file_without_url_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let model = dir.path().join("frozen_graph.pb");

        let err = ensure_files_exist(model.to_str().unwrap(), None, "unused", None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::NoSource(_, "MODEL_URL")));
    }
}
