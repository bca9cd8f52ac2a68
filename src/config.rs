use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Process settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub model_path: String,
    pub class_list_path: String,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    pub overrides_path: PathBuf,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_retention: usize,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub label_font_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let body_limit_bytes = {
            let mb: usize = parse(&var, "BODY_LIMIT_MB", "16", "a valid integer")?;
            mb.checked_mul(1024 * 1024)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "BODY_LIMIT_MB",
                    expected: "a size that fits in memory",
                    value: mb.to_string(),
                })?
        };
        let port: u16 = parse(&var, "PORT", "5000", "a valid number between 0 and 65535")?;
        let output_retention: usize =
            parse(&var, "OUTPUT_RETENTION", "32", "a positive integer")?;
        if output_retention == 0 {
            return Err(ConfigError::Invalid {
                name: "OUTPUT_RETENTION",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        let static_dir = PathBuf::from(var("STATIC_DIR").unwrap_or_else(|| "./static".into()));

        Ok(Config {
            port,
            body_limit_bytes,
            model_path: var("MODEL_PATH").unwrap_or_else(|| "./model/frozen_graph.pb".into()),
            class_list_path: var("CLASS_LIST_PATH")
                .unwrap_or_else(|| "./model/class_list.txt".into()),
            model_url: var("MODEL_URL"),
            class_list_url: var("CLASS_LIST_URL"),
            overrides_path: var("OVERRIDES_PATH")
                .unwrap_or_else(|| "./custom_results.json".into())
                .into(),
            upload_dir: var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| static_dir.join("uploaded_images")),
            output_dir: var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| static_dir.join("output_images")),
            output_retention,
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            label_font_path: var("LABEL_FONT_PATH").map(PathBuf::from),
        })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = var(name).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        })
}
