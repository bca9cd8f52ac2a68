use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response contained no choices")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

/// An external chat-completion service.
#[async_trait]
pub trait AdviceProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AdviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Hi,
}

impl Language {
    /// Unrecognized codes fall back to English.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "hi" => Language::Hi,
            _ => Language::En,
        }
    }

    pub fn system_message(self) -> &'static str {
        match self {
            Language::En => {
                "You are an agricultural expert. Provide clear plant disease solutions in English, \
                 and if plant seems healthy then provide ways to keep it healthy"
            }
            Language::Hi => {
                "You are an agricultural expert. Provide clear plant disease solutions in Hindi, \
                 and if plant seems healthy then provide ways to keep it healthy"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advice {
    /// Static care tips for healthy leaves and non-leaf images.
    General(String),
    /// Text produced by the provider.
    Expert(String),
}

impl Advice {
    pub fn into_html(self) -> String {
        match self {
            Advice::General(html) | Advice::Expert(html) => html,
        }
    }
}

pub fn needs_general_care(disease_name: &str) -> bool {
    let lower = disease_name.to_lowercase();
    lower.contains("healthy") || lower.contains("no prediction")
}

pub fn general_care_message(disease_name: &str) -> String {
    format!(
        r#"
<strong>Disease Detected:</strong> {disease_name}<br><br>
<strong>Overview:</strong><br>
The uploaded image appears to be a healthy leaf or a non-leaf object. No signs of disease were detected. Here are some general tips for maintaining plant health:<br><br>
<strong>General Care Tips:</strong>
<ul>
    <li>Ensure proper watering and sunlight for your plants.</li>
    <li>Regularly inspect plants for signs of pests or diseases.</li>
    <li>Prune plants to improve air circulation and remove dead or diseased parts.</li>
    <li>Use organic fertilizers to promote healthy growth.</li>
</ul>
<strong>Note:</strong> If you suspect any issues, consult a local agricultural expert for personalized advice.
"#
    )
}

pub fn treatment_prompt(disease_name: &str, language_code: &str) -> String {
    format!(
        "Provide a detailed solution for {disease_name} in {language_code}. Format the response \
         with HTML tags for headings (<strong>), bullet points (<ul>, <li>), and proper spacing."
    )
}

pub fn unavailable_message(err: &AdviceError) -> String {
    format!("⚠️ Solutions currently unavailable. Error: {err}")
}

/// Turns a disease name into advisory HTML.
#[derive(Clone)]
pub struct AdviceResolver {
    provider: Arc<dyn AdviceProvider>,
}

impl AdviceResolver {
    pub fn new(provider: Arc<dyn AdviceProvider>) -> Self {
        AdviceResolver { provider }
    }

    pub async fn try_resolve(
        &self,
        disease_name: &str,
        language_code: &str,
    ) -> Result<Advice, AdviceError> {
        if needs_general_care(disease_name) {
            return Ok(Advice::General(general_care_message(disease_name)));
        }

        let language = Language::from_code(language_code);
        debug!(disease = disease_name, ?language, "requesting treatment advice");

        let content = self
            .provider
            .complete(
                language.system_message(),
                &treatment_prompt(disease_name, language_code),
            )
            .await?;
        Ok(Advice::Expert(content))
    }

    /// Like [`try_resolve`](Self::try_resolve), but failures become a warning text.
    pub async fn resolve(&self, disease_name: &str, language_code: &str) -> String {
        match self.try_resolve(disease_name, language_code).await {
            Ok(advice) => advice.into_html(),
            Err(err) => {
                warn!(disease = disease_name, %err, "advice provider failed");
                unavailable_message(&err)
            }
        }
    }
}
