//! Gemini `generateContent` proxy.
//!
//! Walks an ordered list of model names. A 404 (model retired or not enabled
//! for the key) moves on to the next model; any other failure stops the walk.

use std::future::Future;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("No Gemini models configured")]
    NoModels,

    #[error("Gemini request failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// Outcome of one model attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelFailure {
    NotFound(String),
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiAnswer {
    pub model: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    models: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize, Default)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(client: Client, api_key: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            models,
        }
    }

    /// Ask with the language instruction prepended to the prompt.
    #[instrument(skip(self, prompt), fields(models = self.models.len()))]
    pub async fn ask(&self, prompt: &str, language: &str) -> Result<GeminiAnswer, GeminiError> {
        let full_prompt = with_language_instruction(prompt, language);
        let full_prompt = full_prompt.as_str();
        try_models(&self.models, move |model| async move {
            self.generate(&model, full_prompt).await
        })
        .await
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelFailure> {
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, model);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelFailure::Fatal(format!("{}: request failed: {}", model, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{}: HTTP {} {}", model, status.as_u16(), text.trim());
            return Err(if status == StatusCode::NOT_FOUND {
                ModelFailure::NotFound(message)
            } else {
                ModelFailure::Fatal(message)
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelFailure::Fatal(format!("{}: invalid response: {}", model, e)))?;

        extract_text(&parsed)
            .ok_or_else(|| ModelFailure::Fatal(format!("{}: empty response", model)))
    }
}

/// Try each model in order, moving on only after a `NotFound`.
pub async fn try_models<F, Fut>(models: &[String], mut call: F) -> Result<GeminiAnswer, GeminiError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, ModelFailure>>,
{
    if models.is_empty() {
        return Err(GeminiError::NoModels);
    }

    let mut errors = Vec::new();
    for model in models {
        debug!("Trying Gemini model {}", model);
        match call(model.clone()).await {
            Ok(text) => {
                return Ok(GeminiAnswer {
                    model: model.clone(),
                    text,
                })
            }
            Err(ModelFailure::NotFound(message)) => {
                warn!("Gemini model unavailable, trying next: {}", message);
                errors.push(message);
            }
            Err(ModelFailure::Fatal(message)) => {
                warn!("Gemini model failed: {}", message);
                errors.push(message);
                break;
            }
        }
    }

    Err(GeminiError::Exhausted(errors))
}

fn extract_text(response: &GenerateResponse) -> Option<String> {
    let text: String = response
        .candidates
        .first()?
        .content
        .parts
        .iter()
        .map(|part| part.text.as_str())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn language_name(code: &str) -> String {
    match code.trim().to_ascii_lowercase().as_str() {
        "" | "en" | "english" => "English".to_string(),
        "hi" | "hindi" => "Hindi".to_string(),
        "te" | "telugu" => "Telugu".to_string(),
        "ta" | "tamil" => "Tamil".to_string(),
        "kn" | "kannada" => "Kannada".to_string(),
        "mr" | "marathi" => "Marathi".to_string(),
        "bn" | "bengali" => "Bengali".to_string(),
        _ => code.trim().to_string(),
    }
}

pub fn with_language_instruction(prompt: &str, language: &str) -> String {
    format!(
        "You are FarmerAI, an assistant for farmers. Respond only in {}. \
         Keep the answer practical and easy to follow.\n\n{}",
        language_name(language),
        prompt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn falls_through_404s_to_the_next_model() {
        let list = models(&["gemini-old", "gemini-new"]);
        let answer = try_models(&list, |model| async move {
            if model == "gemini-old" {
                Err(ModelFailure::NotFound("gemini-old: HTTP 404".to_string()))
            } else {
                Ok("Sow after the first rains.".to_string())
            }
        })
        .await
        .unwrap();

        assert_eq!(answer.model, "gemini-new");
        assert_eq!(answer.text, "Sow after the first rains.");
    }

    #[tokio::test]
    async fn stops_on_the_first_non_404_error() {
        let list = models(&["a", "b", "c"]);
        let calls = RefCell::new(Vec::new());
        let err = try_models(&list, |model| {
            calls.borrow_mut().push(model.clone());
            async move { Err(ModelFailure::Fatal(format!("{}: HTTP 429", model))) }
        })
        .await
        .unwrap_err();

        assert_eq!(*calls.borrow(), vec!["a".to_string()]);
        assert_eq!(err.to_string(), "Gemini request failed: a: HTTP 429");
    }

    #[tokio::test]
    async fn concatenates_every_failure() {
        let list = models(&["a", "b", "c"]);
        let err = try_models(&list, |model| async move {
            if model == "c" {
                Err(ModelFailure::Fatal("c: HTTP 500".to_string()))
            } else {
                Err(ModelFailure::NotFound(format!("{}: HTTP 404", model)))
            }
        })
        .await
        .unwrap_err();

        match err {
            GeminiError::Exhausted(errors) => {
                assert_eq!(errors, vec!["a: HTTP 404", "b: HTTP 404", "c: HTTP 500"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_model_list_is_an_error() {
        let err = try_models(&[], |_model| async { Ok(String::new()) })
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::NoModels));
    }

    #[test]
    fn extracts_and_joins_candidate_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Use drip " }, { "text": "irrigation." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&response).as_deref(), Some("Use drip irrigation."));
    }

    #[test]
    fn blank_candidates_yield_nothing() {
        let response: GenerateResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert!(extract_text(&response).is_none());

        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "   " }] } }]
        }))
        .unwrap();
        assert!(extract_text(&response).is_none());
    }

    #[test]
    fn language_instruction_is_prepended() {
        let prompt = with_language_instruction("When should I sow wheat?", "hi");
        assert!(prompt.starts_with("You are FarmerAI"));
        assert!(prompt.contains("Respond only in Hindi."));
        assert!(prompt.ends_with("When should I sow wheat?"));
    }

    #[test]
    fn unknown_language_codes_pass_through() {
        assert_eq!(language_name("Punjabi"), "Punjabi");
        assert_eq!(language_name(""), "English");
        assert_eq!(language_name("TE"), "Telugu");
    }
}
