//! Content generation through the OpenAI chat completions API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::http::{check, transport_error, USER_AGENT};
use crate::core::ContentConstraints;
use crate::errors::AdapterError;
use crate::stages::ports::{ContentGenerator, DocumentArtifact, GenerationRequest};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are an AI that writes research papers in a concise, coherent style. \
     Do not include any disclaimers or references to GPT in the output.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// The user prompt for a Markdown paper on `topic`.
#[must_use]
pub fn user_prompt(topic: &str, constraints: &ContentConstraints) -> String {
    format!(
        "Generate a structured Markdown research paper based on:\n{topic}\n\n\
         Aim for {min} to {max} words.\n\
         At the top, include a title and author block:\n\
         # A Short Descriptive Title\n\
         **Author**: {author}\n\
         **Department**: {department}\n\
         **Institution**: {institution}\n\
         **Email**: {email}\n\
         **Date**: {date}\n\n\
         Then include standard sections: Abstract, Introduction, Methods, Results, Conclusion.\n\
         Do not reference GPT or disclaimers. Return only valid Markdown.",
        min = constraints.min_words,
        max = constraints.max_words,
        author = constraints.author,
        department = constraints.department,
        institution = constraints.institution,
        email = constraints.email,
        date = constraints.display_date(),
    )
}

/// [`ContentGenerator`] backed by a chat completions endpoint.
///
/// Writes `<slug>.md` into the request workspace.
#[derive(Clone)]
pub struct OpenAiContentGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiContentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiContentGenerator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl OpenAiContentGenerator {
    /// Creates a generator for `api_key` with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout: Duration::from_secs(180),
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Points at a compatible API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the completion token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let reply: ChatResponse = check(response, "chat completions")
            .await?
            .json()
            .await
            .map_err(|e| transport_error(&e))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AdapterError::other("completion contained no text"))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiContentGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<DocumentArtifact, AdapterError> {
        if self.api_key.trim().is_empty() {
            return Err(AdapterError::unauthorized("OpenAI API key is not configured"));
        }
        debug!(slug = %request.slug, model = %self.model, "Requesting paper content");
        let markdown = self.complete(&user_prompt(&request.topic, &request.constraints)).await?;

        let path = request.workspace.join(format!("{}.md", request.slug));
        tokio::fs::create_dir_all(&request.workspace).await?;
        tokio::fs::write(&path, markdown).await?;
        info!(slug = %request.slug, path = %path.display(), "Paper content written");
        Ok(DocumentArtifact { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn test_user_prompt_carries_metadata() {
        let constraints = ContentConstraints {
            author: "Ada".to_string(),
            email: "ada@example.org".to_string(),
            date: "2024-01-01".to_string(),
            min_words: 1500,
            max_words: 3000,
            ..ContentConstraints::default()
        };
        let prompt = user_prompt("quantum noise", &constraints);

        assert!(prompt.contains("based on:\nquantum noise"));
        assert!(prompt.contains("**Author**: Ada"));
        assert!(prompt.contains("**Email**: ada@example.org"));
        assert!(prompt.contains("**Date**: 2024-01-01"));
        assert!(prompt.contains("1500 to 3000 words"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let generator = OpenAiContentGenerator::new("k").with_base_url("http://localhost:8080/v1/");
        assert_eq!(generator.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_debug_hides_key() {
        let generator = OpenAiContentGenerator::new("sk-secret");
        assert!(!format!("{generator:?}").contains("sk-secret"));
    }

    #[test]
    fn test_response_parsing() {
        let reply: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"  # Title  "}}]}"#).unwrap();
        assert_eq!(reply.choices[0].message.content.as_deref(), Some("  # Title  "));
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest {
            slug: "qn".to_string(),
            topic: "quantum noise".to_string(),
            constraints: ContentConstraints::default(),
            workspace: dir.path().to_path_buf(),
        };
        let err = OpenAiContentGenerator::new(" ").generate(&request).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unauthorized);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest {
            slug: "qn".to_string(),
            topic: "quantum noise".to_string(),
            constraints: ContentConstraints::default(),
            workspace: dir.path().to_path_buf(),
        };
        let err = OpenAiContentGenerator::new("k")
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(2))
            .generate(&request)
            .await
            .unwrap_err();
        assert!(matches!(err.category, ErrorCategory::Network | ErrorCategory::Timeout));
    }
}
