//! Downstream post generation.
//!
//! The generator is a collaborator: it takes one cleaned message body and
//! returns a list of standalone posts.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str = "You are a consultant and LinkedIn writer who helps multi-location \
retailers improve store operations, labor compliance and workforce productivity. You write \
factual, punchy, friendly posts for operations and finance executives. No emojis, no selling.";

lazy_static! {
    // Numbering the model sometimes adds despite being told not to.
    static ref NUMBERED_LABEL: Regex = Regex::new(r"^(Post \d+:|\d+\.|\d+\))").unwrap();
}

#[async_trait]
pub trait PostGenerator: Send + Sync {
    async fn generate(&self, content: &str) -> Result<Vec<String>>;
}

/// Split model output into posts: blank-line separated, trimmed, with empty
/// chunks and numbered labels dropped.
pub fn split_posts(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .filter(|chunk| !NUMBERED_LABEL.is_match(chunk))
        .map(str::to_string)
        .collect()
}

fn user_prompt(content: &str) -> String {
    format!(
        "I will feed you well-researched material. Write five high-quality LinkedIn posts \
         based on it: open with a problem hook, then a pattern interrupt, a micro-story and a \
         compelling ending. Do not include any post numbers or labels in your response. Just \
         write the posts directly, separated by blank lines.\n\nContent: {}",
        content
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

/// Chat-completions backed generator.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl PostGenerator for OpenAiGenerator {
    async fn generate(&self, content: &str) -> Result<Vec<String>> {
        let prompt = user_prompt(content);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.7,
            max_tokens: 300,
        };

        debug!("Requesting posts for {} chars of content", content.len());
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Generation API returned {}: {}", status, body);
            let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::Generation(message));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Generation("response contained no choices".to_string()))?;
        Ok(split_posts(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_posts_drops_empty_and_numbered_chunks() {
        let text = "First post about labor.\n\n\n\nPost 2: numbered\n\n2. also numbered\n\n3) again\n\n  Second post.  ";
        assert_eq!(
            split_posts(text),
            vec!["First post about labor.".to_string(), "Second post.".to_string()]
        );
    }

    #[test]
    fn test_split_posts_keeps_multiline_posts() {
        let text = "Hook line\nbody line\n\nAnother hook";
        assert_eq!(
            split_posts(text),
            vec!["Hook line\nbody line".to_string(), "Another hook".to_string()]
        );
    }

    #[test]
    fn test_user_prompt_embeds_content() {
        assert!(user_prompt("shrink rates fell").ends_with("Content: shrink rates fell"));
    }
}
