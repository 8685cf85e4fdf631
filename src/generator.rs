//! Grounded answer generation against an Ollama-style chat endpoint
//!
//! The system prompt, the `[P<i>]` citation-marker protocol, and the marker
//! parser form one contract and live together in this module; change them as
//! a unit.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::GeneratorSettings;
use crate::error::{LlmError, Result};

/// Exact refusal string the generator is instructed to return when the
/// context does not support an answer
pub const NO_ANSWER: &str = "I do not know.";

/// Answer returned without calling the generator when retrieval found nothing
pub const NO_RELEVANT_CHUNKS: &str = "No relevant chunks found.";

/// Characters kept per window in stitched fallback answers and citation
/// excerpts
pub const EXCERPT_CHARS: usize = 300;

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Trait for chat-completion backends
#[async_trait]
pub trait Generator: Send + Sync {
    /// Send one system + user exchange and return the assistant text.
    /// Callers pick the timeout (answers get a long one, query expansion a
    /// short one); timeouts and transport failures surface as errors so the
    /// caller can fall back.
    async fn chat(&self, system: &str, user: &str, timeout: Duration) -> Result<String>;
}

/// Client for an Ollama-style `POST /api/chat` endpoint
pub struct OllamaGenerator {
    client: reqwest::Client,
    settings: GeneratorSettings,
}

/// Chat API request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

/// Chat API response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Message,
}

impl OllamaGenerator {
    pub fn new(settings: GeneratorSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, settings })
    }

    /// Timeout for answer generation, from configuration
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Timeout for query expansion, from configuration
    pub fn expansion_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.expansion_timeout_secs)
    }

    fn api_url(&self) -> String {
        format!("{}/api/chat", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn chat(&self, system: &str, user: &str, deadline: Duration) -> Result<String> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.to_string(),
                },
                Message {
                    role: Role::User,
                    content: user.to_string(),
                },
            ],
            stream: false,
        };

        let url = self.api_url();
        debug!("Making chat request to: {}", url);

        let response = timeout(deadline, self.client.post(&url).json(&request).send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Chat API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(chat_response.message.content)
    }
}

/// System prompt binding the model to the provided context and to the
/// `[P<i>]` marker protocol
pub fn answer_system_prompt() -> String {
    format!(
        "You are a careful assistant answering questions from provided context only. \
         Rules: Use ONLY the context passages below to answer. \
         Mark every factual sentence with the tag of the passage supporting it, \
         like [P1] or [P3]. \
         If the context does not contain the answer, reply exactly \"{}\" and nothing else.",
        NO_ANSWER
    )
}

/// User prompt: context windows tagged `P1..Pn` in input order, then the
/// question
pub fn answer_user_prompt(question: &str, windows: &[String]) -> String {
    let mut prompt = String::from("Context passages:\n\n");
    for (i, window) in windows.iter().enumerate() {
        prompt.push_str(&format!("[P{}]\n{}\n\n", i + 1, window));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

/// System prompt for hypothetical-answer query expansion
pub fn hyde_system_prompt() -> &'static str {
    "Write a short, plausible passage that directly answers the user's question. \
     Do not mention uncertainty. Two or three sentences."
}

/// Parse the distinct 1-based `[P<i>]` markers out of an answer, ascending
pub fn parse_citation_markers(answer: &str) -> Vec<usize> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let regex = MARKER.get_or_init(|| Regex::new(r"\[P(\d+)\]").unwrap());

    let mut indices: Vec<usize> = regex
        .captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Stitched fallback used when the generator is unavailable: truncated
/// excerpts of the leading windows, each prefixed with its passage tag
pub fn stitch_fallback(windows: &[String], max_windows: usize) -> String {
    windows
        .iter()
        .take(max_windows)
        .enumerate()
        .map(|(i, window)| format!("[P{}] {}", i + 1, truncate_chars(window, EXCERPT_CHARS)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First `max_chars` characters of `text` (char-based, never splits a
/// scalar value)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
