//! Title Synthesizer
//!
//! Derives a short label for a session from its first exchange. Requests are
//! fire-and-forget: the caller marks the session as titled before the request
//! is issued, so a slow or failed request is never repeated.

use crate::{
    item::{ItemRole, ItemStatus},
    transcript::TranscriptEntry,
};
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use std::collections::HashMap;

pub const TITLE_PROMPT_KEY: &str = "generate_title";

pub const DEFAULT_TITLE_PROMPT: &str = "Create a short title for the following conversation \
from the user's message and the AI's reply. Output only the title.\n\n\
User: {user}\nAI: {assistant}";

/// Anything able to summarize an exchange into a title.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TitleService: Send + Sync {
    /// Summarizes the first exchange of a session into a short title.
    ///
    /// # Arguments
    ///
    /// * `user` - Text of the first user message.
    /// * `assistant` - Text of the first assistant reply.
    ///
    /// # Returns
    ///
    /// The raw title text; callers clean it with [`clean_title`].
    async fn generate_title(&self, user: &str, assistant: &str) -> Result<String>;
}

/// A `TitleService` backed by an OpenAI-compatible chat completion endpoint.
pub struct LLMTitleService {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl LLMTitleService {
    /// `prompts` may carry a `"generate_title"` template with `{user}` and
    /// `{assistant}` placeholders; the built-in template is used otherwise.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }
}

#[async_trait]
impl TitleService for LLMTitleService {
    async fn generate_title(&self, user: &str, assistant: &str) -> Result<String> {
        let template = self
            .prompts
            .get(TITLE_PROMPT_KEY)
            .map(String::as_str)
            .unwrap_or(DEFAULT_TITLE_PROMPT);
        let prompt = build_prompt(template, user, assistant);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .max_completion_tokens(100u32)
            .temperature(0.7)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let title = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(title.clone())
    }
}

/// Deterministic titles for running without network access.
pub struct OfflineTitleService;

#[async_trait]
impl TitleService for OfflineTitleService {
    async fn generate_title(&self, user: &str, _assistant: &str) -> Result<String> {
        let words: Vec<&str> = user.split_whitespace().take(4).collect();
        if words.is_empty() {
            return Ok("\"Conversation\"".to_string());
        }
        Ok(format!("\"{}\"", words.join(" ")))
    }
}

pub fn build_prompt(template: &str, user: &str, assistant: &str) -> String {
    template
        .replace("{user}", user)
        .replace("{assistant}", assistant)
}

/// Trims, strips one pair of enclosing double quotes and removes every
/// backslash.
pub fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace('\\', "")
}

/// The exchange a title is built from: the first user entry's text and the
/// first completed assistant entry's text. `None` until the transcript holds
/// a completed assistant entry.
pub fn title_inputs(items: &[TranscriptEntry]) -> Option<(String, String)> {
    let assistant = items
        .iter()
        .find(|entry| entry.role == ItemRole::Assistant && entry.status == ItemStatus::Completed)?;
    let user = items
        .iter()
        .find(|entry| entry.role == ItemRole::User)
        .map(|entry| entry.text.clone())
        .unwrap_or_default();
    Some((user, assistant.text.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InputMethod;
    use chrono::Utc;

    fn entry(id: &str, role: ItemRole, text: &str, status: ItemStatus) -> TranscriptEntry {
        TranscriptEntry {
            id: id.into(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            input_method: (role == ItemRole::User).then_some(InputMethod::Text),
            status,
        }
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Weather Chat\"  "), "Weather Chat");
        assert_eq!(clean_title("Say \\\"hi\\\""), "Say \"hi\"");
        assert_eq!(clean_title("\"Only leading"), "\"Only leading");
        assert_eq!(clean_title("\"\"Nested\"\""), "\"Nested\"");
    }

    #[test]
    fn test_build_prompt_embeds_both_sides() {
        let prompt = build_prompt(DEFAULT_TITLE_PROMPT, "Hello", "Hi there");
        assert!(prompt.contains("User: Hello"));
        assert!(prompt.contains("AI: Hi there"));
        assert!(!prompt.contains("{user}"));
    }

    #[test]
    fn test_title_inputs_wait_for_completed_assistant() {
        let mut items = vec![
            entry("u1", ItemRole::User, "Hello", ItemStatus::Completed),
            entry("a1", ItemRole::Assistant, "Hi", ItemStatus::InProgress),
        ];
        assert_eq!(title_inputs(&items), None);

        items[1].status = ItemStatus::Completed;
        items[1].text = "Hi there".into();
        assert_eq!(
            title_inputs(&items),
            Some(("Hello".to_string(), "Hi there".to_string()))
        );
    }

    #[test]
    fn test_title_inputs_use_first_of_each_role() {
        let items = vec![
            entry("a0", ItemRole::Assistant, "cut off", ItemStatus::Cancelled),
            entry("u1", ItemRole::User, "First question", ItemStatus::Completed),
            entry("u2", ItemRole::User, "Second question", ItemStatus::Completed),
            entry("a1", ItemRole::Assistant, "First answer", ItemStatus::Completed),
            entry("a2", ItemRole::Assistant, "Second answer", ItemStatus::Completed),
        ];
        assert_eq!(
            title_inputs(&items),
            Some(("First question".to_string(), "First answer".to_string()))
        );
    }

    #[tokio::test]
    async fn test_offline_service_output_cleans_to_plain_title() {
        let raw = OfflineTitleService
            .generate_title("what is the weather today", "Sunny")
            .await
            .unwrap();
        assert_eq!(clean_title(&raw), "what is the weather");
    }
}
