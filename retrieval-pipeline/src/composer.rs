use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use common::{config::AppConfig, error::AppError};

use crate::RetrievedChunk;

/// Fixed response when retrieval produced nothing usable. The composer never
/// lets a low-confidence retrieval reach free-form generation.
pub const INSUFFICIENT_INFORMATION: &str =
    "I could not find an answer in the program materials. Please try rephrasing your question.";

const SYSTEM_PROMPT: &str = "You answer questions about a university's master's programs. \
    Use only the provided context. Answer briefly, in one or two sentences. \
    If the context does not contain the answer, say so plainly.";

/// Pluggable text-completion capability. Present (API-backed) or absent
/// (template fallback); the composer depends on it polymorphically instead
/// of threading an enable flag through call sites.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError>;
}

pub struct OpenAiModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.2)
            .max_tokens(max_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(prompt.to_owned()).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Completion("no content in completion response".into()))
    }
}

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    /// Minimum similarity for a chunk to count as usable evidence.
    pub relevance_threshold: f32,
    /// Character budget for context packed into the prompt; lowest-scored
    /// chunks are dropped first.
    pub context_budget_chars: usize,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.15,
            context_budget_chars: 4000,
            max_tokens: 256,
            timeout: Duration::from_secs(20),
        }
    }
}

impl ComposerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            relevance_threshold: config.relevance_threshold,
            context_budget_chars: config.llm_context_budget_chars,
            max_tokens: config.llm_max_tokens,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }
}

/// Merges retrieved context into the final response. Stateless; the template
/// path is fully deterministic.
pub struct AnswerComposer {
    model: Option<Arc<dyn LanguageModel>>,
    settings: ComposerSettings,
}

impl AnswerComposer {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, settings: ComposerSettings) -> Self {
        Self { model, settings }
    }

    pub fn template_only(settings: ComposerSettings) -> Self {
        Self::new(None, settings)
    }

    pub async fn compose(&self, query_text: &str, results: &[RetrievedChunk]) -> String {
        let usable: Vec<&RetrievedChunk> = results
            .iter()
            .filter(|result| result.score >= self.settings.relevance_threshold)
            .collect();

        if usable.is_empty() {
            debug!(
                threshold = self.settings.relevance_threshold,
                "no retrieved chunk above the relevance threshold"
            );
            return INSUFFICIENT_INFORMATION.to_string();
        }

        if let Some(model) = &self.model {
            let prompt = build_prompt(query_text, &usable, self.settings.context_budget_chars);
            match tokio::time::timeout(
                self.settings.timeout,
                model.complete(&prompt, self.settings.max_tokens),
            )
            .await
            {
                Ok(Ok(answer)) if !answer.trim().is_empty() => return answer,
                Ok(Ok(_)) => {
                    warn!("language model returned an empty completion; using template answer");
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "language model completion failed; using template answer");
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.settings.timeout.as_secs(),
                        "language model completion timed out; using template answer"
                    );
                }
            }
        }

        template_answer(&usable)
    }
}

/// Packs the query plus selected chunk texts under the character budget.
/// `usable` arrives best-first, so lowest-scored chunks drop first.
fn build_prompt(query_text: &str, usable: &[&RetrievedChunk], budget_chars: usize) -> String {
    let mut context = String::new();
    for result in usable {
        let line = format!("- {}\n", result.chunk.text.trim());
        if !context.is_empty() && context.len() + line.len() > budget_chars {
            break;
        }
        context.push_str(&line);
    }

    format!("Context:\n{context}\nQuestion: {query_text}\nAnswer:")
}

/// Deterministic fallback: top chunks' text with source attribution.
fn template_answer(usable: &[&RetrievedChunk]) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for result in usable.iter().take(3) {
        let text = result.chunk.text.trim();
        if !text.is_empty() && !lines.contains(&text) {
            lines.push(text);
        }
    }

    let body = lines.join(" ");
    match usable.first() {
        Some(top) if !top.chunk.source_url.is_empty() => {
            format!(
                "From the program materials: {body} (source: {})",
                top.chunk.source_url
            )
        }
        _ => format!("From the program materials: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::chunk::Chunk;

    fn retrieved(program: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk::new(
                program,
                "facts",
                0,
                text,
                format!("https://example.edu/{program}"),
            ),
            score,
        }
    }

    struct CannedModel {
        response: String,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, AppError> {
            Ok(self.response.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, AppError> {
            Err(AppError::Completion("backend unavailable".into()))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, AppError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test]
    async fn below_threshold_returns_fixed_response() {
        let composer = AnswerComposer::template_only(ComposerSettings::default());
        let results = vec![retrieved("ai", "2 years", 0.05)];

        let answer = composer.compose("How long?", &results).await;
        assert_eq!(answer, INSUFFICIENT_INFORMATION);
    }

    #[tokio::test]
    async fn no_results_returns_fixed_response() {
        let composer = AnswerComposer::template_only(ComposerSettings::default());
        let answer = composer.compose("How long?", &[]).await;
        assert_eq!(answer, INSUFFICIENT_INFORMATION);
    }

    #[tokio::test]
    async fn template_answer_contains_chunk_text_and_attribution() {
        let composer = AnswerComposer::template_only(ComposerSettings::default());
        let results = vec![retrieved("ai", "ai program: 2 years, in Russian", 0.8)];

        let answer = composer.compose("How long is the AI program?", &results).await;
        assert!(answer.contains("2 years"), "got {answer}");
        assert!(answer.contains("https://example.edu/ai"), "got {answer}");
    }

    #[tokio::test]
    async fn template_is_deterministic_for_identical_inputs() {
        let composer = AnswerComposer::template_only(ComposerSettings::default());
        let results = vec![
            retrieved("ai", "2 years", 0.8),
            retrieved("ai_product", "portfolio", 0.5),
        ];

        let first = composer.compose("q", &results).await;
        let second = composer.compose("q", &results).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn model_answer_is_used_when_available() {
        let composer = AnswerComposer::new(
            Some(Arc::new(CannedModel {
                response: "The program takes two years.".into(),
            })),
            ComposerSettings::default(),
        );
        let results = vec![retrieved("ai", "2 years", 0.8)];

        let answer = composer.compose("How long?", &results).await;
        assert_eq!(answer, "The program takes two years.");
    }

    #[tokio::test]
    async fn model_failure_degrades_to_template() {
        let composer =
            AnswerComposer::new(Some(Arc::new(FailingModel)), ComposerSettings::default());
        let results = vec![retrieved("ai", "2 years", 0.8)];

        let answer = composer.compose("How long?", &results).await;
        assert!(answer.contains("2 years"), "got {answer}");
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_degrades_to_template() {
        let settings = ComposerSettings {
            timeout: Duration::from_millis(50),
            ..ComposerSettings::default()
        };
        let composer = AnswerComposer::new(Some(Arc::new(SlowModel)), settings);
        let results = vec![retrieved("ai", "2 years", 0.8)];

        let answer = composer.compose("How long?", &results).await;
        assert!(answer.contains("2 years"), "got {answer}");
    }

    #[tokio::test]
    async fn empty_model_answer_degrades_to_template() {
        let composer = AnswerComposer::new(
            Some(Arc::new(CannedModel {
                response: "   ".into(),
            })),
            ComposerSettings::default(),
        );
        let results = vec![retrieved("ai", "2 years", 0.8)];

        let answer = composer.compose("How long?", &results).await;
        assert!(answer.contains("2 years"), "got {answer}");
    }

    #[test]
    fn prompt_drops_lowest_scored_chunks_past_the_budget() {
        let a = retrieved("ai", &"a".repeat(60), 0.9);
        let b = retrieved("ai_product", &"b".repeat(60), 0.5);
        let usable = vec![&a, &b];

        let prompt = build_prompt("q", &usable, 70);
        assert!(prompt.contains(&"a".repeat(60)));
        assert!(!prompt.contains(&"b".repeat(60)), "over-budget chunk dropped");
    }

    #[test]
    fn prompt_always_includes_the_best_chunk() {
        let a = retrieved("ai", &"a".repeat(500), 0.9);
        let usable = vec![&a];

        let prompt = build_prompt("q", &usable, 10);
        assert!(prompt.contains(&"a".repeat(500)), "best chunk kept even over budget");
    }
}
