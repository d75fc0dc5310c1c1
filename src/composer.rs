//! Token-budgeted context assembly and grounded answer generation.
//!
//! The composer packs ranked chunks into a context block, best first,
//! until the estimated token budget is reached. A chunk that would
//! overflow the budget is dropped entirely — never truncated mid-chunk,
//! so a citation always refers to text that was shown to the model in
//! full. Later, smaller chunks may still be admitted after a drop.
//!
//! Token counts are estimated with the 4-chars-per-token heuristic.
//! The generation backend is instructed to answer only from the
//! supplied context, and the chunk ids actually included are returned
//! as citations.

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::models::RetrievalHit;
use crate::retry::{with_retries, BackendError, RetryPolicy};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Trait for generation providers.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model_name(&self) -> &str;
    /// One provider call, no retry.
    async fn generate(&self, prompt: &str) -> std::result::Result<String, BackendError>;
}

/// A no-op backend that always returns errors.
pub struct DisabledGenerationBackend;

#[async_trait]
impl GenerationBackend for DisabledGenerationBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> std::result::Result<String, BackendError> {
        Err(BackendError::terminal("generation provider is disabled"))
    }
}

/// Generation backend calling an OpenAI-style chat completions API.
pub struct HttpGenerationBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpGenerationBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("generation.model required for openai provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::retryable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| BackendError::retryable(e.to_string()))?;
            return json
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|t| t.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| BackendError::terminal("invalid response: missing message content"));
        }

        let body_text = resp.text().await.unwrap_or_default();
        let message = format!("completions API error {}: {}", status, body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(BackendError::retryable(message))
        } else {
            Err(BackendError::terminal(message))
        }
    }
}

/// Create the backend named by the configuration.
pub fn create_backend(config: &GenerationConfig) -> Result<Box<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerationBackend)),
        "openai" => Ok(Box::new(HttpGenerationBackend::new(config)?)),
        other => Err(Error::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

/// A generated answer plus the chunk ids that supplied its context.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Ids of the chunks actually included in the context, in context
    /// order.
    pub citations: Vec<String>,
}

pub struct AnswerComposer {
    backend: Box<dyn GenerationBackend>,
    policy: RetryPolicy,
}

impl AnswerComposer {
    pub fn new(backend: Box<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        Self {
            backend,
            policy: RetryPolicy::new(config.max_retries, config.timeout_secs),
        }
    }

    /// Compose a grounded answer from ranked retrieval hits.
    ///
    /// Fails with [`Error::EmptyContext`] when no chunk fits the
    /// budget — raised before any backend call, so callers can present
    /// "no relevant information found" instead of a backend fault.
    pub async fn compose(
        &self,
        question: &str,
        hits: &[RetrievalHit],
        token_budget: usize,
    ) -> Result<Answer> {
        let (context, citations) = assemble_context(hits, token_budget);
        if citations.is_empty() {
            return Err(Error::EmptyContext);
        }

        let prompt = build_prompt(question, &context);
        let text = with_retries(self.policy, "generation", || self.backend.generate(&prompt))
            .await
            .map_err(|e| Error::GenerationBackend(e.message))?;

        Ok(Answer { text, citations })
    }
}

/// Estimated token count for a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Pack hits into a context block, best first, within the budget.
///
/// Returns the assembled context and the included chunk ids in context
/// order.
fn assemble_context(hits: &[RetrievalHit], token_budget: usize) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut citations = Vec::new();
    let mut used_tokens = 0usize;

    for hit in hits {
        let block = format_block(citations.len() + 1, hit);
        let cost = estimate_tokens(&block);
        if used_tokens + cost > token_budget {
            continue;
        }
        context.push_str(&block);
        used_tokens += cost;
        citations.push(hit.chunk.id.clone());
    }

    (context, citations)
}

fn format_block(number: usize, hit: &RetrievalHit) -> String {
    let source = match hit.chunk.page {
        Some(page) => format!("{}, page {}", hit.chunk.source_name, page),
        None => hit.chunk.source_name.clone(),
    };
    format!("[{}] ({})\n{}\n\n", number, source, hit.chunk.text)
}

fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the numbered context excerpts below. \
         If the context does not contain the answer, say so. \
         Cite excerpt numbers where relevant.\n\n\
         Context:\n{}\
         Question: {}\n\nAnswer:",
        context, question
    )
}
