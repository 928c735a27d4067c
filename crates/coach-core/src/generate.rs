//! Generative backend: turns a role-tagged message list into one completed answer.
//!
//! The backend streams text fragments. A fragment stream is finite and cannot be
//! restarted; the answer only exists once it has been fully drained, and any error
//! along the way throws away everything accumulated so far.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage as OllamaMessage;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CHAT_MODEL: &str = "gemma2:2b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

/// One message of a generation prompt. Built per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce one complete answer for `messages`. No retries.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

/// Drain `fragments` into one string. The first error invalidates the whole answer.
pub async fn accumulate<S>(fragments: S) -> Result<String, GenerationError>
where
    S: Stream<Item = Result<String, GenerationError>>,
{
    futures_util::pin_mut!(fragments);
    let mut answer = String::new();
    while let Some(fragment) = fragments.next().await {
        answer.push_str(&fragment?);
    }
    Ok(answer)
}

/// Bound `fut` by `limit`. Expiry is reported as [`GenerationError::Timeout`].
pub async fn with_timeout<F>(limit: Duration, fut: F) -> Result<String, GenerationError>
where
    F: Future<Output = Result<String, GenerationError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "generation timed out");
            Err(GenerationError::Timeout(limit))
        }
    }
}

/// Chat generation through a local Ollama instance, streamed and accumulated.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    inner: Ollama,
    model: String,
    sampling: SamplingParams,
    timeout: Option<Duration>,
}

impl OllamaGenerator {
    pub fn from_url(url: &str) -> Result<Self, GenerationError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self {
            inner,
            model: DEFAULT_CHAT_MODEL.to_string(),
            sampling: SamplingParams::default(),
            timeout: None,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Deadline for a whole call, including draining the stream.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn stream_answer(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let options = ModelOptions::default()
            .temperature(self.sampling.temperature)
            .top_p(self.sampling.top_p)
            .repeat_penalty(self.sampling.repeat_penalty);
        let request = ChatMessageRequest::new(
            self.model.clone(),
            messages.iter().map(to_ollama).collect(),
        )
        .options(options);

        let stream = self.inner.send_chat_messages_stream(request).await?;
        let fragments = stream.map(|item| {
            item.map(|res| res.message.content)
                .map_err(|_| GenerationError::Stream("backend stream yielded an error".to_string()))
        });
        accumulate(fragments).await
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        tracing::debug!(model = %self.model, messages = messages.len(), "generating answer");
        let res = match self.timeout {
            Some(limit) => with_timeout(limit, self.stream_answer(messages)).await,
            None => self.stream_answer(messages).await,
        };
        if let Err(e) = &res {
            tracing::error!(model = %self.model, error = %e, "generation failed");
        }
        res
    }
}

fn to_ollama(m: &ChatMessage) -> OllamaMessage {
    match m.role {
        Role::System => OllamaMessage::system(m.content.clone()),
        Role::Assistant => OllamaMessage::assistant(m.content.clone()),
        Role::User => OllamaMessage::user(m.content.clone()),
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("generation request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("generation stream failed: {0}")]
    Stream(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    #[tokio::test]
    async fn accumulate_joins_fragments_in_order() {
        let parts = vec![Ok("Drink ".to_string()), Ok("water".to_string()), Ok(".".to_string())];
        let answer = accumulate(stream::iter(parts)).await.unwrap();
        assert_eq!(answer, "Drink water.");
    }

    #[tokio::test]
    async fn accumulate_discards_partial_text_on_error() {
        let parts = vec![
            Ok("Partial ".to_string()),
            Err(GenerationError::Stream("connection reset".to_string())),
            Ok("never seen".to_string()),
        ];
        let err = accumulate(stream::iter(parts)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Stream(_)));
    }

    #[tokio::test]
    async fn accumulate_empty_stream_is_empty_answer() {
        let parts: Vec<Result<String, GenerationError>> = Vec::new();
        assert_eq!(accumulate(stream::iter(parts)).await.unwrap(), "");
    }

    #[tokio::test]
    async fn timeout_is_distinct_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn fast_call_passes_through_timeout() {
        let fast = async { Ok("ok".to_string()) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn unreachable_backend_keeps_request_cause() {
        let generator = OllamaGenerator::from_url("http://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_secs(10));
        let err = generator
            .generate(&[ChatMessage::user("how many rest days?")])
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Request(_)), "got {err:?}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let m = ChatMessage::assistant("ctx");
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ctx"}"#);
    }
}
