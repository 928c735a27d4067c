//! Hybrid chatbot: answer straight from the FAQ when a stored question is close
//! enough, otherwise ground a generated answer in the retrieved FAQ entries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embed::Embedder;
use crate::generate::{ChatMessage, GenerationError, Generator};
use crate::retriever::{FaqRetriever, Retrieved, RetrieverError};

pub const DEFAULT_RETRIEVAL_THRESHOLD: f32 = 0.65;

pub const DEFAULT_SYSTEM_PROMPT: &str = concat!(
    "You are a friendly, knowledgeable fitness and nutrition coach. ",
    "Answer using the FAQ context you are given when it is relevant. ",
    "Keep answers short and practical, and say so when the context does not cover the question.",
);

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stored FAQ answer returned verbatim.
    Retrieval,
    /// Generated from the query plus retrieved FAQ context.
    Rag,
}

/// Result of one [`HybridChatbot::chat`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub mode: Mode,
    pub answer: String,
    /// Top-1 similarity; `None` only when the corpus is empty.
    pub score: Option<f32>,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub query: String,
}

/// Response of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub query: String,
    pub response: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatbotSettings {
    /// Top similarity at or above this returns the stored answer.
    pub retrieval_threshold: f32,
    pub system_prompt: String,
}

impl Default for ChatbotSettings {
    fn default() -> Self {
        Self {
            retrieval_threshold: DEFAULT_RETRIEVAL_THRESHOLD,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Stateless across calls; the retriever is shared read-only.
pub struct HybridChatbot<E, G> {
    retriever: Arc<FaqRetriever<E>>,
    generator: G,
    settings: ChatbotSettings,
}

impl<E: Embedder, G: Generator> HybridChatbot<E, G> {
    pub fn new(retriever: Arc<FaqRetriever<E>>, generator: G, settings: ChatbotSettings) -> Self {
        Self {
            retriever,
            generator,
            settings,
        }
    }

    pub fn retriever(&self) -> &Arc<FaqRetriever<E>> {
        &self.retriever
    }

    pub fn settings(&self) -> &ChatbotSettings {
        &self.settings
    }

    pub async fn chat(&self, query: &str, k: usize) -> Result<DispatchOutcome, ChatError> {
        let results = self.retriever.retrieve(query, k).await?;

        let Some(top) = results.first() else {
            tracing::debug!("empty FAQ corpus, generating without context");
            let messages = build_messages(&self.settings.system_prompt, "", query);
            let answer = self.generator.generate(&messages).await?;
            return Ok(DispatchOutcome {
                mode: Mode::Rag,
                answer,
                score: None,
            });
        };

        let score = top.similarity;
        if score >= self.settings.retrieval_threshold {
            tracing::debug!(score, faq = top.index, "answering from FAQ");
            return Ok(DispatchOutcome {
                mode: Mode::Retrieval,
                answer: top.answer.clone(),
                score: Some(score),
            });
        }

        tracing::debug!(
            score,
            threshold = self.settings.retrieval_threshold,
            context = results.len(),
            "below threshold, generating with FAQ context"
        );
        let context = build_context(&results);
        let messages = build_messages(&self.settings.system_prompt, &context, query);
        let answer = self.generator.generate(&messages).await?;
        Ok(DispatchOutcome {
            mode: Mode::Rag,
            answer,
            score: Some(score),
        })
    }

    /// [`chat`](Self::chat) for a wire request.
    pub async fn respond(&self, request: ChatRequest, k: usize) -> Result<ChatResponse, ChatError> {
        let response = self.chat(&request.query, k).await?;
        Ok(ChatResponse {
            query: request.query,
            response,
        })
    }
}

/// `Q: …\nA: …` blocks in retrieval order, separated by blank lines.
pub fn build_context(results: &[Retrieved]) -> String {
    results
        .iter()
        .map(|r| format!("Q: {}\nA: {}", r.question, r.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System persona, FAQ context as an assistant turn, then the raw query.
/// An empty `context` leaves out the assistant turn.
pub fn build_messages(system_prompt: &str, context: &str, query: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if !context.is_empty() {
        messages.push(ChatMessage::assistant(format!(
            "Here is some relevant FAQ context:\n\n{context}"
        )));
    }
    messages.push(ChatMessage::user(query));
    messages
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrieverError),
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}
