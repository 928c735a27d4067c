//! Deterministic doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embed::{EmbedError, Embedder};
use crate::faq::FaqTable;
use crate::generate::{ChatMessage, GenerationError, Generator};

/// Bag-of-words embedder: each lowercase token is hashed into one of `dim` buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            name: format!("hash-{dim}"),
        }
    }

    /// Inverse of [`Embedder::name`], for bundle reloads.
    pub fn resolve(name: &str) -> Result<Self, EmbedError> {
        name.strip_prefix("hash-")
            .and_then(|d| d.parse().ok())
            .map(Self::new)
            .ok_or_else(|| EmbedError::UnknownProvider(name.to_string()))
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in text
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut h: u64 = 1469598103934665603;
            for b in token.as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            v[(h as usize) % self.dim] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Embedder that maps known strings to fixed vectors and everything else to zeros.
#[derive(Debug, Clone)]
pub struct TableEmbedder {
    pub table: Vec<(String, Vec<f32>)>,
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn name(&self) -> &str {
        "table"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let dim = self.table.first().map_or(0, |(_, v)| v.len());
        Ok(texts
            .iter()
            .map(|t| {
                self.table
                    .iter()
                    .find(|(k, _)| k == t)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| vec![0.0; dim])
            })
            .collect())
    }
}

/// Returns a canned answer and records every call.
#[derive(Debug, Default)]
pub struct RecordingGenerator {
    pub reply: String,
    calls: AtomicUsize,
    last: Mutex<Vec<ChatMessage>>,
}

impl RecordingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = messages.to_vec();
        Ok(self.reply.clone())
    }
}

/// Always fails, as a backend with a dropped connection would.
#[derive(Debug, Default)]
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
        Err(GenerationError::Stream("connection reset mid-stream".to_string()))
    }
}

/// A small fitness FAQ with an extra passthrough column.
pub fn fitness_table() -> FaqTable {
    let rows = [
        (
            "What is BMI?",
            "BMI is body mass index, weight in kg divided by height in m squared.",
            "basics",
        ),
        (
            "How much protein should I eat per day?",
            "Roughly 1.6 to 2.2 g per kg of body weight for muscle gain.",
            "nutrition",
        ),
        (
            "How many rest days do I need per week?",
            "Most people do well with one or two rest days per week.",
            "recovery",
        ),
        (
            "Should I do cardio before or after weights?",
            "Lift first if strength is the goal; do cardio afterwards.",
            "training",
        ),
        (
            "How much water should I drink?",
            "Around 35 ml per kg of body weight, more on training days.",
            "nutrition",
        ),
    ];
    FaqTable::new(
        vec!["question".into(), "answer".into(), "topic".into()],
        rows.iter()
            .map(|(q, a, t)| vec![q.to_string(), a.to_string(), t.to_string()])
            .collect(),
    )
}
