//! All backend logic independent of how the coach is served (CLI or HTTP).
//!
//! A FAQ retriever is fitted offline and published as a bundle into the app data
//! directory (see [app_data]); at startup the bundle is loaded once and shared
//! read-only by the [chatbot::HybridChatbot].

pub mod app_data;
pub mod chatbot;
pub mod config;
pub mod embed;
pub mod faq;
pub mod generate;
pub mod index;
pub mod retriever;

#[cfg(test)]
pub(crate) mod test_support;

pub use app_data::app_data_dir;
pub use chatbot::{
    build_context, build_messages, ChatError, ChatRequest, ChatResponse, ChatbotSettings,
    DispatchOutcome, HybridChatbot, Mode,
};
pub use config::{config_path, load_config, load_config_from, save_config, Config, ConfigError};
pub use embed::{EmbedError, Embedder, OllamaEmbedder};
pub use faq::{FaqCorpus, FaqEntry, FaqError, FaqTable, SchemaError};
pub use generate::{ChatMessage, GenerationError, Generator, OllamaGenerator, Role, SamplingParams};
pub use index::{EmbeddingMatrix, IndexError, NeighborIndex};
pub use retriever::{FaqRetriever, Retrieved, RetrieverError, BUNDLE_FILES};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "coach-core ready"
}
