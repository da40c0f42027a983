pub mod composer;
pub mod retriever;
pub mod service;

use common::types::chunk::Chunk;

pub use composer::{AnswerComposer, ComposerSettings, LanguageModel, OpenAiModel};
pub use retriever::{Retriever, RetrieverSettings};
pub use service::QueryService;

/// A supporting chunk plus its similarity score, ordered best-first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}
