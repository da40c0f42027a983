use tracing::warn;

use common::error::AppError;

use crate::{AnswerComposer, Retriever};

/// The single query interface consumed by the bot front-end:
/// `answer(query) -> response text`. Availability is favored over
/// completeness: retrieval hiccups degrade to the deterministic template
/// path, and only a missing/corrupt index or a stale model tag is surfaced
/// as a hard failure.
pub struct QueryService {
    retriever: Retriever,
    composer: AnswerComposer,
}

impl QueryService {
    pub fn new(retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            retriever,
            composer,
        }
    }

    pub async fn answer(&self, query_text: &str) -> Result<String, AppError> {
        let results = match self.retriever.retrieve(query_text).await {
            Ok(results) => results,
            Err(err @ (AppError::CorruptIndex(_) | AppError::ModelVersionMismatch { .. })) => {
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "retrieval failed; degrading to the no-context answer");
                Vec::new()
            }
        };

        Ok(self.composer.compose(query_text, &results).await)
    }
}
