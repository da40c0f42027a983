use std::collections::HashSet;

use tracing::{debug, instrument};

use common::{config::AppConfig, error::AppError, utils::embedding::EmbeddingProvider};
use vector_index::{Hit, SharedIndex, VectorIndex};

use crate::RetrievedChunk;

#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    /// Number of results returned to the composer.
    pub k: usize,
    /// Over-fetch factor for the raw nearest-neighbor query, so the
    /// diversity pass has duplicates to collapse.
    pub oversample: usize,
    /// Floor of distinct programs below which same-(program, section)
    /// duplicates are allowed back in rather than starving the result set.
    pub min_distinct_programs: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            k: 5,
            oversample: 3,
            min_distinct_programs: 2,
        }
    }
}

impl RetrieverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            k: config.retrieval_k.max(1),
            oversample: config.retrieval_oversample.max(1),
            min_distinct_programs: config.min_distinct_programs,
        }
    }
}

/// Query-time orchestrator: embeds the query with the same provider the
/// index was built with, asks the index for nearest chunks, and applies the
/// diversity pass.
pub struct Retriever {
    index: SharedIndex,
    embedder: EmbeddingProvider,
    settings: RetrieverSettings,
}

impl Retriever {
    pub fn new(index: SharedIndex, embedder: EmbeddingProvider, settings: RetrieverSettings) -> Self {
        Self {
            index,
            embedder,
            settings,
        }
    }

    #[instrument(skip_all, fields(k = self.settings.k))]
    pub async fn retrieve(&self, query_text: &str) -> Result<Vec<RetrievedChunk>, AppError> {
        let index = self.index.snapshot();

        let index_tag = index.model_tag();
        let provider_tag = self.embedder.model_tag();
        if index_tag != provider_tag {
            return Err(AppError::ModelVersionMismatch {
                index_tag: index_tag.to_owned(),
                provider_tag,
            });
        }

        if index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query_text).await?;
        let raw = index.query(
            &query_vector,
            self.settings.k.saturating_mul(self.settings.oversample).max(1),
        )?;
        debug!(raw_hits = raw.len(), "raw nearest-neighbor results");

        Ok(diversify(&index, &raw, &self.settings))
    }
}

/// Collapses multiple hits from one (program, section) pair to the single
/// best-scoring one, unless that would leave fewer than the configured
/// number of distinct programs; in that case skipped duplicates are
/// re-admitted in score order. Diversity is preferred, but the best-matching
/// single source is never starved.
fn diversify(index: &VectorIndex, raw: &[Hit], settings: &RetrieverSettings) -> Vec<RetrievedChunk> {
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut selected: Vec<&Hit> = Vec::new();
    let mut skipped: Vec<&Hit> = Vec::new();

    // `raw` is already in descending score order with stable ties.
    for hit in raw {
        let Some(chunk) = index.chunk_at(hit.position) else {
            continue;
        };
        let key = (chunk.program_id.clone(), chunk.section_label.clone());
        if seen_pairs.insert(key) {
            selected.push(hit);
        } else {
            skipped.push(hit);
        }
        if selected.len() == settings.k {
            break;
        }
    }

    let distinct_programs = selected
        .iter()
        .filter_map(|hit| index.chunk_at(hit.position))
        .map(|chunk| chunk.program_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    if selected.len() < settings.k && distinct_programs < settings.min_distinct_programs {
        for hit in skipped {
            selected.push(hit);
            if selected.len() == settings.k {
                break;
            }
        }
        selected.sort_by(|a, b| a.position.cmp(&b.position));
        selected.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    selected
        .into_iter()
        .take(settings.k)
        .filter_map(|hit| {
            index.chunk_at(hit.position).map(|chunk| RetrievedChunk {
                chunk: chunk.clone(),
                score: hit.score,
            })
        })
        .collect()
}
