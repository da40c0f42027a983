pub mod handle;
mod persist;

use std::{cmp::Ordering, fmt, str::FromStr};

use common::{error::AppError, types::chunk::Chunk};

pub use handle::SharedIndex;

/// Scoring function for nearest-neighbor search. Vectors are L2-normalized
/// at build time, so both settings rank identically; the option exists to
/// reject typos in configuration rather than to change behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl FromStr for SimilarityMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "inner-product" | "inner_product" | "ip" => Ok(Self::InnerProduct),
            other => Err(AppError::Validation(format!(
                "unknown similarity metric '{other}'. Expected 'cosine' or 'inner-product'."
            ))),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::InnerProduct => write!(f, "inner-product"),
        }
    }
}

/// One ranked neighbor. `position` is the chunk's corpus insertion order,
/// used as the stable tie-break.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub chunk_id: String,
    pub score: f32,
}

/// Exact flat inner-product index over L2-normalized vectors, equivalent to
/// cosine similarity. Immutable once built; rebuilt wholesale whenever the
/// corpus or embedding model changes.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_tag: String,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Builds an index from the full chunk + embedding set. Embeddings are
    /// matched to chunks by position and must all share one dimension.
    pub fn build(
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        model_tag: impl Into<String>,
    ) -> Result<Self, AppError> {
        if chunks.len() != embeddings.len() {
            return Err(AppError::Validation(format!(
                "got {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        let dimension = embeddings.first().map_or(0, Vec::len);
        let mut vectors = Vec::with_capacity(embeddings.len());
        for (chunk, mut vector) in chunks.iter().zip(embeddings) {
            if vector.len() != dimension {
                return Err(AppError::DimensionMismatch {
                    context: format!("chunk {}", chunk.chunk_id),
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            normalize_in_place(&mut vector);
            vectors.push(vector);
        }

        Ok(Self {
            model_tag: model_tag.into(),
            dimension,
            vectors,
            chunks,
        })
    }

    pub fn model_tag(&self) -> &str {
        &self.model_tag
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_at(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    /// Returns up to `k` nearest neighbors in descending similarity order;
    /// ties broken by corpus insertion order. An empty index returns an
    /// empty sequence, not an error.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>, AppError> {
        if k == 0 {
            return Err(AppError::Validation("query k must be >= 1".into()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                context: "query vector".into(),
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut query = vector.to_vec();
        normalize_in_place(&mut query);

        let mut hits: Vec<Hit> = self
            .vectors
            .iter()
            .zip(&self.chunks)
            .enumerate()
            .map(|(position, (candidate, chunk))| Hit {
                position,
                chunk_id: chunk.chunk_id.clone(),
                score: dot(&query, candidate),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
