use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{config::AppConfig, error::AppError};

const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAI,
    FastEmbed,
    Hashed,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        Self::FastEmbed
    }
}

impl FromStr for EmbeddingBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(AppError::Validation(format!(
                "unknown embedding backend '{other}'. Expected 'openai', 'hashed', or 'fastembed'."
            ))),
        }
    }
}

/// Maps text to fixed-dimension vectors. Deterministic for a fixed model
/// version; the index stores `model_tag()` so stale indexes are detected at
/// query time instead of silently returning garbage neighbors.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::FastEmbed { dimension, .. } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    /// Backend plus model identifier, persisted into the index manifest and
    /// compared on every query.
    pub fn model_tag(&self) -> String {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => format!("hashed:{dimension}"),
            EmbeddingInner::FastEmbed { model_name, .. } => format!("fastembed:{model_name}"),
            EmbeddingInner::OpenAI { model, .. } => format!("openai:{model}"),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(vec![text.to_owned()]).await?;
        vectors.pop().ok_or(AppError::Embedding {
            index: 0,
            reason: "backend returned no embedding for input".into(),
        })
    }

    /// Batch order matches input order. Any single failure fails the whole
    /// batch, naming the offending index.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected_count = texts.len();

        let embeddings = match &self.inner {
            EmbeddingInner::Hashed { dimension } => texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect(),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                guard.embed(texts, None).map_err(|err| AppError::Embedding {
                    index: 0,
                    reason: format!("fastembed batch failed: {err}"),
                })?
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect::<Vec<_>>()
            }
        };

        validate_batch(&embeddings, expected_count, self.dimension())?;
        Ok(embeddings)
    }

    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend.parse::<EmbeddingBackend>()? {
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions),
            EmbeddingBackend::FastEmbed => Self::new_fastembed(config.embedding_model.clone()).await,
            EmbeddingBackend::OpenAI => {
                let client = match openai_client {
                    Some(client) => client,
                    None => {
                        let api_key = config.openai_api_key.clone().ok_or_else(|| {
                            AppError::Validation(
                                "openai embedding backend requires 'openai_api_key'".into(),
                            )
                        })?;
                        Arc::new(Client::with_config(
                            OpenAIConfig::new()
                                .with_api_key(api_key)
                                .with_api_base(&config.openai_base_url),
                        ))
                    }
                };
                let model = config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());
                Ok(Self::new_openai(
                    client,
                    model,
                    u32::try_from(config.embedding_dimensions).unwrap_or(u32::MAX),
                ))
            }
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self, AppError> {
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code)
                .map_err(|err| AppError::Validation(format!("unknown fastembed model: {err}")))?
        } else {
            EmbeddingModel::default()
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_for_task = model_name.clone();

        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<_, AppError> {
                let model = TextEmbedding::try_new(options).map_err(|err| {
                    AppError::Validation(format!("initialising fastembed text model: {err}"))
                })?;
                let info =
                    EmbeddingModel::get_model_info(&model_name_for_task).ok_or_else(|| {
                        AppError::Validation(format!(
                            "fastembed model metadata missing for {model_name_for_task}"
                        ))
                    })?;
                Ok((model, info.dim))
            })
            .await??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }
}

fn validate_batch(
    embeddings: &[Vec<f32>],
    expected_count: usize,
    expected_dim: usize,
) -> Result<(), AppError> {
    if embeddings.len() != expected_count {
        return Err(AppError::Embedding {
            index: embeddings.len().min(expected_count),
            reason: format!(
                "backend returned {} embeddings for {} inputs",
                embeddings.len(),
                expected_count
            ),
        });
    }
    for (index, vector) in embeddings.iter().enumerate() {
        if vector.len() != expected_dim {
            return Err(AppError::Embedding {
                index,
                reason: format!(
                    "embedding has dimension {}, provider is configured for {}",
                    vector.len(),
                    expected_dim
                ),
            });
        }
    }
    Ok(())
}

/// Embeds a whole corpus in bounded, order-preserving batches. API-backed
/// batches are retried with jittered exponential backoff; error indices are
/// re-based so the operator sees the corpus-wide position of a bad item.
pub async fn embed_corpus(
    provider: &EmbeddingProvider,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, AppError> {
    let batch_size = batch_size.max(1);
    let total = texts.len();
    let batches: Vec<(usize, Vec<String>)> = texts
        .chunks(batch_size)
        .enumerate()
        .map(|(batch_no, batch)| (batch_no * batch_size, batch.to_vec()))
        .collect();

    let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
        .then(|(offset, batch)| async move {
            let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
            Retry::spawn(retry_strategy, || provider.embed_batch(batch.clone()))
                .await
                .map_err(|err| rebase_embedding_error(err, offset))
        })
        .try_collect()
        .await?;

    let embeddings: Vec<Vec<f32>> = results.into_iter().flatten().collect();
    debug!(count = embeddings.len(), total, "embedded corpus");
    Ok(embeddings)
}

fn rebase_embedding_error(err: AppError, offset: usize) -> AppError {
    match err {
        AppError::Embedding { index, reason } => AppError::Embedding {
            index: index + offset,
            reason,
        },
        other => other,
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
