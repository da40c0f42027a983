use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_programs_path")]
    pub programs_path: String,
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_similarity_metric")]
    pub similarity_metric: String,

    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_retrieval_oversample")]
    pub retrieval_oversample: usize,
    #[serde(default = "default_min_distinct_programs")]
    pub min_distinct_programs: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    #[serde(default)]
    pub llm_enabled: bool,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_llm_context_budget_chars")]
    pub llm_context_budget_chars: usize,
}

fn default_programs_path() -> String {
    "./data/processed/programs.json".to_string()
}

fn default_corpus_path() -> String {
    "./data/corpus.jsonl".to_string()
}

fn default_index_dir() -> String {
    "./data/vector_store".to_string()
}

const fn default_max_chunk_chars() -> usize {
    800
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

const fn default_embedding_dimensions() -> usize {
    384
}

const fn default_embedding_batch_size() -> usize {
    32
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_similarity_metric() -> String {
    "cosine".to_string()
}

const fn default_retrieval_k() -> usize {
    5
}

const fn default_retrieval_oversample() -> usize {
    3
}

const fn default_min_distinct_programs() -> usize {
    2
}

const fn default_relevance_threshold() -> f32 {
    0.15
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_llm_timeout_secs() -> u64 {
    20
}

const fn default_llm_max_tokens() -> u32 {
    256
}

const fn default_llm_context_budget_chars() -> usize {
    4000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            programs_path: default_programs_path(),
            corpus_path: default_corpus_path(),
            index_dir: default_index_dir(),
            max_chunk_chars: default_max_chunk_chars(),
            embedding_backend: default_embedding_backend(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
            embedding_batch_size: default_embedding_batch_size(),
            openai_api_key: None,
            openai_base_url: default_base_url(),
            similarity_metric: default_similarity_metric(),
            retrieval_k: default_retrieval_k(),
            retrieval_oversample: default_retrieval_oversample(),
            min_distinct_programs: default_min_distinct_programs(),
            relevance_threshold: default_relevance_threshold(),
            llm_enabled: false,
            llm_model: default_llm_model(),
            llm_timeout_secs: default_llm_timeout_secs(),
            llm_max_tokens: default_llm_max_tokens(),
            llm_context_budget_chars: default_llm_context_budget_chars(),
        }
    }
}
