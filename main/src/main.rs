use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::{
    config::{get_config, AppConfig},
    storage::jsonl::read_jsonl,
    types::chunk::Chunk,
    utils::embedding::{embed_corpus, EmbeddingProvider},
};
use retrieval_pipeline::{
    AnswerComposer, ComposerSettings, OpenAiModel, QueryService, Retriever, RetrieverSettings,
};
use vector_index::{SharedIndex, SimilarityMetric, VectorIndex};

#[derive(Parser)]
#[command(name = "program-qa", about = "Retrieval pipeline for master's program Q&A")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the chunked corpus file from the scraper's program document
    BuildCorpus {
        /// Path to programs.json; defaults to the configured programs_path
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output corpus.jsonl; defaults to the configured corpus_path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Embed the corpus and persist the vector index bundle
    BuildIndex {
        /// Corpus file; defaults to the configured corpus_path
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Index bundle directory; defaults to the configured index_dir
        #[arg(long)]
        index_dir: Option<PathBuf>,
    },
    /// Answer a single question against the persisted index
    Ask { question: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config().context("loading configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Command::BuildCorpus { input, output } => {
            let input = input.unwrap_or_else(|| PathBuf::from(&config.programs_path));
            let output = output.unwrap_or_else(|| PathBuf::from(&config.corpus_path));
            let count = corpus_builder::run_build(&input, &output, config.max_chunk_chars)?;
            info!(count, "corpus build finished");
        }
        Command::BuildIndex { corpus, index_dir } => {
            let corpus = corpus.unwrap_or_else(|| PathBuf::from(&config.corpus_path));
            let index_dir = index_dir.unwrap_or_else(|| PathBuf::from(&config.index_dir));
            build_index(&config, &corpus, &index_dir).await?;
        }
        Command::Ask { question } => {
            let answer = ask(&config, &question).await?;
            println!("{answer}");
        }
    }

    Ok(())
}

async fn build_index(config: &AppConfig, corpus: &Path, index_dir: &Path) -> anyhow::Result<()> {
    let metric: SimilarityMetric = config.similarity_metric.parse()?;
    let chunks: Vec<Chunk> = read_jsonl(corpus)
        .with_context(|| format!("reading corpus from {}", corpus.display()))?;
    info!(chunks = chunks.len(), "loaded corpus");

    let provider = EmbeddingProvider::from_config(config, None)
        .await
        .context("creating embedding provider")?;
    info!(
        backend = provider.backend_label(),
        dimension = provider.dimension(),
        model_tag = %provider.model_tag(),
        %metric,
        "embedding provider initialized"
    );

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = embed_corpus(&provider, texts, config.embedding_batch_size)
        .await
        .context("embedding corpus")?;

    let index = VectorIndex::build(chunks, embeddings, provider.model_tag())
        .context("building vector index")?;
    index
        .save(index_dir)
        .with_context(|| format!("persisting index bundle to {}", index_dir.display()))?;

    Ok(())
}

async fn ask(config: &AppConfig, question: &str) -> anyhow::Result<String> {
    config
        .similarity_metric
        .parse::<SimilarityMetric>()
        .context("validating similarity metric")?;
    let index = VectorIndex::load(&config.index_dir)
        .with_context(|| format!("loading index bundle from {}", config.index_dir))?;
    let provider = EmbeddingProvider::from_config(config, None)
        .await
        .context("creating embedding provider")?;

    let retriever = Retriever::new(
        SharedIndex::new(index),
        provider,
        RetrieverSettings::from_config(config),
    );

    let model = if config.llm_enabled {
        let api_key = config
            .openai_api_key
            .clone()
            .context("llm_enabled requires 'openai_api_key'")?;
        let client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&config.openai_base_url),
        ));
        Some(Arc::new(OpenAiModel::new(client, config.llm_model.clone()))
            as Arc<dyn retrieval_pipeline::LanguageModel>)
    } else {
        None
    };

    let composer = AnswerComposer::new(model, ComposerSettings::from_config(config));
    let service = QueryService::new(retriever, composer);

    Ok(service.answer(question).await?)
}
