//! medstream - main CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use medstream::{
    cli::{Args, Commands},
    config::Config,
    embedding,
    generation::{ChatCompletionsClient, Generator},
    knowledge,
    rag::{RetrievalOrchestrator, SearchParams, StreamingPipeline},
    repl::ReplSession,
    session::{Compactor, RetentionPolicy, SessionStore},
    telemetry,
    types::{AnalysisRequest, ResponseEvent, RetrievalStrategy},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbosity().log_level());

    let config = Config::load(args.config.clone()).context("Failed to load configuration")?;
    debug!(verbosity = args.verbosity().as_str(), "configuration loaded");

    match args.command() {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Chat { session } => {
            let pipeline = build_pipeline(&config)?;
            let mut repl = ReplSession::new(pipeline, config.history_file(), session)?;
            repl.run().await
        }
        Commands::Ask {
            question,
            session,
            strategy,
            knowledge_base,
            patient,
            require_retrieval,
            no_history,
        } => {
            let pipeline = build_pipeline(&config)?;
            let mut settings = pipeline.settings();
            settings.require_retrieval |= require_retrieval;
            settings.history_enabled &= !no_history;

            let request = build_request(
                question,
                session,
                strategy,
                knowledge_base.as_deref(),
                patient.as_deref(),
            )?;
            ask(pipeline.with_settings(settings), request).await
        }
    }
}

/// Wire the configured backends into a pipeline
fn build_pipeline(config: &Config) -> Result<StreamingPipeline> {
    let client = ChatCompletionsClient::from_config(&config.llm)?;
    info!(model = client.model(), url = client.url(), "generation backend");
    let generator: Arc<dyn Generator> = Arc::new(client);

    let embedder = embedding::from_config(&config.embedding)?;
    let orchestrator = Arc::new(RetrievalOrchestrator::with_params(
        embedder,
        generator.clone(),
        SearchParams::from_config(&config.retrieval, &config.llm),
    ));

    let sessions = Arc::new(SessionStore::new(
        Compactor::from_config(generator.clone(), &config.llm),
        RetentionPolicy::from(&config.session),
    ));

    let mut pipeline = StreamingPipeline::new(orchestrator, sessions, generator).configured(config);

    if let Some(path) = config.knowledge_base_path() {
        let corpus = knowledge::load_from_file(&path)
            .with_context(|| format!("Failed to load knowledge base {}", path.display()))?;
        info!(path = %path.display(), passages = corpus.passages().len(), "default knowledge base");
        pipeline = pipeline.with_default_knowledge(corpus);
    }

    Ok(pipeline)
}

fn build_request(
    question: String,
    session: Option<String>,
    strategy: RetrievalStrategy,
    knowledge_base: Option<&Path>,
    patient: Option<&Path>,
) -> Result<AnalysisRequest> {
    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut request = AnalysisRequest::new(question)
        .with_session(session)
        .with_strategy(strategy);

    if let Some(path) = knowledge_base {
        request = request.with_knowledge_base(knowledge::load_from_file(path)?);
    }

    if let Some(path) = patient {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read patient data {}", path.display()))?;
        request = request.with_patient_data(serde_json::from_str(&contents)?);
    }

    Ok(request)
}

/// One-shot request; every event is printed as an SSE frame
async fn ask(pipeline: StreamingPipeline, request: AnalysisRequest) -> Result<()> {
    let mut events = pipeline.stream(request);
    let mut failure = None;

    while let Some(event) = events.next().await {
        print!("{}", event.to_sse());
        if let ResponseEvent::Error { kind, .. } = &event {
            failure = Some(kind.clone());
        }
        if event.is_terminal() {
            break;
        }
    }

    match failure {
        Some(kind) => anyhow::bail!("request failed: {}", kind),
        None => Ok(()),
    }
}
