//! Call Agent Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use call_agent_agent::SessionDependencies;
use call_agent_config::{load_settings, FlowCatalog, ServerConfig, Settings};
use call_agent_core::{KnowledgeRetriever, LanguageModel};
use call_agent_llm::{LanguageModelAdapter, OllamaBackend};
use call_agent_pipeline::{HttpSpeechToText, HttpTextToSpeech, ResponseCaches};
use call_agent_rag::KeywordRetriever;
use call_agent_server::{create_router, init_metrics, AppState};

const MAX_BIND_BACKOFF: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("CALL_AGENT_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Call Agent Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    config.validate().context("invalid configuration")?;

    let metrics_handle = if config.observability.metrics_enabled {
        let handle = init_metrics();
        if handle.is_some() {
            tracing::info!("Initialized Prometheus metrics at /metrics");
        }
        handle
    } else {
        None
    };

    let catalog = FlowCatalog::load_or_builtin(Some(&config.flows_path))
        .context("failed to load troubleshooting flows")?;
    tracing::info!(
        flows = catalog.len(),
        issue_types = ?catalog.issue_types(),
        "Loaded troubleshooting flows"
    );

    let deps = build_dependencies(config, catalog)?;
    let server_config = deps.settings.server.clone();
    let state = AppState::new(deps).with_metrics(metrics_handle);

    let app = create_router(state.clone());
    let listener = bind_with_backoff(&server_config).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wire the collaborators every call shares
fn build_dependencies(config: Settings, catalog: FlowCatalog) -> anyhow::Result<SessionDependencies> {
    let caches = Arc::new(ResponseCaches::new(&config.cache));

    let stt = HttpSpeechToText::new(&config.speech).context("speech-to-text client")?;
    let tts = HttpTextToSpeech::new(&config.speech).context("text-to-speech client")?;

    let llm: Option<Arc<dyn LanguageModel>> = if config.dialogue.use_language_model {
        match OllamaBackend::new(&config.llm) {
            Ok(backend) => {
                tracing::info!(model = %config.llm.model, "Language model backend ready");
                Some(Arc::new(LanguageModelAdapter::new(backend)))
            },
            Err(e) => {
                tracing::warn!(error = %e, "Language model unavailable, using rule-based replies");
                None
            },
        }
    } else {
        tracing::info!("Language model disabled, using rule-based replies");
        None
    };

    let knowledge: Option<Arc<dyn KnowledgeRetriever>> =
        match KeywordRetriever::from_config(&config.knowledge) {
            Ok(retriever) => Some(Arc::new(retriever)),
            Err(e) => {
                tracing::warn!(
                    dir = %config.knowledge.documents_dir,
                    error = %e,
                    "Knowledge documents unavailable, continuing without retrieval"
                );
                None
            },
        };

    let persistence =
        call_agent_persistence::init(&config.persistence).context("persistence layer")?;

    Ok(SessionDependencies {
        settings: Arc::new(config),
        catalog: Arc::new(catalog),
        caches,
        stt: Arc::new(stt),
        tts: Arc::new(tts),
        llm,
        knowledge,
        customers: persistence.customers,
        tickets: persistence.tickets,
        notifier: persistence.notifier,
    })
}

/// Bind the listener, retrying with exponential backoff capped at a minute
async fn bind_with_backoff(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    let mut backoff = Duration::from_millis(config.bind_initial_backoff_ms.max(1));
    let mut attempt = 0u32;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!("Listening on {}", addr);
                return Ok(listener);
            },
            Err(e) if attempt < config.bind_max_retries => {
                attempt += 1;
                tracing::warn!(
                    %addr,
                    attempt,
                    retry_in_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Bind failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BIND_BACKOFF);
            },
            Err(e) => {
                return Err(e).with_context(|| format!("failed to bind {}", addr));
            },
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then hang up every open call
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    state.hang_up_all();
}

fn env_filter(config: &Settings) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("call_agent={},tower_http=debug", level).into()
    })
}

/// Initialize tracing (with optional OpenTelemetry when feature enabled)
#[cfg(feature = "telemetry")]
fn init_tracing(config: &Settings) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;

    let subscriber = tracing_subscriber::registry().with(env_filter(config));
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let Some(otlp_endpoint) = &config.observability.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otlp_endpoint)
            .build();
        match exporter {
            Ok(exporter) => {
                let provider = opentelemetry_sdk::trace::TracerProvider::builder()
                    .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                    .with_resource(opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", "call-agent"),
                        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ]))
                    .build();
                let tracer = provider.tracer("call-agent");
                opentelemetry::global::set_tracer_provider(provider);

                let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                subscriber.with(fmt_layer).with(otel_layer).init();
                tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry tracing enabled");
                return;
            },
            Err(e) => eprintln!("Failed to initialize OpenTelemetry: {}. Falling back.", e),
        }
    }
    subscriber.with(fmt_layer).init();
}

/// Initialize tracing (console only - telemetry feature disabled)
#[cfg(not(feature = "telemetry"))]
fn init_tracing(config: &Settings) {
    let subscriber = tracing_subscriber::registry().with(env_filter(config));
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
