use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use channel_pubsub::{PubSubConfig, PubSubPublisher};
use http_api::AppState;
use pipeline::{
    spawn_enrichment_task, ChannelTarget, EnrichmentService, IngressService, PipelineConfig,
    ResolvedConfig, ScorerTarget, StoreTarget,
};
use scorer_language::{LanguageScorer, LanguageScorerConfig};
use scorer_mock::MockScorer;
use sentiment_api::{MessagePublisher, RecordStore, SentimentScorer};
use store_datastore::{DatastoreConfig, DatastoreStore};
use store_memory::MemoryStore;
use store_sqlite::SqliteStore;
use topic_engine::{Topic, TopicRegistry};

use crate::config::ServeArgs;
use crate::error::ServerError;

/// How long in-flight work may take to settle after the shutdown signal.
const DRAIN: Duration = Duration::from_secs(5);

/// Request timeout of the managed queue client.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout of the document store client.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("sentiment-server starting");

    // --- Load + validate config; nothing is bound before this passes ---
    let mut config = match &args.config {
        Some(path) => {
            let config = PipelineConfig::load(path)?;
            tracing::info!(config = %path.display(), "loaded config");
            config
        }
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);
    let resolved = config.validate()?;
    tracing::info!(
        role = ?resolved.role,
        port = resolved.api_port,
        topic = resolved.output_topic.as_deref().unwrap_or("-"),
        "configuration resolved"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // --- Channel ---
    let (publisher, registry) = build_channel(&resolved)?;
    let mut state = AppState::new(resolved.invocation_timeout, token.clone());

    if resolved.role.runs_ingress() {
        if let Some(topic) = &resolved.output_topic {
            state = state.with_ingress(Arc::new(IngressService::new(publisher.clone(), topic)));
            if matches!(resolved.channel, ChannelTarget::PubSub { .. }) {
                state = state.with_ingress_body_limit(channel_pubsub::MAX_MESSAGE_BYTES);
            }
            tracing::info!(topic = %topic, channel = publisher.name(), "ingress enabled");
        }
    }

    // --- Enrichment: scorer + store, built once ---
    if let (Some(scorer), Some(store)) = (&resolved.scorer, &resolved.store) {
        let scorer = build_scorer(scorer)?;
        let store = build_store(store)?;
        tracing::info!(scorer = scorer.name(), store = store.name(), "enrichment enabled");
        let service = Arc::new(EnrichmentService::new(scorer, store));

        // In-process channel: deliver through a local loop. The managed
        // queue pushes to /push instead.
        if let (ChannelTarget::Memory { topic, buffer, max_in_flight, .. }, Some(registry)) =
            (&resolved.channel, &registry)
        {
            let subscription = registry
                .subscribe(topic, *buffer)
                .await
                .map_err(|e| e.into_pipeline_error())?;
            handles.push(spawn_enrichment_task(
                service.clone(),
                subscription,
                *max_in_flight,
                resolved.invocation_timeout,
                token.clone(),
            ));
        }
        state = state.with_enrichment(service);
    }

    if let Some(registry) = registry {
        state = state.with_topics(registry);
    }

    // --- API server ---
    let api_port = resolved.api_port;
    let api_token = token.clone();
    let mut api_handle =
        tokio::spawn(async move { http_api::run(api_port, state, api_token).await });
    tracing::info!(port = api_port, "api server listening");
    tracing::info!("server ready");

    // --- Wait for a shutdown signal, or the API server dying on its own ---
    let api_result = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            None
        }
        result = &mut api_handle => Some(result),
    };
    tracing::info!("shutting down...");
    token.cancel();

    // Drain: give tasks up to DRAIN to finish on their own
    let drained = tokio::time::timeout(DRAIN, async {
        for h in handles.iter_mut() {
            let _ = h.await;
        }
        if api_result.is_none() {
            let _ = (&mut api_handle).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("drain timed out, aborting remaining tasks");
        for h in &handles {
            h.abort();
        }
        api_handle.abort();
    }

    match api_result {
        Some(Ok(Err(e))) => Err(ServerError::Api(e)),
        Some(Err(e)) => Err(ServerError::Api(e.to_string())),
        _ => {
            tracing::info!("shutdown complete");
            Ok(())
        }
    }
}

async fn shutdown_signal() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Backend selection
// ═══════════════════════════════════════════════════════════════

type Channel = (Arc<dyn MessagePublisher>, Option<Arc<TopicRegistry>>);

fn build_channel(resolved: &ResolvedConfig) -> Result<Channel, ServerError> {
    match &resolved.channel {
        ChannelTarget::Memory { topic, options, .. } => {
            let mut registry = TopicRegistry::new();
            registry.register(Topic::new(topic.clone(), *options));
            tracing::info!(
                topic = %topic,
                max_retained = options.max_retained,
                max_delivery_attempts = options.redelivery.max_delivery_attempts,
                "registered in-process topic"
            );
            let registry = Arc::new(registry);
            let publisher: Arc<dyn MessagePublisher> = registry.clone();
            Ok((publisher, Some(registry)))
        }
        ChannelTarget::PubSub {
            endpoint,
            project_id,
            access_token,
        } => {
            let publisher = PubSubPublisher::new(PubSubConfig {
                endpoint: endpoint.clone(),
                project_id: project_id.clone(),
                access_token: access_token.clone(),
                timeout: PUBLISH_TIMEOUT,
            })?;
            tracing::info!(endpoint = %endpoint, project = %project_id, "managed queue channel");
            let publisher: Arc<dyn MessagePublisher> = Arc::new(publisher);
            Ok((publisher, None))
        }
    }
}

fn build_scorer(target: &ScorerTarget) -> Result<Arc<dyn SentimentScorer>, ServerError> {
    match target {
        ScorerTarget::Mock => Ok(Arc::new(MockScorer::new())),
        ScorerTarget::Live {
            endpoint,
            api_key,
            access_token,
            timeout,
        } => {
            let scorer = LanguageScorer::new(LanguageScorerConfig {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
                access_token: access_token.clone(),
                timeout: *timeout,
            })?;
            Ok(Arc::new(scorer))
        }
    }
}

fn build_store(target: &StoreTarget) -> Result<Arc<dyn RecordStore>, ServerError> {
    match target {
        StoreTarget::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreTarget::Sqlite { path } => {
            let store = SqliteStore::open(path)?;
            tracing::info!(path = %path.display(), "opened sqlite store");
            Ok(Arc::new(store))
        }
        StoreTarget::Datastore {
            endpoint,
            project_id,
            kind,
            access_token,
        } => {
            let store = DatastoreStore::new(DatastoreConfig {
                endpoint: endpoint.clone(),
                project_id: project_id.clone(),
                kind: kind.clone(),
                access_token: access_token.clone(),
                timeout: STORE_TIMEOUT,
            })?;
            tracing::info!(
                endpoint = %endpoint,
                project = %project_id,
                kind = %kind,
                "document store"
            );
            Ok(Arc::new(store))
        }
    }
}
