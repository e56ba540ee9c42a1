//! Process wiring: one process runs one role of the pipeline.

use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

use crate::{
    api::{create_router, AppState},
    broker::{BrokerConnection, Channel, Queue, RedisChannel, Topology},
    config::{Config, Role},
    services::{
        providers::{HttpEmbedder, HttpEmotionClassifier, HttpSynopsisRewriter, PgCatalog},
        ResultSink, ResultStore,
    },
    worker::{Consumer, EmotionStage, PersonalizeStage, RecommendStage, Stage, StageWorker},
};

/// Runs the configured role until Ctrl-C
pub async fn run(config: Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(role = %config.role, redis_url = %config.redis_url, "Starting");

    let broker = Arc::new(BrokerConnection::new(&config.redis_url, config.backoff())?);
    if !broker.reconnect(&mut shutdown_rx.clone()).await {
        return Ok(());
    }
    let supervisor = broker.clone().spawn_supervisor(shutdown_rx.clone());

    let redis_channel = RedisChannel::new(broker, config.channel_config());
    redis_channel.init(&Queue::ALL).await?;
    let channel: Arc<dyn Channel> = Arc::new(redis_channel);

    let result = match config.role {
        Role::Gateway => run_gateway(&config, channel, shutdown_rx).await,
        Role::Emotion => {
            let classifier =
                HttpEmotionClassifier::new(config.classifier_url.clone(), config.capability_timeout())?;
            let stage = EmotionStage::new(Arc::new(classifier));
            run_stage(&config, channel, stage, Queue::Requests, Queue::Emotions, shutdown_rx).await;
            Ok(())
        }
        Role::Recommender => {
            let embedder = HttpEmbedder::new(config.embedding_url.clone(), config.capability_timeout())?;
            let catalog = PgCatalog::connect(&config.database_url).await?;
            let stage = RecommendStage::new(
                Arc::new(embedder),
                Arc::new(catalog),
                config.top_k,
                config.query_template.clone(),
            );
            let output = Topology {
                personalize: config.personalize,
            }
            .after_recommendation();
            run_stage(&config, channel, stage, Queue::Emotions, output, shutdown_rx).await;
            Ok(())
        }
        Role::Personalizer => {
            let rewriter = HttpSynopsisRewriter::new(
                config.rewriter_url.clone(),
                config.rewriter_api_key.clone(),
                config.rewrite_timeout(),
            )?;
            let stage = PersonalizeStage::new(
                Arc::new(rewriter),
                config.rewrite_timeout(),
                config.personalization_budget(),
            );
            run_stage(&config, channel, stage, Queue::Candidates, Queue::Results, shutdown_rx).await;
            Ok(())
        }
    };

    signal.abort();
    supervisor.abort();
    tracing::info!(role = %config.role, "Stopped");
    result
}

async fn run_stage<S>(
    config: &Config,
    channel: Arc<dyn Channel>,
    stage: S,
    input: Queue,
    output: Queue,
    shutdown: watch::Receiver<bool>,
) where
    S: Stage + 'static,
{
    tracing::info!(stage = stage.name(), input = %input, output = %output, "Stage worker ready");

    let worker = StageWorker::new(stage, channel.clone(), output, config.capability_timeout());
    let consumer = Consumer::new(channel, input, config.consumer_name(), config.max_deliveries);
    consumer.run(&worker, shutdown).await;
}

async fn run_gateway(
    config: &Config,
    channel: Arc<dyn Channel>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let results = Arc::new(ResultStore::new(config.result_ttl()));
    let sweeper = results
        .clone()
        .spawn_sweeper(config.sweep_interval(), shutdown.clone());

    let sink = ResultSink::new(results.clone());
    let sink_consumer = Consumer::new(
        channel.clone(),
        Queue::Results,
        config.consumer_name(),
        config.max_deliveries,
    );
    let sink_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sink_consumer.run(&sink, shutdown).await })
    };

    let app = create_router(AppState::new(channel, results));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;

    // Consumers finish their current delivery before stopping
    let drain = async {
        let _ = sink_task.await;
        let _ = sweeper.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("Background tasks did not stop in time");
    }

    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
