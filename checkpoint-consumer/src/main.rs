//! Consume topics as part of a group, verify offset continuity and commit after each message.
use std::sync::Arc;

use anyhow::Context;
use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use checkpoint_consumer::client::{CheckpointClient, ClientStreams};
use checkpoint_consumer::config::Config;
use checkpoint_consumer::consumer::CheckpointConsumer;
use checkpoint_consumer::error_sink::drain_errors;
use checkpoint_consumer::kafka::KafkaCheckpointClient;
use checkpoint_consumer::metrics::{serve, setup_metrics_recorder, setup_metrics_router};
use checkpoint_consumer::shutdown::{wait_for_interrupt, ShutdownCoordinator};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("valid directive")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("Starting checkpoint consumer...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let (client, streams) =
        match KafkaCheckpointClient::join(&config.kafka, config.message_buffer_size) {
            Ok(joined) => joined,
            Err(e) => {
                error!("{}", e);
                return Err(e.into());
            }
        };
    let client: Arc<dyn CheckpointClient> = Arc::new(client);
    let ClientStreams {
        mut messages,
        errors,
    } = streams;

    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            let bind = config.bind();
            tokio::task::spawn(async move {
                let router = setup_metrics_router(recorder_handle);
                if let Err(e) = serve(router, &bind).await {
                    error!("failed to serve metrics on {}: {}", bind, e);
                }
            });
        }
        Err(e) => warn!("metrics disabled, failed to install recorder: {}", e),
    }

    let close_timeout = config.kafka.kafka_processing_timeout_ms.0;
    let coordinator = ShutdownCoordinator::new(client.clone(), close_timeout);
    tokio::spawn(coordinator.run(wait_for_interrupt()));
    let error_sink = tokio::spawn(drain_errors(errors));

    let mut consumer = CheckpointConsumer::new(client.clone(), config.processing_delay.0);
    let summary = consumer.run(&mut messages).await;

    // Commits from the drain may still be in flight; this one waits for them
    if let Err(e) = client.finalize(&summary.ledger) {
        error!("{}", e);
    }

    // Give the error sink a chance to log anything reported during the drain
    if tokio::time::timeout(close_timeout, error_sink).await.is_err() {
        warn!("client error stream still open at exit");
    }

    info!("Processed {} events.", summary.event_count);
    info!("{}", summary);

    Ok(())
}
