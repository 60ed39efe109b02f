//! Application startup and lifecycle management.
//!
//! Wires the configured stores, dispatcher and broker client into the
//! consumption loop, and serves the probe endpoints next to it.

use crate::config::{DeadLetterSinkKind, DedupBackend, NotificationConfig};
use crate::consumer::{ConsumptionLoop, KafkaMessageSource, MessageSource, PipelineSettings};
use crate::handlers::{router, ReadinessState};
use crate::models::Channel;
use crate::services::{
    DeadLetterSink, DedupStore, EventProcessor, FcmDispatcher, FileDeadLetterSink,
    InMemoryDedupStore, InMemoryRetryLedger, KafkaDeadLetterSink, LogDispatcher,
    MongoDeadLetterSink, Msg91Dispatcher, NotificationDispatcher, ProcessorSettings,
    RedisDedupStore, RetryLedger, SmtpDispatcher,
};
use service_core::error::AppError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    pipeline: ConsumptionLoop,
    readiness: ReadinessState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: NotificationConfig) -> Result<Self, AppError> {
        let dedup = build_dedup_store(&config).await?;
        let ledger: Arc<dyn RetryLedger> =
            Arc::new(InMemoryRetryLedger::new(config.ledger.retention()));
        let sink = build_dead_letter_sink(&config).await?;
        let dispatcher = build_dispatcher(&config)?;

        let source: Arc<dyn MessageSource> = Arc::new(
            KafkaMessageSource::new(&config.kafka)
                .map_err(|e| AppError::BrokerError(anyhow::anyhow!(e)))?,
        );

        let processor = Arc::new(EventProcessor::new(
            dedup,
            ledger.clone(),
            sink,
            dispatcher,
            ProcessorSettings::from_config(&config.retry, &config.dispatch),
        ));

        let pipeline = ConsumptionLoop::new(
            source.clone(),
            processor.clone(),
            ledger,
            PipelineSettings::from_config(&config),
        );

        let readiness = ReadinessState {
            shutdown: pipeline.shutdown_controller(),
            source,
            processor,
        };

        // Port 0 picks a random port for testing
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(
            port = http_port,
            topic = %config.kafka.topic,
            channel = %config.dispatch.channel,
            "Notification service built"
        );

        Ok(Self {
            http_port,
            http_listener,
            pipeline,
            readiness,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run the pipeline and the probe server until `signal` resolves and the
    /// pipeline has drained, or until the message source closes.
    pub async fn run_until_stopped<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.pipeline.shutdown_controller();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            signal.await;
            trigger.begin_drain();
        });

        let pipeline = tokio::spawn(self.pipeline.run());

        let stopped = shutdown.clone();
        axum::serve(self.http_listener, router(self.readiness))
            .with_graceful_shutdown(async move { stopped.wait_until_stopped().await })
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                e
            })?;

        pipeline
            .await
            .map_err(|e| std::io::Error::other(format!("Pipeline task failed: {}", e)))?;

        tracing::info!("Notification service stopped");
        Ok(())
    }
}

pub async fn build_dedup_store(config: &NotificationConfig) -> Result<Arc<dyn DedupStore>, AppError> {
    let retention = config.dedup.retention();
    match (&config.dedup.backend, &config.dedup.redis_url) {
        (DedupBackend::Redis, Some(url)) => {
            let store = RedisDedupStore::connect(url, &config.dedup.key_prefix, retention)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to Redis: {}", e);
                    AppError::InternalError(anyhow::anyhow!(e))
                })?;
            tracing::info!("Redis dedup store initialized");
            Ok(Arc::new(store))
        }
        (DedupBackend::Redis, None) => Err(AppError::ConfigError(anyhow::anyhow!(
            "REDIS_URL is required when DEDUP_BACKEND=redis"
        ))),
        (DedupBackend::Memory, _) => {
            tracing::info!("In-memory dedup store initialized");
            Ok(Arc::new(InMemoryDedupStore::new(retention)))
        }
    }
}

pub async fn build_dead_letter_sink(
    config: &NotificationConfig,
) -> Result<Arc<dyn DeadLetterSink>, AppError> {
    match config.dead_letter.sink {
        DeadLetterSinkKind::Kafka => {
            let sink = KafkaDeadLetterSink::new(&config.kafka, &config.dead_letter.topic)
                .map_err(|e| AppError::BrokerError(anyhow::anyhow!(e)))?;
            Ok(Arc::new(sink))
        }
        DeadLetterSinkKind::MongoDb => {
            let mongo = config.dead_letter.mongodb.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "MONGODB_URI is required when DEAD_LETTER_SINK=mongodb"
                ))
            })?;
            let sink = MongoDeadLetterSink::connect(&mongo.uri, &mongo.database)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            sink.initialize_indexes()
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            Ok(Arc::new(sink))
        }
        DeadLetterSinkKind::File => {
            tracing::info!(path = %config.dead_letter.file_path.display(), "File dead-letter sink");
            Ok(Arc::new(FileDeadLetterSink::new(
                config.dead_letter.file_path.clone(),
            )))
        }
    }
}

pub fn build_dispatcher(
    config: &NotificationConfig,
) -> Result<Arc<dyn NotificationDispatcher>, AppError> {
    let dispatcher: Arc<dyn NotificationDispatcher> = match config.dispatch.channel {
        Channel::Log => Arc::new(LogDispatcher::new()),
        Channel::Email => Arc::new(
            SmtpDispatcher::new(config.smtp.clone())
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        ),
        Channel::Push => Arc::new(FcmDispatcher::new(config.fcm.clone())),
        Channel::Sms => Arc::new(Msg91Dispatcher::new(config.msg91.clone())),
    };
    tracing::info!(channel = %dispatcher.channel(), "Notification dispatcher initialized");
    Ok(dispatcher)
}
