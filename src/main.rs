use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use campus_notify::{
    api::run_api_server,
    clients::{
        circuit_breaker::CircuitBreaker,
        fcm::{FCM_SERVICE, FcmClient, FcmPushSender},
        rbmq::RabbitMqClient,
        redis::{RedisBroadcaster, RedisClient, RedisSubscriber},
    },
    config::{BrokerBackend, Config},
    handlers::build_registry,
    pipeline::{dispatcher::EventDispatcher, push::PushChannel},
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load()?;
    let backend = config.broker_backend()?;

    let redis_client = RedisClient::connect(&config).await?;
    let broadcaster = Arc::new(RedisBroadcaster::new(
        redis_client.clone(),
        config.broadcast_channel_prefix.clone(),
    ));

    let mut push_channel = PushChannel::new(broadcaster, config.broadcast_timeout());
    if config.fcm_enabled {
        let circuit_breaker = CircuitBreaker::new(
            FCM_SERVICE,
            redis_client.connection(),
            config.circuit_breaker_config(),
        );
        let push_sender = FcmPushSender::new(
            FcmClient::new(&config)?,
            redis_client.clone(),
            circuit_breaker,
            config.fcm_notification_title.clone(),
        );
        push_channel = push_channel.with_push_sender(Arc::new(push_sender), config.push_timeout());
    }
    let push_channel = Arc::new(push_channel);

    let bindings = config.bindings()?;
    let registry = build_registry(
        bindings
            .iter()
            .map(|binding| (binding.matcher.as_str(), binding.handler)),
        &push_channel,
    )?;
    info!(registry = ?registry, "Handler registry built");

    let dispatcher = EventDispatcher::new(Arc::new(registry), config.handler_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let api = tokio::spawn(run_api_server(config.clone(), shutdown_rx.clone()));

    tokio::spawn({
        let shutdown_tx = Arc::clone(&shutdown_tx);
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, finishing in-flight message");
            shutdown_tx.send_replace(true);
        }
    });

    let result = match backend {
        BrokerBackend::RabbitMq => {
            let mut source = RabbitMqClient::connect(&config).await?;
            dispatcher
                .run(&mut source, &config.subscribe_patterns, shutdown_rx.clone())
                .await
        }
        BrokerBackend::Redis => {
            let mut source = RedisSubscriber::new(&config)?;
            dispatcher
                .run(&mut source, &config.subscribe_patterns, shutdown_rx.clone())
                .await
        }
    };

    let requested = *shutdown_rx.borrow();
    shutdown_tx.send_replace(true);

    push_channel.drain(config.shutdown_grace()).await;

    match api.await {
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
        Ok(Ok(())) => {}
    }

    let stats = result?;
    info!(processed = stats.total(), "Worker stopped");

    if !requested {
        return Err(anyhow!("Broker subscription ended unexpectedly"));
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_current_span(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
