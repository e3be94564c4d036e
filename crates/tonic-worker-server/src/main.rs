#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::interceptors::{BearerAuth, RequestId, track_calls};
use server::telemetry::{init_telemetry, shutdown_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tonic_health::{ServingStatus, server::HealthReporter};
use tonic_worker::{
    GrpcWorker, GrpcWorkerBuilder, Listener, MethodDescriptor, ServiceDescriptor,
    SharedInterceptor, Worker, WorkerOption,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const HEALTH_SERVICE: &str = "grpc.health.v1.Health";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    let listener = bind(&config).await?;
    let result = run(listener, &config).await;

    #[cfg(unix)]
    if config.uds {
        // Best effort: a panic can still leave the socket file behind.
        let _ = std::fs::remove_file(&config.server_addr);
    }

    shutdown_telemetry(providers);
    result
}

async fn bind(config: &ServerConfig) -> anyhow::Result<Listener> {
    if config.uds {
        #[cfg(unix)]
        {
            let uds = tokio::net::UnixListener::bind(&config.server_addr)?;
            Ok(Listener::from(uds))
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp = TcpListener::bind(&config.server_addr).await?;
        Ok(Listener::from(tcp))
    }
}

async fn run(listener: Listener, config: &ServerConfig) -> anyhow::Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    let descriptor = ServiceDescriptor::new(HEALTH_SERVICE)
        .with_method(MethodDescriptor::unary("Check"))
        .with_method(MethodDescriptor::server_streaming("Watch"));

    let span = tracing::info_span!("tonic_worker_server");
    let worker = Arc::new(
        configure(
            GrpcWorker::builder(span.clone(), listener, health_service, descriptor),
            config,
        )
        .build(),
    );

    log_startup_info(&worker, config);
    worker.init(&span)?;
    health_reporter
        .set_service_status(HEALTH_SERVICE, ServingStatus::Serving)
        .await;

    let mut runner = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run().await }
    });

    tokio::select! {
        result = &mut runner => {
            // The server stopped on its own, which only happens on failure.
            result??;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    shutdown(worker.as_ref(), &health_reporter).await;
    runner.await??;

    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Installs the interceptor chains and server tuning from `config`.
///
/// Both chains get the same interceptors since the health service exposes one
/// method of each kind.
fn configure<S>(builder: GrpcWorkerBuilder<S>, config: &ServerConfig) -> GrpcWorkerBuilder<S> {
    let mut builder = builder
        .unary_interceptor(track_calls)
        .stream_interceptor(track_calls);

    if let Some(expected) = &config.auth_token {
        let auth = BearerAuth::new(expected.clone());
        builder = builder
            .unary_interceptor(auth.clone())
            .stream_interceptor(auth);
    }

    // One counter across both chains keeps ids unique per process.
    let request_ids: SharedInterceptor =
        Arc::new(RequestId::new(format!("req-{}", std::process::id())));
    builder = builder
        .option(WorkerOption::UnaryInterceptor(Arc::clone(&request_ids)))
        .option(WorkerOption::StreamInterceptor(request_ids))
        .accept_http1(config.accept_http1)
        .http2_adaptive_window(true);

    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(limit) = config.concurrency_limit {
        builder = builder.concurrency_limit(limit);
    }
    builder
}

fn log_startup_info<S>(worker: &GrpcWorker<S>, config: &ServerConfig) {
    let address = worker
        .local_addr()
        .map_or_else(|_| config.server_addr.clone(), |addr| addr.to_string());

    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting health worker on {} with full config: {:#?}",
            address,
            config
        );
    } else {
        tracing::info!(
            "Starting health worker on {} (auth: {})",
            address,
            config.auth_token.is_some()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}

async fn shutdown(worker: &dyn Worker, health_reporter: &HealthReporter) {
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_service_status(HEALTH_SERVICE, ServingStatus::NotServing)
        .await;

    // 2. Stop accepting calls and let in-flight ones drain
    if let Err(e) = worker.terminate() {
        tracing::error!("Error during worker shutdown: {:?}", e);
    }
}
