use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use nvml_exporter::collector::new_registry;
use nvml_exporter::config::Args;
use nvml_exporter::engine::SamplingEngine;
use nvml_exporter::logging;
use nvml_exporter::metrics::SysinfoInspector;
use nvml_exporter::nvml::NvmlBackend;
use nvml_exporter::registry::MetricRegistry;
use nvml_exporter::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.debug);

    let config = args.into_config().context("Invalid configuration")?;
    let metrics = MetricRegistry::from_allow_list(&config.metric_names);
    info!(
        metrics = metrics.enabled().len(),
        interval_secs = config.collect_interval.as_secs(),
        slurm = config.use_slurm,
        "starting nvml-exporter"
    );

    let backend = NvmlBackend::init().context("Failed to initialize NVML")?;
    let mut engine = SamplingEngine::new(
        Box::new(backend),
        Box::new(SysinfoInspector::new()),
        &config,
        &metrics,
    )
    .context("Failed to enumerate GPUs")?;
    let cache = engine.cache();

    let registry = new_registry(cache.clone(), &metrics, &config.hostname, config.use_slurm)
        .context("Failed to register collectors")?;
    let listener = TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address))?;

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone())?;

    let engine_task = {
        let cancel = cancel.clone();
        let interval = config.collect_interval;
        tokio::spawn(async move { engine.run(interval, cancel).await })
    };

    let app = server::router(AppState { registry, cache });
    let served = server::serve(listener, app, cancel.clone()).await;
    if served.is_err() {
        cancel.cancel();
    }

    match engine_task.await.context("Sampling task panicked")? {
        Ok(()) => info!("NVML shut down"),
        Err(e) => error!(error = %e, "failed to shut down NVML"),
    }

    served.context("HTTP server failed")
}

/// Cancel `token` on the first SIGINT, SIGTERM, SIGQUIT or SIGHUP.
fn spawn_signal_watcher(token: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("Failed to install SIGQUIT handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = hangup.recv() => "SIGHUP",
        };
        info!(signal = name, "shutting down");
        token.cancel();
    });

    Ok(())
}
