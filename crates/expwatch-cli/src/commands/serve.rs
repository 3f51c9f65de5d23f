//! Serve command implementation.

use crate::server::{start_server, ServerState};
use crate::ExitCode;
use anyhow::Result;
use expwatch_core::{Config, Error, Tracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Serve HTTP endpoints, optionally driving invocations on an interval.
pub async fn run(
    mut config: Config,
    port: Option<u16>,
    tick_interval: Option<u64>,
) -> Result<ExitCode> {
    // Apply CLI overrides
    if let Some(p) = port {
        config.monitoring.http_port = p;
    }
    if tick_interval.is_some() {
        config.monitoring.tick_interval_seconds = tick_interval;
    }

    let http_port = config.monitoring.http_port;
    let interval = config
        .monitoring
        .tick_interval_seconds
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let tracker = Arc::new(Tracker::from_config(config)?);
    let (shutdown_tx, _) = broadcast::channel(1);

    let server_state = Arc::new(ServerState {
        tracker: Arc::clone(&tracker),
    });
    let mut server = tokio::spawn(start_server(
        server_state,
        http_port,
        shutdown_tx.subscribe(),
    ));

    if let Some(every) = interval {
        info!(interval_secs = every.as_secs(), "Scheduled invocations enabled");
        tokio::spawn(tick_loop(
            Arc::clone(&tracker),
            every,
            shutdown_tx.subscribe(),
        ));
    }

    let signalled = tokio::select! {
        code = wait_for_signal() => Some(code),
        result = &mut server => {
            report_server_exit(result);
            None
        }
    };
    let _ = shutdown_tx.send(());

    let code = match signalled {
        Some(code) => match server.await {
            Ok(Ok(())) => code,
            result => {
                report_server_exit(result);
                ExitCode::RuntimeError
            }
        },
        None => ExitCode::RuntimeError,
    };

    info!("Server stopped");
    Ok(code)
}

fn report_server_exit(result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => error!("HTTP server exited unexpectedly"),
        Ok(Err(e)) => error!(error = %format!("{:#}", e), "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
}

/// Invoke the tracker every `every` until shutdown. Ticks missed while an
/// invocation runs are skipped, not queued.
async fn tick_loop(tracker: Arc<Tracker>, every: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tracker.invoke().await {
                    Ok(report) => info!(
                        decision = report.decision.as_str(),
                        duration_ms = report.duration_ms,
                        "Scheduled invocation finished"
                    ),
                    // Already logged by the tracker
                    Err(Error::Lease(_)) => {}
                    Err(e) => error!(error = %e, "Scheduled invocation failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Stopping scheduled invocations");
                return;
            }
        }
    }
}

async fn wait_for_signal() -> ExitCode {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return ExitCode::SignalInterrupt;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                ExitCode::SignalInterrupt
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                ExitCode::Success
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
        ExitCode::SignalInterrupt
    }
}
