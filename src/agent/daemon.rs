use std::future::Future;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::agent::config::Config;
use crate::commands::{Dispatcher, PathGuard, ToolContext, ToolRegistry};
use crate::error::ConnectError;
use crate::transport::websocket::{self, SessionOutcome};

/// Pause before redialling after the server closed or the link broke.
pub const RECONNECT_AFTER_CLOSE: Duration = Duration::from_secs(3);
/// Pause before redialling after a failed dial.
pub const RECONNECT_AFTER_FAILURE: Duration = Duration::from_secs(5);

/// Run the agent until SIGINT/SIGTERM, or until the first session ends when
/// reconnect is off.
pub async fn run(cfg: Config) -> Result<SessionOutcome> {
    run_until(cfg, shutdown_signal()).await
}

/// Same as [`run`] with a caller-supplied shutdown trigger.
pub async fn run_until<F>(cfg: Config, shutdown: F) -> Result<SessionOutcome>
where
    F: Future<Output = ()>,
{
    let credentials = cfg.require_credentials()?.clone();
    let guard = match &cfg.work_dir {
        Some(dir) => PathGuard::new(dir),
        None => PathGuard::current_dir(),
    }
    .context("resolving working directory")?;

    info!(
        ws_url = %cfg.ws_url,
        work_dir = %guard.root().display(),
        session = credentials.session_prefix(),
        reconnect = cfg.reconnect,
        "Agent starting"
    );

    let registry = ToolRegistry::with_builtin_tools();
    info!(tools = ?registry.names(), "tools registered");
    let dispatcher = Dispatcher::new(registry, ToolContext::new(guard));

    tokio::pin!(shutdown);
    let interrupted = SessionOutcome::LocalShutdown { acknowledged: true };

    loop {
        let dialled = tokio::select! {
            res = websocket::connect(&cfg.ws_url, &credentials) => res,
            () = &mut shutdown => return Ok(interrupted),
        };

        let pause = match dialled {
            Ok(conn) => {
                info!("Connected to relay. Waiting for commands...");
                let outcome = conn.run(dispatcher.clone(), &mut shutdown).await;
                match outcome {
                    SessionOutcome::LocalShutdown { .. } => return Ok(outcome),
                    _ if !cfg.reconnect => return Ok(outcome),
                    _ => {
                        warn!(outcome = %outcome, "session ended");
                        RECONNECT_AFTER_CLOSE
                    }
                }
            }
            Err(e @ ConnectError::InvalidUrl(_)) => return Err(e.into()),
            Err(e) if !cfg.reconnect => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "connection failed");
                RECONNECT_AFTER_FAILURE
            }
        };

        info!(delay_secs = pause.as_secs(), "reconnecting");
        tokio::select! {
            () = sleep(pause) => {}
            () = &mut shutdown => return Ok(interrupted),
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received interrupt, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::Credentials;
    use tempfile::TempDir;

    fn config(url: &str, dir: &TempDir, reconnect: bool) -> Config {
        Config {
            ws_url: url.to_string(),
            credentials: Credentials::new("auth", "session-1"),
            work_dir: Some(dir.path().to_path_buf()),
            reconnect,
        }
    }

    fn dead_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn missing_credentials_fail_fast() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("ws://127.0.0.1:1/ws", &dir, false);
        cfg.credentials = Credentials::default();
        let err = run_until(cfg, std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("not logged in"));
    }

    #[tokio::test]
    async fn invalid_url_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let cfg = config("http://127.0.0.1/ws", &dir, true);
        let err = run_until(cfg, std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("invalid WebSocket URL"));
    }

    #[tokio::test]
    async fn connect_failure_without_reconnect_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&format!("ws://127.0.0.1:{}/ws", dead_port()), &dir, false);
        let err = run_until(cfg, std::future::pending()).await.unwrap_err();
        assert!(err.downcast_ref::<ConnectError>().is_some());
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnect_wait() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&format!("ws://127.0.0.1:{}/ws", dead_port()), &dir, true);
        let shutdown = sleep(Duration::from_millis(300));
        let started = std::time::Instant::now();
        let outcome = run_until(cfg, shutdown).await.unwrap();
        assert_eq!(outcome, SessionOutcome::LocalShutdown { acknowledged: true });
        assert!(started.elapsed() < RECONNECT_AFTER_FAILURE);
    }
}
