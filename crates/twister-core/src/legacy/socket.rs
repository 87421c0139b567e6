//! UNIX socket metrics export.
//!
//! Clients connect and receive one JSON snapshot of the metric registry
//! in plugin-metric format, then the connection is closed. No commands
//! are accepted.

use crate::metrics::Registry;
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Metrics export socket. Optional; construction fails soft by
/// returning None when no socket path is configured.
pub struct MetricSocket {
    path: PathBuf,
    registry: Arc<Registry>,
    errors: mpsc::Sender<Error>,
    debug_frequency: Option<Duration>,
}

impl MetricSocket {
    /// Create a metric socket. Returns None if `socket_path` is empty.
    pub fn new(
        config: &crate::config::LegacyConfig,
        registry: Arc<Registry>,
        errors: mpsc::Sender<Error>,
    ) -> Option<Self> {
        if config.socket_path.is_empty() {
            return None;
        }
        let debug_frequency = (config.metrics_debug && config.metrics_frequency_seconds != 0)
            .then(|| Duration::from_secs(config.metrics_frequency_seconds));
        Some(Self {
            path: PathBuf::from(&config.socket_path),
            registry,
            errors,
            debug_frequency,
        })
    }

    /// Bind the socket and serve snapshots until shutdown. The socket
    /// file is removed on exit.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        // a stale socket file from an unclean exit blocks the bind
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        let listener = UnixListener::bind(&self.path)
            .map_err(|e| Error::Socket(format!("bind {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), "Metrics socket listening");

        let connections = TaskTracker::new();
        let mut debug_beat = tokio::time::interval(
            self.debug_frequency.unwrap_or(Duration::from_secs(120)),
        );
        debug_beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let registry = self.registry.clone();
                            let errors = self.errors.clone();
                            connections.spawn(async move {
                                if let Err(e) = serve_snapshot(stream, &registry).await {
                                    let _ = errors.send(e).await;
                                }
                            });
                        }
                        Err(e) => {
                            let _ = self.errors.send(Error::Io(e)).await;
                        }
                    }
                }
                _ = debug_beat.tick() => {
                    if self.debug_frequency.is_some() {
                        if let Ok(snap) = self.registry.snapshot_json() {
                            debug!(snapshot = %String::from_utf8_lossy(&snap), "Metric snapshot");
                        }
                    }
                }
            }
        }

        connections.close();
        connections.wait().await;
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

async fn serve_snapshot(mut stream: UnixStream, registry: &Registry) -> Result<()> {
    let snapshot = registry.snapshot_json()?;
    stream.write_all(&snapshot).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LegacyConfig;
    use tokio::io::AsyncReadExt;

    fn socket_config(path: &std::path::Path) -> LegacyConfig {
        LegacyConfig {
            socket_path: path.to_string_lossy().into_owned(),
            metrics_debug: false,
            metrics_frequency_seconds: 0,
        }
    }

    #[test]
    fn test_disabled_without_path() {
        let (tx, _rx) = mpsc::channel(1);
        let registry = Arc::new(Registry::new(""));
        assert!(MetricSocket::new(&LegacyConfig::default(), registry, tx).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_served_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twister-metrics.sock");
        let (tx, _rx) = mpsc::channel(4);
        let registry = Arc::new(Registry::new(""));
        let socket = MetricSocket::new(&socket_config(&path), registry, tx).unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(socket.run(shutdown.clone()));

        // wait for the bind
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value.get("metrics").unwrap().is_array());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
