//! Sequence runner.
//!
//! This module provides the `Prober` struct that builds the configured
//! sequences and drives them, either once or on a fixed interval with one
//! task per sequence so a stuck probe never delays the others.

use crate::config::validate_sequence_names;
use crate::connector::{Connector, NetworkConnector};
use crate::error::ProberError;
use crate::metrics::{MetricsSink, TracingSink};
use crate::presets::build_sequence;
use crate::sequence::ProbingSequence;
use crate::templates::TemplateStore;
use crate::types::{ProberConfig, SequenceFailure, SequenceReport};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one pass over one sequence.
pub type PassResult = Result<SequenceReport, SequenceFailure>;

/// Drives a set of probing sequences.
///
/// # Example
///
/// ```rust,no_run
/// use registry_prober_lib::{Prober, ProberConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut prober = Prober::with_config(ProberConfig::default())?;
///     for result in prober.run_once_all().await {
///         match result {
///             Ok(report) => println!("{} ok in {:?}", report.sequence, report.duration),
///             Err(failure) => println!("{}", failure),
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Prober {
    config: ProberConfig,
    sequences: Vec<ProbingSequence>,
}

impl Prober {
    /// Build the configured sequences over real TCP/TLS connections,
    /// reporting metrics as tracing events.
    pub fn with_config(config: ProberConfig) -> Result<Self, ProberError> {
        let connector: Arc<dyn Connector> =
            match (&config.epp.cert_path, &config.epp.key_path) {
                (Some(cert), Some(key)) => Arc::new(NetworkConnector::with_client_certificate(
                    config.connect_timeout,
                    cert,
                    key,
                )?),
                (None, None) => Arc::new(NetworkConnector::new(config.connect_timeout)?),
                _ => {
                    return Err(ProberError::config(
                        "EPP client certificate and key must be configured together",
                    ))
                }
            };
        Self::with_parts(config, connector, Arc::new(TracingSink))
    }

    /// Build the configured sequences over the given connector and sink.
    pub fn with_parts(
        config: ProberConfig,
        connector: Arc<dyn Connector>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ProberError> {
        validate_sequence_names(&config.sequences)?;

        if config.interval.is_zero() {
            return Err(ProberError::config("interval must be greater than zero"));
        }

        if config.step_timeout.is_none() {
            warn!("per-step timeout disabled; stuck exchanges are bounded only by the transport");
        }

        let templates = match &config.template_dir {
            Some(dir) => TemplateStore::with_overrides(dir)?,
            None => TemplateStore::builtin(),
        };

        let sequences = config
            .sequences
            .iter()
            .map(|name| {
                build_sequence(
                    name,
                    &config,
                    connector.clone(),
                    &templates,
                    metrics.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            sequences = %config.sequences.join(","),
            interval_ms = config.interval.as_millis() as u64,
            "prober configured"
        );

        Ok(Self { config, sequences })
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    pub fn sequences(&self) -> &[ProbingSequence] {
        &self.sequences
    }

    /// Run one pass of every sequence concurrently.
    ///
    /// Results come back in configuration order.
    pub async fn run_once_all(&mut self) -> Vec<PassResult> {
        join_all(self.sequences.iter_mut().map(|sequence| sequence.run_once())).await
    }

    /// Close any connections kept between passes.
    pub async fn close(&mut self) {
        for sequence in &mut self.sequences {
            sequence.close().await;
        }
    }

    /// Start one task per sequence, each firing on the configured interval.
    ///
    /// Every pass result is sent on the returned channel. With
    /// `passes = Some(n)` each task stops after `n` passes; otherwise the
    /// tasks run until [`ProberHandle::shutdown`] is called.
    pub fn spawn(self, passes: Option<usize>) -> (mpsc::Receiver<PassResult>, ProberHandle) {
        let (results_tx, results_rx) = mpsc::channel(self.sequences.len().max(1) * 4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.config.interval;

        let tasks = self
            .sequences
            .into_iter()
            .map(|mut sequence| {
                let results = results_tx.clone();
                let mut shutdown = shutdown_rx.clone();

                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    let mut completed = 0;

                    loop {
                        if passes.is_some_and(|limit| completed >= limit) {
                            break;
                        }
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = shutdown.changed() => break,
                        }

                        let result = tokio::select! {
                            result = sequence.run_once() => result,
                            _ = shutdown.changed() => break,
                        };
                        completed += 1;

                        if results.send(result).await.is_err() {
                            debug!(sequence = sequence.name(), "result receiver dropped");
                            break;
                        }
                    }

                    sequence.close().await;
                    debug!(sequence = sequence.name(), passes = completed, "sequence task stopped");
                })
            })
            .collect();

        (
            results_rx,
            ProberHandle {
                shutdown: shutdown_tx,
                tasks,
            },
        )
    }
}

/// Controls the tasks started by [`Prober::spawn`].
#[derive(Debug)]
pub struct ProberHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProberHandle {
    /// Ask every sequence task to stop and wait for them.
    ///
    /// A pass in flight is abandoned; dropping it closes its connection.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    /// Wait for every task to finish on its own.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "sequence task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryListener};
    use crate::metrics::MemorySink;
    use crate::types::ProbeOutcome;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn serve_ok(mut listener: MemoryListener) {
        tokio::spawn(async move {
            while let Some(mut accepted) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = accepted.stream.read(&mut buf).await;
                    let _ = accepted
                        .stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                        .await;
                });
            }
        });
    }

    fn config() -> ProberConfig {
        ProberConfig::default()
            .with_tlds(vec!["app".into()])
            .with_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_unknown_sequence_is_rejected() {
        let config = ProberConfig::default().with_sequences(vec!["nope".into()]);
        let result = Prober::with_parts(
            config,
            Arc::new(MemoryConnector::new()),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(ProberError::ConfigError { .. })));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = ProberConfig::default().with_interval(Duration::ZERO);
        let result = Prober::with_parts(
            config,
            Arc::new(MemoryConnector::new()),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(ProberError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_run_once_all() {
        let connector = MemoryConnector::new();
        serve_ok(connector.listen("whois.nic.app", 80));
        let sink = Arc::new(MemorySink::new());

        let mut prober =
            Prober::with_parts(config(), Arc::new(connector), sink.clone()).unwrap();
        let results = prober.run_once_all().await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(sink.records()[0].outcome, ProbeOutcome::Success);
    }

    #[tokio::test]
    async fn test_spawn_stops_after_passes() {
        let connector = MemoryConnector::new();
        serve_ok(connector.listen("whois.nic.app", 80));

        let prober = Prober::with_parts(
            config(),
            Arc::new(connector.clone()),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        let (mut results, handle) = prober.spawn(Some(3));

        let mut received = 0;
        while let Some(result) = results.recv().await {
            assert!(result.is_ok());
            received += 1;
        }
        handle.wait().await;

        assert_eq!(received, 3);
        assert_eq!(connector.opened(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_unbounded_tasks() {
        let connector = MemoryConnector::new();
        serve_ok(connector.listen("whois.nic.app", 80));

        let prober = Prober::with_parts(
            config(),
            Arc::new(connector),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        let (mut results, handle) = prober.spawn(None);

        assert!(results.recv().await.is_some());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
