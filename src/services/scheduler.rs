//! Benchmark scheduler
//!
//! One long-lived task: refresh options, maybe run a round, sleep a jittered
//! period, repeat until shut down.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::models::{Overrides, RunOptions};
use crate::proxy::dialer::DialerSet;
use crate::services::config_manager::ConfigManager;
use crate::services::fetcher::Fetcher;
use crate::services::reporter::Reporter;

/// Fraction of the period added or removed at random before each sleep
pub const PERIOD_JITTER: f64 = 0.2;

/// `period` scaled by a uniform factor in `[0.8, 1.2)`
pub fn jittered_period<R: Rng + ?Sized>(period: Duration, rng: &mut R) -> Duration {
    let factor = 1.0 + rng.gen_range(-PERIOD_JITTER..PERIOD_JITTER);
    period.mul_f64(factor)
}

/// Whether this cycle runs a round
pub fn sample_gate<R: Rng + ?Sized>(sample_rate: f64, rng: &mut R) -> bool {
    rng.gen::<f64>() < sample_rate
}

/// Outcome of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Trials attempted
    pub trials: usize,
    /// Trials that produced a report
    pub reported: usize,
}

pub struct Scheduler {
    config: Arc<ConfigManager>,
    fetcher: Fetcher,
    reporter: Arc<dyn Reporter>,
}

impl Scheduler {
    pub fn new(config: Arc<ConfigManager>, fetcher: Fetcher, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            fetcher,
            reporter,
        }
    }

    /// Start benchmarking in the background with the default dialers (TLS only).
    ///
    /// Returns as soon as the loop is spawned.
    pub fn start<R: Reporter>(
        options: RunOptions,
        overrides: Overrides,
        reporter: R,
    ) -> Result<SchedulerHandle> {
        Self::start_with_dialers(options, overrides, DialerSet::new(), reporter)
    }

    /// Like [`Scheduler::start`], with a caller-provided dialer set
    pub fn start_with_dialers<R: Reporter>(
        options: RunOptions,
        overrides: Overrides,
        dialers: DialerSet,
        reporter: R,
    ) -> Result<SchedulerHandle> {
        let config = Arc::new(ConfigManager::new(options, overrides)?);
        let fetcher = Fetcher::new(Arc::new(dialers));
        Ok(Self::new(config, fetcher, Arc::new(reporter)).spawn())
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        SchedulerHandle { shutdown_tx, task }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting proxy benchmark scheduler with dialers {:?}",
            self.fetcher.dialers().protocols()
        );

        loop {
            let options = tokio::select! {
                options = self.config.refresh() => options,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let sampled = sample_gate(options.sample_rate, &mut rand::thread_rng());
            if sampled {
                debug!("Running benchmarks");
                tokio::select! {
                    summary = self.run_round(&options) => {
                        info!(
                            "Round finished: {} of {} trials reported",
                            summary.reported, summary.trials
                        );
                    }
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            } else {
                debug!("Not sampled this cycle");
            }

            let sleep_for = jittered_period(options.period, &mut rand::thread_rng());
            debug!("Waiting {:?} before running again", sleep_for);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Benchmark scheduler shutting down");
    }

    /// One trial per (url, proxy) pair, in order
    pub async fn run_round(&self, options: &RunOptions) -> RoundSummary {
        let mut summary = RoundSummary::default();

        for origin in &options.urls {
            for endpoint in &options.proxies {
                let Some(protocol) = self.fetcher.dialers().select_random(endpoint) else {
                    warn!(
                        "No supported protocol for proxy from {} in {}",
                        endpoint.provider, endpoint.data_center
                    );
                    continue;
                };

                summary.trials += 1;
                if let Some(report) = self.fetcher.run_trial(origin, endpoint, protocol).await {
                    self.reporter.report(report.elapsed, report.context);
                    summary.reported += 1;
                }
            }
        }

        summary
    }
}

/// Resolves once shutdown is requested. Never resolves if the handle was dropped.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Handle for stopping a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Benchmark scheduler task failed: {}", e);
        }
    }
}
