//! Pipeline concorrente de classificação.
//!
//! Cada item é admitido uma única vez pelo [`ItemTracker`] e despachado para
//! um pool limitado (um `Semaphore` do tamanho configurado na frente de um
//! `JoinSet`). Cada tarefa faz triagem → normalização → classificação →
//! resolução. Toda chamada remota passa ainda pelo
//! [`ConcurrencyController`] adaptativo.

pub mod clock;
pub mod retry;
pub mod stats;
pub mod throttle;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use clock::{Clock, TokioClock};
pub use retry::{Cancelled, RetryEngine, RetryPolicy};
pub use stats::{Counter, ProcessingStats, StatsAggregator};
pub use throttle::{ConcurrencyController, ThrottleSettings, ThrottleSnapshot};
pub use tracker::ItemTracker;

use crate::classifier::Classifier;
use crate::enumerate::WorkItem;
use crate::normalize::{ImageNormalizer, Normalizer};
use crate::progress::{ProgressReporter, ProgressSink};
use crate::remediate::{OutcomeResolver, RemediationAction};
use crate::screen::FilenameScreen;

/// Parâmetros de execução de um [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    /// Payloads codificados acima deste tamanho são rejeitados sem chamada remota.
    pub max_payload_bytes: usize,
    pub progress_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            call_timeout: Duration::from_secs(60),
            max_payload_bytes: 10 * 1024 * 1024,
            progress_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Resultado de um [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub stats: ProcessingStats,
    pub throttle: ThrottleSnapshot,
    /// A execução foi interrompida; imagens não processadas ficaram onde estavam.
    pub cancelled: bool,
}

/// Interrompe um pipeline em andamento: nada novo é despachado nem admitido,
/// e itens esperando backoff desistem.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    controller: Arc<ConcurrencyController>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.controller.close();
    }
}

pub struct Pipeline<C, K = TokioClock> {
    engine: Arc<RetryEngine<C, K>>,
    normalizer: Arc<dyn Normalizer>,
    resolver: Arc<OutcomeResolver>,
    screen: Arc<FilenameScreen>,
    tracker: Arc<ItemTracker>,
    controller: Arc<ConcurrencyController>,
    stats: Arc<StatsAggregator>,
    clock: Arc<K>,
    settings: PipelineSettings,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl<C: Classifier> Pipeline<C, TokioClock> {
    pub fn new(classifier: C, settings: PipelineSettings, resolver: OutcomeResolver) -> Self {
        Self::with_clock(classifier, settings, resolver, TokioClock)
    }
}

impl<C: Classifier, K: Clock> Pipeline<C, K> {
    pub fn with_clock(
        classifier: C,
        settings: PipelineSettings,
        resolver: OutcomeResolver,
        clock: K,
    ) -> Self {
        let controller = Arc::new(ConcurrencyController::new(ThrottleSettings::new(
            settings.max_concurrency,
        )));
        let stats = Arc::new(StatsAggregator::new());
        let clock = Arc::new(clock);
        let engine = Arc::new(RetryEngine::new(
            Arc::new(classifier),
            Arc::clone(&controller),
            Arc::clone(&stats),
            Arc::clone(&clock),
            settings.retry.clone(),
            settings.call_timeout,
            settings.max_payload_bytes,
        ));

        Self {
            engine,
            normalizer: Arc::new(ImageNormalizer::default()),
            resolver: Arc::new(resolver),
            screen: Arc::new(FilenameScreen::default()),
            tracker: Arc::new(ItemTracker::new()),
            controller,
            stats,
            clock,
            settings,
            progress: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_screen(mut self, screen: FilenameScreen) -> Self {
        self.screen = Arc::new(screen);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            controller: Arc::clone(&self.controller),
        }
    }

    /// Processa cada item uma vez e devolve o resumo da execução.
    pub async fn run(&self, items: impl IntoIterator<Item = WorkItem>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let admitted: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| {
                let fresh = self.tracker.try_admit(item);
                if !fresh {
                    debug!(path = %item, "duplicate item ignored");
                }
                fresh
            })
            .collect();
        self.stats.set_total(admitted.len() as u64);
        info!(%run_id, total = admitted.len(), "starting run");

        let reporter = self.progress.as_ref().map(|sink| {
            ProgressReporter::spawn(
                Arc::clone(&self.stats),
                Arc::clone(sink),
                self.settings.progress_interval,
            )
        });

        let pool = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for item in admitted {
            if self.controller.is_closed() {
                break;
            }
            let slot = tokio::select! {
                slot = Arc::clone(&pool).acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
                _ = self.controller.closed() => break,
            };
            self.controller.periodic_rebalance(self.clock.now());

            let worker = self.worker();
            tasks.spawn(async move {
                worker.process(item).await;
                drop(slot);
            });

            while let Some(joined) = tasks.try_join_next() {
                self.record_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.record_join(joined);
        }

        if let Some(reporter) = reporter {
            reporter.finish().await;
        }

        let completed_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
            stats: self.stats.snapshot(),
            throttle: self.controller.snapshot(),
            cancelled: self.controller.is_closed(),
        };
        info!(
            %run_id,
            processed = summary.stats.processed,
            errors = summary.stats.errors,
            cancelled = summary.cancelled,
            "run finished"
        );
        summary
    }

    fn worker(&self) -> Worker<C, K> {
        Worker {
            engine: Arc::clone(&self.engine),
            normalizer: Arc::clone(&self.normalizer),
            resolver: Arc::clone(&self.resolver),
            screen: Arc::clone(&self.screen),
            stats: Arc::clone(&self.stats),
        }
    }

    fn record_join(&self, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(error = %e, "worker task failed");
            self.stats.increment(Counter::Errors);
        }
    }
}

/// Tudo de que uma tarefa precisa para levar um item até o desfecho.
struct Worker<C, K> {
    engine: Arc<RetryEngine<C, K>>,
    normalizer: Arc<dyn Normalizer>,
    resolver: Arc<OutcomeResolver>,
    screen: Arc<FilenameScreen>,
    stats: Arc<StatsAggregator>,
}

impl<C: Classifier, K: Clock> Worker<C, K> {
    async fn process(self, item: WorkItem) {
        let (verdict, payload) = match self.screen.check(item.path()) {
            Some(verdict) => {
                info!(path = %item, reason = %verdict.reason, "rejected by file name");
                (verdict, None)
            }
            None => {
                let normalizer = Arc::clone(&self.normalizer);
                let path = item.path().to_path_buf();
                let payload = match tokio::task::spawn_blocking(move || normalizer.normalize(&path)).await {
                    Ok(Ok(payload)) => payload,
                    Ok(Err(e)) => {
                        warn!(path = %item, error = %e, "could not prepare image");
                        self.stats.increment(Counter::Errors);
                        return;
                    }
                    Err(e) => {
                        error!(path = %item, error = %e, "normalizer task failed");
                        self.stats.increment(Counter::Errors);
                        return;
                    }
                };

                match self.engine.classify(&item, &payload).await {
                    Ok(verdict) => (verdict, Some(payload)),
                    Err(Cancelled) => {
                        debug!(path = %item, "cancelled, leaving in place");
                        return;
                    }
                }
            }
        };

        debug!(
            path = %item,
            suitable = %verdict.suitable,
            confidence = verdict.confidence,
            reason = %verdict.reason,
            "verdict"
        );

        let resolver = Arc::clone(&self.resolver);
        let resolved = tokio::task::spawn_blocking({
            let item = item.clone();
            move || resolver.resolve(&item, &verdict, payload)
        })
        .await;

        let counter = match resolved {
            Ok(result) if result.success => match result.action {
                RemediationAction::Approved => Counter::Approved,
                RemediationAction::Quarantined => Counter::Quarantined,
                RemediationAction::LeftInPlace => Counter::Skipped,
            },
            Ok(result) => {
                warn!(
                    path = %item,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "could not apply verdict"
                );
                Counter::Errors
            }
            Err(e) => {
                error!(path = %item, error = %e, "resolver task failed");
                Counter::Errors
            }
        };
        self.stats.increment(counter);
    }
}
