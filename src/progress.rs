//! Relatório de progresso e resumo final no terminal.
//!
//! O [`ProgressReporter`] amostra o [`StatsAggregator`] em intervalo fixo e
//! publica um [`ProgressSnapshot`] num [`ProgressSink`]. O sink padrão,
//! [`IndicatifSink`], desenha uma barra com `indicatif`; o resumo final
//! usa `console` para cores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{ProcessingStats, RunSummary, StatsAggregator};

/// Menor intervalo aceito entre amostras.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Fotografia do progresso publicada a cada intervalo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: u64,
    pub approved: u64,
    pub quarantined: u64,
    pub errors: u64,
    /// Itens processados por segundo desde o início.
    pub rate: f64,
    /// Estimativa de minutos restantes; `None` enquanto nada foi processado.
    pub eta_minutes: Option<f64>,
}

impl ProgressSnapshot {
    pub fn new(stats: &ProcessingStats, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            stats.processed as f64 / secs
        } else {
            0.0
        };
        let remaining = stats.total.saturating_sub(stats.processed) as f64;
        let eta_minutes = (rate > 0.0).then(|| remaining / rate / 60.0);

        Self {
            processed: stats.processed,
            total: stats.total,
            approved: stats.approved,
            quarantined: stats.quarantined,
            errors: stats.errors,
            rate,
            eta_minutes,
        }
    }
}

/// Destino das atualizações de progresso.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, snapshot: &ProgressSnapshot);
    fn finish(&self, snapshot: &ProgressSnapshot);
}

/// Barra de progresso no terminal.
pub struct IndicatifSink {
    // Barra do indicatif; o comprimento é ajustado a cada publicação.
    bar: ProgressBar,
}

impl IndicatifSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn publish(&self, snapshot: &ProgressSnapshot) {
        self.bar.set_length(snapshot.total);
        self.bar.set_position(snapshot.processed);
        let eta = snapshot
            .eta_minutes
            .map(|m| format!("{m:.1} min"))
            .unwrap_or_else(|| "?".to_string());
        self.bar.set_message(format!(
            "ok {} | quarantined {} | errors {} | {:.1}/s | ETA {eta}",
            snapshot.approved, snapshot.quarantined, snapshot.errors, snapshot.rate
        ));
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        self.publish(snapshot);
        self.bar.finish_and_clear();
    }
}

/// Tarefa em segundo plano que publica o progresso até o fim da execução.
pub struct ProgressReporter {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Inicia a amostragem a cada `interval`.
    ///
    /// Para sozinho quando `processed` alcança `total`, ou quando
    /// [`finish`](Self::finish) é chamado.
    pub fn spawn(
        stats: Arc<StatsAggregator>,
        sink: Arc<dyn ProgressSink>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn({
            let stop = Arc::clone(&stop);
            async move {
                let started = Instant::now();
                let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let current = stats.snapshot();
                            sink.publish(&ProgressSnapshot::new(&current, started.elapsed()));
                            if current.is_complete() {
                                break;
                            }
                        }
                        _ = stop.notified() => break,
                    }
                }
                sink.finish(&ProgressSnapshot::new(&stats.snapshot(), started.elapsed()));
            }
        });
        Self { stop, handle }
    }

    /// Encerra a amostragem e espera a publicação final.
    pub async fn finish(self) {
        self.stop.notify_one();
        let _ = self.handle.await;
    }
}

/// Imprime o resumo final da execução, com cores, ou em JSON.
pub fn print_summary(summary: &RunSummary, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }

    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();
    let s = &summary.stats;

    println!();
    println!("{}", dim.apply_to(format!("─── run {} ───", summary.run_id)));
    println!("  total        {}", s.total);
    println!("  processed    {}", s.processed);
    println!("  {} approved     {}", green.apply_to("✓"), s.approved);
    println!("  {} quarantined  {}", red.apply_to("✗"), s.quarantined);
    println!("  - skipped      {}", s.skipped);
    println!("  {} errors       {}", yellow.apply_to("!"), s.errors);
    println!("  rate limited {}", s.rate_limit_errors);
    println!("  retries      {}", s.retries);
    println!("  filtered     {}", s.safety_blocked);
    println!(
        "  concurrency  {}/{}",
        summary.throttle.current_limit, summary.throttle.original_limit
    );
    println!(
        "  elapsed      {:.1}s",
        summary.duration_ms as f64 / 1000.0
    );
    if summary.cancelled {
        println!("  {}", yellow.apply_to("cancelled: remaining images were left untouched"));
    } else if s.errors > 0 || s.rate_limit_errors > 0 {
        println!("  {}", yellow.apply_to("finished with errors, see the log for details"));
    } else {
        println!("  {}", green.apply_to("done"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Counter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<ProgressSnapshot>>,
        finished: Mutex<Option<ProgressSnapshot>>,
    }

    impl ProgressSink for RecordingSink {
        fn publish(&self, snapshot: &ProgressSnapshot) {
            self.published.lock().unwrap().push(snapshot.clone());
        }

        fn finish(&self, snapshot: &ProgressSnapshot) {
            *self.finished.lock().unwrap() = Some(snapshot.clone());
        }
    }

    #[test]
    fn snapshot_rate_and_eta() {
        let stats = ProcessingStats {
            total: 100,
            processed: 30,
            approved: 20,
            quarantined: 10,
            ..ProcessingStats::default()
        };
        let snap = ProgressSnapshot::new(&stats, Duration::from_secs(60));
        assert!((snap.rate - 0.5).abs() < 1e-9);
        assert!((snap.eta_minutes.unwrap() - 70.0 / 0.5 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_without_progress_has_no_eta() {
        let stats = ProcessingStats {
            total: 5,
            ..ProcessingStats::default()
        };
        let snap = ProgressSnapshot::new(&stats, Duration::ZERO);
        assert_eq!(snap.rate, 0.0);
        assert!(snap.eta_minutes.is_none());
    }

    #[tokio::test]
    async fn reporter_stops_when_complete() {
        let stats = Arc::new(StatsAggregator::new());
        stats.set_total(2);
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::spawn(
            Arc::clone(&stats),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Duration::from_millis(10),
        );

        stats.increment(Counter::Approved);
        stats.increment(Counter::Quarantined);

        // Sem chamar finish: o reporter deve parar sozinho.
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.finished.lock().unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        reporter.finish().await;

        let finished = sink.finished.lock().unwrap().clone().unwrap();
        assert_eq!(finished.processed, 2);
        assert_eq!(sink.published.lock().unwrap().last().unwrap().processed, 2);
    }

    #[tokio::test]
    async fn finish_stops_incomplete_run() {
        let stats = Arc::new(StatsAggregator::new());
        stats.set_total(10);
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::spawn(
            Arc::clone(&stats),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Duration::from_secs(3600),
        );
        tokio::time::timeout(Duration::from_secs(2), reporter.finish())
            .await
            .unwrap();
        assert_eq!(sink.finished.lock().unwrap().as_ref().unwrap().total, 10);
    }
}
