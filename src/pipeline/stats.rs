use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Contadores de uma execução.
///
/// `processed == approved + quarantined + skipped + errors` vale em toda
/// fotografia tirada pelo [`StatsAggregator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total: u64,
    pub processed: u64,
    pub approved: u64,
    pub quarantined: u64,
    pub skipped: u64,
    pub errors: u64,
    pub rate_limit_errors: u64,
    pub retries: u64,
    /// Vereditos sintetizados a partir do filtro de conteúdo do provedor.
    pub safety_blocked: u64,
    /// Itens que passaram do limite de aviso de travamento.
    pub stalled: u64,
}

impl ProcessingStats {
    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Approved,
    Quarantined,
    Skipped,
    Errors,
    RateLimitErrors,
    Retries,
    SafetyBlocked,
}

/// Dono thread-safe das [`ProcessingStats`] da execução.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<ProcessingStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProcessingStats) -> R) -> R {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    pub fn increment(&self, counter: Counter) {
        self.with(|s| match counter {
            Counter::Approved => {
                s.approved += 1;
                s.processed += 1;
            }
            Counter::Quarantined => {
                s.quarantined += 1;
                s.processed += 1;
            }
            Counter::Skipped => {
                s.skipped += 1;
                s.processed += 1;
            }
            Counter::Errors => {
                s.errors += 1;
                s.processed += 1;
            }
            Counter::RateLimitErrors => s.rate_limit_errors += 1,
            Counter::Retries => s.retries += 1,
            Counter::SafetyBlocked => s.safety_blocked += 1,
        });
    }

    pub fn set_total(&self, total: u64) {
        self.with(|s| s.total = total);
    }

    pub fn mark_stalled(&self) {
        self.with(|s| s.stalled += 1);
    }

    pub fn clear_stalled(&self) {
        self.with(|s| s.stalled = s.stalled.saturating_sub(1));
    }

    pub fn snapshot(&self) -> ProcessingStats {
        self.with(|s| s.clone())
    }
}
