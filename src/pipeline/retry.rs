//! Laço de novas tentativas por item em volta do classificador.
//!
//! Toda falha não terminal leva a outra tentativa depois de um backoff
//! exponencial; não há teto de tentativas. Itens que continuam falhando
//! aparecem num aviso único e no medidor `stalled`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, TokioClock};
use super::stats::{Counter, StatsAggregator};
use super::throttle::ConcurrencyController;
use crate::classifier::{Classifier, ClassifyError};
use crate::enumerate::WorkItem;
use crate::normalize::NormalizedPayload;
use crate::verdict::Verdict;

/// Prefixo da resposta bruta mantido nas mensagens de falha de parse.
const RAW_EXCERPT_CHARS: usize = 120;

/// Parâmetros de backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub growth_factor: f64,
    /// Expoente a partir do qual o backoff para de crescer.
    pub cap_exponent: u32,
    pub max_backoff: Duration,
    /// Tentativas após as quais o item é relatado como travado (0 desliga).
    pub stall_warning_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            growth_factor: 2.0,
            cap_exponent: 5,
            max_backoff: Duration::from_secs(60),
            stall_warning_after: 10,
        }
    }
}

impl RetryPolicy {
    /// Espera antes da tentativa número `attempt` (a partir de 1):
    /// `min(max_backoff, base * growth^min(attempt - 1, cap_exponent))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.cap_exponent);
        let secs = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent as i32);
        Duration::try_from_secs_f64(secs)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// A execução foi cancelada antes de o item chegar a um veredito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled before a verdict was reached")]
pub struct Cancelled;

/// Leva um item do payload até o [`Verdict`].
pub struct RetryEngine<C, K = TokioClock> {
    classifier: Arc<C>,
    controller: Arc<ConcurrencyController>,
    stats: Arc<StatsAggregator>,
    clock: Arc<K>,
    policy: RetryPolicy,
    call_timeout: Duration,
    max_payload_bytes: usize,
}

impl<C: Classifier, K: Clock> RetryEngine<C, K> {
    pub fn new(
        classifier: Arc<C>,
        controller: Arc<ConcurrencyController>,
        stats: Arc<StatsAggregator>,
        clock: Arc<K>,
        policy: RetryPolicy,
        call_timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            classifier,
            controller,
            stats,
            clock,
            policy,
            call_timeout,
            max_payload_bytes,
        }
    }

    /// Classifica `payload` até obter um veredito ou até a execução ser cancelada.
    pub async fn classify(
        &self,
        item: &WorkItem,
        payload: &NormalizedPayload,
    ) -> Result<Verdict, Cancelled> {
        let size = payload.encoded_len();
        if size > self.max_payload_bytes {
            let err = ClassifyError::OversizedPayload {
                size,
                limit: self.max_payload_bytes,
            };
            warn!(path = %item, error = %err, "rejecting image without classification");
            return Ok(Verdict::rejected("oversized image"));
        }

        let mut attempt: u32 = 0;
        let mut stalled = false;

        let outcome = loop {
            let err = match self.attempt(payload).await {
                None => break Err(Cancelled),
                Some(Ok(verdict)) => break Ok(verdict),
                Some(Err(err)) => err,
            };

            if err.is_terminal() {
                if matches!(err, ClassifyError::SafetyBlocked(_)) {
                    self.stats.increment(Counter::SafetyBlocked);
                }
                warn!(path = %item, error = %err, "terminal classifier failure, rejecting");
                break Ok(Verdict::rejected(terminal_reason(&err)));
            }

            attempt += 1;
            self.stats.increment(Counter::Retries);
            let delay = self.delay_after(&err, attempt);

            if !stalled
                && self.policy.stall_warning_after > 0
                && attempt >= self.policy.stall_warning_after
            {
                stalled = true;
                self.stats.mark_stalled();
                warn!(path = %item, attempt, error = %err, "item keeps failing, still retrying");
            }
            debug!(
                path = %item,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying classification"
            );

            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                _ = self.controller.closed() => break Err(Cancelled),
            }
        };

        if stalled {
            self.stats.clear_stalled();
        }
        outcome
    }

    /// Uma chamada controlada. `None` indica admissão recusada porque a execução está fechando.
    async fn attempt(&self, payload: &NormalizedPayload) -> Option<Result<Verdict, ClassifyError>> {
        let permit = self.controller.admit().await?;
        let response = tokio::time::timeout(
            self.call_timeout,
            self.classifier.classify(payload, self.call_timeout),
        )
        .await;
        permit.release();

        let raw = match response {
            Err(_) => return Some(Err(ClassifyError::Timeout)),
            Ok(Err(err)) => return Some(Err(err)),
            Ok(Ok(raw)) => raw,
        };
        Some(Verdict::parse(&raw).ok_or_else(|| {
            ClassifyError::ParseFailure(raw.chars().take(RAW_EXCERPT_CHARS).collect())
        }))
    }

    fn delay_after(&self, err: &ClassifyError, attempt: u32) -> Duration {
        let backoff = self.policy.delay_for_attempt(attempt);
        let ClassifyError::RateLimited { retry_after_ms } = err else {
            return backoff;
        };

        self.stats.increment(Counter::RateLimitErrors);
        let adaptive = self.controller.on_rate_limit_signal(self.clock.now());
        let server = retry_after_ms.map(Duration::from_millis).unwrap_or_default();
        backoff
            .max(adaptive)
            .max(server)
            .min(self.policy.max_backoff)
    }
}

fn terminal_reason(err: &ClassifyError) -> &'static str {
    match err {
        ClassifyError::SafetyBlocked(_) => "blocked by content filter",
        _ => "oversized image",
    }
}
