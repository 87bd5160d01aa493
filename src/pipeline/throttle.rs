//! Controle adaptativo de concorrência.
//!
//! Toda chamada remota passa por [`ConcurrencyController::admit`]. Sinais
//! repetidos de rate limit cortam o limite de admissão pela metade e esticam
//! o atraso adaptativo; um período calmo deixa o limite voltar aos poucos ao
//! valor configurado.

use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Ajustes do [`ConcurrencyController`].
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    /// Limite configurado; o controlador nunca admite mais que isso.
    pub original_limit: usize,
    /// A cada tantos sinais de rate limit o limite cai pela metade.
    pub signals_per_step: u64,
    /// Tempo sem sinais exigido antes de o limite voltar a crescer.
    pub quiet_period: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Multiplicador aplicado ao atraso adaptativo a cada corte.
    pub backoff_factor: f64,
    /// Multiplicador aplicado ao atraso adaptativo a cada passo de recuperação.
    pub recovery_factor: f64,
}

impl ThrottleSettings {
    pub fn new(original_limit: usize) -> Self {
        Self {
            original_limit: original_limit.max(1),
            signals_per_step: 5,
            quiet_period: Duration::from_secs(300),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 1.5,
            recovery_factor: 0.9,
        }
    }
}

#[derive(Debug)]
struct ConcurrencyState {
    current_limit: usize,
    original_limit: usize,
    rate_limit_events: u64,
    last_rate_limit: Option<Instant>,
    adaptive_delay: Duration,
    in_flight: usize,
    closed: bool,
}

/// Fotografia do controlador, relatada no fim da execução.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleSnapshot {
    pub current_limit: usize,
    pub original_limit: usize,
    pub rate_limit_events: u64,
    pub adaptive_delay_ms: u64,
    pub in_flight: usize,
}

/// Portão de admissão do processo, compartilhado por todos os workers.
#[derive(Debug)]
pub struct ConcurrencyController {
    state: Mutex<ConcurrencyState>,
    notify: Notify,
    settings: ThrottleSettings,
}

impl ConcurrencyController {
    pub fn new(settings: ThrottleSettings) -> Self {
        let state = ConcurrencyState {
            current_limit: settings.original_limit,
            original_limit: settings.original_limit,
            rate_limit_events: 0,
            last_rate_limit: None,
            adaptive_delay: settings.min_delay,
            in_flight: 0,
            closed: false,
        };
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConcurrencyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Espera uma vaga livre dentro do limite atual.
    ///
    /// Retorna `None` depois que o controlador foi fechado.
    pub async fn admit(&self) -> Option<AdmissionPermit<'_>> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if state.in_flight < state.current_limit {
                    state.in_flight += 1;
                    return Some(AdmissionPermit {
                        controller: self,
                        released: false,
                    });
                }
            }
            notified.await;
        }
    }

    fn release_slot(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Registra um sinal de rate limit e devolve o atraso adaptativo a respeitar.
    pub fn on_rate_limit_signal(&self, now: Instant) -> Duration {
        let mut state = self.lock();
        state.rate_limit_events += 1;
        state.last_rate_limit = Some(now);

        if state.rate_limit_events % self.settings.signals_per_step == 0 {
            let previous = state.current_limit;
            state.current_limit = (state.current_limit / 2).max(1);
            state.adaptive_delay = state
                .adaptive_delay
                .mul_f64(self.settings.backoff_factor)
                .min(self.settings.max_delay);
            warn!(
                events = state.rate_limit_events,
                from = previous,
                to = state.current_limit,
                delay_ms = state.adaptive_delay.as_millis() as u64,
                "rate limited repeatedly, lowering concurrency"
            );
        }
        state.adaptive_delay
    }

    /// Aumenta o limite em um após um período calmo. Retorna true se cresceu.
    pub fn periodic_rebalance(&self, now: Instant) -> bool {
        let grew = {
            let mut state = self.lock();
            let quiet = state
                .last_rate_limit
                .is_none_or(|last| now.saturating_duration_since(last) >= self.settings.quiet_period);
            if quiet && state.current_limit < state.original_limit {
                state.current_limit += 1;
                state.adaptive_delay = state
                    .adaptive_delay
                    .mul_f64(self.settings.recovery_factor)
                    .max(self.settings.min_delay);
                info!(limit = state.current_limit, "raising concurrency");
                true
            } else {
                false
            }
        };
        if grew {
            self.notify.notify_waiters();
        }
        grew
    }

    #[cfg(test)]
    pub fn current_limit(&self) -> usize {
        self.lock().current_limit
    }

    #[cfg(test)]
    pub fn adaptive_delay(&self) -> Duration {
        self.lock().adaptive_delay
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        let state = self.lock();
        ThrottleSnapshot {
            current_limit: state.current_limit,
            original_limit: state.original_limit,
            rate_limit_events: state.rate_limit_events,
            adaptive_delay_ms: state.adaptive_delay.as_millis() as u64,
            in_flight: state.in_flight,
        }
    }

    /// Para de admitir. Quem espera em [`admit`](Self::admit) ou
    /// [`closed`](Self::closed) acorda na hora.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Completa quando [`close`](Self::close) tiver sido chamado.
    pub async fn closed(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Uma vaga dentro do limite do controlador; liberada no drop.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    controller: &'a ConcurrencyController,
    released: bool,
}

impl AdmissionPermit<'_> {
    pub fn release(mut self) {
        self.released = true;
        self.controller.release_slot();
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release_slot();
        }
    }
}
