use dashmap::DashMap;
use tracing::{info, warn};
use crate::observability::metrics::{EXCHANGE_HEALTHY, EXCHANGE_INTERVAL_STEP};
use crate::types::Interval;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeState {
    pub health: Health,
    /// Current historic-rate granularity.
    pub interval: Interval,
    /// Finest granularity `decrease_interval` may return to.
    pub base_interval: Interval,
    pub consecutive_failures: u32,
}

impl ExchangeState {
    fn new(interval: Interval) -> Self {
        ExchangeState {
            health: Health::Healthy,
            interval,
            base_interval: interval,
            consecutive_failures: 0,
        }
    }
}

/// Per-exchange health and interval, owned by the scheduler.
///
/// Only written from a tick's post-processing step, after every request of
/// that tick has completed.
#[derive(Debug)]
pub struct ExchangeStates {
    states: DashMap<String, ExchangeState>,
    unhealthy_after: u32,
}

impl ExchangeStates {
    pub fn new(unhealthy_after: u32) -> Self {
        ExchangeStates {
            states: DashMap::new(),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    /// First registration wins; later jobs share the existing state.
    pub fn register(&self, exchange: &str, interval: Interval) {
        self.states
            .entry(exchange.to_string())
            .or_insert_with(|| {
                EXCHANGE_HEALTHY.with_label_values(&[exchange]).set(1);
                EXCHANGE_INTERVAL_STEP.with_label_values(&[exchange]).set(interval.step() as i64);
                ExchangeState::new(interval)
            });
    }

    pub fn get(&self, exchange: &str) -> Option<ExchangeState> {
        self.states.get(exchange).map(|s| s.value().clone())
    }

    /// Unregistered exchanges count as healthy.
    pub fn health(&self, exchange: &str) -> Health {
        self.states
            .get(exchange)
            .map(|s| s.health)
            .unwrap_or(Health::Healthy)
    }

    pub fn interval(&self, exchange: &str) -> Interval {
        self.states
            .get(exchange)
            .map(|s| s.interval)
            .unwrap_or_default()
    }

    pub fn record_success(&self, exchange: &str) {
        if let Some(mut state) = self.states.get_mut(exchange) {
            state.consecutive_failures = 0;
        }
    }

    /// Returns `true` when this failure demoted the exchange.
    pub fn record_failure(&self, exchange: &str) -> bool {
        let Some(mut state) = self.states.get_mut(exchange) else {
            return false;
        };

        state.consecutive_failures += 1;
        if state.health == Health::Healthy && state.consecutive_failures >= self.unhealthy_after {
            state.health = Health::Unhealthy;
            EXCHANGE_HEALTHY.with_label_values(&[exchange]).set(0);
            warn!(
                "Exchange {} unhealthy after {} failed ticks",
                exchange, state.consecutive_failures
            );
            return true;
        }
        false
    }

    /// A reachable probe. Takes effect from the next tick.
    pub fn mark_healthy(&self, exchange: &str) {
        if let Some(mut state) = self.states.get_mut(exchange) {
            if state.health == Health::Unhealthy {
                info!("Exchange {} reachable again", exchange);
            }
            state.health = Health::Healthy;
            state.consecutive_failures = 0;
            EXCHANGE_HEALTHY.with_label_values(&[exchange]).set(1);
        }
    }

    /// One step coarser, clamped at the coarsest.
    pub fn coarsen(&self, exchange: &str) -> Interval {
        self.set_interval(exchange, |state| state.interval.coarser())
    }

    /// One step finer, never below the registered interval.
    pub fn decrease_interval(&self, exchange: &str) -> Interval {
        self.set_interval(exchange, |state| state.interval.finer().max(state.base_interval))
    }

    fn set_interval(&self, exchange: &str, next: impl Fn(&ExchangeState) -> Interval) -> Interval {
        let Some(mut state) = self.states.get_mut(exchange) else {
            return Interval::default();
        };

        let interval = next(&state);
        if interval != state.interval {
            info!("Exchange {} interval {} -> {}", exchange, state.interval, interval);
            state.interval = interval;
            EXCHANGE_INTERVAL_STEP.with_label_values(&[exchange]).set(interval.step() as i64);
        }
        interval
    }
}
