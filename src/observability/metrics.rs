use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Exchange metrics
    pub static ref EXCHANGE_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("exchange_requests_total", "HTTP calls to exchanges by outcome"),
        &["exchange", "outcome"]
    ).unwrap();

    pub static ref EXCHANGE_HEALTHY: IntGaugeVec = IntGaugeVec::new(
        Opts::new("exchange_healthy", "1 while the exchange is polled as primary"),
        &["exchange"]
    ).unwrap();

    pub static ref EXCHANGE_INTERVAL_STEP: IntGaugeVec = IntGaugeVec::new(
        Opts::new("exchange_interval_step", "Historic-rate interval step (0 = seconds)"),
        &["exchange"]
    ).unwrap();

    // Record metrics
    pub static ref RECORDS_PERSISTED: IntCounterVec = IntCounterVec::new(
        Opts::new("records_persisted_total", "Records handed to storage"),
        &["job"]
    ).unwrap();

    pub static ref RECORDS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("records_dropped_total", "Rows dropped after a failed conversion"),
        &["exchange", "kind"]
    ).unwrap();

    // Latency metrics
    pub static ref TICK_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tick_duration_seconds",
            "Wall time of one scheduler tick"
        ).buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).unwrap();
}

pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EXCHANGE_REQUESTS.clone()),
        Box::new(EXCHANGE_HEALTHY.clone()),
        Box::new(EXCHANGE_INTERVAL_STEP.clone()),
        Box::new(RECORDS_PERSISTED.clone()),
        Box::new(RECORDS_DROPPED.clone()),
        Box::new(TICK_DURATION.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::debug!("Metric already registered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_is_harmless() {
        register_metrics();
        register_metrics();
        EXCHANGE_REQUESTS.with_label_values(&["bitstamp", "ok"]).inc();
        assert!(REGISTRY
            .gather()
            .iter()
            .any(|family| family.get_name() == "exchange_requests_total"));
    }
}
