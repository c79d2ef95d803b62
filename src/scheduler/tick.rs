use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn, Instrument};
use crate::observability::metrics::{RECORDS_PERSISTED, TICK_DURATION};
use crate::observability::tracing::{trace_exchange_request, trace_tick};
use crate::scheduler::job::Job;
use crate::scheduler::state::Health;
use crate::scheduler::Scheduler;
use crate::types::{CurrencyPair, Record, RequestKind};

/// What one tick did, per exchange.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub job: String,
    /// Rows formatted per primary exchange that answered.
    pub rows: BTreeMap<String, usize>,
    /// Primary exchanges whose batch failed or timed out.
    pub failed: Vec<String>,
    pub demoted: Vec<String>,
    /// Secondary exchanges that answered their probe.
    pub promoted: Vec<String>,
    pub coarsened: Vec<String>,
    /// Historic pairs whose cursor moved back, per exchange.
    pub advanced: BTreeMap<String, BTreeSet<CurrencyPair>>,
    pub persisted: usize,
    pub persist_failed: bool,
}

enum Outcome {
    Fetched(Vec<Record>),
    Failed,
}

impl Scheduler {
    /// Requests every primary exchange and probes every secondary one
    /// concurrently, then updates exchange state and persists the whole batch
    /// once every call is accounted for.
    pub async fn run_tick(&self, job: &mut Job) -> TickReport {
        let span = trace_tick(&job.name);
        self.tick(job).instrument(span).await
    }

    async fn tick(&self, job: &mut Job) -> TickReport {
        let timer = TICK_DURATION.start_timer();
        let mut report = TickReport {
            job: job.name.clone(),
            ..TickReport::default()
        };

        let (primary, secondary): (Vec<String>, Vec<String>) = job
            .exchanges()
            .cloned()
            .partition(|name| self.states.health(name) == Health::Healthy);

        let probed = secondary.len();

        let view: &Job = job;
        let requests = join_all(primary.iter().map(|name| self.request_exchange(view, name)));
        let probes = join_all(secondary.iter().map(|name| self.probe_exchange(view, name)));
        let (outcomes, probes) = futures::join!(requests, probes);

        let mut batch = Vec::new();
        for (name, outcome) in primary.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Failed => {
                    if self.states.record_failure(&name) {
                        report.demoted.push(name.clone());
                    }
                    report.failed.push(name);
                }
                Outcome::Fetched(records) => {
                    self.states.record_success(&name);
                    if job.kind == RequestKind::HistoricRates && self.adapt_interval(&name, records.len()) {
                        report.coarsened.push(name.clone());
                    }
                    report.rows.insert(name, records.len());
                    batch.extend(records);
                }
            }
        }

        for (name, reachable) in secondary.into_iter().zip(probes) {
            if reachable {
                self.states.mark_healthy(&name);
                report.promoted.push(name);
            }
        }

        if !batch.is_empty() {
            let count = batch.len();
            let historic = (job.kind == RequestKind::HistoricRates).then(|| batch.clone());

            match self.storage.persist(batch).await {
                Ok(()) => {
                    RECORDS_PERSISTED.with_label_values(&[job.name.as_str()]).inc_by(count as u64);
                    report.persisted = count;
                    if let Some(records) = historic {
                        report.advanced = job.advance_cursors(&records);
                    }
                }
                Err(e) => {
                    error!("Persisting {} records for job {} failed: {}", count, job.name, e);
                    report.persist_failed = true;
                }
            }
        }

        timer.observe_duration();
        info!(
            "Job {} tick: {} records from {} exchanges, {} failed, {} probed, {} promoted",
            job.name,
            report.persisted,
            report.rows.len(),
            report.failed.len(),
            probed,
            report.promoted.len()
        );
        report
    }

    async fn request_exchange(&self, job: &Job, name: &str) -> Outcome {
        let Some(adapter) = self.adapters.get(name) else {
            warn!("Job {} references unknown exchange {}", job.name, name);
            return Outcome::Failed;
        };

        let targets = job.targets(name);
        let interval = self.states.interval(name);
        let request = adapter
            .request(job.kind, &targets, interval)
            .instrument(trace_exchange_request(name, job.kind));

        let bundle = match tokio::time::timeout(job.timeout, request).await {
            Err(_) => {
                warn!("{} request to {} timed out after {:?}", job.kind, name, job.timeout);
                return Outcome::Failed;
            }
            Ok(Err(e)) => {
                warn!("{} request to {} failed: {}", job.kind, name, e);
                return Outcome::Failed;
            }
            Ok(Ok(bundle)) => bundle,
        };

        if bundle.is_failure() {
            return Outcome::Failed;
        }

        match adapter.format(&bundle, &job.requested(name)) {
            Ok(records) => Outcome::Fetched(records),
            Err(e) => {
                warn!("Cannot format {} from {}: {}", job.kind, name, e);
                Outcome::Failed
            }
        }
    }

    async fn probe_exchange(&self, job: &Job, name: &str) -> bool {
        let Some(adapter) = self.adapters.get(name) else {
            return false;
        };

        let sample = job.requested(name).into_iter().next();
        match tokio::time::timeout(job.timeout, adapter.test_connection(sample.as_ref())).await {
            Ok((_, reachable)) => reachable,
            Err(_) => false,
        }
    }

    /// Coarsens the exchange when it returned fewer rows than it should.
    /// A full page never coarsens. Returns whether the interval moved.
    fn adapt_interval(&self, name: &str, rows: usize) -> bool {
        let Some(adapter) = self.adapter(name) else {
            return false;
        };
        let limits = adapter.row_limits();

        if limits.max_rows.is_some_and(|max| rows >= max) {
            return false;
        }

        let min_rows = match limits.min_rows {
            0 => self.config.min_rows,
            n => n,
        }
        .max(1);
        if rows >= min_rows {
            return false;
        }

        let before = self.states.interval(name);
        self.states.coarsen(name) != before
    }
}
