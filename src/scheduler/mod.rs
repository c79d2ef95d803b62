use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use crate::config::{JobConfig, SchedulerConfig};
use crate::controls::StopSignal;
use crate::error::Result;
use crate::exchange::ExchangeAdapter;
use crate::interfaces::Storage;
use crate::types::RequestKind;
use crate::utils::TaskSupervisor;

pub mod job;
pub mod state;
pub mod tick;
pub mod validation;

pub use job::{Job, PairCursors, PairFilter};
pub use state::{ExchangeState, ExchangeStates, Health};
pub use tick::TickReport;

/// Drives every job's polling loop against the loaded exchanges.
pub struct Scheduler {
    adapters: HashMap<String, Arc<ExchangeAdapter>>,
    storage: Arc<dyn Storage>,
    states: ExchangeStates,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(adapters: Vec<ExchangeAdapter>, storage: Arc<dyn Storage>, config: SchedulerConfig) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.name().to_string(), Arc::new(a)))
            .collect();

        Scheduler {
            adapters,
            storage,
            states: ExchangeStates::new(config.unhealthy_after),
            config,
        }
    }

    pub fn adapter(&self, exchange: &str) -> Option<&ExchangeAdapter> {
        self.adapters.get(exchange).map(|a| a.as_ref())
    }

    pub fn states(&self) -> &ExchangeStates {
        &self.states
    }

    /// Resolves job configurations against the loaded exchanges.
    pub fn build_jobs(&self, configs: &[JobConfig]) -> Vec<Job> {
        let mut available: Vec<&str> = self.adapters.keys().map(|n| n.as_str()).collect();
        available.sort();

        configs
            .iter()
            .map(|c| Job::from_config(c, &available, &self.config))
            .collect()
    }

    /// Validates `jobs`, then runs each on its own task until `stop` fires or
    /// every one-shot job has finished.
    pub async fn run_until_stopped(self: Arc<Self>, jobs: Vec<Job>, stop: StopSignal) -> Result<()> {
        let jobs = self.validate(jobs).await;
        if jobs.is_empty() {
            warn!("No valid jobs to run");
            return Ok(());
        }

        let mut supervisor = TaskSupervisor::new();
        for job in jobs {
            let scheduler = Arc::clone(&self);
            let stop = stop.clone();
            supervisor.spawn(job.name.clone(), async move {
                scheduler.run_job(job, stop).await;
            });
        }

        supervisor.wait_all().await
    }

    /// Ticks of one job never overlap; the stop signal is checked between ticks.
    pub async fn run_job(&self, mut job: Job, stop: StopSignal) {
        info!(
            "Starting job {} ({}) on {} exchanges",
            job.name,
            job.kind,
            job.exchanges_with_pairs.len()
        );

        while !stop.is_stopped() {
            let started = Instant::now();
            let report = self.run_tick(&mut job).await;

            match job.frequency {
                // The period counts from the start of the tick
                Some(frequency) => {
                    if stop.sleep(frequency.saturating_sub(started.elapsed())).await {
                        break;
                    }
                }
                None => {
                    if job.kind != RequestKind::HistoricRates || !self.keep_backfilling(&mut job, &report) {
                        break;
                    }
                }
            }
        }

        info!("Job {} finished", job.name);
    }

    /// One-shot historic jobs page backwards until no exchange has more to
    /// give. A pair stays only while its cursor keeps moving back; an
    /// exchange coarsened or restored this tick keeps all of its pairs.
    fn keep_backfilling(&self, job: &mut Job, report: &TickReport) -> bool {
        if report.persist_failed {
            return false;
        }

        job.exchanges_with_pairs.retain(|name, pairs| {
            if report.coarsened.contains(name) || report.promoted.contains(name) {
                return true;
            }

            let advanced = report.advanced.get(name);
            pairs.retain(|pair, _| advanced.is_some_and(|moved| moved.contains(pair)));
            if pairs.is_empty() {
                info!("Job {}: {} has no older rows", report.job, name);
            }
            !pairs.is_empty()
        });
        !job.is_empty()
    }
}
