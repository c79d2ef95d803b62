use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, info, warn};
use crate::error::Result;
use crate::exchange::ExchangeAdapter;
use crate::scheduler::job::{Job, PairCursors};
use crate::scheduler::Scheduler;
use crate::types::{Interval, RequestKind};

impl Scheduler {
    /// Runs once before the first tick. Drops exchanges lacking the job's
    /// request kind or any matching pair, fills in the pairs and resume
    /// cursors, and drops jobs left without exchanges.
    pub async fn validate(&self, jobs: Vec<Job>) -> Vec<Job> {
        let mut refreshed = HashSet::new();
        let mut valid = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            self.validate_job(&mut job, &mut refreshed).await;

            if job.is_empty() {
                warn!("Dropping job {}: no exchange offers {} for its pairs", job.name, job.kind);
                continue;
            }
            info!("Job {} validated with {} exchanges", job.name, job.exchanges_with_pairs.len());
            valid.push(job);
        }
        valid
    }

    async fn validate_job(&self, job: &mut Job, refreshed: &mut HashSet<String>) {
        let names: Vec<String> = job.exchanges().cloned().collect();

        for name in names {
            let Some(adapter) = self.adapter(&name) else {
                warn!("Job {}: exchange {} is not loaded", job.name, name);
                job.exchanges_with_pairs.remove(&name);
                continue;
            };
            if !adapter.supports(job.kind) {
                info!("{} has no {} request and was removed from job {}", name, job.kind, job.name);
                job.exchanges_with_pairs.remove(&name);
                continue;
            }

            self.states.register(&name, job.interval);

            // The pair list request itself needs no pairs
            if job.kind == RequestKind::CurrencyPairs {
                continue;
            }

            match self.resolve_pairs(adapter, job, refreshed).await {
                Ok(pairs) if !pairs.is_empty() => {
                    job.exchanges_with_pairs.insert(name, pairs);
                }
                Ok(_) => {
                    info!("{} has no matching currency pairs for job {}", name, job.name);
                    job.exchanges_with_pairs.remove(&name);
                }
                Err(e) => {
                    error!("Cannot resolve pairs of {} for job {}: {}", name, job.name, e);
                    job.exchanges_with_pairs.remove(&name);
                }
            }
        }
    }

    async fn resolve_pairs(
        &self,
        adapter: &ExchangeAdapter,
        job: &Job,
        refreshed: &mut HashSet<String>,
    ) -> Result<PairCursors> {
        let name = adapter.name();
        let mut known = self.storage.known_pairs(name).await?;

        if (job.update_currency_pairs || known.is_empty()) && refreshed.insert(name.to_string()) {
            match self.refresh_currency_pairs(adapter).await {
                Ok(count) => {
                    info!("Stored {} currency pairs for {}", count, name);
                    known = self.storage.known_pairs(name).await?;
                }
                Err(e) => warn!("Updating currency pairs of {} failed: {}", name, e),
            }
        }

        let mut pairs = PairCursors::new();
        for pair in known.into_iter().filter(|p| job.filter.matches(p)) {
            let cursor = if job.kind == RequestKind::HistoricRates {
                self.storage.first_timestamp(name, &pair).await?
            } else {
                None
            };
            pairs.insert(pair, cursor);
        }
        Ok(pairs)
    }

    /// Requests the exchange's pair list and hands it to storage. Returns the
    /// number of pairs stored.
    pub async fn refresh_currency_pairs(&self, adapter: &ExchangeAdapter) -> Result<usize> {
        if !adapter.supports(RequestKind::CurrencyPairs) {
            debug!("{} cannot list its currency pairs", adapter.name());
            return Ok(0);
        }

        let bundle = adapter
            .request(RequestKind::CurrencyPairs, &[], Interval::default())
            .await?;
        let records = adapter.format(&bundle, &BTreeSet::new())?;
        let count = records.len();
        if count > 0 {
            self.storage.persist(records).await?;
        }
        Ok(count)
    }
}
