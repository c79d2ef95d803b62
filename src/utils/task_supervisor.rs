use tokio::task::JoinHandle;
use std::collections::HashMap;
use crate::error::{Error, Result};
use tracing::{info, error, warn};

/// Task Supervisor - Owns the per-job polling tasks
///
/// ## Usage
/// ```rust,ignore
/// let mut supervisor = TaskSupervisor::new();
///
/// supervisor.spawn("tickers", async move {
///     // job loop
/// });
///
/// // Block until every job loop has returned
/// supervisor.wait_all().await?;
/// ```
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    /// Spawn a task and register it under `name`
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!("Spawned job task: {}", name);
        if let Some(previous) = self.tasks.insert(name.clone(), handle) {
            warn!("Replacing running task {}", name);
            previous.abort();
        }
        self
    }

    /// Get count of registered tasks
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every task to return. Panicked tasks are reported once all
    /// others have finished.
    pub async fn wait_all(&mut self) -> Result<()> {
        let mut failed = Vec::new();

        for (name, handle) in self.tasks.drain() {
            match handle.await {
                Ok(()) => info!("Task {} completed", name),
                Err(e) => {
                    error!("Task {} failed: {:?}", name, e);
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort();
            Err(Error::TaskFailed(failed))
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_all_reports_panicked_tasks() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.spawn("ok", async {});
        supervisor.spawn("boom", async { panic!("job failed") });
        assert_eq!(supervisor.active_task_count(), 2);

        let err = supervisor.wait_all().await.unwrap_err();
        assert!(matches!(&err, Error::TaskFailed(names) if names == &vec!["boom".to_string()]), "got {:?}", err);
        assert_eq!(supervisor.active_task_count(), 0);
    }
}
