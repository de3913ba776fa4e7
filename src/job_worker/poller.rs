// src/job_worker/poller.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::api_client::ReportsApi;
use crate::error::{PipelineResult, QueueError};
use crate::models::ReportStatus;
use crate::queue::{JobQueues, QueueName};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub ready: usize,
    pub pending: usize,
    pub failed: usize,
    pub errors: usize,
    pub malformed: usize,
}

impl PassStats {
    pub fn processed(&self) -> usize {
        self.ready + self.pending + self.failed + self.errors + self.malformed
    }

    fn merge(&mut self, other: PassStats) {
        self.ready += other.ready;
        self.pending += other.pending;
        self.failed += other.failed;
        self.errors += other.errors;
        self.malformed += other.malformed;
    }
}

/// Where a descriptor goes once upstream has reported `status`.
pub fn route(status: ReportStatus) -> QueueName {
    match status {
        ReportStatus::Success => QueueName::Ready,
        ReportStatus::InProgress => QueueName::Requested,
        ReportStatus::Failure => QueueName::Failure,
    }
}

/// Checks requested reports upstream and moves each one to the queue that
/// matches its status.
pub struct StatusPoller {
    api: Arc<dyn ReportsApi>,
    queues: JobQueues,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn ReportsApi>, queues: JobQueues) -> Self {
        Self { api, queues }
    }

    /// Runs up to `passes` passes, sleeping `delay` in between, and stops
    /// early once the requested queue is empty.
    pub async fn run(&self, passes: u32, delay: Duration) -> PipelineResult<PassStats> {
        let passes = passes.max(1);
        let mut total = PassStats::default();
        for pass in 1..=passes {
            let stats = self.run_pass().await?;
            info!("Pass {} done: {:?}", pass, stats);
            total.merge(stats);

            if pass == passes || self.queues.len(QueueName::Requested).await? == 0 {
                break;
            }
            sleep(delay).await;
        }
        Ok(total)
    }

    /// Pops at most as many descriptors as were queued when the pass began,
    /// so jobs pushed back during the pass wait for the next one.
    pub async fn run_pass(&self) -> PipelineResult<PassStats> {
        let budget = self.queues.len(QueueName::Requested).await?;
        let mut stats = PassStats::default();

        for _ in 0..budget {
            let job = match self.queues.pop(QueueName::Requested).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    info!("{} is empty. Exit", self.queues.key(QueueName::Requested));
                    break;
                }
                Err(QueueError::Descriptor(_)) => {
                    stats.malformed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.api.get_status(&job.report_id).await {
                Ok(status) => {
                    let target = route(status);
                    self.queues.push(target, &job.with_status(status)).await?;
                    info!(
                        "Report {} has status {}; pushed to {}",
                        job.report_id, status, target
                    );
                    match status {
                        ReportStatus::Success => stats.ready += 1,
                        ReportStatus::InProgress => stats.pending += 1,
                        ReportStatus::Failure => {
                            warn!("Report {} ({}) failed upstream", job.report_id, job.report_date);
                            stats.failed += 1
                        }
                    }
                }
                Err(e) => {
                    // put it back first so the job is never lost
                    self.queues.push(QueueName::Requested, &job).await?;
                    error!(
                        "Status check for {} failed: {}. Pushed back to {}",
                        job.report_id,
                        e,
                        QueueName::Requested
                    );
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobDescriptor;
    use crate::queue::QueueStore;
    use crate::testing::{MemoryQueue, ScriptedApi};
    use chrono::NaiveDate;

    fn job(id: &str) -> JobDescriptor {
        JobDescriptor::requested(id, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "targets")
    }

    async fn setup(api: ScriptedApi, jobs: &[&str]) -> (Arc<MemoryQueue>, StatusPoller) {
        let store = Arc::new(MemoryQueue::default());
        let queues = JobQueues::new(store.clone(), "targets");
        for id in jobs {
            queues.push(QueueName::Requested, &job(id)).await.unwrap();
        }
        (store, StatusPoller::new(Arc::new(api), queues))
    }

    fn ids(store: &MemoryQueue, key: &str) -> Vec<(String, Option<ReportStatus>)> {
        store
            .items(key)
            .iter()
            .map(|raw| {
                let job = JobDescriptor::from_json(raw).unwrap();
                (job.report_id, job.status)
            })
            .collect()
    }

    #[test]
    fn routes_by_status() {
        assert_eq!(route(ReportStatus::Success), QueueName::Ready);
        assert_eq!(route(ReportStatus::InProgress), QueueName::Requested);
        assert_eq!(route(ReportStatus::Failure), QueueName::Failure);
    }

    #[tokio::test]
    async fn empty_queue_terminates_cleanly() {
        let (store, poller) = setup(ScriptedApi::default(), &[]).await;

        let stats = poller.run(3, Duration::ZERO).await.unwrap();

        assert_eq!(stats, PassStats::default());
        for key in ["targets:requested", "targets:ready", "targets:failure"] {
            assert!(store.items(key).is_empty());
        }
    }

    #[tokio::test]
    async fn moves_each_job_by_status() {
        let api = ScriptedApi::default()
            .with_status("R1", ReportStatus::Success)
            .with_status("R2", ReportStatus::InProgress)
            .with_status("R3", ReportStatus::Failure);
        let (store, poller) = setup(api, &["R1", "R2", "R3"]).await;

        let stats = poller.run_pass().await.unwrap();

        assert_eq!((stats.ready, stats.pending, stats.failed), (1, 1, 1));
        assert_eq!(ids(&store, "targets:ready"), vec![("R1".into(), Some(ReportStatus::Success))]);
        assert_eq!(ids(&store, "targets:requested"), vec![("R2".into(), Some(ReportStatus::InProgress))]);
        assert_eq!(ids(&store, "targets:failure"), vec![("R3".into(), Some(ReportStatus::Failure))]);
    }

    #[tokio::test]
    async fn status_error_requeues_the_job() {
        // no scripted status for R9: upstream answers 500
        let (store, poller) = setup(ScriptedApi::default(), &["R9"]).await;

        let stats = poller.run_pass().await.unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(ids(&store, "targets:requested"), vec![("R9".into(), Some(ReportStatus::InProgress))]);
        assert!(store.items("targets:ready").is_empty());
        assert!(store.items("targets:failure").is_empty());
    }

    #[tokio::test]
    async fn pass_is_bounded_by_initial_length() {
        let api = ScriptedApi::default().with_status("R2", ReportStatus::InProgress);
        let (store, poller) = setup(api, &["R2"]).await;

        let stats = poller.run(2, Duration::ZERO).await.unwrap();

        // one check per pass, the job keeps cycling
        assert_eq!(stats.pending, 2);
        assert_eq!(store.items("targets:requested").len(), 1);
    }

    #[tokio::test]
    async fn malformed_entry_goes_to_failure() {
        let (store, poller) = setup(ScriptedApi::default(), &[]).await;
        store.push_right("targets:requested", "{not json").await.unwrap();

        let stats = poller.run_pass().await.unwrap();

        assert_eq!(stats.malformed, 1);
        assert_eq!(store.items("targets:failure"), vec!["{not json".to_string()]);
    }
}
