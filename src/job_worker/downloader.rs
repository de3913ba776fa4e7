// src/job_worker/downloader.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{decompress_report, stamp_report_date};
use crate::api_client::ReportsApi;
use crate::db::{PartitionWrite, ReportSink};
use crate::error::{PipelineResult, QueueError};
use crate::models::JobDescriptor;
use crate::queue::{JobQueues, QueueName};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub loaded: usize,
    pub rows: u64,
    pub requeued: usize,
    pub unroutable: usize,
    pub malformed: usize,
}

/// Drains the ready queue into the sink, one report at a time.
pub struct ReportDownloader {
    api: Arc<dyn ReportsApi>,
    queues: JobQueues,
    sink: Arc<dyn ReportSink>,
    // record type -> table
    tables: BTreeMap<String, String>,
    idle_wait: Option<Duration>,
}

impl ReportDownloader {
    pub fn new(
        api: Arc<dyn ReportsApi>,
        queues: JobQueues,
        sink: Arc<dyn ReportSink>,
        tables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            api,
            queues,
            sink,
            tables,
            idle_wait: None,
        }
    }

    /// With a wait set, an empty ready queue is watched (blocking pop) for
    /// that long before the run ends. A zero wait is the same as none.
    pub fn with_idle_wait(mut self, idle_wait: Option<Duration>) -> Self {
        self.idle_wait = idle_wait.filter(|wait| !wait.is_zero());
        self
    }

    pub async fn run(&self) -> PipelineResult<DownloadStats> {
        let mut stats = DownloadStats::default();

        loop {
            let popped = match self.idle_wait {
                Some(timeout) => self.queues.pop_wait(QueueName::Ready, timeout).await,
                None => self.queues.pop(QueueName::Ready).await,
            };
            let job = match popped {
                Ok(Some(job)) => job,
                Ok(None) => {
                    info!("{} is empty. Exit", self.queues.key(QueueName::Ready));
                    break;
                }
                Err(QueueError::Descriptor(_)) => {
                    stats.malformed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(table) = self.tables.get(&job.record_type) else {
                // no retry can fix a missing table mapping
                warn!(
                    "No table configured for record type {:?}; report {} pushed to {}",
                    job.record_type,
                    job.report_id,
                    QueueName::Failure
                );
                self.queues.push(QueueName::Failure, &job).await?;
                stats.unroutable += 1;
                continue;
            };

            match self.load(&job, table).await {
                Ok(write) => {
                    info!(
                        "Report {} loaded into {} for {}: {} row(s) written, {} removed",
                        job.report_id, table, job.report_date, write.inserted, write.deleted
                    );
                    stats.loaded += 1;
                    stats.rows += write.inserted;
                }
                Err(e) => {
                    self.queues.push(QueueName::Requested, &job).await?;
                    error!(
                        "Loading report {} failed: {}. Pushed back to {}",
                        job.report_id,
                        e,
                        QueueName::Requested
                    );
                    stats.requeued += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn load(&self, job: &JobDescriptor, table: &str) -> PipelineResult<PartitionWrite> {
        let raw = self.api.download(&job.report_id).await?;
        let mut rows = decompress_report(&raw)?;
        stamp_report_date(&mut rows, job.report_date);
        Ok(self.sink.replace_partition(table, job.report_date, &rows).await?)
    }
}
