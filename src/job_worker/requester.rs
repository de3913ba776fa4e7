// src/job_worker/requester.rs

use chrono::{Days, NaiveDate, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::api_client::ReportsApi;
use crate::config::ReportDefinition;
use crate::error::{ConfigError, PipelineError, PipelineResult, RequestFailure};
use crate::models::JobDescriptor;
use crate::queue::{JobQueues, QueueName};

/// Asks upstream for one report per (record type, day) and parks each
/// returned id on the requested queue.
pub struct ReportRequester {
    api: Arc<dyn ReportsApi>,
    queues: JobQueues,
    reports: BTreeMap<String, ReportDefinition>,
}

impl ReportRequester {
    pub fn new(
        api: Arc<dyn ReportsApi>,
        queues: JobQueues,
        reports: BTreeMap<String, ReportDefinition>,
    ) -> Self {
        Self {
            api,
            queues,
            reports,
        }
    }

    pub async fn run(&self, period: u32, record_types: &[String]) -> PipelineResult<Vec<JobDescriptor>> {
        self.run_for(Utc::now().date_naive(), period, record_types).await
    }

    /// All requests run concurrently on the current task. The batch fails if
    /// any single request fails; every failure is reported with its date.
    pub async fn run_for(
        &self,
        today: NaiveDate,
        period: u32,
        record_types: &[String],
    ) -> PipelineResult<Vec<JobDescriptor>> {
        let selected = self.select(record_types)?;
        let dates = report_dates(today, period);
        info!(
            "Requesting {} report type(s) for {} day(s) before {}",
            selected.len(),
            dates.len(),
            today
        );

        let requests = selected.iter().flat_map(|(record_type, report)| {
            dates
                .iter()
                .map(move |date| self.request_one(record_type, report, *date))
        });
        let results = join_all(requests).await;

        let mut queued = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(job) => queued.push(job),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            info!("Queued {} report request(s)", queued.len());
            Ok(queued)
        } else {
            Err(PipelineError::RequestBatch { failures })
        }
    }

    async fn request_one(
        &self,
        record_type: &str,
        report: &ReportDefinition,
        report_date: NaiveDate,
    ) -> Result<JobDescriptor, RequestFailure> {
        let failure = |reason: String| {
            error!("Request for {} {} failed: {}", record_type, report_date, reason);
            RequestFailure {
                record_type: record_type.to_string(),
                report_date,
                reason,
            }
        };

        let report_id = self
            .api
            .create_report(report, report_date)
            .await
            .map_err(|e| failure(e.to_string()))?;

        let job = JobDescriptor::requested(report_id, report_date, record_type);
        self.queues
            .push(QueueName::Requested, &job)
            .await
            .map_err(|e| failure(e.to_string()))?;

        info!(
            "Report {} ({} {}) pushed to {}",
            job.report_id,
            record_type,
            report_date,
            QueueName::Requested
        );
        Ok(job)
    }

    fn select(&self, record_types: &[String]) -> Result<Vec<(&str, &ReportDefinition)>, ConfigError> {
        if record_types.is_empty() {
            return Ok(self.reports.iter().map(|(k, v)| (k.as_str(), v)).collect());
        }
        record_types
            .iter()
            .map(|name| {
                self.reports
                    .get_key_value(name)
                    .map(|(k, v)| (k.as_str(), v))
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown report type {name}")))
            })
            .collect()
    }
}

/// The `period` days before `today`, oldest first. Today is never included.
pub fn report_dates(today: NaiveDate, period: u32) -> Vec<NaiveDate> {
    (1..=u64::from(period))
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .collect()
}
