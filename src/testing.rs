// src/testing.rs
//
// In-memory stand-ins for Redis, PostgreSQL and the reporting API.

use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::{write::GzEncoder, Compression};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api_client::ReportsApi;
use crate::config::ReportDefinition;
use crate::db::{PartitionWrite, ReportSink};
use crate::error::{ApiError, QueueError, SinkError};
use crate::models::{ReportRow, ReportStatus};
use crate::queue::QueueStore;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// --- Queue ---

#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    blocking_calls: AtomicUsize,
    move_calls: AtomicUsize,
}

impl MemoryQueue {
    /// Number of BLPOP-style calls seen so far.
    pub fn blocking_calls(&self) -> usize {
        self.blocking_calls.load(Ordering::SeqCst)
    }

    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    pub fn items(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .unwrap()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn pop_left(&self, key: &str) -> Result<Option<String>, QueueError> {
        Ok(self.lists.lock().unwrap().get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn blocking_pop_left(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        // BLPOP with 0 blocks forever; nothing should ever ask for that
        assert!(!timeout.is_zero(), "blocking pop on {key} without a timeout");
        self.blocking_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_left(key).await
    }

    async fn move_head(&self, from: &str, to: &str) -> Result<Option<String>, QueueError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().unwrap();
        let moved = lists.get_mut(from).and_then(VecDeque::pop_front);
        if let Some(value) = &moved {
            lists.entry(to.to_string()).or_default().push_back(value.clone());
        }
        Ok(moved)
    }

    async fn push_right(&self, key: &str, value: &str) -> Result<(), QueueError> {
        self.lists
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        Ok(self.lists.lock().unwrap().get(key).map_or(0, VecDeque::len))
    }

    async fn range(&self, key: &str) -> Result<Vec<String>, QueueError> {
        Ok(self.items(key))
    }
}

// --- Sink ---

/// Table store whose replace runs on a staged copy, committed only when the
/// insert half succeeds.
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Vec<ReportRow>>>,
    fail_inserts: AtomicBool,
}

impl MemorySink {
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<ReportRow> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn replace_partition(
        &self,
        table: &str,
        report_date: NaiveDate,
        rows: &[ReportRow],
    ) -> Result<PartitionWrite, SinkError> {
        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.get(table).cloned().unwrap_or_default();
        let date = report_date.to_string();

        let before = staged.len();
        staged.retain(|row| row.get("report_date").and_then(|v| v.as_str()) != Some(date.as_str()));
        let deleted = (before - staged.len()) as u64;

        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(SinkError::Database(sqlx::Error::Protocol(
                "insert failed".to_string(),
            )));
        }
        staged.extend(rows.iter().cloned());
        tables.insert(table.to_string(), staged);

        Ok(PartitionWrite {
            deleted,
            inserted: rows.len() as u64,
        })
    }
}

// --- Reporting API ---

/// Reporting API double answering from fixed maps; ids without an entry
/// produce an upstream 500.
#[derive(Default)]
pub struct ScriptedApi {
    pub created: Mutex<Vec<(String, NaiveDate)>>,
    pub failing_dates: Mutex<Vec<NaiveDate>>,
    pub statuses: Mutex<HashMap<String, ReportStatus>>,
    pub payloads: Mutex<HashMap<String, Vec<u8>>>,
}

impl ScriptedApi {
    pub fn with_status(self, report_id: &str, status: ReportStatus) -> Self {
        self.statuses.lock().unwrap().insert(report_id.to_string(), status);
        self
    }

    pub fn with_payload(self, report_id: &str, payload: Vec<u8>) -> Self {
        self.payloads.lock().unwrap().insert(report_id.to_string(), payload);
        self
    }

    pub fn failing_on(self, date: NaiveDate) -> Self {
        self.failing_dates.lock().unwrap().push(date);
        self
    }

    fn server_error() -> ApiError {
        ApiError::Upstream {
            status: 500,
            body: "internal error".to_string(),
        }
    }
}

#[async_trait]
impl ReportsApi for ScriptedApi {
    async fn create_report(
        &self,
        report: &ReportDefinition,
        report_date: NaiveDate,
    ) -> Result<String, ApiError> {
        if self.failing_dates.lock().unwrap().contains(&report_date) {
            return Err(Self::server_error());
        }
        self.created
            .lock()
            .unwrap()
            .push((report.endpoint.clone(), report_date));
        Ok(format!("R-{}", report_date.format("%Y%m%d")))
    }

    async fn get_status(&self, report_id: &str) -> Result<ReportStatus, ApiError> {
        self.statuses
            .lock()
            .unwrap()
            .get(report_id)
            .copied()
            .ok_or_else(Self::server_error)
    }

    async fn download(&self, report_id: &str) -> Result<Vec<u8>, ApiError> {
        self.payloads
            .lock()
            .unwrap()
            .get(report_id)
            .cloned()
            .ok_or_else(Self::server_error)
    }
}
