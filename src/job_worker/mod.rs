// src/job_worker/mod.rs
//
// The three pipeline stages. They never call each other; every hand-off
// goes through the queues, so any stage can be restarted or run on several
// machines at once.

mod downloader;
mod poller;
mod requester;

pub use downloader::{DownloadStats, ReportDownloader};
pub use poller::StatusPoller;
pub use requester::ReportRequester;

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;

use crate::error::DecodeError;
use crate::models::ReportRow;

/// Gunzips a downloaded report and parses it as a JSON array of rows.
pub fn decompress_report(raw: &[u8]) -> Result<Vec<ReportRow>, DecodeError> {
    let mut decoder = GzDecoder::new(raw);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;

    match serde_json::from_slice::<Value>(&json)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(row) => Ok(row),
                other => Err(DecodeError::Shape(format!(
                    "row {i} is not an object: {other}"
                ))),
            })
            .collect(),
        other => Err(DecodeError::Shape(format!(
            "expected an array of rows, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Adds the partition key to every row.
pub fn stamp_report_date(rows: &mut [ReportRow], report_date: NaiveDate) {
    let date = Value::String(report_date.format("%Y-%m-%d").to_string());
    for row in rows {
        row.insert("report_date".to_string(), date.clone());
    }
}
