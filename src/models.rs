// src/models.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// --- Upstream report status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    InProgress,
    Success,
    Failure,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::InProgress => "IN_PROGRESS",
            ReportStatus::Success => "SUCCESS",
            ReportStatus::Failure => "FAILURE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(ReportStatus::InProgress),
            "SUCCESS" => Some(ReportStatus::Success),
            "FAILURE" => Some(ReportStatus::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Queue payload ---

/// One report job as it travels between the queues.
///
/// Field names on the wire match what earlier producers already wrote into
/// the lists, so a consumer can resume from any existing queue content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(rename = "reportId")]
    pub report_id: String,
    pub report_date: NaiveDate,
    #[serde(rename = "recordType")]
    pub record_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
}

impl JobDescriptor {
    pub fn requested(report_id: impl Into<String>, report_date: NaiveDate, record_type: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            report_date,
            record_type: record_type.into(),
            status: Some(ReportStatus::InProgress),
        }
    }

    // Status is the only field that changes after the first enqueue.
    pub fn with_status(&self, status: ReportStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One row of a downloaded report, keyed by column name.
pub type ReportRow = serde_json::Map<String, serde_json::Value>;

// --- Credentials ---

/// Cached bearer token for the reporting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Unix seconds at which the token was received.
    pub issued_at: i64,
    /// Lifetime in seconds as advertised by the token endpoint.
    pub expires_in: i64,
}

impl Token {
    /// A token is reused while `now - issued_at` stays below
    /// `expires_in - safety_margin`.
    pub fn is_fresh(&self, now: i64, safety_margin: i64) -> bool {
        now - self.issued_at < self.expires_in - safety_margin
    }
}
