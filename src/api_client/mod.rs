// src/api_client/mod.rs

mod token;

pub use token::TokenManager;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, ReportDefinition};
use crate::error::ApiError;
use crate::models::ReportStatus;

// --- Reporting API contract ---

/// The three calls the pipeline makes against the reporting service.
#[async_trait]
pub trait ReportsApi: Send + Sync {
    /// Asks upstream to build `report` for `report_date`; returns the report id.
    async fn create_report(
        &self,
        report: &ReportDefinition,
        report_date: NaiveDate,
    ) -> Result<String, ApiError>;

    async fn get_status(&self, report_id: &str) -> Result<ReportStatus, ApiError>;

    /// Raw (gzip-compressed) report body.
    async fn download(&self, report_id: &str) -> Result<Vec<u8>, ApiError>;
}

#[derive(Debug, Serialize)]
struct CreateReportBody {
    metrics: String,
    #[serde(rename = "reportDate")]
    report_date: String,
}

#[derive(Debug, Deserialize)]
struct CreateReportResponse {
    #[serde(rename = "reportId")]
    report_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

// --- HTTP implementation ---

pub struct AdvertisingClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    profile_id: String,
    tokens: TokenManager,
}

impl AdvertisingClient {
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .build()?;
        let tokens = TokenManager::new(
            http.clone(),
            &config.api.token_url,
            config.credentials.clone(),
            &config.api.token_path,
            config.api.token_safety_margin_secs,
        );
        Ok(Self::new(
            http,
            &config.api.base_url,
            &config.credentials.client_id,
            &config.credentials.profile_id,
            tokens,
        ))
    }

    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        profile_id: impl Into<String>,
        tokens: TokenManager,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            profile_id: profile_id.into(),
            tokens,
        }
    }

    /// Resolves a valid token, then builds a request carrying it and the
    /// profile headers.
    async fn signed(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!("Signed {} {}", method, url);
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("Amazon-Advertising-API-ClientId", &self.client_id)
            .header("Amazon-Advertising-API-Scope", &self.profile_id)
            .header(CONTENT_TYPE, "application/json"))
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Upstream returned {}: {}", status, body);
        Err(ApiError::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("{e}: {body}")))
    }
}

#[async_trait]
impl ReportsApi for AdvertisingClient {
    async fn create_report(
        &self,
        report: &ReportDefinition,
        report_date: NaiveDate,
    ) -> Result<String, ApiError> {
        let body = CreateReportBody {
            metrics: report.metrics.join(","),
            report_date: report_date.format("%Y%m%d").to_string(),
        };
        let request = self.signed(Method::POST, &report.endpoint).await?.json(&body);
        let created: CreateReportResponse = Self::read_json(Self::send(request).await?).await?;
        Ok(created.report_id)
    }

    async fn get_status(&self, report_id: &str) -> Result<ReportStatus, ApiError> {
        let request = self
            .signed(Method::GET, &format!("/v2/reports/{report_id}"))
            .await?;
        let status: StatusResponse = Self::read_json(Self::send(request).await?).await?;
        ReportStatus::parse(&status.status).ok_or_else(|| {
            ApiError::InvalidResponse(format!("unknown report status {:?}", status.status))
        })
    }

    async fn download(&self, report_id: &str) -> Result<Vec<u8>, ApiError> {
        let request = self
            .signed(Method::GET, &format!("/v2/reports/{report_id}/download"))
            .await?;
        // Body is gzip regardless of the declared content type; keep it raw.
        let bytes = Self::send(request).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
