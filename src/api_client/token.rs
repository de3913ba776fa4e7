// src/api_client/token.rs

use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::ApiError;
use crate::models::Token;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Hands out a valid bearer token, refreshing it through the
/// refresh-token grant when the cached one is about to expire.
///
/// The token is persisted to `path` so that every stage process shares it.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    path: PathBuf,
    safety_margin: i64,
    // Held across the refresh so concurrent callers wait for one exchange.
    cached: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        credentials: Credentials,
        path: impl Into<PathBuf>,
        safety_margin: i64,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            path: path.into(),
            safety_margin,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, ApiError> {
        self.access_token_at(chrono::Utc::now().timestamp()).await
    }

    pub(crate) async fn access_token_at(&self, now: i64) -> Result<String, ApiError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now, self.safety_margin)) {
            return Ok(token.access_token.clone());
        }

        // Another process may have refreshed the shared file already.
        if let Some(token) = self.load().await {
            if token.is_fresh(now, self.safety_margin) {
                debug!("Using token from {}", self.path.display());
                let access = token.access_token.clone();
                *cached = Some(token);
                return Ok(access);
            }
            info!("Token has expired.");
        } else {
            info!("Local token missing.");
        }

        let token = self.request_token(now).await?;
        self.save(&token).await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    async fn request_token(&self, now: i64) -> Result<Token, ApiError> {
        info!("Requesting a new token.");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Auth(format!("failed to read token response: {e}")))?;
        if !status.is_success() {
            return Err(ApiError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Auth(format!("malformed token response: {e}")))?;
        Ok(Token {
            access_token: parsed.access_token,
            issued_at: now,
            expires_in: parsed.expires_in,
        })
    }

    async fn load(&self) -> Option<Token> {
        let raw = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Ignoring unreadable token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    async fn save(&self, token: &Token) -> Result<(), ApiError> {
        let raw = serde_json::to_vec(token)
            .map_err(|e| ApiError::Auth(format!("failed to encode token: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        let failed = |e: std::io::Error| {
            ApiError::Auth(format!("failed to persist token to {}: {e}", self.path.display()))
        };
        tokio::fs::write(&tmp, raw).await.map_err(failed)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(failed)?;
        info!("Token has been saved to {}.", self.path.display());
        Ok(())
    }
}
