//! Authenticated HTTP conversation with the ad server.
//!
//! Every request carries the `X-Screen-Id` / `X-Screen-Passkey` headers and
//! a bounded timeout. Transport failures are retried with linear backoff;
//! HTTP statuses outside the accept set are returned on the first response.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{AdManifest, AgentError, Credentials, Result, ScreenIdentity};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HEADER_SCREEN_ID: &str = "X-Screen-Id";
const HEADER_PASSKEY: &str = "X-Screen-Passkey";

/// Linear retry schedule shared by the client, the loops, and the
/// downloader: `base_delay × attempt` before retry `attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(crate::DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest {
    status: &'static str,
    timestamp: String,
}

pub struct ServerClient {
    base_url: String,
    credentials: Credentials,
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl ServerClient {
    pub fn new(base_url: &str, credentials: Credentials, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            http,
            policy,
        })
    }

    pub fn screen_id(&self) -> &str {
        &self.credentials.screen_id
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1/screens/{}/{}",
            self.base_url, self.credentials.screen_id, suffix
        )
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(HEADER_SCREEN_ID, &self.credentials.screen_id)
            .header(HEADER_PASSKEY, self.credentials.passkey.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Send a request, retrying transport failures only. The builder
    /// closure runs once per attempt.
    async fn execute<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err: Option<reqwest::Error> = None;

        for attempt in 0..=self.policy.attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                debug!(attempt, ?delay, "retrying request after transport failure");
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "request transport failure");
                    last_err = Some(e);
                }
            }
        }

        Err(AgentError::Transport(
            last_err.unwrap_or_else(|| unreachable!("at least one attempt runs")),
        ))
    }

    /// Map a non-success status to the error taxonomy.
    async fn status_error(response: reqwest::Response) -> AgentError {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::AuthInvalid,
            StatusCode::NOT_FOUND => AgentError::ScreenUnknown,
            _ => AgentError::Server {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            },
        }
    }

    /// `POST /connect`: authenticate and receive the screen's identity.
    pub async fn connect(&self) -> Result<ScreenIdentity> {
        let url = self.endpoint("connect");
        let response = self.execute(|| self.authed(self.http.post(&url))).await?;

        if response.status() != StatusCode::OK {
            return Err(Self::status_error(response).await);
        }
        let identity: ScreenIdentity = response.json().await?;
        Ok(identity)
    }

    /// `PUT /heartbeat`: report this device alive. `200` and `204` are both
    /// accepted; the body is ignored.
    pub async fn heartbeat(&self) -> Result<()> {
        let url = self.endpoint("heartbeat");
        let body = HeartbeatRequest {
            status: "online",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let response = self
            .execute(|| self.authed(self.http.put(&url)).json(&body))
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::status_error(response).await),
        }
    }

    /// `GET /ads/deliver`: fetch the current manifest. A `204` means "no
    /// ads" and synthesizes an empty manifest stamped now.
    pub async fn get_ads(&self) -> Result<AdManifest> {
        let url = self.endpoint("ads/deliver");
        let response = self.execute(|| self.authed(self.http.get(&url))).await?;

        match response.status() {
            StatusCode::OK => {
                let manifest: AdManifest = response.json().await?;
                debug!(ads = manifest.ads.len(), "manifest received");
                Ok(manifest)
            }
            StatusCode::NO_CONTENT => Ok(AdManifest::empty(Utc::now())),
            _ => Err(Self::status_error(response).await),
        }
    }
}
