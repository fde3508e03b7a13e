use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::config::GenerationConfig;
use crate::error::JobApiError;

use super::types::{CreatedJob, JobStatus, JobStatusResponse};

const USER_AGENT: &str = concat!("soundweave/", env!("CARGO_PKG_VERSION"));

/// Asynchronous generation job service
#[async_trait]
pub trait GenerationJobApi: Send + Sync {
    /// Create a job and return its id
    async fn create(&self, version: &str, input: &Value) -> Result<String, JobApiError>;

    /// Current status of a job
    async fn status(&self, job_id: &str) -> Result<JobStatus, JobApiError>;
}

/// Predictions-style HTTP job API
pub struct HttpJobApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpJobApi {
    pub fn new(config: &GenerationConfig) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.clone(),
            token: config.api_token.clone(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, JobApiError> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers());
                warn!(?retry_after, "Job API rate limited");
                return Err(JobApiError::RateLimited { retry_after });
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let detail = response.text().await.unwrap_or_default();
                return Err(JobApiError::InvalidParams(detail));
            }
            s if s.is_server_error() => {
                return Err(JobApiError::Transport(format!("server error {}", s)));
            }
            s if !s.is_success() => return Err(JobApiError::Status(s.as_u16())),
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map_err(|e| JobApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl GenerationJobApi for HttpJobApi {
    #[instrument(skip(self, input))]
    async fn create(&self, version: &str, input: &Value) -> Result<String, JobApiError> {
        let url = format!("{}/predictions", self.base_url);
        let body = json!({ "version": version, "input": input });
        let job: CreatedJob = self.send_json(self.client.post(&url).json(&body)).await?;
        debug!(job_id = %job.id, "Created generation job");
        Ok(job.id)
    }

    #[instrument(skip(self))]
    async fn status(&self, job_id: &str) -> Result<JobStatus, JobApiError> {
        let url = format!(
            "{}/predictions/{}",
            self.base_url,
            urlencoding::encode(job_id)
        );
        let response: JobStatusResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.into())
    }
}

/// `Retry-After` in delay-seconds form (HTTP dates are ignored)
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
