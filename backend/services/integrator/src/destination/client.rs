use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;

use tradesync_config::AppConfig;

#[derive(Debug, Clone)]
pub struct DestinationClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl DestinationClientConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.destination_base_url.trim_end_matches('/').to_owned(),
            api_token: config.destination_api_token.clone(),
            max_retries: config.destination_max_retries,
            timeout_secs: config.destination_timeout_secs,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DestinationClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// JSON client for the destination's integration API.
#[derive(Clone)]
pub struct DestinationClient {
    client: Client,
    config: DestinationClientConfig,
}

impl DestinationClient {
    pub fn new(config: DestinationClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    /// POST `body` to `{base_url}/{path}`, retrying transient failures.
    ///
    /// Connection errors, timeouts, 429 and 5xx are retried with exponential
    /// backoff; any other 4xx fails immediately.
    pub async fn post_json<T>(&self, path: &str, body: &T) -> Result<(), DestinationClientError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let url = format!("{}/{}", self.config.base_url, path.trim_start_matches('/'));
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, url = %url, "retrying destination call after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(token) = &self.config.api_token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(DestinationClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "destination rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(DestinationClientError::HttpError { status, body });
        }

        Err(DestinationClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
