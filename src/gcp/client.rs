use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::auth::{Token, TokenSource};
use crate::config::GcpConfig;
use crate::error::{OcpciError, Result};

const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Authenticated HTTP client shared by the Pub/Sub and Storage clients.
///
/// Retries connection errors, rate limiting and server errors with a fixed
/// delay, and caps the number of requests in flight.
pub struct GcpClient {
    client: Client,
    token: TokenSource,
    max_retries: u32,
    retry_delay: Duration,
    semaphore: Arc<Semaphore>,
}

impl GcpClient {
    pub fn new(
        token: TokenSource,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ocpci-logreduce/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OcpciError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            max_retries,
            retry_delay,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    /// Builds a client whose credentials follow the configuration: an explicit
    /// token wins, then the metadata server, else anonymous access.
    pub fn from_config(config: &GcpConfig) -> Result<Self> {
        let token = match &config.token {
            Some(token) => TokenSource::Static(Token::from(token.as_str())),
            None if config.use_metadata_server => TokenSource::metadata(&config.metadata_url),
            None => TokenSource::Anonymous,
        };

        Self::new(token, config.max_retries, config.retry_delay())
    }

    /// Sends the request produced by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` cannot be
    /// reused. A 404 maps to [`OcpciError::NotFound`]; any other non-success
    /// status that is not retried maps to [`OcpciError::ApiError`].
    pub async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| OcpciError::Config(format!("Request limiter closed: {e}")))?;

        let mut retry_count = 0;
        loop {
            let request = self
                .token
                .authorize(&self.client, build(&self.client))
                .await?;

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= self.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        self.retry_delay.as_secs(),
                        retry_count + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            debug!("{} -> {}", response.url(), status);

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(OcpciError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.max_retries,
                    });
                }

                warn!(
                    "Google API error (status {status}). Waiting {} seconds before retry {}/{}...",
                    self.retry_delay.as_secs(),
                    retry_count + 1,
                    self.max_retries
                );

                tokio::time::sleep(self.retry_delay).await;
                retry_count += 1;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(OcpciError::NotFound(response.url().to_string()));
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(OcpciError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            return Ok(response);
        }
    }

    /// Sends a request and deserializes the JSON body.
    pub async fn execute_json<T, F>(&self, build: F) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.execute(build).await?;
        Ok(response.json().await?)
    }
}
