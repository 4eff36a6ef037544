//! Reqwest-based upstream adapter.
//!
//! Production implementation of [`UpstreamClient`] against the chat
//! backend's HTTP endpoints.

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::RelayConfig;
use crate::models::{ChatCompletion, TurnRequest};
use crate::traits::{ByteStream, HttpError, UpstreamClient};

/// Upstream client using reqwest.
///
/// Text-only turns are sent as `GET` with query parameters; turns with
/// attachments or in elevated mode as `POST` with a JSON body.
///
/// # Example
///
/// ```ignore
/// use chat_relay::adapters::ReqwestUpstream;
///
/// let upstream = ReqwestUpstream::new(&RelayConfig::default())?;
/// let body = upstream.open_stream(&TurnRequest::new("Hello")).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
    stream_url: String,
    complete_url: String,
}

impl ReqwestUpstream {
    /// Build a client with the configured connect timeout.
    ///
    /// No overall request timeout is set; stream duration is governed by
    /// the session's inactivity and wall-clock timers.
    pub fn new(config: &RelayConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(Self::convert_error)?;
        Ok(Self::with_client(client, config))
    }

    /// Use a preconfigured reqwest::Client.
    pub fn with_client(client: reqwest::Client, config: &RelayConfig) -> Self {
        Self {
            client,
            stream_url: config.stream_url(),
            complete_url: config.complete_url(),
        }
    }

    /// Get a reference to the underlying reqwest::Client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Convert reqwest error to HttpError.
    fn convert_error(err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(err.to_string())
        } else if err.is_connect() {
            HttpError::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidUrl(err.to_string())
        } else {
            HttpError::Other(err.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(HttpError::ServerError { status, message })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    fn stream_url(&self) -> String {
        self.stream_url.clone()
    }

    fn complete_url(&self) -> String {
        self.complete_url.clone()
    }

    async fn open_stream(&self, request: &TurnRequest) -> Result<ByteStream, HttpError> {
        let builder = if request.requires_body() {
            self.client.post(&self.stream_url).json(request)
        } else {
            self.client
                .get(format!("{}?{}", self.stream_url, request.to_query()))
        };

        let response = builder
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(Self::convert_error)?;
        let response = Self::check_status(response).await?;

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Io(e.to_string())
                }
            })
        });

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &TurnRequest) -> Result<ChatCompletion, HttpError> {
        let response = self
            .client
            .post(&self.complete_url)
            .json(request)
            .send()
            .await
            .map_err(Self::convert_error)?;
        let response = Self::check_status(response).await?;

        response
            .json::<ChatCompletion>()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }
}
