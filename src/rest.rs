use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::{Credentials, Server};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Response body of an open stream, readable line by line.
pub type StreamBody = Pin<Box<dyn AsyncBufRead + Send>>;

/// Default transport settings for [`RestClient`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RestClientDefaults;

impl RestClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
}

/// Transport options for [`RestClient::with_options`].
#[derive(Clone, Debug)]
pub struct RestClientOptions {
    /// Bound on establishing the TCP/TLS connection for a stream request.
    pub connect_timeout: Duration,
}

impl Default for RestClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: RestClientDefaults::CONNECT_TIMEOUT,
        }
    }
}

/// HTTP client for the streaming endpoints.
///
/// No overall request timeout is configured: a streaming response stays open
/// for as long as the session runs. Each stream is opened with exactly one
/// request; failures are returned to the caller as-is.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: Client,
    credentials: Credentials,
    stream_endpoint_override: Option<String>,
}

impl RestClient {
    /// Builds a client with [`RestClientOptions::default`].
    pub fn new(credentials: Credentials) -> Result<Self, RestError> {
        Self::with_options(credentials, RestClientOptions::default())
    }

    /// Builds a client with explicit transport options.
    pub fn with_options(
        credentials: Credentials,
        options: RestClientOptions,
    ) -> Result<Self, RestError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .tcp_keepalive(RestClientDefaults::TCP_KEEPALIVE)
            .build()
            .map_err(RestError::Transport)?;

        Ok(Self {
            http,
            credentials,
            stream_endpoint_override: None,
        })
    }

    /// Sends both streaming requests to `endpoint` instead of the
    /// environment's streaming server.
    pub fn with_stream_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into().trim_end().to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        self.stream_endpoint_override = Some(endpoint);
        self
    }

    /// Opens the price stream for `instruments` on `account_id`.
    pub async fn open_rates_stream(
        &self,
        account_id: u64,
        instruments: &[String],
    ) -> Result<StreamBody, RestError> {
        if instruments.is_empty() {
            return Err(RestError::InvalidRequest(
                "rates stream needs at least one instrument".to_string(),
            ));
        }

        let url = self.stream_url(Server::StreamingRates, "prices")?;
        let query = [
            ("accountId", account_id.to_string()),
            ("instruments", instruments.join(",")),
        ];
        self.open_stream(&url, &query).await
    }

    /// Opens the transaction event stream for `account_ids`.
    pub async fn open_events_stream(&self, account_ids: &[u64]) -> Result<StreamBody, RestError> {
        if account_ids.is_empty() {
            return Err(RestError::InvalidRequest(
                "events stream needs at least one account id".to_string(),
            ));
        }

        let url = self.stream_url(Server::StreamingEvents, "events")?;
        let ids = account_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.open_stream(&url, &[("accountIds", ids)]).await
    }

    fn stream_url(&self, server: Server, path: &str) -> Result<String, RestError> {
        let base = match self.stream_endpoint_override.as_deref() {
            Some(endpoint) => endpoint,
            None => self
                .credentials
                .server_url(server)
                .ok_or_else(|| RestError::MissingServer {
                    server,
                    environment: format!("{:?}", self.credentials.environment),
                })?,
        };
        Ok(format!("{base}{path}"))
    }

    async fn open_stream(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<StreamBody, RestError> {
        debug!(event = "stream_open_request", url);
        let mut builder = self.http.get(url).query(query);
        if let Some(token) = self.credentials.access_token.as_ref() {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(RestError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        debug!(event = "stream_opened", url, status = status.as_u16());
        let bytes = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(bytes)))
    }
}

/// Errors raised while opening a stream.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("no {server} server in the {environment} environment")]
    MissingServer {
        server: Server,
        environment: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{summarize_error_body, RestClient, RestError};
    use crate::config::{Credentials, Environment, Server};

    fn practice_client() -> RestClient {
        RestClient::new(Credentials::new(
            Environment::Practice,
            SecretString::new("token".to_string()),
        ))
        .expect("build client")
    }

    #[test]
    fn stream_urls_follow_environment() {
        let client = practice_client();
        assert_eq!(
            client
                .stream_url(Server::StreamingRates, "prices")
                .expect("rates url"),
            "https://stream-fxpractice.oanda.com/v1/prices"
        );
        assert_eq!(
            client
                .stream_url(Server::StreamingEvents, "events")
                .expect("events url"),
            "https://stream-fxpractice.oanda.com/v1/events"
        );
    }

    #[test]
    fn endpoint_override_takes_precedence() {
        let client = practice_client().with_stream_endpoint("http://127.0.0.1:9000/v1  \n");
        assert_eq!(
            client
                .stream_url(Server::StreamingRates, "prices")
                .expect("rates url"),
            "http://127.0.0.1:9000/v1/prices"
        );
    }

    #[test]
    fn missing_server_is_reported() {
        let client = RestClient::new(Credentials::sandbox()).expect("build client");
        let error = client
            .stream_url(Server::Labs, "calendar")
            .expect_err("sandbox has no labs");
        assert!(matches!(error, RestError::MissingServer { server: Server::Labs, .. }));
    }

    #[tokio::test]
    async fn empty_subscriptions_are_rejected_before_any_request() {
        let client = practice_client();
        let rates = client.open_rates_stream(1, &[]).await;
        assert!(matches!(rates, Err(RestError::InvalidRequest(_))));
        let events = client.open_events_stream(&[]).await;
        assert!(matches!(events, Err(RestError::InvalidRequest(_))));
    }

    #[test]
    fn error_body_prefers_message_field() {
        let body = r#"{"code":4,"message":"The access token provided does not allow this request to be made","moreInfo":"http://developer.oanda.com/docs/v1/auth"}"#;
        assert_eq!(
            summarize_error_body(body),
            "The access token provided does not allow this request to be made"
        );
        assert_eq!(summarize_error_body("gateway timeout"), "gateway timeout");
        assert_eq!(summarize_error_body(&"x".repeat(500)).len(), 220);
    }
}
