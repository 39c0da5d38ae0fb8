//! HTTP client for delivering queued requests to the ingestion endpoint.
//!
//! Every request goes to `<server_url>/i?`. The request mode depends on the
//! payload: a profile picture reference turns it into a multipart upload, a
//! crash report is sent as a POST body, and everything else is a GET with
//! the payload as the query string.

use std::{future::Future, path::PathBuf, pin::Pin, time::Duration};

use beacon_core::encoding::query_value;
use reqwest::{
    header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE},
    multipart::{Form, Part},
    Body, Certificate, RequestBuilder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Path appended to the server URL for every request.
pub const INGEST_PATH: &str = "/i?";

/// Query parameter marking a crash report.
const CRASH_MARKER: &str = "&crash=";

/// Multipart field carrying an uploaded file.
const UPLOAD_FIELD: &str = "binaryFile";

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Timeout for the whole request including reading the response.
    pub read_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// PEM certificates to trust instead of the built-in roots. Empty means
    /// the platform defaults are used.
    pub pinned_certificates: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            read_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("beacon/", env!("CARGO_PKG_VERSION")).to_string(),
            pinned_certificates: Vec::new(),
        }
    }
}

/// How a payload is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    /// GET with the payload as query string.
    Get,
    /// POST with the payload as form body.
    Post,
    /// POST of a local file as multipart, payload kept in the query string.
    Multipart {
        /// Local file to upload
        file_path: PathBuf,
    },
}

impl RequestMode {
    /// Selects the mode for a payload.
    ///
    /// A picture reference wins over the crash marker.
    pub fn for_payload(payload: &str) -> Self {
        if let Some(path) = picture_path_from_payload(payload) {
            return Self::Multipart { file_path: PathBuf::from(path) };
        }
        if payload.contains(CRASH_MARKER) {
            return Self::Post;
        }
        Self::Get
    }
}

/// Extracts the non-empty `picturePath` of a `user_details` parameter.
pub fn picture_path_from_payload(payload: &str) -> Option<String> {
    let details = query_value(payload, "user_details")?;
    let value: Value = serde_json::from_str(&details).ok()?;

    value
        .get("picturePath")
        .and_then(Value::as_str)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

/// Fully read response of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Checks the endpoint acknowledged the request.
    ///
    /// Acknowledgement needs a 2xx status and a JSON object body whose
    /// `result` equals "success" ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `BadStatus`, `BadBody` or `NotSuccess` for the first check
    /// that fails.
    pub fn acknowledgement(&self) -> Result<()> {
        if !(200..300).contains(&self.status_code) {
            return Err(DeliveryError::bad_status(self.status_code, self.body.clone()));
        }

        let value: Value =
            serde_json::from_str(&self.body).map_err(|e| DeliveryError::bad_body(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| DeliveryError::bad_body("response is not a JSON object"))?;

        let result = object.get("result").and_then(Value::as_str).unwrap_or_default();
        if result.eq_ignore_ascii_case("success") {
            Ok(())
        } else {
            Err(DeliveryError::not_success(result))
        }
    }
}

/// Sends one payload to the endpoint.
///
/// Implemented by `DeliveryClient`. Tests substitute scripted transports to
/// inject failures without a network.
pub trait Transport: Send + Sync {
    /// Sends `payload` to `server_url` and returns the fully read response.
    fn send<'a>(
        &'a self,
        server_url: &'a str,
        payload: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + 'a>>;
}

/// HTTP client for request delivery.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if a pinned certificate is
    /// not valid PEM or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers);

        if !config.pinned_certificates.is_empty() {
            builder = builder.tls_built_in_root_certs(false);
            for pem in &config.pinned_certificates {
                let certificate = Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                    DeliveryError::configuration(format!("invalid pinned certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }

        let client = builder.build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a payload and reads the complete response.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the request exceeds the configured timeout and
    /// `NetworkError` for connection, body read and upload file failures.
    /// Non-2xx responses are returned as `Ok` for the caller to classify.
    pub async fn deliver(&self, server_url: &str, payload: &str) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();
        let mode = RequestMode::for_payload(payload);

        let span = info_span!(
            "request_delivery",
            server_url = %server_url,
            mode = ?mode,
            payload_len = payload.len()
        );

        async move {
            debug!("Starting request delivery");

            let request = self.build_request(server_url, payload, &mode).await?;
            let response = request.send().await.map_err(|e| self.map_send_error(&e))?;
            let status_code = response.status().as_u16();

            let body = response.bytes().await.map_err(|e| {
                warn!("Failed to read response body: {}", e);
                self.map_send_error(&e)
            })?;

            let duration = start_time.elapsed();
            debug!(status = status_code, duration_ms = duration.as_millis(), "Received response");

            Ok(DeliveryResponse {
                status_code,
                body: String::from_utf8_lossy(&body).into_owned(),
                duration,
            })
        }
        .instrument(span)
        .await
    }

    async fn build_request(
        &self,
        server_url: &str,
        payload: &str,
        mode: &RequestMode,
    ) -> Result<RequestBuilder> {
        let base = format!("{}{INGEST_PATH}", server_url.trim_end_matches('/'));

        let request = match mode {
            RequestMode::Get => self.client.get(format!("{base}{payload}")),
            RequestMode::Post => self
                .client
                .post(base)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(payload.to_string()),
            RequestMode::Multipart { file_path } => {
                let file = tokio::fs::File::open(file_path).await.map_err(|e| {
                    DeliveryError::network(format!(
                        "cannot open upload file {}: {e}",
                        file_path.display()
                    ))
                })?;
                let file_name = file_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| UPLOAD_FIELD.to_string());

                let part = Part::stream(Body::wrap_stream(ReaderStream::new(file)))
                    .file_name(file_name);
                let form = Form::new().part(UPLOAD_FIELD, part);

                self.client.post(format!("{base}{payload}")).multipart(form)
            },
        };

        Ok(request)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> DeliveryError {
        warn!("Request failed: {}", e);

        if e.is_timeout() {
            return DeliveryError::timeout(self.config.read_timeout.as_secs());
        }
        if e.is_connect() {
            return DeliveryError::network(format!("connection failed: {e}"));
        }
        DeliveryError::network(e.to_string())
    }
}

impl Transport for DeliveryClient {
    fn send<'a>(
        &'a self,
        server_url: &'a str,
        payload: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + 'a>> {
        Box::pin(self.deliver(server_url, payload))
    }
}
