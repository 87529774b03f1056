use super::signature::{self, SignedRequest};
use super::sink::{DeliveryRequest, DeliverySink, SinkError, SinkResponse};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const UPLOAD_PATH: &str = "structuredlog";
const COMPRESS_TYPE_HEADER: &str = "x-cls-compress-type";
const REQUEST_ID_HEADER: &str = "x-cls-requestid";
const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum HttpSinkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: Url,
    pub secret_id: String,
    pub secret_key: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
struct RequestCounters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
}

impl RequestCounters {
    fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Posts batches to the collector's structured log endpoint.
#[derive(Debug)]
pub struct HttpSink {
    client: Client,
    config: HttpSinkConfig,
    static_headers: HeaderMap,
    counters: RequestCounters,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, HttpSinkError> {
        if config.connect_timeout > config.send_timeout {
            return Err(HttpSinkError::InvalidConfiguration(
                "connect timeout must not exceed send timeout".to_string(),
            ));
        }

        let client = ClientBuilder::new()
            .timeout(config.send_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        let static_headers = Self::build_static_headers(&config)?;

        Ok(Self {
            client,
            config,
            static_headers,
            counters: RequestCounters::default(),
        })
    }

    fn build_static_headers(config: &HttpSinkConfig) -> Result<HeaderMap, HttpSinkError> {
        let mut headers = HeaderMap::new();

        headers.insert(HeaderName::from_static("x-cls-add-source"), HeaderValue::from_static("1"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| HttpSinkError::InvalidConfiguration(format!("Invalid user agent: {e}")))?,
        );
        if let Some(token) = &config.token {
            headers.insert(
                HeaderName::from_static("x-cls-token"),
                HeaderValue::from_str(token)
                    .map_err(|e| HttpSinkError::InvalidConfiguration(format!("Invalid token: {e}")))?,
            );
        }

        Ok(headers)
    }

    /// `<endpoint>/structuredlog?topic_id=<destination>`
    pub fn upload_url(&self, destination: &str) -> Url {
        let mut url = self.config.endpoint.clone();
        let path = format!("{}/{UPLOAD_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("topic_id", destination);
        url
    }

    /// `host[:port]` as sent in the `Host` header.
    fn host(&self) -> String {
        let endpoint = &self.config.endpoint;
        let host = endpoint.host_str().unwrap_or_default();
        match endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn signs_requests(&self) -> bool {
        !self.config.secret_id.is_empty() && !self.config.secret_key.is_empty()
    }

    fn request_headers(&self, request: &DeliveryRequest) -> Result<HeaderMap, SinkError> {
        let mut headers = self.static_headers.clone();
        let content_type = request.format.content_type();
        let compress_type = request.codec.header_value();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(codec) = compress_type {
            headers.insert(HeaderName::from_static(COMPRESS_TYPE_HEADER), HeaderValue::from_static(codec));
        }
        headers.insert(
            HeaderName::from_static("x-cls-package-id"),
            HeaderValue::from_str(&request.package_id)
                .map_err(|e| SinkError::InvalidRequest(format!("Invalid package id: {e}")))?,
        );

        if self.signs_requests() {
            let host = self.host();
            let url = self.upload_url(&request.destination);
            let mut signed_headers = vec![("Content-Type", content_type), ("Host", host.as_str())];
            if let Some(codec) = compress_type {
                signed_headers.push((COMPRESS_TYPE_HEADER, codec));
            }
            let signed = SignedRequest {
                method: "POST",
                path: url.path(),
                params: vec![("topic_id", request.destination.as_str())],
                headers: signed_headers,
            };
            let authorization = signature::authorization(
                &self.config.secret_id,
                &self.config.secret_key,
                &signed,
                chrono::Utc::now().timestamp(),
            )
            .map_err(|e| SinkError::InvalidRequest(format!("Failed to sign request: {e}")))?;
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&authorization)
                    .map_err(|e| SinkError::InvalidRequest(format!("Invalid authorization: {e}")))?,
            );
        }

        Ok(headers)
    }

    pub fn stats(&self) -> SinkStats {
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.counters.total_response_time_ms.load(Ordering::Relaxed);

        SinkStats {
            total_requests,
            successful_requests: self.counters.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.counters.failed_requests.load(Ordering::Relaxed),
            average_response_time: if total_requests > 0 {
                Duration::from_millis(total_response_time / total_requests)
            } else {
                Duration::ZERO
            },
        }
    }
}

fn map_transport_error(error: &reqwest::Error) -> SinkError {
    if error.is_timeout() {
        SinkError::Timeout(error.to_string())
    } else if error.is_connect() {
        SinkError::Connect(error.to_string())
    } else {
        SinkError::Network(error.to_string())
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn deliver(&self, request: DeliveryRequest) -> Result<SinkResponse, SinkError> {
        let url = self.upload_url(&request.destination);
        let headers = self.request_headers(&request)?;
        let start = Instant::now();

        debug!(
            destination = %request.destination,
            batch_id = %request.batch_id,
            attempt = request.attempt,
            bytes = request.body.len(),
            "Posting batch to collector"
        );

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                self.counters.record_request(false, start.elapsed());
                map_transport_error(&e)
            })?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.counters.record_request(status.is_success(), start.elapsed());

        if status.is_success() {
            return Ok(SinkResponse {
                status_code: Some(status.as_u16()),
                request_id,
            });
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        if message.is_empty() {
            message = status.canonical_reason().unwrap_or("unknown status").to_string();
        }
        warn!(
            destination = %request.destination,
            status = status.as_u16(),
            request_id = request_id.as_deref().unwrap_or("-"),
            "Collector rejected batch"
        );

        Err(SinkError::Status {
            status: status.as_u16(),
            message,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> HttpSinkConfig {
        HttpSinkConfig {
            endpoint: Url::parse(endpoint).unwrap(),
            secret_id: "AKID".to_string(),
            secret_key: "secret".to_string(),
            token: Some("session".to_string()),
            connect_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(2),
            user_agent: "cls-log-producer-test".to_string(),
        }
    }

    #[test]
    fn test_upload_url() {
        let sink = HttpSink::new(config("https://ap-guangzhou.cls.example.com")).unwrap();
        assert_eq!(
            sink.upload_url("topic-1").as_str(),
            "https://ap-guangzhou.cls.example.com/structuredlog?topic_id=topic-1"
        );

        let sink = HttpSink::new(config("http://localhost:8080/base/")).unwrap();
        assert_eq!(
            sink.upload_url("a b").as_str(),
            "http://localhost:8080/base/structuredlog?topic_id=a+b"
        );
    }

    #[test]
    fn test_rejects_connect_timeout_above_send_timeout() {
        let mut config = config("http://localhost");
        config.connect_timeout = Duration::from_secs(5);
        assert!(matches!(
            HttpSink::new(config),
            Err(HttpSinkError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_static_headers() {
        let sink = HttpSink::new(config("http://localhost")).unwrap();
        assert_eq!(sink.static_headers.get("x-cls-add-source").unwrap(), "1");
        assert_eq!(sink.static_headers.get("x-cls-token").unwrap(), "session");
        assert!(sink.static_headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_host_includes_explicit_port() {
        let sink = HttpSink::new(config("http://127.0.0.1:8080/")).unwrap();
        assert_eq!(sink.host(), "127.0.0.1:8080");

        let sink = HttpSink::new(config("https://ap-guangzhou.cls.example.com")).unwrap();
        assert_eq!(sink.host(), "ap-guangzhou.cls.example.com");
    }

    #[test]
    fn test_unsigned_without_secret_key() {
        let mut unsigned = config("http://localhost");
        unsigned.secret_key = String::new();
        assert!(!HttpSink::new(unsigned).unwrap().signs_requests());
        assert!(HttpSink::new(config("http://localhost")).unwrap().signs_requests());
    }
}
