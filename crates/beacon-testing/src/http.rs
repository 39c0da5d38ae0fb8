//! HTTP mocking of the ingestion endpoint.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use wiremock::{
    matchers::{any, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// Body the endpoint returns when it accepts a request.
pub const SUCCESS_BODY: &str = r#"{"result":"Success"}"#;

/// Path every request is sent to.
pub const INGEST_PATH: &str = "/i";

/// Mock ingestion endpoint.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Answers every ingest request with `response`.
    pub async fn mock_ingest(&self, response: MockResponse) {
        Mock::given(path(INGEST_PATH))
            .respond_with(response.into_template())
            .mount(&self.server)
            .await;
    }

    /// Answers the next ingest requests with `responses` in order.
    ///
    /// Sequence mocks take priority over `mock_ingest`. Once the sequence is
    /// used up, requests fall through to it, or get a 404 when there is none.
    pub async fn mock_ingest_sequence(&self, responses: Vec<MockResponse>) {
        for response in responses {
            Mock::given(path(INGEST_PATH))
                .respond_with(response.into_template())
                .up_to_n_times(1)
                .with_priority(1)
                .mount(&self.server)
                .await;
        }
    }

    /// Answers any request on any path with `status`.
    pub async fn mock_always_fail(&self, status: StatusCode) {
        Mock::given(any())
            .respond_with(ResponseTemplate::new(status.as_u16()))
            .mount(&self.server)
            .await;
    }

    /// Returns all requests received by the server, oldest first.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.clone(),
                path: request.url.path().to_string(),
                query: request.url.query().unwrap_or_default().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Responses the mock endpoint can give.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 200 with `{"result":"Success"}`.
    Success,
    /// 200 JSON whose `result` is the given value.
    NotSuccess {
        /// Value of the `result` field
        result: String,
    },
    /// Status with an empty body.
    Failure {
        /// Response status
        status: StatusCode,
    },
    /// Arbitrary status and body.
    Raw {
        /// Response status
        status: StatusCode,
        /// Response body
        body: Bytes,
    },
    /// Success delivered after `delay`.
    Slow {
        /// Delay before the response is sent
        delay: Duration,
    },
}

impl MockResponse {
    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success => ResponseTemplate::new(200).set_body_string(SUCCESS_BODY),
            Self::NotSuccess { result } => ResponseTemplate::new(200)
                .set_body_string(serde_json::json!({ "result": result }).to_string()),
            Self::Failure { status } => ResponseTemplate::new(status.as_u16()),
            Self::Raw { status, body } => {
                ResponseTemplate::new(status.as_u16()).set_body_bytes(body.to_vec())
            },
            Self::Slow { delay } => {
                ResponseTemplate::new(200).set_body_string(SUCCESS_BODY).set_delay(delay)
            },
        }
    }
}

/// A request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// URL path.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns the decoded value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        beacon_core::encoding::query_value(&self.query, name)
    }

    /// Returns the decoded value of form body parameter `name`.
    pub fn body_param(&self, name: &str) -> Option<String> {
        beacon_core::encoding::query_value(&String::from_utf8_lossy(&self.body), name)
    }
}
