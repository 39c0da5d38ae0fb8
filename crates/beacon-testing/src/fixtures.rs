//! Scripted collaborators for deterministic delivery tests.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use beacon_delivery::{DeliveryError, DeliveryResponse, Result, Transport};

use crate::http::SUCCESS_BODY;

/// Builds a response as the client would return it.
pub fn response(status_code: u16, body: &str) -> DeliveryResponse {
    DeliveryResponse { status_code, body: body.to_string(), duration: Duration::ZERO }
}

/// An acknowledged response.
pub fn success_response() -> DeliveryResponse {
    response(200, SUCCESS_BODY)
}

/// Failure modes a scripted send can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection failure.
    Network,
    /// Request timeout.
    Timeout,
    /// 500 response.
    ServerError,
    /// 2xx with a non-JSON body.
    Garbage,
    /// 2xx JSON without success.
    Rejected,
}

impl FailureKind {
    /// What the transport returns for this failure.
    pub fn reply(self) -> Result<DeliveryResponse> {
        match self {
            Self::Network => Err(DeliveryError::network("connection reset by peer")),
            Self::Timeout => Err(DeliveryError::timeout(30)),
            Self::ServerError => Ok(response(500, "")),
            Self::Garbage => Ok(response(200, "<html>")),
            Self::Rejected => Ok(response(200, r#"{"result":"error"}"#)),
        }
    }
}

/// Transport answering from a script and recording every payload.
///
/// Replies are consumed in order. Once the script runs out every send is
/// acknowledged.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<DeliveryResponse>>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Creates a transport that acknowledges everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport replaying `replies` first.
    pub fn with_replies(replies: impl IntoIterator<Item = Result<DeliveryResponse>>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into_iter().collect()), ..Self::default() })
    }

    /// Queues `kind` as the next reply.
    pub fn fail_next(&self, kind: FailureKind) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(kind.reply());
        }
    }

    /// Payloads sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        _server_url: &'a str,
        payload: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + 'a>> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.to_string());
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Ok(success_response()));

        Box::pin(async move { reply })
    }
}

/// Strips the `&device_id=` suffix the worker appends.
pub fn without_device_id(payload: &str) -> &str {
    payload.rsplit_once("&device_id=").map_or(payload, |(request, _)| request)
}
