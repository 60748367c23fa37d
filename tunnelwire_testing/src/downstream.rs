//! Canned [`Downstream`] implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use tunnelwire::{ForwardedRequest, ForwardedResponse, http::Downstream};

/// Answers 200 with the request's own headers and body.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoDownstream;

#[async_trait]
impl Downstream for EchoDownstream {
    async fn execute(&self, request: ForwardedRequest) -> ForwardedResponse {
        ForwardedResponse {
            id: request.id,
            status_code: 200,
            headers: request.headers,
            body: request.body,
        }
    }
}

/// Never answers, leaving the caller to its deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct StallingDownstream;

#[async_trait]
impl Downstream for StallingDownstream {
    async fn execute(&self, _request: ForwardedRequest) -> ForwardedResponse {
        std::future::pending().await
    }
}

/// Records every request and answers with a fixed status.
#[derive(Debug)]
pub struct RecordingDownstream {
    status_code: u16,
    seen: Mutex<Vec<ForwardedRequest>>,
}

impl RecordingDownstream {
    /// Answer every request with `status_code` and an empty body.
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder of the lock panicked.
    #[must_use]
    pub fn requests(&self) -> Vec<ForwardedRequest> {
        self.seen.lock().expect("recording lock poisoned").clone()
    }
}

#[async_trait]
impl Downstream for RecordingDownstream {
    async fn execute(&self, request: ForwardedRequest) -> ForwardedResponse {
        let id = request.id.clone();
        self.seen
            .lock()
            .expect("recording lock poisoned")
            .push(request);
        ForwardedResponse {
            id,
            status_code: self.status_code,
            headers: tunnelwire::HeaderMultimap::new(),
            body: Vec::new(),
        }
    }
}
