//! Delivery of signed requests to the external mediator.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{RelayError, Result};

pub fn mediator_timeout_default() -> Duration {
    Duration::from_secs(30)
}

/// Something which can carry a serialized envelope to the mediator and bring back its answer.
pub trait MediatorTransport: Send + Sync {
    /// POST `body` to `endpoint` and return the response body unchanged. Must give up after a bounded time.
    fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>>;
}

/// The mediator reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMediator {
    agent: ureq::Agent,
}

impl HttpMediator {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            // The mediator's body is handed back verbatim whatever the status, so don't turn 4xx/5xx into errors.
            .http_status_as_error(false)
            .build()
            .into();
        HttpMediator { agent }
    }
}

impl MediatorTransport for HttpMediator {
    fn post(&self, endpoint: &str, body: &[u8]) -> Result<Vec<u8>> {
        debug!(%endpoint, len = body.len(), "posting request to mediator");
        let mut response = self
            .agent
            .post(endpoint)
            .header("Content-Type", "application/json;charset=utf-8")
            .send(body)
            .map_err(|e| match e {
                ureq::Error::Timeout(timeout) => {
                    RelayError::Transport(format!("mediator timed out ({timeout:?})"))
                }
                e => RelayError::Transport(e.to_string()),
            })?;
        let status = response.status();
        if !status.is_success() {
            warn!(%endpoint, %status, "mediator answered with a non-success status");
        }
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| RelayError::Transport(format!("cannot read mediator response: {e}")))
    }
}
