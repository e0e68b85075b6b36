//! Remote action execution over the connector HTTP contract.
//!
//! Connectors return HTTP 200 for every logical outcome. Anything else is
//! the transport talking: timeouts, connection failures, 5xx, 408 and 429
//! map to `RetriableFailure`; other statuses and unparseable bodies map to
//! `Failed`.

use std::time::Duration;

use reqwest::StatusCode;
use trellis_contracts::{ActionResult, ExecuteActionRequest};

use crate::error::{EngineError, EngineResult};

const EXECUTE_PATH: &str = "/api/v1/actions/execute";

pub struct RemoteActionExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteActionExecutor {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// Issue the execute call against a connector base URL.
    pub async fn execute(&self, base_url: &str, request: &ExecuteActionRequest) -> ActionResult {
        let url = format!("{}{}", base_url.trim_end_matches('/'), EXECUTE_PATH);
        let correlation_id = request
            .execution_context
            .correlation_id
            .clone()
            .unwrap_or_else(|| request.execution_context.workflow_execution_id.to_string());

        let response = self
            .client
            .post(&url)
            .header("x-correlation-id", &correlation_id)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ActionResult::retriable(format!(
                    "connector call timed out after {:?}: {}",
                    self.timeout, e
                ));
            }
            Err(e) => {
                // Connect and body read failures are transport-level
                return ActionResult::retriable(format!("connector call failed: {}", e));
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            return match response.json::<ActionResult>().await {
                Ok(result) => result,
                Err(e) => ActionResult::failed(format!(
                    "connector returned an unparseable body: {}",
                    e
                )),
            };
        }

        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            ActionResult::retriable(format!("connector returned {}", status))
        } else {
            ActionResult::failed(format!("connector returned {}", status))
        }
    }
}
