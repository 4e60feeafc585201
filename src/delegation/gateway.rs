//! Timeout-bounded gateway to an injected specialist worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::delegation::response::parse_worker_response;
use crate::errors::{DelegationError, WorkerError};

/// Abstraction over the external specialist worker.
/// Real bindings live outside this crate; tests use scripted doubles.
#[async_trait]
pub trait SpecialistWorker: Send + Sync {
    /// Hand a task to the worker identified by `agent_id` and return its raw text response.
    async fn invoke(
        &self,
        agent_id: &str,
        description: &str,
        prompt: &str,
    ) -> Result<String, WorkerError>;
}

/// A single unit of work for a specialist worker. Never mutated after dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub specialist_id: String,
    pub task_description: String,
    pub payload: String,
    pub timeout_ms: u64,
}

impl DelegationRequest {
    pub fn new(specialist_id: &str, task_description: &str, payload: &str, timeout_ms: u64) -> Self {
        Self {
            specialist_id: specialist_id.to_string(),
            task_description: task_description.to_string(),
            payload: payload.to_string(),
            timeout_ms,
        }
    }

    fn check(&self) -> Result<(), DelegationError> {
        if self.specialist_id.trim().is_empty() {
            return Err(DelegationError::Fatal(
                "specialist id must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(DelegationError::Fatal(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a delegation that completed within its budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationResult {
    /// The worker's own success flag.
    pub success: bool,
    /// Parsed worker response; a string value when no JSON object was found.
    pub raw_payload: Value,
    pub elapsed_ms: u64,
}

/// Stateless gateway: every call is independent.
#[derive(Clone)]
pub struct DelegationGateway {
    worker: Arc<dyn SpecialistWorker>,
}

impl DelegationGateway {
    pub fn new(worker: Arc<dyn SpecialistWorker>) -> Self {
        Self { worker }
    }

    /// Dispatch a request and race it against `request.timeout_ms`.
    ///
    /// On expiry the in-flight worker future is dropped, which cancels it at
    /// its next suspension point. The gateway never retries.
    #[tracing::instrument(
        name = "delegate",
        skip(self, request),
        fields(specialist = %request.specialist_id, timeout_ms = request.timeout_ms)
    )]
    pub async fn delegate(
        &self,
        request: DelegationRequest,
    ) -> Result<DelegationResult, DelegationError> {
        request.check()?;

        let start = Instant::now();
        let call = self.worker.invoke(
            &request.specialist_id,
            &request.task_description,
            &request.payload,
        );

        let raw = match tokio::time::timeout(Duration::from_millis(request.timeout_ms), call).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(fault)) => {
                let err = DelegationError::from(fault);
                warn!(kind = %err.kind(), error = %err, "Specialist worker raised a fault");
                return Err(err);
            }
            Err(_) => {
                warn!("Specialist worker exceeded its time budget");
                return Err(DelegationError::Timeout {
                    timeout_ms: request.timeout_ms,
                });
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (success, raw_payload) = parse_worker_response(&raw);
        debug!(success, elapsed_ms, "Specialist worker responded");

        Ok(DelegationResult {
            success,
            raw_payload,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DelegationErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedWorker {
        response: Result<String, WorkerError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedWorker {
        fn new(response: Result<String, WorkerError>) -> Self {
            Self {
                response,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SpecialistWorker for FixedWorker {
        async fn invoke(&self, _: &str, _: &str, _: &str) -> Result<String, WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    fn request(timeout_ms: u64) -> DelegationRequest {
        DelegationRequest::new("tdd-green-implementer", "Fix bug", "prompt", timeout_ms)
    }

    #[tokio::test]
    async fn test_delegate_success_uses_worker_flag() {
        let worker = Arc::new(FixedWorker::new(Ok(r#"{"success": false}"#.to_string())));
        let gateway = DelegationGateway::new(worker);

        let result = gateway.delegate(request(1_000)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.raw_payload["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegate_timeout_is_classified() {
        let worker = Arc::new(
            FixedWorker::new(Ok("{}".to_string())).with_delay(Duration::from_secs(60)),
        );
        let gateway = DelegationGateway::new(worker.clone());

        let err = gateway.delegate(request(100)).await.unwrap_err();
        assert_eq!(err, DelegationError::Timeout { timeout_ms: 100 });
        assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delegate_transient_fault_is_retryable() {
        let worker = Arc::new(FixedWorker::new(Err(WorkerError::Transient(
            "socket closed".to_string(),
        ))));
        let gateway = DelegationGateway::new(worker);

        let err = gateway.delegate(request(1_000)).await.unwrap_err();
        assert_eq!(err.kind(), DelegationErrorKind::Retryable);
    }

    #[tokio::test]
    async fn test_delegate_permission_fault_is_fatal() {
        let worker = Arc::new(FixedWorker::new(Err(WorkerError::PermissionDenied(
            "read-only checkout".to_string(),
        ))));
        let gateway = DelegationGateway::new(worker);

        let err = gateway.delegate(request(1_000)).await.unwrap_err();
        assert_eq!(err.kind(), DelegationErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_delegate_rejects_invalid_requests_without_calling_worker() {
        let worker = Arc::new(FixedWorker::new(Ok("{}".to_string())));
        let gateway = DelegationGateway::new(worker.clone());

        let zero_timeout = gateway.delegate(request(0)).await.unwrap_err();
        assert_eq!(zero_timeout.kind(), DelegationErrorKind::Fatal);

        let empty_specialist = gateway
            .delegate(DelegationRequest::new("  ", "Fix bug", "prompt", 1_000))
            .await
            .unwrap_err();
        assert_eq!(empty_specialist.kind(), DelegationErrorKind::Fatal);

        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }
}
