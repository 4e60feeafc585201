//! Delegation of bounded work units to external specialist workers.
//!
//! The [`DelegationGateway`] is the only component in the engine that talks to
//! the outside world. It races each call against a timeout, parses the
//! worker's text response into a JSON payload, and classifies every failure
//! as `timeout`, `retryable`, or `fatal`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tdd_forge::delegation::{DelegationGateway, DelegationRequest, SpecialistWorker};
//! use tdd_forge::errors::WorkerError;
//!
//! struct EchoWorker;
//!
//! #[async_trait]
//! impl SpecialistWorker for EchoWorker {
//!     async fn invoke(&self, _agent: &str, _desc: &str, _prompt: &str) -> Result<String, WorkerError> {
//!         Ok(r#"{"success": true}"#.to_string())
//!     }
//! }
//!
//! # async fn example() {
//! let gateway = DelegationGateway::new(Arc::new(EchoWorker));
//! let request = DelegationRequest::new("tdd-green-implementer", "Fix login", "prompt", 5_000);
//! let result = gateway.delegate(request).await.unwrap();
//! assert!(result.success);
//! # }
//! ```

pub mod gateway;
pub mod response;

pub use gateway::{DelegationGateway, DelegationRequest, DelegationResult, SpecialistWorker};
pub use response::{extract_json, parse_worker_response};
