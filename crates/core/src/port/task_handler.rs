// Task Handler Port
// Task-type specific work (carrier calls, ERP updates) plugs in here

use crate::domain::{Job, JobPayload};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Handler errors
///
/// The variant decides whether the queue retries the job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure (timeout, downstream unavailable): retried with backoff
    #[error("{0}")]
    Retryable(String),

    /// Business error that retrying cannot fix: failed immediately
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(message: impl std::fmt::Display) -> Self {
        HandlerError::Retryable(message.to_string())
    }

    pub fn permanent(message: impl std::fmt::Display) -> Self {
        HandlerError::Permanent(message.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

/// Handler outcome: the optional value becomes the job's `result`
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// Untyped handler for one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &JobPayload) -> HandlerResult;
}

/// Handler for jobs that share an expensive resource
///
/// Jobs claimed in the same batch with equal `group_key` are handed over
/// together so the handler can acquire the resource once.
#[async_trait]
pub trait GroupedTaskHandler: Send + Sync {
    fn group_key(&self, payload: &JobPayload) -> String;

    /// One result per job, in the order given
    async fn handle_group(&self, jobs: &[Job]) -> Vec<HandlerResult>;
}

/// Typed task: payload deserialized before the call, output serialized after
///
/// # Example
/// ```text
/// struct CreateOrder { carrier: CarrierClient }
///
/// #[async_trait]
/// impl Task for CreateOrder {
///     type Payload = OrderRequest;
///     type Output = OrderCreated;
///     async fn run(&self, payload: OrderRequest) -> Result<OrderCreated, HandlerError> { ... }
/// }
///
/// registry.register_task("create_order", CreateOrder { carrier });
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(&self, payload: Self::Payload) -> Result<Self::Output, HandlerError>;
}

/// Adapts a `Task` to the untyped `TaskHandler` interface
pub struct TypedHandler<T>(pub T);

#[async_trait]
impl<T: Task> TaskHandler for TypedHandler<T> {
    async fn handle(&self, payload: &JobPayload) -> HandlerResult {
        // A payload that does not parse will not parse on the next attempt either
        let input: T::Payload = serde_json::from_value(payload.as_value().clone())
            .map_err(|e| HandlerError::permanent(format!("invalid payload: {}", e)))?;

        let output = self.0.run(input).await?;

        let value = serde_json::to_value(output)
            .map_err(|e| HandlerError::permanent(format!("unserializable result: {}", e)))?;
        Ok(match value {
            serde_json::Value::Null => None,
            other => Some(other),
        })
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with the given result
        Succeed(Option<serde_json::Value>),
        /// Always fail with a retryable error
        FailRetryable(String),
        /// Always fail with a permanent error
        FailPermanent(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Scripted handler: plays queued outcomes first, then the default behavior
    pub struct MockTaskHandler {
        default: MockBehavior,
        script: Mutex<VecDeque<MockBehavior>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<serde_json::Value>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockTaskHandler {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                default,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        pub fn new_success(result: Option<serde_json::Value>) -> Self {
            Self::new(MockBehavior::Succeed(result))
        }

        pub fn new_retryable_failure(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailRetryable(message.into()))
        }

        pub fn new_permanent_failure(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailPermanent(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        /// Block every call until a permit is added to `gate`
        pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Queue a one-off outcome ahead of the default behavior
        pub fn then(self, behavior: MockBehavior) -> Self {
            self.script.lock().unwrap().push_back(behavior);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn seen_payloads(&self) -> Vec<serde_json::Value> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskHandler for MockTaskHandler {
        async fn handle(&self, payload: &JobPayload) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(payload.as_value().clone());

            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default.clone());

            match behavior {
                MockBehavior::Succeed(result) => Ok(result),
                MockBehavior::FailRetryable(msg) => Err(HandlerError::Retryable(msg)),
                MockBehavior::FailPermanent(msg) => Err(HandlerError::Permanent(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }
}
