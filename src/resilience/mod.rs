//! Composable fault-tolerance policies.
//!
//! A `PolicyChain` runs an operation through an ordered list of policies,
//! outermost first. Each policy receives a `Next` handle and decides whether
//! and how often to call it:
//!
//! ```text
//! RetryPolicy ──► CircuitBreaker ──► operation
//! ```
//!
//! With retry outside the breaker every attempt consults and updates breaker
//! state, and a breaker that trips mid-retry rejects the remaining attempts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};

/// Policies applied to broker calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// The guarded call. Invoked once per attempt.
pub type Operation<E> = dyn Fn() -> BoxFuture<'static, Result<(), E>> + Send + Sync;

/// Why a guarded call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError<E> {
    /// A circuit breaker refused to run the call.
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The call itself failed.
    #[error("{0}")]
    Call(E),
}

/// A resilience policy wrapping the rest of the chain.
#[async_trait]
pub trait Policy<E>: Send + Sync {
    fn name(&self) -> &str;

    /// Run the rest of the chain under this policy.
    async fn execute(&self, next: Next<'_, E>) -> Result<(), PolicyError<E>>;
}

/// The remainder of a chain: inner policies followed by the operation.
pub struct Next<'a, E> {
    policies: &'a [Arc<dyn Policy<E>>],
    operation: &'a Operation<E>,
}

impl<E> Clone for Next<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Next<'_, E> {}

impl<E: Send + 'static> Next<'_, E> {
    /// Invoke the next policy, or the operation once policies run out.
    pub async fn run(self) -> Result<(), PolicyError<E>> {
        match self.policies.split_first() {
            Some((policy, inner)) => {
                policy
                    .execute(Next {
                        policies: inner,
                        operation: self.operation,
                    })
                    .await
            }
            None => (self.operation)().await.map_err(PolicyError::Call),
        }
    }
}

/// Ordered list of policies, outermost first.
pub struct PolicyChain<E> {
    policies: Vec<Arc<dyn Policy<E>>>,
}

impl<E: Send + 'static> PolicyChain<E> {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Append a policy inside the ones already added.
    pub fn with(mut self, policy: Arc<dyn Policy<E>>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Run `operation` through every policy.
    pub async fn execute(&self, operation: &Operation<E>) -> Result<(), PolicyError<E>> {
        Next {
            policies: &self.policies,
            operation,
        }
        .run()
        .await
    }
}

impl<E: Send + 'static> Default for PolicyChain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for PolicyChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyChain")
            .field("policies", &self.policies.len())
            .finish()
    }
}
