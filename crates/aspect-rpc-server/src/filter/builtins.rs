//! Built-in filters
//!
//! - [`TracingFilter`]: logs each invocation with its duration and outcome
//! - [`TimeoutFilter`]: fails the invocation when the rest of the chain
//!   takes too long

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::traits::RpcFilter;
use crate::context::InvocationContext;
use crate::error::{RpcError, RpcResult};
use crate::pipeline::Next;

/// Logs the start, duration and outcome of every invocation it wraps
#[derive(Debug, Clone, Default)]
pub struct TracingFilter {
    log_arguments: bool,
}

impl TracingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the reconciled arguments in the start event
    pub fn with_arguments(mut self) -> Self {
        self.log_arguments = true;
        self
    }
}

#[async_trait]
impl RpcFilter for TracingFilter {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        if self.log_arguments {
            debug!(
                service = ctx.service_id(),
                method = ctx.method_name(),
                arguments = ?ctx.arguments(),
                "invocation started"
            );
        } else {
            debug!(
                service = ctx.service_id(),
                method = ctx.method_name(),
                "invocation started"
            );
        }

        let started = Instant::now();
        let result = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(()) => info!(
                service = ctx.service_id(),
                method = ctx.method_name(),
                elapsed_ms,
                "invocation completed"
            ),
            Err(err) => warn!(
                service = ctx.service_id(),
                method = ctx.method_name(),
                elapsed_ms,
                error = %err,
                "invocation failed"
            ),
        }
        result
    }
}

/// Bounds the remaining chain with a deadline
///
/// On expiry the inner future is dropped and the invocation fails with a
/// fault. Registry and filter cache are not touched by an abandoned call.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutFilter {
    limit: Duration,
}

impl TimeoutFilter {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl RpcFilter for TimeoutFilter {
    fn name(&self) -> &str {
        "timeout"
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        let outcome = timeout(self.limit, next.run(ctx)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    method = ctx.method_name(),
                    limit_ms = self.limit.as_millis() as u64,
                    "invocation timed out"
                );
                Err(RpcError::fault(format!(
                    "'{}' timed out after {:?}",
                    ctx.method_name(),
                    self.limit
                )))
            }
        }
    }
}
