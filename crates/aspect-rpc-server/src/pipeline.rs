//! Onion pipeline composition
//!
//! A [`Pipeline`] is an ordered list of filters around a [`Terminal`]. The
//! first filter is the outermost layer: its code before `next` runs first and
//! its code after `next` runs last. The outermost layer of every pipeline is
//! the [`ResponseStage`], which turns the return value into the success
//! envelope once everything inside it has completed.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::context::InvocationContext;
use crate::envelope::ResponseEnvelope;
use crate::error::RpcResult;
use crate::filter::RpcFilter;
use crate::method::ServiceInstance;

/// Innermost stage of a pipeline
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn call(&self, ctx: &mut InvocationContext) -> RpcResult<()>;
}

/// Terminal that invokes the resolved method on the resolved instance
///
/// Synchronous and asynchronous methods both produce an
/// [`Invocation`](crate::Invocation); the endpoint resolves it and stores the
/// plain value in the context. Errors are not caught here.
pub struct MethodEndpoint {
    instance: ServiceInstance,
}

impl MethodEndpoint {
    pub fn new(instance: ServiceInstance) -> Self {
        Self { instance }
    }
}

#[async_trait]
impl Terminal for MethodEndpoint {
    async fn call(&self, ctx: &mut InvocationContext) -> RpcResult<()> {
        let invocation = ctx
            .method()
            .invoker()
            .invoke(Arc::clone(&self.instance), ctx.arguments().to_vec());
        trace!(
            method = ctx.method_name(),
            ready = invocation.is_ready(),
            "invoking method"
        );
        let value = invocation.resolve().await?;
        ctx.set_return_value(value);
        Ok(())
    }
}

/// Continuation handed to each filter: the rest of the chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    filters: &'a [Arc<dyn RpcFilter>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Run the remaining filters and the terminal
    ///
    /// May be called more than once (for retries), or not at all.
    pub fn run<'c>(self, ctx: &'c mut InvocationContext) -> BoxFuture<'c, RpcResult<()>>
    where
        'a: 'c,
    {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next {
                    filters: rest,
                    terminal: self.terminal,
                };
                filter.invoke(ctx, next)
            }
            None => self.terminal.call(ctx),
        }
    }

    /// Filters still ahead of the terminal
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.filters.len())
            .finish()
    }
}

/// Outermost stage: packages the return value once the chain completes
///
/// Leaves an explicit response set by a filter untouched.
#[derive(Debug, Default)]
pub struct ResponseStage;

#[async_trait]
impl RpcFilter for ResponseStage {
    fn name(&self) -> &str {
        "response"
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        next.run(ctx).await?;
        if ctx.response().is_none() {
            let data = ctx.take_return_value().unwrap_or(Value::Null);
            ctx.respond(ResponseEnvelope::success(data));
        }
        Ok(())
    }
}

/// Builds a [`Pipeline`] from filters in execution order
pub struct PipelineBuilder {
    filters: Vec<Arc<dyn RpcFilter>>,
}

impl PipelineBuilder {
    /// Start a pipeline whose outermost stage is the [`ResponseStage`]
    pub fn new() -> Self {
        Self {
            filters: vec![Arc::new(ResponseStage)],
        }
    }

    pub fn use_filter(mut self, filter: Arc<dyn RpcFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn use_filters(mut self, filters: impl IntoIterator<Item = Arc<dyn RpcFilter>>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn build(self, terminal: impl Terminal + 'static) -> Pipeline {
        Pipeline {
            filters: self.filters,
            terminal: Box::new(terminal),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A composed request pipeline
pub struct Pipeline {
    filters: Vec<Arc<dyn RpcFilter>>,
    terminal: Box<dyn Terminal>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Filter names from outermost to innermost
    pub fn stages(&self) -> Vec<&str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    /// Run the pipeline and return the envelope it produced
    pub async fn execute(&self, ctx: &mut InvocationContext) -> RpcResult<ResponseEnvelope> {
        let next = Next {
            filters: &self.filters,
            terminal: self.terminal.as_ref(),
        };
        next.run(ctx).await?;

        Ok(ctx
            .take_response()
            .unwrap_or_else(|| ResponseEnvelope::success(Value::Null)))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages())
            .finish()
    }
}
