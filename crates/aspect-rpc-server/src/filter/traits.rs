//! Core filter trait definitions

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::RpcResult;
use crate::pipeline::Next;
use crate::scope::RequestScope;

/// A cross-cutting stage in the invocation pipeline
///
/// # Lifecycle
///
/// 1. Code before `next.run(ctx)` runs on the way in, in resolved order
/// 2. `next.run(ctx)` executes the remaining filters and the method
/// 3. Code after it runs on the way out, in reverse order
///
/// # Notes
///
/// - Not calling `next` short-circuits: no downstream filter and no method runs
/// - An explicit response set with `ctx.respond(..)` becomes the final envelope
/// - Errors from `next` may be caught and translated, or propagated with `?`
/// - Shared instances serve concurrent requests; keep per-request state in the
///   context, or register a [`FilterFactory`] to get a fresh instance per request
#[async_trait]
pub trait RpcFilter: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()>;
}

/// Builds a request-scoped filter instance
///
/// Used for filters that depend on request-scoped services: the factory reads
/// what it needs from the scope and the resulting instance lives only for the
/// request.
pub trait FilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, scope: &RequestScope) -> RpcResult<Arc<dyn RpcFilter>>;
}

/// [`FilterFactory`] backed by a closure
///
/// ```rust
/// use aspect_rpc_server::prelude::*;
/// use async_trait::async_trait;
///
/// #[derive(Clone)]
/// struct Tenant(String);
///
/// struct TenantGuard {
///     tenant: Option<Tenant>,
/// }
///
/// #[async_trait]
/// impl RpcFilter for TenantGuard {
///     async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
///         match &self.tenant {
///             Some(_) => next.run(ctx).await,
///             None => Err(RpcError::fault("no tenant")),
///         }
///     }
/// }
///
/// let factory = ScopedFilter::new("tenant-guard", |scope| {
///     Ok(TenantGuard { tenant: scope.get::<Tenant>().cloned() })
/// });
/// # let _ = factory;
/// ```
pub struct ScopedFilter<F> {
    name: String,
    factory: F,
}

impl<F, R> ScopedFilter<F>
where
    F: Fn(&RequestScope) -> RpcResult<R> + Send + Sync,
    R: RpcFilter + 'static,
{
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }
}

impl<F, R> FilterFactory for ScopedFilter<F>
where
    F: Fn(&RequestScope) -> RpcResult<R> + Send + Sync,
    R: RpcFilter + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, scope: &RequestScope) -> RpcResult<Arc<dyn RpcFilter>> {
        Ok(Arc::new((self.factory)(scope)?))
    }
}

/// Filter backed by a closure, see [`filter_fn`]
pub struct FnFilter<F> {
    name: String,
    f: F,
}

/// Create a filter from a closure
///
/// ```rust
/// use aspect_rpc_server::prelude::*;
///
/// let filter = filter_fn("count-args", |ctx, next| {
///     Box::pin(async move {
///         let count = ctx.arguments().len();
///         next.run(ctx).await?;
///         tracing::debug!(count, "arguments seen");
///         Ok(())
///     })
/// });
/// assert_eq!(filter.name(), "count-args");
/// ```
pub fn filter_fn<F>(name: impl Into<String>, f: F) -> FnFilter<F>
where
    F: for<'a> Fn(&'a mut InvocationContext, Next<'a>) -> BoxFuture<'a, RpcResult<()>>
        + Send
        + Sync,
{
    FnFilter {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> RpcFilter for FnFilter<F>
where
    F: for<'a> Fn(&'a mut InvocationContext, Next<'a>) -> BoxFuture<'a, RpcResult<()>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        (self.f)(ctx, next).await
    }
}

/// Scope at which a filter was declared; ordering is method, class, global
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterTier {
    Method,
    Class,
    Global,
}

impl fmt::Display for FilterTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method => f.write_str("method"),
            Self::Class => f.write_str("class"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// Where a filter instance comes from
#[derive(Clone)]
pub enum FilterSource {
    /// One stateless instance shared by every request
    Shared(Arc<dyn RpcFilter>),
    /// A fresh instance per request
    Scoped(Arc<dyn FilterFactory>),
}

/// A declared filter and its tier
#[derive(Clone)]
pub struct FilterEntry {
    tier: FilterTier,
    source: FilterSource,
}

impl FilterEntry {
    pub fn shared(tier: FilterTier, filter: Arc<dyn RpcFilter>) -> Self {
        Self {
            tier,
            source: FilterSource::Shared(filter),
        }
    }

    pub fn scoped(tier: FilterTier, factory: Arc<dyn FilterFactory>) -> Self {
        Self {
            tier,
            source: FilterSource::Scoped(factory),
        }
    }

    pub fn tier(&self) -> FilterTier {
        self.tier
    }

    pub fn source(&self) -> &FilterSource {
        &self.source
    }

    pub fn name(&self) -> &str {
        match &self.source {
            FilterSource::Shared(filter) => filter.name(),
            FilterSource::Scoped(factory) => factory.name(),
        }
    }

    /// The instance to run for the request owning `scope`
    pub fn instantiate(&self, scope: &RequestScope) -> RpcResult<Arc<dyn RpcFilter>> {
        match &self.source {
            FilterSource::Shared(filter) => Ok(Arc::clone(filter)),
            FilterSource::Scoped(factory) => factory.create(scope),
        }
    }
}

impl fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            FilterSource::Shared(_) => "shared",
            FilterSource::Scoped(_) => "scoped",
        };
        f.debug_struct("FilterEntry")
            .field("name", &self.name())
            .field("tier", &self.tier)
            .field("source", &kind)
            .finish()
    }
}
