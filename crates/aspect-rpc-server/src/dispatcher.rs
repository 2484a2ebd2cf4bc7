//! Request dispatcher
//!
//! Glues the registry, coercer, filter resolver, pipeline and invoker together
//! for each request. Every request ends in exactly one [`ResponseEnvelope`]:
//! status 200 once the pipeline completes, status 500 from any failure.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, error, field, info, trace, warn};

use crate::coerce::coerce_arguments;
use crate::context::InvocationContext;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::{RegistryError, RpcError, RpcResult};
use crate::filter::{FilterEntry, FilterFactory, FilterResolver, FilterTier, RpcFilter};
use crate::pipeline::{MethodEndpoint, PipelineBuilder};
use crate::registry::{ServiceBuilder, ServiceDescriptor, ServiceRegistry};
use crate::scope::RequestScope;

/// Dispatch progress of a single request
///
/// `AwaitingBody → Parsed → Resolved → ArgumentsCoerced → PipelineBuilt →
/// Executed → ResponseEmitted`; any state may move to the absorbing
/// `Errored` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispatchState {
    AwaitingBody,
    Parsed,
    Resolved,
    ArgumentsCoerced,
    PipelineBuilt,
    Executed,
    ResponseEmitted,
    Errored,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ResponseEmitted | Self::Errored)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingBody => "awaiting_body",
            Self::Parsed => "parsed",
            Self::Resolved => "resolved",
            Self::ArgumentsCoerced => "arguments_coerced",
            Self::PipelineBuilt => "pipeline_built",
            Self::Executed => "executed",
            Self::ResponseEmitted => "response_emitted",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Dispatcher behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Put the fault's own message in failure envelopes instead of a generic one
    pub expose_fault_details: bool,
    /// Compose every method's filter chain when the dispatcher is built
    pub prewarm_filters: bool,
    /// Turn panics inside filters or methods into invocation failures
    pub catch_panics: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            expose_fault_details: false,
            prewarm_filters: true,
            catch_panics: true,
        }
    }
}

/// Everything known about a finished dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: ResponseEnvelope,
    /// `ResponseEmitted` or `Errored`
    pub state: DispatchState,
    /// Last state reached before an error
    pub failed_in: Option<DispatchState>,
    pub error: Option<RpcError>,
}

impl DispatchOutcome {
    fn emitted(response: ResponseEnvelope) -> Self {
        Self {
            response,
            state: DispatchState::ResponseEmitted,
            failed_in: None,
            error: None,
        }
    }
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    services: Vec<ServiceDescriptor>,
    global_filters: Vec<FilterEntry>,
    config: DispatcherConfig,
    /// Validation errors collected during registration
    validation_errors: Vec<RegistryError>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service
    pub fn service<S>(mut self, service: ServiceBuilder<S>) -> Self
    where
        S: Send + Sync + 'static,
    {
        match service.into_descriptor() {
            Ok(descriptor) => self.services.push(descriptor),
            Err(err) => {
                warn!(error = %err, "service registration rejected");
                self.validation_errors.push(err);
            }
        }
        self
    }

    /// Register an already built service descriptor
    pub fn descriptor(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Global-tier filter applied to every method of every service
    pub fn global_filter(mut self, filter: impl RpcFilter + 'static) -> Self {
        self.global_filters
            .push(FilterEntry::shared(FilterTier::Global, Arc::new(filter)));
        self
    }

    /// Global-tier filter instantiated per request
    pub fn global_scoped_filter(mut self, factory: impl FilterFactory + 'static) -> Self {
        self.global_filters
            .push(FilterEntry::scoped(FilterTier::Global, Arc::new(factory)));
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn expose_fault_details(mut self, expose: bool) -> Self {
        self.config.expose_fault_details = expose;
        self
    }

    pub fn prewarm_filters(mut self, prewarm: bool) -> Self {
        self.config.prewarm_filters = prewarm;
        self
    }

    pub fn catch_panics(mut self, catch: bool) -> Self {
        self.config.catch_panics = catch;
        self
    }

    pub fn build(self) -> Result<Dispatcher, RegistryError> {
        if let Some(err) = self.validation_errors.into_iter().next() {
            return Err(err);
        }

        let registry = ServiceRegistry::new(self.services)?;
        let resolver = FilterResolver::new(self.global_filters);

        if self.config.prewarm_filters {
            let composed = resolver.prewarm(&registry);
            debug!(composed, "prewarmed filter chains");
        }

        info!(
            services = registry.len(),
            global_filters = resolver.global_filters().len(),
            "dispatcher ready"
        );

        Ok(Dispatcher {
            registry,
            resolver,
            config: self.config,
        })
    }
}

/// Routes decoded requests to registered service methods
#[derive(Debug)]
pub struct Dispatcher {
    registry: ServiceRegistry,
    resolver: FilterResolver,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn filter_resolver(&self) -> &FilterResolver {
        &self.resolver
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Decode `body` and dispatch it
    pub async fn dispatch_bytes(&self, body: &[u8], scope: RequestScope) -> ResponseEnvelope {
        self.process(body, scope).await.response
    }

    /// Dispatch an already decoded request
    pub async fn dispatch(&self, request: RequestEnvelope, scope: RequestScope) -> ResponseEnvelope {
        self.process_request(request, scope).await.response
    }

    /// Like [`Dispatcher::dispatch_bytes`], also reporting how far the request got
    pub async fn process(&self, body: &[u8], scope: RequestScope) -> DispatchOutcome {
        let span = debug_span!(
            "rpc_dispatch",
            request_id = %scope.request_id(),
            service = field::Empty,
            method = field::Empty
        );

        async move {
            let request = match RequestEnvelope::from_slice(body) {
                Ok(request) => request,
                Err(err) => return self.fail(err, DispatchState::AwaitingBody),
            };
            self.run(request, scope).await
        }
        .instrument(span)
        .await
    }

    /// Like [`Dispatcher::dispatch`], also reporting how far the request got
    pub async fn process_request(
        &self,
        request: RequestEnvelope,
        scope: RequestScope,
    ) -> DispatchOutcome {
        let span = debug_span!(
            "rpc_dispatch",
            request_id = %scope.request_id(),
            service = field::Empty,
            method = field::Empty
        );
        self.run(request, scope).instrument(span).await
    }

    async fn run(&self, request: RequestEnvelope, scope: RequestScope) -> DispatchOutcome {
        let span = tracing::Span::current();
        span.record("service", request.service_id.as_str());
        span.record("method", request.method_name.as_str());

        let mut state = DispatchState::Parsed;
        let result = if self.config.catch_panics {
            AssertUnwindSafe(self.execute(request, scope, &mut state))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(RpcError::fault(panic_message(payload.as_ref()))))
        } else {
            self.execute(request, scope, &mut state).await
        };

        match result {
            Ok(response) => {
                transition(&mut state, DispatchState::ResponseEmitted);
                DispatchOutcome::emitted(response)
            }
            Err(err) => self.fail(err, state),
        }
    }

    async fn execute(
        &self,
        request: RequestEnvelope,
        scope: RequestScope,
        state: &mut DispatchState,
    ) -> RpcResult<ResponseEnvelope> {
        let RequestEnvelope {
            service_id,
            method_name,
            arguments,
        } = request;

        let service = self.registry.lookup(&service_id)?;
        let method = service
            .method(&method_name)
            .ok_or_else(|| RpcError::MethodNotFound {
                service: service_id.clone(),
                method: method_name.clone(),
            })?;
        transition(state, DispatchState::Resolved);

        let arguments = coerce_arguments(method.name(), method.parameters(), arguments)?;
        transition(state, DispatchState::ArgumentsCoerced);

        let instance = service.resolve_instance(&scope)?;
        let filters = self.resolver.resolve(service, method, &scope)?;
        let pipeline = PipelineBuilder::new()
            .use_filters(filters)
            .build(MethodEndpoint::new(instance));
        transition(state, DispatchState::PipelineBuilt);
        trace!(stages = ?pipeline.stages(), "pipeline built");

        let mut ctx = InvocationContext::new(scope, service_id, Arc::clone(method), arguments);
        let response = pipeline.execute(&mut ctx).await?;
        transition(state, DispatchState::Executed);

        Ok(response)
    }

    fn fail(&self, err: RpcError, failed_in: DispatchState) -> DispatchOutcome {
        let during_execution = !err.is_pre_dispatch() || failed_in >= DispatchState::ArgumentsCoerced;

        let message = if during_execution {
            error!(failed_in = %failed_in, error = %err, "invocation failure");
            let detail = err.to_string();
            if self.config.expose_fault_details && !detail.is_empty() {
                detail
            } else {
                GENERIC_FAULT_MESSAGE.to_string()
            }
        } else {
            warn!(failed_in = %failed_in, kind = err.kind(), error = %err, "request rejected");
            err.to_string()
        };

        DispatchOutcome {
            response: ResponseEnvelope::failure(message),
            state: DispatchState::Errored,
            failed_in: Some(failed_in),
            error: Some(err),
        }
    }
}

const GENERIC_FAULT_MESSAGE: &str = "invocation failure";

fn transition(state: &mut DispatchState, next: DispatchState) {
    trace!(from = %state, to = %next, "dispatch state");
    *state = next;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ScopedFilter;
    use crate::pipeline::Next;
    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    struct Calc;

    impl Calc {
        fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
            Ok(a + b)
        }

        fn divide(&self, a: i64, b: i64) -> RpcResult<i64> {
            if b == 0 {
                return Err(RpcError::fault("division by zero"));
            }
            Ok(a / b)
        }

        fn explode(&self) -> RpcResult<()> {
            panic!("kaboom");
        }
    }

    struct Pass;

    #[async_trait]
    impl RpcFilter for Pass {
        async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
            next.run(ctx).await
        }
    }

    fn calc_service() -> ServiceBuilder<Calc> {
        ServiceBuilder::singleton("Calc", Calc)
            .method("Add", Calc::add)
            .method("Divide", Calc::divide)
            .method("Explode", Calc::explode)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .service(calc_service())
            .global_filter(Pass)
            .build()
            .unwrap()
    }

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(DispatchState::ArgumentsCoerced.to_string(), "arguments_coerced");
        assert!(DispatchState::Errored.is_terminal());
        assert!(DispatchState::ResponseEmitted.is_terminal());
        assert!(!DispatchState::Executed.is_terminal());
        assert!(DispatchState::AwaitingBody < DispatchState::Executed);
    }

    #[test]
    fn test_config_defaults_and_partial_deserialization() {
        let config = DispatcherConfig::default();
        assert!(!config.expose_fault_details);
        assert!(config.prewarm_filters);
        assert!(config.catch_panics);

        let config: DispatcherConfig =
            serde_json::from_value(json!({ "expose_fault_details": true })).unwrap();
        assert!(config.expose_fault_details);
        assert!(config.catch_panics);
    }

    #[test]
    fn test_build_prewarms_filter_cache() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.filter_resolver().cached_len(), 3);

        let cold = Dispatcher::builder()
            .service(calc_service())
            .prewarm_filters(false)
            .build()
            .unwrap();
        assert_eq!(cold.filter_resolver().cached_len(), 0);
    }

    #[test]
    fn test_build_reports_registration_errors() {
        let err = Dispatcher::builder()
            .service(calc_service().method("Add", Calc::add))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateMethod { .. }));
    }

    #[tokio::test]
    async fn test_success_path_states() {
        let outcome = dispatcher()
            .process(
                br#"{"TypeFullName":"Calc","MethodName":"Add","Paramters":[2,3]}"#,
                RequestScope::new(),
            )
            .await;
        assert_eq!(outcome.state, DispatchState::ResponseEmitted);
        assert_eq!(outcome.failed_in, None);
        assert_eq!(outcome.response, ResponseEnvelope::success(json!(5)));
    }

    #[tokio::test]
    async fn test_failure_states() {
        let dispatcher = dispatcher();
        let cases: [(&[u8], DispatchState); 5] = [
            (b"", DispatchState::AwaitingBody),
            (b"{not json", DispatchState::AwaitingBody),
            (
                br#"{"TypeFullName":"Unknown","MethodName":"Add","Paramters":[]}"#,
                DispatchState::Parsed,
            ),
            (
                br#"{"TypeFullName":"Calc","MethodName":"Add","Paramters":[1]}"#,
                DispatchState::Resolved,
            ),
            (
                br#"{"TypeFullName":"Calc","MethodName":"Divide","Paramters":[1,0]}"#,
                DispatchState::PipelineBuilt,
            ),
        ];

        for (body, expected) in cases {
            let outcome = dispatcher.process(body, RequestScope::new()).await;
            assert_eq!(outcome.state, DispatchState::Errored);
            assert_eq!(outcome.failed_in, Some(expected));
            assert_eq!(outcome.response.code, crate::status_codes::FAILURE);
            assert!(!outcome.response.message.unwrap_or_default().is_empty());
            assert!(outcome.response.data.is_none());
        }
    }

    #[tokio::test]
    async fn test_fault_details_hidden_by_default() {
        let body = br#"{"TypeFullName":"Calc","MethodName":"Divide","Paramters":[1,0]}"#;

        let response = dispatcher().dispatch_bytes(body, RequestScope::new()).await;
        assert_eq!(response.message.as_deref(), Some("invocation failure"));

        let verbose = Dispatcher::builder()
            .service(calc_service())
            .expose_fault_details(true)
            .build()
            .unwrap();
        let response = verbose.dispatch_bytes(body, RequestScope::new()).await;
        assert_eq!(response.message.as_deref(), Some("division by zero"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panic_becomes_invocation_failure() {
        let dispatcher = Dispatcher::builder()
            .service(calc_service())
            .expose_fault_details(true)
            .build()
            .unwrap();
        let outcome = dispatcher
            .process_request(
                RequestEnvelope::new("Calc", "Explode", vec![]),
                RequestScope::new(),
            )
            .await;

        assert_eq!(outcome.failed_in, Some(DispatchState::PipelineBuilt));
        assert_eq!(outcome.response.message.as_deref(), Some("panicked: kaboom"));
        assert!(logs_contain("invocation failure"));
    }

    #[tokio::test]
    async fn test_panicking_factories_become_invocation_failures() {
        let add = || RequestEnvelope::new("Calc", "Add", vec![json!(2), json!(3)]);

        let filter_factory = Dispatcher::builder()
            .service(calc_service())
            .global_scoped_filter(ScopedFilter::new(
                "exploding",
                |_: &RequestScope| -> RpcResult<Pass> { panic!("filter factory boom") },
            ))
            .expose_fault_details(true)
            .build()
            .unwrap();
        let outcome = filter_factory
            .process_request(add(), RequestScope::new())
            .await;
        assert_eq!(outcome.state, DispatchState::Errored);
        assert_eq!(outcome.failed_in, Some(DispatchState::ArgumentsCoerced));
        assert_eq!(
            outcome.response.message.as_deref(),
            Some("panicked: filter factory boom")
        );

        let service_factory = Dispatcher::builder()
            .service(
                ServiceBuilder::scoped("Calc", |_: &RequestScope| -> RpcResult<Calc> {
                    panic!("service factory boom")
                })
                .method("Add", Calc::add),
            )
            .build()
            .unwrap();
        let outcome = service_factory
            .process_request(add(), RequestScope::new())
            .await;
        assert_eq!(outcome.failed_in, Some(DispatchState::ArgumentsCoerced));
        assert_eq!(outcome.response.code, crate::status_codes::FAILURE);
        assert_eq!(outcome.response.message.as_deref(), Some("invocation failure"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejections_log_at_warn() {
        let response = dispatcher()
            .dispatch(RequestEnvelope::new("Calc", "Missing", vec![]), RequestScope::new())
            .await;
        assert_eq!(
            response.message.as_deref(),
            Some("method 'Missing' not found on service 'Calc'")
        );
        assert!(logs_contain("request rejected"));
    }
}
