//! End-to-end dispatch behaviour through the public API

use aspect_rpc_server::prelude::*;
use aspect_rpc_server::status_codes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Calc {
    calls: AtomicUsize,
}

impl Calc {
    fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(a + b)
    }

    async fn add_async(self: Arc<Self>, a: i64, b: i64) -> RpcResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(a + b)
    }

    fn scale(&self, point: Point, factor: f64) -> RpcResult<Point> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Point {
            x: point.x * factor,
            y: point.y * factor,
        })
    }

    fn echo(&self, value: Point) -> RpcResult<Point> {
        Ok(value)
    }

    fn clear(&self) -> RpcResult<()> {
        self.calls.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// Appends its label to a shared log on the way in
struct Label {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl RpcFilter for Label {
    fn name(&self) -> &str {
        self.label
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        self.log.lock().push(self.label);
        next.run(ctx).await
    }
}

/// Denies requests without an `x-api-key` metadata entry
struct RequireApiKey;

#[async_trait]
impl RpcFilter for RequireApiKey {
    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        if ctx.scope().metadata_str("x-api-key").is_none() {
            ctx.respond(ResponseEnvelope::failure("missing api key"));
            return Ok(());
        }
        next.run(ctx).await
    }
}

fn label(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Label {
    Label {
        label,
        log: Arc::clone(log),
    }
}

fn calc_dispatcher(calc: Arc<Calc>) -> Dispatcher {
    Dispatcher::builder()
        .service(
            ServiceBuilder::shared("Calc", calc)
                .method("Add", Calc::add)
                .method_async("AddAsync", Calc::add_async)
                .method("Scale", Calc::scale)
                .method("Echo", Calc::echo)
                .method("Clear", Calc::clear),
        )
        .build()
        .unwrap()
}

fn request(service: &str, method: &str, arguments: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&RequestEnvelope::new(service, method, arguments)).unwrap()
}

#[tokio::test]
async fn calc_add_end_to_end() {
    let dispatcher = calc_dispatcher(Arc::default());

    let response = dispatcher
        .dispatch_bytes(
            br#"{"TypeFullName":"Calc","MethodName":"Add","Paramters":[2,3]}"#,
            RequestScope::new(),
        )
        .await;

    assert_eq!(response.code, status_codes::SUCCESS);
    assert_eq!(response.data, Some(json!(5)));
    assert_eq!(
        serde_json::from_slice::<Value>(&response.to_vec()).unwrap(),
        json!({ "Code": 200, "Data": 5 })
    );
}

#[tokio::test]
async fn unregistered_service_never_invokes() {
    let calc = Arc::new(Calc::default());
    let dispatcher = calc_dispatcher(Arc::clone(&calc));

    let outcome = dispatcher
        .process(&request("Unknown", "Add", vec![json!(2), json!(3)]), RequestScope::new())
        .await;

    assert_eq!(outcome.response.code, status_codes::FAILURE);
    assert!(!outcome.response.message.clone().unwrap_or_default().is_empty());
    assert_eq!(outcome.failed_in, Some(DispatchState::Parsed));
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_body_fails_without_parsing() {
    let dispatcher = calc_dispatcher(Arc::default());

    for body in [&b""[..], &b"   \n"[..]] {
        let outcome = dispatcher.process(body, RequestScope::new()).await;
        assert_eq!(outcome.response.code, status_codes::FAILURE);
        assert_eq!(outcome.error, Some(RpcError::EmptyRequest));
        assert_eq!(
            outcome.response.message.as_deref(),
            Some("request body is empty")
        );
    }
}

#[tokio::test]
async fn missing_arguments_never_invoke() {
    let calc = Arc::new(Calc::default());
    let dispatcher = calc_dispatcher(Arc::clone(&calc));

    for arguments in [vec![], vec![json!(2)], vec![json!(1), json!(2), json!(3)]] {
        let outcome = dispatcher
            .process(&request("Calc", "Add", arguments), RequestScope::new())
            .await;
        assert_eq!(outcome.response.code, status_codes::FAILURE);
        assert!(matches!(outcome.error, Some(RpcError::ArityMismatch { .. })));
        assert!(outcome.response.data.is_none());
    }
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uncoercible_argument_is_rejected() {
    let calc = Arc::new(Calc::default());
    let dispatcher = calc_dispatcher(Arc::clone(&calc));

    let outcome = dispatcher
        .process(
            &request("Calc", "Add", vec![json!("two"), json!(3)]),
            RequestScope::new(),
        )
        .await;

    assert!(matches!(
        outcome.error,
        Some(RpcError::Coercion { index: 0, .. })
    ));
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loosely_typed_arguments_are_coerced() {
    let dispatcher = calc_dispatcher(Arc::default());

    let response = dispatcher
        .dispatch_bytes(
            &request("Calc", "Add", vec![json!("2"), json!(3)]),
            RequestScope::new(),
        )
        .await;
    assert_eq!(response.data, Some(json!(5)));

    let response = dispatcher
        .dispatch_bytes(
            &request(
                "Calc",
                "Scale",
                vec![json!({ "x": 1, "y": 2, "label": "ignored" }), json!(2)],
            ),
            RequestScope::new(),
        )
        .await;
    assert_eq!(response.data, Some(json!({ "x": 2.0, "y": 4.0 })));
}

#[tokio::test]
async fn matching_arguments_pass_through_unchanged() {
    let dispatcher = calc_dispatcher(Arc::default());
    let point = json!({ "x": 1.5, "y": -2.25 });

    let response = dispatcher
        .dispatch_bytes(&request("Calc", "Echo", vec![point.clone()]), RequestScope::new())
        .await;

    assert_eq!(response.data, Some(point));
}

#[tokio::test]
async fn sync_and_async_methods_produce_identical_data() {
    let dispatcher = calc_dispatcher(Arc::default());

    let sync = dispatcher
        .dispatch_bytes(&request("Calc", "Add", vec![json!(20), json!(22)]), RequestScope::new())
        .await;
    let asynchronous = dispatcher
        .dispatch_bytes(
            &request("Calc", "AddAsync", vec![json!(20), json!(22)]),
            RequestScope::new(),
        )
        .await;

    assert_eq!(sync, asynchronous);
    assert_eq!(sync.data, Some(json!(42)));
}

#[tokio::test]
async fn unit_methods_return_null_data() {
    let dispatcher = calc_dispatcher(Arc::default());

    let response = dispatcher
        .dispatch_bytes(&request("Calc", "Clear", vec![]), RequestScope::new())
        .await;

    assert!(response.is_success());
    assert_eq!(response.data, Some(Value::Null));
    assert_eq!(
        serde_json::from_slice::<Value>(&response.to_vec()).unwrap(),
        json!({ "Code": 200, "Data": null })
    );
}

#[tokio::test]
async fn filters_resolve_method_class_global() {
    let log = Arc::new(Mutex::new(Vec::new()));

    // Global filter registered first, class filter declared after the method
    let dispatcher = Dispatcher::builder()
        .global_filter(label("G1", &log))
        .service(
            ServiceBuilder::singleton("Calc", Calc::default())
                .method("Add", Calc::add)
                .method_filter(label("M1", &log))
                .filter(label("C1", &log)),
        )
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch_bytes(&request("Calc", "Add", vec![json!(1), json!(1)]), RequestScope::new())
        .await;

    assert!(response.is_success());
    assert_eq!(*log.lock(), vec!["M1", "C1", "G1"]);
}

#[tokio::test]
async fn filter_composition_is_computed_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::builder()
        .global_filter(label("G1", &log))
        .service(
            ServiceBuilder::singleton("Calc", Calc::default())
                .filter(label("C1", &log))
                .method("Add", Calc::add),
        )
        .prewarm_filters(false)
        .build()
        .unwrap();
    assert_eq!(dispatcher.filter_resolver().computations(), 0);

    for _ in 0..3 {
        dispatcher
            .dispatch_bytes(&request("Calc", "Add", vec![json!(1), json!(1)]), RequestScope::new())
            .await;
    }

    assert_eq!(dispatcher.filter_resolver().computations(), 1);
    assert_eq!(*log.lock(), vec!["C1", "G1", "C1", "G1", "C1", "G1"]);
}

#[tokio::test]
async fn short_circuit_stops_downstream_and_terminal() {
    let calc = Arc::new(Calc::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::builder()
        .service(
            ServiceBuilder::shared("Calc", Arc::clone(&calc))
                .method("Add", Calc::add)
                .method_filter(RequireApiKey)
                .filter(label("C1", &log)),
        )
        .build()
        .unwrap();
    let body = request("Calc", "Add", vec![json!(2), json!(3)]);

    let denied = dispatcher.dispatch_bytes(&body, RequestScope::new()).await;
    assert_eq!(denied, ResponseEnvelope::failure("missing api key"));
    assert!(log.lock().is_empty());
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);

    let scope = RequestScope::new().with_metadata("x-api-key", json!("secret"));
    let allowed = dispatcher.dispatch_bytes(&body, scope).await;
    assert_eq!(allowed, ResponseEnvelope::success(json!(5)));
    assert_eq!(*log.lock(), vec!["C1"]);
    assert_eq!(calc.calls.load(Ordering::SeqCst), 1);
}

#[derive(Clone)]
struct Caller(String);

/// Request-scoped filter: built fresh per request from the scope
struct StampCaller {
    caller: String,
}

#[async_trait]
impl RpcFilter for StampCaller {
    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        next.run(ctx).await?;
        let value = ctx.take_return_value().unwrap_or(Value::Null);
        ctx.set_return_value(json!({ "caller": self.caller, "value": value }));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_see_their_own_scoped_filters() {
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .service(
                ServiceBuilder::singleton("Calc", Calc::default())
                    .method_async("AddAsync", Calc::add_async),
            )
            .global_scoped_filter(ScopedFilter::new("stamp-caller", |scope: &RequestScope| {
                let caller = scope
                    .get::<Caller>()
                    .map(|caller| caller.0.clone())
                    .unwrap_or_else(|| "anonymous".to_string());
                Ok(StampCaller { caller })
            }))
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut scope = RequestScope::new();
                scope.insert(Caller(format!("caller-{}", i)));
                let body = request("Calc", "AddAsync", vec![json!(i), json!(1)]);
                (i, dispatcher.dispatch_bytes(&body, scope).await)
            })
        })
        .collect();

    for handle in handles {
        let (i, response) = handle.await.unwrap();
        assert_eq!(
            response.data,
            Some(json!({ "caller": format!("caller-{}", i), "value": i + 1 }))
        );
    }
    assert_eq!(dispatcher.filter_resolver().computations(), 1);
}

#[derive(Clone)]
struct Tenant(&'static str);

struct TenantGreeter {
    tenant: &'static str,
}

impl TenantGreeter {
    fn greet(&self, name: String) -> RpcResult<String> {
        Ok(format!("hello {} from {}", name, self.tenant))
    }
}

#[tokio::test]
async fn scoped_services_are_built_from_the_request_scope() {
    let dispatcher = Dispatcher::builder()
        .service(
            ServiceBuilder::scoped("Greeter", |scope: &RequestScope| {
                scope
                    .get::<Tenant>()
                    .map(|tenant| TenantGreeter { tenant: tenant.0 })
                    .ok_or_else(|| RpcError::fault("no tenant in scope"))
            })
            .method("Greet", TenantGreeter::greet),
        )
        .build()
        .unwrap();
    let body = request("Greeter", "Greet", vec![json!("ada")]);

    let mut scope = RequestScope::new();
    scope.insert(Tenant("acme"));
    let response = dispatcher.dispatch_bytes(&body, scope).await;
    assert_eq!(response.data, Some(json!("hello ada from acme")));

    let outcome = dispatcher.process(&body, RequestScope::new()).await;
    assert_eq!(outcome.response.code, status_codes::FAILURE);
    assert_eq!(outcome.failed_in, Some(DispatchState::ArgumentsCoerced));
}

#[tokio::test]
async fn global_filter_faults_are_reported() {
    let dispatcher = Dispatcher::builder()
        .service(ServiceBuilder::singleton("Calc", Calc::default()).method("Add", Calc::add))
        .global_filter(filter_fn("overflow-guard", |ctx, next| {
            Box::pin(async move {
                let a = ctx.arguments()[0].as_i64().unwrap_or_default();
                if a == i64::MAX {
                    return Err(RpcError::fault("would overflow"));
                }
                next.run(ctx).await
            })
        }))
        .expose_fault_details(true)
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch_bytes(
            &request("Calc", "Add", vec![json!(i64::MAX), json!(1)]),
            RequestScope::new(),
        )
        .await;

    assert_eq!(response, ResponseEnvelope::failure("would overflow"));
}
