//! # Calculator Server
//!
//! HTTP RPC server exposing a small calculator service and a tenant-scoped
//! memo service.
//!
//! Services:
//! - `Calc`: `Add`, `AddAsync`, `Divide`, `Scale`, `Slow`
//! - `Memo`: `Whoami`, `Remember` (built per request from the `x-tenant` header,
//!   requires `x-api-key`)
//!
//! ## Usage
//! ```bash
//! cargo run -p calculator-server -- --bind 127.0.0.1:8000
//! curl -s localhost:8000/rpc \
//!   -d '{"TypeFullName":"Calc","MethodName":"Add","Paramters":[2,3]}'
//! ```
//!
//! An optional TOML file can set both dispatcher and HTTP settings:
//! ```toml
//! [dispatcher]
//! expose_fault_details = true
//!
//! [server]
//! bind_address = "0.0.0.0:8000"
//! rpc_path = "/rpc"
//! max_body_size = 65536
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use aspect_rpc_http::{RpcHttpServer, ServerConfig};
use aspect_rpc_server::prelude::*;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calculator-server")]
#[command(about = "HTTP RPC server with a calculator service")]
struct Args {
    /// Address to listen on (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// TOML file with `[dispatcher]` and `[server]` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Put fault messages in failure envelopes
    #[arg(long)]
    expose_faults: bool,

    /// API key the `Memo` service expects in `x-api-key`
    #[arg(long, default_value = "demo-key")]
    api_key: String,

    /// Per-invocation deadline in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    dispatcher: DispatcherConfig,
    server: ServerConfig,
}

impl FileConfig {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(Default)]
struct Calc {
    calls: AtomicU64,
}

impl Calc {
    fn add(&self, a: f64, b: f64) -> RpcResult<f64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(a + b)
    }

    async fn add_async(self: Arc<Self>, a: f64, b: f64) -> RpcResult<f64> {
        tokio::task::yield_now().await;
        self.add(a, b)
    }

    fn divide(&self, a: f64, b: f64) -> RpcResult<f64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if b == 0.0 {
            return Err(RpcError::fault("division by zero"));
        }
        Ok(a / b)
    }

    fn scale(&self, point: Point, factor: f64) -> RpcResult<Point> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(Point {
            x: point.x * factor,
            y: point.y * factor,
        })
    }

    async fn slow(self: Arc<Self>, millis: u64) -> RpcResult<u64> {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(self.calls.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Tenant named by the `x-tenant` header
struct Memo {
    tenant: String,
}

impl Memo {
    fn whoami(&self) -> RpcResult<String> {
        Ok(self.tenant.clone())
    }

    fn remember(&self, note: String) -> RpcResult<serde_json::Value> {
        Ok(json!({ "tenant": self.tenant, "note": note }))
    }
}

/// Short-circuits with a failure envelope unless `x-api-key` matches
struct RequireApiKey {
    key: String,
}

#[async_trait]
impl RpcFilter for RequireApiKey {
    fn name(&self) -> &str {
        "require-api-key"
    }

    async fn invoke(&self, ctx: &mut InvocationContext, next: Next<'_>) -> RpcResult<()> {
        if ctx.scope().metadata_str("x-api-key") != Some(self.key.as_str()) {
            ctx.respond(ResponseEnvelope::failure("missing or invalid api key"));
            return Ok(());
        }
        next.run(ctx).await
    }
}

fn build_dispatcher(args: &Args, config: DispatcherConfig) -> anyhow::Result<Dispatcher> {
    let round = filter_fn("round-result", |ctx, next| {
        Box::pin(async move {
            next.run(ctx).await?;
            if let Some(value) = ctx.return_value().and_then(|value| value.as_f64()) {
                ctx.set_return_value(json!((value * 1e6).round() / 1e6));
            }
            Ok(())
        })
    });

    let calc = ServiceBuilder::singleton("Calc", Calc::default())
        .method("Add", Calc::add)
        .method_async("AddAsync", Calc::add_async)
        .method("Divide", Calc::divide)
        .method_filter(round)
        .method("Scale", Calc::scale)
        .method_async("Slow", Calc::slow);

    let memo = ServiceBuilder::scoped("Memo", |scope: &RequestScope| {
        Ok(Memo {
            tenant: scope.metadata_str("x-tenant").unwrap_or("public").to_string(),
        })
    })
    .method("Whoami", Memo::whoami)
    .method("Remember", Memo::remember)
    .filter(RequireApiKey {
        key: args.api_key.clone(),
    });

    let dispatcher = Dispatcher::builder()
        .config(config)
        .global_filter(TracingFilter::new())
        .global_filter(TimeoutFilter::new(Duration::from_millis(args.timeout_ms)))
        .service(calc)
        .service(memo)
        .build()?;
    Ok(dispatcher)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut file_config = FileConfig::load(args.config.as_ref())?;
    if args.expose_faults {
        file_config.dispatcher.expose_fault_details = true;
    }
    if let Some(bind) = args.bind {
        file_config.server.bind_address = bind;
    }

    let dispatcher = build_dispatcher(&args, file_config.dispatcher)?;
    info!(services = ?dispatcher.registry().service_ids(), "services registered");

    let server = RpcHttpServer::builder(dispatcher)
        .config(file_config.server)
        .build();
    server.run().await?;
    Ok(())
}
