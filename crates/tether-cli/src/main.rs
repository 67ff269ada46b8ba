//! # Tether CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the demo handlers on two ports
//! tether server -p 9090 -p 9091
//!
//! # One call, raw JSON on stdout
//! tether call -s 127.0.0.1:9090 demo.Math add --static -a 1:long -a 2:long
//!
//! # Load test from a config file (reloaded when it changes)
//! tether simulate --config client.toml -n 10000 -c 64
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;

use tether_cli::config::{resolve_client_config, ConfigReloader};
use tether_cli::params::parse_param;
use tether_cli::simulate::simulate;
use tether_client::{ConnectionPool, RemoteServer, RemoteStub, SelectionPolicy};
use tether_common::transport::DEFAULT_MAX_FRAME_SIZE;
use tether_common::Command;
use tether_server::demo::demo_registry;
use tether_server::{ServerConfig, TcpServer};

#[derive(FromArgs)]
/// Tether - pooled persistent-connection RPC
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Server(ServerArgs),
    Call(CallArgs),
    Simulate(SimulateArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
/// serve the built-in demo handlers
struct ServerArgs {
    /// port to listen on, repeatable
    #[argh(option, short = 'p', long = "port")]
    ports: Vec<u16>,

    /// host to bind every listener to
    #[argh(option, short = 'b', default = "\"0.0.0.0\".into()")]
    bind: String,

    /// largest accepted frame in bytes
    #[argh(option, long = "max-frame-size", default = "DEFAULT_MAX_FRAME_SIZE")]
    max_frame_size: usize,

    /// gzip every connection; clients must use --compression too
    #[argh(switch)]
    compression: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// make one call and print the returned value as JSON
struct CallArgs {
    /// client config file (TOML)
    #[argh(option)]
    config: Option<PathBuf>,

    /// remote server as host:port, repeatable
    #[argh(option, short = 's', long = "server")]
    servers: Vec<RemoteServer>,

    /// target object name, e.g. demo.Math
    #[argh(positional)]
    target: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// parameter as <json>:<type>, repeatable
    #[argh(option, short = 'a', long = "param")]
    params: Vec<String>,

    /// invoke a static method
    #[argh(switch, long = "static")]
    is_static: bool,

    /// milliseconds to wait for a proxy and for the response
    #[argh(option, long = "timeout", default = "30000")]
    timeout_ms: u64,

    /// gzip the connection, overriding the config file
    #[argh(switch)]
    compression: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "simulate")]
/// drive concurrent echo calls and report call statistics
struct SimulateArgs {
    /// client config file (TOML), watched for changes
    #[argh(option)]
    config: Option<PathBuf>,

    /// remote server as host:port, repeatable
    #[argh(option, short = 's', long = "server")]
    servers: Vec<RemoteServer>,

    /// total number of calls
    #[argh(option, short = 'n', default = "1000")]
    calls: usize,

    /// calls in flight at once
    #[argh(option, short = 'c', default = "16")]
    concurrency: usize,

    /// override the configured pool size
    #[argh(option, long = "pool-size")]
    pool_size: Option<usize>,

    /// override the configured selection policy (round_robin or workload)
    #[argh(option, long = "policy")]
    policy: Option<SelectionPolicy>,

    /// milliseconds each call may take
    #[argh(option, long = "timeout", default = "30000")]
    timeout_ms: u64,

    /// milliseconds between config file checks
    #[argh(option, long = "reload-interval", default = "5000")]
    reload_interval_ms: u64,

    /// gzip every connection, overriding the config file
    #[argh(switch)]
    compression: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping into other tools
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Simulate(args) => run_simulate(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = ServerConfig {
        bind_host: args.bind,
        ports: args.ports,
        max_frame_size: args.max_frame_size,
        compression: args.compression,
    };

    let registry = demo_registry();
    tracing::info!(methods = ?registry.methods(), "starting tether server");

    let server = TcpServer::bind(&config, Arc::new(registry)).await?;
    let handle = server.spawn()?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    handle.shutdown();
    tracing::info!("{}", handle.measurer().snapshot());
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let mut config = resolve_client_config(args.config.as_deref(), &args.servers)?;
    config.pool_size = 1;
    config.compression |= args.compression;

    let mut command = Command::new(args.target, args.method).with_static(args.is_static);
    for raw in &args.params {
        command = command.with_param(parse_param(raw)?);
    }

    let pool = Arc::new(ConnectionPool::new(config));
    pool.start_up().await?;

    let stub = RemoteStub::new(pool.clone()).with_timeout(Duration::from_millis(args.timeout_ms));
    let outcome = stub.call(command).await;
    pool.shutdown().await;

    println!("{}", serde_json::to_string(&outcome?.return_value)?);
    Ok(())
}

async fn run_simulate(args: SimulateArgs) -> Result<()> {
    let mut config = resolve_client_config(args.config.as_deref(), &args.servers)?;
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }
    if let Some(policy) = args.policy {
        config.selection = policy;
    }
    config.compression |= args.compression;
    config.validate()?;

    let pool = Arc::new(ConnectionPool::new(config));
    pool.start_up().await?;
    tracing::info!(proxies = pool.len(), "pool started");

    let reloader = args.config.map(|path| {
        ConfigReloader::new(path, pool.clone())
            .with_interval(Duration::from_millis(args.reload_interval_ms))
            .spawn()
    });

    let stub = RemoteStub::new(pool.clone()).with_timeout(Duration::from_millis(args.timeout_ms));
    let report = simulate(&stub, args.calls, args.concurrency).await;

    if let Some(reloader) = reloader {
        reloader.abort();
    }
    pool.shutdown().await;

    println!("{}", report);
    Ok(())
}
