//! devctl server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use devctl::{
    AppState, DeferredHttpRequest, DispatchConfig, DispatchPolicy, Dispatcher, FileWifiManager,
    HealthReporter, HttpClient, ServerConfig, VersionInfo, WebContext, WifiManager,
    device_routes,
};

const WORKER_READY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "devctl")]
#[command(about = "Device control HTTP server")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(long, env = "DEVCTL_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, short, env = "DEVCTL_PORT", default_value = "80")]
    port: u16,

    /// Number of dispatch workers
    #[arg(long, env = "DEVCTL_WORKERS", default_value = "5")]
    workers: usize,

    /// Longest a request waits for the handoff slot, in milliseconds
    #[arg(long, env = "DEVCTL_SEND_TIMEOUT_MS", default_value = "100")]
    send_timeout_ms: u64,

    /// Network configuration file
    #[arg(long, env = "DEVCTL_STATE_FILE", default_value = "devctl-network.json")]
    state_file: PathBuf,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "DEVCTL_MAX_BODY_BYTES", default_value = "16384")]
    max_body_bytes: usize,

    /// Seconds to wait for busy workers on shutdown
    #[arg(long, env = "DEVCTL_SHUTDOWN_GRACE_SECS", default_value = "5")]
    shutdown_grace_secs: u64,

    /// Ignore SIGTERM and only stop on SIGINT
    #[arg(long, env = "DEVCTL_AWAIT_EXPLICIT_SHUTDOWN")]
    await_explicit_shutdown: bool,

    /// Firmware version reported by /healthz
    #[arg(long, env = "DEVCTL_FIRMWARE_VERSION")]
    firmware_version: Option<String>,

    /// POST the device hostname here once the server is up
    #[arg(long, env = "DEVCTL_ANNOUNCE_URL")]
    announce_url: Option<String>,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("DEVCTL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("devctl={level},devctl_server={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Tell a provisioning service which hostname the device answers to.
fn announce(url: String, host_name: Option<String>) {
    let payload = serde_json::json!({
        "host_name": host_name,
        "version": devctl::DEVCTL_VERSION,
    })
    .to_string();
    tokio::task::spawn_blocking(move || {
        let outcome = HttpClient::new(url).post(&payload);
        if outcome.success {
            info!(response = %outcome.body, "Announced device");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!("devctl {}", devctl::DEVCTL_VERSION);

    let wifi = Arc::new(FileWifiManager::open(&args.state_file)?);
    info!(path = %wifi.path().display(), "Loaded network config");

    let dispatcher = Arc::new(Dispatcher::<DeferredHttpRequest>::start(DispatchConfig {
        workers: args.workers,
        send_timeout: Duration::from_millis(args.send_timeout_ms),
        ..Default::default()
    }));

    if !dispatcher.wait_ready(WORKER_READY_TIMEOUT).await {
        tracing::warn!(
            workers = dispatcher.stats().total,
            idle = dispatcher.stats().idle,
            "Dispatch workers not all ready, serving anyway"
        );
    }

    let mut version = VersionInfo::new();
    if let Some(firmware) = args.firmware_version {
        version = version.with_firmware(firmware);
    }
    let health = HealthReporter::new()
        .with_fields(dispatcher.clone())
        .with_fields(Arc::new(version));

    let table = device_routes(
        WebContext::new(wifi.clone()),
        Arc::new(health),
        DispatchPolicy::default(),
    )?;

    if let Some(url) = args.announce_url {
        announce(url, wifi.host_name());
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        await_explicit_shutdown: args.await_explicit_shutdown,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        max_body_bytes: args.max_body_bytes,
    };

    devctl::serve(config, &table, AppState::new(dispatcher)).await
}
