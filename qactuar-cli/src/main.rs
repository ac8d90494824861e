use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::{error, warn};

use qactuar::{Config, ServerType, config_init, init_logging};

mod demo;

#[derive(Parser)]
#[command(name = "qactuar")]
#[command(about = "ASGI-style HTTP/1.1 and WebSocket server")]
#[command(version, disable_version_flag = true)]
struct Cli {
    /// Application to serve, as a "module:symbol" registry reference
    app: Option<String>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Execution model: simple_fork, prefork or async_only
    #[arg(short = 's', long, value_parser = parse_server_type)]
    server_type: Option<ServerType>,

    /// Accept-loop poll interval in seconds
    #[arg(long)]
    select_sleep_time: Option<f64>,

    /// Per-recv socket timeout in seconds
    #[arg(short = 'r', long)]
    recv_timeout: Option<f64>,

    /// Per-recv byte budget
    #[arg(long)]
    recv_bytes: Option<usize>,

    /// Worker pool size (prefork only)
    #[arg(long)]
    process_pool_size: Option<usize>,

    /// Total idle-read budget per request in seconds
    #[arg(long)]
    request_timeout: Option<f64>,

    /// TLS certificate chain (PEM)
    #[arg(long)]
    ssl_cert_path: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    ssl_cert_key: Option<PathBuf>,

    /// TLS cipher list
    #[arg(long)]
    ssl_ciphers: Option<String>,

    /// Extra directory prepended to the application search path
    #[arg(short = 'a', long)]
    app_dir: Option<PathBuf>,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

fn parse_server_type(value: &str) -> Result<ServerType, String> {
    value.parse()
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(server_type) = cli.server_type {
        config.server_type = server_type;
    }
    if let Some(value) = cli.select_sleep_time {
        config.select_sleep_time = value;
    }
    if let Some(value) = cli.recv_timeout {
        config.recv_timeout = value;
    }
    if let Some(value) = cli.recv_bytes {
        config.recv_bytes = value;
    }
    if let Some(value) = cli.process_pool_size {
        config.process_pool_size = Some(value);
    }
    if let Some(value) = cli.request_timeout {
        config.request_timeout = value;
    }
    if let Some(path) = &cli.ssl_cert_path {
        config.ssl_cert_path = Some(path.clone());
    }
    if let Some(path) = &cli.ssl_cert_key {
        config.ssl_key_path = Some(path.clone());
    }
    if let Some(ciphers) = &cli.ssl_ciphers {
        config.ssl_ciphers = ciphers.clone();
    }
    if let Some(dir) = &cli.app_dir {
        config.app_dir = Some(dir.clone());
    }
    if let Some(app) = &cli.app {
        // The positional application is mounted at the root route.
        config.apps.insert("/".to_string(), app.clone());
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (mut config, notice) = config_init();
    apply_overrides(&mut config, &cli);

    init_logging(&config);
    if let Some(notice) = notice {
        warn!(target: "qactuar::server", "{notice}");
    }

    let loader = demo::RegistryLoader::new(config.app_dir.clone());
    match qactuar::run(config, &loader) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "qactuar::server", "{err}");
            ExitCode::FAILURE
        }
    }
}
