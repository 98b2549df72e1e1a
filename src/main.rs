//! Process entry point: CLI dispatch, config loading, logger/server
//! wiring, and signal-driven reload/shutdown (§5, §6).

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use tungsten::cli::{Cli, Command};
use tungsten::config::Config;
use tungsten::forward::DomainUpstreamClient;
use tungsten::logger::Logger;
use tungsten::metrics::LogMetrics;
use tungsten::recursor::Recursor;
use tungsten::server::Server;

#[cfg(feature = "recursor-hickory")]
use tungsten::recursor::hickory::HickoryRecursor;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, control_socket } => serve(config, control_socket).await,
        Command::Validate { config } => validate(config),
        Command::Reload { control_socket } => reload(control_socket).await,
        Command::Version => {
            println!("tungsten {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

fn load_config(path: &str) -> Config {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("failed to read config file at {:?}: {}", path, e);
            exit(1);
        }
    };

    match Config::try_from(bytes.as_slice()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to parse config file at {:?}: {}", path, e);
            exit(1);
        }
    }
}

fn validate(path: String) {
    load_config(&path);
    println!("{:?} is valid", path);
}

fn build_recursor() -> Option<Arc<dyn Recursor>> {
    #[cfg(feature = "recursor-hickory")]
    {
        Some(Arc::new(HickoryRecursor::new()))
    }
    #[cfg(not(feature = "recursor-hickory"))]
    {
        None
    }
}

async fn serve(config_path: String, control_socket: String) {
    let config = load_config(&config_path);

    Logger::new()
        .with_level(config.log.level_filter())
        .with_format(match config.log.format.as_str() {
            "json" => tungsten::logger::Format::Json,
            _ => tungsten::logger::Format::Pretty,
        })
        .with_stderr(true)
        .init()
        .expect("failed to initialize logger");

    let metrics: Arc<dyn tungsten::metrics::Metrics> = Arc::new(LogMetrics::new());
    let upstream_client = Arc::new(DomainUpstreamClient::new());
    let recursor = build_recursor();

    let server = Server::new(config.bind.clone(), config.default_port, metrics, upstream_client, recursor);

    if let Err(e) = server.reload(&config, None).await {
        log::error!(target: "main", "initial config load failed: {}", e);
        exit(1);
    }

    if let Err(e) = server.start().await {
        log::error!(target: "main", "failed to start listeners: {}", e);
        exit(1);
    }

    let control_path = PathBuf::from(&control_socket);
    let control_server = server.clone();
    let control_config_path = PathBuf::from(&config_path);
    tokio::spawn(async move {
        if let Err(e) = tungsten::control::serve(control_path, control_server, control_config_path, None).await {
            log::error!(target: "control", "control socket failed: {}", e);
        }
    });

    let watch_server = server.clone();
    let watch_config_path = PathBuf::from(&config_path);
    tokio::spawn(async move {
        if let Err(e) = tungsten::watcher::watch(watch_config_path, watch_server).await {
            log::error!(target: "watcher", "config file watch failed: {}", e);
        }
    });

    wait_for_signal(server, config_path).await;
}

/// SIGHUP triggers a reload; SIGINT/SIGTERM/SIGABRT trigger a graceful
/// shutdown.
async fn wait_for_signal(server: Server, config_path: String) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    // tokio has no named constant for SIGABRT; 6 is its value on every
    // platform tokio::signal::unix supports.
    let mut sigabrt = signal(SignalKind::from_raw(6)).expect("failed to register SIGABRT handler");

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                log::info!(target: "main", "received SIGHUP, reloading config");
                let config = load_config(&config_path);
                if let Err(e) = server.reload(&config, None).await {
                    log::error!(target: "main", "reload failed, keeping previous generation: {}", e);
                }
            }
            _ = sigterm.recv() => {
                log::info!(target: "main", "received SIGTERM, shutting down");
                server.stop().await;
                return;
            }
            _ = sigabrt.recv() => {
                log::info!(target: "main", "received SIGABRT, shutting down");
                server.stop().await;
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!(target: "main", "received SIGINT, shutting down");
                server.stop().await;
                return;
            }
        }
    }
}

async fn reload(control_socket: String) {
    let mut stream = match UnixStream::connect(&control_socket).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to connect to control socket {:?}: {}", control_socket, e);
            exit(1);
        }
    };

    if let Err(e) = stream.write_all(b"GET /reload HTTP/1.0\r\n\r\n").await {
        eprintln!("failed to send reload request: {}", e);
        exit(1);
    }

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response).await;
    println!("{}", response.trim());
}
