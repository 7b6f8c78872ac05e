//! Termlink: terminal helper with a Gauntlet-style daemon architecture
//!
//! The app process owns the daemon and receives events from it over
//! gRPC; the two discover each other's loopback ports through a startup
//! handshake instead of a fixed well-known port.
//!
//! Usage:
//!   termlink           - Run the app (spawns the daemon)
//!   termlink app       - Same, explicit
//!   termlink daemon    - Run the daemon (needs --app-addr or TERMLINK_APP_ADDR)
//!   termlink help      - Show help

use std::env;
use std::error::Error;
use std::process::ExitCode;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use termlink::rpc::client::RetryConfig;
use termlink::rpc::APP_ADDR_ENV;
use termlink::{app, daemon};

fn main() -> ExitCode {
    // Initialize logging (try_init to avoid panic if already initialized)
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (cmd, rest) = match args.split_first() {
        Some((cmd, rest)) => (cmd.as_str(), rest),
        None => ("app", &[][..]),
    };

    let result = match cmd {
        "app" => run_app(rest),
        "daemon" => run_daemon(rest),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("Run 'termlink help' for usage");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_app(args: &[String]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut opts = app::AppOptions::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--listen" => {
                opts.listen_addr = iter
                    .next()
                    .cloned()
                    .ok_or("--listen needs an address")?;
            }
            "--no-daemon" => opts.spawn_daemon = false,
            other => return Err(format!("unknown flag for app: {}", other).into()),
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let shutdown = shutdown_signal();
        app::run(opts, shutdown).await
    })
}

fn run_daemon(args: &[String]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut app_addr = env::var(APP_ADDR_ENV).ok();
    let mut listen_addr = String::from("127.0.0.1:0");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--app-addr" => {
                app_addr = Some(
                    iter.next()
                        .cloned()
                        .ok_or("--app-addr needs an address")?,
                );
            }
            "--listen" => {
                listen_addr = iter
                    .next()
                    .cloned()
                    .ok_or("--listen needs an address")?;
            }
            other => return Err(format!("unknown flag for daemon: {}", other).into()),
        }
    }

    let app_addr = app_addr
        .ok_or_else(|| format!("no app address: pass --app-addr or set {}", APP_ADDR_ENV))?;

    let opts = daemon::DaemonOptions {
        app_addr,
        listen_addr,
        retry: RetryConfig::default(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let shutdown = shutdown_signal();
        daemon::run(opts, shutdown).await
    })
}

/// Watch channel flipped to true on ctrl-c. Must be called inside a
/// tokio runtime.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        let _ = tx.send(true);
    });
    rx
}

fn print_help() {
    println!("Termlink - terminal helper with a daemon architecture\n");
    println!("Usage: termlink [command]\n");
    println!("Commands:");
    println!("  (none), app   Run the app process (spawns the daemon)");
    println!("  daemon        Run the daemon process");
    println!("  help          Show this help message");
    println!("\nApp flags:");
    println!("  --listen <host:port>    Bind address (default 127.0.0.1:0)");
    println!("  --no-daemon             Don't spawn the daemon sidecar");
    println!("\nDaemon flags:");
    println!("  --app-addr <host:port>  App bootstrap address (or {})", APP_ADDR_ENV);
    println!("  --listen <host:port>    Bind address (default 127.0.0.1:0)");
}
