//! Agent server - hosts the evaluator or the performer agent over HTTP.

mod card;
mod error;
mod routes;
mod sessions;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use harness::io::config::load_config;
use tokio::net::TcpListener;
use tracing::info;

use crate::card::{load_card, public_url};
use crate::state::{AppState, Role};

#[derive(Parser)]
#[command(name = "agent-server")]
#[command(about = "Serve an evaluator or performer agent")]
struct Args {
    /// Agent role to host
    #[arg(value_enum)]
    role: Role,

    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (evaluator 9001, performer 9002 by default)
    #[arg(long)]
    port: Option<u16>,

    /// Harness config file (defaults apply when missing)
    #[arg(long, default_value = "craftbench.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    harness::logging::init(&["agent_server=info"]);

    let args = Args::parse();
    let port = args.port.unwrap_or_else(|| args.role.default_port());
    let url = public_url(std::env::var("AGENT_URL").ok(), &args.host, port);
    let card = load_card(args.role, &url)?;
    info!(role = args.role.as_str(), url = %url, "starting agent-server");

    let role = args.role;
    let config_path = args.config.clone();
    let state = tokio::task::spawn_blocking(move || {
        let config = load_config(&config_path)?;
        AppState::build(role, card, &config)
    })
    .await
    .context("build agent state")??;

    let app = routes::router(state.clone());
    let addr: SocketAddr = format!("{}:{}", args.host, port)
        .parse()
        .with_context(|| format!("parse bind address {}:{port}", args.host))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Sessions own simulators and the state owns blocking clients; both are
    // torn down off the executor.
    let closed = tokio::task::spawn_blocking(move || state.shutdown())
        .await
        .context("close sessions")?;
    info!(closed, "agent-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
