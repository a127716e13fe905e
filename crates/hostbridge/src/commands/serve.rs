//! Serve command - runs the host listener.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;

use hostbridge_host::{Dispatcher, ExecutionContext, HostError, HostServer};

use super::Context;
use crate::operations;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// WebSocket path (overrides config)
    #[arg(long)]
    pub path: Option<String>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    for warning in &ctx.config.warnings {
        eprintln!("warning: {}", warning);
    }

    let mut host = ctx.config.config.host();
    if let Some(port) = args.port {
        host.port = port;
    }
    if let Some(bind) = args.bind {
        host.bind = bind;
    }
    if let Some(path) = args.path {
        host.path = path;
    }
    let addr = host.socket_addr()?;

    let registry = operations::registry(tokio::runtime::Handle::current())
        .context("failed to register operations")?;

    if ctx.verbose {
        for descriptor in registry.describe() {
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
    }

    let dim = Style::new().dim();
    let green = Style::new().green();
    println!(
        "{} ws://{}{}",
        green.apply_to("Listening on"),
        addr,
        host.ws_path()
    );
    println!(
        "  {} {}",
        dim.apply_to("operations:"),
        registry.names().join(", ")
    );
    println!(
        "  {} {:?}",
        dim.apply_to("request timeout:"),
        host.request_timeout()
    );

    let (context, _thread) =
        ExecutionContext::spawn("host-main", host.queue_capacity()).map_err(HostError::Context)?;
    let dispatcher = Dispatcher::new(Arc::new(registry), context, host.request_timeout());

    HostServer::new(dispatcher, host)
        .run(shutdown_signal())
        .await?;

    println!("{}", dim.apply_to("Host stopped."));
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
