//! Call command - invokes one operation on a running host.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::Style;
use serde_json::Value;

use hostbridge_client::BridgeClient;
use hostbridge_config::clamp_request_timeout;
use hostbridge_types::WireError;

use super::Context;

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Operation name
    pub method: String,

    /// Parameters as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub params: String,

    /// Request timeout in seconds (minimum 10)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Host URL (overrides config)
    #[arg(long)]
    pub url: Option<String>,

    /// Client name presented to the host (overrides config)
    #[arg(long)]
    pub name: Option<String>,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let params: Value = serde_json::from_str(&args.params).context("--params is not valid JSON")?;
    if !params.is_object() {
        bail!("--params must be a JSON object");
    }

    let mut config = ctx.config.config.client();
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(name) = args.name {
        config.client_name = Some(name);
    }

    let client = BridgeClient::new(&config)?;
    let outcome = match args.timeout {
        Some(secs) => {
            client
                .call_with_timeout(&args.method, params, clamp_request_timeout(secs))
                .await
        }
        None => client.call(&args.method, params).await,
    };
    client.disconnect();

    match outcome {
        Ok(result) => {
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let green = Style::new().green().bold();
                println!("{} {}", green.apply_to("✓"), args.method);
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        Err(err) => {
            if ctx.json_output {
                let wire = WireError::from(err.clone());
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "error": wire }))?
                );
            } else {
                let red = Style::new().red().bold();
                let dim = Style::new().dim();
                eprintln!("{} {} ({})", red.apply_to("✗"), args.method, err.kind);
                eprintln!("  {}", err.message);
                if let Some(details) = &err.details {
                    eprintln!("  {} {}", dim.apply_to("details:"), details);
                }
            }
            Err(err).with_context(|| format!("call to '{}' failed", args.method))
        }
    }
}
