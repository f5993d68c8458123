// CDP probe - evaluate expressions inside a running application
//
// Attaches to one target over its remote debugging port and answers one JSON
// line per expression or raw command.

use anyhow::{Context, Result};
use cdp_client::discovery::{DEFAULT_HOST, DEFAULT_PORT};
use cdp_client::{CdpConnection, ClientConfig, DebugEndpoint, TargetSelector};
use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

mod handler;

use handler::RequestHandler;

#[derive(Debug, Parser)]
#[command(name = "cdp-probe", version, about)]
struct Args {
    /// Host serving the remote debugging port
    #[arg(long, env = "CDP_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Remote debugging port
    #[arg(long, env = "CDP_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Attach to the first target whose title contains this text
    #[arg(long, conflicts_with = "url")]
    title: Option<String>,

    /// Attach to the first target whose URL contains this text
    #[arg(long)]
    url: Option<String>,

    /// Per-command wait for a reply
    #[arg(long, env = "CDP_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Wait for promises returned by expressions to settle
    #[arg(long)]
    await_promise: bool,

    /// Parse string results that hold JSON text
    #[arg(long)]
    decode_json: bool,

    /// Print the inspectable targets and exit
    #[arg(long)]
    list: bool,

    /// Expression to evaluate; repeatable. Reads stdin when absent
    #[arg(long = "expr", short = 'e')]
    expressions: Vec<String>,
}

impl Args {
    fn selector(&self) -> TargetSelector {
        match (&self.title, &self.url) {
            (Some(title), _) => TargetSelector::TitleContains(title.clone()),
            (None, Some(url)) => TargetSelector::UrlContains(url.clone()),
            (None, None) => TargetSelector::FirstPage,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cdp_probe=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let endpoint = DebugEndpoint::new(&args.host, args.port);
    let mut stdout = tokio::io::stdout();

    if args.list {
        let targets = endpoint
            .list_targets()
            .await
            .context("Failed to list targets")?;
        let listing = serde_json::to_string_pretty(&targets)?;
        stdout.write_all(listing.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        return Ok(());
    }

    let target = endpoint
        .find_target(&args.selector())
        .await
        .context("Failed to find a target")?;
    info!("Attaching to {} ({})", target.title, target.url);

    let timeout = Duration::from_millis(args.timeout_ms);
    let config = ClientConfig::default().with_timeout(timeout);
    let connection = CdpConnection::connect_to_target(&target, config)
        .await
        .context("Failed to connect to target")?;

    let handler = RequestHandler::new(connection, args.await_promise, args.decode_json);

    if !args.expressions.is_empty() {
        for expression in &args.expressions {
            let output = handler.handle_line(expression).await;
            write_line(&mut stdout, &output).await?;
        }
        return Ok(());
    }

    info!("Reading expressions from stdin, one per line");

    let mut reader = BufReader::new(tokio::io::stdin());

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("End of input");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let output = handler.handle_line(line).await;
                write_line(&mut stdout, &output).await?;
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    info!("CDP probe shutting down");
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string(value)?;
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
