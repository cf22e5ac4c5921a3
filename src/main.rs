use anyhow::{Context, Result};
use clap::Parser;
use invoice_tools_lib::{handler_from_env, init_tracing, tool_definitions};
use std::io::Read;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs one tool invocation and prints its JSON result to stdout.
#[derive(Parser, Debug)]
#[command(name = "invoice-tools")]
#[command(author, version, about = "Invoice extraction and weather tools")]
#[command(long_about = r#"
Runs a single tool invocation the way the hosting trigger would and prints
the JSON result. Failures are printed as {"error": ..., "details": ...}.

Configuration is read from the environment (and a .env file):
  CONTENT_UNDERSTANDING_ENDPOINT   required
  CONTENT_UNDERSTANDING_API_KEY    optional, managed identity when unset
  INVOICE_DATA_DIR                 document root, defaults to ./data

Example:
  invoice-tools analyze_invoice --payload '{"arguments":{"fileName":"invoice_sample.jpg"}}'
  echo '{"city":"Seattle"}' | invoice-tools get_weather
  invoice-tools --list-tools
"#)]
struct Cli {
    /// Tool to invoke (analyze_invoice, get_weather)
    #[arg(required_unless_present = "list_tools")]
    tool: Option<String>,

    /// Request payload as JSON; read from stdin when omitted
    #[arg(short, long, value_name = "JSON")]
    payload: Option<String>,

    /// Print the tool definitions and exit
    #[arg(long)]
    list_tools: bool,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.list_tools {
        let definitions = serde_json::to_string_pretty(&tool_definitions())
            .context("Failed to serialize tool definitions")?;
        println!("{}", definitions);
        return Ok(());
    }

    let Some(tool) = cli.tool else {
        anyhow::bail!("A tool name is required. Use --list-tools to see the available tools.");
    };

    let payload = match cli.payload {
        Some(payload) => payload,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };

    let handler = handler_from_env();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let output = handler
        .handle_with_cancellation(&tool, &payload, &cancel)
        .await;
    println!("{}", output);
    Ok(())
}
