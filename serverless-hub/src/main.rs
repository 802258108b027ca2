use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use serverless_hub::{
    cli::{Cli, ClientArgs, Command, ServerArgs},
    client::ClientHandler,
    server::ServerHandler,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await,
        Command::Client(args) => run_client(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let handler = ServerHandler::new(&args.hub.connection_string, &args.hub.hub)
        .context("invalid connection string")?;
    info!(server = handler.server_name(), hub = %args.hub.hub, "server started");
    handler.run_stdin().await
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let mut handler = ClientHandler::new(&args.hub.connection_string, &args.hub.hub, &args.user_id)
        .context("invalid connection string")?;
    handler
        .start()
        .await
        .with_context(|| format!("failed to connect to {}", handler.client_url()))?;
    println!("Client {} connected.", args.user_id);

    let mut stdout = tokio::io::stdout();
    tokio::select! {
        result = handler.run_printer(&mut stdout) => {
            if let Err(error) = result {
                warn!(?error, "failed to write to stdout");
            }
        }
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "ctrl-c handler failed");
            }
        }
    }

    handler.dispose().await;
    Ok(())
}
