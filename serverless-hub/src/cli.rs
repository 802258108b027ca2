use clap::{Args, Parser, Subcommand};

/// Environment variable consulted when `--connection-string` is not given.
pub const CONNECTION_STRING_ENV: &str = "Azure__SignalR__ConnectionString";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read `send ...` commands from stdin and publish them through the hub REST API.
    Server(ServerArgs),
    /// Connect to the hub as a user and print the messages it receives.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HubArgs {
    /// Hub connection string, e.g. `Endpoint=https://...;AccessKey=...;Version=1.0;`.
    #[arg(short = 'c', long, env = CONNECTION_STRING_ENV, hide_env_values = true)]
    pub connection_string: String,

    /// Name of the hub to publish to or listen on.
    #[arg(long, default_value = "chat")]
    pub hub: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    #[command(flatten)]
    pub hub: HubArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// User id the client connects as.
    pub user_id: String,

    #[command(flatten)]
    pub hub: HubArgs,
}
