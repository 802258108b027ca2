use anyhow::{Context, Result};
use nanoid::nanoid;
use reqwest::{Method, StatusCode, header};
use sysinfo::System;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{ConfigError, ServiceEndpoint},
    command::{HubCommand, TEST_GROUP, USAGE},
    message::PayloadMessage,
};

const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

// Lines buffered between the stdin reader and the dispatch loop.
const LINE_BUFFER: usize = 16;

/// A fully resolved REST call against the hub management API.
#[derive(Debug, Clone, PartialEq)]
pub struct HubRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<PayloadMessage>,
}

/// Publishes to the hub over its REST API on behalf of one server instance.
pub struct ServerHandler {
    http: reqwest::Client,
    service: ServiceEndpoint,
    hub: String,
    server_name: String,
    payload: PayloadMessage,
}

impl ServerHandler {
    pub fn new(connection_string: &str, hub: &str) -> Result<Self, ConfigError> {
        let service = ServiceEndpoint::parse(connection_string)?;
        Ok(Self::with_client(service, hub, reqwest::Client::new()))
    }

    pub fn with_client(service: ServiceEndpoint, hub: &str, http: reqwest::Client) -> Self {
        let server_name = generate_server_name();
        let payload = PayloadMessage::hello_from(&server_name);
        Self {
            http,
            service,
            hub: hub.to_string(),
            server_name,
            payload,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn base_url(&self) -> String {
        format!(
            "{}/api/v1/hubs/{}",
            self.service.endpoint(),
            self.hub.to_lowercase()
        )
    }

    /// Maps a command onto its method, URL and body without sending anything.
    pub fn request_for(&self, command: &HubCommand) -> HubRequest {
        let base = self.base_url();
        let (method, url) = match command {
            HubCommand::SendToUser { user_id } => (Method::POST, format!("{base}/users/{user_id}")),
            HubCommand::SendToGroup { group } => (Method::POST, format!("{base}/groups/{group}")),
            HubCommand::AddUserToGroup { user_id } => (
                Method::PUT,
                format!("{base}/groups/{TEST_GROUP}/users/{user_id}"),
            ),
            HubCommand::RemoveUserFromGroup { user_id } => (
                Method::DELETE,
                format!("{base}/groups/{TEST_GROUP}/users/{user_id}"),
            ),
        };

        let body = (method == Method::POST).then(|| self.payload.clone());
        HubRequest { method, url, body }
    }

    /// Sends one command and returns the status the hub answered with.
    pub async fn send(&self, command: &HubCommand) -> Result<StatusCode> {
        let HubRequest { method, url, body } = self.request_for(command);
        let token = self
            .service
            .generate_access_token(&url, Some(&self.server_name))?;

        debug!(%method, %url, "sending hub request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url} failed"))?;
        let status = response.status();
        info!(%method, %url, %status, "hub responded");
        Ok(status)
    }

    /// Dispatches lines one at a time until the sender side closes.
    ///
    /// Each request completes before the next line is looked at, so commands
    /// reach the hub in input order.
    pub async fn run<W>(&self, mut lines: mpsc::Receiver<String>, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_line(out, USAGE).await?;

        while let Some(line) = lines.recv().await {
            if line.trim().is_empty() {
                continue;
            }

            let command = match HubCommand::parse(&line) {
                Ok(command) => command,
                Err(err) => {
                    write_line(out, &err.to_string()).await?;
                    continue;
                }
            };

            match self.send(&command).await {
                Ok(status) => {
                    write_line(out, &status.to_string()).await?;
                    if status != StatusCode::ACCEPTED {
                        write_line(out, &format!("Sent error: {status}")).await?;
                    }
                }
                Err(err) => {
                    warn!(error = ?err, "hub request failed");
                    write_line(out, &format!("Sent error: {err:#}")).await?;
                }
            }
        }

        info!(server = %self.server_name, "input closed, server loop finished");
        Ok(())
    }

    pub async fn run_stdin(&self) -> Result<()> {
        let lines = spawn_line_reader(BufReader::new(tokio::io::stdin()));
        let mut stdout = tokio::io::stdout();
        self.run(lines, &mut stdout).await
    }
}

/// Reads lines on a background task and forwards them over a channel.
///
/// Bytes that are not valid UTF-8 are replaced rather than treated as a read
/// failure, so one garbled line does not end the input. The channel closes on
/// EOF or on an I/O error.
pub fn spawn_line_reader<R>(mut reader: R) -> mpsc::Receiver<String>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(async move {
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(text).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(?error, "failed to read input line");
                    break;
                }
            }
        }
    });
    rx
}

fn generate_server_name() -> String {
    let host = System::host_name().unwrap_or_else(|| "localhost".to_string());
    format!("{host}_{}", nanoid!(32, &HEX_ALPHABET))
}

async fn write_line<W>(out: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
