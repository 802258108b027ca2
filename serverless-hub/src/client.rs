use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, interval_at, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    auth::{ConfigError, ServiceEndpoint},
    message::{
        HandshakeRequest, HandshakeResponse, HubFrame, PING_RECORD, SEND_MESSAGE_TARGET,
        encode_record, split_records,
    },
};

/// Interval between keep-alive pings sent to the hub.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// How long the hub has to answer the protocol handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

const EVENT_BUFFER: usize = 64;
const MAX_REDIRECTS: usize = 1;
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("negotiate failed: {0}")]
    Negotiate(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Something the connection task observed on the hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Message { server: String, message: String },
    Closed { error: Option<String> },
}

/// Signs a fresh token for the client URL each time a connection is opened.
#[derive(Debug, Clone)]
pub struct AccessTokenProvider {
    service: ServiceEndpoint,
    url: String,
    user_id: String,
}

impl AccessTokenProvider {
    pub fn new(service: ServiceEndpoint, url: String, user_id: String) -> Self {
        Self {
            service,
            url,
            user_id,
        }
    }

    pub fn token(&self) -> Result<String, ConfigError> {
        self.service
            .generate_access_token(&self.url, Some(&self.user_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
}

struct ConnectTarget {
    url: String,
    connection_id: String,
    token: String,
}

struct Connection {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Listens on a hub for `SendMessage` events addressed to one user.
pub struct ClientHandler {
    http: reqwest::Client,
    client_url: String,
    user_id: String,
    tokens: AccessTokenProvider,
    keep_alive: Duration,
    events: Option<mpsc::Receiver<HubEvent>>,
    connection: Option<Connection>,
}

impl ClientHandler {
    pub fn new(connection_string: &str, hub: &str, user_id: &str) -> Result<Self, ClientError> {
        let service = ServiceEndpoint::parse(connection_string)?;
        Ok(Self::with_client(service, hub, user_id, reqwest::Client::new()))
    }

    pub fn with_client(
        service: ServiceEndpoint,
        hub: &str,
        user_id: &str,
        http: reqwest::Client,
    ) -> Self {
        let client_url = client_url(service.endpoint(), hub);
        let tokens = AccessTokenProvider::new(service, client_url.clone(), user_id.to_string());
        Self {
            http,
            client_url,
            user_id: user_id.to_string(),
            tokens,
            keep_alive: DEFAULT_KEEP_ALIVE,
            events: None,
            connection: None,
        }
    }

    /// Sets the ping interval. A zero interval falls back to the default.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = effective_keep_alive(interval);
        self
    }

    /// Whether a connection task is still running.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.shutdown.is_closed())
    }

    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Negotiates, opens the websocket and completes the protocol handshake.
    ///
    /// Returns once the connection is usable; incoming events are then
    /// available through [`ClientHandler::next_event`]. Calling it again after
    /// the hub closed the connection opens a new one.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        self.connection = None;

        let target = self.negotiate().await?;
        let ws_url = websocket_url(&target.url, &target.connection_id, &target.token)?;

        let (mut ws, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| ClientError::Connection(err.to_string()))?;
        let pending = handshake(&mut ws, HANDSHAKE_TIMEOUT).await?;
        info!(user = %self.user_id, url = %target.url, "connected to hub");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let keep_alive = self.keep_alive;
        let task = tokio::spawn(run_connection(
            ws,
            pending,
            events_tx,
            shutdown_rx,
            keep_alive,
        ));

        self.events = Some(events_rx);
        self.connection = Some(Connection {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Next event from the hub, or `None` once the connection task is gone.
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Prints every received message until the connection closes.
    pub async fn run_printer<W>(&mut self, out: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(event) = self.next_event().await {
            let line = match event {
                HubEvent::Message { server, message } => {
                    format_received(&server, &message, Local::now())
                }
                HubEvent::Closed { error: Some(error) } => {
                    format!("Connection closed with error: {error}")
                }
                HubEvent::Closed { error: None } => "Connection closed".to_string(),
            };
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Ok(())
    }

    /// Closes the connection and waits briefly for the background task.
    pub async fn dispose(mut self) {
        let Some(Connection { shutdown, mut task }) = self.connection.take() else {
            return;
        };
        let _ = shutdown.send(());
        if timeout(DISPOSE_TIMEOUT, &mut task).await.is_err() {
            warn!("connection task did not stop in time, aborting");
            task.abort();
        }
        debug!(user = %self.user_id, "client disposed");
    }

    async fn negotiate(&self) -> Result<ConnectTarget, ClientError> {
        let mut url = self.client_url.clone();
        let mut token = self.tokens.token()?;

        for _ in 0..=MAX_REDIRECTS {
            let negotiate = negotiate_url(&url)?;
            debug!(url = %negotiate, "negotiating");
            let response = self
                .http
                .post(negotiate.as_str())
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|err| ClientError::Negotiate(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::Negotiate(format!("hub answered {status}")));
            }

            let body: NegotiateResponse = response
                .json()
                .await
                .map_err(|err| ClientError::Negotiate(err.to_string()))?;

            if let Some(error) = body.error {
                return Err(ClientError::Negotiate(error));
            }

            if let Some(redirect) = body.url {
                debug!(%redirect, "negotiate redirected");
                url = redirect;
                if let Some(access_token) = body.access_token {
                    token = access_token;
                }
                continue;
            }

            let connection_id = body
                .connection_token
                .or(body.connection_id)
                .ok_or_else(|| ClientError::Negotiate("response carried no connection id".into()))?;

            return Ok(ConnectTarget {
                url,
                connection_id,
                token,
            });
        }

        Err(ClientError::Negotiate("too many redirects".into()))
    }
}

pub fn client_url(endpoint: &str, hub: &str) -> String {
    format!("{endpoint}/client/?hub={hub}")
}

pub fn format_received(server: &str, message: &str, at: DateTime<Local>) -> String {
    format!(
        "[{}] Received message from server {server}: {message}",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn parse_url(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|err| ClientError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// `.../client/?hub=x` becomes `.../client/negotiate?hub=x&negotiateVersion=1`.
fn negotiate_url(url: &str) -> Result<Url, ClientError> {
    let mut parsed = parse_url(url)?;
    let path = format!("{}/negotiate", parsed.path().trim_end_matches('/'));
    parsed.set_path(&path);
    parsed
        .query_pairs_mut()
        .append_pair("negotiateVersion", "1");
    Ok(parsed)
}

fn websocket_url(url: &str, connection_id: &str, token: &str) -> Result<Url, ClientError> {
    let mut parsed = parse_url(url)?;
    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ClientError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            });
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "cannot switch to websocket scheme".into(),
        })?;
    parsed
        .query_pairs_mut()
        .append_pair("id", connection_id)
        .append_pair("access_token", token);
    Ok(parsed)
}

fn effective_keep_alive(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_KEEP_ALIVE
    } else {
        interval
    }
}

/// Sends the protocol handshake and waits up to `limit` for the hub's answer.
///
/// Any frames that arrived in the same payload as the handshake response are
/// returned so they can be dispatched before reading further.
async fn handshake<S, E>(ws: &mut S, limit: Duration) -> Result<Vec<String>, ClientError>
where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    timeout(limit, exchange_handshake(ws))
        .await
        .map_err(|_| ClientError::Handshake(format!("no handshake response within {limit:?}")))?
}

async fn exchange_handshake<S, E>(ws: &mut S) -> Result<Vec<String>, ClientError>
where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    let request = encode_record(&HandshakeRequest::default())?;
    ws.send(Message::Text(request))
        .await
        .map_err(|err| ClientError::Connection(err.to_string()))?;

    loop {
        let payload = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::Handshake(
                    "connection closed during handshake".into(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(ClientError::Connection(err.to_string())),
        };

        let mut records = split_records(&payload);
        let Some(first) = records.next() else {
            continue;
        };
        let response: HandshakeResponse = serde_json::from_str(first)?;
        if let Some(error) = response.error {
            return Err(ClientError::Handshake(error));
        }
        return Ok(records.map(str::to_string).collect());
    }
}

/// Owns the websocket after the handshake: forwards events, sends pings and
/// closes the socket when asked to.
///
/// `shutdown` is dropped before `events`, so once the event channel reports
/// closed the handler already sees the connection as gone.
async fn run_connection<S, E>(
    ws: S,
    pending: Vec<String>,
    events: mpsc::Sender<HubEvent>,
    shutdown: oneshot::Receiver<()>,
    keep_alive: Duration,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    let mut shutdown = shutdown;
    drive_connection(ws, &pending, &events, &mut shutdown, keep_alive).await;
    drop(shutdown);
    drop(events);
}

async fn drive_connection<S, E>(
    mut ws: S,
    pending: &[String],
    events: &mpsc::Sender<HubEvent>,
    shutdown: &mut oneshot::Receiver<()>,
    keep_alive: Duration,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    for record in pending {
        if !dispatch_record(record, events).await {
            return;
        }
    }

    let keep_alive = effective_keep_alive(keep_alive);
    let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);

    loop {
        select! {
            _ = &mut *shutdown => {
                debug!("closing hub connection");
                if let Err(error) = ws.send(Message::Close(None)).await {
                    debug!(%error, "failed to send close frame");
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(error) = ws.send(Message::Text(PING_RECORD.to_string())).await {
                    let _ = events.send(HubEvent::Closed { error: Some(error.to_string()) }).await;
                    break;
                }
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let mut open = true;
                        for record in split_records(&text) {
                            if !dispatch_record(record, events).await {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "hub closed the websocket");
                        let _ = events.send(HubEvent::Closed { error: None }).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%error, "hub connection failed");
                        let _ = events.send(HubEvent::Closed { error: Some(error.to_string()) }).await;
                        break;
                    }
                    None => {
                        let _ = events.send(HubEvent::Closed { error: None }).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Handles one hub record. Returns `false` when the connection should stop.
async fn dispatch_record(record: &str, events: &mpsc::Sender<HubEvent>) -> bool {
    let frame = match HubFrame::decode(record) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%error, record, "ignoring undecodable hub frame");
            return true;
        }
    };

    match frame {
        HubFrame::Invocation { target, arguments } => {
            if !target.eq_ignore_ascii_case(SEND_MESSAGE_TARGET) {
                debug!(%target, "no handler registered for target");
                return true;
            }
            match message_arguments(&arguments) {
                Some((server, message)) => {
                    // Receiver gone means nobody is listening; stop reading.
                    events
                        .send(HubEvent::Message { server, message })
                        .await
                        .is_ok()
                }
                None => {
                    warn!(?arguments, "SendMessage expects two string arguments");
                    true
                }
            }
        }
        HubFrame::Ping => true,
        HubFrame::Close { error } => {
            let _ = events.send(HubEvent::Closed { error }).await;
            false
        }
        HubFrame::Other(kind) => {
            debug!(kind, "ignoring hub frame");
            true
        }
    }
}

fn message_arguments(arguments: &[Value]) -> Option<(String, String)> {
    match arguments {
        [Value::String(server), Value::String(message)] => Some((server.clone(), message.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Role};

    fn service() -> ServiceEndpoint {
        ServiceEndpoint::parse("Endpoint=https://demo.example.net;AccessKey=key").expect("valid")
    }

    #[test]
    fn builds_client_url_from_endpoint() {
        let handler = ClientHandler::with_client(service(), "Chat", "alice", reqwest::Client::new());
        assert_eq!(handler.client_url(), "https://demo.example.net/client/?hub=Chat");
        assert_eq!(handler.user_id(), "alice");
    }

    #[test]
    fn rejects_malformed_connection_string() {
        let result = ClientHandler::new("Endpoint=https://demo.example.net", "chat", "alice");
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::MissingField("AccessKey")))
        ));
    }

    #[test]
    fn negotiate_url_appends_segment_and_version() {
        let url = negotiate_url("https://demo.example.net/client/?hub=chat").unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.example.net/client/negotiate?hub=chat&negotiateVersion=1"
        );
    }

    #[test]
    fn websocket_url_switches_scheme_and_carries_credentials() {
        let url = websocket_url("https://demo.example.net/client/?hub=chat", "conn-1", "t0k").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://demo.example.net/client/?hub=chat&id=conn-1&access_token=t0k"
        );

        let plain = websocket_url("http://127.0.0.1:8080/client/?hub=chat", "c", "t").unwrap();
        assert_eq!(plain.scheme(), "ws");

        assert!(websocket_url("ftp://demo/client/", "c", "t").is_err());
    }

    #[test]
    fn token_provider_signs_for_client_url() {
        let provider = AccessTokenProvider::new(
            service(),
            "https://demo.example.net/client/?hub=chat".into(),
            "alice".into(),
        );
        let first = provider.token().expect("token");
        assert_eq!(first.split('.').count(), 3);
    }

    #[test]
    fn formats_received_line() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            format_received("serverA", "hi", at),
            "[2024-05-01 12:30:00] Received message from server serverA: hi"
        );
    }

    #[test]
    fn extracts_two_string_arguments_only() {
        assert_eq!(
            message_arguments(&[json!("a"), json!("b")]),
            Some(("a".into(), "b".into()))
        );
        assert_eq!(message_arguments(&[json!("a")]), None);
        assert_eq!(message_arguments(&[json!("a"), json!(1)]), None);
    }

    #[tokio::test]
    async fn dispatch_forwards_send_message_and_stops_on_close() {
        let (tx, mut rx) = mpsc::channel(8);

        assert!(
            dispatch_record(
                r#"{"type":1,"target":"SendMessage","arguments":["serverA","hi"]}"#,
                &tx
            )
            .await
        );
        assert!(dispatch_record(r#"{"type":1,"target":"Other","arguments":[]}"#, &tx).await);
        assert!(dispatch_record(r#"{"type":6}"#, &tx).await);
        assert!(dispatch_record("not json", &tx).await);
        assert!(!dispatch_record(r#"{"type":7,"error":"bye"}"#, &tx).await);

        assert_eq!(
            rx.recv().await,
            Some(HubEvent::Message {
                server: "serverA".into(),
                message: "hi".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(HubEvent::Closed {
                error: Some("bye".into())
            })
        );
    }

    async fn socket_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client_io, hub_io) = tokio::io::duplex(4096);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let hub = WebSocketStream::from_raw_socket(hub_io, Role::Server, None).await;
        (client, hub)
    }

    #[tokio::test]
    async fn handshake_returns_frames_sent_alongside_response() {
        let (mut client, mut hub) = socket_pair().await;

        let hub_task = tokio::spawn(async move {
            let request = hub.next().await.expect("handshake").expect("frame");
            assert_eq!(
                request,
                Message::Text("{\"protocol\":\"json\",\"version\":1}\u{1e}".into())
            );
            hub.send(Message::Text("{}\u{1e}{\"type\":6}\u{1e}".into()))
                .await
                .expect("send response");
            hub
        });

        let pending = handshake(&mut client, Duration::from_secs(1))
            .await
            .expect("handshake succeeds");
        assert_eq!(pending, vec!["{\"type\":6}".to_string()]);
        drop(hub_task.await.unwrap());
    }

    #[tokio::test]
    async fn handshake_error_is_reported() {
        let (mut client, mut hub) = socket_pair().await;

        tokio::spawn(async move {
            let _ = hub.next().await;
            let _ = hub
                .send(Message::Text("{\"error\":\"nope\"}\u{1e}".into()))
                .await;
            let _ = hub.next().await;
        });

        let err = handshake(&mut client, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Handshake(message) if message == "nope"));
    }

    #[tokio::test]
    async fn connection_delivers_events_in_order_and_pings() {
        let (client, mut hub) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            client,
            Vec::new(),
            events_tx,
            shutdown_rx,
            Duration::from_millis(50),
        ));

        hub.send(Message::Text(
            "{\"type\":1,\"target\":\"SendMessage\",\"arguments\":[\"s1\",\"one\"]}\u{1e}\
             {\"type\":1,\"target\":\"SendMessage\",\"arguments\":[\"s1\",\"two\"]}\u{1e}"
                .into(),
        ))
        .await
        .unwrap();

        let first = timeout(Duration::from_secs(1), events_rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(1), events_rx.recv()).await.unwrap();
        assert_eq!(
            first,
            Some(HubEvent::Message {
                server: "s1".into(),
                message: "one".into()
            })
        );
        assert_eq!(
            second,
            Some(HubEvent::Message {
                server: "s1".into(),
                message: "two".into()
            })
        );

        let ping = timeout(Duration::from_secs(1), hub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(ping, Message::Text("{\"type\":6}\u{1e}".into()));

        hub.send(Message::Text("{\"type\":7}\u{1e}".into()))
            .await
            .unwrap();
        let closed = timeout(Duration::from_secs(1), events_rx.recv()).await.unwrap();
        assert_eq!(closed, Some(HubEvent::Closed { error: None }));
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_sends_close_frame() {
        let (client, mut hub) = socket_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            client,
            Vec::new(),
            events_tx,
            shutdown_rx,
            Duration::from_secs(60),
        ));
        shutdown_tx.send(()).unwrap();

        let frame = timeout(Duration::from_secs(1), hub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Message::Close(_)));
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_times_out_when_hub_stays_silent() {
        let (mut client, mut hub) = socket_pair().await;

        let hub_task = tokio::spawn(async move {
            let _ = hub.next().await;
            // Hold the socket open without answering.
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let err = handshake(&mut client, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Handshake(message) if message.contains("no handshake response")
        ));
        hub_task.abort();
    }

    #[test]
    fn zero_keep_alive_falls_back_to_default() {
        let handler = ClientHandler::with_client(service(), "chat", "alice", reqwest::Client::new())
            .keep_alive(Duration::ZERO);
        assert_eq!(handler.keep_alive, DEFAULT_KEEP_ALIVE);

        let handler = ClientHandler::with_client(service(), "chat", "alice", reqwest::Client::new())
            .keep_alive(Duration::from_secs(5));
        assert_eq!(handler.keep_alive, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_keep_alive_connection_still_runs_and_reports_close() {
        let (client, mut hub) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            client,
            Vec::new(),
            events_tx,
            shutdown_rx,
            Duration::ZERO,
        ));

        hub.send(Message::Text("{\"type\":7,\"error\":\"done\"}\u{1e}".into()))
            .await
            .unwrap();
        let closed = timeout(Duration::from_secs(1), events_rx.recv()).await.unwrap();
        assert_eq!(
            closed,
            Some(HubEvent::Closed {
                error: Some("done".into())
            })
        );
        timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .expect("connection task must not panic");
    }

    #[tokio::test]
    async fn pending_records_are_dispatched_before_reading() {
        let (client, _hub) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            client,
            vec![
                "{\"type\":1,\"target\":\"SendMessage\",\"arguments\":[\"s\",\"early\"]}".to_string(),
                "{\"type\":7}".to_string(),
            ],
            events_tx,
            shutdown_rx,
            Duration::from_secs(60),
        ));

        assert_eq!(
            events_rx.recv().await,
            Some(HubEvent::Message {
                server: "s".into(),
                message: "early".into()
            })
        );
        assert_eq!(events_rx.recv().await, Some(HubEvent::Closed { error: None }));
        assert_eq!(events_rx.recv().await, None);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
