#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::Value;
use tokio::net::TcpListener;

pub const ACCESS_KEY: &str = "bW9jay1odWIta2V5";

/// One REST call as seen by the mock hub.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone)]
struct HubState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    status: StatusCode,
}

/// Hub management API stand-in that records every call and answers with a
/// fixed status.
pub struct RecordingHub {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RecordingHub {
    pub async fn start(status: StatusCode) -> Result<Self> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = HubState {
            requests: Arc::clone(&requests),
            status,
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, requests })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connection_string(&self) -> String {
        connection_string_for(&self.endpoint())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

pub fn connection_string_for(endpoint: &str) -> String {
    format!("Endpoint={endpoint};AccessKey={ACCESS_KEY};Version=1.0;")
}

async fn record(
    State(state): State<HubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    state
        .requests
        .lock()
        .expect("requests lock")
        .push(RecordedRequest {
            method,
            path: uri.path().to_string(),
            authorization: header_value(header::AUTHORIZATION),
            accept: header_value(header::ACCEPT),
            body,
        });

    state.status
}

/// Verifies a `Bearer` header against the mock key and returns its claims.
pub fn verify_bearer(authorization: &str, audience: &str) -> Value {
    let token = authorization
        .strip_prefix("Bearer ")
        .expect("bearer authorization");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    decode::<Value>(
        token,
        &DecodingKey::from_secret(ACCESS_KEY.as_bytes()),
        &validation,
    )
    .expect("token signed with the hub key")
    .claims
}
