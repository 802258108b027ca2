//! Console server and client for a serverless realtime hub.
//!
//! The hub service does all the fan-out; this crate only talks to it:
//!
//! - [`auth`] parses the hub connection string and signs access tokens.
//! - [`command`] turns stdin lines into the four supported hub operations.
//! - [`server`] maps those operations onto the hub REST API and runs the
//!   one-command-at-a-time console loop.
//! - [`client`] negotiates a websocket connection for a user and turns
//!   incoming `SendMessage` invocations into a stream of events.
//! - [`message`] holds the REST payload and the JSON hub-protocol frames.
//! - [`cli`] defines the command-line interface for both modes.

pub mod auth;
pub mod cli;
pub mod client;
pub mod command;
pub mod message;
pub mod server;
