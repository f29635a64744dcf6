//! Over-the-air update agent.
//!
//! Connects an embedded device to an update server: authenticates with a
//! signed identity, negotiates pending deployments, streams and verifies
//! the artifact container incrementally and hands payload bytes to
//! pluggable update modules, reporting the deployment lifecycle back to
//! the server throughout.
//!
//! The entry point is [`client::UpdateClient`]; everything else is the
//! machinery it drives and is public for callers that want to compose
//! the pieces themselves.

pub mod api;
pub mod artifact;
pub mod client;
pub mod config;
pub mod crypto;
pub mod download;
pub mod errors;
pub mod installer;
pub mod keyvalue;
pub mod logs;

pub use client::UpdateClient;
pub use config::Settings;
pub use errors::AgentError;
