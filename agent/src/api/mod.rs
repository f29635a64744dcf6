//! Server API client

pub mod auth;
pub mod client;
pub mod deployments;
pub mod inventory;

pub use client::{response_error, ApiClient};
pub use deployments::{DeploymentDescriptor, DeploymentStatus};
