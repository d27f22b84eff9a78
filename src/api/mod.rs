//! Node API
//!
//! Authenticated HTTP channel from admin operations to a node agent:
//! device listing and formatting, signed with the shared credential.

pub mod client;
pub mod rest;
pub mod server;
pub mod signer;

pub use client::NodeApiClient;
pub use rest::{ApiErrorResponse, NodeApiRouter, FORMAT_DEVICES_PATH, LIST_DEVICES_PATH};
pub use server::{NodeApiServer, NodeApiServerConfig};
