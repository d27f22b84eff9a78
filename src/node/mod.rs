//! Node agent
//!
//! Device listing and initialization on one node, plus the controllers
//! that react to Node refresh requests and InitRequests.

pub mod agent;
pub mod controller;
pub mod metrics;

pub use agent::{
    InitDevicesRequest, InitDevicesResponse, ListDevicesRequest, ListDevicesResponse, NodeAgent,
    NodeAgentConfig,
};
pub use controller::{InitRequestController, NodeController};
pub use metrics::NodeMetrics;
