//! Botfleet Gateway - control-surface WebSocket server

pub mod control;
pub mod server;
pub mod ws;

pub use control::FleetControl;
pub use server::{build_router, serve_listener, start_gateway, GatewayState};
