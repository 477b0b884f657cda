//! Gateway: HTTP entry point.
//!
//! Serves a health probe and the webhook the chat platform posts deliveries to.

mod server;

pub use server::{router, run_gateway, GatewayState, WEBHOOK_PATH};
