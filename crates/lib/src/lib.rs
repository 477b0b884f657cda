//! LINE relay library: webhook events in, completion-service replies out.
//!
//! Shared by the CLI; the gateway wires the LINE and completion clients into the relay.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod relay;
