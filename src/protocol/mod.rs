//! # MAVLink Protocol Module
//!
//! Wire vocabulary shared by the ingestion core and the command relay.
//!
//! This module handles:
//! - Message and parameter names the bridge depends on
//! - Decoding inbound MAVLink messages into [`frame::Frame`] values
//! - Plan, fence, rally and parameter item types
//! - Encoding the request/upload messages sent to the vehicle
//! - The send-by-name message registry
//!
//! Field decoding of the full message catalog is delegated to the
//! `mavlink` crate (ArduPilot dialect, MAVLink 2 framing).

pub mod encoder;
pub mod frame;
pub mod items;
pub mod names;
pub mod registry;

/// MAVLink dialect used on the wire
pub use mavlink::ardupilotmega as dialect;

/// Addressing of the vehicle that outbound messages are sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub system: u8,
    pub component: u8,
}

impl Default for Target {
    fn default() -> Self {
        Self { system: 1, component: 1 }
    }
}
