//! # MAV Bridge Library
//!
//! Mirror a MAVLink vehicle behind a JSON API.
//!
//! The bridge keeps one session with an autopilot alive, mirrors its
//! telemetry, parameters, mission plan, geofence and rally points into a
//! shared store, and relays validated commands from HTTP clients back to
//! the vehicle.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod http;
pub mod link;
pub mod protocol;
pub mod relay;
pub mod store;
pub mod sync;
