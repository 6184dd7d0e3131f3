//! # Send-by-Name Registry
//!
//! Maps an upper-case message name to its positional argument layout and an
//! encoder. Arguments follow the field order of the message definition,
//! target fields included. Extension fields are not part of the generated
//! dialect and are never sent.

use std::collections::BTreeMap;

use mavlink::ardupilotmega::{
    MavCmd, MavMode, FENCE_FETCH_POINT_DATA, MANUAL_CONTROL_DATA, MISSION_CLEAR_ALL_DATA,
    MISSION_REQUEST_LIST_DATA, MISSION_SET_CURRENT_DATA, PARAM_REQUEST_LIST_DATA,
    RALLY_FETCH_POINT_DATA, RC_CHANNELS_OVERRIDE_DATA, REQUEST_DATA_STREAM_DATA, SET_MODE_DATA,
};
use num_traits::FromPrimitive;

use super::dialect::MavMessage;
use super::encoder::{self, CommandInt, CommandLong};
use super::Target;
use crate::error::{BridgeError, Result};

/// Wire type of one positional argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl FieldKind {
    /// Whether `value` is representable by this field type
    pub fn accepts(self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let (min, max) = match self {
            FieldKind::F32 => return value.abs() <= f64::from(f32::MAX),
            FieldKind::U8 => (0.0, f64::from(u8::MAX)),
            FieldKind::U16 => (0.0, f64::from(u16::MAX)),
            FieldKind::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            FieldKind::U32 => (0.0, f64::from(u32::MAX)),
            FieldKind::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
        };
        value.fract() == 0.0 && value >= min && value <= max
    }
}

/// Validated positional arguments
struct Args<'a>(&'a [f64]);

impl Args<'_> {
    fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or_default()
    }

    fn u8(&self, index: usize) -> u8 {
        self.get(index) as u8
    }

    fn u16(&self, index: usize) -> u16 {
        self.get(index) as u16
    }

    fn i16(&self, index: usize) -> i16 {
        self.get(index) as i16
    }

    fn u32(&self, index: usize) -> u32 {
        self.get(index) as u32
    }

    fn i32(&self, index: usize) -> i32 {
        self.get(index) as i32
    }

    fn f32(&self, index: usize) -> f32 {
        self.get(index) as f32
    }

    fn target(&self, index: usize) -> Target {
        Target { system: self.u8(index), component: self.u8(index + 1) }
    }
}

type Build = fn(&Args<'_>) -> Result<MavMessage>;

/// One sendable message
pub struct MessageSpec {
    pub fields: &'static [(&'static str, FieldKind)],
    build: Build,
}

impl std::fmt::Debug for MessageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSpec").field("fields", &self.fields).finish()
    }
}

use FieldKind::*;

const TARGET_FIELDS: &[(&str, FieldKind)] = &[("target_system", U8), ("target_component", U8)];

const COMMAND_LONG_FIELDS: &[(&str, FieldKind)] = &[
    ("target_system", U8),
    ("target_component", U8),
    ("command", U16),
    ("confirmation", U8),
    ("param1", F32),
    ("param2", F32),
    ("param3", F32),
    ("param4", F32),
    ("param5", F32),
    ("param6", F32),
    ("param7", F32),
];

const COMMAND_INT_FIELDS: &[(&str, FieldKind)] = &[
    ("target_system", U8),
    ("target_component", U8),
    ("frame", U8),
    ("command", U16),
    ("current", U8),
    ("autocontinue", U8),
    ("param1", F32),
    ("param2", F32),
    ("param3", F32),
    ("param4", F32),
    ("x", I32),
    ("y", I32),
    ("z", F32),
];

const SET_MODE_FIELDS: &[(&str, FieldKind)] =
    &[("target_system", U8), ("base_mode", U8), ("custom_mode", U32)];

const MISSION_SET_CURRENT_FIELDS: &[(&str, FieldKind)] =
    &[("target_system", U8), ("target_component", U8), ("seq", U16)];

const REQUEST_DATA_STREAM_FIELDS: &[(&str, FieldKind)] = &[
    ("target_system", U8),
    ("target_component", U8),
    ("req_stream_id", U8),
    ("req_message_rate", U16),
    ("start_stop", U8),
];

const MANUAL_CONTROL_FIELDS: &[(&str, FieldKind)] = &[
    ("target", U8),
    ("x", I16),
    ("y", I16),
    ("z", I16),
    ("r", I16),
    ("buttons", U16),
];

const RC_CHANNELS_OVERRIDE_FIELDS: &[(&str, FieldKind)] = &[
    ("target_system", U8),
    ("target_component", U8),
    ("chan1_raw", U16),
    ("chan2_raw", U16),
    ("chan3_raw", U16),
    ("chan4_raw", U16),
    ("chan5_raw", U16),
    ("chan6_raw", U16),
    ("chan7_raw", U16),
    ("chan8_raw", U16),
];

const FETCH_POINT_FIELDS: &[(&str, FieldKind)] =
    &[("target_system", U8), ("target_component", U8), ("idx", U8)];

fn build_command_long(args: &Args<'_>) -> Result<MavMessage> {
    let mut params = [0.0f32; 7];
    for (i, param) in params.iter_mut().enumerate() {
        *param = args.f32(4 + i);
    }
    encoder::command_long(
        args.target(0),
        &CommandLong { command: args.u16(2), confirmation: args.u8(3), params },
    )
}

fn build_command_int(args: &Args<'_>) -> Result<MavMessage> {
    encoder::command_int(
        args.target(0),
        &CommandInt {
            frame: args.u8(2),
            command: args.u16(3),
            current: args.u8(4),
            autocontinue: args.u8(5),
            params: [args.f32(6), args.f32(7), args.f32(8), args.f32(9)],
            x: args.i32(10),
            y: args.i32(11),
            z: args.f32(12),
        },
    )
}

/// SET_MODE, or MAV_CMD_DO_SET_MODE when `base_mode` is a flag combination
///
/// The dialect types SET_MODE's `base_mode` as a MAV_MODE value, which
/// cannot hold flag sets such as MAV_MODE_FLAG_CUSTOM_MODE_ENABLED (1).
/// Autopilots handle both messages with the same mode switch.
fn build_set_mode(args: &Args<'_>) -> Result<MavMessage> {
    let Some(base_mode) = MavMode::from_u8(args.u8(1)) else {
        let params = [args.f32(1), args.u32(2) as f32, 0.0, 0.0, 0.0, 0.0, 0.0];
        return encoder::command_long(
            Target { system: args.u8(0), component: 0 },
            &CommandLong { command: MavCmd::MAV_CMD_DO_SET_MODE as u16, confirmation: 0, params },
        );
    };

    Ok(MavMessage::SET_MODE(SET_MODE_DATA {
        custom_mode: args.u32(2),
        target_system: args.u8(0),
        base_mode,
    }))
}

fn build_mission_set_current(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::MISSION_SET_CURRENT(MISSION_SET_CURRENT_DATA {
        seq: args.u16(2),
        target_system: args.u8(0),
        target_component: args.u8(1),
    }))
}

fn build_mission_clear_all(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
        target_system: args.u8(0),
        target_component: args.u8(1),
    }))
}

fn build_mission_request_list(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
        target_system: args.u8(0),
        target_component: args.u8(1),
    }))
}

fn build_param_request_list(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
        target_system: args.u8(0),
        target_component: args.u8(1),
    }))
}

fn build_request_data_stream(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        req_message_rate: args.u16(3),
        target_system: args.u8(0),
        target_component: args.u8(1),
        req_stream_id: args.u8(2),
        start_stop: args.u8(4),
    }))
}

fn build_manual_control(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::MANUAL_CONTROL(MANUAL_CONTROL_DATA {
        x: args.i16(1),
        y: args.i16(2),
        z: args.i16(3),
        r: args.i16(4),
        buttons: args.u16(5),
        target: args.u8(0),
    }))
}

fn build_rc_channels_override(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::RC_CHANNELS_OVERRIDE(RC_CHANNELS_OVERRIDE_DATA {
        chan1_raw: args.u16(2),
        chan2_raw: args.u16(3),
        chan3_raw: args.u16(4),
        chan4_raw: args.u16(5),
        chan5_raw: args.u16(6),
        chan6_raw: args.u16(7),
        chan7_raw: args.u16(8),
        chan8_raw: args.u16(9),
        target_system: args.u8(0),
        target_component: args.u8(1),
    }))
}

fn build_fence_fetch_point(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::FENCE_FETCH_POINT(FENCE_FETCH_POINT_DATA {
        target_system: args.u8(0),
        target_component: args.u8(1),
        idx: args.u8(2),
    }))
}

fn build_rally_fetch_point(args: &Args<'_>) -> Result<MavMessage> {
    Ok(MavMessage::RALLY_FETCH_POINT(RALLY_FETCH_POINT_DATA {
        target_system: args.u8(0),
        target_component: args.u8(1),
        idx: args.u8(2),
    }))
}

/// Registry of messages that can be sent by name
#[derive(Debug)]
pub struct Registry {
    entries: BTreeMap<&'static str, MessageSpec>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Build the registry of every message sendable by name
    pub fn new() -> Self {
        let table: [(&'static str, &'static [(&'static str, FieldKind)], Build); 12] = [
            ("COMMAND_LONG", COMMAND_LONG_FIELDS, build_command_long),
            ("COMMAND_INT", COMMAND_INT_FIELDS, build_command_int),
            ("SET_MODE", SET_MODE_FIELDS, build_set_mode),
            ("MISSION_SET_CURRENT", MISSION_SET_CURRENT_FIELDS, build_mission_set_current),
            ("MISSION_CLEAR_ALL", TARGET_FIELDS, build_mission_clear_all),
            ("MISSION_REQUEST_LIST", TARGET_FIELDS, build_mission_request_list),
            ("PARAM_REQUEST_LIST", TARGET_FIELDS, build_param_request_list),
            ("REQUEST_DATA_STREAM", REQUEST_DATA_STREAM_FIELDS, build_request_data_stream),
            ("MANUAL_CONTROL", MANUAL_CONTROL_FIELDS, build_manual_control),
            ("RC_CHANNELS_OVERRIDE", RC_CHANNELS_OVERRIDE_FIELDS, build_rc_channels_override),
            ("FENCE_FETCH_POINT", FETCH_POINT_FIELDS, build_fence_fetch_point),
            ("RALLY_FETCH_POINT", FETCH_POINT_FIELDS, build_rally_fetch_point),
        ];

        let entries = table
            .into_iter()
            .map(|(name, fields, build)| (name, MessageSpec { fields, build }))
            .collect();

        Self { entries }
    }

    /// Names of every registered message
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn get(&self, name: &str) -> Option<&MessageSpec> {
        self.entries.get(name.to_ascii_uppercase().as_str())
    }

    /// Encode a message from its name and positional content
    ///
    /// # Arguments
    ///
    /// * `name` - Message name, case insensitive
    /// * `content` - Field values in message definition order
    ///
    /// # Returns
    ///
    /// * `Result<MavMessage>` - Encoded message ready to send
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Codec`] if:
    /// - The name is not registered
    /// - The number of values does not match the message
    /// - A value is out of range or not integral for an integer field
    /// - An enum field has no matching dialect value
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_bridge::protocol::registry::Registry;
    ///
    /// let registry = Registry::new();
    /// assert!(registry.encode("param_request_list", &[1.0, 1.0]).is_ok());
    /// assert!(registry.encode("PARAM_REQUEST_LIST", &[1.0]).is_err());
    /// assert!(registry.encode("NOT_A_MESSAGE", &[]).is_err());
    /// ```
    pub fn encode(&self, name: &str, content: &[f64]) -> Result<MavMessage> {
        let spec = self
            .get(name)
            .ok_or_else(|| BridgeError::Codec(format!("message {} cannot be sent by name", name)))?;

        if content.len() != spec.fields.len() {
            return Err(BridgeError::Codec(format!(
                "{} takes {} values, got {}",
                name,
                spec.fields.len(),
                content.len()
            )));
        }

        for ((field, kind), value) in spec.fields.iter().zip(content) {
            if !kind.accepts(*value) {
                return Err(BridgeError::Codec(format!("{} out of range for {}", value, field)));
            }
        }

        (spec.build)(&Args(content))
    }
}
