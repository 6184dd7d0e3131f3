//! # Outbound Message Encoding
//!
//! Builders for every message the bridge sends to the vehicle. Plain numeric
//! values coming from HTTP payloads are converted into the dialect's typed
//! enums here; values with no matching enum variant are reported as
//! [`BridgeError::Codec`].
//!
//! The generated dialect has no MAVLink 2 extension fields. Mission protocol
//! messages therefore go out without `mission_type`, which receivers read
//! as zero: the mission plan.

use mavlink::ardupilotmega::{
    MavAutopilot, MavCmd, MavDataStream, MavFrame, MavModeFlag, MavParamType,
    MavState, MavType, RallyFlags, COMMAND_INT_DATA, COMMAND_LONG_DATA, FENCE_FETCH_POINT_DATA,
    FENCE_POINT_DATA, HEARTBEAT_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA,
    MISSION_ITEM_INT_DATA, MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA,
    PARAM_REQUEST_LIST_DATA, PARAM_REQUEST_READ_DATA, PARAM_SET_DATA, RALLY_FETCH_POINT_DATA,
    RALLY_POINT_DATA, REQUEST_DATA_STREAM_DATA,
};
use num_traits::FromPrimitive;

use super::dialect::MavMessage;
use super::frame::param_id_from_str;
use super::items::{FenceItem, MissionItem, RallyItem};
use super::Target;
use crate::error::{BridgeError, Result};

/// MAVLink protocol version advertised in the heartbeat
const MAVLINK_VERSION: u8 = 3;

/// Start flag of REQUEST_DATA_STREAM
const STREAM_START: u8 = 1;

/// Ground control station heartbeat sent in reply to every vehicle heartbeat
pub fn heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: MAVLINK_VERSION,
    })
}

pub fn param_request_list(target: Target) -> MavMessage {
    MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
        target_system: target.system,
        target_component: target.component,
    })
}

/// Request one parameter by index
///
/// # Errors
///
/// Returns [`BridgeError::Codec`] if `index` does not fit the signed
/// `param_index` field
pub fn param_request_index(target: Target, index: u16) -> Result<MavMessage> {
    let param_index = i16::try_from(index)
        .map_err(|_| BridgeError::Codec(format!("parameter index {} out of range", index)))?;

    Ok(MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
        param_index,
        target_system: target.system,
        target_component: target.component,
        param_id: [0u8; 16],
    }))
}

/// Request one parameter by name
pub fn param_request_name(target: Target, name: &str) -> MavMessage {
    MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
        param_index: -1,
        target_system: target.system,
        target_component: target.component,
        param_id: param_id_from_str(name),
    })
}

/// Set one parameter
///
/// # Arguments
///
/// * `target` - Vehicle address
/// * `name` - Parameter name, at most 16 characters
/// * `value` - New value
/// * `param_type` - MAV_PARAM_TYPE of the value
///
/// # Errors
///
/// Returns [`BridgeError::Codec`] if `param_type` is not a MAV_PARAM_TYPE
pub fn param_set(target: Target, name: &str, value: f32, param_type: u8) -> Result<MavMessage> {
    let param_type = MavParamType::from_u8(param_type)
        .ok_or_else(|| BridgeError::Codec(format!("unknown param_type {}", param_type)))?;

    Ok(MavMessage::PARAM_SET(PARAM_SET_DATA {
        param_value: value,
        target_system: target.system,
        target_component: target.component,
        param_id: param_id_from_str(name),
        param_type,
    }))
}

/// Set one REAL32 parameter
pub fn param_set_real(target: Target, name: &str, value: f32) -> MavMessage {
    MavMessage::PARAM_SET(PARAM_SET_DATA {
        param_value: value,
        target_system: target.system,
        target_component: target.component,
        param_id: param_id_from_str(name),
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    })
}

pub fn mission_request_list(target: Target) -> MavMessage {
    MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
        target_system: target.system,
        target_component: target.component,
    })
}

pub fn mission_request_int(target: Target, seq: u16) -> MavMessage {
    MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
        seq,
        target_system: target.system,
        target_component: target.component,
    })
}

pub fn mission_clear_all(target: Target) -> MavMessage {
    MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
        target_system: target.system,
        target_component: target.component,
    })
}

pub fn mission_count(target: Target, count: u16) -> MavMessage {
    MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        count,
        target_system: target.system,
        target_component: target.component,
    })
}

/// Encode a staged plan item as MISSION_ITEM_INT
///
/// The item's own target fields are replaced by `target`.
///
/// # Errors
///
/// Returns [`BridgeError::Codec`] if `frame` or `command` has no dialect value
pub fn mission_item_int(target: Target, item: &MissionItem) -> Result<MavMessage> {
    let frame = MavFrame::from_u8(item.frame)
        .ok_or_else(|| BridgeError::Codec(format!("unknown frame {}", item.frame)))?;
    let command = MavCmd::from_u16(item.command)
        .ok_or_else(|| BridgeError::Codec(format!("unknown command {}", item.command)))?;

    Ok(MavMessage::MISSION_ITEM_INT(MISSION_ITEM_INT_DATA {
        param1: item.param1,
        param2: item.param2,
        param3: item.param3,
        param4: item.param4,
        x: item.x,
        y: item.y,
        z: item.z,
        seq: item.seq,
        command,
        target_system: target.system,
        target_component: target.component,
        frame,
        current: item.current,
        autocontinue: item.autocontinue,
    }))
}

pub fn fence_fetch_point(target: Target, idx: u8) -> MavMessage {
    MavMessage::FENCE_FETCH_POINT(FENCE_FETCH_POINT_DATA {
        target_system: target.system,
        target_component: target.component,
        idx,
    })
}

pub fn fence_point(target: Target, item: &FenceItem) -> MavMessage {
    MavMessage::FENCE_POINT(FENCE_POINT_DATA {
        lat: item.lat,
        lng: item.lng,
        target_system: target.system,
        target_component: target.component,
        idx: item.idx,
        count: item.count,
    })
}

pub fn rally_fetch_point(target: Target, idx: u8) -> MavMessage {
    MavMessage::RALLY_FETCH_POINT(RALLY_FETCH_POINT_DATA {
        target_system: target.system,
        target_component: target.component,
        idx,
    })
}

pub fn rally_point(target: Target, item: &RallyItem) -> MavMessage {
    MavMessage::RALLY_POINT(RALLY_POINT_DATA {
        lat: item.lat,
        lng: item.lng,
        alt: item.alt,
        break_alt: item.break_alt,
        land_dir: item.land_dir,
        target_system: target.system,
        target_component: target.component,
        idx: item.idx,
        count: item.count,
        flags: RallyFlags::from_bits_truncate(item.flags),
    })
}

/// Request every data stream at `rate` Hz
pub fn request_data_stream(target: Target, rate: u16) -> MavMessage {
    MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        req_message_rate: rate,
        target_system: target.system,
        target_component: target.component,
        req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
        start_stop: STREAM_START,
    })
}

/// MAV_CMD_SET_MESSAGE_INTERVAL for `message_id`
///
/// A positive `hz` requests the message at that rate, `None` stops it.
pub fn set_message_interval(target: Target, message_id: u32, hz: Option<f64>) -> MavMessage {
    let interval_us = match hz {
        Some(hz) if hz > 0.0 => (1e6 / hz) as f32,
        _ => -1.0,
    };

    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        param1: message_id as f32,
        param2: interval_us,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
        command: MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
        target_system: target.system,
        target_component: target.component,
        confirmation: 0,
    })
}

/// Parameters of COMMAND_LONG, in message definition order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLong {
    pub command: u16,
    pub confirmation: u8,
    pub params: [f32; 7],
}

/// Parameters of COMMAND_INT, in message definition order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandInt {
    pub frame: u8,
    pub command: u16,
    pub current: u8,
    pub autocontinue: u8,
    pub params: [f32; 4],
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

/// # Errors
///
/// Returns [`BridgeError::Codec`] if `command` is not a MAV_CMD
pub fn command_long(target: Target, cmd: &CommandLong) -> Result<MavMessage> {
    let command = MavCmd::from_u16(cmd.command)
        .ok_or_else(|| BridgeError::Codec(format!("unknown command {}", cmd.command)))?;
    let [param1, param2, param3, param4, param5, param6, param7] = cmd.params;

    Ok(MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        param1,
        param2,
        param3,
        param4,
        param5,
        param6,
        param7,
        command,
        target_system: target.system,
        target_component: target.component,
        confirmation: cmd.confirmation,
    }))
}

/// # Errors
///
/// Returns [`BridgeError::Codec`] if `frame` or `command` has no dialect value
pub fn command_int(target: Target, cmd: &CommandInt) -> Result<MavMessage> {
    let frame = MavFrame::from_u8(cmd.frame)
        .ok_or_else(|| BridgeError::Codec(format!("unknown frame {}", cmd.frame)))?;
    let command = MavCmd::from_u16(cmd.command)
        .ok_or_else(|| BridgeError::Codec(format!("unknown command {}", cmd.command)))?;
    let [param1, param2, param3, param4] = cmd.params;

    Ok(MavMessage::COMMAND_INT(COMMAND_INT_DATA {
        param1,
        param2,
        param3,
        param4,
        x: cmd.x,
        y: cmd.y,
        z: cmd.z,
        command,
        target_system: target.system,
        target_component: target.component,
        frame,
        current: cmd.current,
        autocontinue: cmd.autocontinue,
    }))
}
