//! # Decoded Frames
//!
//! Converts inbound MAVLink messages into [`Frame`] values: the message name
//! and id, the sender's address, a JSON view of every field, and a typed
//! [`FrameKind`] for the control-plane messages the sync engines consume.
//!
//! The generated dialect carries no extension fields. The mission protocol
//! messages still need `mission_type` to tell plan, fence and rally traffic
//! apart, so it is read from the raw payload right after the base fields.
//! A payload that stops short of it reads as 0 (mission).

use mavlink::{MavHeader, Message};
use serde_json::{Map, Value};

use super::dialect::{
    MavMessage, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_DATA,
    MISSION_ITEM_INT_DATA, MISSION_REQUEST_DATA, MISSION_REQUEST_INT_DATA,
    MISSION_REQUEST_LIST_DATA,
};
use super::items::{FenceItem, MissionItem, ParamEntry, RallyItem};
use super::names;

/// Typed view of the messages the classifier dispatches on
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Heartbeat,
    HomePosition,
    ParamValue(ParamEntry),
    MissionCount { count: u16, mission_type: u8 },
    MissionItem(MissionItem),
    MissionAck { result: u8, mission_type: u8 },
    /// MISSION_REQUEST or MISSION_REQUEST_INT from the vehicle
    MissionRequest { seq: u16, mission_type: u8 },
    FencePoint(FenceItem),
    RallyPoint(RallyItem),
    /// Any other message, exposed as raw telemetry
    Telemetry,
}

/// One decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub id: u32,
    pub system_id: u8,
    pub component_id: u8,
    pub fields: Map<String, Value>,
    pub kind: FrameKind,
}

impl Frame {
    /// Decode a MAVLink message received from the vehicle
    ///
    /// # Arguments
    ///
    /// * `header` - MAVLink header of the received message
    /// * `message` - Decoded message body
    ///
    /// # Returns
    ///
    /// * `Frame` - Name, id, JSON fields and typed kind of the message
    pub fn decode(header: &MavHeader, message: &MavMessage) -> Self {
        Self::from_wire(header, message, &[])
    }

    /// Decode a message together with the payload bytes it was parsed from
    ///
    /// # Arguments
    ///
    /// * `header` - MAVLink header of the received message
    /// * `message` - Decoded message body
    /// * `payload` - Payload as received, used for extension fields
    pub fn from_wire(header: &MavHeader, message: &MavMessage, payload: &[u8]) -> Self {
        let name = message.message_name().to_string();
        let mut fields = json_fields(&name, message);
        let mission_type = mission_type(message, payload);
        if let Some(mission_type) = mission_type {
            fields.insert("mission_type".to_string(), Value::from(mission_type));
        }

        Self {
            id: message.message_id(),
            system_id: header.system_id,
            component_id: header.component_id,
            kind: kind_of(message, mission_type.unwrap_or(0)),
            fields,
            name,
        }
    }

    /// Build a plain telemetry frame
    pub fn telemetry(name: &str, id: u32, fields: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            id,
            system_id: 1,
            component_id: 1,
            fields,
            kind: FrameKind::Telemetry,
        }
    }

    /// Sentinel frame for bytes that could not be decoded
    pub fn bad_data() -> Self {
        Self::telemetry(names::BAD_DATA, 0, Map::new())
    }

    /// Attach a typed kind, keeping the name and fields
    pub fn with_kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Serialize a message into a flat JSON object of its fields
fn json_fields(name: &str, message: &MavMessage) -> Map<String, Value> {
    match serde_json::to_value(message) {
        Ok(Value::Object(mut object)) => {
            // Externally tagged: {"NAME": {...fields}}
            if object.len() == 1 {
                if let Some(Value::Object(inner)) = object.get(name) {
                    return inner.clone();
                }
            }
            // Internally tagged: {"type": "NAME", ...fields}
            if object.get("type").and_then(Value::as_str) == Some(name) {
                object.remove("type");
            }
            object
        }
        _ => Map::new(),
    }
}

/// `mission_type` extension of the mission protocol messages
fn mission_type(message: &MavMessage, payload: &[u8]) -> Option<u8> {
    let offset = match message {
        MavMessage::MISSION_COUNT(_) => MISSION_COUNT_DATA::ENCODED_LEN,
        MavMessage::MISSION_ITEM(_) => MISSION_ITEM_DATA::ENCODED_LEN,
        MavMessage::MISSION_ITEM_INT(_) => MISSION_ITEM_INT_DATA::ENCODED_LEN,
        MavMessage::MISSION_ACK(_) => MISSION_ACK_DATA::ENCODED_LEN,
        MavMessage::MISSION_REQUEST(_) => MISSION_REQUEST_DATA::ENCODED_LEN,
        MavMessage::MISSION_REQUEST_INT(_) => MISSION_REQUEST_INT_DATA::ENCODED_LEN,
        MavMessage::MISSION_CLEAR_ALL(_) => MISSION_CLEAR_ALL_DATA::ENCODED_LEN,
        MavMessage::MISSION_REQUEST_LIST(_) => MISSION_REQUEST_LIST_DATA::ENCODED_LEN,
        _ => return None,
    };
    Some(payload.get(offset).copied().unwrap_or(0))
}

fn kind_of(message: &MavMessage, mission_type: u8) -> FrameKind {
    match message {
        MavMessage::HEARTBEAT(_) => FrameKind::Heartbeat,
        MavMessage::HOME_POSITION(_) => FrameKind::HomePosition,
        MavMessage::PARAM_VALUE(data) => FrameKind::ParamValue(ParamEntry {
            name: param_id_to_string(&data.param_id),
            value: data.param_value,
            param_type: data.param_type as u8,
            index: data.param_index,
            count: data.param_count,
        }),
        MavMessage::MISSION_COUNT(data) => FrameKind::MissionCount {
            count: data.count,
            mission_type,
        },
        MavMessage::MISSION_ITEM_INT(data) => FrameKind::MissionItem(MissionItem {
            target_system: data.target_system,
            target_component: data.target_component,
            seq: data.seq,
            frame: data.frame as u8,
            command: data.command as u16,
            current: data.current,
            autocontinue: data.autocontinue,
            param1: data.param1,
            param2: data.param2,
            param3: data.param3,
            param4: data.param4,
            x: data.x,
            y: data.y,
            z: data.z,
            mission_type,
        }),
        MavMessage::MISSION_ACK(data) => FrameKind::MissionAck {
            result: data.mavtype as u8,
            mission_type,
        },
        MavMessage::MISSION_REQUEST(data) => FrameKind::MissionRequest {
            seq: data.seq,
            mission_type,
        },
        MavMessage::MISSION_REQUEST_INT(data) => FrameKind::MissionRequest {
            seq: data.seq,
            mission_type,
        },
        MavMessage::FENCE_POINT(data) => FrameKind::FencePoint(FenceItem {
            target_system: data.target_system,
            target_component: data.target_component,
            idx: data.idx,
            count: data.count,
            lat: data.lat,
            lng: data.lng,
        }),
        MavMessage::RALLY_POINT(data) => FrameKind::RallyPoint(RallyItem {
            target_system: data.target_system,
            target_component: data.target_component,
            idx: data.idx,
            count: data.count,
            lat: data.lat,
            lng: data.lng,
            alt: data.alt,
            break_alt: data.break_alt,
            land_dir: data.land_dir,
            flags: data.flags.bits(),
        }),
        _ => FrameKind::Telemetry,
    }
}

/// Convert a NUL padded parameter id into a string
pub fn param_id_to_string(param_id: &[u8; 16]) -> String {
    let end = param_id.iter().position(|&b| b == 0).unwrap_or(param_id.len());
    String::from_utf8_lossy(&param_id[..end]).into_owned()
}

/// Convert a parameter name into a NUL padded parameter id
///
/// Names longer than 16 bytes are truncated.
pub fn param_id_from_str(name: &str) -> [u8; 16] {
    let mut param_id = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(param_id.len());
    param_id[..len].copy_from_slice(&bytes[..len]);
    param_id
}
