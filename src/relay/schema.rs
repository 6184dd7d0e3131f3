//! # Request Schemas
//!
//! Payloads accepted by the command surface and their validation.
//!
//! Structural validation is done by deserializing into typed requests:
//! missing fields, wrong types and integers outside their wire type are
//! rejected by serde. Semantic checks (position sets, per-item consistency,
//! counts, polygon closure) follow in the `validate_*` functions.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::encoder::{CommandInt, CommandLong};
use crate::protocol::items::{FenceItem, MissionItem, RallyItem};
use crate::protocol::names::{MISSION_TYPE_MISSION, PARAM_ID_MAX_LEN};
use crate::store::filter::FilterError;

/// Reserved custom data key
pub const RESERVED_KEY: &str = "all";

pub const PLAN_MAX_ITEMS: usize = 65535;
pub const RALLY_MAX_ITEMS: usize = 10;
pub const FENCE_MIN_ITEMS: usize = 5;
pub const FENCE_MAX_ITEMS: usize = u8::MAX as usize;
const FENCE_MIN_COUNT: u8 = 5;

/// Why a request was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("expected between {min} and {max} items, got {len}")]
    Length { len: usize, min: usize, max: usize },

    #[error("positions must cover 0..{0} exactly once")]
    Positions(usize),

    #[error("{0} differs between items")]
    Inconsistent(&'static str),

    #[error("count does not match the number of items")]
    Count,

    #[error("fence polygon is not closed")]
    OpenPolygon,

    #[error("key \"all\" is reserved")]
    ReservedKey,

    #[error("unknown list {0}")]
    UnknownList(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("cannot encode: {0}")]
    Encode(String),
}

/// Parse a request body into a typed payload
///
/// # Errors
///
/// Returns [`Rejection::Malformed`] for invalid JSON or a payload of the
/// wrong shape
pub fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Rejection> {
    serde_json::from_slice(body).map_err(|e| Rejection::Malformed(e.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandLongRequest {
    pub target_system: u8,
    pub target_component: u8,
    pub command: u16,
    pub confirmation: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub param5: f32,
    pub param6: f32,
    pub param7: f32,
}

impl From<&CommandLongRequest> for CommandLong {
    fn from(request: &CommandLongRequest) -> Self {
        Self {
            command: request.command,
            confirmation: request.confirmation,
            params: [
                request.param1,
                request.param2,
                request.param3,
                request.param4,
                request.param5,
                request.param6,
                request.param7,
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandIntRequest {
    pub target_system: u8,
    pub target_component: u8,
    pub frame: u8,
    pub command: u16,
    pub current: u8,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

impl From<&CommandIntRequest> for CommandInt {
    fn from(request: &CommandIntRequest) -> Self {
        Self {
            frame: request.frame,
            command: request.command,
            current: request.current,
            autocontinue: request.autocontinue,
            params: [request.param1, request.param2, request.param3, request.param4],
            x: request.x,
            y: request.y,
            z: request.z,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSetRequest {
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
    pub param_value: f32,
    pub param_type: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValueRequest {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    pub message_name: String,
    pub message_content: Vec<f64>,
}

pub fn validate_param_set(request: &ParamSetRequest) -> Result<(), Rejection> {
    let len = request.param_id.chars().count();
    if len == 0 || len > PARAM_ID_MAX_LEN {
        return Err(Rejection::OutOfRange("param_id"));
    }
    Ok(())
}

pub fn validate_key_value(request: &KeyValueRequest) -> Result<(), Rejection> {
    if request.key == RESERVED_KEY {
        return Err(Rejection::ReservedKey);
    }
    Ok(())
}

/// Accept a JSON object without the reserved key
pub fn validate_custom_all(body: &[u8]) -> Result<Map<String, Value>, Rejection> {
    let object: Map<String, Value> = parse(body)?;
    if object.contains_key(RESERVED_KEY) {
        return Err(Rejection::ReservedKey);
    }
    Ok(object)
}

/// Validate a mission plan upload
///
/// Positions `0..N-1` must each appear once, every item must be a mission
/// item and target the same system and component.
pub fn validate_plan(items: &[MissionItem]) -> Result<(), Rejection> {
    check_length(items.len(), 1, PLAN_MAX_ITEMS)?;
    if items.iter().any(|item| item.mission_type != MISSION_TYPE_MISSION) {
        return Err(Rejection::OutOfRange("mission_type"));
    }

    check_positions(items.iter().map(MissionItem::position), items.len())?;
    check_uniform(items, "target_system", |item| item.target_system)?;
    check_uniform(items, "target_component", |item| item.target_component)?;
    Ok(())
}

/// Validate a rally point upload
///
/// On top of the position and target checks, every item must declare the
/// same `count` and it must equal the number of items.
pub fn validate_rally(items: &[RallyItem]) -> Result<(), Rejection> {
    check_length(items.len(), 1, RALLY_MAX_ITEMS)?;
    if items.iter().any(|item| usize::from(item.idx) >= RALLY_MAX_ITEMS) {
        return Err(Rejection::OutOfRange("idx"));
    }
    if items.iter().any(|item| item.count == 0 || usize::from(item.count) > RALLY_MAX_ITEMS) {
        return Err(Rejection::OutOfRange("count"));
    }

    check_positions(items.iter().map(RallyItem::position), items.len())?;
    check_uniform(items, "target_system", |item| item.target_system)?;
    check_uniform(items, "target_component", |item| item.target_component)?;
    check_uniform(items, "count", |item| item.count)?;
    check_count(items.iter().map(|item| item.count), items.len())
}

/// Validate a geofence upload
///
/// Index 0 is the return point, so the polygon is closed when vertex 1
/// equals the last vertex.
pub fn validate_fence(items: &[FenceItem]) -> Result<(), Rejection> {
    check_length(items.len(), FENCE_MIN_ITEMS, FENCE_MAX_ITEMS)?;
    if items.iter().any(|item| item.count < FENCE_MIN_COUNT) {
        return Err(Rejection::OutOfRange("count"));
    }

    check_positions(items.iter().map(FenceItem::position), items.len())?;
    check_uniform(items, "target_system", |item| item.target_system)?;
    check_uniform(items, "target_component", |item| item.target_component)?;
    check_uniform(items, "count", |item| item.count)?;
    check_count(items.iter().map(|item| item.count), items.len())?;

    let mut vertices: Vec<&FenceItem> = items.iter().collect();
    vertices.sort_by_key(|item| item.idx);
    match (vertices.get(1), vertices.last()) {
        (Some(first), Some(last)) if (first.lat, first.lng) == (last.lat, last.lng) => Ok(()),
        _ => Err(Rejection::OpenPolygon),
    }
}

fn check_length(len: usize, min: usize, max: usize) -> Result<(), Rejection> {
    if len < min || len > max {
        return Err(Rejection::Length { len, min, max });
    }
    Ok(())
}

fn check_positions(positions: impl Iterator<Item = u16>, len: usize) -> Result<(), Rejection> {
    let mut seen = BTreeSet::new();
    for position in positions {
        if usize::from(position) >= len || !seen.insert(position) {
            return Err(Rejection::Positions(len));
        }
    }

    if seen.len() != len {
        return Err(Rejection::Positions(len));
    }
    Ok(())
}

fn check_uniform<T, K: PartialEq>(items: &[T], field: &'static str, key: impl Fn(&T) -> K) -> Result<(), Rejection> {
    let mut values = items.iter().map(key);
    let Some(first) = values.next() else {
        return Ok(());
    };

    if values.all(|value| value == first) {
        Ok(())
    } else {
        Err(Rejection::Inconsistent(field))
    }
}

fn check_count(mut counts: impl Iterator<Item = u8>, len: usize) -> Result<(), Rejection> {
    if counts.all(|count| usize::from(count) == len) {
        Ok(())
    } else {
        Err(Rejection::Count)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_bad_json() {
        let result = parse::<MessageRequest>(b"{not json");
        assert!(matches!(result, Err(Rejection::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let body = json!({"target_system": 1, "target_component": 1, "command": 400}).to_string();
        assert!(parse::<CommandLongRequest>(body.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_id() {
        let body = json!({
            "target_system": 300, "target_component": 1, "param_id": "RTL_ALT",
            "param_value": 1500, "param_type": 9
        })
        .to_string();
        assert!(parse::<ParamSetRequest>(body.as_bytes()).is_err());
    }

    #[test]
    fn test_param_id_length() {
        let mut request = ParamSetRequest {
            target_system: 1,
            target_component: 1,
            param_id: "RTL_ALT".to_string(),
            param_value: 1500.0,
            param_type: 9,
        };
        assert!(validate_param_set(&request).is_ok());

        request.param_id = String::new();
        assert_eq!(validate_param_set(&request), Err(Rejection::OutOfRange("param_id")));

        request.param_id = "A".repeat(17);
        assert_eq!(validate_param_set(&request), Err(Rejection::OutOfRange("param_id")));
    }

    #[test]
    fn test_reserved_key() {
        let request = KeyValueRequest {
            key: "all".to_string(),
            value: json!(1),
        };
        assert_eq!(validate_key_value(&request), Err(Rejection::ReservedKey));

        let request = KeyValueRequest {
            key: "x".to_string(),
            value: json!(1),
        };
        assert!(validate_key_value(&request).is_ok());
    }

    #[test]
    fn test_key_value_null_is_present() {
        let request: KeyValueRequest = parse(br#"{"key": "x", "value": null}"#).unwrap();
        assert_eq!(request.value, Value::Null);
        assert!(parse::<KeyValueRequest>(br#"{"key": "x"}"#).is_err());
    }

    #[test]
    fn test_custom_all() {
        assert!(validate_custom_all(br#"{"a": 1, "b": [1, 2]}"#).is_ok());
        assert_eq!(validate_custom_all(br#"{"all": 1}"#), Err(Rejection::ReservedKey));
        assert!(validate_custom_all(b"[1, 2]").is_err());
    }

    #[test]
    fn test_plan_positions() {
        assert!(validate_plan(&plan(4)).is_ok());

        let mut items = plan(4);
        items.remove(2);
        assert_eq!(validate_plan(&items), Err(Rejection::Positions(3)));

        let mut items = plan(4);
        items[3].seq = 1;
        assert_eq!(validate_plan(&items), Err(Rejection::Positions(4)));
    }

    #[test]
    fn test_plan_targets_must_match() {
        let mut items = plan(3);
        items[1].target_component = 2;
        assert_eq!(validate_plan(&items), Err(Rejection::Inconsistent("target_component")));
    }

    #[test]
    fn test_plan_mission_type() {
        let mut items = plan(2);
        items[0].mission_type = 1;
        assert_eq!(validate_plan(&items), Err(Rejection::OutOfRange("mission_type")));
        assert!(matches!(validate_plan(&[]), Err(Rejection::Length { .. })));
    }

    #[test]
    fn test_plan_order_does_not_matter() {
        let mut items = plan(5);
        items.reverse();
        assert!(validate_plan(&items).is_ok());
    }

    #[test]
    fn test_rally_checks() {
        assert!(validate_rally(&rally(3)).is_ok());

        let mut items = rally(3);
        items[0].count = 4;
        assert_eq!(validate_rally(&items), Err(Rejection::Inconsistent("count")));

        let mut items = rally(3);
        for item in &mut items {
            item.count = 4;
        }
        assert_eq!(validate_rally(&items), Err(Rejection::Count));

        assert!(matches!(validate_rally(&rally(11)), Err(Rejection::OutOfRange(_)) | Err(Rejection::Length { .. })));
    }

    #[test]
    fn test_fence_closure() {
        assert!(validate_fence(&fence()).is_ok());

        let mut items = fence();
        items[4].lat = 47.3;
        assert_eq!(validate_fence(&items), Err(Rejection::OpenPolygon));
    }

    #[test]
    fn test_fence_closure_ignores_return_point() {
        let mut items = fence();
        items[0].lat = 10.0;
        items[0].lng = 10.0;
        assert!(validate_fence(&items).is_ok());
    }

    #[test]
    fn test_fence_size() {
        let mut items = fence();
        items.truncate(4);
        for item in &mut items {
            item.count = 4;
        }
        assert!(matches!(validate_fence(&items), Err(Rejection::Length { .. })));
    }

    fn polygon(len: usize) -> Vec<FenceItem> {
        let mut items: Vec<FenceItem> = (0..len)
            .map(|idx| FenceItem {
                target_system: 1,
                target_component: 1,
                idx: idx as u8,
                count: len as u8,
                lat: 47.0 + idx as f32 * 0.001,
                lng: 8.0,
            })
            .collect();
        let (lat, lng) = (items[1].lat, items[1].lng);
        if let Some(last) = items.last_mut() {
            last.lat = lat;
            last.lng = lng;
        }
        items
    }

    #[test]
    fn test_fence_largest_polygon() {
        assert_eq!(FENCE_MAX_ITEMS, 255);
        assert!(validate_fence(&polygon(FENCE_MAX_ITEMS)).is_ok());

        let too_many = polygon(FENCE_MAX_ITEMS + 1);
        assert_eq!(
            validate_fence(&too_many),
            Err(Rejection::Length { len: 256, min: FENCE_MIN_ITEMS, max: 255 })
        );
    }
}
