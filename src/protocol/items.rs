//! # Collection Item Types
//!
//! Items of the four indexed collections mirrored from the vehicle. The same
//! types describe inbound items (decoded from the vehicle) and outbound upload
//! payloads (deserialized from HTTP requests), so a downloaded plan can be
//! posted back unchanged.

use serde::{Deserialize, Serialize};

/// One mission plan command, addressed by `seq`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    pub target_system: u8,
    pub target_component: u8,
    pub seq: u16,
    pub frame: u8,
    pub command: u16,
    pub current: u8,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    /// Latitude or local x, degrees * 1e7 for global frames
    pub x: i32,
    /// Longitude or local y, degrees * 1e7 for global frames
    pub y: i32,
    pub z: f32,
    pub mission_type: u8,
}

/// One geofence point, addressed by `idx`
///
/// Index 0 is the fence return point; indices 1..count-1 are the polygon
/// vertices, with the last vertex closing the polygon onto vertex 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FenceItem {
    pub target_system: u8,
    pub target_component: u8,
    pub idx: u8,
    pub count: u8,
    pub lat: f32,
    pub lng: f32,
}

/// One rally point, addressed by `idx`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RallyItem {
    pub target_system: u8,
    pub target_component: u8,
    pub idx: u8,
    pub count: u8,
    /// Latitude, degrees * 1e7
    pub lat: i32,
    /// Longitude, degrees * 1e7
    pub lng: i32,
    /// Altitude in meters
    pub alt: i16,
    /// Break altitude in meters
    pub break_alt: i16,
    /// Heading to aim for when landing, centi-degrees
    pub land_dir: u16,
    pub flags: u8,
}

/// One vehicle parameter as reported by PARAM_VALUE
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamEntry {
    pub name: String,
    pub value: f32,
    pub param_type: u8,
    pub index: u16,
    pub count: u16,
}

impl MissionItem {
    pub fn position(&self) -> u16 {
        self.seq
    }
}

impl FenceItem {
    pub fn position(&self) -> u16 {
        u16::from(self.idx)
    }
}

impl RallyItem {
    pub fn position(&self) -> u16 {
        u16::from(self.idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mission_item_from_json() {
        let item: MissionItem = serde_json::from_value(json!({
            "target_system": 1, "target_component": 1, "seq": 3, "frame": 3,
            "command": 16, "current": 0, "autocontinue": 1,
            "param1": 0, "param2": 0.5, "param3": 0, "param4": 0,
            "x": 473977420, "y": 85455940, "z": 20.0, "mission_type": 0
        }))
        .unwrap();

        assert_eq!(item.position(), 3);
        assert_eq!(item.command, 16);
        assert_eq!(item.param2, 0.5);
    }

    #[test]
    fn test_integer_fields_reject_out_of_range() {
        let result = serde_json::from_value::<FenceItem>(json!({
            "target_system": 256, "target_component": 1, "idx": 0, "count": 5,
            "lat": 1.0, "lng": 2.0
        }));
        assert!(result.is_err(), "target_system above 255 must not deserialize");
    }

    #[test]
    fn test_integer_fields_reject_fractions() {
        let result = serde_json::from_value::<RallyItem>(json!({
            "target_system": 1, "target_component": 1, "idx": 0.5, "count": 1,
            "lat": 1, "lng": 2, "alt": 30, "break_alt": 40, "land_dir": 0, "flags": 0
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let result = serde_json::from_value::<FenceItem>(json!({
            "target_system": 1, "target_component": 1, "idx": 0, "count": 5, "lat": 1.0
        }));
        assert!(result.is_err());
    }
}
