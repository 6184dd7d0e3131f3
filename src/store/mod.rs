//! # Shared State Store
//!
//! Everything mirrored from the vehicle plus the operator-owned data, behind
//! one `parking_lot::RwLock`.
//!
//! The ingestion task takes the write lock once per classified frame, so
//! HTTP readers always see whole entries. Read handlers use the JSON views
//! at the bottom of this module; an unknown key or index yields `{}`.

pub mod filter;
pub mod statistics;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::{split_names, Config};
use crate::protocol::frame::Frame;
use crate::protocol::items::{FenceItem, MissionItem, ParamEntry, RallyItem};
use crate::protocol::names::{BUILTIN_MESSAGES, BUILTIN_PARAMETERS};
use crate::protocol::Target;
use crate::sync::{SyncEngine, Upload};
use filter::{FilterLists, NameFilter};
use statistics::{Statistics, Timestamp};

/// Latest fields of one message type
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    pub id: u32,
    pub fields: Map<String, Value>,
    pub statistics: Statistics,
}

impl TelemetryEntry {
    fn to_json(&self, with_statistics: bool) -> Value {
        let mut object = self.fields.clone();
        if with_statistics {
            if let Ok(stats) = serde_json::to_value(&self.statistics) {
                object.insert("statistics".to_string(), stats);
            }
        }
        Value::Object(object)
    }
}

/// Link liveness and vehicle addressing
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub target_system: u8,
    pub target_component: u8,
    /// Monotonic seconds of the last accepted frame
    pub last_received: Option<f64>,
    /// Number of sessions that reached the live state
    pub sessions: u64,
}

impl ConnectionState {
    pub fn target(&self) -> Target {
        Target {
            system: self.target_system,
            component: self.target_component,
        }
    }

    pub fn set_target(&mut self, target: Target) {
        self.target_system = target.system;
        self.target_component = target.component;
    }
}

/// All mutable bridge state
#[derive(Debug, Clone)]
pub struct State {
    pub messages: BTreeMap<String, TelemetryEntry>,
    /// Message id to name, learned from received frames
    pub message_ids: BTreeMap<u32, String>,
    pub parameters: SyncEngine<ParamEntry>,
    pub plan: SyncEngine<MissionItem>,
    pub fence: SyncEngine<FenceItem>,
    pub rally: SyncEngine<RallyItem>,
    pub custom: Map<String, Value>,
    pub filters: FilterLists,
    pub connection: ConnectionState,
    pub api_statistics: Option<Statistics>,
    pub vehicle_statistics: Option<Statistics>,
    /// Plan upload answered item by item on vehicle request
    pub pending_plan: Upload<MissionItem>,
    pub statistics_enabled: bool,
    /// Age in seconds after which telemetry entries are dropped, zero keeps them
    pub drop_s: f64,
}

impl Default for State {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl State {
    /// Build the initial state from configuration
    pub fn new(config: &Config) -> Self {
        let filters = FilterLists {
            message: NameFilter::from_lists(
                BUILTIN_MESSAGES,
                &split_names(&config.filter.white_message),
                &split_names(&config.filter.black_message),
            ),
            parameter: NameFilter::from_lists(
                BUILTIN_PARAMETERS,
                &split_names(&config.filter.white_parameter),
                &split_names(&config.filter.black_parameter),
            ),
        };

        let mut connection = ConnectionState::default();
        connection.set_target(Target::default());

        Self {
            messages: BTreeMap::new(),
            message_ids: BTreeMap::new(),
            parameters: SyncEngine::new(config.sync.fetch_parameters, false),
            plan: SyncEngine::new(config.sync.fetch_plan, true),
            fence: SyncEngine::new(config.sync.fetch_fence, true),
            rally: SyncEngine::new(config.sync.fetch_rally, true),
            custom: Map::new(),
            filters,
            connection,
            api_statistics: None,
            vehicle_statistics: None,
            pending_plan: Upload::default(),
            statistics_enabled: config.statistics.enabled,
            drop_s: config.filter.drop_s,
        }
    }

    /// Count one frame received from the vehicle, accepted or not
    pub fn record_vehicle(&mut self, now: Timestamp) {
        if self.statistics_enabled {
            statistics::record(&mut self.vehicle_statistics, now);
        }
    }

    /// Count one statistics request
    pub fn record_api(&mut self, now: Timestamp) {
        if self.statistics_enabled {
            statistics::record(&mut self.api_statistics, now);
        }
    }

    /// Merge a frame's fields into its telemetry entry
    pub fn merge_message(&mut self, frame: &Frame, now: Timestamp) {
        self.message_ids.insert(frame.id, frame.name.clone());

        match self.messages.get_mut(&frame.name) {
            Some(entry) => {
                entry.id = frame.id;
                for (field, value) in &frame.fields {
                    entry.fields.insert(field.clone(), value.clone());
                }
                entry.statistics.record(now);
            }
            None => {
                self.messages.insert(
                    frame.name.clone(),
                    TelemetryEntry {
                        id: frame.id,
                        fields: frame.fields.clone(),
                        statistics: Statistics::start(now),
                    },
                );
            }
        }
    }

    /// Drop stale telemetry and everything the filters no longer admit
    pub fn evict(&mut self, now: Timestamp) {
        if self.drop_s > 0.0 {
            let drop_s = self.drop_s;
            self.messages.retain(|_, entry| entry.statistics.age(now) <= drop_s);
        }

        let messages = &self.filters.message;
        self.messages.retain(|name, _| messages.admits(name));

        let parameters = &self.filters.parameter;
        self.parameters.retain(|entry| parameters.admits(&entry.name));
    }

    /// Look up a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ParamEntry> {
        self.parameters.items().values().find(|entry| entry.name == name)
    }

    /// Replace the value of an already stored parameter
    ///
    /// # Returns
    ///
    /// * `bool` - Whether a parameter with that name was stored
    pub fn update_parameter(&mut self, update: &ParamEntry) -> bool {
        match self.parameters.items_mut().find(|(_, entry)| entry.name == update.name) {
            Some((_, entry)) => {
                entry.value = update.value;
                entry.param_type = update.param_type;
                true
            }
            None => false,
        }
    }

    fn message_name<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.messages.contains_key(key) {
            return Some(key);
        }
        let id = key.parse::<u32>().ok()?;
        self.message_ids.get(&id).map(String::as_str)
    }

    /// `{name: entry}` for every telemetry entry
    pub fn message_all_json(&self) -> Value {
        let object = self
            .messages
            .iter()
            .map(|(name, entry)| (name.clone(), entry.to_json(self.statistics_enabled)))
            .collect();
        Value::Object(object)
    }

    /// `{name: entry}` for a message name or numeric id
    pub fn message_json(&self, key: &str) -> Value {
        self.message_name(key)
            .and_then(|name| self.messages.get_key_value(name))
            .map(|(name, entry)| json!({ name.clone(): entry.to_json(self.statistics_enabled) }))
            .unwrap_or_else(empty)
    }

    /// `{field: value}` of one message field
    pub fn message_field_json(&self, key: &str, field: &str) -> Value {
        self.message_name(key)
            .and_then(|name| self.messages.get(name))
            .and_then(|entry| match entry.to_json(self.statistics_enabled) {
                Value::Object(mut object) => object.remove(field),
                _ => None,
            })
            .map(|value| json!({ field: value }))
            .unwrap_or_else(empty)
    }

    /// `{name: value}` for every stored parameter
    pub fn parameter_all_json(&self) -> Value {
        let object = self
            .parameters
            .items()
            .values()
            .map(|entry| (entry.name.clone(), json!(entry.value)))
            .collect();
        Value::Object(object)
    }

    pub fn parameter_json(&self, name: &str) -> Value {
        self.parameter(name)
            .map(|entry| json!({ entry.name.clone(): entry.value }))
            .unwrap_or_else(empty)
    }

    pub fn plan_all_json(&self) -> Value {
        collection_json(&self.plan)
    }

    pub fn plan_json(&self, index: u16) -> Value {
        item_json(&self.plan, index)
    }

    pub fn fence_all_json(&self) -> Value {
        collection_json(&self.fence)
    }

    pub fn fence_json(&self, index: u16) -> Value {
        item_json(&self.fence, index)
    }

    pub fn rally_all_json(&self) -> Value {
        collection_json(&self.rally)
    }

    pub fn rally_json(&self, index: u16) -> Value {
        item_json(&self.rally, index)
    }

    pub fn custom_all_json(&self) -> Value {
        Value::Object(self.custom.clone())
    }

    pub fn custom_json(&self, key: &str) -> Value {
        self.custom
            .get(key)
            .map(|value| json!({ key: value }))
            .unwrap_or_else(empty)
    }

    /// `{api, vehicle, connection}` statistics
    pub fn statistics_json(&self) -> Value {
        let section = |stats: &Option<Statistics>| match stats {
            Some(stats) => json!({ "statistics": stats }),
            None => empty(),
        };

        json!({
            "api": section(&self.api_statistics),
            "vehicle": section(&self.vehicle_statistics),
            "connection": self.connection,
        })
    }

    /// Every view in one object
    pub fn all_json(&self) -> Value {
        json!({
            "message": self.message_all_json(),
            "parameter": self.parameter_all_json(),
            "plan": self.plan_all_json(),
            "fence": self.fence_all_json(),
            "rally": self.rally_all_json(),
            "custom": self.custom_all_json(),
            "statistics": self.statistics_json(),
            "version": version_json(),
        })
    }
}

/// Name and version of this build
pub fn version_json() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "major": env!("CARGO_PKG_VERSION_MAJOR").parse::<u64>().unwrap_or_default(),
        "minor": env!("CARGO_PKG_VERSION_MINOR").parse::<u64>().unwrap_or_default(),
        "patch": env!("CARGO_PKG_VERSION_PATCH").parse::<u64>().unwrap_or_default(),
        "version": env!("CARGO_PKG_VERSION"),
    })
}

fn empty() -> Value {
    Value::Object(Map::new())
}

fn collection_json<T: Serialize>(engine: &SyncEngine<T>) -> Value {
    Value::Array(
        engine
            .items()
            .values()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
    )
}

fn item_json<T: Serialize>(engine: &SyncEngine<T>, index: u16) -> Value {
    engine
        .get(index)
        .and_then(|item| serde_json::to_value(item).ok())
        .unwrap_or_else(empty)
}

/// Cloneable handle to the shared state
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<State>>,
}

impl SharedStore {
    pub fn new(state: State) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(name: &str, id: u32, fields: Value) -> Frame {
        match fields {
            Value::Object(fields) => Frame::telemetry(name, id, fields),
            _ => Frame::telemetry(name, id, Map::new()),
        }
    }

    fn param(name: &str, value: f32, index: u16, count: u16) -> ParamEntry {
        ParamEntry { name: name.to_string(), value, param_type: 9, index, count }
    }

    #[test]
    fn test_merge_overwrites_fields() {
        let mut state = State::default();
        state.merge_message(&frame("ATTITUDE", 30, json!({"roll": 0.1, "pitch": 0.2})), Timestamp::at(0.0, 0.0));
        state.merge_message(&frame("ATTITUDE", 30, json!({"roll": 0.5})), Timestamp::at(1.0, 1.0));

        let entry = &state.messages["ATTITUDE"];
        assert_eq!(entry.fields["roll"], json!(0.5));
        assert_eq!(entry.fields["pitch"], json!(0.2));
        assert_eq!(entry.statistics.counter, 2);
    }

    #[test]
    fn test_message_lookup_by_name_and_id() {
        let mut state = State::default();
        state.merge_message(&frame("VFR_HUD", 74, json!({"groundspeed": 3.0})), Timestamp::at(0.0, 0.0));

        assert_eq!(state.message_json("VFR_HUD")["VFR_HUD"]["groundspeed"], json!(3.0));
        assert_eq!(state.message_json("74")["VFR_HUD"]["groundspeed"], json!(3.0));
        assert_eq!(state.message_field_json("74", "groundspeed"), json!({"groundspeed": 3.0}));
        assert_eq!(state.message_json("75"), json!({}));
        assert_eq!(state.message_field_json("VFR_HUD", "missing"), json!({}));
    }

    #[test]
    fn test_statistics_hidden_when_disabled() {
        let mut state = State::default();
        state.statistics_enabled = false;
        state.merge_message(&frame("VFR_HUD", 74, json!({"heading": 90})), Timestamp::at(0.0, 0.0));

        assert_eq!(state.message_json("VFR_HUD"), json!({"VFR_HUD": {"heading": 90}}));
    }

    #[test]
    fn test_drop_stale_entries() {
        let mut state = State::default();
        state.drop_s = 2.0;
        state.merge_message(&frame("STATUSTEXT", 253, json!({})), Timestamp::at(0.0, 0.0));
        state.merge_message(&frame("ATTITUDE", 30, json!({})), Timestamp::at(2.5, 2.5));

        state.evict(Timestamp::at(3.0, 3.0));
        assert!(!state.messages.contains_key("STATUSTEXT"));
        assert!(state.messages.contains_key("ATTITUDE"));
    }

    #[test]
    fn test_zero_drop_keeps_entries() {
        let mut state = State::default();
        state.merge_message(&frame("STATUSTEXT", 253, json!({})), Timestamp::at(0.0, 0.0));
        state.evict(Timestamp::at(1e6, 1e6));
        assert!(state.messages.contains_key("STATUSTEXT"));
    }

    #[test]
    fn test_filter_eviction() {
        let mut state = State::default();
        state.merge_message(&frame("ATTITUDE", 30, json!({})), Timestamp::at(0.0, 0.0));
        state.parameters.reset();
        state.parameters.on_count(2);
        state.parameters.on_item(0, param("RTL_ALT", 1500.0, 0, 2));
        state.parameters.on_item(1, param("FENCE_TOTAL", 0.0, 1, 2));

        state.filters.message.set_black(&["ATTITUDE".to_string()]).unwrap();
        state.filters.parameter.set_white(&["WPNAV_SPEED".to_string()]).unwrap();
        state.evict(Timestamp::at(0.0, 0.0));

        assert!(state.messages.is_empty());
        assert!(state.parameter("RTL_ALT").is_none());
        assert!(state.parameter("FENCE_TOTAL").is_some());
    }

    #[test]
    fn test_parameter_views() {
        let mut state = State::default();
        state.parameters.reset();
        state.parameters.on_count(1);
        state.parameters.on_item(0, param("RTL_ALT", 1500.0, 0, 1));

        assert_eq!(state.parameter_all_json(), json!({"RTL_ALT": 1500.0}));
        assert_eq!(state.parameter_json("RTL_ALT"), json!({"RTL_ALT": 1500.0}));
        assert_eq!(state.parameter_json("NOPE"), json!({}));

        assert!(state.update_parameter(&param("RTL_ALT", 2000.0, 65535, 1)));
        assert_eq!(state.parameter("RTL_ALT").map(|entry| entry.value), Some(2000.0));
        assert!(!state.update_parameter(&param("NOPE", 1.0, 65535, 1)));
    }

    #[test]
    fn test_collection_views() {
        let mut state = State::default();
        state.rally.reset();
        state.rally.on_count(1);
        state.rally.on_item(
            0,
            RallyItem {
                target_system: 255,
                target_component: 0,
                idx: 0,
                count: 1,
                lat: 10,
                lng: 20,
                alt: 30,
                break_alt: 40,
                land_dir: 0,
                flags: 0,
            },
        );

        assert_eq!(state.rally_all_json().as_array().map(Vec::len), Some(1));
        assert_eq!(state.rally_json(0)["alt"], json!(30));
        assert_eq!(state.rally_json(1), json!({}));
        assert_eq!(state.plan_all_json(), json!([]));
    }

    #[test]
    fn test_custom_views() {
        let mut state = State::default();
        state.custom.insert("x".to_string(), json!(1));

        assert_eq!(state.custom_json("x"), json!({"x": 1}));
        assert_eq!(state.custom_json("y"), json!({}));
        assert_eq!(state.custom_all_json(), json!({"x": 1}));
    }

    #[test]
    fn test_statistics_view() {
        let mut state = State::default();
        assert_eq!(state.statistics_json()["api"], json!({}));

        state.record_api(Timestamp::at(0.0, 0.0));
        state.record_vehicle(Timestamp::at(0.5, 0.5));

        let stats = state.statistics_json();
        assert_eq!(stats["api"]["statistics"]["counter"], json!(1));
        assert_eq!(stats["vehicle"]["statistics"]["counter"], json!(1));
        assert_eq!(stats["connection"]["connected"], json!(false));
        assert_eq!(stats["connection"]["last_received"], Value::Null);
    }

    #[test]
    fn test_all_view_has_every_section() {
        let all = State::default().all_json();
        for section in ["message", "parameter", "plan", "fence", "rally", "custom", "statistics", "version"] {
            assert!(all.get(section).is_some(), "missing {}", section);
        }
        assert_eq!(all["version"]["name"], json!("mav-bridge"));
    }

    #[test]
    fn test_configured_filters() {
        let mut config = Config::default();
        config.filter.black_message = "ATTITUDE".to_string();
        config.filter.white_parameter = "RTL_ALT".to_string();

        let state = State::new(&config);
        assert!(!state.filters.message.admits("ATTITUDE"));
        assert!(state.filters.parameter.white_active());
    }
}
