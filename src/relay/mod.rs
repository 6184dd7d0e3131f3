//! # Command Relay
//!
//! Validates requests from the HTTP surface and turns them into MAVLink
//! traffic towards the vehicle.
//!
//! Every vehicle-bound family follows the same steps:
//! 1. Structural validation (typed deserialization)
//! 2. Semantic validation (positions, consistency, encodability)
//! 3. Liveness check, answering `connected:false` when no session is live
//! 4. Staging: white-list marks and the pending plan
//! 5. One batch of every outbound message queued to the session writer
//!
//! Messages are always addressed to the target learned from the vehicle,
//! whatever target fields the request carries. Custom data and filter list
//! updates are local and never look at the link.

pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::link::LinkHandle;
use crate::protocol::dialect::MavMessage;
use crate::protocol::encoder::{self, CommandInt, CommandLong};
use crate::protocol::items::{FenceItem, MissionItem, RallyItem};
use crate::protocol::names::{
    COMMAND_ACK, FENCE_ACTION, FENCE_POINT, FENCE_TOTAL, MISSION_ACK, MISSION_COUNT, MISSION_ITEM_INT,
    MISSION_REQUEST, MISSION_REQUEST_INT, PARAM_VALUE, RALLY_POINT, RALLY_TOTAL,
};
use crate::protocol::registry::Registry;
use crate::protocol::Target;
use crate::store::filter::{Category, ListKind};
use crate::store::statistics::Timestamp;
use crate::store::{SharedStore, State};
use crate::sync::Collection;
use schema::{
    CommandIntRequest, CommandLongRequest, KeyValueRequest, MessageRequest, ParamSetRequest, Rejection,
};

pub const POST_LONG: &str = "POST_LONG";
pub const POST_INT: &str = "POST_INT";
pub const POST_PARAM: &str = "POST_PARAM";
pub const POST_PLAN: &str = "POST_PLAN";
pub const POST_RALLY: &str = "POST_RALLY";
pub const POST_FENCE: &str = "POST_FENCE";
pub const POST_CUSTOM: &str = "POST_CUSTOM";
pub const POST_CUSTOM_ALL: &str = "POST_CUSTOM_ALL";
pub const POST_MESSAGE: &str = "POST_MESSAGE";

/// FENCE_ACTION value disabling the fence during an upload
const FENCE_ACTION_NONE: f32 = 0.0;

/// Body of every POST response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    pub valid: bool,
    pub sent: bool,
}

impl CommandResponse {
    fn new(command: impl Into<String>, connected: Option<bool>, valid: bool, sent: bool) -> Self {
        Self {
            command: command.into(),
            connected,
            valid,
            sent,
        }
    }
}

/// Side effects of an accepted vehicle-bound request
#[derive(Debug, Default)]
struct Staged {
    messages: Vec<MavMessage>,
    message_marks: Vec<&'static str>,
    parameter_marks: Vec<&'static str>,
    plan: Option<BTreeMap<u16, MissionItem>>,
    /// False when only a prerequisite is requested
    complete: bool,
}

impl Staged {
    fn send(messages: Vec<MavMessage>) -> Self {
        Self {
            messages,
            complete: true,
            ..Default::default()
        }
    }

    fn mark_messages(mut self, names: &[&'static str]) -> Self {
        self.message_marks.extend_from_slice(names);
        self
    }

    fn mark_parameters(mut self, names: &[&'static str]) -> Self {
        self.parameter_marks.extend_from_slice(names);
        self
    }
}

fn encode_error(e: crate::error::BridgeError) -> Rejection {
    Rejection::Encode(e.to_string())
}

/// Validates and relays HTTP commands
#[derive(Debug, Clone)]
pub struct CommandRelay {
    store: SharedStore,
    link: LinkHandle,
    registry: Arc<Registry>,
}

impl CommandRelay {
    pub fn new(store: SharedStore, link: LinkHandle, registry: Arc<Registry>) -> Self {
        Self { store, link, registry }
    }

    /// `POST /post/command_long`
    pub fn command_long(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_LONG, |_, target| {
            let request: CommandLongRequest = schema::parse(body)?;
            let message = encoder::command_long(target, &CommandLong::from(&request)).map_err(encode_error)?;
            Ok(Staged::send(vec![message]).mark_messages(&[COMMAND_ACK]))
        })
    }

    /// `POST /post/command_int`
    pub fn command_int(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_INT, |_, target| {
            let request: CommandIntRequest = schema::parse(body)?;
            let message = encoder::command_int(target, &CommandInt::from(&request)).map_err(encode_error)?;
            Ok(Staged::send(vec![message]).mark_messages(&[COMMAND_ACK]))
        })
    }

    /// `POST /post/param_set`
    pub fn param_set(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_PARAM, |_, target| {
            let request: ParamSetRequest = schema::parse(body)?;
            schema::validate_param_set(&request)?;
            let message = encoder::param_set(target, &request.param_id, request.param_value, request.param_type)
                .map_err(encode_error)?;
            Ok(Staged::send(vec![message]).mark_messages(&[PARAM_VALUE]))
        })
    }

    /// `POST /post/plan`
    ///
    /// Clears the vehicle's plan and announces the new item count. The
    /// items themselves go out as the vehicle requests them.
    pub fn plan(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_PLAN, |_, target| {
            let items: Vec<MissionItem> = schema::parse(body)?;
            schema::validate_plan(&items)?;
            for item in &items {
                encoder::mission_item_int(target, item).map_err(encode_error)?;
            }

            let count = u16::try_from(items.len()).map_err(|_| Rejection::OutOfRange("plan length"))?;
            let messages = vec![encoder::mission_clear_all(target), encoder::mission_count(target, count)];
            let mut staged = Staged::send(messages).mark_messages(&[
                MISSION_COUNT,
                MISSION_ITEM_INT,
                MISSION_ACK,
                MISSION_REQUEST,
                MISSION_REQUEST_INT,
            ]);
            staged.plan = Some(items.into_iter().map(|item| (item.seq, item)).collect());
            Ok(staged)
        })
    }

    /// `POST /post/rally`
    pub fn rally(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_RALLY, |_, target| {
            let items: Vec<RallyItem> = schema::parse(body)?;
            schema::validate_rally(&items)?;

            let mut messages = vec![
                encoder::param_set_real(target, RALLY_TOTAL, 0.0),
                encoder::param_set_real(target, RALLY_TOTAL, items.len() as f32),
            ];
            messages.extend(sorted(items, |item| item.idx).iter().map(|item| encoder::rally_point(target, item)));

            Ok(Staged::send(messages)
                .mark_messages(&[RALLY_POINT, PARAM_VALUE])
                .mark_parameters(&[RALLY_TOTAL]))
        })
    }

    /// `POST /post/fence`
    ///
    /// The fence is disabled while points are replaced and FENCE_ACTION is
    /// restored afterwards, so FENCE_ACTION has to be known first. When it
    /// is not, it is requested and the upload is not sent.
    pub fn fence(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_FENCE, |state, target| {
            let items: Vec<FenceItem> = schema::parse(body)?;
            schema::validate_fence(&items)?;

            let marks = |staged: Staged| {
                staged
                    .mark_messages(&[FENCE_POINT, PARAM_VALUE])
                    .mark_parameters(&[FENCE_ACTION, FENCE_TOTAL])
            };

            let Some(action) = state.parameter(FENCE_ACTION).map(|entry| entry.value) else {
                debug!("FENCE_ACTION unknown, requesting it before a fence upload");
                let staged = Staged {
                    messages: vec![encoder::param_request_name(target, FENCE_ACTION)],
                    complete: false,
                    ..Default::default()
                };
                return Ok(marks(staged));
            };

            let mut messages = vec![
                encoder::param_set_real(target, FENCE_ACTION, FENCE_ACTION_NONE),
                encoder::param_set_real(target, FENCE_TOTAL, 0.0),
                encoder::param_set_real(target, FENCE_TOTAL, items.len() as f32),
            ];
            messages.extend(sorted(items, |item| item.idx).iter().map(|item| encoder::fence_point(target, item)));
            messages.push(encoder::param_set_real(target, FENCE_ACTION, action));

            Ok(marks(Staged::send(messages)))
        })
    }

    /// `POST /post/message`
    ///
    /// Content is positional and sent as given, target fields included.
    pub fn message(&self, body: &[u8]) -> CommandResponse {
        self.relay(POST_MESSAGE, |_, _| {
            let request: MessageRequest = schema::parse(body)?;
            let message = self
                .registry
                .encode(&request.message_name, &request.message_content)
                .map_err(encode_error)?;
            Ok(Staged::send(vec![message]))
        })
    }

    /// `POST /post/custom`
    pub fn custom(&self, body: &[u8]) -> CommandResponse {
        let result = schema::parse::<KeyValueRequest>(body).and_then(|request| {
            schema::validate_key_value(&request)?;
            Ok(request)
        });

        match result {
            Ok(request) => {
                self.store.write().custom.insert(request.key, request.value);
                CommandResponse::new(POST_CUSTOM, None, true, true)
            }
            Err(rejection) => {
                debug!("{} rejected: {}", POST_CUSTOM, rejection);
                CommandResponse::new(POST_CUSTOM, None, false, false)
            }
        }
    }

    /// `POST /post/custom/all`
    pub fn custom_all(&self, body: &[u8]) -> CommandResponse {
        match schema::validate_custom_all(body) {
            Ok(object) => {
                self.store.write().custom.extend(object);
                CommandResponse::new(POST_CUSTOM_ALL, None, true, true)
            }
            Err(rejection) => {
                debug!("{} rejected: {}", POST_CUSTOM_ALL, rejection);
                CommandResponse::new(POST_CUSTOM_ALL, None, false, false)
            }
        }
    }

    /// `POST /set/{argument}`
    ///
    /// Replaces one white or black list. Changing the parameter white list
    /// while connected fetches every parameter again.
    pub fn set_list(&self, argument: &str, body: &[u8]) -> CommandResponse {
        let command = format!("SET_{}", argument.to_ascii_uppercase());

        match self.apply_list(argument, body) {
            Ok(refetch) => {
                info!("Updated {} filter list", argument);
                if let Some(message) = refetch {
                    self.link.send(&message);
                }
                CommandResponse::new(command, None, true, true)
            }
            Err(rejection) => {
                debug!("{} rejected: {}", command, rejection);
                CommandResponse::new(command, None, false, false)
            }
        }
    }

    fn apply_list(&self, argument: &str, body: &[u8]) -> Result<Option<MavMessage>, Rejection> {
        let (kind, category) =
            ListKind::parse(argument).ok_or_else(|| Rejection::UnknownList(argument.to_string()))?;
        let names: Vec<String> = schema::parse(body)?;

        let mut state = self.store.write();
        state.filters.set(kind, category, &names)?;
        state.evict(Timestamp::now());

        if kind == ListKind::White && category == Category::Parameter && state.connection.connected {
            let target = state.connection.target();
            let request = state.parameters.reset();
            return Ok(request.and_then(|request| Collection::Parameter.encode(target, request)));
        }

        Ok(None)
    }

    /// Run a vehicle-bound request through validation, staging and sending
    fn relay(
        &self,
        command: &'static str,
        build: impl FnOnce(&State, Target) -> Result<Staged, Rejection>,
    ) -> CommandResponse {
        let mut state = self.store.write();
        let connected = state.connection.connected;
        let target = state.connection.target();

        let staged = match build(&state, target) {
            Ok(staged) => staged,
            Err(rejection) => {
                debug!("{} rejected: {}", command, rejection);
                return CommandResponse::new(command, Some(connected), false, false);
            }
        };

        if !connected {
            return CommandResponse::new(command, Some(false), true, false);
        }

        for name in &staged.message_marks {
            state.filters.message.mark(name);
        }
        for name in &staged.parameter_marks {
            state.filters.parameter.mark(name);
        }
        if let Some(plan) = staged.plan {
            state.pending_plan.stage(plan);
        }
        drop(state);

        let sent = self.link.send_all(&staged.messages) && staged.complete;
        debug!("{} relayed {} message(s), sent: {}", command, staged.messages.len(), sent);
        CommandResponse::new(command, Some(true), true, sent)
    }
}

fn sorted<T>(mut items: Vec<T>, key: impl Fn(&T) -> u8) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[cfg(test)]
mod tests {
    use super::schema::fixtures;
    use super::*;
    use crate::link::{capture, Capture};
    use crate::protocol::dialect::MavMessage;
    use crate::protocol::items::ParamEntry;
    use mavlink::Message;
    use serde_json::json;

    struct Harness {
        relay: CommandRelay,
        store: SharedStore,
        link: Capture,
    }

    fn harness(connected: bool) -> Harness {
        let store = SharedStore::new(State::default());
        store.write().connection.connected = connected;
        store.write().connection.set_target(Target { system: 7, component: 1 });

        let handle = LinkHandle::new();
        let (outbox, link) = capture();
        if connected {
            handle.attach(outbox);
        }

        let relay = CommandRelay::new(store.clone(), handle, Arc::new(Registry::new()));
        Harness { relay, store, link }
    }

    fn names(messages: &[MavMessage]) -> Vec<&'static str> {
        messages.iter().map(|m| m.message_name()).collect()
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    fn command_long_body() -> Vec<u8> {
        body(json!({
            "target_system": 1, "target_component": 1, "command": 400, "confirmation": 0,
            "param1": 1, "param2": 0, "param3": 0, "param4": 0,
            "param5": 0, "param6": 0, "param7": 0
        }))
    }

    #[test]
    fn test_command_long_sent_to_learned_target() {
        let h = harness(true);
        let response = h.relay.command_long(&command_long_body());
        assert_eq!(response, CommandResponse::new(POST_LONG, Some(true), true, true));

        let sent = h.link.sent();
        match &sent[0] {
            MavMessage::COMMAND_LONG(data) => {
                assert_eq!(data.target_system, 7);
                assert_eq!(data.param1, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.store.read().filters.message.white().contains(COMMAND_ACK));
    }

    #[test]
    fn test_command_long_offline() {
        let h = harness(false);
        let response = h.relay.command_long(&command_long_body());
        assert_eq!(response, CommandResponse::new(POST_LONG, Some(false), true, false));
        assert!(h.link.sent().is_empty());
    }

    #[test]
    fn test_invalid_request_has_no_side_effects() {
        let h = harness(true);
        let response = h.relay.command_long(b"{\"command\": 400}");
        assert_eq!(response, CommandResponse::new(POST_LONG, Some(true), false, false));
        assert!(h.link.sent().is_empty());

        let response = h.relay.command_long(b"not json");
        assert!(!response.valid);
    }

    #[test]
    fn test_unknown_command_id_is_invalid() {
        let h = harness(true);
        let body = body(json!({
            "target_system": 1, "target_component": 1, "command": 65000, "confirmation": 0,
            "param1": 0, "param2": 0, "param3": 0, "param4": 0,
            "param5": 0, "param6": 0, "param7": 0
        }));
        assert!(!h.relay.command_long(&body).valid);
    }

    #[test]
    fn test_command_int() {
        let h = harness(true);
        let body = body(json!({
            "target_system": 1, "target_component": 1, "frame": 6, "command": 192,
            "current": 0, "autocontinue": 0, "param1": -1, "param2": 1, "param3": 0,
            "param4": 0, "x": 473977420, "y": 85455940, "z": 30.5
        }));
        let response = h.relay.command_int(&body);
        assert!(response.valid && response.sent);
        assert_eq!(names(&h.link.sent()), vec!["COMMAND_INT"]);
    }

    #[test]
    fn test_param_set() {
        let h = harness(true);
        let response = h.relay.param_set(&body(json!({
            "target_system": 1, "target_component": 1, "param_id": "RTL_ALT",
            "param_value": 1500, "param_type": 9
        })));
        assert!(response.sent);
        assert!(h.store.read().filters.message.white().contains(PARAM_VALUE));

        let response = h.relay.param_set(&body(json!({
            "target_system": 1, "target_component": 1, "param_id": "THIS_NAME_IS_TOO_LONG",
            "param_value": 1, "param_type": 9
        })));
        assert!(!response.valid);
    }

    #[test]
    fn test_plan_round_trip() {
        let h = harness(true);
        let items = fixtures::plan(3);
        let response = h.relay.plan(&serde_json::to_vec(&items).unwrap());
        assert_eq!(response, CommandResponse::new(POST_PLAN, Some(true), true, true));
        assert_eq!(names(&h.link.sent()), vec!["MISSION_CLEAR_ALL", "MISSION_COUNT"]);

        let state = h.store.read();
        assert_eq!(state.pending_plan.len(), 3);
        assert_eq!(state.pending_plan.get(2), Some(&items[2]));
        assert!(state.filters.message.white().contains(MISSION_REQUEST_INT));
    }

    #[test]
    fn test_plan_missing_index_or_mixed_targets() {
        let h = harness(true);

        let mut items = fixtures::plan(3);
        items.remove(1);
        assert!(!h.relay.plan(&serde_json::to_vec(&items).unwrap()).valid);

        let mut items = fixtures::plan(3);
        items[2].target_system = 2;
        assert!(!h.relay.plan(&serde_json::to_vec(&items).unwrap()).valid);

        assert!(h.link.sent().is_empty());
        assert!(h.store.read().pending_plan.is_empty());
    }

    #[test]
    fn test_rally_upload_sequence() {
        let h = harness(true);
        let mut items = fixtures::rally(2);
        items.reverse();
        let response = h.relay.rally(&serde_json::to_vec(&items).unwrap());
        assert!(response.sent);

        let sent = h.link.sent();
        assert_eq!(names(&sent), vec!["PARAM_SET", "PARAM_SET", "RALLY_POINT", "RALLY_POINT"]);
        match &sent[2] {
            MavMessage::RALLY_POINT(data) => assert_eq!(data.idx, 0),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.store.read().filters.parameter.white().contains(RALLY_TOTAL));
    }

    #[test]
    fn test_fence_requires_fence_action() {
        let h = harness(true);
        let body = serde_json::to_vec(&fixtures::fence()).unwrap();

        let response = h.relay.fence(&body);
        assert_eq!(response, CommandResponse::new(POST_FENCE, Some(true), true, false));
        assert_eq!(names(&h.link.sent()), vec!["PARAM_REQUEST_READ"]);
    }

    #[test]
    fn test_fence_upload_restores_action() {
        let h = harness(true);
        {
            let mut state = h.store.write();
            state.parameters.on_count(1);
            state.parameters.on_item(
                0,
                ParamEntry {
                    name: FENCE_ACTION.to_string(),
                    value: 1.0,
                    param_type: 9,
                    index: 0,
                    count: 1,
                },
            );
        }

        let response = h.relay.fence(&serde_json::to_vec(&fixtures::fence()).unwrap());
        assert!(response.valid && response.sent);

        let sent = h.link.sent();
        assert_eq!(sent.len(), 3 + 5 + 1);
        match (&sent[0], sent.last()) {
            (MavMessage::PARAM_SET(first), Some(MavMessage::PARAM_SET(last))) => {
                assert_eq!(first.param_value, 0.0);
                assert_eq!(last.param_value, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fence_closure_validation() {
        let h = harness(false);
        let mut items = fixtures::fence();
        items[4].lng = 9.0;
        assert!(!h.relay.fence(&serde_json::to_vec(&items).unwrap()).valid);
        assert!(h.relay.fence(&serde_json::to_vec(&fixtures::fence()).unwrap()).valid);
    }

    #[test]
    fn test_message_by_name() {
        let h = harness(true);
        let response = h.relay.message(&body(json!({
            "message_name": "mission_request_list", "message_content": [3, 1]
        })));
        assert_eq!(response, CommandResponse::new(POST_MESSAGE, Some(true), true, true));
        match &h.link.sent()[0] {
            MavMessage::MISSION_REQUEST_LIST(data) => assert_eq!(data.target_system, 3),
            other => panic!("unexpected {:?}", other),
        }

        let response = h.relay.message(&body(json!({
            "message_name": "NO_SUCH_MESSAGE", "message_content": []
        })));
        assert!(!response.valid);
    }

    #[test]
    fn test_custom() {
        let h = harness(false);

        let response = h.relay.custom(&body(json!({"key": "all", "value": 1})));
        assert_eq!(response, CommandResponse::new(POST_CUSTOM, None, false, false));

        let response = h.relay.custom(&body(json!({"key": "x", "value": 1})));
        assert_eq!(response, CommandResponse::new(POST_CUSTOM, None, true, true));
        assert_eq!(h.store.read().custom_json("x"), json!({"x": 1}));
    }

    #[test]
    fn test_custom_all() {
        let h = harness(false);
        h.store.write().custom.insert("keep".to_string(), json!(true));

        assert!(h.relay.custom_all(&body(json!({"a": 1}))).sent);
        assert!(!h.relay.custom_all(&body(json!({"all": 1}))).valid);
        assert!(!h.relay.custom_all(&body(json!([1]))).valid);

        let state = h.store.read();
        assert_eq!(state.custom.get("a"), Some(&json!(1)));
        assert_eq!(state.custom.get("keep"), Some(&json!(true)));
    }

    #[test]
    fn test_filter_exclusivity() {
        let h = harness(false);

        let response = h.relay.set_list("black_message", &body(json!(["FOO"])));
        assert_eq!(response, CommandResponse::new("SET_BLACK_MESSAGE", None, true, true));
        {
            let state = h.store.read();
            assert!(state.filters.message.black().contains("FOO"));
            assert!(!state.filters.message.white().contains("FOO"));
        }

        h.relay.set_list("white_message", &body(json!(["FOO"])));
        let state = h.store.read();
        assert!(!state.filters.message.black().contains("FOO"));
        assert!(state.filters.message.white().contains("FOO"));
    }

    #[test]
    fn test_set_list_rejections() {
        let h = harness(false);
        assert!(!h.relay.set_list("white_message", &body(json!([COMMAND_ACK]))).valid);
        assert!(!h.relay.set_list("white_message", &body(json!({"a": 1}))).valid);

        let response = h.relay.set_list("purple", &body(json!([])));
        assert_eq!(response.command, "SET_PURPLE");
        assert!(!response.valid);
    }

    #[test]
    fn test_white_parameter_refetch_when_connected() {
        let h = harness(true);
        let response = h.relay.set_list("white_parameter", &body(json!(["RTL_ALT"])));
        assert!(response.sent);
        assert_eq!(names(&h.link.sent()), vec!["PARAM_REQUEST_LIST"]);
    }
}
