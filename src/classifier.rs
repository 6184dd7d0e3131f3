//! # Telemetry Classifier
//!
//! Applies one decoded frame to the shared state and works out what has to
//! be sent back to the vehicle in response.
//!
//! Order of operations per frame:
//! 1. Count the frame in the vehicle statistics
//! 2. Discard it if filtered out or undecodable
//! 3. Mark the link active and dispatch on the frame kind
//! 4. Run a repair pass for every collection the frame did not drive
//! 5. Evict stale and filtered entries
//!
//! Heartbeats are answered by the supervisor and never reach the store.

use tracing::{debug, warn};

use crate::protocol::dialect::MavMessage;
use crate::protocol::frame::{Frame, FrameKind};
use crate::protocol::items::ParamEntry;
use crate::protocol::names::{
    self, FENCE_TOTAL, HOME_POSITION_ID, MISSION_ACCEPTED, MISSION_TYPE_MISSION, RALLY_TOTAL,
    SYSID_THISMAV,
};
use crate::protocol::{encoder, Target};
use crate::store::statistics::Timestamp;
use crate::store::State;
use crate::sync::{Collection, SyncRequest, SyncState};

/// Messages produced while classifying one frame
#[derive(Debug, Default)]
struct Outbox {
    target: Target,
    messages: Vec<MavMessage>,
    driven: Vec<Collection>,
}

impl Outbox {
    fn new(target: Target) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    /// Queue an engine request and note that the frame drove `collection`
    fn request(&mut self, collection: Collection, request: Option<SyncRequest>) {
        self.driven.push(collection);
        if let Some(message) = request.and_then(|request| collection.encode(self.target, request)) {
            self.messages.push(message);
        }
    }

    fn drove(&self, collection: Collection) -> bool {
        self.driven.contains(&collection)
    }
}

/// Classify one frame received from the vehicle
///
/// # Arguments
///
/// * `state` - Shared state, write-locked by the caller for the whole call
/// * `frame` - Decoded frame
/// * `now` - Reception time
///
/// # Returns
///
/// * `Vec<MavMessage>` - Requests and answers to send to the vehicle, in order
pub fn classify(state: &mut State, frame: &Frame, now: Timestamp) -> Vec<MavMessage> {
    state.record_vehicle(now);

    if !state.filters.message.admits(&frame.name) || names::is_bad_data(&frame.name) {
        debug!("Discarding {}", frame.name);
        return Vec::new();
    }

    state.connection.last_received = Some(now.monotonic);
    let mut outbox = Outbox::new(state.connection.target());

    match &frame.kind {
        FrameKind::Heartbeat => {}
        FrameKind::HomePosition => {
            state.merge_message(frame, now);
            outbox
                .messages
                .push(encoder::set_message_interval(outbox.target, HOME_POSITION_ID, None));
        }
        FrameKind::ParamValue(entry) => on_param_value(state, entry, &mut outbox),
        FrameKind::MissionCount { count, mission_type } => {
            if *mission_type == MISSION_TYPE_MISSION {
                let request = state.plan.on_count(*count);
                outbox.request(Collection::Plan, request);
            }
        }
        FrameKind::MissionItem(item) => {
            if item.mission_type == MISSION_TYPE_MISSION {
                let request = state.plan.on_item(item.position(), item.clone());
                outbox.request(Collection::Plan, request);
            }
        }
        FrameKind::MissionAck { result, mission_type } => {
            if *mission_type == MISSION_TYPE_MISSION && *result == MISSION_ACCEPTED {
                on_plan_accepted(state, &mut outbox);
            }
        }
        FrameKind::MissionRequest { seq, mission_type } => {
            if *mission_type == MISSION_TYPE_MISSION {
                answer_mission_request(state, *seq, &mut outbox);
            }
        }
        FrameKind::FencePoint(item) => {
            let request = state.fence.on_item(item.position(), item.clone());
            outbox.request(Collection::Fence, request);
        }
        FrameKind::RallyPoint(item) => {
            let request = state.rally.on_item(item.position(), item.clone());
            outbox.request(Collection::Rally, request);
        }
        FrameKind::Telemetry => state.merge_message(frame, now),
    }

    repair(state, &mut outbox);
    state.evict(now);

    outbox.messages
}

/// Force every engine back into counting
///
/// # Returns
///
/// * `Vec<MavMessage>` - List requests of the enabled engines
pub fn reset_engines(state: &mut State) -> Vec<MavMessage> {
    let mut outbox = Outbox::new(state.connection.target());

    let request = state.parameters.reset();
    outbox.request(Collection::Parameter, request);
    let request = state.plan.reset();
    outbox.request(Collection::Plan, request);
    let request = state.fence.reset();
    outbox.request(Collection::Fence, request);
    let request = state.rally.reset();
    outbox.request(Collection::Rally, request);

    outbox.messages
}

fn on_param_value(state: &mut State, entry: &ParamEntry, outbox: &mut Outbox) {
    outbox.driven.push(Collection::Parameter);

    let parameters = &mut state.parameters;
    let known = matches!(parameters.state(), SyncState::Fetching | SyncState::Complete);
    if !known || parameters.total() != entry.count {
        // The stream itself delivers the first item, so the count request is not sent
        let _ = parameters.on_count(entry.count);
    }

    let admitted = state.filters.parameter.admits(&entry.name);
    if entry.index < state.parameters.total() {
        if admitted {
            state.parameters.on_item(entry.index, entry.clone());
        } else {
            state.parameters.on_skipped(entry.index);
        }
    } else if admitted && !state.update_parameter(entry) {
        debug!("Ignoring unindexed parameter {}", entry.name);
    }

    if !admitted {
        return;
    }

    match entry.name.as_str() {
        FENCE_TOTAL => {
            let _ = state.fence.reset();
            let request = state.fence.on_count(entry.value as u16);
            outbox.request(Collection::Fence, request);
        }
        RALLY_TOTAL => {
            let _ = state.rally.reset();
            let request = state.rally.on_count(entry.value as u16);
            outbox.request(Collection::Rally, request);
        }
        SYSID_THISMAV => {
            let system = entry.value as u8;
            if system != state.connection.target_system {
                debug!("Vehicle system id is now {}", system);
                state.connection.target_system = system;
            }
        }
        _ => {}
    }
}

/// The vehicle accepted a plan transaction
///
/// While a staged upload still has unrequested items the ack belongs to an
/// earlier step (clearing the old plan), so the upload is kept and the
/// download waits. Otherwise the plan on the vehicle changed and is fetched
/// again.
fn on_plan_accepted(state: &mut State, outbox: &mut Outbox) {
    if state.pending_plan.in_progress() {
        debug!("Plan upload in progress, deferring the plan download");
        return;
    }

    debug!("Plan changed on the vehicle, fetching it again");
    state.pending_plan.clear();
    let request = state.plan.reset();
    outbox.request(Collection::Plan, request);
}

fn answer_mission_request(state: &mut State, seq: u16, outbox: &mut Outbox) {
    let Some(item) = state.pending_plan.serve(seq) else {
        debug!("Vehicle asked for plan item {} which is not staged", seq);
        return;
    };

    match encoder::mission_item_int(outbox.target, item) {
        Ok(message) => outbox.messages.push(message),
        Err(e) => warn!("Cannot send plan item {}: {}", seq, e),
    }
}

/// Request the first missing position of every collection this frame did not drive
fn repair(state: &State, outbox: &mut Outbox) {
    let passes = [
        (Collection::Parameter, state.parameters.repair()),
        (Collection::Plan, state.plan.repair()),
        (Collection::Fence, state.fence.repair()),
        (Collection::Rally, state.rally.repair()),
    ];

    for (collection, request) in passes {
        if outbox.drove(collection) {
            continue;
        }
        if let Some(message) = request.and_then(|request| collection.encode(outbox.target, request)) {
            outbox.messages.push(message);
        }
    }
}
