//! # Collection Sync Module
//!
//! One generic partial-fetch state machine, instantiated for parameters,
//! the mission plan, the geofence and rally points.
//!
//! The vehicle delivers items out of order and may drop them, so each
//! engine tracks the positions received so far against the declared total:
//!
//! ```text
//! Idle --reset--> Counting --count--> Fetching --last item--> Complete
//!                    ^                    |
//!                    +---- reset ---------+
//! ```
//!
//! Engines never talk to the link themselves. Every operation returns the
//! [`SyncRequest`] to send, if any, and the classifier encodes it for the
//! collection at hand.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::protocol::dialect::MavMessage;
use crate::protocol::names::{FENCE_TOTAL, RALLY_TOTAL};
use crate::protocol::{encoder, Target};

/// Lifecycle of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Never reset
    Idle,
    /// Waiting for the declared total
    Counting,
    /// Total known, items missing
    Fetching,
    /// Every position up to the total is present
    Complete,
}

/// Request an engine wants sent to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Ask for the declared total (or the whole list)
    List,
    /// Ask for the item at one position
    Item(u16),
}

/// The four mirrored collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Parameter,
    Plan,
    Fence,
    Rally,
}

impl Collection {
    /// Encode a request of this collection's engine
    ///
    /// Fence and rally totals are parameters, so their list request reads
    /// the total parameter. Positions the request message cannot address
    /// (fence and rally above 255, parameters above 32767) yield `None`.
    pub fn encode(self, target: Target, request: SyncRequest) -> Option<MavMessage> {
        match (self, request) {
            (Collection::Parameter, SyncRequest::List) => Some(encoder::param_request_list(target)),
            (Collection::Parameter, SyncRequest::Item(index)) => encoder::param_request_index(target, index)
                .map_err(|e| warn!("Skipping parameter request: {}", e))
                .ok(),
            (Collection::Plan, SyncRequest::List) => Some(encoder::mission_request_list(target)),
            (Collection::Plan, SyncRequest::Item(seq)) => Some(encoder::mission_request_int(target, seq)),
            (Collection::Fence, SyncRequest::List) => Some(encoder::param_request_name(target, FENCE_TOTAL)),
            (Collection::Fence, SyncRequest::Item(idx)) => {
                u8::try_from(idx).ok().map(|idx| encoder::fence_fetch_point(target, idx))
            }
            (Collection::Rally, SyncRequest::List) => Some(encoder::param_request_name(target, RALLY_TOTAL)),
            (Collection::Rally, SyncRequest::Item(idx)) => {
                u8::try_from(idx).ok().map(|idx| encoder::rally_fetch_point(target, idx))
            }
        }
    }
}

/// Generic partial-fetch engine over items of type `T`
#[derive(Debug, Clone)]
pub struct SyncEngine<T> {
    state: SyncState,
    enabled: bool,
    chase: bool,
    total: u16,
    received: BTreeSet<u16>,
    items: BTreeMap<u16, T>,
}

impl<T> SyncEngine<T> {
    /// Create an idle engine
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether the engine may issue requests; items are stored either way
    /// * `chase` - Request `p + 1` right after storing position `p`
    pub fn new(enabled: bool, chase: bool) -> Self {
        Self {
            state: SyncState::Idle,
            enabled,
            chase,
            total: 0,
            received: BTreeSet::new(),
            items: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.state == SyncState::Complete
    }

    /// Positions received so far, including items dropped by a filter
    pub fn received(&self) -> &BTreeSet<u16> {
        &self.received
    }

    /// Stored items ordered by position
    pub fn items(&self) -> &BTreeMap<u16, T> {
        &self.items
    }

    pub fn get(&self, position: u16) -> Option<&T> {
        self.items.get(&position)
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = (&u16, &mut T)> {
        self.items.iter_mut()
    }

    /// Remove stored items rejected by `keep`, leaving their positions received
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, item| keep(item));
    }

    /// Clear the collection and wait for a new total
    ///
    /// # Returns
    ///
    /// * `Option<SyncRequest>` - `List` when the engine is enabled
    pub fn reset(&mut self) -> Option<SyncRequest> {
        self.total = 0;
        self.received.clear();
        self.items.clear();
        self.state = SyncState::Counting;

        self.enabled.then_some(SyncRequest::List)
    }

    /// Record the declared total
    ///
    /// A total equal to the one already being fetched keeps the progress made
    /// so far; any other total clears the collection. A total of zero
    /// completes the engine immediately.
    ///
    /// # Returns
    ///
    /// * `Option<SyncRequest>` - First missing item to fetch, if any
    pub fn on_count(&mut self, total: u16) -> Option<SyncRequest> {
        let fetching = matches!(self.state, SyncState::Fetching | SyncState::Complete);
        if !fetching || total != self.total {
            self.total = total;
            self.received.clear();
            self.items.clear();
        }

        self.update_state();
        self.repair()
    }

    /// Store an item received at `position`
    ///
    /// Items outside the declared total, items arriving before the total is
    /// known and positions already present are ignored.
    ///
    /// # Returns
    ///
    /// * `Option<SyncRequest>` - Chase request for the next position
    pub fn on_item(&mut self, position: u16, item: T) -> Option<SyncRequest> {
        if !self.accepts(position) {
            return None;
        }

        self.items.insert(position, item);
        self.received.insert(position);
        self.update_state();

        let next = position.checked_add(1)?;
        if self.enabled && self.chase && next < self.total && !self.received.contains(&next) {
            Some(SyncRequest::Item(next))
        } else {
            None
        }
    }

    /// Mark `position` as received without storing an item
    ///
    /// Used for filtered parameters, which must not be requested again.
    pub fn on_skipped(&mut self, position: u16) {
        if self.accepts(position) {
            self.received.insert(position);
            self.update_state();
        }
    }

    /// Request the first missing position, if fetching
    pub fn repair(&self) -> Option<SyncRequest> {
        if !self.enabled || self.state != SyncState::Fetching {
            return None;
        }

        (0..self.total)
            .find(|position| !self.received.contains(position))
            .map(SyncRequest::Item)
    }

    fn accepts(&self, position: u16) -> bool {
        matches!(self.state, SyncState::Fetching)
            && position < self.total
            && !self.received.contains(&position)
    }

    fn update_state(&mut self) {
        self.state = if self.received.len() == usize::from(self.total) {
            SyncState::Complete
        } else {
            SyncState::Fetching
        };
    }
}

/// Items staged for an upload the vehicle pulls one position at a time
///
/// The upload stays open until every staged position was served at least
/// once, so acknowledgements of earlier steps (such as clearing the old
/// list) do not end it. Staging a new upload replaces the previous one.
#[derive(Debug, Clone)]
pub struct Upload<T> {
    items: BTreeMap<u16, T>,
    served: BTreeSet<u16>,
}

impl<T> Default for Upload<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            served: BTreeSet::new(),
        }
    }
}

impl<T> Upload<T> {
    /// Replace the staged items
    pub fn stage(&mut self, items: BTreeMap<u16, T>) {
        self.items = items;
        self.served.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, position: u16) -> Option<&T> {
        self.items.get(&position)
    }

    /// Hand out the item the vehicle asked for and remember it was served
    pub fn serve(&mut self, position: u16) -> Option<&T> {
        let item = self.items.get(&position)?;
        self.served.insert(position);
        Some(item)
    }

    /// Staged items remain that the vehicle has not asked for yet
    pub fn in_progress(&self) -> bool {
        self.served.len() < self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.served.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetching(total: u16) -> SyncEngine<u32> {
        let mut engine = SyncEngine::new(true, true);
        engine.reset();
        engine.on_count(total);
        engine
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine: SyncEngine<u32> = SyncEngine::new(true, true);
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.repair(), None);
    }

    #[test]
    fn test_reset_requests_list_only_when_enabled() {
        let mut enabled: SyncEngine<u32> = SyncEngine::new(true, true);
        assert_eq!(enabled.reset(), Some(SyncRequest::List));
        assert_eq!(enabled.state(), SyncState::Counting);

        let mut disabled: SyncEngine<u32> = SyncEngine::new(false, true);
        assert_eq!(disabled.reset(), None);
        assert_eq!(disabled.state(), SyncState::Counting);
    }

    #[test]
    fn test_count_requests_first_item() {
        let mut engine: SyncEngine<u32> = SyncEngine::new(true, true);
        engine.reset();
        assert_eq!(engine.on_count(3), Some(SyncRequest::Item(0)));
        assert_eq!(engine.state(), SyncState::Fetching);
    }

    #[test]
    fn test_zero_total_completes() {
        let mut engine: SyncEngine<u32> = SyncEngine::new(true, true);
        engine.reset();
        assert_eq!(engine.on_count(0), None);
        assert!(engine.is_complete());
    }

    #[test]
    fn test_sequential_chase() {
        let mut engine = fetching(3);
        assert_eq!(engine.on_item(0, 10), Some(SyncRequest::Item(1)));
        assert_eq!(engine.on_item(1, 11), Some(SyncRequest::Item(2)));
        assert_eq!(engine.on_item(2, 12), None);
        assert!(engine.is_complete());
        assert_eq!(engine.items().len(), 3);
    }

    #[test]
    fn test_no_chase_when_disabled() {
        let mut engine: SyncEngine<u32> = SyncEngine::new(true, false);
        engine.reset();
        engine.on_count(3);
        assert_eq!(engine.on_item(0, 10), None);
    }

    #[test]
    fn test_duplicate_item_is_idempotent() {
        let mut engine = fetching(4);
        engine.on_item(1, 11);
        engine.on_item(1, 99);

        assert_eq!(engine.received().len(), 1);
        assert_eq!(engine.get(1), Some(&11));
    }

    #[test]
    fn test_repair_requests_first_missing() {
        let mut engine = fetching(5);
        for position in [0, 1, 3, 4] {
            engine.on_item(position, u32::from(position));
        }

        assert_eq!(engine.state(), SyncState::Fetching);
        assert_eq!(engine.repair(), Some(SyncRequest::Item(2)));

        engine.on_item(2, 2);
        assert!(engine.is_complete());
        assert_eq!(engine.repair(), None);
    }

    #[test]
    fn test_eventual_completeness_under_reordering_and_loss() {
        let mut engine = fetching(6);
        // Out of order, with 1 and 4 lost on the first pass
        for position in [5, 2, 0, 3] {
            engine.on_item(position, u32::from(position));
        }

        let mut rounds = 0;
        while let Some(SyncRequest::Item(position)) = engine.repair() {
            engine.on_item(position, u32::from(position));
            rounds += 1;
        }

        assert_eq!(rounds, 2);
        assert!(engine.is_complete());
        assert_eq!(engine.items().keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_same_total_keeps_progress() {
        let mut engine = fetching(3);
        engine.on_item(0, 10);

        assert_eq!(engine.on_count(3), Some(SyncRequest::Item(1)));
        assert_eq!(engine.received().len(), 1);
    }

    #[test]
    fn test_different_total_clears() {
        let mut engine = fetching(3);
        engine.on_item(0, 10);

        assert_eq!(engine.on_count(4), Some(SyncRequest::Item(0)));
        assert!(engine.items().is_empty());
        assert_eq!(engine.total(), 4);
    }

    #[test]
    fn test_items_outside_total_or_before_count_ignored() {
        let mut engine: SyncEngine<u32> = SyncEngine::new(true, true);
        engine.reset();
        assert_eq!(engine.on_item(0, 1), None);
        assert!(engine.items().is_empty());

        engine.on_count(2);
        engine.on_item(7, 1);
        assert!(engine.items().is_empty());
    }

    #[test]
    fn test_skipped_position_counts_as_received() {
        let mut engine = fetching(2);
        engine.on_skipped(0);
        engine.on_item(1, 11);

        assert!(engine.is_complete());
        assert_eq!(engine.items().len(), 1);
    }

    #[test]
    fn test_disabled_engine_stores_but_never_requests() {
        let mut engine: SyncEngine<u32> = SyncEngine::new(false, true);
        engine.reset();
        assert_eq!(engine.on_count(2), None);
        assert_eq!(engine.on_item(0, 10), None);
        assert_eq!(engine.repair(), None);
        assert_eq!(engine.items().len(), 1);
    }

    #[test]
    fn test_collection_requests() {
        let target = Target::default();

        assert!(matches!(
            Collection::Parameter.encode(target, SyncRequest::List),
            Some(MavMessage::PARAM_REQUEST_LIST(_))
        ));
        assert!(matches!(
            Collection::Plan.encode(target, SyncRequest::Item(3)),
            Some(MavMessage::MISSION_REQUEST_INT(data)) if data.seq == 3
        ));
        assert!(matches!(
            Collection::Fence.encode(target, SyncRequest::List),
            Some(MavMessage::PARAM_REQUEST_READ(_))
        ));
        assert!(matches!(
            Collection::Rally.encode(target, SyncRequest::Item(2)),
            Some(MavMessage::RALLY_FETCH_POINT(data)) if data.idx == 2
        ));
        assert!(Collection::Fence.encode(target, SyncRequest::Item(300)).is_none());
        assert!(Collection::Parameter.encode(target, SyncRequest::Item(40_000)).is_none());
    }

    #[test]
    fn test_retain_keeps_positions_received() {
        let mut engine = fetching(2);
        engine.on_item(0, 10);
        engine.on_item(1, 11);
        engine.retain(|value| *value != 10);

        assert_eq!(engine.items().len(), 1);
        assert!(engine.is_complete());
    }

    #[test]
    fn test_upload_open_until_every_item_served() {
        let mut upload = Upload::default();
        upload.stage(BTreeMap::from([(0, "a"), (1, "b")]));
        assert!(upload.in_progress());

        assert_eq!(upload.serve(0), Some(&"a"));
        assert_eq!(upload.serve(0), Some(&"a"));
        assert!(upload.in_progress());
        assert_eq!(upload.serve(7), None);

        assert_eq!(upload.serve(1), Some(&"b"));
        assert!(!upload.in_progress());
        assert_eq!(upload.len(), 2);
    }

    #[test]
    fn test_upload_restaged() {
        let mut upload = Upload::default();
        upload.stage(BTreeMap::from([(0, 1)]));
        upload.serve(0);

        upload.stage(BTreeMap::from([(0, 2), (1, 3)]));
        assert!(upload.in_progress());
        assert_eq!(upload.get(0), Some(&2));

        upload.clear();
        assert!(upload.is_empty());
        assert!(!upload.in_progress());
    }
}
