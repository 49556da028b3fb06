//! Research buckets and their completion timers.
//!
//! Timers are deadlines keyed by `(faction, research type)`. The simulation
//! tick fires every due deadline; there is at most one deadline per key.

use log::{debug, info};
use shared::{ConstructionType, FactionId, ResearchStatus, StructureId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResearchKey {
    pub faction: FactionId,
    pub research_type: ConstructionType,
}

impl ResearchKey {
    pub fn new(faction: FactionId, research_type: ConstructionType) -> Self {
        Self {
            faction,
            research_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchState {
    pub state: ResearchStatus,
    pub started_at: Option<u64>,
    pub complete_at: Option<u64>,
    pub seen_pending: bool,
    pub notified: bool,
    /// Structure running the research while pending.
    pub building: Option<StructureId>,
}

impl Default for ResearchState {
    fn default() -> Self {
        Self {
            state: ResearchStatus::Idle,
            started_at: None,
            complete_at: None,
            seen_pending: false,
            notified: false,
            building: None,
        }
    }
}

/// A state change worth broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResearchEvent {
    pub key: ResearchKey,
    pub state: ResearchStatus,
    pub complete_at: Option<u64>,
}

pub struct ResearchRegistry {
    states: HashMap<ResearchKey, ResearchState>,
    timers: HashMap<ResearchKey, u64>,
    duration_ms: u64,
}

impl ResearchRegistry {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            states: HashMap::new(),
            timers: HashMap::new(),
            duration_ms,
        }
    }

    pub fn state(&self, key: &ResearchKey) -> Option<&ResearchState> {
        self.states.get(key)
    }

    pub fn status(&self, key: &ResearchKey) -> ResearchStatus {
        self.states
            .get(key)
            .map(|s| s.state)
            .unwrap_or(ResearchStatus::Idle)
    }

    pub fn has_completed(&self, faction: FactionId, research_type: ConstructionType) -> bool {
        self.status(&ResearchKey::new(faction, research_type)) == ResearchStatus::Complete
    }

    /// Moves an idle bucket to pending and arms its timer.
    pub fn start(&mut self, key: ResearchKey, building: &StructureId, now: u64) -> Option<ResearchEvent> {
        let complete_at = now + self.duration_ms;
        let state = self.states.entry(key).or_default();
        if state.state != ResearchStatus::Idle {
            return None;
        }

        state.state = ResearchStatus::Pending;
        state.started_at = Some(now);
        state.complete_at = Some(complete_at);
        state.seen_pending = true;
        state.notified = false;
        state.building = Some(building.clone());

        self.schedule(key, complete_at);
        info!(
            "Faction {} started research {} (completes at {})",
            key.faction, key.research_type, complete_at
        );

        Some(ResearchEvent {
            key,
            state: ResearchStatus::Pending,
            complete_at: Some(complete_at),
        })
    }

    /// Arms the timer for `key`, replacing any earlier one.
    pub fn schedule(&mut self, key: ResearchKey, complete_at: u64) {
        self.cancel_timer(&key);
        self.timers.insert(key, complete_at);
    }

    pub fn cancel_timer(&mut self, key: &ResearchKey) -> bool {
        self.timers.remove(key).is_some()
    }

    pub fn has_timer(&self, key: &ResearchKey) -> bool {
        self.timers.contains_key(key)
    }

    /// Returns a pending bucket to idle. Complete buckets are left alone.
    pub fn cancel(&mut self, key: &ResearchKey) -> Option<ResearchEvent> {
        let state = self.states.get_mut(key)?;
        if state.state != ResearchStatus::Pending {
            return None;
        }

        *state = ResearchState::default();
        self.timers.remove(key);
        debug!(
            "Faction {} cancelled research {}",
            key.faction, key.research_type
        );

        Some(ResearchEvent {
            key: *key,
            state: ResearchStatus::Idle,
            complete_at: None,
        })
    }

    /// Completes a bucket. Yields an event only for the first completion
    /// of a research that was observed pending.
    pub fn complete(&mut self, key: &ResearchKey) -> Option<ResearchEvent> {
        self.timers.remove(key);
        let state = self.states.entry(*key).or_default();
        state.state = ResearchStatus::Complete;
        state.complete_at = None;
        state.building = None;

        if !state.seen_pending || state.notified {
            return None;
        }
        state.notified = true;
        info!(
            "Faction {} completed research {}",
            key.faction, key.research_type
        );

        Some(ResearchEvent {
            key: *key,
            state: ResearchStatus::Complete,
            complete_at: None,
        })
    }

    /// Completes every bucket whose deadline is at or before `now`.
    pub fn fire_due(&mut self, now: u64) -> Vec<ResearchEvent> {
        let mut due: Vec<ResearchKey> = self
            .timers
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| *key)
            .collect();
        due.sort();

        due.iter().filter_map(|key| self.complete(key)).collect()
    }

    /// Cancels every pending bucket run by `building`.
    pub fn cancel_for_building(&mut self, building: &StructureId) -> Vec<ResearchEvent> {
        let mut keys: Vec<ResearchKey> = self
            .states
            .iter()
            .filter(|(_, s)| s.state == ResearchStatus::Pending && s.building.as_ref() == Some(building))
            .map(|(key, _)| *key)
            .collect();
        keys.sort();

        keys.iter().filter_map(|key| self.cancel(key)).collect()
    }

    pub fn pending_keys(&self) -> Vec<ResearchKey> {
        let mut keys: Vec<ResearchKey> = self
            .states
            .iter()
            .filter(|(_, s)| s.state == ResearchStatus::Pending)
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    /// Every non-idle bucket of `faction`, ordered by research type.
    pub fn buckets_for(&self, faction: FactionId) -> Vec<(ConstructionType, ResearchStatus)> {
        let mut buckets: Vec<(ConstructionType, ResearchStatus)> = self
            .states
            .iter()
            .filter(|(key, s)| key.faction == faction && s.state != ResearchStatus::Idle)
            .map(|(key, s)| (key.research_type, s.state))
            .collect();
        buckets.sort();
        buckets
    }

    /// Every non-idle bucket of every faction, as broadcastable events.
    pub fn non_idle(&self) -> Vec<ResearchEvent> {
        let mut events: Vec<ResearchEvent> = self
            .states
            .iter()
            .filter(|(_, s)| s.state != ResearchStatus::Idle)
            .map(|(key, s)| ResearchEvent {
                key: *key,
                state: s.state,
                complete_at: s.complete_at,
            })
            .collect();
        events.sort_by_key(|event| event.key);
        events
    }

    pub fn forget_faction(&mut self, faction: FactionId) {
        self.states.retain(|key, _| key.faction != faction);
        self.timers.retain(|key, _| key.faction != faction);
    }
}
