//! Per-account presence tracking, keyed by bare JID.

use std::collections::HashMap;

use crate::{
    jid::Jid,
    stanza::{PresenceStanza, PresenceType},
};

/// Last known availability of one contact.
#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    pub jid: String,
    pub available: bool,
    pub status: Option<String>,
    pub show: Option<String>,
    pub priority: Option<i8>,
    /// Epoch-ms of the last presence update.
    pub last_seen: Option<i64>,
}

/// Tracks availability per bare JID for a single account. Not shared across
/// accounts.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    states: HashMap<String, PresenceState>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a presence stanza into the tracked state. Error and
    /// subscription presences are ignored.
    pub fn observe(&mut self, presence: &PresenceStanza, now_ms: i64) {
        let Some(from) = presence.from.as_deref() else {
            return;
        };
        let Some(bare) = Jid::parse(from).map(|j| j.bare()) else {
            return;
        };
        let available = match presence.type_ {
            PresenceType::Available => true,
            PresenceType::Unavailable => false,
            PresenceType::Error | PresenceType::Other => return,
        };
        let state = self.states.entry(bare.clone()).or_default();
        state.jid = bare;
        state.available = available;
        state.status = presence.status.clone();
        state.show = presence.show.clone();
        state.priority = presence.priority;
        state.last_seen = Some(now_ms);
    }

    pub fn get(&self, bare_jid: &str) -> Option<&PresenceState> {
        self.states.get(&bare_jid.to_lowercase())
    }

    pub fn snapshot(&self) -> Vec<PresenceState> {
        self.states.values().cloned().collect()
    }
}
