//! Process-wide store of active calls plus the reverse indexes the
//! correlator resolves events through: channel id, bridge id, linked id and
//! recording id, each mapping back to the owning call.
//!
//! Index discipline: whenever a key is inserted into a reverse index, the
//! same key is added to the owning call's mirror (`channels`, `bridges`,
//! `linked_ids`, `recording_id`). Deletion then walks the mirrors, which
//! makes [`CallStateStore::purge_call`] total — after it runs, no index
//! retains a key for the call.
//!
//! Guards handed out by the store must never be held across await points;
//! handlers mutate under a guard, drop it, and only then issue commands.

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use super::call::CallState;

/// Store of active calls with channel/bridge/linked-id reverse lookups
#[derive(Default)]
pub struct CallStateStore {
    calls: DashMap<String, CallState>,
    channel_index: DashMap<String, String>,
    bridge_index: DashMap<String, String>,
    linked_index: DashMap<String, String>,
    recording_index: DashMap<String, String>,
}

impl CallStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call: CallState) {
        self.calls.insert(call.call_id.clone(), call);
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Mutable access to one call. The guard must be dropped before any
    /// await.
    pub fn get_mut(&self, call_id: &str) -> Option<RefMut<'_, String, CallState>> {
        self.calls.get_mut(call_id)
    }

    /// Remove and return a call for its terminal path. Reverse indexes are
    /// left to [`purge_call`](Self::purge_call).
    pub fn take(&self, call_id: &str) -> Option<CallState> {
        self.calls.remove(call_id).map(|(_, call)| call)
    }

    /// Bind a channel to a call: reverse index plus mirror set. The caller
    /// already holds the call's guard, so the call is passed in directly.
    pub fn bind_channel(&self, call: &mut CallState, channel_id: &str) {
        if channel_id.is_empty() {
            return;
        }
        call.channels.insert(channel_id.to_string());
        self.channel_index.insert(channel_id.to_string(), call.call_id.clone());
    }

    /// Unbind one channel after a `ChannelDestroyed`.
    pub fn unbind_channel(&self, call: &mut CallState, channel_id: &str) {
        call.channels.remove(channel_id);
        self.channel_index
            .remove_if(channel_id, |_, owner| owner == &call.call_id);
    }

    pub fn bind_bridge(&self, call: &mut CallState, bridge_id: &str) {
        if bridge_id.is_empty() {
            return;
        }
        call.bridges.insert(bridge_id.to_string());
        self.bridge_index.insert(bridge_id.to_string(), call.call_id.clone());
    }

    pub fn bind_linked(&self, call: &mut CallState, linked_id: &str) {
        if linked_id.is_empty() {
            return;
        }
        call.linked_ids.insert(linked_id.to_string());
        self.linked_index.insert(linked_id.to_string(), call.call_id.clone());
    }

    pub fn bind_recording(&self, call: &mut CallState, recording_id: &str) {
        if recording_id.is_empty() {
            return;
        }
        call.recording_id = Some(recording_id.to_string());
        self.recording_index.insert(recording_id.to_string(), call.call_id.clone());
    }

    pub fn resolve_channel(&self, channel_id: &str) -> Option<String> {
        self.channel_index.get(channel_id).map(|entry| entry.value().clone())
    }

    pub fn resolve_bridge(&self, bridge_id: &str) -> Option<String> {
        self.bridge_index.get(bridge_id).map(|entry| entry.value().clone())
    }

    pub fn resolve_recording(&self, recording_id: &str) -> Option<String> {
        self.recording_index.get(recording_id).map(|entry| entry.value().clone())
    }

    /// Resolve by Asterisk linked id: the index first, then a scan of the
    /// per-call linked-id sets for ids seen before the index entry existed.
    pub fn resolve_linked(&self, linked_id: &str) -> Option<String> {
        if let Some(entry) = self.linked_index.get(linked_id) {
            return Some(entry.value().clone());
        }
        self.calls
            .iter()
            .find(|entry| entry.value().linked_ids.contains(linked_id))
            .map(|entry| entry.key().clone())
    }

    /// Run a closure over every call, collecting the call ids it accepts.
    /// Used by the correlator's scan-based resolution heuristics.
    pub fn matching_calls<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&CallState) -> bool,
    {
        self.calls
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every index entry belonging to a call, walking its mirror sets.
    pub fn purge_call(&self, call: &CallState) {
        for channel_id in &call.channels {
            self.channel_index
                .remove_if(channel_id, |_, owner| owner == &call.call_id);
        }
        // Roles can outlive the channels set when a channel was destroyed
        // before the call went terminal
        for channel_id in call.channel_roles.keys() {
            self.channel_index
                .remove_if(channel_id, |_, owner| owner == &call.call_id);
        }
        for bridge_id in &call.bridges {
            self.bridge_index
                .remove_if(bridge_id, |_, owner| owner == &call.call_id);
        }
        for linked_id in &call.linked_ids {
            self.linked_index
                .remove_if(linked_id, |_, owner| owner == &call.call_id);
        }
        if let Some(recording_id) = &call.recording_id {
            self.recording_index
                .remove_if(recording_id, |_, owner| owner == &call.call_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn index_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.channel_index.len(),
            self.bridge_index.len(),
            self.linked_index.len(),
            self.recording_index.len(),
        )
    }
}
