//! Per-call state: the logical call record, its two leg timelines and the
//! per-agent sub-timelines.
//!
//! A call is one outbound attempt. Leg A is the outbound trunk call (the
//! dialer side), leg B the local extension/agent side. Asterisk reports leg
//! A events with whole-second granularity, so leg A timestamps are truncated
//! to seconds; leg B keeps millisecond precision.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Timelike, Utc};
use tokio::task::JoinHandle;

/// Role a channel plays within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// The originated trunk channel (leg A)
    Dialer,
    /// The local extension channel bridged against the dialer (leg B)
    Dialed,
    /// A real agent endpoint reached through the local extension
    Agent,
    Unknown,
}

/// Which logical leg a timeline describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    LegA,
    LegB,
}

/// Source of the answered-by identity; agent-sourced identities dominate
/// dialed-sourced ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsweredBySource {
    Dialed,
    Agent,
}

/// Zero the sub-second part of a timestamp.
pub fn second_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Timeline of one logical leg
#[derive(Debug, Clone)]
pub struct LegTimeline {
    pub role: LegRole,
    pub channel_id: Option<String>,
    pub peer_name: Option<String>,
    pub caller_name: Option<String>,
    pub paired_channel_name: Option<String>,
    pub paired_channel_id: Option<String>,
    pub dial_string: Option<String>,
    pub target_number: Option<String>,
    pub answered_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

impl LegTimeline {
    pub fn new(role: LegRole) -> Self {
        Self {
            role,
            channel_id: None,
            peer_name: None,
            caller_name: None,
            paired_channel_name: None,
            paired_channel_id: None,
            dial_string: None,
            target_number: None,
            answered_by: None,
            started_at: None,
            answered_at: None,
            ended_at: None,
            last_status: None,
        }
    }

    /// Apply this leg's timestamp granularity.
    fn granularity(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self.role {
            LegRole::LegA => second_precision(ts),
            LegRole::LegB => ts,
        }
    }

    /// First value wins for all timeline stamps.
    pub fn stamp_started(&mut self, ts: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(self.granularity(ts));
        }
    }

    pub fn stamp_answered(&mut self, ts: DateTime<Utc>) {
        if self.answered_at.is_none() {
            self.answered_at = Some(self.granularity(ts));
        }
    }

    pub fn stamp_ended(&mut self, ts: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(self.granularity(ts));
        }
    }

    /// Whether this leg already carries an answered status, in which case a
    /// later hangup cause must not overwrite it.
    pub fn has_answered_status(&self) -> bool {
        matches!(self.last_status.as_deref(), Some("ANSWER") | Some("ANSWERED"))
    }
}

/// Sub-timeline for one agent channel, distinct from the aggregate leg B
#[derive(Debug, Clone, Default)]
pub struct AgentLeg {
    pub identity: Option<String>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub hangup_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

/// One logical outbound call attempt
#[derive(Debug)]
pub struct CallState {
    pub call_id: String,
    pub number: String,
    pub created_at: DateTime<Utc>,

    /// The call's mixing bridge; at most one
    pub bridge: Option<String>,
    /// Every bridge id ever associated, kept for reverse-index cleanup
    pub bridges: HashSet<String>,
    /// Channel ids currently active in the call
    pub channels: HashSet<String>,
    pub channel_roles: HashMap<String, ChannelRole>,
    pub dialer_channel_id: Option<String>,
    pub dialed_channel_id: Option<String>,
    pub agent_channel_id: Option<String>,
    pub agent_channels: HashSet<String>,
    pub agent_legs: HashMap<String, AgentLeg>,
    /// Asterisk linked ids seen on channels of this call
    pub linked_ids: HashSet<String>,

    /// Whether the partner (leg B) originate has been issued
    pub originated_partner: bool,
    pub dialer_up: bool,

    pub dialer_connected_at: Option<DateTime<Utc>>,
    pub dialed_connected_at: Option<DateTime<Utc>>,
    pub dialer_hangup_at: Option<DateTime<Utc>>,
    pub dialed_hangup_at: Option<DateTime<Utc>>,
    pub agent_answered_at: Option<DateTime<Utc>>,
    pub call_connected_at: Option<DateTime<Utc>>,
    pub effective_connected_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub dialer_hangup_cause: Option<String>,
    pub dialed_hangup_cause: Option<String>,

    pub answered_by: Option<String>,
    pub answered_by_source: Option<AnsweredBySource>,

    pub recording: Option<String>,
    pub recording_id: Option<String>,
    pub recording_path: Option<PathBuf>,
    pub recording_format_used: Option<String>,
    pub recording_started: bool,

    pub leg_a: LegTimeline,
    pub leg_b: LegTimeline,

    /// Terminal idempotence guard; transitions false → true exactly once
    pub summary_logged: bool,
    /// Scheduled cleanup watchdog, aborted on normal completion
    pub watchdog: Option<JoinHandle<()>>,
}

impl CallState {
    pub fn new(call_id: String, number: String, created_at: DateTime<Utc>) -> Self {
        let mut leg_a = LegTimeline::new(LegRole::LegA);
        leg_a.target_number = Some(number.clone());
        leg_a.stamp_started(created_at);
        Self {
            call_id,
            number,
            created_at,
            bridge: None,
            bridges: HashSet::new(),
            channels: HashSet::new(),
            channel_roles: HashMap::new(),
            dialer_channel_id: None,
            dialed_channel_id: None,
            agent_channel_id: None,
            agent_channels: HashSet::new(),
            agent_legs: HashMap::new(),
            linked_ids: HashSet::new(),
            originated_partner: false,
            dialer_up: false,
            dialer_connected_at: None,
            dialed_connected_at: None,
            dialer_hangup_at: None,
            dialed_hangup_at: None,
            agent_answered_at: None,
            call_connected_at: None,
            effective_connected_at: None,
            completed_at: None,
            dialer_hangup_cause: None,
            dialed_hangup_cause: None,
            answered_by: None,
            answered_by_source: None,
            recording: None,
            recording_id: None,
            recording_path: None,
            recording_format_used: None,
            recording_started: false,
            leg_a: LegTimeline::new(LegRole::LegA),
            leg_b: LegTimeline::new(LegRole::LegB),
            summary_logged: false,
            watchdog: None,
        }
        .with_leg_a(leg_a)
    }

    fn with_leg_a(mut self, leg_a: LegTimeline) -> Self {
        self.leg_a = leg_a;
        self
    }

    /// Current role of a channel within this call.
    pub fn channel_role(&self, channel_id: &str) -> ChannelRole {
        self.channel_roles.get(channel_id).copied().unwrap_or(ChannelRole::Unknown)
    }

    /// Assign a role to a channel. A channel moves away from `Unknown`
    /// exactly once; later reassignment attempts are ignored.
    pub fn assign_role(&mut self, channel_id: &str, role: ChannelRole) -> bool {
        match self.channel_roles.get(channel_id) {
            Some(existing) if *existing != ChannelRole::Unknown => false,
            _ => {
                self.channel_roles.insert(channel_id.to_string(), role);
                true
            }
        }
    }

    /// Bind the dialed channel id, honouring the promotion rule: once set,
    /// the id only changes when a `Local/…` placeholder peer name is
    /// superseded by a concrete channel.
    pub fn set_dialed_channel(&mut self, channel_id: &str, channel_name: &str) {
        match &self.dialed_channel_id {
            None => {
                self.dialed_channel_id = Some(channel_id.to_string());
                if self.leg_b.channel_id.is_none() {
                    self.leg_b.channel_id = Some(channel_id.to_string());
                }
                if self.leg_b.peer_name.is_none() && !channel_name.is_empty() {
                    self.leg_b.peer_name = Some(channel_name.to_string());
                }
            }
            Some(existing) if existing == channel_id => {}
            Some(_) => {
                let placeholder = self
                    .leg_b
                    .peer_name
                    .as_deref()
                    .map(|name| name.starts_with("Local/"))
                    .unwrap_or(true);
                if placeholder && !channel_name.starts_with("Local/") && !channel_name.is_empty() {
                    self.dialed_channel_id = Some(channel_id.to_string());
                    self.leg_b.channel_id = Some(channel_id.to_string());
                    self.leg_b.peer_name = Some(channel_name.to_string());
                }
            }
        }
    }

    /// Record who answered, honouring source precedence: an agent-sourced
    /// identity is never overwritten by a dialed-sourced one.
    pub fn set_answered_by(&mut self, identity: &str, source: AnsweredBySource) {
        if identity.is_empty() {
            return;
        }
        match (self.answered_by_source, source) {
            (Some(AnsweredBySource::Agent), AnsweredBySource::Dialed) => {}
            _ => {
                self.answered_by = Some(identity.to_string());
                self.answered_by_source = Some(source);
            }
        }
    }

    /// Fold a new agent answer time in; the earliest answer across agent
    /// legs wins.
    pub fn note_agent_answered(&mut self, ts: DateTime<Utc>) {
        self.agent_answered_at = Some(match self.agent_answered_at {
            Some(existing) => existing.min(ts),
            None => ts,
        });
    }

    /// Recompute the derived connection times after any timestamp changed.
    pub fn recompute_connected(&mut self) {
        // Both talk ends must be up before a conversation start exists; the
        // later of the two is when talking could begin
        let talk_start = match (self.dialed_connected_at, self.dialer_connected_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        let candidates = [self.agent_answered_at, self.call_connected_at, talk_start];
        self.call_connected_at = candidates.into_iter().flatten().min();

        self.effective_connected_at = match (self.effective_connected_at, self.call_connected_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => self.dialer_connected_at,
        };
    }

    /// Earliest time any agent leg was dialed.
    pub fn agent_dialed_at(&self) -> Option<DateTime<Utc>> {
        self.agent_legs.values().filter_map(|leg| leg.dialed_at).min()
    }

    /// Latest hangup time across agent legs.
    pub fn agent_hangup_at(&self) -> Option<DateTime<Utc>> {
        self.agent_legs.values().filter_map(|leg| leg.hangup_at).max()
    }
}
