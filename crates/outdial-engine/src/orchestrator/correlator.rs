//! The event correlator: resolves which call and which leg every ARI event
//! belongs to, updates the per-leg timelines and issues follow-up commands.
//!
//! Handlers are written in two phases. Phase one mutates call state under
//! the store guard and collects the commands to issue; phase two runs after
//! the guard is dropped and awaits the ARI calls. Guards are never held
//! across await points.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use outdial_ari::{AriEvent, Bridge, Channel, LiveRecording, OriginateRequest};

use crate::config::DialerConfig;
use crate::state::{AnsweredBySource, ChannelRole};

use super::core::DialerEngine;
use super::naming::{
    is_local_first_half, is_target_local_name, normalize_status, paired_half_name, pick_status,
    strip_half_suffix,
};

/// What happened to a channel: left the application, or destroyed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoneKind {
    StasisEnd,
    Destroyed,
}

fn event_time(timestamp: Option<DateTime<Utc>>) -> DateTime<Utc> {
    timestamp.unwrap_or_else(Utc::now)
}

/// Split Stasis app args into `(role, call_id)`, tolerating both a proper
/// argument list and a single comma-joined string.
fn parse_app_args(args: &[String]) -> (Option<String>, Option<String>) {
    let flattened: Vec<String> = if args.len() == 1 && args[0].contains(',') {
        args[0].split(',').map(|s| s.trim().to_string()).collect()
    } else {
        args.to_vec()
    };
    (flattened.first().cloned(), flattened.get(1).cloned())
}

impl DialerEngine {
    /// Entry point for one telephony event.
    pub(crate) async fn handle_ari_event(&self, event: AriEvent) {
        match event {
            AriEvent::StasisStart { channel, args, timestamp } => {
                self.on_stasis_start(channel, args, timestamp).await;
            }
            AriEvent::StasisEnd { channel, timestamp, .. } => {
                self.on_channel_gone(GoneKind::StasisEnd, channel, None, timestamp).await;
            }
            AriEvent::ChannelDestroyed { channel, cause_txt, timestamp, .. } => {
                self.on_channel_gone(GoneKind::Destroyed, channel, cause_txt, timestamp).await;
            }
            AriEvent::ChannelStateChange { channel, timestamp } => {
                self.on_state_change(channel, timestamp).await;
            }
            AriEvent::Dial { caller, peer, dialstring, dialstatus, timestamp } => {
                self.on_dial(caller, peer, dialstring, dialstatus, timestamp).await;
            }
            AriEvent::BridgeEnter { bridge, channel, timestamp } => {
                self.on_bridge_enter(bridge, channel, timestamp).await;
            }
            AriEvent::RecordingFinished { recording, .. } => {
                self.on_recording_finished(recording).await;
            }
        }
    }

    /// Resolution ladder shared by the non-Dial handlers: direct channel
    /// index, then linked id.
    fn resolve_channel_call(&self, channel: &Channel) -> Option<String> {
        if let Some(call_id) = self.store.resolve_channel(&channel.id) {
            return Some(call_id);
        }
        if let Some(linked_id) = &channel.linkedid {
            if let Some(call_id) = self.store.resolve_linked(linked_id) {
                return Some(call_id);
            }
        }
        None
    }

    // === StasisStart ====================================================

    async fn on_stasis_start(
        &self,
        channel: Channel,
        args: Vec<String>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let ts = event_time(timestamp);
        let (role, call_id) = parse_app_args(&args);
        match (role.as_deref(), call_id) {
            (Some("dialer"), Some(call_id)) => self.on_dialer_start(channel, &call_id, ts).await,
            (Some("dialed"), Some(call_id)) => self.on_dialed_start(channel, &call_id, ts).await,
            _ => {
                // A channel without our app args: correlate and register it
                match self.resolve_channel_call(&channel) {
                    Some(call_id) => {
                        if let Some(mut call) = self.store.get_mut(&call_id) {
                            self.store.bind_channel(&mut call, &channel.id);
                            if let Some(linked_id) = &channel.linkedid {
                                self.store.bind_linked(&mut call, linked_id);
                            }
                        }
                        debug!(channel = %channel.name, call_id = %call_id, "Unlabelled channel entered application");
                    }
                    None => {
                        warn!(channel = %channel.name, "Dropping StasisStart for unresolvable channel");
                    }
                }
            }
        }
    }

    async fn on_dialer_start(&self, channel: Channel, call_id: &str, ts: DateTime<Utc>) {
        let config = self.config.read().await.clone();

        let is_up = channel.state == "Up";
        let (need_bridge, partner_request) = {
            let Some(mut call) = self.store.get_mut(call_id) else {
                warn!(call_id = %call_id, channel = %channel.name, "StasisStart for unknown call");
                return;
            };
            self.store.bind_channel(&mut call, &channel.id);
            if let Some(linked_id) = &channel.linkedid {
                self.store.bind_linked(&mut call, linked_id);
            }
            call.assign_role(&channel.id, ChannelRole::Dialer);
            if call.dialer_channel_id.is_none() {
                call.dialer_channel_id = Some(channel.id.clone());
            }
            call.leg_a.channel_id.get_or_insert_with(|| channel.id.clone());
            call.leg_a.peer_name = Some(channel.name.clone());
            if call.leg_a.caller_name.is_none() {
                call.leg_a.caller_name = channel.caller.identity();
            }
            call.leg_a.stamp_started(ts);
            if is_up {
                call.dialer_up = true;
                call.leg_a.stamp_answered(ts);
                if call.dialer_connected_at.is_none() {
                    call.dialer_connected_at = Some(ts);
                }
                call.recompute_connected();
            }

            let need_bridge = call.bridge.is_none();
            let partner_request = if call.originated_partner {
                None
            } else {
                call.originated_partner = true;
                let endpoint = config.dialing.partner_endpoint();
                call.leg_b.dial_string.get_or_insert_with(|| endpoint.clone());
                call.leg_b
                    .target_number
                    .get_or_insert_with(|| config.dialing.partner_target_number());
                Some(OriginateRequest {
                    endpoint,
                    app: config.ari.stasis_app.clone(),
                    app_args: vec!["dialed".to_string(), call.call_id.clone()],
                    // Caller id prefers the call's own destination number
                    caller_id: if call.number.is_empty() {
                        config.dialing.caller_id.clone()
                    } else {
                        Some(call.number.clone())
                    },
                    timeout_seconds: config.dialing.call_timeout,
                })
            };
            (need_bridge, partner_request)
        };

        if need_bridge {
            let bridge_name = format!("bridge-{call_id}");
            match self.ari.create_bridge(&bridge_name).await {
                Ok(bridge) => {
                    if let Some(mut call) = self.store.get_mut(call_id) {
                        call.bridge = Some(bridge.id.clone());
                        self.store.bind_bridge(&mut call, &bridge.id);
                    }
                    if let Err(e) = self.ari.add_channel(&bridge.id, &channel.id).await {
                        warn!(call_id = %call_id, error = %e, "Failed to add dialer channel to bridge");
                    }
                }
                Err(e) => {
                    error!(call_id = %call_id, error = %e, "Failed to create mixing bridge");
                }
            }
        }

        if is_up {
            self.start_call_recording(call_id).await;
        }

        if let Some(request) = partner_request {
            info!(call_id = %call_id, endpoint = %request.endpoint, "📞 Originating partner leg");
            match self.ari.originate(request).await {
                Ok(partner) => {
                    if let Some(mut call) = self.store.get_mut(call_id) {
                        self.store.bind_channel(&mut call, &partner.id);
                        if let Some(linked_id) = &partner.linkedid {
                            self.store.bind_linked(&mut call, linked_id);
                        }
                    }
                }
                Err(e) => {
                    error!(call_id = %call_id, error = %e, "Partner originate failed, cleaning up call");
                    self.complete_call(call_id).await;
                }
            }
        }
    }

    async fn on_dialed_start(&self, channel: Channel, call_id: &str, ts: DateTime<Utc>) {
        let bridge_id = {
            let Some(mut call) = self.store.get_mut(call_id) else {
                warn!(call_id = %call_id, channel = %channel.name, "StasisStart for unknown call");
                return;
            };
            self.store.bind_channel(&mut call, &channel.id);
            if let Some(linked_id) = &channel.linkedid {
                self.store.bind_linked(&mut call, linked_id);
            }
            call.assign_role(&channel.id, ChannelRole::Dialed);
            call.set_dialed_channel(&channel.id, &channel.name);
            call.leg_b.peer_name.get_or_insert_with(|| channel.name.clone());
            if call.leg_b.caller_name.is_none() {
                call.leg_b.caller_name = channel.caller.identity();
            }
            call.leg_b.stamp_started(ts);
            if let Some(identity) = channel.connected.identity().or_else(|| channel.caller.identity())
            {
                call.set_answered_by(&identity, AnsweredBySource::Dialed);
            }
            if channel.state == "Up" {
                call.leg_b.stamp_answered(ts);
                if call.dialed_connected_at.is_none() {
                    call.dialed_connected_at = Some(ts);
                }
                call.recompute_connected();
            }
            call.bridge.clone()
        };

        if let Err(e) = self.ari.answer(&channel.id).await {
            warn!(call_id = %call_id, error = %e, "Failed to answer dialed channel");
        }
        if let Some(bridge_id) = bridge_id {
            if let Err(e) = self.ari.add_channel(&bridge_id, &channel.id).await {
                warn!(call_id = %call_id, error = %e, "Failed to add dialed channel to bridge");
            }
        }
        self.start_call_recording(call_id).await;
    }

    // === StasisEnd / ChannelDestroyed ===================================

    async fn on_channel_gone(
        &self,
        kind: GoneKind,
        channel: Channel,
        cause_txt: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let ts = event_time(timestamp);
        let config = self.config.read().await.clone();
        let Some(call_id) = self.resolve_channel_call(&channel) else {
            warn!(channel = %channel.name, "Dropping {kind:?} for unresolvable channel");
            return;
        };

        let (others_to_hangup, call_is_over) = {
            let Some(mut call) = self.store.get_mut(&call_id) else { return };

            let mut role = call.channel_role(&channel.id);
            if role == ChannelRole::Unknown {
                role = infer_gone_role(&call, &channel, &config);
                if role != ChannelRole::Unknown {
                    call.assign_role(&channel.id, role);
                }
            }

            match role {
                ChannelRole::Dialer => {
                    if let Some(cause) = &cause_txt {
                        call.dialer_hangup_cause.get_or_insert_with(|| cause.clone());
                        if !call.leg_a.has_answered_status() {
                            call.leg_a.last_status = normalize_status(cause);
                        }
                    }
                    if call.dialer_hangup_at.is_none() {
                        call.dialer_hangup_at = Some(ts);
                    }
                    call.leg_a.stamp_ended(ts);
                }
                ChannelRole::Dialed => {
                    if let Some(cause) = &cause_txt {
                        call.dialed_hangup_cause.get_or_insert_with(|| cause.clone());
                        if !call.leg_b.has_answered_status() {
                            call.leg_b.last_status = normalize_status(cause);
                        }
                    }
                    if call.dialed_hangup_at.is_none() {
                        call.dialed_hangup_at = Some(ts);
                    }
                    call.leg_b.stamp_ended(ts);
                }
                ChannelRole::Agent => {
                    let leg = call.agent_legs.entry(channel.id.clone()).or_default();
                    if leg.hangup_at.is_none() {
                        leg.hangup_at = Some(ts);
                    }
                    if let Some(cause) = &cause_txt {
                        if leg.last_status.is_none() {
                            leg.last_status = normalize_status(cause);
                        }
                    }
                }
                ChannelRole::Unknown => {}
            }

            let others_to_hangup = if kind == GoneKind::StasisEnd
                && matches!(role, ChannelRole::Dialer | ChannelRole::Dialed)
            {
                call.channels
                    .iter()
                    .filter(|id| id.as_str() != channel.id)
                    .cloned()
                    .collect::<Vec<_>>()
            } else {
                Vec::new()
            };

            let mut call_is_over = false;
            if kind == GoneKind::Destroyed {
                self.store.unbind_channel(&mut call, &channel.id);
                call.agent_channels.remove(&channel.id);
                call_is_over = call.channels.is_empty();
            }
            (others_to_hangup, call_is_over)
        };

        for other in others_to_hangup {
            if let Err(e) = self.ari.hangup(&other).await {
                if !e.is_not_found() {
                    warn!(call_id = %call_id, channel_id = %other, error = %e, "Failed to hang up peer channel");
                }
            }
        }

        if call_is_over {
            self.complete_call(&call_id).await;
        }
    }

    // === ChannelStateChange =============================================

    async fn on_state_change(&self, channel: Channel, timestamp: Option<DateTime<Utc>>) {
        let ts = event_time(timestamp);
        let Some(call_id) = self.resolve_channel_call(&channel) else {
            warn!(channel = %channel.name, "Dropping ChannelStateChange for unresolvable channel");
            return;
        };

        let want_record = {
            let Some(mut call) = self.store.get_mut(&call_id) else { return };
            let mut role = call.channel_role(&channel.id);
            if role == ChannelRole::Unknown {
                if call.dialer_channel_id.as_deref() == Some(channel.id.as_str()) {
                    role = ChannelRole::Dialer;
                } else if call.dialed_channel_id.as_deref() == Some(channel.id.as_str()) {
                    role = ChannelRole::Dialed;
                }
            }
            let mut want_record = false;
            match role {
                ChannelRole::Dialer if channel.state == "Up" => {
                    call.leg_a.stamp_answered(ts);
                    if call.dialer_connected_at.is_none() {
                        call.dialer_connected_at = Some(ts);
                    }
                    call.dialer_up = true;
                    call.recompute_connected();
                    want_record = true;
                }
                ChannelRole::Dialed if channel.state == "Up" => {
                    call.leg_b.stamp_answered(ts);
                    if call.dialed_connected_at.is_none() {
                        call.dialed_connected_at = Some(ts);
                    }
                    if let Some(identity) =
                        channel.connected.identity().or_else(|| channel.caller.identity())
                    {
                        call.set_answered_by(&identity, AnsweredBySource::Dialed);
                    }
                    call.recompute_connected();
                    want_record = true;
                }
                ChannelRole::Agent => {
                    let identity = channel
                        .connected
                        .identity()
                        .or_else(|| channel.caller.identity())
                        .unwrap_or_else(|| channel.name.clone());
                    match channel.state.as_str() {
                        "Up" => {
                            let leg = call.agent_legs.entry(channel.id.clone()).or_default();
                            leg.identity.get_or_insert_with(|| identity.clone());
                            if leg.answered_at.is_none() {
                                leg.answered_at = Some(ts);
                            }
                            call.note_agent_answered(ts);
                            call.agent_channel_id.get_or_insert_with(|| channel.id.clone());
                            call.set_answered_by(&identity, AnsweredBySource::Agent);
                            call.recompute_connected();
                        }
                        "Down" | "Hungup" => {
                            let leg = call.agent_legs.entry(channel.id.clone()).or_default();
                            if leg.hangup_at.is_none() {
                                leg.hangup_at = Some(ts);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            want_record
        };

        if want_record {
            self.start_call_recording(&call_id).await;
        }
    }

    // === Dial ===========================================================

    async fn on_dial(
        &self,
        caller: Option<Channel>,
        peer: Option<Channel>,
        dialstring: Option<String>,
        dialstatus: String,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let ts = event_time(timestamp);
        let config = self.config.read().await.clone();
        let status = normalize_status(&dialstatus);

        let Some(call_id) = self.resolve_dial(caller.as_ref(), peer.as_ref(), dialstring.as_deref(), &config)
        else {
            let name = peer
                .as_ref()
                .or(caller.as_ref())
                .map(|c| c.name.as_str())
                .unwrap_or("<none>");
            warn!(channel = %name, dialstatus = %dialstatus, "Dropping Dial event for unresolvable channel");
            return;
        };

        let Some(mut call) = self.store.get_mut(&call_id) else { return };

        for (position, candidate) in
            [(DialPosition::Caller, caller.as_ref()), (DialPosition::Peer, peer.as_ref())]
        {
            let Some(candidate) = candidate else { continue };
            self.store.bind_channel(&mut call, &candidate.id);
            if let Some(linked_id) = &candidate.linkedid {
                self.store.bind_linked(&mut call, linked_id);
            }

            match classify_dial_candidate(&call, candidate, &config) {
                DialLeg::LegA => {
                    if let Some(ds) = &dialstring {
                        call.leg_a.dial_string.get_or_insert_with(|| ds.clone());
                    }
                    match status.as_deref() {
                        Some("ANSWERED") => call.leg_a.stamp_answered(ts),
                        None => call.leg_a.stamp_started(ts),
                        Some(_) => {}
                    }
                    if status.is_some() {
                        call.leg_a.last_status = pick_status([
                            call.leg_a.last_status.as_deref(),
                            Some(dialstatus.as_str()),
                        ]);
                    }
                }
                DialLeg::LegB => {
                    call.assign_role(&candidate.id, ChannelRole::Dialed);
                    call.set_dialed_channel(&candidate.id, &candidate.name);
                    // Record the opposite local half as the paired channel
                    if let Some(peer_name) = call.leg_b.peer_name.clone() {
                        if candidate.name != peer_name
                            && paired_half_name(&peer_name).as_deref()
                                == Some(candidate.name.as_str())
                        {
                            call.leg_b.paired_channel_name = Some(candidate.name.clone());
                            call.leg_b.paired_channel_id = Some(candidate.id.clone());
                        }
                    }
                    if let Some(ds) = &dialstring {
                        call.leg_b.dial_string.get_or_insert_with(|| ds.clone());
                    }
                    match status.as_deref() {
                        Some("ANSWERED") => {
                            call.leg_b.stamp_answered(ts);
                            if call.leg_b.answered_by.is_none() {
                                call.leg_b.answered_by = dialstring
                                    .clone()
                                    .or_else(|| peer.as_ref().map(|p| p.name.clone()));
                            }
                        }
                        None => call.leg_b.stamp_started(ts),
                        Some(_) => {}
                    }
                    if status.is_some() {
                        call.leg_b.last_status = pick_status([
                            call.leg_b.last_status.as_deref(),
                            Some(dialstatus.as_str()),
                        ]);
                    }
                }
                DialLeg::Other => {
                    // Agent endpoints only ever show up in peer position; the
                    // `;1` half of a local pair is not a real endpoint.
                    if position != DialPosition::Peer || is_local_first_half(&candidate.name) {
                        continue;
                    }
                    call.assign_role(&candidate.id, ChannelRole::Agent);
                    call.agent_channels.insert(candidate.id.clone());
                    let identity = candidate
                        .caller
                        .identity()
                        .or_else(|| candidate.connected.identity())
                        .unwrap_or_else(|| candidate.name.clone());
                    let leg = call.agent_legs.entry(candidate.id.clone()).or_default();
                    leg.identity.get_or_insert_with(|| identity.clone());
                    if leg.dialed_at.is_none() {
                        leg.dialed_at = Some(ts);
                    }
                    match status.as_deref() {
                        Some("ANSWERED") => {
                            if leg.answered_at.is_none() {
                                leg.answered_at = Some(ts);
                            }
                            leg.last_status = Some("ANSWERED".to_string());
                            call.note_agent_answered(ts);
                            call.agent_channel_id.get_or_insert_with(|| candidate.id.clone());
                            call.set_answered_by(&identity, AnsweredBySource::Agent);
                            call.recompute_connected();
                        }
                        Some("RINGING") => {
                            leg.last_status = Some("RINGING".to_string());
                        }
                        Some(other) => {
                            if leg.hangup_at.is_none() {
                                leg.hangup_at = Some(ts);
                            }
                            leg.last_status = Some(other.to_string());
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// The Dial-specific resolution ladder.
    fn resolve_dial(
        &self,
        caller: Option<&Channel>,
        peer: Option<&Channel>,
        dialstring: Option<&str>,
        config: &DialerConfig,
    ) -> Option<String> {
        let candidates: Vec<&Channel> = [caller, peer].into_iter().flatten().collect();

        // 1–3: direct and linked-id indexes, caller first
        for candidate in &candidates {
            if let Some(call_id) = self.resolve_channel_call(candidate) {
                return Some(call_id);
            }
        }

        // 4: dialstring prefix against in-flight numbers, unique match only
        if let Some(dialstring) = dialstring {
            let prefix = dialstring.split('@').next().unwrap_or(dialstring);
            let number = prefix.split('/').next_back().unwrap_or(prefix);
            let matches: Vec<String> = self
                .in_flight
                .iter()
                .filter(|entry| entry.value() == number)
                .map(|entry| entry.key().clone())
                .collect();
            match matches.len() {
                1 => return Some(matches.into_iter().next().unwrap()),
                n if n > 1 => {
                    warn!(dialstring = %dialstring, matches = n, "Ambiguous dialstring match, not associating");
                }
                _ => {}
            }
        }

        // 5: local-channel heuristic against the target extension
        for candidate in &candidates {
            if !is_target_local_name(&candidate.name, &config.dialing) {
                continue;
            }
            let matches = self.store.matching_calls(|call| {
                call.originated_partner
                    && call.leg_b.channel_id.is_none()
                    && call.dialed_channel_id.is_none()
                    && !call.channel_roles.values().any(|r| *r == ChannelRole::Dialed)
            });
            if matches.len() == 1 {
                return matches.into_iter().next();
            }
        }

        // 6: channel-name variants against leg peer / paired names
        for candidate in &candidates {
            let variant = paired_half_name(&candidate.name);
            let matches = self.store.matching_calls(|call| {
                [
                    call.leg_a.peer_name.as_deref(),
                    call.leg_a.paired_channel_name.as_deref(),
                    call.leg_b.peer_name.as_deref(),
                    call.leg_b.paired_channel_name.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|name| name == candidate.name || Some(name) == variant.as_deref())
            });
            if let Some(call_id) = matches.into_iter().next() {
                return Some(call_id);
            }
        }

        None
    }

    // === BridgeEnter ====================================================

    async fn on_bridge_enter(
        &self,
        bridge: Bridge,
        channel: Channel,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let ts = event_time(timestamp);
        let config = self.config.read().await.clone();
        let call_id = self
            .store
            .resolve_bridge(&bridge.id)
            .or_else(|| self.resolve_channel_call(&channel));
        let Some(call_id) = call_id else {
            warn!(bridge = %bridge.id, channel = %channel.name, "Dropping BridgeEnter for unresolvable bridge");
            return;
        };

        let Some(mut call) = self.store.get_mut(&call_id) else { return };
        self.store.bind_bridge(&mut call, &bridge.id);
        self.store.bind_channel(&mut call, &channel.id);
        if let Some(linked_id) = &channel.linkedid {
            self.store.bind_linked(&mut call, linked_id);
        }

        match call.channel_role(&channel.id) {
            ChannelRole::Dialer | ChannelRole::Dialed => {}
            role => {
                if is_target_local_name(&channel.name, &config.dialing)
                    && role != ChannelRole::Agent
                {
                    // A late local half: this is the dialed leg, not an agent
                    call.assign_role(&channel.id, ChannelRole::Dialed);
                    call.set_dialed_channel(&channel.id, &channel.name);
                    call.leg_b.stamp_started(ts);
                } else {
                    let identity = channel
                        .connected
                        .identity()
                        .or_else(|| channel.caller.identity())
                        .unwrap_or_else(|| channel.name.clone());
                    call.assign_role(&channel.id, ChannelRole::Agent);
                    call.agent_channels.insert(channel.id.clone());
                    call.agent_channel_id.get_or_insert_with(|| channel.id.clone());
                    let leg = call.agent_legs.entry(channel.id.clone()).or_default();
                    leg.identity.get_or_insert_with(|| identity.clone());
                    if leg.answered_at.is_none() {
                        leg.answered_at = Some(ts);
                    }
                    call.note_agent_answered(ts);
                    call.set_answered_by(&identity, AnsweredBySource::Agent);
                    call.recompute_connected();
                    info!(call_id = %call_id, agent = %identity, "🎧 Agent joined bridge");
                }
            }
        }
    }

    // === RecordingFinished ==============================================

    async fn on_recording_finished(&self, recording: LiveRecording) {
        let owner = self.store.resolve_recording(&recording.name);
        if self.recordings.on_finished(&recording.name) {
            debug!(
                recording = %recording.name,
                call_id = %owner.as_deref().unwrap_or("<completed>"),
                "Recording finished, verification scheduled"
            );
        } else {
            debug!(recording = %recording.name, "RecordingFinished for recording we do not own");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialPosition {
    Caller,
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialLeg {
    LegA,
    LegB,
    Other,
}

/// Which leg a Dial candidate belongs to.
fn classify_dial_candidate(
    call: &crate::state::CallState,
    candidate: &Channel,
    config: &DialerConfig,
) -> DialLeg {
    let id = candidate.id.as_str();
    if call.dialer_channel_id.as_deref() == Some(id)
        || call.leg_a.channel_id.as_deref() == Some(id)
    {
        return DialLeg::LegA;
    }
    if call.dialed_channel_id.as_deref() == Some(id)
        || call.leg_b.channel_id.as_deref() == Some(id)
        || call.leg_b.paired_channel_id.as_deref() == Some(id)
    {
        return DialLeg::LegB;
    }
    // The other half of the dialed local pair counts as leg B
    let variant = paired_half_name(&candidate.name);
    let known_b_names = [call.leg_b.peer_name.as_deref(), call.leg_b.paired_channel_name.as_deref()];
    if known_b_names.into_iter().flatten().any(|name| {
        name == candidate.name
            || Some(name) == variant.as_deref()
            || strip_half_suffix(name) == strip_half_suffix(&candidate.name)
    }) {
        return DialLeg::LegB;
    }
    if is_target_local_name(&candidate.name, &config.dialing) {
        return DialLeg::LegB;
    }
    DialLeg::Other
}

/// Infer the role of a disappearing channel that was never tagged: known
/// ids first, then leg timelines, then the local-name heuristic, then the
/// first unfilled canonical role.
fn infer_gone_role(
    call: &crate::state::CallState,
    channel: &Channel,
    config: &DialerConfig,
) -> ChannelRole {
    let id = channel.id.as_str();
    if call.dialer_channel_id.as_deref() == Some(id)
        || call.leg_a.channel_id.as_deref() == Some(id)
    {
        return ChannelRole::Dialer;
    }
    if call.dialed_channel_id.as_deref() == Some(id)
        || call.leg_b.channel_id.as_deref() == Some(id)
        || call.leg_b.paired_channel_id.as_deref() == Some(id)
    {
        return ChannelRole::Dialed;
    }
    if is_target_local_name(&channel.name, &config.dialing) {
        return ChannelRole::Dialed;
    }
    if call.dialer_channel_id.is_none() {
        ChannelRole::Dialer
    } else if call.dialed_channel_id.is_none() {
        ChannelRole::Dialed
    } else {
        ChannelRole::Unknown
    }
}
