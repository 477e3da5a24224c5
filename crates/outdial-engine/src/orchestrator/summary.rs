//! Per-call summary: leg statuses, wait/talk durations, the single-line
//! summary record and the persistence row.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::database::{CallLegRow, LegColumns};
use crate::state::CallState;

use super::naming::pick_status;

/// Wait/talk figures and final status for one leg
#[derive(Debug, Clone)]
pub struct LegSummary {
    pub status: String,
    pub wait_seconds: i64,
    pub talk_seconds: i64,
}

/// Everything the summary line and the persistence row are built from
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: String,
    pub created_at: DateTime<Utc>,
    pub number: String,
    pub leg_a: LegSummary,
    pub leg_b: LegSummary,
    pub answered_by: Option<String>,
    pub recording_path: Option<String>,
}

/// Seconds between two instants, rounded to the nearest whole second and
/// clamped at zero.
fn round_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let millis = (to - from).num_milliseconds();
    ((millis as f64 / 1000.0).round() as i64).max(0)
}

/// Compute the terminal summary for a call.
pub fn compute_summary(call: &CallState) -> CallSummary {
    let completed_at = call.completed_at.unwrap_or_else(Utc::now);

    // Leg A answered means both talk ends came up
    let leg_a_status = if call.dialer_connected_at.is_some() && call.dialed_connected_at.is_some() {
        "ANSWERED".to_string()
    } else {
        pick_status([
            call.dialer_hangup_cause.as_deref(),
            call.dialed_hangup_cause.as_deref(),
            call.leg_a.last_status.as_deref(),
        ])
        .unwrap_or_else(|| "NO ANSWER".to_string())
    };

    let leg_a_wait = match call.dialer_connected_at {
        Some(connected) => round_seconds(call.created_at, connected),
        None => round_seconds(call.created_at, completed_at),
    };

    let talk_start = call.agent_answered_at.or(call.call_connected_at);
    let leg_a_talk = match (call.dialer_hangup_at, talk_start) {
        (Some(hangup), Some(start)) => round_seconds(start, hangup),
        _ => 0,
    };

    // Leg B answered means the dialed extension came up and an agent did too
    let leg_b_status = if call.dialed_connected_at.is_some() && call.agent_answered_at.is_some() {
        "ANSWERED".to_string()
    } else {
        pick_status([call.dialed_hangup_cause.as_deref(), call.leg_b.last_status.as_deref()])
            .unwrap_or_else(|| "NO ANSWER".to_string())
    };

    let agent_dialed_at = call
        .agent_dialed_at()
        .or(call.dialed_connected_at)
        .or(call.leg_b.answered_at);
    let leg_b_wait = match (call.agent_answered_at, agent_dialed_at) {
        (Some(answered), Some(dialed)) => round_seconds(dialed, answered),
        (None, Some(dialed)) => round_seconds(dialed, completed_at),
        (_, None) => 0,
    };

    let agent_hangup_at = call
        .agent_hangup_at()
        .or(call.dialed_hangup_at)
        .unwrap_or(completed_at);
    let leg_b_talk = match call.agent_answered_at {
        Some(answered) => round_seconds(answered, agent_hangup_at),
        None => 0,
    };

    CallSummary {
        call_id: call.call_id.clone(),
        created_at: call.created_at,
        number: call.number.clone(),
        leg_a: LegSummary {
            status: leg_a_status,
            wait_seconds: leg_a_wait,
            talk_seconds: leg_a_talk,
        },
        leg_b: LegSummary {
            status: leg_b_status,
            wait_seconds: leg_b_wait,
            talk_seconds: leg_b_talk,
        },
        answered_by: call.answered_by.clone(),
        recording_path: call.recording_path.as_ref().map(|p| p.display().to_string()),
    }
}

/// Render the fixed-order summary line.
pub fn summary_line(summary: &CallSummary) -> String {
    format!(
        "{};{};{};{};{};{};{};{};{};{}",
        summary.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        summary.number,
        summary.leg_a.status,
        summary.leg_a.wait_seconds,
        summary.leg_a.talk_seconds,
        summary.leg_b.status,
        summary.answered_by.as_deref().unwrap_or("unknown"),
        summary.leg_b.wait_seconds,
        summary.leg_b.talk_seconds,
        summary.recording_path.as_deref().unwrap_or(""),
    )
}

/// Emit the summary line on its dedicated target.
pub fn emit_summary(summary: &CallSummary) {
    info!(target: "call_summary", "{}", summary_line(summary));
}

/// Assemble the persistence row for a call.
pub fn build_row(call: &CallState, summary: &CallSummary) -> CallLegRow {
    CallLegRow {
        call_id: call.call_id.clone(),
        recording_path: summary.recording_path.clone(),
        leg_a: LegColumns {
            status: Some(summary.leg_a.status.clone()),
            number: call.leg_a.target_number.clone(),
            channel: call.leg_a.channel_id.clone(),
            paired_channel: call.leg_a.paired_channel_name.clone(),
            peer: call.leg_a.peer_name.clone(),
            caller: call.leg_a.caller_name.clone(),
            dial_string: call.leg_a.dial_string.clone(),
            answered_by: call.leg_a.answered_by.clone().or_else(|| call.answered_by.clone()),
            start: call.leg_a.started_at.map(|t| t.naive_utc()),
            answer: call.leg_a.answered_at.map(|t| t.naive_utc()),
            end: call.leg_a.ended_at.map(|t| t.naive_utc()),
        },
        leg_b: LegColumns {
            status: Some(summary.leg_b.status.clone()),
            number: call.leg_b.target_number.clone(),
            channel: call.leg_b.channel_id.clone(),
            paired_channel: call.leg_b.paired_channel_name.clone(),
            peer: call.leg_b.peer_name.clone(),
            caller: call.leg_b.caller_name.clone(),
            dial_string: call.leg_b.dial_string.clone(),
            answered_by: call.leg_b.answered_by.clone(),
            start: call.leg_b.started_at.map(|t| t.naive_utc()),
            answer: call.leg_b.answered_at.map(|t| t.naive_utc()),
            end: call.leg_b.ended_at.map(|t| t.naive_utc()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn base_call() -> CallState {
        CallState::new("c-1".into(), "5551234".into(), at(0))
    }

    #[test]
    fn happy_path_summary() {
        let mut call = base_call();
        call.dialer_connected_at = Some(at(1));
        call.dialed_connected_at = Some(at(2));
        call.agent_answered_at = Some(at(3));
        call.agent_legs.insert(
            "agent-1".into(),
            crate::state::AgentLeg {
                identity: Some("Agent-42".into()),
                dialed_at: Some(at(2)),
                answered_at: Some(at(3)),
                hangup_at: Some(at(63)),
                last_status: Some("ANSWERED".into()),
            },
        );
        call.dialer_hangup_at = Some(at(63));
        call.dialed_hangup_at = Some(at(63));
        call.answered_by = Some("Agent-42".into());
        call.completed_at = Some(at(63));
        call.recording_path = Some("/rec/c-1.wav".into());
        call.recompute_connected();

        let summary = compute_summary(&call);
        assert_eq!(summary.leg_a.status, "ANSWERED");
        assert_eq!(summary.leg_a.wait_seconds, 1);
        assert_eq!(summary.leg_a.talk_seconds, 60);
        assert_eq!(summary.leg_b.status, "ANSWERED");
        assert_eq!(summary.leg_b.wait_seconds, 1);
        assert_eq!(summary.leg_b.talk_seconds, 60);

        let line = summary_line(&summary);
        assert!(line.ends_with(";5551234;ANSWERED;1;60;ANSWERED;Agent-42;1;60;/rec/c-1.wav"));
    }

    #[test]
    fn no_answer_summary() {
        let mut call = base_call();
        call.dialer_hangup_cause = Some("NO ANSWER".into());
        call.dialer_hangup_at = Some(at(30));
        call.completed_at = Some(at(30));

        let summary = compute_summary(&call);
        assert_eq!(summary.leg_a.status, "NO ANSWER");
        assert_eq!(summary.leg_a.wait_seconds, 30);
        assert_eq!(summary.leg_a.talk_seconds, 0);
        assert_eq!(summary.leg_b.status, "NO ANSWER");
        assert_eq!(summary.leg_b.wait_seconds, 0);
        assert_eq!(summary.leg_b.talk_seconds, 0);
        assert_eq!(
            summary_line(&summary),
            format!(
                "{};5551234;NO ANSWER;30;0;NO ANSWER;unknown;0;0;",
                at(0).to_rfc3339_opts(SecondsFormat::Millis, true)
            )
        );
    }

    #[test]
    fn destination_answered_but_no_agent() {
        let mut call = base_call();
        call.dialer_connected_at = Some(at(1));
        call.dialed_connected_at = Some(at(2));
        call.dialer_hangup_at = Some(at(20));
        call.dialed_hangup_at = Some(at(20));
        call.completed_at = Some(at(20));
        call.recompute_connected();

        let summary = compute_summary(&call);
        assert_eq!(summary.leg_a.status, "ANSWERED");
        assert_eq!(summary.leg_a.wait_seconds, 1);
        // Talk runs from the later talk end (dialed up at T+2) to hangup
        assert_eq!(summary.leg_a.talk_seconds, 18);
        assert_eq!(summary.leg_b.status, "NO ANSWER");
        assert_eq!(summary.leg_b.talk_seconds, 0);
    }

    #[test]
    fn all_seconds_are_clamped_non_negative() {
        let mut call = base_call();
        // Hangup stamped before the talk start due to out-of-order delivery
        call.dialer_connected_at = Some(at(10));
        call.dialed_connected_at = Some(at(12));
        call.dialer_hangup_at = Some(at(5));
        call.completed_at = Some(at(12));
        call.recompute_connected();

        let summary = compute_summary(&call);
        assert!(summary.leg_a.talk_seconds >= 0);
        assert!(summary.leg_a.wait_seconds >= 0);
        assert!(summary.leg_b.wait_seconds >= 0);
        assert!(summary.leg_b.talk_seconds >= 0);
    }
}
