//! Scenario tests driving the engine through a mock ARI transport:
//! full call flows, correlator invariants, concurrency limits, watchdog
//! cleanup and recording ownership.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use outdial_ari::{
    AriCommands, AriError, AriEvent, Bridge, CallerId, Channel, LiveRecording, OriginateRequest,
    RecordBridgeRequest,
};
use outdial_engine::config::{
    AriConfig, DialerConfig, DialingConfig, HttpConfig, RecordingConfig,
};
use outdial_engine::{DialerEngine, EngineEvent, RunStatus};

// === Mock ARI transport =================================================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Originate { endpoint: String, app_args: Vec<String> },
    Answer(String),
    Hangup(String),
    CreateBridge(String),
    AddChannel { bridge_id: String, channel_id: String },
    DestroyBridge(String),
    RecordBridge { bridge_id: String, name: String },
    StopBridgeMedia(String),
    StopRecording(String),
}

#[derive(Default)]
struct MockAri {
    commands: Mutex<Vec<Command>>,
    next_channel: AtomicUsize,
    next_bridge: AtomicUsize,
    fail_partner_originate: AtomicBool,
}

impl MockAri {
    fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn push(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }

    fn originate_count(&self, role: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| {
                matches!(c, Command::Originate { app_args, .. }
                    if app_args.first().map(String::as_str) == Some(role))
            })
            .count()
    }

    fn bridge_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, Command::CreateBridge(_)))
            .count()
    }
}

#[async_trait]
impl AriCommands for MockAri {
    async fn originate(&self, request: OriginateRequest) -> outdial_ari::Result<Channel> {
        let is_partner = request.app_args.first().map(String::as_str) == Some("dialed");
        self.push(Command::Originate {
            endpoint: request.endpoint.clone(),
            app_args: request.app_args.clone(),
        });
        if is_partner && self.fail_partner_originate.load(Ordering::SeqCst) {
            return Err(AriError::Api { status: 500, body: "Allocation failed".into() });
        }
        let n = self.next_channel.fetch_add(1, Ordering::SeqCst) + 1;
        let name = if let Some(resource) = request.endpoint.strip_prefix("Local/") {
            format!("Local/{resource}-{n:04};1")
        } else {
            let tech = request.endpoint.split('@').next().unwrap_or(&request.endpoint);
            format!("{tech}-{n:08}")
        };
        Ok(Channel { id: format!("chan-{n}"), name, state: "Down".into(), ..Default::default() })
    }

    async fn answer(&self, channel_id: &str) -> outdial_ari::Result<()> {
        self.push(Command::Answer(channel_id.into()));
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> outdial_ari::Result<()> {
        self.push(Command::Hangup(channel_id.into()));
        Ok(())
    }

    async fn create_bridge(&self, name: &str) -> outdial_ari::Result<Bridge> {
        self.push(Command::CreateBridge(name.into()));
        let n = self.next_bridge.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Bridge { id: format!("bridge-{n}"), name: name.into() })
    }

    async fn add_channel(&self, bridge_id: &str, channel_id: &str) -> outdial_ari::Result<()> {
        self.push(Command::AddChannel {
            bridge_id: bridge_id.into(),
            channel_id: channel_id.into(),
        });
        Ok(())
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> outdial_ari::Result<()> {
        self.push(Command::DestroyBridge(bridge_id.into()));
        Ok(())
    }

    async fn record_bridge(&self, request: RecordBridgeRequest) -> outdial_ari::Result<LiveRecording> {
        self.push(Command::RecordBridge {
            bridge_id: request.bridge_id.clone(),
            name: request.name.clone(),
        });
        Ok(LiveRecording { name: request.name, format: request.format, state: "recording".into() })
    }

    async fn stop_bridge_media(&self, bridge_id: &str) -> outdial_ari::Result<()> {
        self.push(Command::StopBridgeMedia(bridge_id.into()));
        Ok(())
    }

    async fn stop_recording(&self, name: &str) -> outdial_ari::Result<()> {
        self.push(Command::StopRecording(name.into()));
        Ok(())
    }
}

// === Harness ============================================================

struct Harness {
    engine: Arc<DialerEngine>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    ari: Arc<MockAri>,
    recordings_dir: PathBuf,
}

fn test_config(recordings_dir: &Path) -> DialerConfig {
    DialerConfig {
        ari: AriConfig {
            url: "http://127.0.0.1:8088/ari".into(),
            username: "dialer".into(),
            password: "secret".into(),
            trunk: "trunk-out".into(),
            stasis_app: "outbound_dialer".into(),
        },
        dialing: DialingConfig {
            outbound_number: Some("5551234".into()),
            outbound_number_file: None,
            target_endpoint: None,
            target_extension: "777".into(),
            target_context: "default2".into(),
            call_timeout: 30,
            max_cc: 1,
            caller_id: None,
        },
        recording: RecordingConfig { directory: recordings_dir.to_path_buf(), format: "wav".into() },
        database: None,
        http: HttpConfig { port: 0 },
    }
}

async fn harness_with(config: DialerConfig) -> Harness {
    let recordings_dir = config.recording.directory.clone();
    tokio::fs::create_dir_all(&recordings_dir).await.unwrap();
    let ari = Arc::new(MockAri::default());
    let (engine, events) = DialerEngine::new(config, ari.clone());
    Harness { engine, events, ari, recordings_dir }
}

async fn harness() -> Harness {
    let dir = std::env::temp_dir().join(format!("outdial-test-{}", uuid::Uuid::new_v4()));
    harness_with(test_config(&dir)).await
}

impl Harness {
    /// Drain and apply everything queued on the engine channel.
    async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.engine.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: AriEvent) {
        self.engine.dispatch(EngineEvent::Ari(event)).await;
    }

    /// Start the run and return the single in-flight call's id and creation
    /// time.
    async fn start_run(&mut self) -> (String, DateTime<Utc>) {
        assert_eq!(self.engine.trigger_run(None).await.unwrap(), RunStatus::Started);
        self.pump().await;
        let call_id = self
            .engine
            .store()
            .matching_calls(|_| true)
            .pop()
            .expect("one call originated");
        let created_at = {
            let call = self.engine.store().get_mut(&call_id).unwrap();
            call.created_at
        };
        (call_id, created_at)
    }

    async fn cleanup(self) {
        tokio::fs::remove_dir_all(&self.recordings_dir).await.ok();
    }
}

fn chan(id: &str, name: &str, state: &str) -> Channel {
    Channel { id: id.into(), name: name.into(), state: state.into(), ..Default::default() }
}

fn chan_with_caller(id: &str, name: &str, state: &str, caller_name: &str) -> Channel {
    Channel {
        caller: CallerId { name: caller_name.into(), number: String::new() },
        ..chan(id, name, state)
    }
}

fn stasis_start(channel: Channel, role: &str, call_id: &str, ts: DateTime<Utc>) -> AriEvent {
    AriEvent::StasisStart {
        channel,
        args: vec![role.to_string(), call_id.to_string()],
        timestamp: Some(ts),
    }
}

fn state_change(channel: Channel, ts: DateTime<Utc>) -> AriEvent {
    AriEvent::ChannelStateChange { channel, timestamp: Some(ts) }
}

fn stasis_end(channel: Channel, ts: DateTime<Utc>) -> AriEvent {
    AriEvent::StasisEnd { channel, bridge: None, timestamp: Some(ts) }
}

fn destroyed(channel: Channel, cause_txt: Option<&str>, ts: DateTime<Utc>) -> AriEvent {
    AriEvent::ChannelDestroyed {
        channel,
        cause: None,
        cause_txt: cause_txt.map(String::from),
        timestamp: Some(ts),
    }
}

// === Scenarios ==========================================================

/// Happy path: dialer answers, partner extension answers, an agent joins,
/// both legs talk for a minute.
#[tokio::test]
async fn happy_path_single_call() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    // Dialer channel (chan-1 from the originate) enters the application
    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;
    // Dialer answers at T+1; recording starts
    h.dispatch(state_change(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(1))).await;

    // Drop the recording file in place so cleanup can verify it
    let recording_path = {
        let call = h.engine.store().get_mut(&call_id).unwrap();
        call.recording_path.clone().expect("recording started")
    };
    tokio::fs::write(&recording_path, b"RIFF").await.unwrap();

    // Partner local channel (chan-2) answers at T+2
    let mut dialed = chan("chan-2", "Local/777@default2-0002;1", "Up");
    dialed.connected = CallerId { name: "ext-777".into(), number: String::new() };
    h.dispatch(stasis_start(dialed, "dialed", &call_id, t(2))).await;

    // The ;2 half dials the agent; answered at T+3
    let local_half = chan("chan-2b", "Local/777@default2-0002;2", "Up");
    let agent = chan_with_caller("chan-agent", "PJSIP/agent-00000003", "Ring", "Agent-42");
    h.dispatch(AriEvent::Dial {
        caller: Some(local_half.clone()),
        peer: Some(agent.clone()),
        dialstring: Some("PJSIP/agent".into()),
        dialstatus: String::new(),
        timestamp: Some(t(2)),
    })
    .await;
    h.dispatch(AriEvent::Dial {
        caller: Some(local_half.clone()),
        peer: Some(agent.clone()),
        dialstring: Some("PJSIP/agent".into()),
        dialstatus: "ANSWER".into(),
        timestamp: Some(t(3)),
    })
    .await;
    h.dispatch(AriEvent::BridgeEnter {
        bridge: Bridge { id: "bridge-1".into(), name: format!("bridge-{call_id}") },
        channel: Channel {
            connected: CallerId { name: "Agent-42".into(), number: String::new() },
            ..chan("chan-agent", "PJSIP/agent-00000003", "Up")
        },
        timestamp: Some(t(3)),
    })
    .await;

    // Both legs hang up at T+63
    h.dispatch(stasis_end(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(63))).await;
    h.dispatch(destroyed(chan("chan-1", "PJSIP/5551234-00000001", "Up"), Some("Normal Clearing"), t(63))).await;
    h.dispatch(destroyed(chan("chan-2", "Local/777@default2-0002;1", "Up"), Some("Normal Clearing"), t(63))).await;
    h.dispatch(destroyed(chan("chan-2b", "Local/777@default2-0002;2", "Up"), None, t(63))).await;
    h.dispatch(destroyed(chan("chan-agent", "PJSIP/agent-00000003", "Up"), None, t(63))).await;

    let summaries = h.engine.recent_summaries().await;
    assert_eq!(summaries.len(), 1);
    let s = &summaries[0];
    assert_eq!(s.number, "5551234");
    assert_eq!(s.leg_a.status, "ANSWERED");
    assert_eq!(s.leg_a.wait_seconds, 1);
    assert_eq!(s.leg_a.talk_seconds, 60);
    assert_eq!(s.leg_b.status, "ANSWERED");
    assert_eq!(s.leg_b.wait_seconds, 1);
    assert_eq!(s.leg_b.talk_seconds, 60);
    assert_eq!(s.answered_by.as_deref(), Some("Agent-42"));
    assert_eq!(s.recording_path.as_deref(), Some(recording_path.to_str().unwrap()));

    // Exactly one partner originate and one bridge, bridge destroyed
    assert_eq!(h.ari.originate_count("dialed"), 1);
    assert_eq!(h.ari.bridge_count(), 1);
    assert!(h.ari.commands().contains(&Command::DestroyBridge("bridge-1".into())));

    // Terminal cleanup is total
    assert!(h.engine.store().is_empty());
    let stats = h.engine.get_stats().await;
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.counters.calls_originated, 1);
    assert_eq!(stats.counters.calls_completed, 1);
    assert_eq!(stats.counters.calls_answered, 1);

    h.cleanup().await;
}

/// The dialer never comes up; the platform reports NO ANSWER.
#[tokio::test]
async fn dialer_no_answer() {
    let mut h = harness().await;
    let (call_id, _) = h.start_run().await;

    // Shift creation 30 seconds into the past so the wait computation sees
    // a 30-second unanswered ring
    let base = Utc::now() - Duration::seconds(30);
    {
        let mut call = h.engine.store().get_mut(&call_id).unwrap();
        call.created_at = base;
    }
    let t = |s: i64| base + Duration::seconds(s);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;
    h.dispatch(stasis_end(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), t(30))).await;
    h.dispatch(destroyed(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), Some("NO ANSWER"), t(30)))
        .await;
    // The partner local channel goes away without ever answering
    h.dispatch(destroyed(chan("chan-2", "Local/777@default2-0002;1", "Down"), None, t(30))).await;

    let summaries = h.engine.recent_summaries().await;
    assert_eq!(summaries.len(), 1);
    let s = &summaries[0];
    assert_eq!(s.leg_a.status, "NO ANSWER");
    assert_eq!(s.leg_a.wait_seconds, 30);
    assert_eq!(s.leg_a.talk_seconds, 0);
    assert_eq!(s.leg_b.status, "NO ANSWER");
    assert_eq!(s.answered_by, None);
    assert_eq!(s.leg_b.wait_seconds, 0);
    assert_eq!(s.leg_b.talk_seconds, 0);

    // No recording was ever started
    assert!(!h.ari.commands().iter().any(|c| matches!(c, Command::RecordBridge { .. })));
    assert!(h.engine.store().is_empty());

    h.cleanup().await;
}

/// Destination answers but no agent ever picks up; answered-by keeps the
/// dialed-sourced identity.
#[tokio::test]
async fn destination_answers_agent_never_picks_up() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;
    h.dispatch(state_change(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(1))).await;

    let recording_path = {
        let call = h.engine.store().get_mut(&call_id).unwrap();
        call.recording_path.clone().unwrap()
    };
    tokio::fs::write(&recording_path, b"RIFF").await.unwrap();

    let mut dialed = chan("chan-2", "Local/777@default2-0002;1", "Up");
    dialed.connected = CallerId { name: "ext-777".into(), number: String::new() };
    h.dispatch(stasis_start(dialed, "dialed", &call_id, t(2))).await;

    // Dialed side gives up at T+20 without reporting a cause
    h.dispatch(stasis_end(chan("chan-2", "Local/777@default2-0002;1", "Up"), t(20))).await;
    h.dispatch(destroyed(chan("chan-2", "Local/777@default2-0002;1", "Up"), None, t(20))).await;
    h.dispatch(destroyed(chan("chan-1", "PJSIP/5551234-00000001", "Up"), Some("Normal Clearing"), t(20))).await;

    let summaries = h.engine.recent_summaries().await;
    assert_eq!(summaries.len(), 1);
    let s = &summaries[0];
    assert_eq!(s.leg_a.status, "ANSWERED");
    assert_eq!(s.leg_a.wait_seconds, 1);
    assert_eq!(s.leg_a.talk_seconds, 18);
    assert_eq!(s.leg_b.status, "NO ANSWER");
    assert_eq!(s.leg_b.talk_seconds, 0);
    // Dialed-sourced identity, not an agent
    assert_eq!(s.answered_by.as_deref(), Some("ext-777"));

    h.cleanup().await;
}

/// MAX_CC gates concurrent originations; a released slot pulls the next
/// number.
#[tokio::test]
async fn concurrency_limit_is_enforced() {
    let dir = std::env::temp_dir().join(format!("outdial-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let numbers_file = dir.join("numbers.txt");
    tokio::fs::write(&numbers_file, "111\n222\n333\n").await.unwrap();

    let mut config = test_config(&dir);
    config.dialing.outbound_number = None;
    config.dialing.outbound_number_file = Some(numbers_file);
    config.dialing.max_cc = 2;

    let mut h = harness_with(config).await;
    assert_eq!(h.engine.trigger_run(None).await.unwrap(), RunStatus::Started);
    h.pump().await;

    assert_eq!(h.ari.originate_count("dialer"), 2);
    assert_eq!(h.engine.get_stats().await.in_flight, 2);

    // Completing the first call frees a slot; the third number goes out
    let first = h
        .engine
        .store()
        .matching_calls(|call| call.number == "111")
        .pop()
        .unwrap();
    h.engine.dispatch(EngineEvent::WatchdogFired { call_id: first }).await;

    assert_eq!(h.ari.originate_count("dialer"), 3);
    let stats = h.engine.get_stats().await;
    assert!(stats.in_flight <= 2);
    assert_eq!(stats.counters.calls_originated, 3);

    h.cleanup().await;
}

/// The watchdog forces cleanup of a stuck call; the summary goes out once
/// and the slot is released.
#[tokio::test]
async fn watchdog_forces_cleanup() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;

    h.engine.dispatch(EngineEvent::WatchdogFired { call_id: call_id.clone() }).await;
    assert_eq!(h.engine.recent_summaries().await.len(), 1);
    assert!(h.engine.store().is_empty());
    assert_eq!(h.engine.get_stats().await.in_flight, 0);

    // A second firing is a no-op
    h.engine.dispatch(EngineEvent::WatchdogFired { call_id }).await;
    assert_eq!(h.engine.recent_summaries().await.len(), 1);

    h.cleanup().await;
}

/// RecordingFinished arrives while the file is still missing; a later retry
/// finds it and clears ownership, and the summary carries the canonical
/// path.
#[tokio::test]
async fn recording_deferred_move() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;
    h.dispatch(state_change(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(1))).await;

    let (recording_name, recording_path) = {
        let call = h.engine.store().get_mut(&call_id).unwrap();
        (call.recording.clone().unwrap(), call.recording_path.clone().unwrap())
    };

    h.dispatch(AriEvent::RecordingFinished {
        recording: LiveRecording { name: recording_name.clone(), format: "wav".into(), state: "done".into() },
        timestamp: Some(t(10)),
    })
    .await;
    assert!(h.engine.recordings().owns(&recording_name));

    // Tear the call down while the file is still absent
    h.dispatch(destroyed(chan("chan-1", "PJSIP/5551234-00000001", "Up"), Some("Normal Clearing"), t(10))).await;
    h.dispatch(destroyed(chan("chan-2", "Local/777@default2-0002;1", "Down"), None, t(10))).await;
    assert!(h.engine.recordings().owns(&recording_name));

    // The file lands late; the scheduled retry picks it up
    tokio::fs::write(&recording_path, b"RIFF").await.unwrap();
    h.engine
        .dispatch(EngineEvent::RecordingRetry { recording_id: recording_name.clone() })
        .await;
    assert!(!h.engine.recordings().owns(&recording_name));

    let summaries = h.engine.recent_summaries().await;
    assert_eq!(summaries[0].recording_path.as_deref(), Some(recording_path.to_str().unwrap()));

    h.cleanup().await;
}

/// Partner-originate failure forces call cleanup and releases the slot.
#[tokio::test]
async fn partner_originate_failure_cleans_up() {
    let mut h = harness().await;
    h.ari.fail_partner_originate.store(true, Ordering::SeqCst);
    let (call_id, base) = h.start_run().await;

    h.dispatch(stasis_start(
        chan("chan-1", "PJSIP/5551234-00000001", "Ring"),
        "dialer",
        &call_id,
        base,
    ))
    .await;

    assert!(h.engine.store().is_empty());
    assert_eq!(h.engine.get_stats().await.in_flight, 0);
    assert_eq!(h.engine.recent_summaries().await.len(), 1);
    // The bridge created for the call was torn down again
    assert!(h.ari.commands().iter().any(|c| matches!(c, Command::DestroyBridge(_))));

    h.cleanup().await;
}

/// Re-delivered events leave state unchanged: one partner originate, first
/// answer timestamp wins.
#[tokio::test]
async fn redelivery_is_idempotent() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    let dialer = chan("chan-1", "PJSIP/5551234-00000001", "Ring");
    h.dispatch(stasis_start(dialer.clone(), "dialer", &call_id, t(0))).await;
    h.dispatch(stasis_start(dialer, "dialer", &call_id, t(0))).await;
    assert_eq!(h.ari.originate_count("dialed"), 1);
    assert_eq!(h.ari.bridge_count(), 1);

    h.dispatch(state_change(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(1))).await;
    h.dispatch(state_change(chan("chan-1", "PJSIP/5551234-00000001", "Up"), t(5))).await;
    {
        let call = h.engine.store().get_mut(&call_id).unwrap();
        assert_eq!(call.dialer_connected_at, Some(t(1)));
    }

    h.cleanup().await;
}

/// Events for channels no call owns are dropped without effect.
#[tokio::test]
async fn unresolvable_events_are_dropped() {
    let mut h = harness().await;
    let (_, base) = h.start_run().await;

    h.dispatch(state_change(chan("chan-ghost", "PJSIP/ghost-0009", "Up"), base)).await;
    h.dispatch(destroyed(chan("chan-ghost", "PJSIP/ghost-0009", "Up"), Some("NO ANSWER"), base))
        .await;

    assert_eq!(h.engine.store().len(), 1);
    assert_eq!(h.engine.recent_summaries().await.len(), 0);

    h.cleanup().await;
}

/// Triggering a run with work outstanding does not disturb it; once idle, a
/// trigger reloads the numbers and starts a fresh run.
#[tokio::test]
async fn trigger_while_running_and_restart_when_idle() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;

    assert_eq!(h.engine.trigger_run(None).await.unwrap(), RunStatus::AlreadyRunning);
    assert_eq!(h.engine.store().len(), 1);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, base))
        .await;
    h.engine.dispatch(EngineEvent::WatchdogFired { call_id }).await;
    h.pump().await;
    assert!(h.engine.store().is_empty());

    assert_eq!(h.engine.trigger_run(None).await.unwrap(), RunStatus::Restarted);
    h.pump().await;
    assert_eq!(h.ari.originate_count("dialer"), 2);

    h.cleanup().await;
}

/// Agent-sourced answered-by survives later dialed-sourced updates.
#[tokio::test]
async fn answered_by_precedence_across_events() {
    let mut h = harness().await;
    let (call_id, base) = h.start_run().await;
    let t = |s: i64| base + Duration::seconds(s);

    h.dispatch(stasis_start(chan("chan-1", "PJSIP/5551234-00000001", "Ring"), "dialer", &call_id, t(0)))
        .await;
    let mut dialed = chan("chan-2", "Local/777@default2-0002;1", "Ring");
    dialed.connected = CallerId { name: "ext-777".into(), number: String::new() };
    h.dispatch(stasis_start(dialed, "dialed", &call_id, t(1))).await;

    // Agent joins the bridge
    h.dispatch(AriEvent::BridgeEnter {
        bridge: Bridge { id: "bridge-1".into(), name: format!("bridge-{call_id}") },
        channel: Channel {
            connected: CallerId { name: "Agent-42".into(), number: String::new() },
            ..chan("chan-agent", "PJSIP/agent-00000003", "Up")
        },
        timestamp: Some(t(2)),
    })
    .await;

    // A later dialed-side Up must not displace the agent identity
    let mut dialed_up = chan("chan-2", "Local/777@default2-0002;1", "Up");
    dialed_up.connected = CallerId { name: "ext-777".into(), number: String::new() };
    h.dispatch(state_change(dialed_up, t(3))).await;

    {
        let call = h.engine.store().get_mut(&call_id).unwrap();
        assert_eq!(call.answered_by.as_deref(), Some("Agent-42"));
    }

    h.cleanup().await;
}
