//! The dialer engine: one value owning the ARI seam, the call state store,
//! the number queue and the subsystems around them.
//!
//! # Scheduling model
//!
//! A single dispatcher task drains one channel of [`EngineEvent`]s — ARI
//! events, watchdog firings, recording retries and dial kicks — and applies
//! them in order. Every correlator mutation for a call happens on that task,
//! which gives per-call serialisation without per-call locks. Timers
//! (watchdogs, recording retries) never touch state directly; they send back
//! into the channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use outdial_ari::{AriCommands, AriEvent};

use crate::config::DialerConfig;
use crate::database::DatabaseManager;
use crate::error::Result;
use crate::state::CallStateStore;

use super::recording::RecordingManager;
use super::summary::CallSummary;

/// How many completed-call summaries are kept for inspection
const SUMMARY_BACKLOG: usize = 100;

/// Work items for the dispatcher task
#[derive(Debug)]
pub enum EngineEvent {
    /// A telephony event from the ARI stream
    Ari(AriEvent),
    /// A call's cleanup watchdog fired
    WatchdogFired { call_id: String },
    /// A scheduled recording verification is due
    RecordingRetry { recording_id: String },
    /// Re-enter the dial loop (run start, slot release)
    Kick,
}

/// Outcome of a run trigger, mapped onto control-surface responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The dialer had never started; this trigger began the first run
    Started,
    /// Queue and in-flight were empty; numbers reloaded, new run begun
    Restarted,
    /// Work outstanding; nothing was disturbed
    AlreadyRunning,
}

/// Cumulative run counters
#[derive(Debug, Clone, Copy, Default)]
pub struct DialerStats {
    pub calls_originated: u64,
    pub origination_failures: u64,
    pub calls_completed: u64,
    /// Calls whose leg A went to `ANSWERED`
    pub calls_answered: u64,
}

/// Point-in-time engine snapshot
#[derive(Debug, Clone, Copy)]
pub struct DialerStatsSnapshot {
    pub counters: DialerStats,
    pub active_calls: usize,
    pub in_flight: usize,
    pub queued_numbers: usize,
}

pub(crate) struct DatabaseHandle {
    pub(crate) manager: Option<Arc<DatabaseManager>>,
    /// Set after a failed initialisation; persistence stays off for the run
    pub(crate) disabled: bool,
}

/// The dialer engine
pub struct DialerEngine {
    pub(crate) config: RwLock<DialerConfig>,
    pub(crate) ari: Arc<dyn AriCommands>,
    pub(crate) store: CallStateStore,
    pub(crate) numbers: Mutex<VecDeque<String>>,
    /// call id → destination number for every in-flight call
    pub(crate) in_flight: DashMap<String, String>,
    pub(crate) recordings: RecordingManager,
    pub(crate) database: Mutex<DatabaseHandle>,
    pub(crate) stats: RwLock<DialerStats>,
    /// Most recent completed-call summaries, oldest first
    pub(crate) summaries: RwLock<Vec<CallSummary>>,
    pub(crate) events_tx: mpsc::UnboundedSender<EngineEvent>,
    /// One depletion log line per run
    pub(crate) depletion_logged: AtomicBool,
    pub(crate) started: AtomicBool,
}

impl DialerEngine {
    /// Create the engine. The returned receiver feeds [`run`](Self::run).
    pub fn new(
        config: DialerConfig,
        ari: Arc<dyn AriCommands>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            config: RwLock::new(config),
            ari,
            store: CallStateStore::new(),
            numbers: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            recordings: RecordingManager::new(events_tx.clone()),
            database: Mutex::new(DatabaseHandle { manager: None, disabled: false }),
            stats: RwLock::new(DialerStats::default()),
            summaries: RwLock::new(Vec::new()),
            events_tx,
            depletion_logged: AtomicBool::new(false),
            started: AtomicBool::new(false),
        });
        (engine, events_rx)
    }

    /// Sender for feeding external events (the ARI pump) into the engine.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.events_tx.clone()
    }

    /// The dispatcher loop. Runs until the event channel closes.
    pub async fn run(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<EngineEvent>) {
        info!("🚀 Dialer engine dispatcher running");
        while let Some(event) = events_rx.recv().await {
            self.dispatch(event).await;
        }
        info!("Dialer engine dispatcher stopped");
    }

    /// Apply one work item. Public so tests can drive the engine directly
    /// without the channel in between.
    pub async fn dispatch(&self, event: EngineEvent) {
        match event {
            EngineEvent::Ari(ari_event) => self.handle_ari_event(ari_event).await,
            EngineEvent::WatchdogFired { call_id } => self.on_watchdog_fired(&call_id).await,
            EngineEvent::RecordingRetry { recording_id } => {
                self.recordings.retry(&recording_id).await;
            }
            EngineEvent::Kick => self.maybe_originate_next().await,
        }
    }

    /// Trigger a dialing run; the control surface and the boot path both
    /// land here. `refreshed` carries configuration re-read from the
    /// environment (the boot path passes `None` to keep the initial load).
    pub async fn trigger_run(&self, refreshed: Option<DialerConfig>) -> Result<RunStatus> {
        if let Some(config) = refreshed {
            *self.config.write().await = config;
        }

        let recording_dir = self.config.read().await.recording.directory.clone();
        tokio::fs::create_dir_all(&recording_dir).await?;

        // Drop the persistence pool; it is reinitialised lazily on the next
        // summary upsert.
        {
            let mut database = self.database.lock().await;
            database.manager = None;
            database.disabled = false;
        }

        if !self.started.swap(true, Ordering::SeqCst) {
            self.begin_run().await?;
            info!("📞 Dialer started");
            return Ok(RunStatus::Started);
        }

        let queue_empty = self.numbers.lock().await.is_empty();
        if queue_empty && self.in_flight.is_empty() {
            self.begin_run().await?;
            info!("📞 Dialer run restarted");
            Ok(RunStatus::Restarted)
        } else {
            Ok(RunStatus::AlreadyRunning)
        }
    }

    /// Load numbers and kick the dial loop.
    async fn begin_run(&self) -> Result<()> {
        let dialing = self.config.read().await.dialing.clone();
        let loaded = super::dialing::load_numbers(&dialing).await?;
        info!(count = loaded.len(), "Loaded outbound numbers");
        *self.numbers.lock().await = loaded;
        self.depletion_logged.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(EngineEvent::Kick);
        Ok(())
    }

    async fn on_watchdog_fired(&self, call_id: &str) {
        if !self.store.contains(call_id) {
            return;
        }
        warn!(call_id = %call_id, "⏰ Cleanup watchdog fired, forcing call cleanup");
        self.complete_call(call_id).await;
    }

    /// Snapshot of counters and live queue/call sizes.
    pub async fn get_stats(&self) -> DialerStatsSnapshot {
        DialerStatsSnapshot {
            counters: *self.stats.read().await,
            active_calls: self.store.len(),
            in_flight: self.in_flight.len(),
            queued_numbers: self.numbers.lock().await.len(),
        }
    }

    /// The call state store; exposed for monitoring and tests.
    pub fn store(&self) -> &CallStateStore {
        &self.store
    }

    /// Summaries of recently completed calls, oldest first.
    pub async fn recent_summaries(&self) -> Vec<CallSummary> {
        self.summaries.read().await.clone()
    }

    pub(crate) async fn push_summary(&self, summary: CallSummary) {
        let mut summaries = self.summaries.write().await;
        if summaries.len() >= SUMMARY_BACKLOG {
            summaries.remove(0);
        }
        summaries.push(summary);
    }

    /// The recording ownership manager.
    pub fn recordings(&self) -> &RecordingManager {
        &self.recordings
    }
}
