//! Terminal call path: summary, recording stop/move, bridge teardown,
//! index purge and slot release.
//!
//! Cleanup is final. The call is removed from the store and every reverse
//! index before any I/O happens, so events racing the teardown resolve to
//! nothing and are dropped. Every external step is error-tolerant: a failed
//! hangup, bridge destroy or upsert is logged and never blocks the rest.

use chrono::Utc;
use tracing::{info, warn};

use crate::database::DatabaseManager;

use super::core::DialerEngine;
use super::summary::{build_row, compute_summary, emit_summary};

impl DialerEngine {
    /// Complete a call: runs on the dispatcher for channel-exhaustion,
    /// watchdog and partner-failure terminations alike.
    pub(crate) async fn complete_call(&self, call_id: &str) {
        let Some(mut call) = self.store.take(call_id) else {
            // Already completed by an earlier trigger
            return;
        };
        if let Some(watchdog) = call.watchdog.take() {
            watchdog.abort();
        }
        self.store.purge_call(&call);
        call.completed_at = Some(Utc::now());

        if !call.summary_logged {
            call.summary_logged = true;
            let summary = compute_summary(&call);
            emit_summary(&summary);
            {
                let mut stats = self.stats.write().await;
                stats.calls_completed += 1;
                if summary.leg_a.status == "ANSWERED" {
                    stats.calls_answered += 1;
                }
            }
            self.persist_summary(&call, &summary).await;
            self.push_summary(summary).await;
        }

        self.recordings.stop_for_cleanup(&call, self.ari.as_ref()).await;

        if let Some(bridge_id) = &call.bridge {
            if let Err(e) = self.ari.destroy_bridge(bridge_id).await {
                if !e.is_not_found() {
                    warn!(call_id = %call_id, bridge_id = %bridge_id, error = %e, "Failed to destroy bridge");
                }
            }
        }

        for channel_id in &call.channels {
            if let Err(e) = self.ari.hangup(channel_id).await {
                if !e.is_not_found() {
                    warn!(call_id = %call_id, channel_id = %channel_id, error = %e, "Failed to hang up leftover channel");
                }
            }
        }

        info!(call_id = %call_id, number = %call.number, "✅ Call completed");
        self.mark_call_completed(call_id).await;
    }

    /// Upsert the call's leg rows. Persistence is best-effort: a failed
    /// pool initialisation disables it for the rest of the run with one
    /// warning, a failed upsert is logged per call.
    async fn persist_summary(
        &self,
        call: &crate::state::CallState,
        summary: &super::summary::CallSummary,
    ) {
        let database_config = self.config.read().await.database.clone();
        let Some(database_config) = database_config else { return };

        let mut handle = self.database.lock().await;
        if handle.disabled {
            return;
        }
        if handle.manager.is_none() {
            match DatabaseManager::connect(&database_config).await {
                Ok(manager) => handle.manager = Some(std::sync::Arc::new(manager)),
                Err(e) => {
                    warn!(error = %e, "Summary persistence disabled for this run");
                    handle.disabled = true;
                    return;
                }
            }
        }
        let manager = handle.manager.as_ref().expect("manager initialised above").clone();
        drop(handle);

        let row = build_row(call, summary);
        if let Err(e) = manager.upsert_call_legs(&row).await {
            warn!(call_id = %call.call_id, error = %e, "Failed to upsert call summary");
        }
    }
}
