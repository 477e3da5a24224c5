//! Bridge recording ownership: start, stop, on-disk verification and the
//! move into the canonical recordings directory.
//!
//! Asterisk writes recordings wherever its spool points; the canonical
//! directory the operator configured may be somewhere else entirely. After a
//! recording stops, the manager looks for the file across the known
//! locations and moves it home, retrying on a short schedule because the
//! file can land after the stop returns.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use outdial_ari::{AriCommands, RecordBridgeRequest};

use crate::state::CallState;

use super::core::{DialerEngine, EngineEvent};

/// Spool locations Asterisk is known to drop recordings into.
const SPOOL_SEARCH_DIRS: &[&str] =
    &["/var/spool/asterisk/recording", "/var/spool/asterisk/monitor"];

/// Give up after this many failed verification attempts; retries are
/// bounded by the call lifetime, not open-ended.
const MAX_VERIFY_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone)]
pub(crate) struct RecordingOwnership {
    pub(crate) call_id: String,
    pub(crate) format: String,
    pub(crate) canonical_dir: PathBuf,
    pub(crate) finished: bool,
    pub(crate) attempts: u32,
}

/// Tracks every live recording this process started
pub struct RecordingManager {
    ownership: DashMap<String, RecordingOwnership>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl RecordingManager {
    pub(crate) fn new(events_tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { ownership: DashMap::new(), events_tx }
    }

    pub(crate) fn register(
        &self,
        name: &str,
        call_id: &str,
        canonical_dir: PathBuf,
        format: String,
    ) {
        self.ownership.insert(
            name.to_string(),
            RecordingOwnership {
                call_id: call_id.to_string(),
                format,
                canonical_dir,
                finished: false,
                attempts: 0,
            },
        );
    }

    /// Whether a recording is still owned (not yet verified and moved).
    pub fn owns(&self, name: &str) -> bool {
        self.ownership.contains_key(name)
    }

    /// Handle a `RecordingFinished` event. Returns false when the recording
    /// is not ours.
    pub(crate) fn on_finished(&self, name: &str) -> bool {
        let Some(mut ownership) = self.ownership.get_mut(name) else {
            return false;
        };
        ownership.finished = true;
        drop(ownership);
        // The file often lands slightly after the event
        self.schedule_retry(name, Duration::from_secs(1));
        true
    }

    fn schedule_retry(&self, name: &str, delay: Duration) {
        let events_tx = self.events_tx.clone();
        let recording_id = name.to_string();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = events_tx.send(EngineEvent::RecordingRetry { recording_id });
        });
    }

    /// A scheduled verification came due.
    pub(crate) async fn retry(&self, name: &str) {
        if self.verify_and_move(name).await {
            return;
        }
        let attempts = self.ownership.get(name).map(|o| o.attempts).unwrap_or(0);
        if attempts >= MAX_VERIFY_ATTEMPTS {
            warn!(recording = %name, attempts, "Giving up on missing recording file");
            self.ownership.remove(name);
        } else {
            self.schedule_retry(name, Duration::from_secs(5));
        }
    }

    /// Stop a call's recording and kick off the verify/move pipeline. Stop
    /// errors for already-gone recordings are swallowed.
    pub(crate) async fn stop_for_cleanup(&self, call: &CallState, ari: &dyn AriCommands) {
        let Some(name) = call.recording.clone() else { return };

        let stop_result = match &call.bridge {
            Some(bridge_id) => ari.stop_bridge_media(bridge_id).await,
            None => ari.stop_recording(&name).await,
        };
        if let Err(e) = stop_result {
            if !e.is_not_found() {
                warn!(recording = %name, error = %e, "Failed to stop recording");
            }
        }

        if !self.verify_and_move(&name).await {
            // Generic retry plus a late fallback for slow spool flushes
            self.schedule_retry(&name, Duration::from_secs(5));
            self.schedule_retry(&name, Duration::from_secs(10));
        }
    }

    /// Look for the recording file across the known directories and move it
    /// into the canonical one. Returns true once ownership is cleared — the
    /// file is in place or was successfully moved.
    pub(crate) async fn verify_and_move(&self, name: &str) -> bool {
        let Some(ownership) = self.ownership.get(name).map(|o| o.value().clone()) else {
            // Already verified by an earlier retry
            return true;
        };

        let filename = format!("{}.{}", name, ownership.format);
        let canonical = ownership.canonical_dir.join(&filename);

        match tokio::fs::metadata(&canonical).await {
            Ok(_) => {
                info!(recording = %name, path = %canonical.display(), "Recording in place");
                self.ownership.remove(name);
                return true;
            }
            Err(e) => debug!(path = %canonical.display(), error = %e, "Recording not in canonical directory"),
        }

        for dir in SPOOL_SEARCH_DIRS {
            let candidate = Path::new(dir).join(&filename);
            match tokio::fs::metadata(&candidate).await {
                Ok(_) => {
                    if move_file(&candidate, &canonical).await {
                        info!(
                            recording = %name,
                            from = %candidate.display(),
                            to = %canonical.display(),
                            "Moved recording into canonical directory"
                        );
                        self.ownership.remove(name);
                        return true;
                    }
                    // Movement failure never blocks anything; a retry may
                    // succeed once the file is no longer busy
                    break;
                }
                Err(e) => debug!(path = %candidate.display(), error = %e, "Recording not found here"),
            }
        }

        if let Some(mut ownership) = self.ownership.get_mut(name) {
            ownership.attempts += 1;
        }
        false
    }
}

/// Rename with a copy+unlink fallback for cross-device moves.
async fn move_file(from: &Path, to: &Path) -> bool {
    match tokio::fs::rename(from, to).await {
        Ok(()) => true,
        Err(rename_err) => {
            debug!(error = %rename_err, "Rename failed, falling back to copy+unlink");
            match tokio::fs::copy(from, to).await {
                Ok(_) => {
                    if let Err(e) = tokio::fs::remove_file(from).await {
                        warn!(path = %from.display(), error = %e, "Failed to unlink recording source after copy");
                    }
                    true
                }
                Err(copy_err) => {
                    warn!(
                        from = %from.display(),
                        to = %to.display(),
                        error = %copy_err,
                        "Failed to move recording file"
                    );
                    false
                }
            }
        }
    }
}

impl DialerEngine {
    /// Start the bridge recording for a call. Attempted at most once per
    /// call; triggers before the bridge exists defer to the next trigger.
    pub(crate) async fn start_call_recording(&self, call_id: &str) {
        let config = self.config.read().await.clone();

        let request = {
            let Some(mut call) = self.store.get_mut(call_id) else { return };
            if call.recording_started {
                return;
            }
            let Some(bridge_id) = call.bridge.clone() else {
                debug!(call_id = %call_id, "No bridge yet, recording deferred");
                return;
            };
            call.recording_started = true;

            let stamp = Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .replace([':', '.'], "-");
            let name = format!("{}-{}", call.call_id, stamp);
            call.recording = Some(name.clone());
            self.store.bind_recording(&mut call, &name);
            call.recording_format_used = Some(config.recording.format.clone());
            call.recording_path = Some(
                config
                    .recording
                    .directory
                    .join(format!("{name}.{}", config.recording.format)),
            );
            RecordBridgeRequest {
                bridge_id,
                name,
                format: config.recording.format.clone(),
            }
        };

        self.recordings.register(
            &request.name,
            call_id,
            config.recording.directory.clone(),
            config.recording.format.clone(),
        );
        match self.ari.record_bridge(request.clone()).await {
            Ok(_) => info!(call_id = %call_id, recording = %request.name, "🎙 Recording started"),
            Err(e) => {
                warn!(call_id = %call_id, recording = %request.name, error = %e, "Failed to start recording");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_clears_ownership_when_file_is_in_place() {
        let dir = std::env::temp_dir().join(format!("outdial-rec-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = RecordingManager::new(tx);
        manager.register("rec-1", "c-1", dir.clone(), "wav".into());

        // Absent: stays owned, attempts increase
        assert!(!manager.verify_and_move("rec-1").await);
        assert!(manager.owns("rec-1"));

        tokio::fs::write(dir.join("rec-1.wav"), b"RIFF").await.unwrap();
        assert!(manager.verify_and_move("rec-1").await);
        assert!(!manager.owns("rec-1"));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn unknown_recordings_are_not_ours() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = RecordingManager::new(tx);
        assert!(!manager.on_finished("rec-unknown"));
    }
}
