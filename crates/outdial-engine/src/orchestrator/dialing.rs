//! Dial pacing: the number queue, the concurrency gate and origination.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use outdial_ari::OriginateRequest;

use crate::config::DialingConfig;
use crate::error::{DialerError, Result};
use crate::state::CallState;

use super::core::{DialerEngine, EngineEvent};

/// Whether a token is an acceptable destination number: digits, `+`, `*`,
/// `#`, nothing else.
fn is_valid_number(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || c == '+' || c == '*' || c == '#')
}

/// Parse a newline-delimited number list, tolerating CR/CRLF endings.
/// Invalid lines are warned and skipped.
pub(crate) fn parse_number_list(content: &str) -> VecDeque<String> {
    let mut numbers = VecDeque::new();
    for line in content.lines() {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        if is_valid_number(token) {
            numbers.push_back(token.to_string());
        } else {
            warn!(line = %token, "Skipping invalid outbound number");
        }
    }
    numbers
}

/// Load the outbound numbers per configuration. The file wins when both
/// sources are set. An empty result is a configuration error.
pub(crate) async fn load_numbers(dialing: &DialingConfig) -> Result<VecDeque<String>> {
    let numbers = if let Some(path) = &dialing.outbound_number_file {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DialerError::configuration(format!(
                "cannot read OUTBOUND_NUMBER_FILE {}: {e}",
                path.display()
            ))
        })?;
        parse_number_list(&content)
    } else if let Some(number) = &dialing.outbound_number {
        let mut queue = VecDeque::new();
        if is_valid_number(number) {
            queue.push_back(number.clone());
        } else {
            warn!(number = %number, "Skipping invalid OUTBOUND_NUMBER");
        }
        queue
    } else {
        VecDeque::new()
    };

    if numbers.is_empty() {
        return Err(DialerError::configuration("no valid outbound numbers configured"));
    }
    Ok(numbers)
}

impl DialerEngine {
    /// Pop numbers while there is concurrency headroom. Logs queue
    /// depletion exactly once per run, when the queue is dry and nothing is
    /// in flight.
    pub(crate) async fn maybe_originate_next(&self) {
        loop {
            let max_cc = self.config.read().await.dialing.max_cc;
            if self.in_flight.len() >= max_cc {
                return;
            }
            let next = self.numbers.lock().await.pop_front();
            match next {
                Some(number) => self.originate(number).await,
                None => {
                    if self.in_flight.is_empty()
                        && !self.depletion_logged.swap(true, Ordering::SeqCst)
                    {
                        info!("📭 Number queue depleted and no calls in flight, run complete");
                    }
                    return;
                }
            }
        }
    }

    /// Originate one call. Failure is call-scoped: the slot is released and
    /// the dial loop continues with the next number.
    async fn originate(&self, number: String) {
        let config = self.config.read().await.clone();
        let call_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        self.in_flight.insert(call_id.clone(), number.clone());
        self.store.insert(CallState::new(call_id.clone(), number.clone(), created_at));

        // Watchdog: fires through the event channel so the cleanup runs on
        // the dispatcher like everything else
        let delay = config.dialing.watchdog_delay();
        let events_tx = self.events_tx.clone();
        let watchdog_call_id = call_id.clone();
        let watchdog = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events_tx.send(EngineEvent::WatchdogFired { call_id: watchdog_call_id });
        });
        if let Some(mut call) = self.store.get_mut(&call_id) {
            call.watchdog = Some(watchdog);
        }

        self.stats.write().await.calls_originated += 1;
        info!(call_id = %call_id, number = %number, "📞 Originating outbound call");

        let request = OriginateRequest {
            endpoint: format!("PJSIP/{number}@{}", config.ari.trunk),
            app: config.ari.stasis_app.clone(),
            app_args: vec!["dialer".to_string(), call_id.clone()],
            caller_id: config.dialing.caller_id.clone(),
            timeout_seconds: config.dialing.call_timeout,
        };
        match self.ari.originate(request).await {
            Ok(channel) => {
                if let Some(mut call) = self.store.get_mut(&call_id) {
                    self.store.bind_channel(&mut call, &channel.id);
                    if let Some(linked_id) = &channel.linkedid {
                        self.store.bind_linked(&mut call, linked_id);
                    }
                }
            }
            Err(e) => {
                error!(call_id = %call_id, number = %number, error = %e, "Origination failed");
                self.stats.write().await.origination_failures += 1;
                if let Some(mut call) = self.store.take(&call_id) {
                    if let Some(watchdog) = call.watchdog.take() {
                        watchdog.abort();
                    }
                    self.store.purge_call(&call);
                }
                self.in_flight.remove(&call_id);
            }
        }
    }

    /// Release a call's concurrency slot and continue dialing.
    pub(crate) async fn mark_call_completed(&self, call_id: &str) {
        self.in_flight.remove(call_id);
        self.maybe_originate_next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_validation() {
        assert!(is_valid_number("5551234"));
        assert!(is_valid_number("+495551234"));
        assert!(is_valid_number("*43#"));
        assert!(!is_valid_number("555-1234"));
        assert!(!is_valid_number("call me"));
        assert!(!is_valid_number(""));
    }

    #[test]
    fn parses_number_files_with_crlf_and_junk() {
        let content = "5551234\r\n+495551000\r\nnot a number\n\n  *77#  \n";
        let numbers = parse_number_list(content);
        assert_eq!(
            numbers.into_iter().collect::<Vec<_>>(),
            vec!["5551234", "+495551000", "*77#"]
        );
    }

    #[tokio::test]
    async fn inline_number_is_used_when_no_file_is_set() {
        let dialing = DialingConfig {
            outbound_number: Some("5551234".into()),
            outbound_number_file: None,
            target_endpoint: None,
            target_extension: "777".into(),
            target_context: "default2".into(),
            call_timeout: 30,
            max_cc: 1,
            caller_id: None,
        };
        let numbers = load_numbers(&dialing).await.unwrap();
        assert_eq!(numbers.len(), 1);
    }

    #[tokio::test]
    async fn empty_number_list_is_fatal() {
        let dialing = DialingConfig {
            outbound_number: Some("bogus!".into()),
            outbound_number_file: None,
            target_endpoint: None,
            target_extension: "777".into(),
            target_context: "default2".into(),
            call_timeout: 30,
            max_cc: 1,
            caller_id: None,
        };
        assert!(load_numbers(&dialing).await.is_err());
    }
}
