//! Channel-naming heuristics and dial-status normalisation.
//!
//! Asterisk splits a local channel into two in-memory halves named
//! `Local/<exten>@<context>-<seq>;1` and `;2`; only the `;2` half reaches a
//! real endpoint. Every piece of suffix handling in the correlator goes
//! through the two helpers here.

use crate::config::DialingConfig;

/// Drop the `;1`/`;2` two-leg suffix from a local channel name.
pub fn strip_half_suffix(name: &str) -> &str {
    name.strip_suffix(";1")
        .or_else(|| name.strip_suffix(";2"))
        .unwrap_or(name)
}

/// Whether a channel name is the `;1` half of a local channel pair.
pub fn is_local_first_half(name: &str) -> bool {
    name.starts_with("Local/") && name.ends_with(";1")
}

/// Swap the `;1`/`;2` suffix, yielding the name of the paired half.
pub fn paired_half_name(name: &str) -> Option<String> {
    if let Some(base) = name.strip_suffix(";1") {
        Some(format!("{base};2"))
    } else {
        name.strip_suffix(";2").map(|base| format!("{base};1"))
    }
}

/// Whether a channel name is a local channel dialing the configured target
/// extension: `Local/<TARGET_EXTENSION>@<TARGET_CONTEXT>` or
/// `Local/<TARGET_EXTENSION>@` anything, ignoring the two-leg suffix.
pub fn is_target_local_name(name: &str, dialing: &DialingConfig) -> bool {
    let Some(rest) = strip_half_suffix(name).strip_prefix("Local/") else {
        return false;
    };
    // `<exten>@<context>-<seq>`
    let Some((exten, context_part)) = rest.split_once('@') else {
        return false;
    };
    if exten != dialing.target_extension {
        return false;
    }
    let context = context_part.split('-').next().unwrap_or(context_part);
    context == dialing.target_context || !context.is_empty()
}

/// Statuses that only indicate progress; kept only when nothing more
/// specific is available.
const GENERIC_STATUSES: &[&str] = &[
    "RINGING",
    "DIALING",
    "TRYING",
    "PROGRESS",
    "UP",
    "DOWN",
    "HUNGUP",
    "UNKNOWN",
    "EARLY MEDIA",
];

/// Canonicalise one status token: `NO ANSWER` and `ANSWERED` get their
/// canonical spellings, everything else is upper-cased as-is.
pub fn normalize_status(raw: &str) -> Option<String> {
    let token = raw.trim().to_uppercase();
    if token.is_empty() {
        return None;
    }
    if token == "NOANSWER" || token == "NO ANSWER" {
        return Some("NO ANSWER".to_string());
    }
    if token == "ANSWER" || token == "ANSWERED" {
        return Some("ANSWERED".to_string());
    }
    Some(token)
}

/// Pick the most meaningful status among several candidates.
///
/// `ANSWERED` always wins; a specific failure cause (BUSY, CONGESTION, ...)
/// beats generic progress states; `NO ANSWER` is the last resort.
pub fn pick_status<'a, I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let normalized: Vec<String> =
        candidates.into_iter().flatten().filter_map(normalize_status).collect();

    if normalized.iter().any(|s| s == "ANSWERED") {
        return Some("ANSWERED".to_string());
    }
    if let Some(specific) = normalized
        .iter()
        .find(|s| *s != "NO ANSWER" && !GENERIC_STATUSES.contains(&s.as_str()))
    {
        return Some(specific.clone());
    }
    if let Some(generic) = normalized.iter().find(|s| GENERIC_STATUSES.contains(&s.as_str())) {
        return Some(generic.clone());
    }
    if normalized.iter().any(|s| s == "NO ANSWER") {
        return Some("NO ANSWER".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialing() -> DialingConfig {
        DialingConfig {
            outbound_number: None,
            outbound_number_file: None,
            target_endpoint: None,
            target_extension: "777".to_string(),
            target_context: "default2".to_string(),
            call_timeout: 30,
            max_cc: 1,
            caller_id: None,
        }
    }

    #[test]
    fn strips_half_suffixes() {
        assert_eq!(strip_half_suffix("Local/777@default2-0001;1"), "Local/777@default2-0001");
        assert_eq!(strip_half_suffix("Local/777@default2-0001;2"), "Local/777@default2-0001");
        assert_eq!(strip_half_suffix("PJSIP/5551234-00000001"), "PJSIP/5551234-00000001");
    }

    #[test]
    fn pairs_half_names() {
        assert_eq!(
            paired_half_name("Local/777@default2-0001;1").as_deref(),
            Some("Local/777@default2-0001;2")
        );
        assert_eq!(
            paired_half_name("Local/777@default2-0001;2").as_deref(),
            Some("Local/777@default2-0001;1")
        );
        assert_eq!(paired_half_name("PJSIP/x-1"), None);
    }

    #[test]
    fn recognises_target_local_names() {
        let cfg = dialing();
        assert!(is_target_local_name("Local/777@default2-00000001;1", &cfg));
        assert!(is_target_local_name("Local/777@default2-00000001;2", &cfg));
        // Any context is accepted for the target extension
        assert!(is_target_local_name("Local/777@elsewhere-0002;1", &cfg));
        assert!(!is_target_local_name("Local/888@default2-0001;1", &cfg));
        assert!(!is_target_local_name("PJSIP/777-00000001", &cfg));
    }

    #[test]
    fn local_first_half_detection() {
        assert!(is_local_first_half("Local/777@default2-0001;1"));
        assert!(!is_local_first_half("Local/777@default2-0001;2"));
        assert!(!is_local_first_half("PJSIP/agent-0001;1"));
    }

    #[test]
    fn status_normalisation() {
        assert_eq!(normalize_status("noanswer").as_deref(), Some("NO ANSWER"));
        assert_eq!(normalize_status("No Answer").as_deref(), Some("NO ANSWER"));
        assert_eq!(normalize_status("answer").as_deref(), Some("ANSWERED"));
        assert_eq!(normalize_status("ANSWERED").as_deref(), Some("ANSWERED"));
        assert_eq!(normalize_status("busy").as_deref(), Some("BUSY"));
        assert_eq!(normalize_status("  "), None);
    }

    #[test]
    fn status_merging_precedence() {
        assert_eq!(
            pick_status([Some("RINGING"), Some("answer")]).as_deref(),
            Some("ANSWERED")
        );
        assert_eq!(
            pick_status([Some("RINGING"), Some("BUSY"), Some("NO ANSWER")]).as_deref(),
            Some("BUSY")
        );
        assert_eq!(
            pick_status([Some("RINGING"), Some("NO ANSWER")]).as_deref(),
            Some("RINGING")
        );
        assert_eq!(pick_status([Some("NO ANSWER"), None]).as_deref(), Some("NO ANSWER"));
        assert_eq!(pick_status([None, None]), None);
    }
}
