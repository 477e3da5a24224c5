//! Typed ARI event surface.
//!
//! Asterisk delivers events as JSON objects discriminated by a `type` field.
//! Decoding is a two-step process: the tag is inspected first so unknown
//! event kinds can be dropped without failing the stream, then the payload
//! is deserialized into the matching [`AriEvent`] variant.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Caller/connected-line identity carried on a channel
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CallerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
}

impl CallerId {
    /// Best display identity: name when present, else number.
    pub fn identity(&self) -> Option<String> {
        if !self.name.is_empty() {
            Some(self.name.clone())
        } else if !self.number.is_empty() {
            Some(self.number.clone())
        } else {
            None
        }
    }
}

/// Snapshot of an Asterisk channel as carried in events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Channel state as reported by Asterisk (`Down`, `Ringing`, `Up`, ...)
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub caller: CallerId,
    #[serde(default)]
    pub connected: CallerId,
    /// Asterisk-assigned correlation id shared by related channels
    #[serde(default)]
    pub linkedid: Option<String>,
}

/// Snapshot of a mixing bridge
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bridge {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Snapshot of a live recording
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveRecording {
    pub name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub state: String,
}

/// The event kinds the dialer engine consumes.
///
/// `ChannelEnteredBridge` is surfaced as [`AriEvent::BridgeEnter`] to match
/// the engine's vocabulary.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AriEvent {
    StasisStart {
        channel: Channel,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    StasisEnd {
        channel: Channel,
        #[serde(default)]
        bridge: Option<Bridge>,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    ChannelDestroyed {
        channel: Channel,
        #[serde(default)]
        cause: Option<i64>,
        #[serde(default)]
        cause_txt: Option<String>,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    ChannelStateChange {
        channel: Channel,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    Dial {
        #[serde(default)]
        caller: Option<Channel>,
        #[serde(default)]
        peer: Option<Channel>,
        #[serde(default)]
        dialstring: Option<String>,
        #[serde(default)]
        dialstatus: String,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    #[serde(rename = "ChannelEnteredBridge")]
    BridgeEnter {
        bridge: Bridge,
        channel: Channel,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
    RecordingFinished {
        recording: LiveRecording,
        #[serde(default, deserialize_with = "ts::option")]
        timestamp: Option<DateTime<Utc>>,
    },
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "StasisStart",
    "StasisEnd",
    "ChannelDestroyed",
    "ChannelStateChange",
    "Dial",
    "ChannelEnteredBridge",
    "RecordingFinished",
];

impl AriEvent {
    /// Decode one WebSocket frame.
    ///
    /// Returns `Ok(None)` for event kinds the engine does not consume.
    pub fn parse(text: &str) -> crate::error::Result<Option<AriEvent>> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if !KNOWN_EVENT_TYPES.contains(&kind) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// The event's wall-clock timestamp, when Asterisk supplied one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AriEvent::StasisStart { timestamp, .. }
            | AriEvent::StasisEnd { timestamp, .. }
            | AriEvent::ChannelDestroyed { timestamp, .. }
            | AriEvent::ChannelStateChange { timestamp, .. }
            | AriEvent::Dial { timestamp, .. }
            | AriEvent::BridgeEnter { timestamp, .. }
            | AriEvent::RecordingFinished { timestamp, .. } => *timestamp,
        }
    }
}

/// Lenient timestamp decoding.
///
/// Asterisk emits `2024-01-01T00:00:00.000+0000` (no colon in the offset),
/// which strict RFC 3339 parsing rejects.
mod ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else { return Ok(None) };
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        if let Ok(parsed) = DateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        Ok(None)
    }
}
