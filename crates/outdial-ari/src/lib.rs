//! # Asterisk REST Interface (ARI) Adapter
//!
//! This crate is the transport layer between the dialer engine and an
//! Asterisk instance. It exposes two surfaces:
//!
//! - A typed command API ([`AriCommands`]) covering channel origination,
//!   answer/hangup, mixing-bridge management and bridge recording. The
//!   production implementation ([`AriClient`]) issues these as REST calls
//!   with HTTP basic auth.
//! - A typed event stream: the ARI events WebSocket decoded into the
//!   [`AriEvent`] enum. Event kinds the engine does not consume are logged
//!   at debug level and dropped at this layer.
//!
//! The command surface is a trait so the engine can be exercised against an
//! in-memory implementation in tests without an Asterisk behind it.

pub mod client;
pub mod error;
pub mod events;

pub use client::{AriClient, AriCommands, OriginateRequest, RecordBridgeRequest};
pub use error::{AriError, Result};
pub use events::{AriEvent, Bridge, CallerId, Channel, LiveRecording};
