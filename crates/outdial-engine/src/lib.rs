//! # Outdial Engine
//!
//! An outbound call dialer and call-leg correlator driving Asterisk through
//! ARI. Given a list of destination numbers, the engine originates calls
//! through a SIP trunk, bridges each originated call to a local extension
//! that further dials an agent, records the conversation, correlates the
//! events of both legs into a per-call timeline and persists a structured
//! summary.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   GET /start   ┌──────────────────┐
//! │ Control surface ├───────────────►│   DialerEngine   │
//! └─────────────────┘                │  (dispatcher)    │
//!                                    ├──────────────────┤
//!        ARI events ────────────────►│ Event correlator │
//!                                    │ Call state store │
//!                                    │ Dial orchestrator│
//!                                    │ Recording manager│
//!                                    │ Summary/persist  │
//!                                    └────────┬─────────┘
//!                                             │ AriCommands
//!                                    ┌────────▼─────────┐
//!                                    │   outdial-ari    │
//!                                    └──────────────────┘
//! ```
//!
//! A single dispatcher task applies every event in order, which serialises
//! all mutations per call; see [`orchestrator::core`] for the scheduling
//! model.

pub mod config;
pub mod database;
pub mod error;
pub mod orchestrator;
pub mod server;
pub mod state;

pub use config::DialerConfig;
pub use error::{DialerError, Result};
pub use orchestrator::{DialerEngine, DialerStats, EngineEvent, RunStatus};

/// Prelude with the types an embedding binary needs
pub mod prelude {
    pub use crate::config::DialerConfig;
    pub use crate::error::{DialerError, Result};
    pub use crate::orchestrator::{DialerEngine, EngineEvent, RunStatus};
    pub use crate::state::{CallState, CallStateStore};
    pub use outdial_ari::{AriClient, AriCommands, AriEvent};
}
