//! Call state: per-call records, leg timelines and the process-wide store
//! with its reverse indexes.

pub mod call;
pub mod store;

pub use call::{
    second_precision, AgentLeg, AnsweredBySource, CallState, ChannelRole, LegRole, LegTimeline,
};
pub use store::CallStateStore;
