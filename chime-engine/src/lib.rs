//! Group-chat engagement engine for chime.
//!
//! Decides *when* the agent speaks, not what it says: willingness
//! scoring over rapport/activity/fatigue signals, a per-group heartbeat
//! for proactive openings, and a response gate that lets the model
//! decline via a reserved sentinel token.

mod config;
mod context;
mod decay;
mod engine;
mod error;
mod fatigue;
mod focus;
mod gate;
mod heartbeat;
mod mode;
mod state;
mod willingness;

pub use config::{EngineConfig, FatigueCurve};
pub use context::{
    ChatContext, Impression, ImpressionSource, MemorySnippet, MemorySource, NullImpressions,
    NullMemories,
};
pub use engine::{EngagementOutcome, Engine, EngineDeps, GroupStatus};
pub use error::EngineError;
pub use gate::{
    contains_decline_marker, decline_markers, DecisionMethod, PersonaSource, ResponseResult,
    StaticPersona, LEGACY_DECLINE_MARKERS,
};
pub use heartbeat::{FlowStats, ProactiveEvaluation};
pub use mode::InteractionMode;
pub use state::{DecayingValue, GroupState, HistoryTurn, StateStore};
pub use willingness::WillingnessResult;
