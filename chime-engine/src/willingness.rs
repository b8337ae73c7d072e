//! Willingness to respond: one probability out of rapport, activity,
//! fatigue, boost, and mode, plus the call on whether the number alone
//! may decide or a model judgment is needed.

use crate::config::EngineConfig;
use crate::decay;
use crate::fatigue;
use crate::mode::InteractionMode;
use crate::state::{HistoryTurn, StateStore};
use chime_platform::GroupId;
use chrono::{DateTime, Utc};
use serde::Serialize;

const RAPPORT_WEIGHT: f64 = 0.6;
const ACTIVITY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Serialize)]
pub struct WillingnessResult {
    pub base: f64,
    pub activity: f64,
    pub fatigue: f64,
    pub boost: f64,
    pub mode: InteractionMode,
    pub effective: f64,
    /// Raw threshold verdict; kept for observability even when the final
    /// call is deferred to adjudication.
    pub should_respond: bool,
    pub requires_llm_decision: bool,
}

pub fn evaluate(
    rapport: f64,
    activity: f64,
    fatigue_level: f64,
    boost: f64,
    mode: InteractionMode,
    cfg: &EngineConfig,
) -> WillingnessResult {
    let base = decay::clamp_unit(RAPPORT_WEIGHT * rapport + ACTIVITY_WEIGHT * activity);
    let effective =
        decay::clamp_unit(decay::clamp_unit(base - fatigue_level + boost) * mode.multiplier(cfg));
    let observing = mode == InteractionMode::Observation;
    let should_respond = !observing && effective >= cfg.willingness_threshold;
    let requires_llm_decision =
        !observing && cfg.ambiguity_low <= effective && effective < cfg.ambiguity_high;
    WillingnessResult {
        base,
        activity,
        fatigue: fatigue_level,
        boost,
        mode,
        effective,
        should_respond,
        requires_llm_decision,
    }
}

/// The one write path for a sent reply: raise fatigue by reply length,
/// bump the consecutive counter, record the agent's turn.
pub fn on_bot_reply_update(
    store: &StateStore,
    cfg: &EngineConfig,
    group: &GroupId,
    agent_label: &str,
    reply: &str,
    now: DateTime<Utc>,
) {
    let reply_chars = reply.chars().count();
    store.with_group(group, |state| {
        state.fatigue = fatigue::raise(&state.fatigue, reply_chars, cfg, now);
        state.bump_consecutive(cfg, now);
        state.push_turn(
            HistoryTurn {
                speaker: agent_label.to_string(),
                text: reply.to_string(),
                at: now,
            },
            cfg.history_window,
        );
    });
}
