//! Interaction mode: a stateless projection of activity and focus.
//!
//! No transition history is kept. The label is recomputed on every
//! evaluation from the decaying signals underneath it, so there is no
//! stuck state to unwedge; observation is checked first and wins.

use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    Observation,
    Normal,
    Focus,
}

impl InteractionMode {
    pub fn multiplier(&self, cfg: &EngineConfig) -> f64 {
        match self {
            InteractionMode::Observation => 0.0,
            InteractionMode::Normal => 1.0,
            InteractionMode::Focus => cfg.focus_multiplier,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Observation => "observation",
            InteractionMode::Normal => "normal",
            InteractionMode::Focus => "focus",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn select(activity: f64, focus: f64, cfg: &EngineConfig) -> InteractionMode {
    if activity < cfg.observation_threshold {
        InteractionMode::Observation
    } else if focus >= cfg.min_interest_score {
        InteractionMode::Focus
    } else {
        InteractionMode::Normal
    }
}
