//! Engine tunables.
//!
//! Every field has a hard-coded default so a missing file or a partial
//! `[engine]` table never fails to deserialize; `validate` only rejects
//! values that would make the decision pipeline nonsensical.

use crate::error::EngineError;
use serde::Deserialize;

/// Shape of fatigue recovery over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatigueCurve {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Effective willingness at/above this replies without adjudication.
    #[serde(default = "default_willingness_threshold")]
    pub willingness_threshold: f64,
    /// Lower bound (inclusive) of the band escalated to the model judge.
    #[serde(default = "default_ambiguity_low")]
    pub ambiguity_low: f64,
    /// Upper bound (exclusive) of the band escalated to the model judge.
    #[serde(default = "default_ambiguity_high")]
    pub ambiguity_high: f64,
    /// Group activity below this forces observation mode.
    #[serde(default = "default_observation_threshold")]
    pub observation_threshold: f64,
    /// Focus score at/above this enters focus mode.
    #[serde(default = "default_min_interest_score")]
    pub min_interest_score: f64,
    /// Willingness multiplier applied in focus mode.
    #[serde(default = "default_focus_multiplier")]
    pub focus_multiplier: f64,
    /// Attention boost added when the agent is directly mentioned.
    #[serde(default = "default_at_boost_value")]
    pub at_boost_value: f64,
    #[serde(default = "default_boost_half_life_secs")]
    pub boost_half_life_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Heartbeat effective score needed for a proactive trigger.
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold: f64,
    /// Minimum seconds between two proactive triggers in one group.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Replies in a row before the agent goes quiet until a human speaks.
    #[serde(default = "default_max_consecutive_replies")]
    pub max_consecutive_replies: u32,
    /// Consecutive counter also resets after this much silence.
    #[serde(default = "default_consecutive_reset_secs")]
    pub consecutive_reset_secs: u64,
    #[serde(default = "default_fatigue_curve")]
    pub fatigue_curve: FatigueCurve,
    #[serde(default = "default_fatigue_half_life_secs")]
    pub fatigue_half_life_secs: u64,
    /// Linear-curve recovery per minute.
    #[serde(default = "default_fatigue_recovery_per_min")]
    pub fatigue_recovery_per_min: f64,
    #[serde(default = "default_fatigue_per_char")]
    pub fatigue_per_char: f64,
    /// Cap on the fatigue raise from a single reply.
    #[serde(default = "default_fatigue_max_step")]
    pub fatigue_max_step: f64,
    /// Messages per minute that count as fully active (activity = 1.0).
    #[serde(default = "default_activity_saturation_per_min")]
    pub activity_saturation_per_min: u32,
    #[serde(default = "default_focus_half_life_secs")]
    pub focus_half_life_secs: u64,
    /// Fraction of a message's interest score pulled into the focus score.
    #[serde(default = "default_focus_attack_rate")]
    pub focus_attack_rate: f64,
    /// Topics the agent finds interesting; empty disables the topic signal.
    #[serde(default)]
    pub interest_topics: Vec<String>,
    /// Recent turns kept per group for prompts and novelty scoring.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Memory snippets included per prompt.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    #[serde(default = "default_persona_cache_secs")]
    pub persona_cache_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Primary decline sentinel; legacy literals are always recognized too.
    #[serde(default = "default_decline_marker")]
    pub decline_marker: String,
    /// Sent when the threshold path fails to produce a reply.
    #[serde(default = "default_apology_text")]
    pub apology_text: String,
}

fn default_willingness_threshold() -> f64 {
    0.5
}

fn default_ambiguity_low() -> f64 {
    0.45
}

fn default_ambiguity_high() -> f64 {
    0.60
}

fn default_observation_threshold() -> f64 {
    0.2
}

fn default_min_interest_score() -> f64 {
    0.6
}

fn default_focus_multiplier() -> f64 {
    1.5
}

fn default_at_boost_value() -> f64 {
    0.5
}

fn default_boost_half_life_secs() -> u64 {
    90
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_heartbeat_threshold() -> f64 {
    0.55
}

fn default_cooldown_secs() -> u64 {
    120
}

fn default_max_consecutive_replies() -> u32 {
    3
}

fn default_consecutive_reset_secs() -> u64 {
    900
}

fn default_fatigue_curve() -> FatigueCurve {
    FatigueCurve::Exponential
}

fn default_fatigue_half_life_secs() -> u64 {
    600
}

fn default_fatigue_recovery_per_min() -> f64 {
    0.06
}

fn default_fatigue_per_char() -> f64 {
    0.002
}

fn default_fatigue_max_step() -> f64 {
    0.3
}

fn default_activity_saturation_per_min() -> u32 {
    10
}

fn default_focus_half_life_secs() -> u64 {
    900
}

fn default_focus_attack_rate() -> f64 {
    0.3
}

fn default_history_window() -> usize {
    8
}

fn default_memory_window() -> usize {
    3
}

fn default_persona_cache_secs() -> u64 {
    300
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_decline_marker() -> String {
    "<NO_RESPONSE>".to_string()
}

fn default_apology_text() -> String {
    "Sorry, I lost my train of thought for a moment. What were you saying?".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            willingness_threshold: default_willingness_threshold(),
            ambiguity_low: default_ambiguity_low(),
            ambiguity_high: default_ambiguity_high(),
            observation_threshold: default_observation_threshold(),
            min_interest_score: default_min_interest_score(),
            focus_multiplier: default_focus_multiplier(),
            at_boost_value: default_at_boost_value(),
            boost_half_life_secs: default_boost_half_life_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_threshold: default_heartbeat_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_consecutive_replies: default_max_consecutive_replies(),
            consecutive_reset_secs: default_consecutive_reset_secs(),
            fatigue_curve: default_fatigue_curve(),
            fatigue_half_life_secs: default_fatigue_half_life_secs(),
            fatigue_recovery_per_min: default_fatigue_recovery_per_min(),
            fatigue_per_char: default_fatigue_per_char(),
            fatigue_max_step: default_fatigue_max_step(),
            activity_saturation_per_min: default_activity_saturation_per_min(),
            focus_half_life_secs: default_focus_half_life_secs(),
            focus_attack_rate: default_focus_attack_rate(),
            interest_topics: Vec::new(),
            history_window: default_history_window(),
            memory_window: default_memory_window(),
            persona_cache_secs: default_persona_cache_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            decline_marker: default_decline_marker(),
            apology_text: default_apology_text(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let unit_bounded = [
            ("willingness_threshold", self.willingness_threshold),
            ("ambiguity_low", self.ambiguity_low),
            ("ambiguity_high", self.ambiguity_high),
            ("observation_threshold", self.observation_threshold),
            ("min_interest_score", self.min_interest_score),
            ("heartbeat_threshold", self.heartbeat_threshold),
            ("at_boost_value", self.at_boost_value),
            ("focus_attack_rate", self.focus_attack_rate),
            ("fatigue_max_step", self.fatigue_max_step),
        ];
        for (name, value) in unit_bounded {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.ambiguity_low > self.ambiguity_high {
            return Err(EngineError::InvalidConfig(format!(
                "ambiguity band is inverted: [{}, {})",
                self.ambiguity_low, self.ambiguity_high
            )));
        }
        if self.focus_multiplier < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "focus_multiplier must be >= 1.0, got {}",
                self.focus_multiplier
            )));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "heartbeat_interval_secs must be > 0".to_string(),
            ));
        }
        if self.activity_saturation_per_min == 0 {
            return Err(EngineError::InvalidConfig(
                "activity_saturation_per_min must be > 0".to_string(),
            ));
        }
        if self.history_window == 0 {
            return Err(EngineError::InvalidConfig(
                "history_window must be > 0".to_string(),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "provider_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.fatigue_per_char < 0.0 || self.fatigue_recovery_per_min < 0.0 {
            return Err(EngineError::InvalidConfig(
                "fatigue rates must be non-negative".to_string(),
            ));
        }
        if self.decline_marker.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "decline_marker must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}
