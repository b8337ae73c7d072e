//! Reply fatigue: raised by each sent reply, recovered over time.

use crate::config::{EngineConfig, FatigueCurve};
use crate::decay;
use crate::state::{elapsed_secs, DecayingValue};
use chrono::{DateTime, Utc};

/// Current fatigue in [0, 1], derived from the stored value and the
/// configured recovery curve.
pub fn level(fatigue: &DecayingValue, cfg: &EngineConfig, now: DateTime<Utc>) -> f64 {
    let elapsed = elapsed_secs(fatigue.updated_at, now);
    let decayed = match cfg.fatigue_curve {
        FatigueCurve::Exponential => {
            decay::exponential(fatigue.value, elapsed, cfg.fatigue_half_life_secs as f64)
        }
        FatigueCurve::Linear => {
            decay::linear(fatigue.value, elapsed, cfg.fatigue_recovery_per_min)
        }
    };
    decay::clamp_unit(decayed)
}

/// Fatigue after a reply of `reply_chars` characters: the decayed current
/// level plus a length-proportional step, capped per reply and clamped.
pub fn raise(
    fatigue: &DecayingValue,
    reply_chars: usize,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> DecayingValue {
    let step = (reply_chars as f64 * cfg.fatigue_per_char).min(cfg.fatigue_max_step);
    DecayingValue {
        value: decay::clamp_unit(level(fatigue, cfg, now) + step),
        updated_at: now,
    }
}
