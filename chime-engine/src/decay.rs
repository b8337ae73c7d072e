//! Time-decay curves shared by fatigue, focus, and attention boost.

/// Halves `value` every `half_life_secs`. Negative elapsed time (clock
/// skew after a restore) is treated as zero.
pub(crate) fn exponential(value: f64, elapsed_secs: f64, half_life_secs: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    if half_life_secs <= 0.0 {
        return value;
    }
    let elapsed = elapsed_secs.max(0.0);
    value * 0.5_f64.powf(elapsed / half_life_secs)
}

/// Subtracts `per_min` for every elapsed minute, floored at zero.
pub(crate) fn linear(value: f64, elapsed_secs: f64, per_min: f64) -> f64 {
    let elapsed = elapsed_secs.max(0.0);
    (value - per_min * elapsed / 60.0).max(0.0)
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
