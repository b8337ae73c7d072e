//! Rendering for the in-chat `/status` command.

use chime_engine::{EngineConfig, GroupStatus};

/// Renders a group's engagement state as a plain-text report. Every score
/// is shown next to the threshold it is judged against.
pub fn render(status: &GroupStatus, cfg: &EngineConfig) -> String {
    let s = &status.stats;
    let flow = if s.has_flow { "yes" } else { "no" };
    let origin = if s.has_origin { "yes" } else { "no" };
    let last_trigger = match s.secs_since_last_trigger {
        Some(secs) => format!("{secs}s ago"),
        None => "never".to_string(),
    };

    format!(
        "engagement status for {group}\n\
         flow: {flow}    origin: {origin}\n\
         mode: {mode}\n\
         messages last minute: {mlm}\n\
         focus: {focus:.2}\n\
         mention boost (current/configured): {boost:.2} / {boost_cfg:.2}\n\
         heartbeat: {effective:.2} / {hb_thr:.2}\n\
         willingness: {willingness:.2} / {wil_thr:.2}\n\
         activity: {activity:.2} / {obs_thr:.2}\n\
         interest: {focus:.2} / {min_interest:.2}\n\
         cooldown remaining: {cooldown}s    last trigger: {last_trigger}\n\
         heartbeat/cooldown: {hb_int}s / {cd_total}s",
        group = status.group_id,
        mode = status.mode,
        mlm = s.messages_last_minute,
        focus = s.focus,
        boost = s.boost,
        boost_cfg = cfg.at_boost_value,
        effective = s.effective,
        hb_thr = cfg.heartbeat_threshold,
        willingness = status.willingness,
        wil_thr = cfg.willingness_threshold,
        activity = status.activity,
        obs_thr = cfg.observation_threshold,
        min_interest = cfg.min_interest_score,
        cooldown = s.cooldown_remaining_secs,
        hb_int = cfg.heartbeat_interval_secs,
        cd_total = cfg.cooldown_secs,
    )
}
