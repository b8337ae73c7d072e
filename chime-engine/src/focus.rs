//! Conversation interest scoring and the persisted focus score it feeds.
//!
//! Interest is a per-message heuristic; focus is the slow signal behind
//! focus mode, pulled up by a fraction of each message's interest and
//! decaying on its own half-life so one lively moment cannot lock the
//! mode in place.

use crate::config::EngineConfig;
use crate::decay;
use crate::state::{elapsed_secs, DecayingValue, HistoryTurn};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

const MENTION_WEIGHT: f64 = 0.5;
const NOVELTY_WEIGHT: f64 = 0.3;
const TOPIC_WEIGHT: f64 = 0.2;

/// How engaging this message is for the agent, in [0, 1].
pub fn interest_score(
    content: &str,
    mentions_agent: bool,
    prior_turns: &[HistoryTurn],
    topics: &[String],
) -> f64 {
    let mention = if mentions_agent { 1.0 } else { 0.0 };
    let novelty = novelty_score(content, prior_turns);
    let relevance = topic_relevance(content, topics);
    decay::clamp_unit(MENTION_WEIGHT * mention + NOVELTY_WEIGHT * novelty + TOPIC_WEIGHT * relevance)
}

/// Token novelty against the recent-turn window: 1.0 when nothing in the
/// message was said recently, 0.0 when all of it was.
fn novelty_score(content: &str, prior_turns: &[HistoryTurn]) -> f64 {
    let tokens = tokenize(content);
    if tokens.is_empty() {
        return 0.0;
    }
    let mut seen = HashSet::new();
    for turn in prior_turns {
        seen.extend(tokenize(&turn.text));
    }
    if seen.is_empty() {
        return 1.0;
    }
    let overlap = tokens.iter().filter(|t| seen.contains(*t)).count();
    1.0 - overlap as f64 / tokens.len() as f64
}

/// Fraction of configured topics the message touches; 0 when none are
/// configured.
fn topic_relevance(content: &str, topics: &[String]) -> f64 {
    let lowered = content.to_lowercase();
    let mut total = 0usize;
    let mut matched = 0usize;
    for topic in topics {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() {
            continue;
        }
        total += 1;
        if lowered.contains(&topic) {
            matched += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Current focus in [0, 1].
pub fn level(focus: &DecayingValue, cfg: &EngineConfig, now: DateTime<Utc>) -> f64 {
    decay::clamp_unit(decay::exponential(
        focus.value,
        elapsed_secs(focus.updated_at, now),
        cfg.focus_half_life_secs as f64,
    ))
}

/// Focus after folding in one message's interest.
pub fn advance(
    focus: &DecayingValue,
    interest: f64,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> DecayingValue {
    DecayingValue {
        value: decay::clamp_unit(level(focus, cfg, now) + cfg.focus_attack_rate * interest),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn turn(text: &str) -> HistoryTurn {
        HistoryTurn {
            speaker: "u".to_string(),
            text: text.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn novel_mention_scores_high() {
        let score = interest_score("have you tried the new compiler?", true, &[], &[]);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn repeated_text_without_mention_scores_zero() {
        let prior = vec![turn("lunch at noon works for me")];
        let score = interest_score("lunch at noon works for me", false, &prior, &[]);
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn partial_overlap_gives_partial_novelty() {
        let prior = vec![turn("i like rust a lot")];
        let score = interest_score("rust async runtime", false, &prior, &[]);
        assert!((score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn topic_match_adds_relevance() {
        let topics = vec!["rust".to_string(), "music".to_string()];
        let score = interest_score("the rust borrow checker", false, &[], &topics);
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn empty_message_scores_only_mention() {
        assert_eq!(interest_score("", false, &[], &[]), 0.0);
        assert!((interest_score("", true, &[], &[]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn one_message_moves_focus_by_at_most_attack_rate() {
        let now = Utc::now();
        let cfg = EngineConfig::default();
        let advanced = advance(&DecayingValue::zero(now), 1.0, &cfg, now);
        assert!((advanced.value - cfg.focus_attack_rate).abs() < 1e-9);
    }

    #[test]
    fn sustained_interest_reaches_focus_threshold() {
        let now = Utc::now();
        let cfg = EngineConfig::default();
        let mut focus = DecayingValue::zero(now);
        for _ in 0..3 {
            focus = advance(&focus, 1.0, &cfg, now);
        }
        assert!(focus.value >= cfg.min_interest_score);
        assert!(focus.value <= 1.0);
    }

    #[test]
    fn focus_decays_by_half_life() {
        let now = Utc::now();
        let cfg = EngineConfig::default();
        let focus = DecayingValue {
            value: 0.8,
            updated_at: now,
        };
        let later = level(&focus, &cfg, now + Duration::seconds(900));
        assert!((later - 0.4).abs() < 1e-9);
    }
}
