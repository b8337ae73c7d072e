//! Per-group engagement state and its store.
//!
//! One `GroupState` exists per group, held in a `DashMap` and mutated only
//! through `StateStore::with_group`, which serializes read-modify-write
//! sequences for a key. Durable fields round-trip through SQLite as JSON;
//! the rate ring, history ring, and attention boost are volatile and start
//! empty after a restart.

use crate::config::EngineConfig;
use crate::decay;
use crate::error::EngineError;
use chime_platform::{GroupId, OriginToken};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

const RATE_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

pub(crate) fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// A score paired with the moment it was last written; the current level is
/// always derived from elapsed time, so reads are side-effect free.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayingValue {
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

impl DecayingValue {
    pub fn zero(now: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub speaker: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GroupState {
    pub origin: Option<OriginToken>,
    pub consecutive_replies: u32,
    pub consecutive_updated_at: DateTime<Utc>,
    pub fatigue: DecayingValue,
    pub focus: DecayingValue,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub boost: DecayingValue,
    recent: VecDeque<Instant>,
    history: VecDeque<HistoryTurn>,
}

/// Durable subset of `GroupState`, stored as one JSON blob per group.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedGroupState {
    origin: Option<OriginToken>,
    consecutive_replies: u32,
    consecutive_updated_at: DateTime<Utc>,
    fatigue: DecayingValue,
    focus: DecayingValue,
    last_trigger_at: Option<DateTime<Utc>>,
}

impl GroupState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            origin: None,
            consecutive_replies: 0,
            consecutive_updated_at: now,
            fatigue: DecayingValue::zero(now),
            focus: DecayingValue::zero(now),
            last_trigger_at: None,
            boost: DecayingValue::zero(now),
            recent: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    fn to_persisted(&self) -> PersistedGroupState {
        PersistedGroupState {
            origin: self.origin.clone(),
            consecutive_replies: self.consecutive_replies,
            consecutive_updated_at: self.consecutive_updated_at,
            fatigue: self.fatigue,
            focus: self.focus,
            last_trigger_at: self.last_trigger_at,
        }
    }

    fn from_persisted(p: PersistedGroupState, now: DateTime<Utc>) -> Self {
        Self {
            origin: p.origin,
            consecutive_replies: p.consecutive_replies,
            consecutive_updated_at: p.consecutive_updated_at,
            fatigue: p.fatigue,
            focus: p.focus,
            last_trigger_at: p.last_trigger_at,
            boost: DecayingValue::zero(now),
            recent: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    pub fn record_message(&mut self, at: Instant) {
        self.recent.push_back(at);
        while let Some(front) = self.recent.front() {
            if at.saturating_duration_since(*front) > RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn messages_last_minute(&self, now: Instant) -> usize {
        self.recent
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= RATE_WINDOW)
            .count()
    }

    /// Message rate normalized against the saturation point, capped at 1.0.
    pub fn activity(&self, cfg: &EngineConfig, now: Instant) -> f64 {
        let rate = self.messages_last_minute(now) as f64;
        (rate / cfg.activity_saturation_per_min as f64).min(1.0)
    }

    pub fn boost_level(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> f64 {
        decay::exponential(
            self.boost.value,
            elapsed_secs(self.boost.updated_at, now),
            cfg.boost_half_life_secs as f64,
        )
    }

    /// Adds the configured mention boost on top of the decayed current value.
    pub fn add_boost(&mut self, cfg: &EngineConfig, now: DateTime<Utc>) {
        let current = self.boost_level(cfg, now);
        self.boost = DecayingValue {
            value: decay::clamp_unit(current + cfg.at_boost_value),
            updated_at: now,
        };
    }

    pub fn fatigue_level(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> f64 {
        crate::fatigue::level(&self.fatigue, cfg, now)
    }

    pub fn focus_level(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> f64 {
        crate::focus::level(&self.focus, cfg, now)
    }

    /// Consecutive-reply count, treating an expired window as zero.
    pub fn consecutive(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> u32 {
        let window = ChronoDuration::seconds(cfg.consecutive_reset_secs as i64);
        if now - self.consecutive_updated_at > window {
            0
        } else {
            self.consecutive_replies
        }
    }

    pub fn reset_consecutive(&mut self, now: DateTime<Utc>) {
        self.consecutive_replies = 0;
        self.consecutive_updated_at = now;
    }

    pub fn bump_consecutive(&mut self, cfg: &EngineConfig, now: DateTime<Utc>) {
        self.consecutive_replies = self.consecutive(cfg, now) + 1;
        self.consecutive_updated_at = now;
    }

    pub fn push_turn(&mut self, turn: HistoryTurn, window: usize) {
        self.history.push_back(turn);
        while self.history.len() > window {
            self.history.pop_front();
        }
    }

    pub fn history_snapshot(&self) -> Vec<HistoryTurn> {
        self.history.iter().cloned().collect()
    }

    pub fn cooldown_remaining_secs(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> u64 {
        let Some(last) = self.last_trigger_at else {
            return 0;
        };
        let elapsed = (now - last).num_seconds().max(0) as u64;
        cfg.cooldown_secs.saturating_sub(elapsed)
    }

    pub fn secs_since_last_trigger(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_trigger_at.map(|t| (now - t).num_seconds())
    }
}

pub struct StateStore {
    groups: DashMap<GroupId, GroupState>,
    db_path: Option<PathBuf>,
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self {
            groups: DashMap::new(),
            db_path: None,
        }
    }

    /// Opens the SQLite-backed store, loading every persisted group. A
    /// failed open degrades to in-memory operation.
    pub async fn open(path: PathBuf) -> Self {
        let load_path = path.clone();
        let loaded =
            tokio::task::spawn_blocking(move || load_rows(&load_path)).await;
        let rows = match loaded {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::warn!(%e, path = %path.display(), "state store unavailable, continuing in memory");
                return Self::in_memory();
            }
            Err(e) => {
                tracing::warn!(%e, "state store load task failed, continuing in memory");
                return Self::in_memory();
            }
        };

        let store = Self {
            groups: DashMap::new(),
            db_path: Some(path),
        };
        let now = Utc::now();
        for (group_id, json) in rows {
            match serde_json::from_str::<PersistedGroupState>(&json) {
                Ok(p) => {
                    store
                        .groups
                        .insert(GroupId::new(group_id), GroupState::from_persisted(p, now));
                }
                Err(e) => {
                    tracing::warn!(%e, group_id = %group_id, "skipping unreadable state row");
                }
            }
        }
        store
    }

    /// Runs `f` under the per-key guard, creating the group on first touch.
    pub fn with_group<T>(&self, group: &GroupId, f: impl FnOnce(&mut GroupState) -> T) -> T {
        let mut entry = self
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupState::new(Utc::now()));
        f(entry.value_mut())
    }

    pub fn read_group<T>(&self, group: &GroupId, f: impl FnOnce(&GroupState) -> T) -> Option<T> {
        self.groups.get(group).map(|entry| f(entry.value()))
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.groups.contains_key(group)
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Upserts every live group into SQLite. No-op without a backing file.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let Some(path) = self.db_path.clone() else {
            return Ok(());
        };
        let updated_at = Utc::now().to_rfc3339();
        let mut rows = Vec::with_capacity(self.groups.len());
        for entry in self.groups.iter() {
            let json = serde_json::to_string(&entry.value().to_persisted())
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
            rows.push((entry.key().as_str().to_string(), json));
        }
        tokio::task::spawn_blocking(move || save_rows(&path, &rows, &updated_at))
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Flush followed by clearing the in-memory map.
    pub async fn close(&self) -> Result<(), EngineError> {
        let result = self.flush().await;
        self.groups.clear();
        result
    }
}

fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS group_state (
    group_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#,
    )
}

fn load_rows(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    ensure_schema(&conn)?;
    let mut stmt = conn.prepare("SELECT group_id, state FROM group_state")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn save_rows(path: &Path, rows: &[(String, String)], updated_at: &str) -> anyhow::Result<()> {
    let mut conn = Connection::open(path)?;
    ensure_schema(&conn)?;
    let tx = conn.transaction()?;
    for (group_id, state) in rows {
        tx.execute(
            r#"
INSERT INTO group_state (group_id, state, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(group_id) DO UPDATE
SET state = excluded.state,
    updated_at = excluded.updated_at
"#,
            rusqlite::params![group_id, state, updated_at],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn rate_ring_counts_only_last_minute() {
        let base = Instant::now();
        let mut state = GroupState::new(Utc::now());
        state.record_message(base);
        state.record_message(base + std::time::Duration::from_secs(10));
        state.record_message(base + std::time::Duration::from_secs(70));
        let at = base + std::time::Duration::from_secs(70);
        assert_eq!(state.messages_last_minute(at), 2);
    }

    #[test]
    fn activity_saturates_at_one() {
        let base = Instant::now();
        let mut state = GroupState::new(Utc::now());
        for _ in 0..15 {
            state.record_message(base);
        }
        assert_eq!(state.activity(&cfg(), base), 1.0);
    }

    #[test]
    fn activity_is_fraction_of_saturation() {
        let base = Instant::now();
        let mut state = GroupState::new(Utc::now());
        for _ in 0..5 {
            state.record_message(base);
        }
        assert!((state.activity(&cfg(), base) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn boost_accumulates_and_clamps() {
        let now = Utc::now();
        let mut state = GroupState::new(now);
        state.add_boost(&cfg(), now);
        state.add_boost(&cfg(), now);
        state.add_boost(&cfg(), now);
        assert_eq!(state.boost_level(&cfg(), now), 1.0);
    }

    #[test]
    fn boost_decays_by_half_life() {
        let now = Utc::now();
        let mut state = GroupState::new(now);
        state.add_boost(&cfg(), now);
        let later = now + ChronoDuration::seconds(90);
        let level = state.boost_level(&cfg(), later);
        assert!((level - 0.25).abs() < 1e-9);
    }

    #[test]
    fn consecutive_counter_expires_after_window() {
        let now = Utc::now();
        let mut state = GroupState::new(now - ChronoDuration::seconds(1000));
        state.consecutive_replies = 2;
        state.consecutive_updated_at = now - ChronoDuration::seconds(1000);
        assert_eq!(state.consecutive(&cfg(), now), 0);
        state.bump_consecutive(&cfg(), now);
        assert_eq!(state.consecutive(&cfg(), now), 1);
    }

    #[test]
    fn history_ring_is_bounded() {
        let now = Utc::now();
        let mut state = GroupState::new(now);
        for i in 0..12 {
            state.push_turn(
                HistoryTurn {
                    speaker: "u".to_string(),
                    text: format!("m{i}"),
                    at: now,
                },
                8,
            );
        }
        let turns = state.history_snapshot();
        assert_eq!(turns.len(), 8);
        assert_eq!(turns[0].text, "m4");
        assert_eq!(turns[7].text, "m11");
    }

    #[test]
    fn cooldown_remaining_counts_down() {
        let now = Utc::now();
        let mut state = GroupState::new(now);
        assert_eq!(state.cooldown_remaining_secs(&cfg(), now), 0);
        state.last_trigger_at = Some(now - ChronoDuration::seconds(50));
        assert_eq!(state.cooldown_remaining_secs(&cfg(), now), 70);
        state.last_trigger_at = Some(now - ChronoDuration::seconds(500));
        assert_eq!(state.cooldown_remaining_secs(&cfg(), now), 0);
    }

    #[test]
    fn with_group_creates_then_mutates_in_place() {
        let store = StateStore::in_memory();
        let group = GroupId::new("g1");
        store.with_group(&group, |s| s.consecutive_replies = 2);
        let count = store
            .read_group(&group, |s| s.consecutive_replies)
            .expect("group exists");
        assert_eq!(count, 2);
        assert_eq!(store.group_count(), 1);
    }

    #[test]
    fn read_group_is_none_for_unknown() {
        let store = StateStore::in_memory();
        assert!(store
            .read_group(&GroupId::new("missing"), |s| s.consecutive_replies)
            .is_none());
    }

    #[tokio::test]
    async fn persists_and_reloads_durable_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        let now = Utc::now();

        let store = StateStore::open(path.clone()).await;
        let group = GroupId::new("team-a");
        store.with_group(&group, |s| {
            s.origin = Some(OriginToken::new("console:team-a"));
            s.consecutive_replies = 2;
            s.fatigue = DecayingValue {
                value: 0.4,
                updated_at: now,
            };
            s.focus = DecayingValue {
                value: 0.7,
                updated_at: now,
            };
            s.last_trigger_at = Some(now);
            s.add_boost(&cfg(), now);
            s.record_message(Instant::now());
        });
        store.flush().await.expect("flush");

        let reloaded = StateStore::open(path).await;
        assert_eq!(reloaded.group_ids(), vec![group.clone()]);
        reloaded
            .read_group(&group, |s| {
                assert_eq!(
                    s.origin.as_ref().map(|o| o.as_str().to_string()),
                    Some("console:team-a".to_string())
                );
                assert_eq!(s.consecutive_replies, 2);
                assert!((s.fatigue.value - 0.4).abs() < 1e-9);
                assert!((s.focus.value - 0.7).abs() < 1e-9);
                assert!(s.last_trigger_at.is_some());
                assert_eq!(s.boost.value, 0.0);
                assert_eq!(s.messages_last_minute(Instant::now()), 0);
            })
            .expect("group reloaded");
    }

    #[tokio::test]
    async fn unopenable_path_degrades_to_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().to_path_buf()).await;
        let group = GroupId::new("g");
        store.with_group(&group, |s| s.consecutive_replies = 1);
        assert_eq!(store.group_count(), 1);
        store.flush().await.expect("in-memory flush is a no-op");
    }
}
