//! Per-group heartbeat flows.
//!
//! Every engaged group gets one background task that wakes on a fixed
//! interval and asks whether the agent should speak unprompted. The
//! decision chain is pure and lives here; the side-effecting tick body
//! is injected by the engine so flows stay testable.

use crate::config::EngineConfig;
use crate::decay::clamp_unit;
use crate::mode::InteractionMode;
use chime_platform::GroupId;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot the engine reads out of group state for one heartbeat tick.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeartbeatInputs {
    pub cooldown_remaining_secs: u64,
    pub mode: InteractionMode,
    pub focus: f64,
    pub boost: f64,
    pub fatigue: f64,
    pub activity: f64,
    pub consecutive: u32,
    pub has_origin: bool,
}

/// A tick that cleared every gate and may go to adjudication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProactiveEvaluation {
    pub effective: f64,
    pub focus: f64,
    pub boost: f64,
    pub fatigue: f64,
    pub activity: f64,
    pub mode: InteractionMode,
}

/// Why a tick stayed silent without consulting the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ProactiveBlock {
    Cooldown { remaining_secs: u64 },
    Observing,
    BelowThreshold { effective: f64 },
    ConsecutiveCap { count: u32 },
    NoOrigin,
}

impl fmt::Display for ProactiveBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown { remaining_secs } => {
                write!(f, "cooldown ({remaining_secs}s remaining)")
            }
            Self::Observing => write!(f, "observation mode"),
            Self::BelowThreshold { effective } => {
                write!(f, "effective score {effective:.2} below threshold")
            }
            Self::ConsecutiveCap { count } => {
                write!(f, "consecutive reply cap reached ({count})")
            }
            Self::NoOrigin => write!(f, "no known delivery origin"),
        }
    }
}

/// Live per-group numbers surfaced by the status command.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStats {
    pub has_flow: bool,
    pub has_origin: bool,
    pub messages_last_minute: usize,
    pub focus: f64,
    pub boost: f64,
    pub fatigue: f64,
    pub effective: f64,
    pub cooldown_remaining_secs: u64,
    pub secs_since_last_trigger: Option<i64>,
    pub consecutive_replies: u32,
}

/// Heartbeat urgency: focus plus attention boost, dampened by fatigue.
pub(crate) fn heartbeat_effective(focus: f64, boost: f64, fatigue: f64) -> f64 {
    clamp_unit(focus + boost - fatigue)
}

/// Runs the gates in order and stops at the first that blocks. Cooldown
/// is checked before anything else so a recent send silences even a
/// maximally eager group.
pub(crate) fn proactive_decision(
    inputs: &HeartbeatInputs,
    cfg: &EngineConfig,
) -> Result<ProactiveEvaluation, ProactiveBlock> {
    if inputs.cooldown_remaining_secs > 0 {
        return Err(ProactiveBlock::Cooldown {
            remaining_secs: inputs.cooldown_remaining_secs,
        });
    }
    if inputs.mode == InteractionMode::Observation {
        return Err(ProactiveBlock::Observing);
    }
    let effective = heartbeat_effective(inputs.focus, inputs.boost, inputs.fatigue);
    if effective < cfg.heartbeat_threshold {
        return Err(ProactiveBlock::BelowThreshold { effective });
    }
    if inputs.consecutive >= cfg.max_consecutive_replies {
        return Err(ProactiveBlock::ConsecutiveCap {
            count: inputs.consecutive,
        });
    }
    if !inputs.has_origin {
        return Err(ProactiveBlock::NoOrigin);
    }
    Ok(ProactiveEvaluation {
        effective,
        focus: inputs.focus,
        boost: inputs.boost,
        fatigue: inputs.fatigue,
        activity: inputs.activity,
        mode: inputs.mode,
    })
}

struct Flow {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one flow task per group, all children of a single root token so
/// shutdown is one cancel plus bounded joins.
pub struct HeartbeatScheduler {
    flows: DashMap<GroupId, Flow>,
    root: CancellationToken,
    period: Duration,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            flows: DashMap::new(),
            root: CancellationToken::new(),
            period: period.max(Duration::from_millis(1)),
        }
    }

    /// Starts a flow for the group unless one is already running.
    pub fn ensure_flow<F, Fut>(&self, group: &GroupId, tick: F)
    where
        F: Fn(GroupId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.flows.entry(group.clone()).or_insert_with(|| {
            let cancel = self.root.child_token();
            let task = tokio::spawn(run_flow(
                group.clone(),
                self.period,
                cancel.clone(),
                tick,
            ));
            tracing::info!(group = %group, "heartbeat flow started");
            Flow { cancel, task }
        });
    }

    pub fn has_flow(&self, group: &GroupId) -> bool {
        self.flows.contains_key(group)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Cancels every flow and waits, bounded, for each task to finish.
    pub async fn stop_all(&self) {
        self.root.cancel();
        let groups: Vec<GroupId> = self.flows.iter().map(|entry| entry.key().clone()).collect();
        for group in groups {
            let Some((_, flow)) = self.flows.remove(&group) else {
                continue;
            };
            flow.cancel.cancel();
            match tokio::time::timeout(STOP_TIMEOUT, flow.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(group = %group, %e, "heartbeat task panicked"),
                Err(_) => tracing::warn!(group = %group, "heartbeat task did not stop in time"),
            }
        }
    }
}

async fn run_flow<F, Fut>(group: GroupId, period: Duration, cancel: CancellationToken, tick: F)
where
    F: Fn(GroupId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        // Separate select so cancellation during a slow tick body ends
        // the flow before any further waiting.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick(group.clone()) => {}
        }
    }
    tracing::debug!(group = %group, "heartbeat flow stopped");
}
