//! The engine proper: wires the state store, context assembly, the
//! willingness scorer, and the response gate into one message pipeline,
//! and drives the per-group heartbeat flows.
//!
//! All decision logic lives in the leaf modules; this file owns ordering
//! and side effects. State writes tied to an outbound reply happen only
//! after the send succeeds.

use crate::config::EngineConfig;
use crate::context::{ContextAssembler, ImpressionSource, MemorySource};
use crate::error::EngineError;
use crate::gate::{contains_decline_marker, DecisionMethod, PersonaSource, ResponseGate};
use crate::heartbeat::{
    heartbeat_effective, proactive_decision, FlowStats, HeartbeatInputs, HeartbeatScheduler,
};
use crate::mode::{self, InteractionMode};
use crate::state::{HistoryTurn, StateStore};
use crate::{focus, willingness};
use chime_llm::CompletionBackend;
use chime_platform::{
    AgentIdentity, GroupEvent, GroupId, OriginToken, OutboundFilter, OutboundSink,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the engine borrows from the hosting application.
pub struct EngineDeps {
    pub backend: Arc<dyn CompletionBackend>,
    pub persona: Arc<dyn PersonaSource>,
    pub impressions: Arc<dyn ImpressionSource>,
    pub memories: Arc<dyn MemorySource>,
    pub sink: Arc<dyn OutboundSink>,
    pub filter: Arc<dyn OutboundFilter>,
    pub identity: AgentIdentity,
}

/// What happened to one inbound message, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum EngagementOutcome {
    Observation,
    BelowThreshold {
        willingness: f64,
    },
    ConsecutiveCap {
        count: u32,
    },
    Declined {
        method: DecisionMethod,
        skip_reason: Option<String>,
        willingness: f64,
    },
    Suppressed {
        reason: String,
    },
    DeliveryFailed,
    Replied {
        text: String,
        method: DecisionMethod,
        willingness: f64,
    },
}

/// Diagnostic snapshot for one group, served by the status command.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub group_id: GroupId,
    pub mode: InteractionMode,
    pub willingness: f64,
    pub activity: f64,
    pub stats: FlowStats,
}

pub struct Engine {
    cfg: Arc<EngineConfig>,
    store: Arc<StateStore>,
    pipeline: Arc<Pipeline>,
    heartbeat: Arc<HeartbeatScheduler>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        store: Arc<StateStore>,
        deps: EngineDeps,
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let assembler = ContextAssembler::new(deps.impressions, deps.memories, cfg.memory_window);
        let gate = ResponseGate::new(
            cfg.clone(),
            deps.backend,
            deps.persona,
            deps.identity.name.clone(),
        );
        let pipeline = Arc::new(Pipeline {
            cfg: cfg.clone(),
            store: store.clone(),
            assembler,
            gate,
            sink: deps.sink,
            filter: deps.filter,
            identity: deps.identity,
        });
        let heartbeat = Arc::new(HeartbeatScheduler::new(Duration::from_secs(
            cfg.heartbeat_interval_secs,
        )));
        Ok(Self {
            cfg,
            store,
            pipeline,
            heartbeat,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Full pipeline for one inbound group message. Also makes sure the
    /// group has a live heartbeat flow.
    pub async fn handle_group_message(&self, event: GroupEvent) -> EngagementOutcome {
        self.spawn_flow(&event.group_id);
        let outcome = self.pipeline.respond_to_message(event).await;
        tracing::debug!(outcome = ?outcome, "message handled");
        outcome
    }

    /// Resumes a heartbeat flow for every group the store knows about,
    /// typically right after loading persisted state.
    pub fn start_all_flows(&self) {
        for group in self.store.group_ids() {
            self.spawn_flow(&group);
        }
    }

    /// Marks a group as known without running the reply pipeline: records
    /// the reply origin and starts its heartbeat flow. Used by surfaces
    /// that want to answer a status query for a group the engine may not
    /// have replied in yet.
    pub fn touch_group(&self, group: &GroupId, origin: &OriginToken) {
        let origin = origin.clone();
        self.store.with_group(group, move |state| {
            state.origin = Some(origin);
        });
        self.spawn_flow(group);
    }

    pub fn group_status(&self, group: &GroupId) -> Option<GroupStatus> {
        let now = Utc::now();
        let instant_now = Instant::now();
        self.store.read_group(group, |state| {
            let focus = state.focus_level(&self.cfg, now);
            let fatigue = state.fatigue_level(&self.cfg, now);
            let boost = state.boost_level(&self.cfg, now);
            let activity = state.activity(&self.cfg, instant_now);
            let mode = mode::select(activity, focus, &self.cfg);
            // Rapport is per-sender; the status view has none, so it uses
            // the neutral midpoint.
            let live = willingness::evaluate(0.5, activity, fatigue, boost, mode, &self.cfg);
            GroupStatus {
                group_id: group.clone(),
                mode,
                willingness: live.effective,
                activity,
                stats: FlowStats {
                    has_flow: self.heartbeat.has_flow(group),
                    has_origin: state.origin.is_some(),
                    messages_last_minute: state.messages_last_minute(instant_now),
                    focus,
                    boost,
                    fatigue,
                    effective: heartbeat_effective(focus, boost, fatigue),
                    cooldown_remaining_secs: state.cooldown_remaining_secs(&self.cfg, now),
                    secs_since_last_trigger: state.secs_since_last_trigger(now),
                    consecutive_replies: state.consecutive(&self.cfg, now),
                },
            }
        })
    }

    /// Stops every flow, then flushes and releases group state.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.heartbeat.stop_all().await;
        self.store.close().await
    }

    fn spawn_flow(&self, group: &GroupId) {
        let pipeline = self.pipeline.clone();
        self.heartbeat.ensure_flow(group, move |group| {
            let pipeline = pipeline.clone();
            async move {
                pipeline.proactive_tick(&group).await;
            }
        });
    }
}

struct Pipeline {
    cfg: Arc<EngineConfig>,
    store: Arc<StateStore>,
    assembler: ContextAssembler,
    gate: ResponseGate,
    sink: Arc<dyn OutboundSink>,
    filter: Arc<dyn OutboundFilter>,
    identity: AgentIdentity,
}

/// What one ingest pass reads out of group state, all under a single
/// per-key guard.
struct IngestSnapshot {
    prior_turns: Vec<HistoryTurn>,
    activity: f64,
    fatigue: f64,
    focus: f64,
    boost: f64,
    consecutive: u32,
}

impl Pipeline {
    async fn respond_to_message(&self, event: GroupEvent) -> EngagementOutcome {
        let now = event.received_at;
        let instant_now = Instant::now();
        let snapshot = self.store.with_group(&event.group_id, |state| {
            state.origin = Some(event.origin.clone());
            state.record_message(instant_now);
            if !event.sender_is_bot {
                state.reset_consecutive(now);
            }
            if event.mentions_agent {
                state.add_boost(&self.cfg, now);
            }
            let prior_turns = state.history_snapshot();
            let interest = focus::interest_score(
                &event.content,
                event.mentions_agent,
                &prior_turns,
                &self.cfg.interest_topics,
            );
            state.focus = focus::advance(&state.focus, interest, &self.cfg, now);
            state.push_turn(
                HistoryTurn {
                    speaker: event.sender_id.to_string(),
                    text: event.content.clone(),
                    at: now,
                },
                self.cfg.history_window,
            );
            IngestSnapshot {
                activity: state.activity(&self.cfg, instant_now),
                fatigue: state.fatigue_level(&self.cfg, now),
                focus: state.focus_level(&self.cfg, now),
                boost: state.boost_level(&self.cfg, now),
                consecutive: state.consecutive(&self.cfg, now),
                prior_turns,
            }
        });

        let mode = mode::select(snapshot.activity, snapshot.focus, &self.cfg);
        if mode == InteractionMode::Observation {
            tracing::debug!(group = %event.group_id, activity = snapshot.activity, "observing only");
            return EngagementOutcome::Observation;
        }

        let ctx = self
            .assembler
            .assemble(
                &event.group_id,
                &event.sender_id,
                &event.content,
                snapshot.prior_turns,
                snapshot.activity,
            )
            .await;
        let willingness = willingness::evaluate(
            ctx.impression.score,
            snapshot.activity,
            snapshot.fatigue,
            snapshot.boost,
            mode,
            &self.cfg,
        );
        tracing::debug!(
            group = %event.group_id,
            effective = willingness.effective,
            mode = %mode,
            adjudicate = willingness.requires_llm_decision,
            "willingness evaluated"
        );
        if !willingness.should_respond && !willingness.requires_llm_decision {
            return EngagementOutcome::BelowThreshold {
                willingness: willingness.effective,
            };
        }
        if snapshot.consecutive >= self.cfg.max_consecutive_replies {
            return EngagementOutcome::ConsecutiveCap {
                count: snapshot.consecutive,
            };
        }

        let result = self
            .gate
            .generate_response(event.sender_id.as_str(), &event.content, &ctx, &willingness)
            .await;
        if !result.should_reply {
            return EngagementOutcome::Declined {
                method: result.method,
                skip_reason: result.skip_reason,
                willingness: result.willingness,
            };
        }
        let Some(content) = result.content else {
            return EngagementOutcome::Declined {
                method: result.method,
                skip_reason: Some("empty reply content".to_string()),
                willingness: result.willingness,
            };
        };

        match self.send(&event, &content).await {
            SendResult::Sent(text) => {
                willingness::on_bot_reply_update(
                    &self.store,
                    &self.cfg,
                    &event.group_id,
                    &self.identity.name,
                    &text,
                    Utc::now(),
                );
                EngagementOutcome::Replied {
                    text,
                    method: result.method,
                    willingness: result.willingness,
                }
            }
            SendResult::Suppressed(reason) => EngagementOutcome::Suppressed { reason },
            SendResult::Failed => EngagementOutcome::DeliveryFailed,
        }
    }

    /// One heartbeat tick for one group. Everything before `deliver` is
    /// read-only, so cancelling mid-tick leaves no partial writes.
    async fn proactive_tick(&self, group: &GroupId) {
        let now = Utc::now();
        let instant_now = Instant::now();
        let Some((inputs, turns)) = self.store.read_group(group, |state| {
            let focus = state.focus_level(&self.cfg, now);
            let activity = state.activity(&self.cfg, instant_now);
            let inputs = HeartbeatInputs {
                cooldown_remaining_secs: state.cooldown_remaining_secs(&self.cfg, now),
                mode: mode::select(activity, focus, &self.cfg),
                focus,
                boost: state.boost_level(&self.cfg, now),
                fatigue: state.fatigue_level(&self.cfg, now),
                activity,
                consecutive: state.consecutive(&self.cfg, now),
                has_origin: state.origin.is_some(),
            };
            (inputs, state.history_snapshot())
        }) else {
            return;
        };

        let eval = match proactive_decision(&inputs, &self.cfg) {
            Ok(eval) => eval,
            Err(block) => {
                tracing::trace!(group = %group, %block, "heartbeat tick blocked");
                return;
            }
        };
        tracing::debug!(group = %group, effective = eval.effective, "heartbeat tick cleared gates");

        let ctx = self.assembler.assemble_ambient(group, turns, eval.activity).await;
        let result = self.gate.generate_proactive(&ctx, &eval).await;
        let Some(content) = result.content.filter(|_| result.should_reply) else {
            tracing::debug!(
                group = %group,
                reason = result.skip_reason.as_deref().unwrap_or("declined"),
                "proactive reply withheld"
            );
            return;
        };

        let Some(origin) = self
            .store
            .read_group(group, |state| state.origin.clone())
            .flatten()
        else {
            return;
        };
        let text = self.filter.filter(&content);
        if text.is_empty() {
            return;
        }
        if contains_decline_marker(&text, self.gate.markers()) {
            tracing::info!(group = %group, "decline marker surfaced after filtering, suppressing");
            return;
        }
        if let Err(e) = self.sink.deliver(&origin, &text).await {
            tracing::warn!(group = %group, %e, "proactive delivery failed");
            return;
        }

        let sent_at = Utc::now();
        self.store
            .with_group(group, |state| state.last_trigger_at = Some(sent_at));
        willingness::on_bot_reply_update(
            &self.store,
            &self.cfg,
            group,
            &self.identity.name,
            &text,
            sent_at,
        );
        tracing::info!(group = %group, "proactive message sent");
    }

    /// Outbound boundary: filter, re-scan for decline markers, deliver.
    async fn send(&self, event: &GroupEvent, content: &str) -> SendResult {
        let text = self.filter.filter(content);
        if text.is_empty() {
            return SendResult::Suppressed("empty after outbound filtering".to_string());
        }
        if contains_decline_marker(&text, self.gate.markers()) {
            tracing::info!(group = %event.group_id, "decline marker surfaced after filtering, suppressing");
            return SendResult::Suppressed("decline marker in outbound text".to_string());
        }
        match self.sink.deliver(&event.origin, &text).await {
            Ok(()) => SendResult::Sent(text),
            Err(e) => {
                tracing::warn!(group = %event.group_id, %e, "outbound delivery failed");
                SendResult::Failed
            }
        }
    }
}

enum SendResult {
    Sent(String),
    Suppressed(String),
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Impression, NullMemories};
    use crate::gate::StaticPersona;
    use chime_llm::{Completion, CompletionRequest, LlmError, Usage};
    use chime_platform::{MessageId, OriginToken, PlainTextFilter, UserId};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _request: &CompletionRequest) -> chime_llm::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().expect("lock").pop_front() {
                Some(Ok(text)) => Ok(Completion {
                    text,
                    usage: Usage::default(),
                }),
                Some(Err(e)) => Err(e),
                None => Ok(Completion {
                    text: "ok".to_string(),
                    usage: Usage::default(),
                }),
            }
        }
    }

    struct SlowBackend;

    #[async_trait::async_trait]
    impl CompletionBackend for SlowBackend {
        async fn complete(&self, _request: &CompletionRequest) -> chime_llm::Result<Completion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion {
                text: "too late".to_string(),
                usage: Usage::default(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl OutboundSink for RecordingSink {
        async fn deliver(&self, origin: &OriginToken, text: &str) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("sink down");
            }
            self.sent
                .lock()
                .expect("lock")
                .push((origin.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct FixedImpression(f64);

    #[async_trait::async_trait]
    impl ImpressionSource for FixedImpression {
        async fn get_user_impression(&self, _user: &UserId) -> anyhow::Result<Option<Impression>> {
            Ok(Some(Impression {
                score: self.0,
                summary: "a regular".to_string(),
            }))
        }
    }

    fn engine_with(
        backend: Arc<dyn CompletionBackend>,
        rapport: f64,
    ) -> (Engine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let deps = EngineDeps {
            backend,
            persona: Arc::new(StaticPersona::none()),
            impressions: Arc::new(FixedImpression(rapport)),
            memories: Arc::new(NullMemories),
            sink: sink.clone(),
            filter: Arc::new(PlainTextFilter),
            identity: AgentIdentity::new("chime", vec![]),
        };
        let engine = Engine::new(EngineConfig::default(), Arc::new(StateStore::in_memory()), deps)
            .expect("engine");
        (engine, sink)
    }

    fn event(group: &str, sender: &str, text: &str, mentions: bool) -> GroupEvent {
        GroupEvent {
            group_id: GroupId::new(group),
            sender_id: UserId::new(sender),
            message_id: MessageId::new(format!("m-{}", text.len())),
            content: text.to_string(),
            mentions_agent: mentions,
            sender_is_bot: false,
            origin: OriginToken::new(format!("test:{group}")),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn quiet_group_is_only_observed() {
        let backend = ScriptedBackend::new(vec![]);
        let (engine, sink) = engine_with(backend.clone(), 1.0);
        let outcome = engine
            .handle_group_message(event("alpha", "ann", "morning all", true))
            .await;
        assert_eq!(outcome, EngagementOutcome::Observation);
        assert_eq!(backend.calls(), 0);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn clear_willingness_replies_and_counts() {
        let backend = ScriptedBackend::new(vec![Ok("hey!".to_string())]);
        let (engine, sink) = engine_with(backend.clone(), 1.0);
        let group = GroupId::new("alpha");

        let first = engine
            .handle_group_message(event("alpha", "ann", "morning all", false))
            .await;
        assert_eq!(first, EngagementOutcome::Observation);

        let second = engine
            .handle_group_message(event("alpha", "ann", "chime, you around?", true))
            .await;
        match second {
            EngagementOutcome::Replied { text, method, .. } => {
                assert_eq!(text, "hey!");
                assert_eq!(method, DecisionMethod::Threshold);
            }
            other => panic!("expected a reply, got {other:?}"),
        }
        assert_eq!(backend.calls(), 1);
        assert_eq!(sink.sent(), vec![("test:alpha".to_string(), "hey!".to_string())]);

        let status = engine.group_status(&group).expect("status");
        assert_eq!(status.stats.consecutive_replies, 1);
        assert!(status.stats.fatigue > 0.0);
        assert!(status.stats.has_flow);
    }

    #[tokio::test]
    async fn ambiguous_willingness_defers_to_adjudication() {
        let backend = ScriptedBackend::new(vec![Ok("[DO_NOT_REPLY] ok".to_string())]);
        let (engine, sink) = engine_with(backend.clone(), 0.625);
        let group = GroupId::new("alpha");

        engine
            .handle_group_message(event("alpha", "ann", "anyone here", false))
            .await;
        let outcome = engine
            .handle_group_message(event("alpha", "bo", "quiet today", false))
            .await;
        match outcome {
            EngagementOutcome::Declined {
                method,
                skip_reason,
                ..
            } => {
                assert_eq!(method, DecisionMethod::Adjudicated);
                assert!(skip_reason.is_some());
            }
            other => panic!("expected an adjudicated decline, got {other:?}"),
        }
        assert_eq!(backend.calls(), 1);
        assert!(sink.sent().is_empty());
        let status = engine.group_status(&group).expect("status");
        assert_eq!(status.stats.consecutive_replies, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn adjudication_timeout_stays_silent() {
        let (engine, sink) = engine_with(Arc::new(SlowBackend), 0.625);
        engine
            .handle_group_message(event("alpha", "ann", "anyone here", false))
            .await;
        let outcome = engine
            .handle_group_message(event("alpha", "bo", "quiet today", false))
            .await;
        match outcome {
            EngagementOutcome::Declined { skip_reason, .. } => {
                assert!(skip_reason.expect("skip reason").contains("timed out"));
            }
            other => panic!("expected a decline, got {other:?}"),
        }
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn bot_chatter_hits_the_consecutive_cap() {
        let backend = ScriptedBackend::new(vec![]);
        let (engine, sink) = engine_with(backend.clone(), 1.0);
        let group = GroupId::new("alpha");
        let now = Utc::now();
        engine.store.with_group(&group, |state| {
            for _ in 0..3 {
                state.bump_consecutive(&engine.cfg, now);
                state.record_message(Instant::now());
            }
        });

        let mut bot_event = event("alpha", "otherbot", "beep boop", false);
        bot_event.sender_is_bot = true;
        let outcome = engine.handle_group_message(bot_event).await;
        assert_eq!(outcome, EngagementOutcome::ConsecutiveCap { count: 3 });
        assert_eq!(backend.calls(), 0);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn human_message_resets_the_counter_before_replying() {
        let backend = ScriptedBackend::new(vec![Ok("still here".to_string())]);
        let (engine, _sink) = engine_with(backend, 1.0);
        let group = GroupId::new("alpha");
        let now = Utc::now();
        engine.store.with_group(&group, |state| {
            for _ in 0..3 {
                state.bump_consecutive(&engine.cfg, now);
                state.record_message(Instant::now());
            }
        });

        let outcome = engine
            .handle_group_message(event("alpha", "ann", "chime, ping", true))
            .await;
        assert!(matches!(outcome, EngagementOutcome::Replied { .. }));
        let status = engine.group_status(&group).expect("status");
        assert_eq!(status.stats.consecutive_replies, 1);
    }

    #[tokio::test]
    async fn delivery_failure_leaves_state_untouched() {
        let backend = ScriptedBackend::new(vec![Ok("hey!".to_string())]);
        let (engine, sink) = engine_with(backend, 1.0);
        sink.fail.store(true, Ordering::SeqCst);
        let group = GroupId::new("alpha");

        engine
            .handle_group_message(event("alpha", "ann", "morning all", false))
            .await;
        let outcome = engine
            .handle_group_message(event("alpha", "ann", "chime, you around?", true))
            .await;
        assert_eq!(outcome, EngagementOutcome::DeliveryFailed);
        let status = engine.group_status(&group).expect("status");
        assert_eq!(status.stats.consecutive_replies, 0);
        assert_eq!(status.stats.fatigue, 0.0);
    }

    #[tokio::test]
    async fn marker_reassembled_by_filtering_is_suppressed() {
        // The raw output hides the marker behind a control character; the
        // outbound filter strips it, reassembling the literal.
        let backend = ScriptedBackend::new(vec![Ok("<NO_RESP\u{7}ONSE>".to_string())]);
        let (engine, sink) = engine_with(backend, 1.0);

        engine
            .handle_group_message(event("alpha", "ann", "morning all", false))
            .await;
        let outcome = engine
            .handle_group_message(event("alpha", "ann", "chime, you around?", true))
            .await;
        match outcome {
            EngagementOutcome::Suppressed { reason } => {
                assert!(reason.contains("decline marker"));
            }
            other => panic!("expected suppression, got {other:?}"),
        }
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn control_character_only_reply_is_suppressed() {
        let backend = ScriptedBackend::new(vec![Ok("\u{7}\u{8}".to_string())]);
        let (engine, sink) = engine_with(backend, 1.0);

        engine
            .handle_group_message(event("alpha", "ann", "morning all", false))
            .await;
        let outcome = engine
            .handle_group_message(event("alpha", "ann", "chime, you around?", true))
            .await;
        assert_eq!(
            outcome,
            EngagementOutcome::Suppressed {
                reason: "empty after outbound filtering".to_string()
            }
        );
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn message_handling_spawns_one_flow_per_group() {
        let backend = ScriptedBackend::new(vec![]);
        let (engine, _sink) = engine_with(backend, 0.0);
        engine
            .handle_group_message(event("alpha", "ann", "one", false))
            .await;
        engine
            .handle_group_message(event("alpha", "ann", "two", false))
            .await;
        engine
            .handle_group_message(event("beta", "bo", "three", false))
            .await;
        assert_eq!(engine.heartbeat.flow_count(), 2);
        engine.shutdown().await.expect("shutdown");
        assert_eq!(engine.heartbeat.flow_count(), 0);
    }

    #[tokio::test]
    async fn cooldown_blocks_proactive_trigger_without_resetting_it() {
        let backend = ScriptedBackend::new(vec![]);
        let (engine, sink) = engine_with(backend.clone(), 0.5);
        let group = GroupId::new("alpha");
        let last = Utc::now() - chrono::Duration::seconds(30);
        engine.store.with_group(&group, |state| {
            state.origin = Some(OriginToken::new("test:alpha"));
            state.focus = crate::state::DecayingValue {
                value: 0.9,
                updated_at: Utc::now(),
            };
            state.last_trigger_at = Some(last);
            for _ in 0..3 {
                state.record_message(Instant::now());
            }
        });

        engine.pipeline.proactive_tick(&group).await;
        assert_eq!(backend.calls(), 0);
        assert!(sink.sent().is_empty());
        let unchanged = engine
            .store
            .read_group(&group, |state| state.last_trigger_at)
            .flatten()
            .expect("last trigger");
        assert_eq!(unchanged, last);
    }

    #[tokio::test]
    async fn proactive_trigger_sends_and_arms_cooldown() {
        let backend = ScriptedBackend::new(vec![Ok("anyone up for trivia?".to_string())]);
        let (engine, sink) = engine_with(backend.clone(), 0.5);
        let group = GroupId::new("alpha");
        engine.store.with_group(&group, |state| {
            state.origin = Some(OriginToken::new("test:alpha"));
            state.focus = crate::state::DecayingValue {
                value: 0.9,
                updated_at: Utc::now(),
            };
            for _ in 0..3 {
                state.record_message(Instant::now());
            }
        });

        engine.pipeline.proactive_tick(&group).await;
        assert_eq!(backend.calls(), 1);
        assert_eq!(
            sink.sent(),
            vec![("test:alpha".to_string(), "anyone up for trivia?".to_string())]
        );
        let status = engine.group_status(&group).expect("status");
        assert_eq!(status.stats.consecutive_replies, 1);
        assert!(status.stats.cooldown_remaining_secs > 0);
        assert!(status.stats.secs_since_last_trigger.is_some());
    }

    #[tokio::test]
    async fn proactive_decline_leaves_no_trace() {
        let backend = ScriptedBackend::new(vec![Ok("<NO_RESPONSE>".to_string())]);
        let (engine, sink) = engine_with(backend.clone(), 0.5);
        let group = GroupId::new("alpha");
        engine.store.with_group(&group, |state| {
            state.origin = Some(OriginToken::new("test:alpha"));
            state.focus = crate::state::DecayingValue {
                value: 0.9,
                updated_at: Utc::now(),
            };
            for _ in 0..3 {
                state.record_message(Instant::now());
            }
        });

        engine.pipeline.proactive_tick(&group).await;
        assert_eq!(backend.calls(), 1);
        assert!(sink.sent().is_empty());
        let last = engine
            .store
            .read_group(&group, |state| state.last_trigger_at)
            .flatten();
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let deps = EngineDeps {
            backend: ScriptedBackend::new(vec![]),
            persona: Arc::new(StaticPersona::none()),
            impressions: Arc::new(FixedImpression(0.5)),
            memories: Arc::new(NullMemories),
            sink,
            filter: Arc::new(PlainTextFilter),
            identity: AgentIdentity::new("chime", vec![]),
        };
        let mut cfg = EngineConfig::default();
        cfg.willingness_threshold = 1.5;
        let err = Engine::new(cfg, Arc::new(StateStore::in_memory()), deps)
            .err()
            .expect("validation error");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
