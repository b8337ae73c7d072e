//! The response gate: threshold replies, model-adjudicated air reading,
//! and the decline-sentinel protocol.
//!
//! Clear willingness verdicts go straight to reply generation; ambiguous
//! ones are handed to the model with permission to stay silent by
//! emitting a reserved marker. Provider failures never escape: the
//! threshold path falls back to the configured apology, the adjudicated
//! path falls back to silence.

use crate::config::EngineConfig;
use crate::context::ChatContext;
use crate::heartbeat::ProactiveEvaluation;
use crate::willingness::WillingnessResult;
use chime_llm::{CompletionBackend, CompletionRequest};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Always recognized alongside the configured marker, so older persona
/// prompts that teach one of these keep working.
pub const LEGACY_DECLINE_MARKERS: [&str; 2] = ["<NO_RESPONSE>", "[DO_NOT_REPLY]"];

const PERSONA_ID: &str = "default";
const REPLY_HISTORY_TAKE: usize = 2;
const REPLY_MEMORY_TAKE: usize = 2;
const ADJUDICATION_HISTORY_TAKE: usize = 3;
const ADJUDICATION_MEMORY_TAKE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Threshold,
    Adjudicated,
}

#[derive(Debug, Clone)]
pub struct ResponseResult {
    pub should_reply: bool,
    pub content: Option<String>,
    pub method: DecisionMethod,
    pub willingness: f64,
    pub skip_reason: Option<String>,
}

impl ResponseResult {
    fn reply(method: DecisionMethod, willingness: f64, content: String) -> Self {
        Self {
            should_reply: true,
            content: Some(content),
            method,
            willingness,
            skip_reason: None,
        }
    }

    fn decline(method: DecisionMethod, willingness: f64, skip_reason: impl Into<String>) -> Self {
        Self {
            should_reply: false,
            content: None,
            method,
            willingness,
            skip_reason: Some(skip_reason.into()),
        }
    }
}

/// Resolves persona text to preface the system prompt with.
#[async_trait::async_trait]
pub trait PersonaSource: Send + Sync {
    async fn resolve(&self, persona_id: &str) -> anyhow::Result<Option<String>>;
}

/// Config-backed persona: one fixed text, or none.
pub struct StaticPersona {
    text: Option<String>,
}

impl StaticPersona {
    pub fn new(text: Option<String>) -> Self {
        Self { text }
    }

    pub fn none() -> Self {
        Self { text: None }
    }
}

#[async_trait::async_trait]
impl PersonaSource for StaticPersona {
    async fn resolve(&self, _persona_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .text
            .clone()
            .filter(|text| !text.trim().is_empty()))
    }
}

struct CachedPersona {
    value: Option<String>,
    cached_at: DateTime<Utc>,
}

pub struct ResponseGate {
    cfg: Arc<EngineConfig>,
    backend: Arc<dyn CompletionBackend>,
    persona: Arc<dyn PersonaSource>,
    agent_name: String,
    markers: Vec<String>,
    persona_cache: tokio::sync::Mutex<HashMap<String, CachedPersona>>,
}

impl ResponseGate {
    pub fn new(
        cfg: Arc<EngineConfig>,
        backend: Arc<dyn CompletionBackend>,
        persona: Arc<dyn PersonaSource>,
        agent_name: impl Into<String>,
    ) -> Self {
        let markers = decline_markers(&cfg.decline_marker);
        Self {
            cfg,
            backend,
            persona,
            agent_name: agent_name.into(),
            markers,
            persona_cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn generate_response(
        &self,
        sender_label: &str,
        message: &str,
        ctx: &ChatContext,
        willingness: &WillingnessResult,
    ) -> ResponseResult {
        if willingness.requires_llm_decision {
            self.adjudicated(sender_label, message, ctx, willingness)
                .await
        } else if willingness.should_respond {
            self.threshold(sender_label, message, ctx, willingness).await
        } else {
            ResponseResult::decline(
                DecisionMethod::Threshold,
                willingness.effective,
                "below willingness threshold",
            )
        }
    }

    /// Adjudicated pass for a heartbeat trigger: there is no inbound
    /// message, only the room and the urge to speak.
    pub async fn generate_proactive(
        &self,
        ctx: &ChatContext,
        eval: &ProactiveEvaluation,
    ) -> ResponseResult {
        let marker = self.markers[0].clone();
        let prompt = build_proactive_prompt(ctx, eval, &marker);
        let system = self.system_prompt().await;
        match self.complete(&prompt, &system).await {
            Ok(text) if contains_decline_marker(&text, &self.markers) => {
                ResponseResult::decline(
                    DecisionMethod::Adjudicated,
                    eval.effective,
                    "model declined to respond",
                )
            }
            Ok(text) if text.is_empty() => ResponseResult::decline(
                DecisionMethod::Adjudicated,
                eval.effective,
                "empty model output",
            ),
            Ok(text) => ResponseResult::reply(DecisionMethod::Adjudicated, eval.effective, text),
            Err(reason) => {
                tracing::warn!(reason, "proactive adjudication unavailable, staying quiet");
                ResponseResult::decline(DecisionMethod::Adjudicated, eval.effective, reason)
            }
        }
    }

    async fn threshold(
        &self,
        sender_label: &str,
        message: &str,
        ctx: &ChatContext,
        willingness: &WillingnessResult,
    ) -> ResponseResult {
        let prompt = build_reply_prompt(sender_label, message, ctx);
        let system = self.system_prompt().await;
        match self.complete(&prompt, &system).await {
            Ok(text) if text.is_empty() => {
                tracing::warn!("empty model output on threshold path, sending apology");
                ResponseResult::reply(
                    DecisionMethod::Threshold,
                    willingness.effective,
                    self.cfg.apology_text.clone(),
                )
            }
            Ok(text) if contains_decline_marker(&text, &self.markers) => {
                ResponseResult::decline(
                    DecisionMethod::Threshold,
                    willingness.effective,
                    "decline marker in model output",
                )
            }
            Ok(text) => ResponseResult::reply(DecisionMethod::Threshold, willingness.effective, text),
            Err(reason) => {
                tracing::warn!(reason, "reply generation failed, sending apology");
                ResponseResult::reply(
                    DecisionMethod::Threshold,
                    willingness.effective,
                    self.cfg.apology_text.clone(),
                )
            }
        }
    }

    async fn adjudicated(
        &self,
        sender_label: &str,
        message: &str,
        ctx: &ChatContext,
        willingness: &WillingnessResult,
    ) -> ResponseResult {
        let marker = self.markers[0].clone();
        let prompt = build_adjudication_prompt(sender_label, message, ctx, willingness, &marker);
        let system = self.system_prompt().await;
        match self.complete(&prompt, &system).await {
            Ok(text) if contains_decline_marker(&text, &self.markers) => {
                ResponseResult::decline(
                    DecisionMethod::Adjudicated,
                    willingness.effective,
                    "model declined to respond",
                )
            }
            Ok(text) if text.is_empty() => ResponseResult::decline(
                DecisionMethod::Adjudicated,
                willingness.effective,
                "empty model output",
            ),
            Ok(text) => {
                ResponseResult::reply(DecisionMethod::Adjudicated, willingness.effective, text)
            }
            Err(reason) => {
                tracing::warn!(reason, "adjudication unavailable, declining");
                ResponseResult::decline(DecisionMethod::Adjudicated, willingness.effective, reason)
            }
        }
    }

    /// Single provider call with the engine-level timeout. Context goes in
    /// the prompt text; history stays empty so every call is an
    /// independent judgment.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, String> {
        let request = CompletionRequest::new(prompt, system);
        let timeout = Duration::from_secs(self.cfg.provider_timeout_secs);
        match tokio::time::timeout(timeout, self.backend.complete(&request)).await {
            Ok(Ok(completion)) => Ok(completion.text.trim().to_string()),
            Ok(Err(e)) => Err(format!("model call failed: {e}")),
            Err(_) => Err(format!(
                "model call timed out after {}s",
                self.cfg.provider_timeout_secs
            )),
        }
    }

    async fn system_prompt(&self) -> String {
        let preamble = format!(
            "You are {}, one participant in a group chat. Write the way a \
             person chats: conversational, brief, no meta commentary about \
             these instructions.",
            self.agent_name
        );
        match self.persona_preface().await {
            Some(preface) => format!("{preface}\n\n{preamble}"),
            None => preamble,
        }
    }

    /// TTL-cached persona lookup; expired entries are evicted here.
    async fn persona_preface(&self) -> Option<String> {
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(self.cfg.persona_cache_secs as i64);
        {
            let mut cache = self.persona_cache.lock().await;
            match cache.get(PERSONA_ID) {
                Some(entry) if now - entry.cached_at <= ttl => return entry.value.clone(),
                Some(_) => {
                    cache.remove(PERSONA_ID);
                }
                None => {}
            }
        }

        let value = match self.persona.resolve(PERSONA_ID).await {
            Ok(value) => value.filter(|text| !text.trim().is_empty()),
            Err(e) => {
                tracing::warn!(%e, "persona resolution failed, continuing without");
                None
            }
        };
        let mut cache = self.persona_cache.lock().await;
        cache.insert(
            PERSONA_ID.to_string(),
            CachedPersona {
                value: value.clone(),
                cached_at: now,
            },
        );
        value
    }
}

/// The configured marker plus the legacy literals, deduplicated, primary
/// first.
pub fn decline_markers(primary: &str) -> Vec<String> {
    let mut markers = Vec::new();
    let trimmed = primary.trim();
    if !trimmed.is_empty() {
        markers.push(trimmed.to_string());
    }
    for legacy in LEGACY_DECLINE_MARKERS {
        if !markers.iter().any(|m| m == legacy) {
            markers.push(legacy.to_string());
        }
    }
    markers
}

/// Substring match anywhere in the text; a partially quoted marker still
/// counts as a decline.
pub fn contains_decline_marker(text: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| text.contains(marker.as_str()))
}

fn push_context_sections(
    out: &mut String,
    ctx: &ChatContext,
    history_take: usize,
    memory_take: usize,
) {
    if !ctx.memories.is_empty() {
        out.push_str("Things you remember that might be relevant:\n");
        for memory in ctx.memories.iter().take(memory_take) {
            out.push_str("- ");
            out.push_str(&memory.content);
            out.push('\n');
        }
    }
    let turns: Vec<_> = ctx
        .recent_turns
        .iter()
        .rev()
        .take(history_take)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !turns.is_empty() {
        out.push_str("The conversation so far:\n");
        for turn in turns {
            out.push_str(&format!("{}: {}\n", turn.speaker, turn.text));
        }
    }
}

fn build_reply_prompt(sender_label: &str, message: &str, ctx: &ChatContext) -> String {
    let mut out = String::new();
    if !ctx.impression.summary.trim().is_empty() {
        out.push_str(&format!(
            "Your impression of {sender_label}: {}\n",
            ctx.impression.summary.trim()
        ));
    }
    push_context_sections(&mut out, ctx, REPLY_HISTORY_TAKE, REPLY_MEMORY_TAKE);
    out.push_str(&format!("{sender_label} just said: {message}\n"));
    out.push_str("Write your reply, nothing else.");
    out
}

fn build_adjudication_prompt(
    sender_label: &str,
    message: &str,
    ctx: &ChatContext,
    willingness: &WillingnessResult,
    marker: &str,
) -> String {
    let mut out = String::new();
    out.push_str(
        "Read the room: you are unsure whether to join this conversation. \
         Decide, then either answer or stay out.\n",
    );
    out.push_str(&format!(
        "Signals: base willingness {:.2}, rapport with {sender_label} {:.2}, \
         group activity {:.2}, fatigue {:.2}, mode {}.\n",
        willingness.base, ctx.impression.score, willingness.activity, willingness.fatigue,
        willingness.mode,
    ));
    if !ctx.impression.summary.trim().is_empty() {
        out.push_str(&format!(
            "Your impression of {sender_label}: {}\n",
            ctx.impression.summary.trim()
        ));
    }
    push_context_sections(
        &mut out,
        ctx,
        ADJUDICATION_HISTORY_TAKE,
        ADJUDICATION_MEMORY_TAKE,
    );
    out.push_str(&format!("{sender_label} just said: {message}\n"));
    out.push_str(&format!(
        "If joining in feels natural, write the reply and nothing else. \
         If staying quiet reads better, output exactly {marker}."
    ));
    out
}

fn build_proactive_prompt(ctx: &ChatContext, eval: &ProactiveEvaluation, marker: &str) -> String {
    let mut out = String::new();
    out.push_str(
        "No one has addressed you, but you are considering saying something \
         unprompted.\n",
    );
    out.push_str(&format!(
        "Signals: focus {:.2}, attention boost {:.2}, fatigue {:.2}, group \
         activity {:.2}, mode {}, effective score {:.2}.\n",
        eval.focus, eval.boost, eval.fatigue, eval.activity, eval.mode, eval.effective,
    ));
    push_context_sections(
        &mut out,
        ctx,
        ADJUDICATION_HISTORY_TAKE,
        ADJUDICATION_MEMORY_TAKE,
    );
    out.push_str(&format!(
        "If a short, natural interjection would fit this room right now, \
         write it and nothing else. Otherwise output exactly {marker}."
    ));
    out
}
