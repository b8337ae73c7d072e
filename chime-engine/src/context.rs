//! Per-decision context assembly and the lookup seams it draws from.
//!
//! Impression and memory backends are external collaborators. Their
//! failures are consumed here with a neutral fallback so a flaky lookup
//! service can only ever degrade scoring, never break message handling.

use crate::state::HistoryTurn;
use chime_platform::{GroupId, UserId};
use std::sync::Arc;

/// Longer-term read on a user: affinity score in [0, 1] plus a short
/// summary. Neutral when nothing is known.
#[derive(Debug, Clone)]
pub struct Impression {
    pub score: f64,
    pub summary: String,
}

impl Impression {
    pub fn neutral() -> Self {
        Self {
            score: 0.5,
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemorySnippet {
    pub content: String,
}

#[async_trait::async_trait]
pub trait ImpressionSource: Send + Sync {
    async fn get_user_impression(&self, user: &UserId) -> anyhow::Result<Option<Impression>>;
}

#[async_trait::async_trait]
pub trait MemorySource: Send + Sync {
    /// Most-relevant-first snippets for the query, at most `limit`.
    async fn get_relevant_memories(
        &self,
        group: &GroupId,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<MemorySnippet>>;
}

/// Backends that know nothing about anyone.
pub struct NullImpressions;

#[async_trait::async_trait]
impl ImpressionSource for NullImpressions {
    async fn get_user_impression(&self, _user: &UserId) -> anyhow::Result<Option<Impression>> {
        Ok(None)
    }
}

pub struct NullMemories;

#[async_trait::async_trait]
impl MemorySource for NullMemories {
    async fn get_relevant_memories(
        &self,
        _group: &GroupId,
        _query: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<MemorySnippet>> {
        Ok(Vec::new())
    }
}

/// Everything one decision needs to know about the moment, built fresh per
/// message and discarded afterwards.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub impression: Impression,
    pub memories: Vec<MemorySnippet>,
    pub recent_turns: Vec<HistoryTurn>,
    pub activity: f64,
}

pub struct ContextAssembler {
    impressions: Arc<dyn ImpressionSource>,
    memories: Arc<dyn MemorySource>,
    memory_window: usize,
}

impl ContextAssembler {
    pub fn new(
        impressions: Arc<dyn ImpressionSource>,
        memories: Arc<dyn MemorySource>,
        memory_window: usize,
    ) -> Self {
        Self {
            impressions,
            memories,
            memory_window,
        }
    }

    pub async fn assemble(
        &self,
        group: &GroupId,
        sender: &UserId,
        query: &str,
        recent_turns: Vec<HistoryTurn>,
        activity: f64,
    ) -> ChatContext {
        let impression = match self.impressions.get_user_impression(sender).await {
            Ok(Some(impression)) => impression,
            Ok(None) => Impression::neutral(),
            Err(e) => {
                tracing::warn!(%e, sender = %sender, "impression lookup failed, using neutral");
                Impression::neutral()
            }
        };
        let memories = self.fetch_memories(group, query).await;
        ChatContext {
            impression,
            memories,
            recent_turns,
            activity,
        }
    }

    /// Context for a proactive evaluation, where there is no sender to
    /// look up.
    pub async fn assemble_ambient(
        &self,
        group: &GroupId,
        recent_turns: Vec<HistoryTurn>,
        activity: f64,
    ) -> ChatContext {
        let query = recent_turns
            .last()
            .map(|t| t.text.clone())
            .unwrap_or_default();
        let memories = self.fetch_memories(group, &query).await;
        ChatContext {
            impression: Impression::neutral(),
            memories,
            recent_turns,
            activity,
        }
    }

    async fn fetch_memories(&self, group: &GroupId, query: &str) -> Vec<MemorySnippet> {
        match self
            .memories
            .get_relevant_memories(group, query, self.memory_window)
            .await
        {
            Ok(mut memories) => {
                memories.truncate(self.memory_window);
                memories
            }
            Err(e) => {
                tracing::warn!(%e, group = %group, "memory lookup failed, continuing without");
                Vec::new()
            }
        }
    }
}
