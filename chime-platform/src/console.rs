use crate::traits::{ChannelAdapter, OutboundSink};
use crate::types::{AgentIdentity, GroupEvent, GroupId, MessageId, OriginToken, UserId};
use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

const DEFAULT_GROUP: &str = "console";
const DEFAULT_SENDER: &str = "operator";

/// Stdin-backed adapter for local runs. Input lines use
/// `group/sender: text`; bare lines land in the `console` group as the
/// `operator` user. Replies print as `[group] text`.
pub struct ConsoleAdapter {
    identity: AgentIdentity,
}

impl ConsoleAdapter {
    pub fn new(identity: AgentIdentity) -> Self {
        Self { identity }
    }
}

/// Splits a console line into (group, sender, content).
fn parse_line(line: &str) -> (String, String, String) {
    if let Some((head, body)) = line.split_once(':') {
        if let Some((group, sender)) = head.split_once('/') {
            let group = group.trim();
            let sender = sender.trim();
            if !group.is_empty() && !sender.is_empty() && !group.contains(' ') {
                return (group.to_string(), sender.to_string(), body.trim().to_string());
            }
        }
    }
    (
        DEFAULT_GROUP.to_string(),
        DEFAULT_SENDER.to_string(),
        line.trim().to_string(),
    )
}

fn origin_for(group: &str) -> OriginToken {
    OriginToken::new(format!("console:{group}"))
}

fn group_from_origin(origin: &OriginToken) -> &str {
    origin
        .as_str()
        .strip_prefix("console:")
        .unwrap_or(origin.as_str())
}

#[async_trait::async_trait]
impl OutboundSink for ConsoleAdapter {
    async fn deliver(&self, origin: &OriginToken, text: &str) -> Result<()> {
        let group = group_from_origin(origin);
        for line in text.lines() {
            println!("[{group}] {line}");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for ConsoleAdapter {
    fn adapter_id(&self) -> &str {
        "console"
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn start(&self, events: mpsc::Sender<GroupEvent>) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (group, sender, content) = parse_line(trimmed);
            let event = GroupEvent {
                group_id: GroupId::new(group.clone()),
                sender_id: UserId::new(sender),
                message_id: MessageId::new(Uuid::new_v4().to_string()),
                mentions_agent: self.identity.mentioned_in(&content),
                sender_is_bot: false,
                origin: origin_for(&group),
                content,
                received_at: Utc::now(),
            };
            if let Err(e) = events.send(event).await {
                tracing::error!(%e, "console inbound queue closed");
                break;
            }
        }
        tracing::info!("console input closed");
        Ok(())
    }
}
