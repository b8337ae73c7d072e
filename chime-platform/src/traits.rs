use crate::types::{GroupEvent, OriginToken};
use tokio::sync::mpsc;

/// Delivery half of a channel. The engine holds this as a trait object so
/// heartbeat triggers can send without knowing which adapter owns the group.
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, origin: &OriginToken, text: &str) -> anyhow::Result<()>;
}

/// A platform connection. `start` runs until the process shuts down and
/// pushes every inbound group message into `events`.
#[async_trait::async_trait]
pub trait ChannelAdapter: OutboundSink {
    fn adapter_id(&self) -> &str;

    async fn start(&self, events: mpsc::Sender<GroupEvent>) -> anyhow::Result<()>;
}

/// Synchronous outbound text transform applied before delivery.
pub trait OutboundFilter: Send + Sync {
    fn filter(&self, text: &str) -> String;
}

/// Default filter: strips control characters and collapses blank-line runs,
/// leaving normal paragraph structure alone.
#[derive(Debug, Default, Clone)]
pub struct PlainTextFilter;

impl OutboundFilter for PlainTextFilter {
    fn filter(&self, text: &str) -> String {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_control() || *c == '\n')
            .collect();
        let mut out = String::with_capacity(cleaned.len());
        let mut blank_run = 0usize;
        for line in cleaned.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
        out.trim().to_string()
    }
}
