//! Inbound loop: every channel adapter feeds one queue, the gateway applies
//! access rules and chat commands, and everything else goes to the engine.

use crate::access;
use crate::config::AppConfig;
use crate::status;
use chime_engine::Engine;
use chime_platform::{GroupEvent, OutboundSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    cfg: AppConfig,
    engine: Arc<Engine>,
    sink: Arc<dyn OutboundSink>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<GroupEvent>>>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        cfg: AppConfig,
        engine: Arc<Engine>,
        sink: Arc<dyn OutboundSink>,
        inbound_rx: mpsc::Receiver<GroupEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            engine,
            sink,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            shutdown,
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
            tracing::info!("gateway loop exited");
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self) {
        loop {
            let event = {
                let mut rx = self.inbound_rx.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    event = rx.recv() => event,
                }
            };
            let Some(event) = event else {
                return;
            };
            self.handle_inbound(event).await;
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn handle_inbound(&self, event: GroupEvent) {
        if !access::is_group_allowed(&self.cfg.access, &event.group_id) {
            tracing::debug!(group = %event.group_id, "group not allowed, dropping message");
            return;
        }

        if is_status_command(&event.content) {
            self.answer_status(&event).await;
            return;
        }

        self.engine.handle_group_message(event).await;
    }

    /// Answers `/status` directly through the sink. The reply pipeline is
    /// bypassed so the query itself leaves fatigue and reply counters alone.
    async fn answer_status(&self, event: &GroupEvent) {
        // Prime the origin and flow so the query works in a group the agent
        // has never replied in.
        self.engine.touch_group(&event.group_id, &event.origin);
        let Some(snapshot) = self.engine.group_status(&event.group_id) else {
            return;
        };
        let report = status::render(&snapshot, self.engine.config());
        if let Err(e) = self.sink.deliver(&event.origin, &report).await {
            tracing::warn!(group = %event.group_id, %e, "status reply failed");
        }
    }
}

fn is_status_command(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed == "/status" || trimmed.starts_with("/status ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessMode;
    use async_trait::async_trait;
    use chime_engine::{
        EngineConfig, EngineDeps, NullImpressions, NullMemories, StateStore, StaticPersona,
    };
    use chime_llm::{Completion, CompletionBackend, CompletionRequest, Usage};
    use chime_platform::{AgentIdentity, GroupId, MessageId, OriginToken, PlainTextFilter, UserId};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> chime_llm::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: "hello".to_string(),
                usage: Usage::default(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn deliver(&self, origin: &OriginToken, text: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .expect("sink lock")
                .push((origin.as_str().to_string(), text.to_string()));
            Ok(())
        }
    }

    fn gateway_with(
        cfg: AppConfig,
    ) -> (
        Gateway,
        Arc<ScriptedBackend>,
        Arc<RecordingSink>,
        mpsc::Sender<GroupEvent>,
    ) {
        let backend = Arc::new(ScriptedBackend::new());
        let sink = Arc::new(RecordingSink::default());
        let deps = EngineDeps {
            backend: backend.clone(),
            persona: Arc::new(StaticPersona::none()),
            impressions: Arc::new(NullImpressions),
            memories: Arc::new(NullMemories),
            sink: sink.clone(),
            filter: Arc::new(PlainTextFilter),
            identity: AgentIdentity::new("chime", vec![]),
        };
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(StateStore::in_memory()),
            deps,
        )
        .expect("engine builds");
        let (tx, rx) = mpsc::channel(8);
        let gateway = Gateway::new(
            cfg,
            Arc::new(engine),
            sink.clone(),
            rx,
            CancellationToken::new(),
        );
        (gateway, backend, sink, tx)
    }

    fn event(group: &str, text: &str) -> GroupEvent {
        GroupEvent {
            group_id: GroupId::new(group),
            sender_id: UserId::new("ana"),
            message_id: MessageId::new("m-1"),
            content: text.to_string(),
            mentions_agent: false,
            sender_is_bot: false,
            origin: OriginToken::new(format!("test:{group}")),
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn disallowed_group_is_dropped_before_the_engine() {
        let mut cfg = AppConfig::default();
        cfg.access.mode = AccessMode::Allowlist;
        cfg.access.allowed_groups = vec!["dev-room".to_string()];
        let (gateway, backend, sink, _tx) = gateway_with(cfg);

        gateway.handle_inbound(event("random", "hello?")).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(sink.sent.lock().expect("sink lock").is_empty());
        // The engine never learned the group exists.
        assert!(gateway.engine.group_status(&GroupId::new("random")).is_none());
    }

    #[tokio::test]
    async fn status_command_replies_without_touching_the_model() {
        let (gateway, backend, sink, _tx) = gateway_with(AppConfig::default());

        gateway.handle_inbound(event("dev-room", "/status")).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        let sent = sink.sent.lock().expect("sink lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "test:dev-room");
        assert!(sent[0].1.starts_with("engagement status for dev-room"));
        assert!(sent[0].1.contains("flow: yes    origin: yes"));
    }

    #[tokio::test]
    async fn status_query_leaves_engagement_state_alone() {
        let (gateway, _backend, _sink, _tx) = gateway_with(AppConfig::default());

        gateway.handle_inbound(event("dev-room", "/status")).await;

        let status = gateway
            .engine
            .group_status(&GroupId::new("dev-room"))
            .expect("group primed");
        assert_eq!(status.stats.messages_last_minute, 0);
        assert_eq!(status.stats.consecutive_replies, 0);
        assert!(status.stats.fatigue.abs() < 1e-9);
    }

    #[tokio::test]
    async fn ordinary_messages_reach_the_engine() {
        let (gateway, _backend, _sink, _tx) = gateway_with(AppConfig::default());

        gateway.handle_inbound(event("dev-room", "quiet day, huh")).await;

        let status = gateway
            .engine
            .group_status(&GroupId::new("dev-room"))
            .expect("group recorded");
        assert_eq!(status.stats.messages_last_minute, 1);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let (gateway, _backend, _sink, tx) = gateway_with(AppConfig::default());
        let shutdown = gateway.shutdown.clone();
        let handle = Arc::new(gateway).start();

        tx.send(event("dev-room", "hello")).await.expect("queued");
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("gateway stops")
            .expect("gateway task exits cleanly");
    }

    #[test]
    fn status_command_requires_exact_prefix() {
        assert!(is_status_command("/status"));
        assert!(is_status_command("  /status  "));
        assert!(is_status_command("/status please"));
        assert!(!is_status_command("/statusful"));
        assert!(!is_status_command("tell me the /status"));
    }
}
