//! Startup and shutdown wiring for `chime serve` and `chime doctor`.

use crate::config::AppConfig;
use crate::gateway::Gateway;
use anyhow::Result;
use chime_engine::{Engine, EngineDeps, NullImpressions, NullMemories, StateStore, StaticPersona};
use chime_llm::{CompletionBackend, LlmClient};
use chime_platform::{
    AgentIdentity, ChannelAdapter, ConsoleAdapter, OutboundSink, PlainTextFilter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INBOUND_BUFFER: usize = 64;

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let state_path = cfg.resolve_state_path();
    if cfg.api_key().is_none() {
        tracing::warn!("no api key configured; model calls will fail until one is set");
    }
    tracing::info!(
        agent = %cfg.agent.name,
        model = %cfg.llm.model,
        base_url = ?cfg.llm.base_url,
        access_mode = ?cfg.access.mode,
        state_path = %state_path.display(),
        willingness_threshold = cfg.engine.willingness_threshold,
        heartbeat_interval_secs = cfg.engine.heartbeat_interval_secs,
        cooldown_secs = cfg.engine.cooldown_secs,
        max_consecutive_replies = cfg.engine.max_consecutive_replies,
        "server configuration loaded"
    );

    if let Some(parent) = state_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(%e, dir = %parent.display(), "could not create state directory");
        }
    }
    let store = Arc::new(StateStore::open(state_path).await);

    let mut client = LlmClient::new(cfg.api_key().unwrap_or_default(), &cfg.llm.model);
    if let Some(base_url) = cfg.llm.base_url.as_deref() {
        client = client.with_base_url(base_url);
    }
    let backend: Arc<dyn CompletionBackend> = Arc::new(client);

    let persona_prompt = (!cfg.persona.prompt.trim().is_empty()).then(|| cfg.persona.prompt.clone());
    let identity = AgentIdentity::new(cfg.agent.name.clone(), cfg.agent.aliases.clone());
    let adapter = Arc::new(ConsoleAdapter::new(identity.clone()));
    let sink: Arc<dyn OutboundSink> = adapter.clone();

    let deps = EngineDeps {
        backend,
        persona: Arc::new(StaticPersona::new(persona_prompt)),
        impressions: Arc::new(NullImpressions),
        memories: Arc::new(NullMemories),
        sink: sink.clone(),
        filter: Arc::new(PlainTextFilter),
        identity,
    };
    let engine = Arc::new(Engine::new(cfg.engine.clone(), store, deps)?);
    engine.start_all_flows();

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let adapter_task = tokio::spawn({
        let adapter = adapter.clone();
        async move {
            if let Err(e) = adapter.start(inbound_tx).await {
                tracing::error!(%e, "console adapter exited");
            }
        }
    });

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let gateway = Arc::new(Gateway::new(
        cfg,
        engine.clone(),
        sink,
        inbound_rx,
        shutdown.clone(),
    ));
    let gateway_handle = gateway.start();

    tracing::info!("chime serving on console");
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }

    shutdown.cancel();
    adapter_task.abort();
    engine.shutdown().await?;
    tracing::info!("engine shutdown completed");
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let state_path = cfg.resolve_state_path();
    let state_path_writable = probe_writable(&state_path).await;
    tracing::info!(
        agent = %cfg.agent.name,
        model = %cfg.llm.model,
        base_url = ?cfg.llm.base_url,
        access_mode = ?cfg.access.mode,
        api_key_present = cfg.api_key().is_some(),
        state_path = %state_path.display(),
        state_path_writable,
        "config ok"
    );
    Ok(())
}

async fn probe_writable(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    if tokio::fs::create_dir_all(parent).await.is_err() {
        return false;
    }
    let probe = parent.join(".chime-doctor");
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            true
        }
        Err(_) => false,
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
