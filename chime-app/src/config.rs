//! chime configuration loader.

use chime_engine::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Display name the agent posts under and answers to.
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Additional names that count as a mention.
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_agent_name() -> String {
    "chime".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaConfig {
    /// Persona preface prepended to every system prompt. Empty means no
    /// persona and the agent runs on the role preamble alone.
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible endpoint override.
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Open,
    Allowlist,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_access_mode")]
    pub mode: AccessMode,
    /// Group ids the agent may engage in when `mode = "allowlist"`.
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

fn default_access_mode() -> AccessMode {
    AccessMode::Open
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            mode: default_access_mode(),
            allowed_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    /// SQLite file for persisted group state. Unset means
    /// `~/.chime/state.db`.
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Loads config from `path` (or the default location). A missing file
    /// is not an error: the agent runs on built-in defaults.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<AppConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        for key in ["CHIME_OPENAI_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(v) = std::env::var(key) {
                if !v.trim().is_empty() {
                    self.llm.api_key = Some(v);
                    break;
                }
            }
        }
        if let Ok(v) = std::env::var("CHIME_MODEL") {
            if !v.trim().is_empty() {
                self.llm.model = v;
            }
        }
        if let Ok(v) = std::env::var("CHIME_BASE_URL") {
            if !v.trim().is_empty() {
                self.llm.base_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CHIME_STATE_PATH") {
            if !v.trim().is_empty() {
                self.state.path = Some(PathBuf::from(v));
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.agent.name.trim().is_empty() {
            return Err(anyhow::anyhow!("agent.name is required"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        self.engine.validate()?;
        Ok(())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.llm.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn resolve_state_path(&self) -> PathBuf {
        self.state.path.clone().unwrap_or_else(default_state_path)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".chime").join("config.toml")
}

pub fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".chime").join("state.db")
}
