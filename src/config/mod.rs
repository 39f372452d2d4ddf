use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_AGENT_MAX_STEPS: usize = 10;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── AgentConfig ──────────────────────────────────────────────────────────────

/// Agent loop configuration (`[agent]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard step budget per agent session. A session that has not produced
    /// a final answer after this many decide/execute turns is aborted with
    /// its partial trace (default: 10).
    pub max_steps: usize,
    /// Disable the agent runtime entirely, even when an LLM backend is
    /// configured. Default: true (enabled).
    pub enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_AGENT_MAX_STEPS,
            enabled: true,
        }
    }
}

// ─── LlmConfig ────────────────────────────────────────────────────────────────

/// Decider backend configuration (`[llm]` in config.toml).
///
/// Providers speak the OpenAI-compatible `/chat/completions` shape:
/// `ollama` (local, default), `openai`, `deepseek`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// Base URL override. None = provider default
    /// (ollama: http://localhost:11434/v1, openai/deepseek: hosted API).
    pub base_url: Option<String>,
    /// API key. Falls back to OPENAI_API_KEY / DEEPSEEK_API_KEY env vars.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "qwen3-coder:30b".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Resolve the chat-completions base URL for the configured provider.
    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            "deepseek" => "https://api.deepseek.com/v1".to_string(),
            _ => {
                let host = std::env::var("OLLAMA_BASE_URL")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "http://localhost:11434".to_string());
                format!("{}/v1", host.trim_end_matches('/'))
            }
        }
    }

    /// Resolve the API key: explicit config first, then the provider's
    /// conventional env var. Ollama needs none.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.clone().filter(|k| !k.is_empty()) {
            return Some(key);
        }
        let var = match self.provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "deepseek" => "DEEPSEEK_API_KEY",
            _ => return None,
        };
        std::env::var(var).ok().filter(|s| !s.is_empty())
    }
}

// ─── TOML file shape ─────────────────────────────────────────────────────────

/// Raw shape of `{data_dir}/config.toml`. Every field optional — the file
/// is an override layer between built-in defaults and CLI/env flags.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    port: Option<u16>,
    bind_address: Option<String>,
    log: Option<String>,
    log_format: Option<String>,
    api_key: Option<String>,
    require_auth: Option<bool>,
    allowed_origins: Option<Vec<String>>,
    call_timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    agent: Option<AgentConfig>,
    llm: Option<LlmConfig>,
}

fn load_toml(data_dir: &Path) -> Option<ConfigFile> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "config.toml parse error — ignoring file");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), err = %e, "config.toml read error — ignoring file");
            None
        }
    }
}

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Shared-secret API key (MCPD_API_KEY env var or `api_key` in
    /// config.toml). None = fall back to the persisted auth token file.
    pub api_key: Option<String>,
    /// Require the API key on `/mcp`, `/tools`, and the `/ws` upgrade.
    pub require_auth: bool,
    /// CORS allow-list. `["*"]` (default) = any origin.
    pub allowed_origins: Vec<String>,
    /// Per-call tool execution budget in seconds.
    pub call_timeout_secs: u64,
    /// Default TTL for cached read-only tool responses.
    pub cache_ttl_secs: u64,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
}

impl ServerConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("MCPD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("MCPD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let api_key = std::env::var("MCPD_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_key.filter(|s| !s.is_empty()));

        let require_auth = std::env::var("MCPD_REQUIRE_AUTH")
            .ok()
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .or(toml.require_auth)
            .unwrap_or(false);

        let allowed_origins = std::env::var("MCPD_ALLOWED_ORIGINS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .or(toml.allowed_origins)
            .unwrap_or_else(|| vec!["*".to_string()]);

        let call_timeout_secs = std::env::var("MCPD_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(toml.call_timeout_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);

        let cache_ttl_secs = toml.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS);

        let agent = toml.agent.unwrap_or_default();
        let llm = toml.llm.unwrap_or_default();

        Self {
            port,
            bind_address,
            data_dir,
            log,
            log_format,
            api_key,
            require_auth,
            allowed_origins,
            call_timeout_secs,
            cache_ttl_secs,
            agent,
            llm,
        }
    }
}

/// Default data directory: `$MCPD_DATA_DIR`, else `~/.mcpd`.
fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCPD_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".mcpd");
    }
    PathBuf::from(".mcpd")
}
