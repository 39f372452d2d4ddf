pub mod agent;
pub mod auth;
pub mod cache;
pub mod config;
pub mod events;
pub mod registry;
pub mod rest;
pub mod rpc;
pub mod stdio;
pub mod tools;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use agent::AgentRuntime;
use cache::ResponseCache;
use config::ServerConfig;
use events::EventBroadcaster;
use registry::Registry;

/// Shared application state passed to every dispatch path and transport.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    /// Tool catalogue — registered once at startup, read-only afterwards.
    pub registry: Arc<Registry>,
    /// TTL response cache for read-only tools.
    pub cache: Arc<ResponseCache>,
    /// Agent runtime. None when no decider backend is configured.
    pub agent: Option<Arc<AgentRuntime>>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub started_at: std::time::Instant,
    /// Shared-secret API key. Every `/mcp`, `/tools`, and `/ws` request
    /// must present this when `require_auth` is on. Empty = auth disabled.
    pub api_key: String,
    /// Set by the `initialize` handshake. `tools/list` and `tools/call`
    /// are rejected until a client has initialized the server.
    pub initialized: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<Registry>,
        agent: Option<Arc<AgentRuntime>>,
        broadcaster: Arc<EventBroadcaster>,
        api_key: String,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(std::time::Duration::from_secs(
            config.cache_ttl_secs,
        )));
        Self {
            config,
            registry,
            cache,
            agent,
            broadcaster,
            started_at: std::time::Instant::now(),
            api_key,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn agent_enabled(&self) -> bool {
        self.agent.is_some()
    }
}
