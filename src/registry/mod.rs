//! Tool registry — the catalogue of callable operations.
//!
//! A tool is a name, a JSON input schema, and an opaque async handler.
//! The registry owns the catalogue exclusively: registration happens at
//! startup, lookups and execution afterwards from every transport
//! concurrently. `execute` validates arguments before the handler runs,
//! applies the per-call timeout, and wraps every handler failure into
//! [`ToolError::Execution`] so callers never see collaborator error types.

pub mod schema;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {detail}")]
    InvalidArguments { tool: String, detail: String },

    #[error("tool '{tool}' failed: {cause}")]
    Execution { tool: String, cause: String },

    #[error("tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

// ─── Descriptor + handler ────────────────────────────────────────────────────

/// A single tool definition, as returned in `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Read-only/idempotent tools are eligible for response caching.
    /// Side-effecting tools (build, install, boot) must leave this false.
    #[serde(skip)]
    pub read_only: bool,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// The capability every tool implementation conforms to. Handlers are
/// opaque: they receive already-validated arguments and may block on
/// external work (process invocation, filesystem, network).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// Blanket impl so plain async closures can be registered in tests and
/// builtins without a named type per tool.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.0)(arguments).await
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

pub struct Registry {
    // BTreeMap keeps list() ordered by name. Writes stop after startup;
    // the RwLock is only contended by concurrent readers.
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    call_timeout: Duration,
}

impl Registry {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            call_timeout,
        }
    }

    /// Register a tool. Fails if the name is already taken — the
    /// catalogue is append-only and names are unique.
    pub async fn register(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        let mut tools = self.tools.write().await;
        if tools.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateTool(descriptor.name));
        }
        debug!(tool = %descriptor.name, read_only = descriptor.read_only, "tool registered");
        tools.insert(
            descriptor.name.clone(),
            RegisteredTool { descriptor, handler },
        );
        Ok(())
    }

    /// Name-ordered snapshot of every descriptor.
    pub async fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.descriptor.clone())
            .collect()
    }

    pub async fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .await
            .get(name)
            .map(|t| t.descriptor.clone())
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Arguments are validated against the input schema before the
    /// handler is invoked — a validation failure means the handler was
    /// never called. The handler runs without the registry lock held,
    /// under the per-call timeout, and is invoked at most once; retries
    /// are the caller's business.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let (schema, handler) = {
            let tools = self.tools.read().await;
            let tool = tools
                .get(name)
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
            (tool.descriptor.input_schema.clone(), tool.handler.clone())
        };

        schema::validate_arguments(&schema, &arguments).map_err(|detail| {
            ToolError::InvalidArguments {
                tool: name.to_string(),
                detail,
            }
        })?;

        debug!(tool = %name, "executing tool");
        match tokio::time::timeout(self.call_timeout, handler.call(arguments)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(tool = %name, err = %e, "tool execution failed");
                Err(ToolError::Execution {
                    tool: name.to_string(),
                    cause: format!("{e:#}"),
                })
            }
            Err(_) => {
                warn!(tool = %name, secs = self.call_timeout.as_secs(), "tool call timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    secs: self.call_timeout.as_secs(),
                })
            }
        }
    }
}
