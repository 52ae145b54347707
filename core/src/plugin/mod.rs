//! Plugin Manager (C5): subprocess-backed external tool providers.
//!
//! Each provider is a child process speaking newline-delimited JSON-RPC 2.0
//! over stdio. State per provider is `Registered -> Enabled -> Disabled`;
//! enabled providers' tools are namespaced `mcp::<server>::<tool>` so they
//! never collide with registry tool names.

mod session;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::message::ToolResult;

pub use session::{PluginSessionError, PluginToolSpec};
use session::PluginSession;

/// `{command, args, env}` — accepted at provider registration. `env`
/// supplements (does not replace) the inherited process environment.
#[derive(Clone, Debug, Default)]
pub struct PluginConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

enum ProviderState {
    Registered,
    Enabled { session: PluginSession, tools: Vec<PluginToolSpec> },
    Disabled,
}

struct Provider {
    config: PluginConfig,
    state: ProviderState,
}

/// Namespace prefix every plugin-provided tool name carries.
pub const NAMESPACE_PREFIX: &str = "mcp::";

pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}::{}", NAMESPACE_PREFIX, server, tool)
}

/// Splits `mcp::<server>::<tool>` into `(server, tool)`. Returns `None` if
/// the name isn't namespaced or is malformed.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(NAMESPACE_PREFIX)?;
    rest.split_once("::")
}

#[derive(Default)]
pub struct PluginManager {
    providers: Mutex<HashMap<String, Provider>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers configuration for a provider without starting it.
    pub async fn register(&self, name: impl Into<String>, config: PluginConfig) {
        let name = name.into();
        let mut providers = self.providers.lock().await;
        providers.insert(
            name,
            Provider {
                config,
                state: ProviderState::Registered,
            },
        );
    }

    /// Starts the child process, completes the initialize handshake, and
    /// lists its tools. Returns `false` on any failure (spawn, handshake
    /// timeout, malformed `list_tools` response) and guarantees the child is
    /// not left dangling in that case.
    pub async fn enable(&self, name: &str) -> bool {
        let mut providers = self.providers.lock().await;
        let Some(provider) = providers.get_mut(name) else {
            warn!(provider = name, "enable requested for unregistered provider");
            return false;
        };

        match PluginSession::spawn(&provider.config).await {
            Ok(mut session) => match session.list_tools().await {
                Ok(tools) => {
                    info!(provider = name, tool_count = tools.len(), "plugin enabled");
                    provider.state = ProviderState::Enabled { session, tools };
                    true
                }
                Err(e) => {
                    warn!(provider = name, error = %e, "plugin list_tools failed");
                    session.shutdown().await;
                    provider.state = ProviderState::Disabled;
                    false
                }
            },
            Err(e) => {
                warn!(provider = name, error = %e, "plugin failed to start");
                provider.state = ProviderState::Disabled;
                false
            }
        }
    }

    /// Terminates the child process; its tools disappear from the next
    /// turn's catalogue.
    pub async fn disable(&self, name: &str) -> bool {
        let mut providers = self.providers.lock().await;
        let Some(provider) = providers.get_mut(name) else {
            return false;
        };
        if let ProviderState::Enabled { mut session, .. } =
            std::mem::replace(&mut provider.state, ProviderState::Disabled)
        {
            session.shutdown().await;
        }
        true
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        let providers = self.providers.lock().await;
        matches!(
            providers.get(name).map(|p| &p.state),
            Some(ProviderState::Enabled { .. })
        )
    }

    pub async fn provider_names(&self) -> Vec<String> {
        let providers = self.providers.lock().await;
        providers.keys().cloned().collect()
    }

    /// The combined, namespaced tool catalogue across every enabled
    /// provider: `(name, description, parameters_schema)`.
    pub async fn tool_catalogue(&self) -> Vec<(String, String, Value)> {
        let providers = self.providers.lock().await;
        let mut out = Vec::new();
        for (server, provider) in providers.iter() {
            if let ProviderState::Enabled { tools, .. } = &provider.state {
                for tool in tools {
                    out.push((
                        namespaced_tool_name(server, &tool.name),
                        tool.description.clone(),
                        tool.input_schema.clone(),
                    ));
                }
            }
        }
        out
    }

    /// Dispatches a namespaced tool call. Returns a failure `ToolResult` if
    /// the name isn't well-formed, the provider isn't enabled, or the child
    /// raises.
    pub async fn execute(&self, namespaced_name: &str, args: Value) -> ToolResult {
        let Some((server, tool)) = split_namespaced(namespaced_name) else {
            return ToolResult::err(format!("Not a plugin tool name: {}", namespaced_name));
        };

        let mut providers = self.providers.lock().await;
        let Some(provider) = providers.get_mut(server) else {
            return ToolResult::err(format!("Plugin provider '{}' not found", server));
        };

        let ProviderState::Enabled { session, .. } = &mut provider.state else {
            return ToolResult::err(format!("Plugin provider '{}' is not enabled", server));
        };

        match session.call_tool(tool, args).await {
            Ok(text) => ToolResult::ok(text),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_round_trips() {
        let name = namespaced_tool_name("srv", "x");
        assert_eq!(name, "mcp::srv::x");
        assert_eq!(split_namespaced(&name), Some(("srv", "x")));
    }

    #[test]
    fn non_namespaced_name_does_not_split() {
        assert_eq!(split_namespaced("Bash"), None);
    }

    #[tokio::test]
    async fn enabling_an_unregistered_provider_fails() {
        let manager = PluginManager::new();
        assert!(!manager.enable("nope").await);
    }

    #[tokio::test]
    async fn executing_against_a_disabled_provider_is_a_synthetic_failure() {
        let manager = PluginManager::new();
        manager
            .register(
                "srv",
                PluginConfig {
                    command: "true".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let result = manager.execute("mcp::srv::x", Value::Null).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("not enabled"));
    }

    #[tokio::test]
    async fn enable_failure_leaves_no_enabled_state() {
        let manager = PluginManager::new();
        manager
            .register(
                "srv",
                PluginConfig {
                    command: "/no/such/binary".to_string(),
                    ..Default::default()
                },
            )
            .await;
        assert!(!manager.enable("srv").await);
        assert!(!manager.is_enabled("srv").await);
        assert!(manager.tool_catalogue().await.is_empty());
    }
}
