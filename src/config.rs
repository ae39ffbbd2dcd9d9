//! Runtime configuration loading.
//!
//! Reads `mcp-tools.yaml`, resolves `${VAR}` / `${VAR:-default}` references,
//! and turns the tool list into an explicitly constructed [`ToolRegistry`].
//! Per-tool API keys belong in each tool's `env` map.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::analysis::direct_adapter::{ContentPattern, PatternAdapter};
use crate::analysis::errors::AnalysisError;
use crate::analysis::mcp_adapter::{McpToolAdapter, ToolCallSpec};
use crate::analysis::preferences::{PreferenceSource, StaticPreferences, ToolPreferences};
use crate::analysis::registry::ToolRegistry;
use crate::analysis::selector::{PermissionRule, SelectorConfig};
use crate::analysis::types::{ExecutionMode, Role, Tool, ToolRequirements, TransportKind};
use crate::mcp_client::types::ClientInfo;
use crate::mcp_client::{ServerConfig, SessionOptions};

/// File name searched for when no path is given.
pub const CONFIG_FILE_NAME: &str = "mcp-tools.yaml";

/// Env var holding an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "MCP_TOOL_RUNTIME_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Default cwd for process tools without their own.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Role name → ordered tool ids.
    #[serde(default)]
    pub role_priorities: HashMap<String, Vec<String>>,
    /// Repository (`owner/name`) → enable/disable lists.
    #[serde(default)]
    pub preferences: HashMap<String, ToolPreferences>,
    #[serde(default = "default_permission_rules")]
    pub permission_rules: Vec<PermissionRule>,
    #[serde(default = "default_promote_fallback_roles")]
    pub promote_fallback_roles: Vec<String>,
    /// Registration order is list order.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// One tool entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    pub roles: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub min_files: usize,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub tags: Vec<String>,

    // process tools
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub calls: Vec<ToolCallSpec>,

    // direct tools
    #[serde(default)]
    pub patterns: Vec<ContentPattern>,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

fn default_init_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_transport() -> TransportKind {
    TransportKind::Process
}

fn default_permission_rules() -> Vec<PermissionRule> {
    SelectorConfig::default().permission_rules
}

fn default_promote_fallback_roles() -> Vec<String> {
    vec![Role::Security.to_string()]
}

// ─── Derived settings ────────────────────────────────────────────────────────

impl RuntimeConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            client_info: ClientInfo {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
            },
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            working_dir: self.working_dir.as_deref().map(expand_tilde),
        }
    }

    pub fn selector_config(&self) -> Result<SelectorConfig, AnalysisError> {
        let mut role_priorities = HashMap::new();
        for (role, order) in &self.role_priorities {
            role_priorities.insert(parse_role(role, "role_priorities")?, order.clone());
        }

        let promote_fallback_roles = self
            .promote_fallback_roles
            .iter()
            .map(|r| parse_role(r, "promote_fallback_roles"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(SelectorConfig {
            role_priorities,
            permission_rules: self.permission_rules.clone(),
            promote_fallback_roles,
            health_check_timeout: Duration::from_millis(self.health_check_timeout_ms),
        })
    }

    /// `None` when no repository has preferences.
    pub fn preference_source(&self) -> Option<Arc<dyn PreferenceSource>> {
        if self.preferences.values().all(ToolPreferences::is_empty) {
            return None;
        }
        Some(Arc::new(StaticPreferences::new(self.preferences.clone())))
    }
}

impl ToolConfig {
    pub fn to_tool(&self) -> Result<Tool, AnalysisError> {
        if self.roles.is_empty() {
            return Err(AnalysisError::InvalidToolConfig {
                tool: self.id.clone(),
                reason: "at least one role is required".into(),
            });
        }
        let location = format!("tool '{}'", self.id);
        let supported_roles = self
            .roles
            .iter()
            .map(|r| parse_role(r, &location))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Tool {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            capabilities: self.capabilities.iter().cloned().collect(),
            requirements: ToolRequirements {
                min_files: self.min_files,
                execution_mode: self.execution_mode,
                timeout_ms: self.timeout_ms,
                requires_auth: self.requires_auth,
                languages: self.languages.clone(),
                file_types: self.file_types.clone(),
            },
            supported_roles,
            transport: self.transport,
            tags: self.tags.iter().cloned().collect(),
        })
    }

    fn server_config(&self) -> Result<ServerConfig, AnalysisError> {
        let command = self
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AnalysisError::InvalidToolConfig {
                tool: self.id.clone(),
                reason: "process tools need a command".into(),
            })?;

        Ok(ServerConfig {
            command: expand_tilde(command),
            args: self.args.clone(),
            env: self.env.clone(),
            cwd: self.cwd.as_deref().map(expand_tilde),
        })
    }
}

fn parse_role(raw: &str, location: &str) -> Result<Role, AnalysisError> {
    raw.parse().map_err(|_| AnalysisError::UnknownRole {
        role: raw.to_string(),
        location: location.to_string(),
    })
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `MCP_TOOL_RUNTIME_CONFIG` first, then searches upward from `start`
/// for `mcp-tools.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, AnalysisError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(AnalysisError::ConfigNotFound {
        path: CONFIG_FILE_NAME.into(),
    })
}

/// Load and parse a config file, interpolating environment variables first.
pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig, AnalysisError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnalysisError::ConfigNotFound {
            path: path.display().to_string(),
        },
        _ => AnalysisError::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
    })?;

    parse_runtime_config(&raw, &path.display().to_string())
}

fn parse_runtime_config(raw: &str, origin: &str) -> Result<RuntimeConfig, AnalysisError> {
    let interpolated = interpolate_env_vars(raw);
    serde_yaml::from_str(&interpolated).map_err(|e| AnalysisError::ConfigParse {
        path: origin.to_string(),
        reason: e.to_string(),
    })
}

/// Build every configured adapter, in list order.
pub fn build_registry(config: &RuntimeConfig) -> Result<ToolRegistry, AnalysisError> {
    let options = config.session_options();
    let mut registry = ToolRegistry::new();

    for entry in &config.tools {
        let tool = entry.to_tool()?;
        match entry.transport {
            TransportKind::Process => {
                let adapter = McpToolAdapter::new(tool, entry.server_config()?, options.clone())
                    .with_calls(entry.calls.clone());
                registry.register(Arc::new(adapter))?;
            }
            TransportKind::Direct => {
                if entry.patterns.is_empty() {
                    tracing::warn!(tool = %entry.id, "direct tool has no patterns and will report nothing");
                }
                registry.register(Arc::new(PatternAdapter::new(tool, entry.patterns.clone())))?;
            }
        }
    }

    tracing::info!(tools = registry.len(), "tool registry built");
    Ok(registry)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            // Unterminated reference: keep it verbatim.
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve `VAR` or `VAR:-default`. Unset without a default becomes empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
