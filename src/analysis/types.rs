//! Shared types for the analysis layer.
//!
//! Roles, tool capability records, the analysis context handed in by callers,
//! and the normalized `ToolFinding` / `ToolResult` output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp_client::McpError;

// ─── Roles ──────────────────────────────────────────────────────────────────

/// Agent role an analysis runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Security,
    CodeQuality,
    Architecture,
    Performance,
    Dependency,
    Educational,
    Reporting,
    Orchestrator,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Security,
        Role::CodeQuality,
        Role::Architecture,
        Role::Performance,
        Role::Dependency,
        Role::Educational,
        Role::Reporting,
        Role::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Security => "security",
            Role::CodeQuality => "codeQuality",
            Role::Architecture => "architecture",
            Role::Performance => "performance",
            Role::Dependency => "dependency",
            Role::Educational => "educational",
            Role::Reporting => "reporting",
            Role::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the camelCase wire name as well as `snake_case` / `kebab-case`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().to_lowercase() == folded)
            .ok_or_else(|| format!("unknown role: '{s}'"))
    }
}

// ─── Severity ───────────────────────────────────────────────────────────────

/// Closed severity scale every finding lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Map a tool-native severity name. Unknown names map to `Info`.
    pub fn from_native(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" | "fatal" | "severe" => Severity::Critical,
            "high" | "error" | "major" | "err" => Severity::High,
            "medium" | "moderate" | "warning" | "warn" => Severity::Medium,
            "low" | "minor" | "note" | "hint" => Severity::Low,
            _ => Severity::Info,
        }
    }

    /// Map a JSON severity: a name, or an ESLint-style level (2 error, 1 warning).
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::from_native(s),
            Value::Number(n) => match n.as_u64() {
                Some(2) => Severity::High,
                Some(1) => Severity::Medium,
                _ => Severity::Info,
            },
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Tool Records ───────────────────────────────────────────────────────────

/// How a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Long-lived child process speaking MCP over stdio.
    Process,
    /// Runs inside this process.
    Direct,
}

/// When a tool is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    OnDemand,
    Persistent,
    Batch,
}

/// Preconditions a tool places on a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequirements {
    pub min_files: usize,
    pub execution_mode: ExecutionMode,
    pub timeout_ms: u64,
    pub requires_auth: bool,
    /// Languages the tool understands. Empty means any.
    pub languages: Vec<String>,
    /// File extensions the tool needs in the changed set. Empty means any.
    pub file_types: Vec<String>,
}

impl Default for ToolRequirements {
    fn default() -> Self {
        Self {
            min_files: 0,
            execution_mode: ExecutionMode::OnDemand,
            timeout_ms: 30_000,
            requires_auth: false,
            languages: Vec::new(),
            file_types: Vec::new(),
        }
    }
}

/// Logical capability record of one tool. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub requirements: ToolRequirements,
    pub supported_roles: BTreeSet<Role>,
    pub transport: TransportKind,
    pub tags: BTreeSet<String>,
}

/// Why a tool cannot analyze a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
    UnsupportedRole {
        role: Role,
    },
    UnsupportedLanguage {
        supported: Vec<String>,
        found: Vec<String>,
    },
    MissingFileTypes {
        required: Vec<String>,
    },
    InsufficientFiles {
        required: usize,
        actual: usize,
    },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::UnsupportedRole { role } => {
                write!(f, "unsupported role: tool does not serve '{role}'")
            }
            Incompatibility::UnsupportedLanguage { supported, found } => {
                let found = if found.is_empty() {
                    "none detected".to_string()
                } else {
                    found.join(", ")
                };
                write!(
                    f,
                    "unsupported language: tool supports [{}], repository uses [{found}]",
                    supported.join(", ")
                )
            }
            Incompatibility::MissingFileTypes { required } => write!(
                f,
                "missing required file types: no changed file matches [{}]",
                required.join(", ")
            ),
            Incompatibility::InsufficientFiles { required, actual } => write!(
                f,
                "insufficient file count: requires at least {required} files, found {actual}"
            ),
        }
    }
}

impl Tool {
    /// Check role, language, file-type, and file-count requirements, in that order.
    pub fn check_compatibility(&self, context: &AnalysisContext) -> Result<(), Incompatibility> {
        if !self.supported_roles.contains(&context.agent_role) {
            return Err(Incompatibility::UnsupportedRole {
                role: context.agent_role,
            });
        }

        let req = &self.requirements;

        if !req.languages.is_empty() {
            let found = context.languages();
            let supported = req.languages.iter().any(|lang| {
                found
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(lang))
            });
            if !supported {
                return Err(Incompatibility::UnsupportedLanguage {
                    supported: req.languages.clone(),
                    found: found.into_iter().collect(),
                });
            }
        }

        if !req.file_types.is_empty() {
            let extensions = context.file_extensions();
            let matched = req
                .file_types
                .iter()
                .map(|ft| normalize_extension(ft))
                .any(|ft| extensions.contains(&ft));
            if !matched {
                return Err(Incompatibility::MissingFileTypes {
                    required: req.file_types.clone(),
                });
            }
        }

        let actual = context.pull_request.files.len();
        if actual < req.min_files {
            return Err(Incompatibility::InsufficientFiles {
                required: req.min_files,
                actual,
            });
        }

        Ok(())
    }
}

/// Descriptive metadata reported by `ToolAdapter::metadata`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub capabilities: Vec<String>,
    pub supported_roles: Vec<Role>,
    pub tags: Vec<String>,
    pub requires_auth: bool,
    /// Server-reported name/version, once a session has been established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// MCP tools discovered during the handshake.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub discovered_tools: Vec<String>,
}

impl ToolMetadata {
    pub fn from_tool(tool: &Tool) -> Self {
        Self {
            id: tool.id.clone(),
            name: tool.name.clone(),
            transport: tool.transport,
            capabilities: tool.capabilities.iter().cloned().collect(),
            supported_roles: tool.supported_roles.iter().copied().collect(),
            tags: tool.tags.iter().cloned().collect(),
            requires_auth: tool.requirements.requires_auth,
            server_version: None,
            discovered_tools: Vec::new(),
        }
    }
}

// ─── Analysis Context ───────────────────────────────────────────────────────

/// Repository metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryContext {
    /// `owner/name`; also the key for repository-scoped preferences.
    pub name: String,
    pub primary_language: Option<String>,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    /// Local checkout, when one exists.
    pub path: Option<String>,
}

/// Kind of change to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    #[default]
    Modified,
    Deleted,
    Renamed,
}

/// One changed file in the pull request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    /// Post-change contents, when the caller fetched them.
    pub content: Option<String>,
}

/// Pull request under review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PullRequestContext {
    pub number: Option<u64>,
    pub title: Option<String>,
    pub base_branch: Option<String>,
    pub head_branch: Option<String>,
    pub files: Vec<FileChange>,
}

/// Who asked for the analysis and what they may do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub permissions: Vec<String>,
}

/// Read-only input to selection and analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    pub agent_role: Role,
    #[serde(default)]
    pub repository: RepositoryContext,
    #[serde(default)]
    pub pull_request: PullRequestContext,
    #[serde(default)]
    pub user_context: UserContext,
}

impl AnalysisContext {
    pub fn new(agent_role: Role) -> Self {
        Self {
            agent_role,
            repository: RepositoryContext::default(),
            pull_request: PullRequestContext::default(),
            user_context: UserContext::default(),
        }
    }

    /// Paths of changed files that still exist after the change.
    pub fn file_paths(&self) -> Vec<&str> {
        self.pull_request
            .files
            .iter()
            .filter(|f| f.change_type != ChangeType::Deleted)
            .map(|f| f.path.as_str())
            .collect()
    }

    /// Lowercased extensions of all changed files.
    pub fn file_extensions(&self) -> BTreeSet<String> {
        self.pull_request
            .files
            .iter()
            .filter_map(|f| Path::new(&f.path).extension())
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .collect()
    }

    /// Declared repository languages plus those inferred from file extensions.
    pub fn languages(&self) -> BTreeSet<String> {
        let mut languages: BTreeSet<String> = self
            .repository
            .languages
            .iter()
            .chain(self.repository.primary_language.iter())
            .map(|l| l.to_ascii_lowercase())
            .collect();
        languages.extend(
            self.file_extensions()
                .iter()
                .filter_map(|ext| language_for_extension(ext))
                .map(str::to_string),
        );
        languages
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.user_context.permissions.iter().any(|p| p == permission)
    }
}

fn normalize_extension(file_type: &str) -> String {
    file_type.trim_start_matches('.').to_ascii_lowercase()
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "swift" => "swift",
        _ => return None,
    };
    Some(lang)
}

// ─── Findings & Results ─────────────────────────────────────────────────────

/// Suggested remediation for a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFix {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// One normalized issue reported by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFinding {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<ToolFix>,
}

impl ToolFinding {
    pub fn new(severity: Severity, category: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.to_string(),
            message: message.into(),
            file: None,
            line: None,
            column: None,
            rule_id: None,
            fix: None,
        }
    }

    pub fn at(mut self, file: &str, line: Option<u32>) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self
    }
}

/// Structured failure carried in a `ToolResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl ToolError {
    pub fn new(code: &str, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        }
    }
}

impl From<&McpError> for ToolError {
    fn from(e: &McpError) -> Self {
        Self::new(e.code(), e.to_string(), e.is_recoverable())
    }
}

/// Result envelope of one `analyze` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub tool_id: String,
    pub execution_time_ms: u64,
    pub findings: Vec<ToolFinding>,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub completed_at: DateTime<Utc>,
}

impl ToolResult {
    pub fn success(
        tool_id: &str,
        execution_time_ms: u64,
        findings: Vec<ToolFinding>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            success: true,
            tool_id: tool_id.to_string(),
            execution_time_ms,
            findings,
            metrics,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(tool_id: &str, execution_time_ms: u64, error: ToolError) -> Self {
        Self {
            success: false,
            tool_id: tool_id.to_string(),
            execution_time_ms,
            findings: Vec::new(),
            metrics: BTreeMap::new(),
            error: Some(error),
            completed_at: Utc::now(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
