//! Context-aware tool selection.
//!
//! Filters the registry's candidates for a role through capability,
//! preference, permission and liveness checks, ranks the survivors, and splits
//! them into primary and fallback tiers. Every removal is recorded as an
//! [`Exclusion`]. The selector keeps no state between calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use super::adapter::ToolAdapter;
use super::preferences::PreferenceSource;
use super::registry::ToolRegistry;
use super::types::{AnalysisContext, Role, TransportKind};

/// Per-tool bound on a health check.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const HEALTH_CHECK_FAILED: &str = "health check failed";

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tools carrying `tag` need `permission` in the user context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub tag: String,
    pub permission: String,
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Ordered tool ids per role; listed tools rank first.
    pub role_priorities: HashMap<Role, Vec<String>>,
    pub permission_rules: Vec<PermissionRule>,
    /// Roles for which an empty primary tier takes over the fallback tier.
    pub promote_fallback_roles: BTreeSet<Role>,
    pub health_check_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            role_priorities: HashMap::new(),
            permission_rules: vec![PermissionRule {
                tag: "security".into(),
                permission: "security:scan".into(),
            }],
            promote_fallback_roles: BTreeSet::from([Role::Security]),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// Filter stage that removed a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExclusionStage {
    Capability,
    Preference,
    Permission,
    Health,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exclusion {
    pub tool_id: String,
    pub stage: ExclusionStage,
    pub reason: String,
}

/// Result of one selection. Serializes tools by id.
#[derive(Default)]
pub struct SelectedTools {
    pub primary: Vec<Arc<dyn ToolAdapter>>,
    pub fallback: Vec<Arc<dyn ToolAdapter>>,
    pub excluded: Vec<Exclusion>,
}

impl SelectedTools {
    pub fn primary_ids(&self) -> Vec<&str> {
        self.primary.iter().map(|a| a.id()).collect()
    }

    pub fn fallback_ids(&self) -> Vec<&str> {
        self.fallback.iter().map(|a| a.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.fallback.is_empty()
    }
}

impl Serialize for SelectedTools {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Ids<'a> {
            primary: Vec<&'a str>,
            fallback: Vec<&'a str>,
            excluded: &'a [Exclusion],
        }
        Ids {
            primary: self.primary_ids(),
            fallback: self.fallback_ids(),
            excluded: &self.excluded,
        }
        .serialize(serializer)
    }
}

// ─── Selector ────────────────────────────────────────────────────────────────

pub struct ContextAwareToolSelector {
    registry: Arc<ToolRegistry>,
    config: SelectorConfig,
    preferences: Option<Arc<dyn PreferenceSource>>,
}

impl ContextAwareToolSelector {
    pub fn new(registry: Arc<ToolRegistry>, config: SelectorConfig) -> Self {
        Self {
            registry,
            config,
            preferences: None,
        }
    }

    pub fn with_preferences(mut self, source: Arc<dyn PreferenceSource>) -> Self {
        self.preferences = Some(source);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Choose tools for `context.agent_role`.
    pub async fn select_tools(&self, context: &AnalysisContext) -> SelectedTools {
        let role = context.agent_role;
        let mut excluded = Vec::new();

        // 1. Candidates
        let candidates = self.registry.get_tools_for_role(role);
        if candidates.is_empty() {
            tracing::info!(role = %role, "no tools registered for role");
        }

        // 2. Capability
        let mut remaining = Vec::with_capacity(candidates.len());
        for tool in candidates {
            match tool.compatibility(context) {
                Ok(()) => remaining.push(tool),
                Err(reason) => {
                    exclude(&mut excluded, tool.id(), ExclusionStage::Capability, reason.to_string())
                }
            }
        }

        // 3. Preferences
        if let Some(source) = &self.preferences {
            if let Some(prefs) = source.preferences_for(&context.repository.name).await {
                remaining.retain(|tool| {
                    let id = tool.id();
                    let reason = if prefs.disabled.iter().any(|d| d == id) {
                        Some("disabled by repository preferences")
                    } else if !prefs.enabled.is_empty() && !prefs.enabled.iter().any(|e| e == id) {
                        Some("not in repository allow-list")
                    } else {
                        None
                    };
                    match reason {
                        Some(reason) => {
                            exclude(&mut excluded, id, ExclusionStage::Preference, reason.to_string());
                            false
                        }
                        None => true,
                    }
                });
            }
        }

        // 4. Permissions
        remaining.retain(|tool| match self.missing_permission(tool.as_ref(), context) {
            Some(rule) => {
                let reason = format!(
                    "missing permission '{}' required by tag '{}'",
                    rule.permission, rule.tag
                );
                exclude(&mut excluded, tool.id(), ExclusionStage::Permission, reason);
                false
            }
            None => true,
        });

        // 5. Liveness
        let mut healthy = Vec::with_capacity(remaining.len());
        for (tool, verdict) in self.check_health(remaining).await {
            match verdict {
                Ok(()) => healthy.push(tool),
                Err(reason) => exclude(&mut excluded, tool.id(), ExclusionStage::Health, reason),
            }
        }

        // 6. Ranking (stable)
        if let Some(order) = self.config.role_priorities.get(&role) {
            healthy.sort_by_key(|tool| {
                order
                    .iter()
                    .position(|id| id == tool.id())
                    .unwrap_or(usize::MAX)
            });
        }

        // 7. Tiers
        let (mut primary, mut fallback): (Vec<_>, Vec<_>) = healthy
            .into_iter()
            .partition(|tool| tool.tool().transport == TransportKind::Process);

        if primary.is_empty() && !fallback.is_empty() && self.config.promote_fallback_roles.contains(&role) {
            tracing::info!(role = %role, promoted = fallback.len(), "no primary tools, promoting fallback tier");
            primary = std::mem::take(&mut fallback);
        }

        let selected = SelectedTools {
            primary,
            fallback,
            excluded,
        };
        tracing::info!(
            role = %role,
            primary = ?selected.primary_ids(),
            fallback = ?selected.fallback_ids(),
            excluded = selected.excluded.len(),
            "tool selection complete"
        );
        selected
    }

    fn missing_permission(
        &self,
        tool: &dyn ToolAdapter,
        context: &AnalysisContext,
    ) -> Option<&PermissionRule> {
        self.config
            .permission_rules
            .iter()
            .find(|rule| tool.tool().tags.contains(&rule.tag) && !context.has_permission(&rule.permission))
    }

    /// Probe every tool concurrently; results come back in input order.
    async fn check_health(
        &self,
        tools: Vec<Arc<dyn ToolAdapter>>,
    ) -> Vec<(Arc<dyn ToolAdapter>, Result<(), String>)> {
        let timeout = self.config.health_check_timeout;

        let checks: Vec<_> = tools
            .into_iter()
            .map(|tool| {
                let checked = tool.clone();
                let handle =
                    tokio::spawn(async move { tokio::time::timeout(timeout, checked.health_check()).await });
                (tool, handle)
            })
            .collect();

        let mut verdicts = Vec::with_capacity(checks.len());
        for (tool, handle) in checks {
            let verdict = match handle.await {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err(HEALTH_CHECK_FAILED.to_string()),
                Ok(Err(_elapsed)) => Err(format!(
                    "{HEALTH_CHECK_FAILED}: timed out after {}ms",
                    timeout.as_millis()
                )),
                Err(e) => {
                    tracing::warn!(tool = %tool.id(), error = %e, "health check aborted");
                    Err(HEALTH_CHECK_FAILED.to_string())
                }
            };
            verdicts.push((tool, verdict));
        }
        verdicts
    }
}

fn exclude(excluded: &mut Vec<Exclusion>, tool_id: &str, stage: ExclusionStage, reason: String) {
    tracing::debug!(tool = %tool_id, stage = ?stage, reason = %reason, "tool excluded");
    excluded.push(Exclusion {
        tool_id: tool_id.to_string(),
        stage,
        reason,
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────
