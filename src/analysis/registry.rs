//! Tool registry: the set of adapters available to the selector.
//!
//! Filled once at startup, read concurrently afterwards. Registration order
//! is preserved and is the tie-break order for ranking.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use super::adapter::ToolAdapter;
use super::errors::AnalysisError;
use super::types::Role;

// ─── ToolRegistry ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ToolRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    /// `tool id → index into adapters`.
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an adapter. Ids must be unique.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) -> Result<(), AnalysisError> {
        let id = adapter.id().to_string();
        if self.index.contains_key(&id) {
            return Err(AnalysisError::DuplicateTool { id });
        }
        tracing::debug!(tool = %id, transport = ?adapter.tool().transport, "registered tool");
        self.index.insert(id, self.adapters.len());
        self.adapters.push(adapter);
        Ok(())
    }

    /// Tools declaring `role`, in registration order.
    pub fn get_tools_for_role(&self, role: Role) -> Vec<Arc<dyn ToolAdapter>> {
        self.adapters
            .iter()
            .filter(|a| a.tool().supported_roles.contains(&role))
            .cloned()
            .collect()
    }

    pub fn get_all_tools(&self) -> Vec<Arc<dyn ToolAdapter>> {
        self.adapters.clone()
    }

    pub fn get_tools_by_capability(&self, capability: &str) -> Vec<Arc<dyn ToolAdapter>> {
        self.adapters
            .iter()
            .filter(|a| a.tool().capabilities.contains(capability))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.index.get(id).map(|&i| self.adapters[i].clone())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Release every adapter's resources concurrently.
    pub async fn cleanup_all(&self) {
        join_all(self.adapters.iter().map(|a| a.cleanup())).await;
        tracing::info!(tools = self.adapters.len(), "all tools cleaned up");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::direct_adapter::PatternAdapter;
    use crate::analysis::types::{Tool, ToolRequirements, TransportKind};
    use std::collections::BTreeSet;

    fn adapter(id: &str, roles: &[Role], capabilities: &[&str]) -> Arc<dyn ToolAdapter> {
        Arc::new(PatternAdapter::new(
            Tool {
                id: id.into(),
                name: id.into(),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                requirements: ToolRequirements::default(),
                supported_roles: roles.iter().copied().collect(),
                transport: TransportKind::Direct,
                tags: BTreeSet::new(),
            },
            Vec::new(),
        ))
    }

    fn ids(adapters: &[Arc<dyn ToolAdapter>]) -> Vec<&str> {
        adapters.iter().map(|a| a.id()).collect()
    }

    #[test]
    fn test_lookup_by_role_and_capability_keeps_order() {
        let mut registry = ToolRegistry::new();
        registry.register(adapter("semgrep", &[Role::Security], &["sast"])).unwrap();
        registry
            .register(adapter("eslint", &[Role::CodeQuality, Role::Security], &["linting"]))
            .unwrap();
        registry.register(adapter("gitleaks", &[Role::Security], &["sast", "secrets"])).unwrap();

        assert_eq!(
            ids(&registry.get_tools_for_role(Role::Security)),
            vec!["semgrep", "eslint", "gitleaks"]
        );
        assert_eq!(ids(&registry.get_tools_for_role(Role::CodeQuality)), vec!["eslint"]);
        assert_eq!(ids(&registry.get_tools_by_capability("sast")), vec!["semgrep", "gitleaks"]);
        assert!(registry.get_tools_for_role(Role::Reporting).is_empty());
        assert_eq!(registry.get("eslint").map(|a| a.id().to_string()).as_deref(), Some("eslint"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(adapter("eslint", &[Role::CodeQuality], &[])).unwrap();
        let err = registry
            .register(adapter("eslint", &[Role::Security], &[]))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateTool { ref id } if id == "eslint"));
        assert_eq!(registry.len(), 1);
    }
}
