//! Repository-scoped tool preferences.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Enable/disable lists for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPreferences {
    /// Allow-list. Empty means every tool is allowed.
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl ToolPreferences {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }
}

/// Where the selector looks up preferences. Implementations may hit a store.
#[async_trait]
pub trait PreferenceSource: Send + Sync {
    /// `None` when the repository has no preferences recorded.
    async fn preferences_for(&self, repository: &str) -> Option<ToolPreferences>;
}

/// Preferences fixed at startup, usually from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticPreferences {
    by_repository: HashMap<String, ToolPreferences>,
}

impl StaticPreferences {
    pub fn new(by_repository: HashMap<String, ToolPreferences>) -> Self {
        Self { by_repository }
    }
}

#[async_trait]
impl PreferenceSource for StaticPreferences {
    async fn preferences_for(&self, repository: &str) -> Option<ToolPreferences> {
        self.by_repository.get(repository).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup() {
        let source = StaticPreferences::new(HashMap::from([(
            "acme/web".to_string(),
            ToolPreferences {
                enabled: vec![],
                disabled: vec!["semgrep".into()],
            },
        )]));

        let prefs = source.preferences_for("acme/web").await.unwrap();
        assert_eq!(prefs.disabled, vec!["semgrep"]);
        assert!(source.preferences_for("acme/api").await.is_none());
    }
}
