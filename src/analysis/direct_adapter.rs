//! In-process adapter that scans changed file contents for literal patterns.
//!
//! Needs no child process, so it always reports healthy. The selector treats
//! it as a fallback tool.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::adapter::{elapsed_ms, not_applicable, ToolAdapter};
use super::types::{AnalysisContext, ChangeType, Severity, Tool, ToolFinding, ToolResult};

/// One literal needle and the finding it produces.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentPattern {
    pub needle: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub category: Option<String>,
    /// Defaults to "found '<needle>'".
    #[serde(default)]
    pub message: Option<String>,
}

fn default_severity() -> Severity {
    Severity::Medium
}

pub struct PatternAdapter {
    tool: Tool,
    patterns: Vec<ContentPattern>,
}

impl PatternAdapter {
    pub fn new(tool: Tool, patterns: Vec<ContentPattern>) -> Self {
        Self { tool, patterns }
    }

    fn default_category(&self) -> &str {
        self.tool
            .capabilities
            .iter()
            .next()
            .map(String::as_str)
            .unwrap_or("general")
    }

    fn scan(&self, context: &AnalysisContext) -> (Vec<ToolFinding>, usize) {
        let mut findings = Vec::new();
        let mut scanned = 0usize;

        for file in &context.pull_request.files {
            if file.change_type == ChangeType::Deleted {
                continue;
            }
            let Some(content) = file.content.as_deref() else {
                continue;
            };
            scanned += 1;

            for (idx, line) in content.lines().enumerate() {
                for pattern in &self.patterns {
                    if pattern.needle.is_empty() || !line.contains(&pattern.needle) {
                        continue;
                    }
                    let category = pattern.category.as_deref().unwrap_or(self.default_category());
                    let message = pattern
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("found '{}'", pattern.needle));
                    let line_no = u32::try_from(idx + 1).ok();
                    findings.push(
                        ToolFinding::new(pattern.severity, category, message).at(&file.path, line_no),
                    );
                }
            }
        }
        (findings, scanned)
    }
}

#[async_trait]
impl ToolAdapter for PatternAdapter {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    async fn analyze(&self, context: &AnalysisContext) -> ToolResult {
        let start = Instant::now();
        if let Err(reason) = self.compatibility(context) {
            return not_applicable(&self.tool.id, &reason, start);
        }

        let (findings, scanned) = self.scan(context);
        let metrics = BTreeMap::from([
            ("filesAnalyzed".to_string(), scanned as f64),
            ("findings".to_string(), findings.len() as f64),
        ]);
        ToolResult::success(&self.tool.id, elapsed_ms(start), findings, metrics)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn cleanup(&self) {}
}
