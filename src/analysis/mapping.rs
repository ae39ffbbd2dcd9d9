//! Mapping from tool-call content to normalized findings.
//!
//! Adapters plug a [`FindingMapper`] in; [`JsonFindingMapper`] covers tools
//! that print JSON issue lists (flat arrays, `{findings: [...]}` wrappers, and
//! ESLint's per-file `messages` nesting).

use serde_json::Value;

use super::types::{Severity, ToolFinding, ToolFix};
use crate::mcp_client::NormalizedContent;

/// Converts one tool-call result into findings. Must not panic on odd input.
pub trait FindingMapper: Send + Sync {
    fn map(&self, content: &NormalizedContent) -> Vec<ToolFinding>;
}

/// Keys under which tools commonly nest their issue arrays.
const LIST_KEYS: &[&str] = &["findings", "issues", "results", "messages", "vulnerabilities"];

/// Generic JSON mapper.
#[derive(Debug, Clone)]
pub struct JsonFindingMapper {
    default_category: String,
}

impl JsonFindingMapper {
    pub fn new(default_category: &str) -> Self {
        Self {
            default_category: default_category.to_string(),
        }
    }

    fn collect(&self, value: &Value, file: Option<&str>, out: &mut Vec<ToolFinding>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.collect(item, file, out);
                }
            }
            Value::Object(obj) => {
                let own_file = first_str(value, &["file", "path", "filePath", "filename"]);
                let nested = LIST_KEYS
                    .iter()
                    .find_map(|key| obj.get(*key).filter(|v| v.is_array()));

                match nested {
                    Some(list) => self.collect(list, own_file.or(file), out),
                    None => out.extend(self.finding_from(value, file)),
                }
            }
            Value::String(text) if !text.trim().is_empty() => {
                out.push(ToolFinding::new(Severity::Info, &self.default_category, text.trim()));
            }
            _ => {}
        }
    }

    fn finding_from(&self, item: &Value, inherited_file: Option<&str>) -> Option<ToolFinding> {
        let message = first_str(item, &["message", "description", "msg", "text"])?;

        let severity = ["severity", "level"]
            .iter()
            .find_map(|key| item.get(*key).filter(|v| !v.is_null()))
            .map(Severity::from_value)
            .unwrap_or(Severity::Info);

        // Linters without a category carry the rule name there.
        let category = first_str(item, &["category", "ruleId", "rule"])
            .unwrap_or(self.default_category.as_str())
            .to_string();

        let file = first_str(item, &["file", "path", "filePath", "filename"])
            .or(inherited_file)
            .map(str::to_string);

        let fix = item
            .get("fix")
            .or_else(|| item.get("suggestion"))
            .and_then(fix_from);

        Some(ToolFinding {
            severity,
            category,
            message: message.to_string(),
            file,
            line: first_u32(item, &["line", "startLine"]),
            column: first_u32(item, &["column", "startColumn"]),
            rule_id: first_str(item, &["ruleId", "rule", "check_id", "code"]).map(str::to_string),
            fix,
        })
    }
}

impl FindingMapper for JsonFindingMapper {
    fn map(&self, content: &NormalizedContent) -> Vec<ToolFinding> {
        let text = content.text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                let mut findings = Vec::new();
                self.collect(&value, None, &mut findings);
                findings
            }
            // Plain prose output: keep it as a single informational finding.
            Err(_) => vec![ToolFinding::new(Severity::Info, &self.default_category, text)],
        }
    }
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
}

fn first_u32(value: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_u64))
        .and_then(|n| u32::try_from(n).ok())
}

fn fix_from(value: &Value) -> Option<ToolFix> {
    match value {
        Value::String(text) => Some(ToolFix {
            description: text.clone(),
            replacement: None,
        }),
        Value::Object(_) => {
            let replacement = first_str(value, &["replacement", "text"]).map(str::to_string);
            let description = first_str(value, &["description", "message"])
                .map(str::to_string)
                .unwrap_or_else(|| "apply suggested replacement".to_string());
            Some(ToolFix {
                description,
                replacement,
            })
        }
        _ => None,
    }
}
