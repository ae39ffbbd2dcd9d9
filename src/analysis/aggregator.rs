//! Combines per-tool results into one summary.
//!
//! Findings and metrics are counted only from successful tools. Failed tools
//! still contribute their timings and keep their errors for diagnostics. The
//! run fails outright only when every invoked tool failed.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{Severity, ToolError, ToolFinding, ToolResult};

/// A finding tagged with the tool that reported it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributedFinding {
    pub tool_id: String,
    #[serde(flatten)]
    pub finding: ToolFinding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFailure {
    pub tool_id: String,
    pub error: ToolError,
}

/// Timing across every invoked tool, failures included.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub per_tool_ms: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResults {
    pub overall_success: bool,
    /// Some tools failed but not all.
    pub degraded: bool,
    pub tools_invoked: usize,
    pub tools_succeeded: usize,
    pub tools_failed: usize,
    pub total_findings: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Metric sums over successful tools, keyed by metric name.
    pub metrics: BTreeMap<String, f64>,
    pub execution: ExecutionStats,
    pub findings: Vec<AttributedFinding>,
    pub errors: Vec<ToolFailure>,
}

pub struct ResultAggregator;

impl ResultAggregator {
    pub fn aggregate(results: &[ToolResult]) -> AggregatedResults {
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut metrics: BTreeMap<String, f64> = BTreeMap::new();
        let mut findings = Vec::new();
        let mut errors = Vec::new();
        let mut per_tool_ms: BTreeMap<String, u64> = BTreeMap::new();

        for result in results {
            *per_tool_ms.entry(result.tool_id.clone()).or_default() += result.execution_time_ms;

            if !result.success {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| ToolError::new("UNKNOWN", "tool failed without an error", false));
                errors.push(ToolFailure {
                    tool_id: result.tool_id.clone(),
                    error,
                });
                continue;
            }

            for finding in &result.findings {
                *by_severity.entry(finding.severity).or_default() += 1;
                findings.push(AttributedFinding {
                    tool_id: result.tool_id.clone(),
                    finding: finding.clone(),
                });
            }
            for (name, value) in &result.metrics {
                *metrics.entry(name.clone()).or_default() += value;
            }
        }

        let tools_invoked = results.len();
        let tools_failed = errors.len();
        let tools_succeeded = tools_invoked - tools_failed;

        let summary = AggregatedResults {
            overall_success: tools_succeeded > 0,
            degraded: tools_succeeded > 0 && tools_failed > 0,
            tools_invoked,
            tools_succeeded,
            tools_failed,
            total_findings: findings.len(),
            by_severity,
            metrics,
            execution: execution_stats(results, per_tool_ms),
            findings,
            errors,
        };

        tracing::info!(
            invoked = summary.tools_invoked,
            failed = summary.tools_failed,
            findings = summary.total_findings,
            overall_success = summary.overall_success,
            "aggregated tool results"
        );
        summary
    }
}

fn execution_stats(results: &[ToolResult], per_tool_ms: BTreeMap<String, u64>) -> ExecutionStats {
    let times: Vec<u64> = results.iter().map(|r| r.execution_time_ms).collect();
    let (Some(&min_ms), Some(&max_ms)) = (times.iter().min(), times.iter().max()) else {
        return ExecutionStats::default();
    };
    let total_ms: u64 = times.iter().sum();
    ExecutionStats {
        total_ms,
        min_ms,
        max_ms,
        mean_ms: total_ms as f64 / times.len() as f64,
        per_tool_ms,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
