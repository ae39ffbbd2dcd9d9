//! The contract every analysis tool implements.

use std::time::Instant;

use async_trait::async_trait;

use super::types::{AnalysisContext, Incompatibility, Tool, ToolError, ToolMetadata, ToolResult};

/// Binds one external analysis tool to the common contract.
///
/// `analyze` never fails: every error lands in the returned `ToolResult`.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Capability record this adapter was registered with.
    fn tool(&self) -> &Tool;

    fn id(&self) -> &str {
        &self.tool().id
    }

    /// First unmet requirement, if any. Pure, no I/O.
    fn compatibility(&self, context: &AnalysisContext) -> Result<(), Incompatibility> {
        self.tool().check_compatibility(context)
    }

    fn can_analyze(&self, context: &AnalysisContext) -> bool {
        self.compatibility(context).is_ok()
    }

    async fn analyze(&self, context: &AnalysisContext) -> ToolResult;

    /// Cheap liveness check.
    async fn health_check(&self) -> bool;

    async fn metadata(&self) -> ToolMetadata {
        ToolMetadata::from_tool(self.tool())
    }

    /// Release every resource; a later `analyze` starts cold.
    async fn cleanup(&self);
}

/// Milliseconds since `start`, saturating.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Failure envelope for a context the tool cannot handle.
pub(crate) fn not_applicable(tool_id: &str, reason: &Incompatibility, start: Instant) -> ToolResult {
    ToolResult::failure(
        tool_id,
        elapsed_ms(start),
        ToolError::new("NOT_APPLICABLE", reason.to_string(), false),
    )
}
