//! Analysis layer: tool adapters, registry, selection, and aggregation.
//!
//! Adapters are built explicitly (see `crate::config::build_registry`) and
//! handed to a [`ToolRegistry`]. A [`ContextAwareToolSelector`] picks the
//! tools for one request, [`execute_selection`] runs them, and
//! [`ResultAggregator`] folds the results into a summary.

pub mod adapter;
pub mod aggregator;
pub mod direct_adapter;
pub mod errors;
pub mod executor;
pub mod mapping;
pub mod mcp_adapter;
pub mod preferences;
pub mod registry;
pub mod selector;
pub mod types;

pub use adapter::ToolAdapter;
pub use aggregator::{AggregatedResults, ResultAggregator};
pub use direct_adapter::{ContentPattern, PatternAdapter};
pub use errors::AnalysisError;
pub use executor::execute_selection;
pub use mapping::{FindingMapper, JsonFindingMapper};
pub use mcp_adapter::{McpToolAdapter, ToolCallSpec};
pub use preferences::{PreferenceSource, StaticPreferences, ToolPreferences};
pub use registry::ToolRegistry;
pub use selector::{ContextAwareToolSelector, Exclusion, ExclusionStage, PermissionRule, SelectedTools, SelectorConfig};
pub use types::{AnalysisContext, Role, Severity, Tool, ToolFinding, ToolResult, TransportKind};
