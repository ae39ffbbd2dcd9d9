//! Error types for the analysis layer (registry and configuration).
//!
//! Tool execution failures never surface as errors; they are carried in
//! `ToolResult::error`. These cover setup mistakes only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Duplicate tool id '{id}'")]
    DuplicateTool { id: String },

    #[error("Invalid configuration for tool '{tool}': {reason}")]
    InvalidToolConfig { tool: String, reason: String },

    #[error("Config file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Failed to parse config {path}: {reason}")]
    ConfigParse { path: String, reason: String },

    #[error("Unknown role '{role}' in {location}")]
    UnknownRole { role: String, location: String },
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateTool { .. } => "DUPLICATE_TOOL",
            Self::InvalidToolConfig { .. } => "INVALID_TOOL_CONFIG",
            Self::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Self::ConfigParse { .. } => "CONFIG_PARSE_ERROR",
            Self::UnknownRole { .. } => "UNKNOWN_ROLE",
        }
    }
}
