//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type SibylResult<T> = Result<T, SibylError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the Sibyl system
#[derive(Error, Debug)]
pub enum SibylError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Component unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Corrupt data: {message}")]
    Corrupt {
        message: String,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl SibylError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SibylError::Config { context, .. } => Some(context),
            SibylError::NotFound { context, .. } => Some(context),
            SibylError::Unavailable { context, .. } => Some(context),
            SibylError::Timeout { context, .. } => Some(context),
            SibylError::Corrupt { context, .. } => Some(context),
            SibylError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SibylError::Timeout { .. } | SibylError::Unavailable { .. }
        )
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            SibylError::Internal { .. } | SibylError::Corrupt { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal error occurred"
                );
            }
            SibylError::Timeout { .. } | SibylError::Unavailable { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Transient error (may be recoverable)"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::SibylError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Valid ranges are listed in the documentation"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::SibylError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the resource id or path")
                .with_suggestion("Check if the resource exists and is accessible"),
        }
    };
}

#[macro_export]
macro_rules! corrupt_error {
    ($msg:expr, $component:expr) => {
        $crate::SibylError::Corrupt {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Re-export the RAGpack from its source"),
        }
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr, $component:expr) => {
        $crate::SibylError::Internal {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_builder() {
        let ctx = ErrorContext::new("bandit")
            .with_operation("choose_params")
            .with_suggestion("reconfigure arms");
        assert_eq!(ctx.component, "bandit");
        assert_eq!(ctx.operation.as_deref(), Some("choose_params"));
        assert_eq!(ctx.recovery_suggestions.len(), 1);
    }

    #[test]
    fn test_recoverable_classification() {
        let timeout = SibylError::Timeout {
            operation: "llm_complete".to_string(),
            duration_ms: 5000,
            context: ErrorContext::new("pipeline"),
        };
        assert!(timeout.is_recoverable());

        let config = config_error!("mmr_lambda out of range", "retriever");
        assert!(!config.is_recoverable());
    }

    #[test]
    fn test_context_accessor() {
        let err = not_found_error!("arm-7", "bandit");
        assert_eq!(err.context().unwrap().component, "bandit");
    }
}
