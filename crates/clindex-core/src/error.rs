use thiserror::Error;

/// Core error types for clindex operations.
///
/// Configuration-tier errors (everything the search parameter compiler can
/// produce) are deployment-time defects: they surface once, when a schema is
/// compiled, and are never retried per request.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path expression: {0}")]
    ExpressionSyntax(String),

    #[error("Unsupported function in path expression: {0}")]
    UnsupportedFunction(String),

    #[error("Unsupported path expression construct: {0}")]
    UnsupportedExpression(String),

    #[error("No schema element for {type_name}.{property}")]
    UnresolvedPathSegment { type_name: String, property: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new ExpressionSyntax error
    pub fn expression_syntax(message: impl Into<String>) -> Self {
        Self::ExpressionSyntax(message.into())
    }

    /// Create a new UnresolvedPathSegment error
    pub fn unresolved_path_segment(
        type_name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self::UnresolvedPathSegment {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::JsonError(_))
    }

    /// Check if this error is a server error (5xx category)
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::ExpressionSyntax(_)
            | Self::UnsupportedFunction(_)
            | Self::UnsupportedExpression(_) => ErrorCategory::Expression,
            Self::UnresolvedPathSegment { .. } => ErrorCategory::Schema,
            Self::JsonError(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Expression,
    Schema,
    Serialization,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Expression => write!(f, "expression"),
            Self::Schema => write!(f, "schema"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = CoreError::configuration("bad search parameter");
        assert_eq!(err.to_string(), "Configuration error: bad search parameter");
        assert!(err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_unresolved_path_segment_error() {
        let err = CoreError::unresolved_path_segment("Patient", "frobnicate");
        assert_eq!(err.to_string(), "No schema element for Patient.frobnicate");
        assert!(err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Schema);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ nope }").unwrap_err();
        let core_err: CoreError = json_err.into();

        assert!(matches!(core_err, CoreError::JsonError(_)));
        assert!(core_err.is_client_error());
        assert_eq!(core_err.category(), ErrorCategory::Serialization);
    }

    #[test]
    fn test_expression_errors_are_server_class() {
        assert!(CoreError::expression_syntax("dangling dot").is_server_error());
        assert!(CoreError::UnsupportedFunction("aggregate".to_string()).is_server_error());
        assert_eq!(
            CoreError::UnsupportedFunction("aggregate".to_string()).category(),
            ErrorCategory::Expression
        );
    }

    #[test]
    fn test_error_categories_display() {
        assert_eq!(ErrorCategory::Configuration.to_string(), "configuration");
        assert_eq!(ErrorCategory::Expression.to_string(), "expression");
        assert_eq!(ErrorCategory::Schema.to_string(), "schema");
        assert_eq!(ErrorCategory::Serialization.to_string(), "serialization");
    }
}
