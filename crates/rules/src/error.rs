//! Error type shared by rule loading, query construction and evaluation.

/// Errors raised while loading, querying or evaluating rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The rule file is not valid YAML or its parameters do not fit the rule type.
    #[error("failed to decode rule '{rule}': {message}")]
    ConfigDecode { rule: String, message: String },

    /// The `type` tag is missing or names no registered rule type.
    #[error("unsupported rule type: '{0}'")]
    UnsupportedRuleType(String),

    /// Two rule files declare the same name.
    #[error("duplicate rule name '{0}'")]
    DuplicateName(String),

    /// Parameters cannot produce a valid query (e.g. a zero timeframe).
    #[error("cannot build query for rule '{rule}': {message}")]
    QueryBuild { rule: String, message: String },

    /// A serialized search body could not be read back into a query.
    #[error("invalid query body: {0}")]
    InvalidQuery(String),

    /// The backend response does not have the expected shape.
    #[error("unexpected response shape: {0}")]
    ResponseParse(String),
}

impl RuleError {
    pub(crate) fn decode(rule: &str, message: impl ToString) -> Self {
        RuleError::ConfigDecode {
            rule: rule.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn query(rule: &str, message: impl ToString) -> Self {
        RuleError::QueryBuild {
            rule: rule.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn parse(message: impl ToString) -> Self {
        RuleError::ResponseParse(message.to_string())
    }
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
