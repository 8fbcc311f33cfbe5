use super::Key;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Type '{0}' not found")]
    TypeNotFound(String),

    #[error("Field '{0}' is not declared on type '{1}'")]
    FieldNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Entity {0} is removed")]
    EntityRemoved(Key),

    #[error("Entity {0} not found")]
    EntityNotFound(Key),

    #[error("Entity {0} already exists")]
    EntityExists(Key),

    #[error("Version conflict detected for entity {key}")]
    VersionConflict { key: Key },

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Operation registration error: {0}")]
    OperationRegistration(String),

    #[error("Operation registration scopes closed out of order: {0}")]
    ScopeNesting(String),

    #[error("Key mapping error: {0}")]
    KeyMapping(String),

    #[error("Predicate is too complex: {terms} normalized terms exceed the limit of {limit}")]
    PredicateTooComplex { terms: usize, limit: usize },

    #[error("Unable to translate query '{message}': {source}")]
    Translation {
        message: String,
        #[source]
        source: Box<OrmError>,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl OrmError {
    /// Wraps `self` as the cause of a translation failure.
    pub fn into_translation(self, message: impl Into<String>) -> Self {
        Self::Translation {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost cause for wrapped translation errors.
    pub fn root_cause(&self) -> &OrmError {
        match self {
            Self::Translation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_keeps_inner_error() {
        let err = OrmError::UnsupportedOperation("POWER".into()).into_translation("select");
        assert!(matches!(err.root_cause(), OrmError::UnsupportedOperation(_)));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("POWER"));
    }
}
