use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("Name '{name}' is already registered in namespace {path}")]
    DuplicateRegistration { path: String, name: String },

    #[error(
        "Namespace '{path}' has no attribute '{name}'; methods include: {methods}; namespaces include: {namespaces}"
    )]
    UnknownAttribute {
        path: String,
        name: String,
        methods: String,
        namespaces: String,
    },

    #[error(
        "No factory registered at '{path}'; methods include: {methods}; namespaces include: {namespaces}"
    )]
    NotCallable {
        path: String,
        methods: String,
        namespaces: String,
    },

    #[error("Scope is not active: {0}")]
    ScopeClosed(String),

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Instance is not persisted: {0}")]
    NotPersisted(String),

    #[error("Instance has been deleted: {0}")]
    ObjectDeleted(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Scope body failed ({body}) and cleanup failed ({cleanup})")]
    ScopeFailed {
        body: Box<FactoryError>,
        cleanup: Box<FactoryError>,
    },

    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FactoryError>;

impl<T> From<std::sync::PoisonError<T>> for FactoryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for FactoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl FactoryError {
    /// Shorthand for user factories that want to fail with a plain message.
    pub fn custom(message: impl std::fmt::Display) -> Self {
        Self::Custom(anyhow::anyhow!("{}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message_names_path_and_name() {
        let err = FactoryError::DuplicateRegistration {
            path: "thing".into(),
            name: "foo".into(),
        };
        assert_eq!(
            err.to_string(),
            "Name 'foo' is already registered in namespace thing"
        );
    }

    #[test]
    fn test_custom_is_transparent() {
        let err = FactoryError::custom("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
