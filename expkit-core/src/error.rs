//! Error types for the expkit core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering parameter specs, declarations, static extraction, dispatch, and
//! configuration.

/// Top-level error type for the expkit core library.
#[derive(Debug, thiserror::Error)]
pub enum ExpkitError {
    #[error("Invalid spec: {0}")]
    Spec(#[from] SpecError),

    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parameter or experiment declaration violates name, type, or
/// default/options constraints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    #[error("name '{name}' must be between 1 and 20 characters long")]
    NameLength { name: String },

    #[error("name '{name}' must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    NamePattern { name: String },

    #[error("parameter type '{type_name}' is not supported, expected one of str, int, float, bool")]
    UnsupportedType { type_name: String },

    #[error("value {value} of '{name}' cannot be converted to {target}")]
    Conversion {
        name: String,
        value: String,
        target: String,
    },

    #[error("default {default} of '{name}' is not one of the options [{options}]")]
    DefaultNotInOptions {
        name: String,
        default: String,
        options: String,
    },

    #[error("parameter '{name}' is defined more than once with different settings")]
    DuplicateParam { name: String },
}

/// Errors raised while applying combinators to callables at registration time.
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    #[error("'{combinator}' can only be applied to a function that accepts exactly one argument (got {arity})")]
    BadArity { combinator: String, arity: usize },

    #[error("invalid declaration of '{function}': {reason}")]
    Invalid { function: String, reason: String },

    #[error("experiment with name '{name}' already exists")]
    DuplicateExperiment { name: String },
}

/// Hard failures of a static extraction run. Malformed individual
/// declarations are skipped and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to load the declaration grammar: {message}")]
    Grammar { message: String },

    #[error("failed to parse {path}")]
    Parse { path: String },

    #[error("more than one experiment is defined on '{function}'")]
    MultipleExperiments { function: String },

    #[error("more than one param with the same name '{name}' is defined on '{function}'")]
    DuplicateParam { function: String, name: String },

    #[error("experiment with name '{name}' already exists")]
    DuplicateExperiment { name: String },
}

/// Errors from a single dispatch attempt.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("experiment '{name}' not found")]
    ExperimentNotFound { name: String },

    #[error("required argument '{name}' not provided")]
    MissingRequiredParameter { name: String },

    #[error("invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("experiment '{name}' failed: {source}")]
    EntryFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// A type alias for results using the top-level `ExpkitError`.
pub type Result<T> = std::result::Result<T, ExpkitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_spec() {
        let err = ExpkitError::Spec(SpecError::NameLength {
            name: String::new(),
        });
        assert_eq!(
            err.to_string(),
            "Invalid spec: name '' must be between 1 and 20 characters long"
        );
    }

    #[test]
    fn test_error_display_dispatch() {
        let err = ExpkitError::Dispatch(DispatchError::ExperimentNotFound {
            name: "missing".into(),
        });
        assert_eq!(
            err.to_string(),
            "Dispatch error: experiment 'missing' not found"
        );
    }

    #[test]
    fn test_error_display_extract() {
        let err = ExtractError::MultipleExperiments {
            function: "train".into(),
        };
        assert_eq!(
            err.to_string(),
            "more than one experiment is defined on 'train'"
        );
    }

    #[test]
    fn test_declaration_error_variants() {
        let err = DeclarationError::BadArity {
            combinator: "experiment".into(),
            arity: 2,
        };
        assert_eq!(
            err.to_string(),
            "'experiment' can only be applied to a function that accepts exactly one argument (got 2)"
        );

        let err = DeclarationError::DuplicateExperiment { name: "x".into() };
        assert_eq!(err.to_string(), "experiment with name 'x' already exists");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExpkitError = io_err.into();
        assert!(matches!(err, ExpkitError::Io(_)));
    }

    #[test]
    fn test_error_from_spec() {
        let err: ExpkitError = SpecError::DuplicateParam { name: "lr".into() }.into();
        assert!(matches!(err, ExpkitError::Spec(SpecError::DuplicateParam { .. })));
    }
}
