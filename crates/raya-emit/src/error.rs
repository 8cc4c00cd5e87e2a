//! Error types for the code generation builders

use thiserror::Error;

/// Errors raised while defining, emitting or materializing generated code
#[derive(Debug, Error)]
pub enum EmitError {
    /// A required argument was empty or otherwise unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the current builder state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The static types of two operands cannot be reconciled
    #[error("Type mismatch: cannot use {found} where {expected} is expected")]
    TypeMismatch {
        /// Type required by the operation
        expected: String,
        /// Type actually supplied
        found: String,
    },

    /// Members were added to a type after it was materialized
    #[error("Type '{0}' is sealed and cannot be modified")]
    TypeSealed(String),

    /// Definitions were added to a module after it was created
    #[error("Module '{0}' has been created and cannot be modified")]
    ModuleSealed(String),

    /// A member with the same name (or signature) already exists
    #[error("Member '{member}' already exists on '{owner}'")]
    DuplicateMember {
        /// Owning type name
        owner: String,
        /// Member name
        member: String,
    },

    /// A handle or name did not resolve to a definition
    #[error("Unknown {kind} '{name}'")]
    UnknownMember {
        /// Kind of member looked up (type, method, field, ...)
        kind: &'static str,
        /// Name or handle that failed to resolve
        name: String,
    },

    /// A block end marker did not match the innermost open block
    #[error("Unbalanced block: '{marker}' does not close the innermost open block ({open})")]
    UnbalancedBlock {
        /// Marker that was issued
        marker: &'static str,
        /// Description of the innermost open block
        open: String,
    },

    /// A method body still had open blocks when it was finalized
    #[error("Method '{method}' has {count} unclosed block(s), innermost '{innermost}'")]
    UnclosedBlock {
        /// Method name
        method: String,
        /// Number of blocks still open
        count: usize,
        /// Kind of the innermost open block
        innermost: &'static str,
    },

    /// A label was jumped to but never marked
    #[error("Label {label} in '{method}' was never marked")]
    UnmarkedLabel {
        /// Method name
        method: String,
        /// Label id
        label: usize,
    },

    /// A previous command failed and the method body is unusable
    #[error("Method '{0}' was aborted by an earlier error")]
    MethodAborted(String),

    /// A type without any member was materialized
    #[error("Type '{0}' defines no members")]
    EmptyType(String),

    /// A module without definitions was created
    #[error("Module '{0}' defines no types or enums")]
    EmptyModule(String),

    /// An executable module has no entry point
    #[error("Executable module '{0}' has no entry point")]
    MissingEntryPoint(String),

    /// Writing the module to disk failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Emit options could not be loaded
    #[error("Config error: {0}")]
    Config(String),
}

impl EmitError {
    /// Build a type mismatch error from displayable types
    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        EmitError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Build an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        EmitError::InvalidArgument(msg.into())
    }

    /// Build an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        EmitError::InvalidOperation(msg.into())
    }
}

/// Result type for builder operations
pub type EmitResult<T> = Result<T, EmitError>;

/// Reject empty (or whitespace-only) names
pub(crate) fn require_name(what: &str, name: &str) -> EmitResult<()> {
    if name.trim().is_empty() {
        return Err(EmitError::InvalidArgument(format!("{} name must not be empty", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_name() {
        assert!(require_name("type", "Counter").is_ok());
        assert!(matches!(
            require_name("type", "  "),
            Err(EmitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mismatch_message() {
        let err = EmitError::mismatch("int", "string");
        assert_eq!(
            err.to_string(),
            "Type mismatch: cannot use string where int is expected"
        );
    }
}
