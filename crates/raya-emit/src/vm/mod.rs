//! Interpreter for materialized modules
//!
//! Executes the bytecode produced by [`crate::Module::create`] (or decoded
//! from disk): one recursive frame per call, exception handlers searched
//! per frame and across frames.

pub mod interpreter;
pub mod value;

pub use interpreter::Interpreter;
pub use value::{Object, ObjectRef, Value};

use crate::bytecode::DecodeError;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Member access or call on null
    #[error("Null reference: {0}")]
    NullReference(String),

    /// Operand of the wrong runtime type
    #[error("Type error: {0}")]
    TypeError(String),

    /// Failed `CAST` or `UNBOX`
    #[error("Invalid cast: cannot convert {found} to {target}")]
    InvalidCast {
        /// Runtime type of the value
        found: String,
        /// Requested type
        target: String,
    },

    /// Integer division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Call depth exceeded the configured limit
    #[error("Stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),

    /// Pop from an empty operand stack
    #[error("Stack underflow in '{0}'")]
    StackUnderflow(String),

    /// Unknown class, function, method, field or property
    #[error("Unknown {kind} '{name}'")]
    Unknown {
        /// What was looked up
        kind: &'static str,
        /// Name or id
        name: String,
    },

    /// Wrong number of arguments
    #[error("'{function}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        /// Function name
        function: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },

    /// `NEW` on an abstract class or interface
    #[error("Cannot instantiate abstract type '{0}'")]
    AbstractInstantiation(String),

    /// A thrown object reached the outermost frame
    #[error("Uncaught exception: {0}")]
    UncaughtException(String),

    /// Executable entry point missing
    #[error("Module has no entry point")]
    NoEntryPoint,

    /// Jump outside the function body
    #[error("Invalid jump target {target} in '{function}'")]
    InvalidJump {
        /// Function name
        function: String,
        /// Absolute target offset
        target: i64,
    },

    /// Malformed instruction stream
    #[error("Bytecode error: {0}")]
    Decode(#[from] DecodeError),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
