//! Raya Runtime Code Generation
//!
//! Builds classes, interfaces and enums at runtime, emits method bodies as a
//! sequence of high-level commands, and materializes the result into an
//! executable bytecode module:
//! - **Definitions**: [`Module`], [`TypeBuilder`], [`EnumBuilder`]
//! - **Method bodies**: [`MethodBuilder`] commands over typed [`Variable`]s
//! - **Bytecode**: instruction set, emitter and module format (`bytecode`, `emit`)
//! - **VM**: an interpreter for created modules (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use raya_emit::{Comparison, Interpreter, MethodAttributes, Module, TypeAttributes, TypeRef, Value};
//!
//! let mut module = Module::new("math", None);
//! let calc = module.define_type("Calc", TypeAttributes::public(), None, &[])?;
//! let max = module.ty(calc)?.define_method(
//!     "Max",
//!     MethodAttributes::public().as_static(),
//!     TypeRef::I32,
//!     &[("a", TypeRef::I32), ("b", TypeRef::I32)],
//! )?;
//!
//! let mut body = module.method(max)?;
//! let (a, b) = (body.param(0)?, body.param(1)?);
//! body.if_(&a, Comparison::GreaterThan, &b)?;
//! body.ret(&a)?;
//! body.end_if()?;
//! body.ret(&b)?;
//!
//! let created = module.create()?;
//! let mut vm = Interpreter::new(created);
//! assert_eq!(vm.invoke_static("Calc", "Max", &[3.into(), 7.into()])?, Value::I32(7));
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Bytecode: instruction set, constant pool and module format
pub mod bytecode;

/// Low-level bytecode emitter with labels and exception regions
pub mod emit;

/// Commands recorded by method builders and their coercions
pub mod command;

/// Emit options loaded from TOML
pub mod config;

/// Error types
pub mod error;

/// Method definitions and the method body builder
pub mod method;

/// Module: owner of every definition, materialization into bytecode
pub mod module;

/// Type, field, property and enum definitions
pub mod type_def;

/// Static types, handles and attributes
pub mod types;

/// Variables: locals, parameters, fields, properties and constants
pub mod variable;

/// VM: interpreter for created modules
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{ArithmeticOp, Coercion, Command, EmittedCommand};
pub use config::EmitOptions;
pub use error::{EmitError, EmitResult};
pub use method::{MethodBuilder, MethodDef, ParamDef};
pub use module::Module;
pub use type_def::{EnumBuilder, EnumDef, FieldDef, PropertyDef, TypeBuilder, TypeDef};
pub use types::{
    Comparison, EnumId, FieldAttributes, FieldId, MethodAttributes, MethodId, PropertyId,
    TypeAttributes, TypeId, TypeRef,
};
pub use variable::{ConstValue, Variable};
pub use vm::{Interpreter, Value, VmError, VmResult};

pub use bytecode::ModuleKind;
