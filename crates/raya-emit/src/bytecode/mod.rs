//! Bytecode definitions
//!
//! The instruction set, constant pool and module format produced by
//! [`crate::Module::create`] and executed by [`crate::vm::Interpreter`].

pub mod constants;
pub mod disasm;
pub mod encoder;
pub mod module;
pub mod opcode;

pub use constants::ConstantPool;
pub use disasm::{decode_instructions, disassemble, Instruction};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use module::{
    flags, function_flags, ClassDef, EnumInfo, ExceptionHandler, FieldInfo, Function, Method,
    Module, ModuleError, ModuleKind, PropertyEntry, TypeTag, ValueKind,
};
pub use opcode::Opcode;
