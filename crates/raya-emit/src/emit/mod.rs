//! Instruction emission

pub mod builder;

pub use builder::{BytecodeEmitter, EmittedBody, Label, LocalSlot};

use crate::bytecode::ConstantPool;
use crate::error::EmitResult;

/// Mutable state a command needs while emitting
///
/// Borrows the method's emitter and the module constant pool side by side.
pub struct EmitContext<'a> {
    pub emitter: &'a mut BytecodeEmitter,
    pub constants: &'a mut ConstantPool,
}

impl<'a> EmitContext<'a> {
    pub fn new(emitter: &'a mut BytecodeEmitter, constants: &'a mut ConstantPool) -> Self {
        Self { emitter, constants }
    }

    /// Intern a string and push it
    pub fn emit_str(&mut self, value: &str) -> EmitResult<()> {
        let index = self.constants.add_string(value);
        self.emitter.emit_const_str(index)
    }
}
