//! Per-method instruction emitter
//!
//! Appends stack-machine instructions to one function body. Provides
//! labels with deferred jump patching and the exception-region primitives
//! used by `Try`/`Catch`/`EndTry`.

use crate::bytecode::{BytecodeWriter, ExceptionHandler, Opcode, TypeTag, ValueKind};
use crate::error::{EmitError, EmitResult};
use rustc_hash::FxHashMap;
use std::fmt;

/// Opaque branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    id: usize,
}

impl Label {
    pub fn id(self) -> usize {
        self.id
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.id)
    }
}

/// Jump whose offset is patched once its label is marked
#[derive(Debug, Clone)]
struct UnresolvedJump {
    /// Position of the i32 offset operand
    offset_position: usize,
    target_label: Label,
}

/// Named local slot (parameters are not listed)
#[derive(Debug, Clone)]
pub struct LocalSlot {
    pub name: String,
    pub slot: u16,
}

/// Open protected region
#[derive(Debug, Clone)]
struct ExceptionRegion {
    try_start: usize,
    /// Set when the first catch clause begins
    try_end: Option<usize>,
    end_label: Label,
    catch_count: usize,
}

/// Output of [`BytecodeEmitter::finish`]
#[derive(Debug, Clone)]
pub struct EmittedBody {
    pub code: Vec<u8>,
    pub local_count: usize,
    pub handlers: Vec<ExceptionHandler>,
}

/// Instruction emitter for a single function body
#[derive(Debug)]
pub struct BytecodeEmitter {
    name: String,
    param_count: usize,
    writer: BytecodeWriter,
    locals: Vec<LocalSlot>,
    next_label_id: usize,
    label_positions: FxHashMap<usize, usize>,
    unresolved_jumps: Vec<UnresolvedJump>,
    handlers: Vec<ExceptionHandler>,
    open_regions: Vec<ExceptionRegion>,
    last_opcode: Option<Opcode>,
    finalized: bool,
}

impl BytecodeEmitter {
    /// Create an emitter; the first `param_count` slots hold the parameters
    pub fn new(name: impl Into<String>, param_count: usize) -> Self {
        Self {
            name: name.into(),
            param_count,
            writer: BytecodeWriter::new(),
            locals: Vec::new(),
            next_label_id: 0,
            label_positions: FxHashMap::default(),
            unresolved_jumps: Vec::new(),
            handlers: Vec::new(),
            open_regions: Vec::new(),
            last_opcode: None,
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current code offset
    pub fn offset(&self) -> usize {
        self.writer.offset()
    }

    /// Bytes emitted so far (jump offsets may still be placeholders)
    pub fn code(&self) -> &[u8] {
        &self.writer.buffer
    }

    pub fn locals(&self) -> &[LocalSlot] {
        &self.locals
    }

    /// Total slots: parameters plus declared locals
    pub fn local_count(&self) -> usize {
        self.param_count + self.locals.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> EmitResult<()> {
        if self.finalized {
            return Err(EmitError::InvalidOperation(format!(
                "Cannot modify finalized emitter for '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn op(&mut self, opcode: Opcode) {
        self.writer.emit_u8(opcode.to_u8());
        self.last_opcode = Some(opcode);
    }

    // ===== Locals =====

    /// Declare a new local slot
    pub fn declare_local(&mut self, name: impl Into<String>) -> EmitResult<u16> {
        self.ensure_open()?;
        let index = self.local_count();
        let slot = u16::try_from(index).map_err(|_| {
            EmitError::InvalidOperation(format!("Too many locals in '{}'", self.name))
        })?;
        self.locals.push(LocalSlot {
            name: name.into(),
            slot,
        });
        Ok(slot)
    }

    pub fn emit_load_local(&mut self, slot: u16) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::LoadLocal);
        self.writer.emit_u16(slot);
        Ok(())
    }

    pub fn emit_store_local(&mut self, slot: u16) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::StoreLocal);
        self.writer.emit_u16(slot);
        Ok(())
    }

    // ===== Constants =====

    pub fn emit_const_null(&mut self) -> EmitResult<()> {
        self.emit(Opcode::ConstNull)
    }

    pub fn emit_const_bool(&mut self, value: bool) -> EmitResult<()> {
        self.emit(if value {
            Opcode::ConstTrue
        } else {
            Opcode::ConstFalse
        })
    }

    pub fn emit_const_i32(&mut self, value: i32) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::ConstI32);
        self.writer.emit_i32(value);
        Ok(())
    }

    pub fn emit_const_i64(&mut self, value: i64) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::ConstI64);
        self.writer.emit_i64(value);
        Ok(())
    }

    pub fn emit_const_f64(&mut self, value: f64) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::ConstF64);
        self.writer.emit_f64(value);
        Ok(())
    }

    /// Push a string from the module constant pool
    pub fn emit_const_str(&mut self, index: u32) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::ConstStr);
        self.writer.emit_u32(index);
        Ok(())
    }

    /// Push the default value of a representation
    pub fn emit_default_value(&mut self, kind: ValueKind) -> EmitResult<()> {
        match kind {
            ValueKind::Reference => self.emit_const_null(),
            ValueKind::Bool => self.emit_const_bool(false),
            ValueKind::I32 => self.emit_const_i32(0),
            ValueKind::I64 => self.emit_const_i64(0),
            ValueKind::F64 => self.emit_const_f64(0.0),
        }
    }

    // ===== Operand-free instructions =====

    /// Emit an instruction without operands
    pub fn emit(&mut self, opcode: Opcode) -> EmitResult<()> {
        self.ensure_open()?;
        if opcode.operand_size() != 0 {
            return Err(EmitError::InvalidArgument(format!(
                "{} requires operands",
                opcode.name()
            )));
        }
        self.op(opcode);
        Ok(())
    }

    pub fn emit_throw(&mut self) -> EmitResult<()> {
        self.emit(Opcode::Throw)
    }

    pub fn emit_return(&mut self) -> EmitResult<()> {
        self.emit(Opcode::Return)
    }

    pub fn emit_return_void(&mut self) -> EmitResult<()> {
        self.emit(Opcode::ReturnVoid)
    }

    // ===== Labels & Jumps =====

    /// Allocate a new label
    pub fn define_label(&mut self) -> Label {
        let label = Label {
            id: self.next_label_id,
        };
        self.next_label_id += 1;
        label
    }

    /// Mark the current position with a label
    pub fn mark_label(&mut self, label: Label) -> EmitResult<()> {
        self.ensure_open()?;
        if self.label_positions.contains_key(&label.id) {
            return Err(EmitError::InvalidOperation(format!(
                "Label {} marked twice in '{}'",
                label, self.name
            )));
        }
        self.label_positions.insert(label.id, self.offset());
        Ok(())
    }

    pub fn is_marked(&self, label: Label) -> bool {
        self.label_positions.contains_key(&label.id)
    }

    /// Emit unconditional jump to label
    pub fn emit_jump(&mut self, label: Label) -> EmitResult<()> {
        self.emit_jump_op(Opcode::Jmp, label)
    }

    /// Emit a compare-and-branch (pops two operands)
    pub fn emit_branch(&mut self, opcode: Opcode, label: Label) -> EmitResult<()> {
        if !opcode.is_branch() {
            return Err(EmitError::InvalidArgument(format!(
                "{} is not a branch opcode",
                opcode.name()
            )));
        }
        self.emit_jump_op(opcode, label)
    }

    fn emit_jump_op(&mut self, opcode: Opcode, label: Label) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(opcode);
        let offset_position = self.offset();
        self.writer.emit_i32(0); // Placeholder, patched in finish()
        self.unresolved_jumps.push(UnresolvedJump {
            offset_position,
            target_label: label,
        });
        Ok(())
    }

    /// Whether execution can reach the current end of the code
    pub fn can_fall_through(&self) -> bool {
        match self.last_opcode {
            None => true,
            Some(op) if !op.is_terminator() => true,
            Some(_) => {
                let end = self.offset();
                self.label_positions.values().any(|&pos| pos == end)
            }
        }
    }

    // ===== Calls & Objects =====

    pub fn emit_call(&mut self, function: u32, argc: u16) -> EmitResult<()> {
        self.emit_call_op(Opcode::Call, function, argc)
    }

    pub fn emit_call_method(&mut self, function: u32, argc: u16) -> EmitResult<()> {
        self.emit_call_op(Opcode::CallMethod, function, argc)
    }

    pub fn emit_call_constructor(&mut self, function: u32, argc: u16) -> EmitResult<()> {
        self.emit_call_op(Opcode::CallConstructor, function, argc)
    }

    fn emit_call_op(&mut self, opcode: Opcode, function: u32, argc: u16) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(opcode);
        self.writer.emit_u32(function);
        self.writer.emit_u16(argc);
        Ok(())
    }

    pub fn emit_new(&mut self, class_id: u32) -> EmitResult<()> {
        self.emit_u32_op(Opcode::New, class_id)
    }

    pub fn emit_load_field(&mut self, field_id: u32) -> EmitResult<()> {
        self.emit_u32_op(Opcode::LoadField, field_id)
    }

    pub fn emit_store_field(&mut self, field_id: u32) -> EmitResult<()> {
        self.emit_u32_op(Opcode::StoreField, field_id)
    }

    pub fn emit_load_static(&mut self, field_id: u32) -> EmitResult<()> {
        self.emit_u32_op(Opcode::LoadStatic, field_id)
    }

    pub fn emit_store_static(&mut self, field_id: u32) -> EmitResult<()> {
        self.emit_u32_op(Opcode::StoreStatic, field_id)
    }

    fn emit_u32_op(&mut self, opcode: Opcode, operand: u32) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(opcode);
        self.writer.emit_u32(operand);
        Ok(())
    }

    // ===== Boxing & Casts =====

    pub fn emit_box(&mut self, kind: ValueKind) -> EmitResult<()> {
        self.emit_kind_op(Opcode::Box, kind)
    }

    pub fn emit_unbox(&mut self, kind: ValueKind) -> EmitResult<()> {
        self.emit_kind_op(Opcode::Unbox, kind)
    }

    fn emit_kind_op(&mut self, opcode: Opcode, kind: ValueKind) -> EmitResult<()> {
        self.ensure_open()?;
        if kind == ValueKind::Reference {
            return Err(EmitError::InvalidArgument(format!(
                "{} requires a value kind",
                opcode.name()
            )));
        }
        self.op(opcode);
        self.writer.emit_u8(kind as u8);
        Ok(())
    }

    pub fn emit_cast(&mut self, target: TypeTag) -> EmitResult<()> {
        self.ensure_open()?;
        self.op(Opcode::Cast);
        target.encode(&mut self.writer);
        Ok(())
    }

    // ===== Exception Regions =====

    /// Open a protected region; returns the label marked by `end_exception_block`
    pub fn begin_exception_block(&mut self) -> EmitResult<Label> {
        self.ensure_open()?;
        let end_label = self.define_label();
        self.open_regions.push(ExceptionRegion {
            try_start: self.offset(),
            try_end: None,
            end_label,
            catch_count: 0,
        });
        Ok(end_label)
    }

    /// Close the protected code (or the previous catch) and start a catch clause
    ///
    /// On entry the thrown object is the only value on the operand stack.
    pub fn begin_catch_block(&mut self, catch_type: TypeTag) -> EmitResult<()> {
        self.ensure_open()?;
        let (end_label, try_start, try_end) = {
            let region = self.open_regions.last().ok_or_else(|| {
                EmitError::InvalidOperation("catch outside of an exception block".to_string())
            })?;
            (region.end_label, region.try_start, region.try_end)
        };

        let try_end = try_end.unwrap_or_else(|| self.offset());
        if self.can_fall_through() {
            self.emit_jump(end_label)?;
        }
        let handler_start = self.offset();

        self.handlers.push(ExceptionHandler {
            try_start: try_start as u32,
            try_end: try_end as u32,
            handler_start: handler_start as u32,
            catch_type,
        });
        if let Some(region) = self.open_regions.last_mut() {
            region.try_end = Some(try_end);
            region.catch_count += 1;
        }
        Ok(())
    }

    /// Close the innermost protected region
    pub fn end_exception_block(&mut self) -> EmitResult<()> {
        self.ensure_open()?;
        let region = self.open_regions.pop().ok_or_else(|| {
            EmitError::InvalidOperation("no open exception block".to_string())
        })?;
        if region.catch_count == 0 {
            self.open_regions.push(region);
            return Err(EmitError::InvalidOperation(
                "exception block has no catch clause".to_string(),
            ));
        }
        if self.can_fall_through() {
            self.emit_jump(region.end_label)?;
        }
        self.mark_label(region.end_label)
    }

    pub fn open_exception_blocks(&self) -> usize {
        self.open_regions.len()
    }

    // ===== Finalization =====

    /// Labels that are jumped to but were never marked
    pub fn unmarked_labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .unresolved_jumps
            .iter()
            .map(|j| j.target_label)
            .filter(|l| !self.label_positions.contains_key(&l.id))
            .collect();
        labels.sort_by_key(|l| l.id);
        labels.dedup();
        labels
    }

    /// Resolve every jump and hand out the finished body
    pub fn finish(&mut self) -> EmitResult<EmittedBody> {
        self.ensure_open()?;

        if !self.open_regions.is_empty() {
            return Err(EmitError::InvalidOperation(format!(
                "'{}' has {} open exception block(s)",
                self.name,
                self.open_regions.len()
            )));
        }
        if let Some(label) = self.unmarked_labels().first() {
            return Err(EmitError::UnmarkedLabel {
                method: self.name.clone(),
                label: label.id,
            });
        }

        for jump in &self.unresolved_jumps {
            let target_offset = self.label_positions[&jump.target_label.id];
            // Relative to the instruction after the jump
            let relative_offset = (target_offset as i32) - ((jump.offset_position + 4) as i32);
            self.writer.patch_i32(jump.offset_position, relative_offset);
        }

        self.finalized = true;
        Ok(EmittedBody {
            code: self.writer.buffer.clone(),
            local_count: self.local_count(),
            handlers: self.handlers.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeReader;

    fn jump_target(code: &[u8], jump_at: usize) -> usize {
        let mut reader = BytecodeReader::new(code);
        reader.seek(jump_at + 1);
        let rel = reader.read_i32().unwrap();
        (reader.position() as i64 + rel as i64) as usize
    }

    #[test]
    fn test_forward_and_backward_jumps() {
        let mut e = BytecodeEmitter::new("loop", 0);
        let start = e.define_label();
        let end = e.define_label();
        e.mark_label(start).unwrap();
        e.emit_const_i32(1).unwrap();
        e.emit_const_i32(2).unwrap();
        let branch_at = e.offset();
        e.emit_branch(Opcode::BrGe, end).unwrap();
        let jump_at = e.offset();
        e.emit_jump(start).unwrap();
        e.mark_label(end).unwrap();
        let end_pos = e.offset();
        e.emit_return_void().unwrap();

        let body = e.finish().unwrap();
        assert_eq!(jump_target(&body.code, branch_at), end_pos);
        assert_eq!(jump_target(&body.code, jump_at), 0);
    }

    #[test]
    fn test_unmarked_label_fails() {
        let mut e = BytecodeEmitter::new("broken", 0);
        let label = e.define_label();
        e.emit_jump(label).unwrap();
        let err = e.finish().unwrap_err();
        assert!(matches!(err, EmitError::UnmarkedLabel { label: 0, .. }));
    }

    #[test]
    fn test_finalized_emitter_rejects_writes() {
        let mut e = BytecodeEmitter::new("done", 0);
        e.emit_return_void().unwrap();
        e.finish().unwrap();
        assert!(e.is_finalized());
        assert!(matches!(
            e.emit_const_i32(1),
            Err(EmitError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_locals_follow_parameters() {
        let mut e = BytecodeEmitter::new("f", 2);
        assert_eq!(e.declare_local("sum").unwrap(), 2);
        assert_eq!(e.declare_local("i").unwrap(), 3);
        assert_eq!(e.local_count(), 4);
    }

    #[test]
    fn test_exception_block_records_handler() {
        let mut e = BytecodeEmitter::new("guarded", 0);
        let _end = e.begin_exception_block().unwrap();
        e.emit_const_null().unwrap();
        e.emit_throw().unwrap();
        let try_end = e.offset();
        e.begin_catch_block(TypeTag::Class(3)).unwrap();
        // throw is a terminator: no leave jump needed before the handler
        assert_eq!(e.offset(), try_end);
        e.emit(Opcode::Pop).unwrap();
        e.end_exception_block().unwrap();
        e.emit_return_void().unwrap();

        let body = e.finish().unwrap();
        assert_eq!(body.handlers.len(), 1);
        let handler = body.handlers[0];
        assert_eq!(handler.try_start, 0);
        assert_eq!(handler.try_end as usize, try_end);
        assert_eq!(handler.handler_start as usize, try_end);
        assert_eq!(handler.catch_type, TypeTag::Class(3));
    }

    #[test]
    fn test_exception_block_requires_catch() {
        let mut e = BytecodeEmitter::new("f", 0);
        e.begin_exception_block().unwrap();
        assert!(e.end_exception_block().is_err());
        assert_eq!(e.open_exception_blocks(), 1);
        assert!(e.begin_catch_block(TypeTag::Object).is_ok());
        assert!(e.end_exception_block().is_ok());
    }

    #[test]
    fn test_fall_through_detection() {
        let mut e = BytecodeEmitter::new("f", 0);
        assert!(e.can_fall_through());
        e.emit_return_void().unwrap();
        assert!(!e.can_fall_through());
        let label = e.define_label();
        e.mark_label(label).unwrap();
        assert!(e.can_fall_through());
    }

    #[test]
    fn test_box_requires_value_kind() {
        let mut e = BytecodeEmitter::new("f", 0);
        assert!(e.emit_box(ValueKind::Reference).is_err());
        assert!(e.emit_box(ValueKind::I32).is_ok());
    }
}
