//! Human-readable instruction listing

use super::constants::ConstantPool;
use super::encoder::{BytecodeReader, DecodeError};
use super::module::{Function, TypeTag, ValueKind};
use super::opcode::Opcode;
use std::fmt::Write;

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode
    pub offset: usize,
    pub opcode: Opcode,
    /// Rendered operands
    pub operands: String,
}

/// Decode every instruction of a function body
pub fn decode_instructions(code: &[u8], constants: &ConstantPool) -> Result<Vec<Instruction>, DecodeError> {
    let mut reader = BytecodeReader::new(code);
    let mut out = Vec::new();

    while !reader.is_at_end() {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        let operands = match opcode {
            Opcode::ConstI32 => reader.read_i32()?.to_string(),
            Opcode::ConstI64 => format!("{}L", reader.read_i64()?),
            Opcode::ConstF64 => format!("{:?}", reader.read_f64()?),
            Opcode::ConstStr => {
                let index = reader.read_u32()?;
                match constants.get_string(index) {
                    Some(s) => format!("#{} {:?}", index, s),
                    None => format!("#{} <missing>", index),
                }
            }
            Opcode::LoadLocal | Opcode::StoreLocal => reader.read_u16()?.to_string(),
            op if op.is_jump() => {
                let rel = reader.read_i32()?;
                let target = reader.position() as i64 + rel as i64;
                format!("-> {:04}", target)
            }
            Opcode::Call | Opcode::CallMethod | Opcode::CallConstructor => {
                let func = reader.read_u32()?;
                let argc = reader.read_u16()?;
                format!("fn#{} argc={}", func, argc)
            }
            Opcode::New => format!("class#{}", reader.read_u32()?),
            Opcode::LoadField | Opcode::StoreField | Opcode::LoadStatic | Opcode::StoreStatic => {
                format!("field#{}", reader.read_u32()?)
            }
            Opcode::Box | Opcode::Unbox => {
                let tag = reader.read_u8()?;
                ValueKind::from_u8(tag)
                    .map(|k| k.name().to_string())
                    .unwrap_or_else(|| format!("?{}", tag))
            }
            Opcode::Cast => match TypeTag::decode(&mut reader)? {
                TypeTag::Object => "object".to_string(),
                TypeTag::Str => "string".to_string(),
                TypeTag::Class(id) => format!("class#{}", id),
            },
            _ => String::new(),
        };

        out.push(Instruction {
            offset,
            opcode,
            operands,
        });
    }

    Ok(out)
}

/// Render a function's code and handler table
pub fn disassemble(function: &Function, constants: &ConstantPool) -> Result<String, DecodeError> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "fn {} (params={}, locals={})",
        function.name, function.param_count, function.local_count
    );
    for instr in decode_instructions(&function.code, constants)? {
        if instr.operands.is_empty() {
            let _ = writeln!(out, "  {:04}  {}", instr.offset, instr.opcode);
        } else {
            let _ = writeln!(out, "  {:04}  {:<16} {}", instr.offset, instr.opcode.name(), instr.operands);
        }
    }
    for handler in &function.handlers {
        let _ = writeln!(
            out,
            "  .try {:04}..{:04} catch {:?} -> {:04}",
            handler.try_start, handler.try_end, handler.catch_type, handler.handler_start
        );
    }
    Ok(out)
}
