//! Instruction set targeted by the emitter
//!
//! All opcodes are single bytes. Operands follow the opcode byte in
//! little-endian order.
//!
//! Opcodes are grouped by range:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Local variables (parameters occupy the first slots)
//! - 0x20-0x3F: Typed arithmetic (i32, i64, f64)
//! - 0x40-0x4F: Numeric widening
//! - 0x80-0x8F: String operations
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Calls and returns
//! - 0xB0-0xBF: Object operations
//! - 0xE0-0xEF: Boxing and casts
//! - 0xF8-0xFF: Exceptions

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x08,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,
    /// Push 64-bit integer constant (operand: i64)
    ConstI64 = 0x0B,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 slot)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 slot)
    StoreLocal = 0x11,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    Iadd = 0x20,
    Isub = 0x21,
    Imul = 0x22,
    Idiv = 0x23,
    Imod = 0x24,
    Ladd = 0x28,
    Lsub = 0x29,
    Lmul = 0x2A,
    Ldiv = 0x2B,
    Lmod = 0x2C,

    // ===== Float Arithmetic (0x30-0x3F) =====
    Fadd = 0x30,
    Fsub = 0x31,
    Fmul = 0x32,
    Fdiv = 0x33,
    Fmod = 0x34,

    // ===== Widening (0x40-0x4F) =====
    /// i32 -> i64
    I2L = 0x40,
    /// i32 -> f64
    I2F = 0x41,
    /// i64 -> f64
    L2F = 0x42,

    // ===== Strings (0x80-0x8F) =====
    /// Concatenate two strings
    Sconcat = 0x80,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 offset)
    Jmp = 0x90,
    /// Pop b, pop a, jump if a == b (operand: i32 offset)
    BrEq = 0x94,
    /// Pop b, pop a, jump if a != b (operand: i32 offset)
    BrNe = 0x95,
    /// Pop b, pop a, jump if a < b (operand: i32 offset)
    BrLt = 0x96,
    /// Pop b, pop a, jump if a <= b (operand: i32 offset)
    BrLe = 0x97,
    /// Pop b, pop a, jump if a > b (operand: i32 offset)
    BrGt = 0x98,
    /// Pop b, pop a, jump if a >= b (operand: i32 offset)
    BrGe = 0x99,
    /// Pop b, pop a, jump unless a < b; taken for unordered operands (operand: i32 offset)
    BrNlt = 0x9A,
    /// Pop b, pop a, jump unless a <= b; taken for unordered operands (operand: i32 offset)
    BrNle = 0x9B,
    /// Pop b, pop a, jump unless a > b; taken for unordered operands (operand: i32 offset)
    BrNgt = 0x9C,
    /// Pop b, pop a, jump unless a >= b; taken for unordered operands (operand: i32 offset)
    BrNge = 0x9D,

    // ===== Calls (0xA0-0xAF) =====
    /// Call static function (operands: u32 function, u16 arg count)
    Call = 0xA0,
    /// Call instance method, receiver below args (operands: u32 function, u16 arg count)
    CallMethod = 0xA1,
    /// Return top of stack
    Return = 0xA2,
    /// Return without value
    ReturnVoid = 0xA3,

    // ===== Objects (0xB0-0xBF) =====
    /// Allocate instance with default fields (operand: u32 class)
    New = 0xB0,
    /// Pop object, push field (operand: u32 field)
    LoadField = 0xB1,
    /// Pop value, pop object, store field (operand: u32 field)
    StoreField = 0xB2,
    /// Push static field (operand: u32 field)
    LoadStatic = 0xB3,
    /// Pop value into static field (operand: u32 field)
    StoreStatic = 0xB4,
    /// Run constructor on object below args, leave object (operands: u32 function, u16 arg count)
    CallConstructor = 0xB5,

    // ===== Boxing & Casts (0xE0-0xEF) =====
    /// Wrap value in a reference (operand: u8 value kind)
    Box = 0xE0,
    /// Unwrap boxed value with kind check (operand: u8 value kind)
    Unbox = 0xE1,
    /// Checked reference cast (operands: u8 type tag, u32 id)
    Cast = 0xE2,

    // ===== Exceptions (0xF8-0xFF) =====
    /// Throw top of stack
    Throw = 0xF8,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x04 => ConstNull,
            0x05 => ConstTrue,
            0x06 => ConstFalse,
            0x07 => ConstI32,
            0x08 => ConstF64,
            0x09 => ConstStr,
            0x0B => ConstI64,
            0x10 => LoadLocal,
            0x11 => StoreLocal,
            0x20 => Iadd,
            0x21 => Isub,
            0x22 => Imul,
            0x23 => Idiv,
            0x24 => Imod,
            0x28 => Ladd,
            0x29 => Lsub,
            0x2A => Lmul,
            0x2B => Ldiv,
            0x2C => Lmod,
            0x30 => Fadd,
            0x31 => Fsub,
            0x32 => Fmul,
            0x33 => Fdiv,
            0x34 => Fmod,
            0x40 => I2L,
            0x41 => I2F,
            0x42 => L2F,
            0x80 => Sconcat,
            0x90 => Jmp,
            0x94 => BrEq,
            0x95 => BrNe,
            0x96 => BrLt,
            0x97 => BrLe,
            0x98 => BrGt,
            0x99 => BrGe,
            0x9A => BrNlt,
            0x9B => BrNle,
            0x9C => BrNgt,
            0x9D => BrNge,
            0xA0 => Call,
            0xA1 => CallMethod,
            0xA2 => Return,
            0xA3 => ReturnVoid,
            0xB0 => New,
            0xB1 => LoadField,
            0xB2 => StoreField,
            0xB3 => LoadStatic,
            0xB4 => StoreStatic,
            0xB5 => CallConstructor,
            0xE0 => Box,
            0xE1 => Unbox,
            0xE2 => Cast,
            0xF8 => Throw,
            _ => return None,
        };
        Some(op)
    }

    /// Encode to the opcode byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Number of operand bytes following the opcode
    pub fn operand_size(self) -> usize {
        use Opcode::*;
        match self {
            ConstI32 | ConstStr => 4,
            ConstF64 | ConstI64 => 8,
            LoadLocal | StoreLocal => 2,
            Jmp | BrEq | BrNe | BrLt | BrLe | BrGt | BrGe | BrNlt | BrNle | BrNgt | BrNge => 4,
            Call | CallMethod | CallConstructor => 6,
            New | LoadField | StoreField | LoadStatic | StoreStatic => 4,
            Box | Unbox => 1,
            Cast => 5,
            _ => 0,
        }
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Pop => "POP",
            Dup => "DUP",
            ConstNull => "CONST_NULL",
            ConstTrue => "CONST_TRUE",
            ConstFalse => "CONST_FALSE",
            ConstI32 => "CONST_I32",
            ConstF64 => "CONST_F64",
            ConstStr => "CONST_STR",
            ConstI64 => "CONST_I64",
            LoadLocal => "LOAD_LOCAL",
            StoreLocal => "STORE_LOCAL",
            Iadd => "IADD",
            Isub => "ISUB",
            Imul => "IMUL",
            Idiv => "IDIV",
            Imod => "IMOD",
            Ladd => "LADD",
            Lsub => "LSUB",
            Lmul => "LMUL",
            Ldiv => "LDIV",
            Lmod => "LMOD",
            Fadd => "FADD",
            Fsub => "FSUB",
            Fmul => "FMUL",
            Fdiv => "FDIV",
            Fmod => "FMOD",
            I2L => "I2L",
            I2F => "I2F",
            L2F => "L2F",
            Sconcat => "SCONCAT",
            Jmp => "JMP",
            BrEq => "BR_EQ",
            BrNe => "BR_NE",
            BrLt => "BR_LT",
            BrLe => "BR_LE",
            BrGt => "BR_GT",
            BrGe => "BR_GE",
            BrNlt => "BR_NLT",
            BrNle => "BR_NLE",
            BrNgt => "BR_NGT",
            BrNge => "BR_NGE",
            Call => "CALL",
            CallMethod => "CALL_METHOD",
            Return => "RETURN",
            ReturnVoid => "RETURN_VOID",
            New => "NEW",
            LoadField => "LOAD_FIELD",
            StoreField => "STORE_FIELD",
            LoadStatic => "LOAD_STATIC",
            StoreStatic => "STORE_STATIC",
            CallConstructor => "CALL_CONSTRUCTOR",
            Box => "BOX",
            Unbox => "UNBOX",
            Cast => "CAST",
            Throw => "THROW",
        }
    }

    /// Check if this opcode carries a jump offset
    pub fn is_jump(self) -> bool {
        self == Self::Jmp || self.is_branch()
    }

    /// Check if this opcode is a conditional compare-and-branch
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::BrEq
                | Self::BrNe
                | Self::BrLt
                | Self::BrLe
                | Self::BrGt
                | Self::BrGe
                | Self::BrNlt
                | Self::BrNle
                | Self::BrNgt
                | Self::BrNge
        )
    }

    /// Check if this opcode is a call instruction
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallMethod | Self::CallConstructor)
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self == Self::Jmp || self == Self::Throw || self.is_return()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
