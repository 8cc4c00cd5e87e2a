//! Command IR
//!
//! One node per builder operation. A command is validated when it is
//! constructed; `setup` re-checks load/store legality and only then emits,
//! so a rejected command never leaves partial instructions behind. Every
//! command renders as one line of pseudo-source.

pub mod coercion;

pub use coercion::{Coercion, TypeHierarchy};

use crate::bytecode::Opcode;
use crate::emit::{EmitContext, Label};
use crate::error::{EmitError, EmitResult};
use crate::types::{Comparison, MethodId, TypeRef};
use crate::variable::Variable;
use coercion::CoercedExpr;
use std::fmt;
use std::ops::Range;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
        }
    }

    /// Prefix of the generated result local
    pub fn temp_prefix(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "sub",
            ArithmeticOp::Multiply => "mul",
            ArithmeticOp::Divide => "div",
            ArithmeticOp::Modulo => "mod",
        }
    }

    /// Type both operands are converted to before the operation
    pub fn operand_type(self, left: &TypeRef, right: &TypeRef) -> EmitResult<TypeRef> {
        if self == ArithmeticOp::Add && *left == TypeRef::Str && *right == TypeRef::Str {
            return Ok(TypeRef::Str);
        }
        TypeRef::common_numeric(left, right).ok_or_else(|| {
            EmitError::InvalidArgument(format!(
                "operator {} is not defined for {} and {}",
                self.symbol(),
                left,
                right
            ))
        })
    }

    fn opcode(self, ty: &TypeRef) -> Option<Opcode> {
        use ArithmeticOp::*;
        let op = match (ty, self) {
            (TypeRef::Str, Add) => Opcode::Sconcat,
            (TypeRef::I32, Add) => Opcode::Iadd,
            (TypeRef::I32, Subtract) => Opcode::Isub,
            (TypeRef::I32, Multiply) => Opcode::Imul,
            (TypeRef::I32, Divide) => Opcode::Idiv,
            (TypeRef::I32, Modulo) => Opcode::Imod,
            (TypeRef::I64, Add) => Opcode::Ladd,
            (TypeRef::I64, Subtract) => Opcode::Lsub,
            (TypeRef::I64, Multiply) => Opcode::Lmul,
            (TypeRef::I64, Divide) => Opcode::Ldiv,
            (TypeRef::I64, Modulo) => Opcode::Lmod,
            (TypeRef::F64, Add) => Opcode::Fadd,
            (TypeRef::F64, Subtract) => Opcode::Fsub,
            (TypeRef::F64, Multiply) => Opcode::Fmul,
            (TypeRef::F64, Divide) => Opcode::Fdiv,
            (TypeRef::F64, Modulo) => Opcode::Fmod,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArithmeticOp::Add => "Add",
            ArithmeticOp::Subtract => "Subtract",
            ArithmeticOp::Multiply => "Multiply",
            ArithmeticOp::Divide => "Divide",
            ArithmeticOp::Modulo => "Modulo",
        };
        f.write_str(name)
    }
}

/// Branch condition `left <cmp> right`
#[derive(Debug, Clone)]
pub struct Condition {
    pub left: Variable,
    pub comparison: Comparison,
    pub right: Variable,
    /// Common numeric type both sides are widened to
    widen_to: Option<TypeRef>,
}

impl Condition {
    /// Validate operand types for the comparison
    pub fn new(left: Variable, comparison: Comparison, right: Variable) -> EmitResult<Self> {
        let (lt, rt) = (left.ty().clone(), right.ty().clone());
        let reject = || {
            EmitError::InvalidArgument(format!(
                "cannot compare {} {} {}",
                lt,
                comparison.symbol(),
                rt
            ))
        };

        let widen_to = if let Some(common) = TypeRef::common_numeric(&lt, &rt) {
            Some(common)
        } else if lt == rt && matches!(lt, TypeRef::Enum { .. } | TypeRef::Str) {
            None
        } else if comparison.is_equality()
            && ((lt == TypeRef::Bool && rt == TypeRef::Bool) || (lt.is_reference() && rt.is_reference()))
        {
            None
        } else {
            return Err(reject());
        };

        Ok(Self {
            left,
            comparison,
            right,
            widen_to,
        })
    }

    fn check(&self) -> EmitResult<()> {
        self.left.check_load()?;
        self.right.check_load()
    }

    fn emit_operand(&self, operand: &Variable, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        operand.emit_load(cx)?;
        if let Some(target) = &self.widen_to {
            if let Some(op) = operand.ty().widening_to(target) {
                cx.emitter.emit(op)?;
            }
        }
        Ok(())
    }

    /// Push both operands and branch to `target` when the condition fails
    fn emit_branch_unless(&self, cx: &mut EmitContext<'_>, target: Label) -> EmitResult<()> {
        self.emit_operand(&self.left, cx)?;
        self.emit_operand(&self.right, cx)?;
        cx.emitter.emit_branch(self.comparison.failure_branch(), target)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.comparison.symbol(), self.right)
    }
}

/// Resolved method or constructor a call binds to
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub method: MethodId,
    /// Declaring type
    pub owner: TypeRef,
    pub name: String,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_static: bool,
    pub is_constructor: bool,
}

/// Call argument with its conversion to the parameter type
#[derive(Debug, Clone)]
pub struct Argument {
    pub value: Variable,
    pub coercion: Coercion,
    pub param_type: TypeRef,
}

impl Argument {
    fn emit(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.value.emit_load(cx)?;
        self.coercion.emit(cx.emitter)
    }
}

struct ArgList<'a>(&'a [Argument]);

impl fmt::Display for ArgList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let rendered = CoercedExpr {
                coercion: arg.coercion,
                target: &arg.param_type,
                expr: &arg.value,
            };
            write!(f, "{}", rendered)?;
        }
        Ok(())
    }
}

/// IR node for one builder operation
#[derive(Debug, Clone)]
pub enum Command {
    /// Add, Subtract, Multiply, Divide, Modulo
    Arithmetic {
        op: ArithmeticOp,
        left: Variable,
        right: Variable,
        operand_type: TypeRef,
        result: Variable,
    },
    Assign {
        target: Variable,
        source: Variable,
        coercion: Coercion,
    },
    /// `constructor` is absent for types that declare none
    NewObject {
        class: TypeRef,
        constructor: Option<CallTarget>,
        args: Vec<Argument>,
        result: Variable,
    },
    /// Method call, or a constructor call on an existing receiver
    Call {
        target: CallTarget,
        receiver: Option<Variable>,
        args: Vec<Argument>,
        result: Option<Variable>,
    },
    Box {
        value: Variable,
        result: Variable,
    },
    UnBox {
        value: Variable,
        ty: TypeRef,
        result: Variable,
    },
    Cast {
        value: Variable,
        ty: TypeRef,
        result: Variable,
    },
    Throw {
        value: Variable,
    },
    DefineLocal {
        local: Variable,
    },
    If {
        condition: Condition,
        else_label: Label,
        final_label: Label,
    },
    ElseIf {
        condition: Condition,
        previous_else: Label,
        else_label: Label,
        final_label: Label,
    },
    Else {
        previous_else: Label,
        final_label: Label,
    },
    EndIf {
        pending_else: Option<Label>,
        final_label: Label,
    },
    While {
        condition: Condition,
        start: Label,
        end: Label,
    },
    EndWhile {
        start: Label,
        end: Label,
    },
    Try,
    Catch {
        ty: TypeRef,
        local: Variable,
    },
    EndTry,
    Return {
        value: Option<(Variable, Coercion)>,
        return_type: TypeRef,
    },
}

impl Command {
    /// Operation name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Arithmetic { op, .. } => match op {
                ArithmeticOp::Add => "Add",
                ArithmeticOp::Subtract => "Subtract",
                ArithmeticOp::Multiply => "Multiply",
                ArithmeticOp::Divide => "Divide",
                ArithmeticOp::Modulo => "Modulo",
            },
            Command::Assign { .. } => "Assign",
            Command::NewObject { .. } => "NewObject",
            Command::Call { .. } => "Call",
            Command::Box { .. } => "Box",
            Command::UnBox { .. } => "UnBox",
            Command::Cast { .. } => "Cast",
            Command::Throw { .. } => "Throw",
            Command::DefineLocal { .. } => "DefineLocal",
            Command::If { .. } => "If",
            Command::ElseIf { .. } => "ElseIf",
            Command::Else { .. } => "Else",
            Command::EndIf { .. } => "EndIf",
            Command::While { .. } => "While",
            Command::EndWhile { .. } => "EndWhile",
            Command::Try => "Try",
            Command::Catch { .. } => "Catch",
            Command::EndTry => "EndTry",
            Command::Return { .. } => "Return",
        }
    }

    /// Variable holding the command's value, if it produces one
    pub fn result(&self) -> Option<&Variable> {
        match self {
            Command::Arithmetic { result, .. }
            | Command::NewObject { result, .. }
            | Command::Box { result, .. }
            | Command::UnBox { result, .. }
            | Command::Cast { result, .. } => Some(result),
            Command::Call { result, .. } => result.as_ref(),
            Command::Catch { local, .. } | Command::DefineLocal { local } => Some(local),
            _ => None,
        }
    }

    /// Indentation change applied (before, after) rendering this line
    pub(crate) fn indent_delta(&self) -> (i32, i32) {
        match self {
            Command::If { .. } | Command::While { .. } | Command::Try => (0, 1),
            Command::ElseIf { .. } | Command::Else { .. } | Command::Catch { .. } => (-1, 1),
            Command::EndIf { .. } | Command::EndWhile { .. } | Command::EndTry => (-1, 0),
            _ => (0, 0),
        }
    }

    /// Validate, then emit
    pub fn setup(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.check()?;
        self.emit(cx)
    }

    /// Load/store legality checks; nothing is emitted
    fn check(&self) -> EmitResult<()> {
        match self {
            Command::Arithmetic { left, right, .. } => {
                left.check_load()?;
                right.check_load()
            }
            Command::Assign { target, source, .. } => {
                target.check_save()?;
                source.check_load()
            }
            Command::NewObject { args, .. } => args.iter().try_for_each(|a| a.value.check_load()),
            Command::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    receiver.check_load()?;
                }
                args.iter().try_for_each(|a| a.value.check_load())
            }
            Command::Box { value, .. }
            | Command::UnBox { value, .. }
            | Command::Cast { value, .. }
            | Command::Throw { value } => value.check_load(),
            Command::If { condition, .. }
            | Command::ElseIf { condition, .. }
            | Command::While { condition, .. } => condition.check(),
            Command::Return { value, .. } => match value {
                Some((v, _)) => v.check_load(),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn emit(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        match self {
            Command::Arithmetic {
                op,
                left,
                right,
                operand_type,
                result,
            } => {
                let opcode = op.opcode(operand_type).ok_or_else(|| {
                    EmitError::InvalidArgument(format!("{} is not defined for {}", op, operand_type))
                })?;
                for operand in [left, right] {
                    operand.emit_load(cx)?;
                    if let Some(widen) = operand.ty().widening_to(operand_type) {
                        cx.emitter.emit(widen)?;
                    }
                }
                cx.emitter.emit(opcode)?;
                result.save(cx)
            }

            Command::Assign {
                target,
                source,
                coercion,
            } => {
                target.emit_save_prefix(cx)?;
                source.emit_load(cx)?;
                coercion.emit(cx.emitter)?;
                target.save(cx)
            }

            Command::NewObject {
                class,
                constructor,
                args,
                result,
            } => {
                let class_id = class.class_id().ok_or_else(|| {
                    EmitError::InvalidArgument(format!("cannot instantiate {}", class))
                })?;
                cx.emitter.emit_new(class_id.index())?;
                if let Some(constructor) = constructor {
                    for arg in args {
                        arg.emit(cx)?;
                    }
                    cx.emitter
                        .emit_call_constructor(constructor.method.index(), args.len() as u16)?;
                }
                result.save(cx)
            }

            Command::Call {
                target,
                receiver,
                args,
                result,
            } => {
                if let Some(receiver) = receiver {
                    receiver.emit_load(cx)?;
                }
                for arg in args {
                    arg.emit(cx)?;
                }
                let argc = args.len() as u16;
                let function = target.method.index();
                if target.is_constructor {
                    cx.emitter.emit_call_constructor(function, argc)?;
                    cx.emitter.emit(Opcode::Pop)?;
                } else if target.is_static {
                    cx.emitter.emit_call(function, argc)?;
                } else {
                    cx.emitter.emit_call_method(function, argc)?;
                }
                match result {
                    Some(result) => result.save(cx),
                    None => Ok(()),
                }
            }

            Command::Box { value, result } => {
                value.emit_load(cx)?;
                cx.emitter.emit_box(value.ty().value_kind())?;
                result.save(cx)
            }

            Command::UnBox { value, ty, result } => {
                value.emit_load(cx)?;
                cx.emitter.emit_unbox(ty.value_kind())?;
                result.save(cx)
            }

            Command::Cast { value, ty, result } => {
                let tag = ty.type_tag().ok_or_else(|| {
                    EmitError::InvalidArgument(format!("cannot cast to {}", ty))
                })?;
                value.emit_load(cx)?;
                cx.emitter.emit_cast(tag)?;
                result.save(cx)
            }

            Command::Throw { value } => {
                value.emit_load(cx)?;
                cx.emitter.emit_throw()
            }

            // Slot is reserved at construction
            Command::DefineLocal { .. } => Ok(()),

            Command::If {
                condition,
                else_label,
                ..
            } => condition.emit_branch_unless(cx, *else_label),

            Command::ElseIf {
                condition,
                previous_else,
                else_label,
                final_label,
            } => {
                if cx.emitter.can_fall_through() {
                    cx.emitter.emit_jump(*final_label)?;
                }
                cx.emitter.mark_label(*previous_else)?;
                condition.emit_branch_unless(cx, *else_label)
            }

            Command::Else {
                previous_else,
                final_label,
            } => {
                if cx.emitter.can_fall_through() {
                    cx.emitter.emit_jump(*final_label)?;
                }
                cx.emitter.mark_label(*previous_else)
            }

            Command::EndIf {
                pending_else,
                final_label,
            } => {
                if let Some(label) = pending_else {
                    cx.emitter.mark_label(*label)?;
                }
                cx.emitter.mark_label(*final_label)
            }

            Command::While {
                condition,
                start,
                end,
            } => {
                cx.emitter.mark_label(*start)?;
                condition.emit_branch_unless(cx, *end)
            }

            Command::EndWhile { start, end } => {
                cx.emitter.emit_jump(*start)?;
                cx.emitter.mark_label(*end)
            }

            Command::Try => cx.emitter.begin_exception_block().map(|_| ()),

            Command::Catch { ty, local } => {
                let tag = ty.type_tag().ok_or_else(|| {
                    EmitError::InvalidArgument(format!("cannot catch {}", ty))
                })?;
                cx.emitter.begin_catch_block(tag)?;
                local.save(cx)
            }

            Command::EndTry => cx.emitter.end_exception_block(),

            Command::Return { value, .. } => match value {
                Some((v, coercion)) => {
                    v.emit_load(cx)?;
                    coercion.emit(cx.emitter)?;
                    cx.emitter.emit_return()
                }
                None => cx.emitter.emit_return_void(),
            },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Arithmetic {
                op,
                left,
                right,
                result,
                ..
            } => write!(f, "{} = {} {} {};", result.definition(), left, op.symbol(), right),

            Command::Assign {
                target,
                source,
                coercion,
            } => {
                let value = CoercedExpr {
                    coercion: *coercion,
                    target: target.ty(),
                    expr: source,
                };
                write!(f, "{} = {};", target, value)
            }

            Command::NewObject {
                class, args, result, ..
            } => write!(f, "{} = new {}({});", result.definition(), class, ArgList(args)),

            Command::Call {
                target,
                receiver,
                args,
                result,
            } => {
                if let Some(result) = result {
                    write!(f, "{} = ", result.definition())?;
                }
                if target.is_constructor {
                    return write!(f, "base({});", ArgList(args));
                }
                match receiver {
                    Some(receiver) => write!(f, "{}.", receiver)?,
                    None => write!(f, "{}.", target.owner)?,
                }
                write!(f, "{}({});", target.name, ArgList(args))
            }

            Command::Box { value, result } => {
                write!(f, "{} = (object){};", result.definition(), value)
            }

            Command::UnBox { value, ty, result } | Command::Cast { value, ty, result } => {
                write!(f, "{} = ({}){};", result.definition(), ty, value)
            }

            Command::Throw { value } => write!(f, "throw {};", value),
            Command::DefineLocal { local } => write!(f, "{};", local.definition()),
            Command::If { condition, .. } => write!(f, "if ({}) {{", condition),
            Command::ElseIf { condition, .. } => write!(f, "}} else if ({}) {{", condition),
            Command::Else { .. } => f.write_str("} else {"),
            Command::EndIf { .. } | Command::EndWhile { .. } | Command::EndTry => f.write_str("}"),
            Command::While { condition, .. } => write!(f, "while ({}) {{", condition),
            Command::Try => f.write_str("try {"),
            Command::Catch { local, .. } => write!(f, "}} catch ({}) {{", local.definition()),

            Command::Return { value, return_type } => match value {
                Some((v, coercion)) => {
                    let value = CoercedExpr {
                        coercion: *coercion,
                        target: return_type,
                        expr: v,
                    };
                    write!(f, "return {};", value)
                }
                None => f.write_str("return;"),
            },
        }
    }
}

/// A command together with the code range its `setup` emitted
#[derive(Debug, Clone)]
pub struct EmittedCommand {
    pub command: Command,
    pub code: Range<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ConstantPool, ValueKind};
    use crate::emit::BytecodeEmitter;
    use crate::types::MethodId;
    use crate::variable::Local;

    fn local(slot: u16, name: &str, ty: TypeRef) -> Variable {
        Variable::new(Local {
            method: MethodId(0),
            slot,
            name: name.to_string(),
            ty,
        })
    }

    #[test]
    fn test_arithmetic_widens_mixed_operands() {
        let mut emitter = BytecodeEmitter::new("f", 2);
        let mut constants = ConstantPool::new();
        let a = local(0, "a", TypeRef::I32);
        let b = local(1, "b", TypeRef::F64);
        let operand_type = ArithmeticOp::Add.operand_type(a.ty(), b.ty()).unwrap();
        assert_eq!(operand_type, TypeRef::F64);

        let cmd = Command::Arithmetic {
            op: ArithmeticOp::Add,
            left: a,
            right: b,
            operand_type,
            result: local(2, "__add1", TypeRef::F64),
        };
        cmd.setup(&mut EmitContext::new(&mut emitter, &mut constants))
            .unwrap();

        let code = emitter.code();
        assert_eq!(code[0], Opcode::LoadLocal.to_u8());
        assert_eq!(code[3], Opcode::I2F.to_u8());
        assert_eq!(code[4], Opcode::LoadLocal.to_u8());
        assert_eq!(code[7], Opcode::Fadd.to_u8());
        assert_eq!(code[8], Opcode::StoreLocal.to_u8());
        assert_eq!(cmd.to_string(), "double __add1 = a + b;");
    }

    #[test]
    fn test_arithmetic_rejects_non_numeric() {
        assert!(ArithmeticOp::Multiply
            .operand_type(&TypeRef::Str, &TypeRef::Str)
            .is_err());
        assert_eq!(
            ArithmeticOp::Add
                .operand_type(&TypeRef::Str, &TypeRef::Str)
                .unwrap(),
            TypeRef::Str
        );
    }

    #[test]
    fn test_constant_assignment_rejected_before_emission() {
        let mut emitter = BytecodeEmitter::new("f", 0);
        let mut constants = ConstantPool::new();
        let cmd = Command::Assign {
            target: Variable::from(1),
            source: Variable::from(2),
            coercion: Coercion::None,
        };
        assert!(cmd
            .setup(&mut EmitContext::new(&mut emitter, &mut constants))
            .is_err());
        assert!(emitter.code().is_empty());
    }

    #[test]
    fn test_condition_validation() {
        let i = local(0, "i", TypeRef::I32);
        let s = local(1, "s", TypeRef::Str);
        assert!(Condition::new(i.clone(), Comparison::LessThan, Variable::from(5i64)).is_ok());
        assert!(Condition::new(i, Comparison::Equal, s.clone()).is_err());
        assert!(Condition::new(s.clone(), Comparison::Equal, Variable::null()).is_ok());
        assert!(Condition::new(Variable::from(true), Comparison::LessThan, Variable::from(false)).is_err());
        assert_eq!(
            Condition::new(s, Comparison::NotEqual, Variable::null())
                .unwrap()
                .to_string(),
            "s != null"
        );
    }

    #[test]
    fn test_rendering() {
        let obj = local(0, "o", TypeRef::Object);
        let n = local(1, "n", TypeRef::I32);
        let assign = Command::Assign {
            target: n.clone(),
            source: obj.clone(),
            coercion: Coercion::Unbox(ValueKind::I32),
        };
        assert_eq!(assign.to_string(), "n = (int)o;");

        let catch = Command::Catch {
            ty: TypeRef::Object,
            local: local(2, "ex", TypeRef::Object),
        };
        assert_eq!(catch.to_string(), "} catch (object ex) {");

        let ret = Command::Return {
            value: Some((n, Coercion::Box(ValueKind::I32))),
            return_type: TypeRef::Object,
        };
        assert_eq!(ret.to_string(), "return (object)n;");

        let cast = Command::Cast {
            value: obj,
            ty: TypeRef::Str,
            result: local(3, "__cast1", TypeRef::Str),
        };
        assert_eq!(cast.to_string(), "string __cast1 = (string)o;");
        assert_eq!(cast.kind(), "Cast");
    }
}
