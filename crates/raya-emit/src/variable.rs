//! Storage locations that can be loaded onto / stored from the operand stack
//!
//! Every location kind implements [`Storage`]. Commands only talk to the
//! trait: when `needs_receiver_push()` is true they call `emit_receiver()`
//! before loading or saving, and never look at the concrete kind.

use crate::emit::EmitContext;
use crate::error::{EmitError, EmitResult};
use crate::method::MethodBuilder;
use crate::types::{FieldId, MethodId, PropertyId, TypeRef};
use std::fmt;
use std::rc::Rc;

/// A location on or reachable from the operand stack
pub trait Storage: fmt::Debug {
    /// Name used in declarations
    fn name(&self) -> &str;

    /// Static type
    fn ty(&self) -> &TypeRef;

    /// Whether an object reference must be pushed before load/save
    fn needs_receiver_push(&self) -> bool {
        false
    }

    /// Push the object reference this location lives on
    fn emit_receiver(&self, _cx: &mut EmitContext<'_>) -> EmitResult<()> {
        Ok(())
    }

    /// Validate that `load` can be emitted
    fn check_load(&self) -> EmitResult<()> {
        Ok(())
    }

    /// Validate that `save` can be emitted
    fn check_save(&self) -> EmitResult<()> {
        Ok(())
    }

    /// Push the current value (after the receiver, when one is needed)
    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()>;

    /// Pop the top of stack into this location
    fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()>;

    /// Declaration string, e.g. `int sum`
    fn definition(&self) -> String {
        format!("{} {}", self.ty(), self.name())
    }

    /// How the location reads inside an expression
    fn render(&self) -> String {
        self.name().to_string()
    }

    /// Method that owns this location, for locals and parameters
    fn owner(&self) -> Option<MethodId> {
        None
    }
}

// ============================================================================
// Variable handle
// ============================================================================

/// Shared handle to any storage location
#[derive(Clone)]
pub struct Variable(Rc<dyn Storage>);

impl Variable {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Variable(Rc::new(storage))
    }

    /// A literal value
    pub fn constant(value: impl Into<ConstValue>) -> Self {
        Variable::new(Constant::new(value.into()))
    }

    /// The untyped `null` literal
    pub fn null() -> Self {
        Variable::constant(ConstValue::Null)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn ty(&self) -> &TypeRef {
        self.0.ty()
    }

    pub fn needs_receiver_push(&self) -> bool {
        self.0.needs_receiver_push()
    }

    pub fn definition(&self) -> String {
        self.0.definition()
    }

    pub fn owner(&self) -> Option<MethodId> {
        self.0.owner()
    }

    pub fn storage(&self) -> &dyn Storage {
        self.0.as_ref()
    }

    /// Check, push the receiver if needed, then load
    pub(crate) fn emit_load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        if self.needs_receiver_push() {
            self.0.emit_receiver(cx)?;
        }
        self.0.load(cx)
    }

    /// Push the receiver if needed (the value is pushed by the caller before `save`)
    pub(crate) fn emit_save_prefix(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        if self.needs_receiver_push() {
            self.0.emit_receiver(cx)?;
        }
        Ok(())
    }

    pub(crate) fn check_load(&self) -> EmitResult<()> {
        self.0.check_load()
    }

    pub(crate) fn check_save(&self) -> EmitResult<()> {
        self.0.check_save()
    }

    pub(crate) fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.0.save(cx)
    }

    // ===== Arithmetic sugar (explicit method context) =====

    /// `self + rhs`, appended to `body`
    pub fn add(&self, body: &mut MethodBuilder<'_>, rhs: impl Into<Variable>) -> EmitResult<Variable> {
        body.add(self, rhs)
    }

    /// `self - rhs`, appended to `body`
    pub fn subtract(&self, body: &mut MethodBuilder<'_>, rhs: impl Into<Variable>) -> EmitResult<Variable> {
        body.subtract(self, rhs)
    }

    /// `self * rhs`, appended to `body`
    pub fn multiply(&self, body: &mut MethodBuilder<'_>, rhs: impl Into<Variable>) -> EmitResult<Variable> {
        body.multiply(self, rhs)
    }

    /// `self / rhs`, appended to `body`
    pub fn divide(&self, body: &mut MethodBuilder<'_>, rhs: impl Into<Variable>) -> EmitResult<Variable> {
        body.divide(self, rhs)
    }

    /// `self % rhs`, appended to `body`
    pub fn modulo(&self, body: &mut MethodBuilder<'_>, rhs: impl Into<Variable>) -> EmitResult<Variable> {
        body.modulo(self, rhs)
    }

    /// `self++`, appended to `body`
    pub fn increment(&self, body: &mut MethodBuilder<'_>) -> EmitResult<Variable> {
        body.increment(self)
    }

    /// `self--`, appended to `body`
    pub fn decrement(&self, body: &mut MethodBuilder<'_>) -> EmitResult<Variable> {
        body.decrement(self)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.render())
    }
}

impl From<&Variable> for Variable {
    fn from(v: &Variable) -> Self {
        v.clone()
    }
}

macro_rules! constant_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Variable {
            fn from(value: $t) -> Self {
                Variable::constant(value)
            }
        })*
    };
}

constant_from!(bool, i32, i64, f64, &str, String, ConstValue);

// ============================================================================
// Locals & Parameters
// ============================================================================

/// Local declared in a method body
#[derive(Debug, Clone)]
pub struct Local {
    pub method: MethodId,
    pub slot: u16,
    pub name: String,
    pub ty: TypeRef,
}

impl Storage for Local {
    fn name(&self) -> &str {
        &self.name
    }

    fn ty(&self) -> &TypeRef {
        &self.ty
    }

    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        cx.emitter.emit_load_local(self.slot)
    }

    fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        cx.emitter.emit_store_local(self.slot)
    }

    fn owner(&self) -> Option<MethodId> {
        Some(self.method)
    }
}

/// Parameter of a method signature; slot 0 is the receiver of instance members
#[derive(Debug, Clone)]
pub struct Parameter {
    pub method: MethodId,
    pub slot: u16,
    pub name: String,
    pub ty: TypeRef,
}

impl Storage for Parameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn ty(&self) -> &TypeRef {
        &self.ty
    }

    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        cx.emitter.emit_load_local(self.slot)
    }

    fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        cx.emitter.emit_store_local(self.slot)
    }

    fn owner(&self) -> Option<MethodId> {
        Some(self.method)
    }
}

// ============================================================================
// Members
// ============================================================================

/// Object a field or property is accessed on
#[derive(Debug, Clone)]
pub enum Receiver {
    /// Slot 0 of the current instance member
    This,
    /// An explicit object-typed variable
    Object(Variable),
    /// No receiver; the member is static (holds the declaring type name)
    Static(Rc<str>),
}

impl Receiver {
    fn is_static(&self) -> bool {
        matches!(self, Receiver::Static(_))
    }

    fn check(&self) -> EmitResult<()> {
        match self {
            Receiver::Object(v) => v.check_load(),
            _ => Ok(()),
        }
    }

    fn emit(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        match self {
            Receiver::This => cx.emitter.emit_load_local(0),
            Receiver::Object(v) => v.emit_load(cx),
            Receiver::Static(_) => Ok(()),
        }
    }

    fn owner(&self) -> Option<MethodId> {
        match self {
            Receiver::Object(v) => v.owner(),
            _ => None,
        }
    }

    fn qualify(&self, member: &str) -> String {
        match self {
            Receiver::This => member.to_string(),
            Receiver::Object(v) => format!("{}.{}", v, member),
            Receiver::Static(type_name) => format!("{}.{}", type_name, member),
        }
    }
}

/// Field access
#[derive(Debug, Clone)]
pub struct FieldAccess {
    pub field: FieldId,
    pub name: String,
    pub ty: TypeRef,
    pub receiver: Receiver,
    /// False for readonly fields outside their type's constructors
    pub writable: bool,
}

impl Storage for FieldAccess {
    fn name(&self) -> &str {
        &self.name
    }

    fn ty(&self) -> &TypeRef {
        &self.ty
    }

    fn needs_receiver_push(&self) -> bool {
        !self.receiver.is_static()
    }

    fn emit_receiver(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.receiver.emit(cx)
    }

    fn check_load(&self) -> EmitResult<()> {
        self.receiver.check()
    }

    fn check_save(&self) -> EmitResult<()> {
        if !self.writable {
            return Err(EmitError::InvalidOperation(format!(
                "readonly field '{}' can only be assigned in a constructor",
                self.name
            )));
        }
        self.receiver.check()
    }

    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        if self.receiver.is_static() {
            cx.emitter.emit_load_static(self.field.index())
        } else {
            cx.emitter.emit_load_field(self.field.index())
        }
    }

    fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        if self.receiver.is_static() {
            cx.emitter.emit_store_static(self.field.index())
        } else {
            cx.emitter.emit_store_field(self.field.index())
        }
    }

    fn render(&self) -> String {
        self.receiver.qualify(&self.name)
    }

    fn owner(&self) -> Option<MethodId> {
        self.receiver.owner()
    }
}

/// Property access through its accessor methods
#[derive(Debug, Clone)]
pub struct PropertyAccess {
    pub property: PropertyId,
    pub name: String,
    pub ty: TypeRef,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
    pub receiver: Receiver,
}

impl Storage for PropertyAccess {
    fn name(&self) -> &str {
        &self.name
    }

    fn ty(&self) -> &TypeRef {
        &self.ty
    }

    fn needs_receiver_push(&self) -> bool {
        true
    }

    fn emit_receiver(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.receiver.emit(cx)
    }

    fn check_load(&self) -> EmitResult<()> {
        if self.getter.is_none() {
            return Err(EmitError::InvalidOperation(format!(
                "property '{}' has no getter",
                self.name
            )));
        }
        self.receiver.check()
    }

    fn check_save(&self) -> EmitResult<()> {
        if self.setter.is_none() {
            return Err(EmitError::InvalidOperation(format!(
                "property '{}' has no setter",
                self.name
            )));
        }
        self.receiver.check()
    }

    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        let getter = self.getter.ok_or_else(|| {
            EmitError::InvalidOperation(format!("property '{}' has no getter", self.name))
        })?;
        cx.emitter.emit_call_method(getter.index(), 0)
    }

    fn save(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        let setter = self.setter.ok_or_else(|| {
            EmitError::InvalidOperation(format!("property '{}' has no setter", self.name))
        })?;
        cx.emitter.emit_call_method(setter.index(), 1)
    }

    fn render(&self) -> String {
        self.receiver.qualify(&self.name)
    }

    fn owner(&self) -> Option<MethodId> {
        self.receiver.owner()
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Rc<str>),
    /// Enum member with its underlying value
    Enum {
        ty: TypeRef,
        member: Rc<str>,
        value: i32,
    },
}

impl ConstValue {
    /// Type inferred from the literal
    pub fn ty(&self) -> TypeRef {
        match self {
            ConstValue::Null => TypeRef::Null,
            ConstValue::Bool(_) => TypeRef::Bool,
            ConstValue::I32(_) => TypeRef::I32,
            ConstValue::I64(_) => TypeRef::I64,
            ConstValue::F64(_) => TypeRef::F64,
            ConstValue::Str(_) => TypeRef::Str,
            ConstValue::Enum { ty, .. } => ty.clone(),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => f.write_str("null"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::I32(i) => write!(f, "{}", i),
            ConstValue::I64(i) => write!(f, "{}L", i),
            ConstValue::F64(x) => write!(f, "{:?}", x),
            ConstValue::Str(s) => write!(f, "{:?}", s),
            ConstValue::Enum { ty, member, .. } => write!(f, "{}.{}", ty, member),
        }
    }
}

impl From<bool> for ConstValue {
    fn from(v: bool) -> Self {
        ConstValue::Bool(v)
    }
}

impl From<i32> for ConstValue {
    fn from(v: i32) -> Self {
        ConstValue::I32(v)
    }
}

impl From<i64> for ConstValue {
    fn from(v: i64) -> Self {
        ConstValue::I64(v)
    }
}

impl From<f64> for ConstValue {
    fn from(v: f64) -> Self {
        ConstValue::F64(v)
    }
}

impl From<&str> for ConstValue {
    fn from(v: &str) -> Self {
        ConstValue::Str(Rc::from(v))
    }
}

impl From<String> for ConstValue {
    fn from(v: String) -> Self {
        ConstValue::Str(Rc::from(v))
    }
}

/// Compile-time constant; has no owner and cannot be assigned
#[derive(Debug, Clone)]
pub struct Constant {
    pub value: ConstValue,
    literal: String,
    ty: TypeRef,
}

impl Constant {
    pub fn new(value: ConstValue) -> Self {
        Self {
            literal: value.to_string(),
            ty: value.ty(),
            value,
        }
    }
}

impl Storage for Constant {
    fn name(&self) -> &str {
        &self.literal
    }

    fn ty(&self) -> &TypeRef {
        &self.ty
    }

    fn check_save(&self) -> EmitResult<()> {
        Err(EmitError::InvalidArgument(format!(
            "cannot assign to constant {}",
            self.literal
        )))
    }

    fn load(&self, cx: &mut EmitContext<'_>) -> EmitResult<()> {
        match &self.value {
            ConstValue::Null => cx.emitter.emit_const_null(),
            ConstValue::Bool(b) => cx.emitter.emit_const_bool(*b),
            ConstValue::I32(i) => cx.emitter.emit_const_i32(*i),
            ConstValue::I64(i) => cx.emitter.emit_const_i64(*i),
            ConstValue::F64(x) => cx.emitter.emit_const_f64(*x),
            ConstValue::Str(s) => cx.emit_str(s),
            ConstValue::Enum { value, .. } => cx.emitter.emit_const_i32(*value),
        }
    }

    fn save(&self, _cx: &mut EmitContext<'_>) -> EmitResult<()> {
        self.check_save()
    }

    fn definition(&self) -> String {
        format!("const {} = {}", self.ty, self.literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ConstantPool, Opcode};
    use crate::emit::BytecodeEmitter;

    #[test]
    fn test_constant_inference_and_rendering() {
        assert_eq!(Variable::from(3).ty(), &TypeRef::I32);
        assert_eq!(Variable::from(3i64).to_string(), "3L");
        assert_eq!(Variable::from(1.0).to_string(), "1.0");
        assert_eq!(Variable::from("hi").to_string(), "\"hi\"");
        assert_eq!(Variable::null().ty(), &TypeRef::Null);
        assert_eq!(Variable::from(true).definition(), "const bool = true");
    }

    #[test]
    fn test_constant_cannot_be_saved() {
        let c = Variable::from(1);
        assert!(matches!(c.check_save(), Err(EmitError::InvalidArgument(_))));
    }

    #[test]
    fn test_receiver_capability() {
        let local = Variable::new(Local {
            method: MethodId(0),
            slot: 1,
            name: "c".into(),
            ty: TypeRef::Object,
        });
        assert!(!local.needs_receiver_push());

        let field = Variable::new(FieldAccess {
            field: FieldId(2),
            name: "count".into(),
            ty: TypeRef::I32,
            receiver: Receiver::Object(local.clone()),
            writable: true,
        });
        assert!(field.needs_receiver_push());
        assert_eq!(field.to_string(), "c.count");

        let stat = Variable::new(FieldAccess {
            field: FieldId(3),
            name: "total".into(),
            ty: TypeRef::I32,
            receiver: Receiver::Static(Rc::from("Stats")),
            writable: true,
        });
        assert!(!stat.needs_receiver_push());
        assert_eq!(stat.to_string(), "Stats.total");
    }

    #[test]
    fn test_field_load_pushes_receiver_first() {
        let mut emitter = BytecodeEmitter::new("f", 1);
        let mut constants = ConstantPool::new();
        let mut cx = EmitContext::new(&mut emitter, &mut constants);

        let field = Variable::new(FieldAccess {
            field: FieldId(5),
            name: "value".into(),
            ty: TypeRef::I32,
            receiver: Receiver::This,
            writable: true,
        });
        field.emit_load(&mut cx).unwrap();

        let code = emitter.code();
        assert_eq!(code[0], Opcode::LoadLocal.to_u8());
        assert_eq!(code[3], Opcode::LoadField.to_u8());
    }

    #[test]
    fn test_property_without_setter_rejects_save() {
        let prop = Variable::new(PropertyAccess {
            property: PropertyId(0),
            name: "Area".into(),
            ty: TypeRef::F64,
            getter: Some(MethodId(1)),
            setter: None,
            receiver: Receiver::This,
        });
        assert!(prop.check_load().is_ok());
        assert!(matches!(prop.check_save(), Err(EmitError::InvalidOperation(_))));
    }
}
