//! Type-driven conversion chosen before a value is stored

use crate::bytecode::{Opcode, TypeTag, ValueKind};
use crate::emit::BytecodeEmitter;
use crate::error::{EmitError, EmitResult};
use crate::types::{TypeId, TypeRef};
use std::fmt;

/// Subtype queries over the classes of a module
pub trait TypeHierarchy {
    /// Whether `sub` is `sup`, derives from it or implements it
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool;
}

/// The single transformation applied between a source and a target type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Types are compatible as-is
    None,
    /// Numeric widening (`I2L`, `I2F`, `L2F`)
    Widen(Opcode),
    /// Value to reference
    Box(ValueKind),
    /// Reference to value, checked at run time
    Unbox(ValueKind),
    /// Reference to a different reference, checked at run time
    Cast(TypeTag),
}

impl Coercion {
    /// Choose the coercion that makes `source` assignable to `target`
    pub fn select(source: &TypeRef, target: &TypeRef, hierarchy: &dyn TypeHierarchy) -> EmitResult<Coercion> {
        let mismatch = || EmitError::mismatch(target, source);

        if source.is_void() || target.is_void() || matches!(target, TypeRef::Null) {
            return Err(mismatch());
        }
        if source == target {
            return Ok(Coercion::None);
        }

        match (source.is_value_type(), target.is_value_type()) {
            (true, true) => source
                .widening_to(target)
                .map(Coercion::Widen)
                .ok_or_else(mismatch),
            (true, false) => match target {
                TypeRef::Object => Ok(Coercion::Box(source.value_kind())),
                _ => Err(mismatch()),
            },
            (false, true) => match source {
                TypeRef::Object => Ok(Coercion::Unbox(target.value_kind())),
                _ => Err(mismatch()),
            },
            (false, false) => match (source, target) {
                (TypeRef::Null, _) | (_, TypeRef::Object) => Ok(Coercion::None),
                (TypeRef::Class { id: sub, .. }, TypeRef::Class { id: sup, .. }) => {
                    if hierarchy.is_subtype(*sub, *sup) {
                        Ok(Coercion::None)
                    } else {
                        Ok(Coercion::Cast(TypeTag::Class(sup.index())))
                    }
                }
                (TypeRef::Object, other) => other.type_tag().map(Coercion::Cast).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }

    /// Emit the conversion for a value already on the stack
    pub fn emit(&self, emitter: &mut BytecodeEmitter) -> EmitResult<()> {
        match self {
            Coercion::None => Ok(()),
            Coercion::Widen(op) => emitter.emit(*op),
            Coercion::Box(kind) => emitter.emit_box(*kind),
            Coercion::Unbox(kind) => emitter.emit_unbox(*kind),
            Coercion::Cast(tag) => emitter.emit_cast(*tag),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Coercion::None)
    }

    /// Conversions that cannot fail at run time
    pub fn is_implicit(&self) -> bool {
        matches!(self, Coercion::None | Coercion::Widen(_) | Coercion::Box(_))
    }
}

/// Renders as the cast prefix of the converted expression
pub(crate) struct CoercedExpr<'a> {
    pub coercion: Coercion,
    pub target: &'a TypeRef,
    pub expr: &'a dyn fmt::Display,
}

impl fmt::Display for CoercedExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coercion {
            Coercion::None | Coercion::Widen(_) => write!(f, "{}", self.expr),
            Coercion::Box(_) => write!(f, "(object){}", self.expr),
            Coercion::Unbox(_) | Coercion::Cast(_) => write!(f, "({}){}", self.target, self.expr),
        }
    }
}
