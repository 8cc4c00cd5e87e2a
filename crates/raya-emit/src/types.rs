//! Static type model, definition handles and attributes

use crate::bytecode::{Opcode, TypeTag, ValueKind};
use std::fmt;
use std::rc::Rc;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Position in the owning module's table
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a type definition; equals the materialized class id
    TypeId
);
define_handle!(
    /// Handle to an enum definition
    EnumId
);
define_handle!(
    /// Handle to a method or constructor; equals the materialized function id
    MethodId
);
define_handle!(
    /// Handle to a field; equals the materialized field id
    FieldId
);
define_handle!(
    /// Handle to a property definition
    PropertyId
);

/// Static type of a variable, parameter or member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Void,
    Bool,
    I32,
    I64,
    F64,
    Str,
    /// Root of every reference type
    Object,
    /// Type of the `null` literal
    Null,
    /// A class or interface defined in the module
    Class { id: TypeId, name: Rc<str> },
    /// An enum defined in the module (i32 underlying)
    Enum { id: EnumId, name: Rc<str> },
}

impl TypeRef {
    /// Value types are copied and need boxing to become references
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeRef::Bool | TypeRef::I32 | TypeRef::I64 | TypeRef::F64 | TypeRef::Enum { .. }
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeRef::Str | TypeRef::Object | TypeRef::Null | TypeRef::Class { .. }
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeRef::I32 | TypeRef::I64 | TypeRef::F64)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    /// Class id for class and interface types
    pub fn class_id(&self) -> Option<TypeId> {
        match self {
            TypeRef::Class { id, .. } => Some(*id),
            _ => None,
        }
    }

    fn numeric_rank(&self) -> Option<u8> {
        match self {
            TypeRef::I32 => Some(0),
            TypeRef::I64 => Some(1),
            TypeRef::F64 => Some(2),
            _ => None,
        }
    }

    /// Wider of two numeric types
    pub fn common_numeric(a: &TypeRef, b: &TypeRef) -> Option<TypeRef> {
        let (ra, rb) = (a.numeric_rank()?, b.numeric_rank()?);
        Some(if ra >= rb { a.clone() } else { b.clone() })
    }

    /// Conversion opcode widening `self` to `target`, if one exists
    pub fn widening_to(&self, target: &TypeRef) -> Option<Opcode> {
        match (self, target) {
            (TypeRef::I32, TypeRef::I64) => Some(Opcode::I2L),
            (TypeRef::I32, TypeRef::F64) => Some(Opcode::I2F),
            (TypeRef::I64, TypeRef::F64) => Some(Opcode::L2F),
            _ => None,
        }
    }

    /// Runtime representation used for boxing and field defaults
    pub fn value_kind(&self) -> ValueKind {
        match self {
            TypeRef::Bool => ValueKind::Bool,
            TypeRef::I32 | TypeRef::Enum { .. } => ValueKind::I32,
            TypeRef::I64 => ValueKind::I64,
            TypeRef::F64 => ValueKind::F64,
            _ => ValueKind::Reference,
        }
    }

    /// Operand for `CAST` and catch clauses
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            TypeRef::Object => Some(TypeTag::Object),
            TypeRef::Str => Some(TypeTag::Str),
            TypeRef::Class { id, .. } => Some(TypeTag::Class(id.0)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::I32 => f.write_str("int"),
            TypeRef::I64 => f.write_str("long"),
            TypeRef::F64 => f.write_str("double"),
            TypeRef::Str => f.write_str("string"),
            TypeRef::Object => f.write_str("object"),
            TypeRef::Null => f.write_str("null"),
            TypeRef::Class { name, .. } | TypeRef::Enum { name, .. } => f.write_str(name),
        }
    }
}

/// Type-level attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeAttributes {
    pub is_public: bool,
    pub is_abstract: bool,
    /// Cannot be used as a base type
    pub is_sealed: bool,
    pub is_interface: bool,
}

impl TypeAttributes {
    pub fn public() -> Self {
        Self {
            is_public: true,
            ..Self::default()
        }
    }

    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn as_sealed(mut self) -> Self {
        self.is_sealed = true;
        self
    }

    /// Interfaces are implicitly abstract
    pub fn as_interface(mut self) -> Self {
        self.is_interface = true;
        self.is_abstract = true;
        self
    }
}

/// Method and constructor attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodAttributes {
    pub is_public: bool,
    pub is_static: bool,
    pub is_abstract: bool,
}

impl MethodAttributes {
    pub fn public() -> Self {
        Self {
            is_public: true,
            ..Self::default()
        }
    }

    pub fn private() -> Self {
        Self::default()
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

/// Field attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldAttributes {
    pub is_public: bool,
    pub is_static: bool,
    /// Assignable only inside constructors of the declaring type
    pub is_readonly: bool,
}

impl FieldAttributes {
    pub fn public() -> Self {
        Self {
            is_public: true,
            ..Self::default()
        }
    }

    pub fn private() -> Self {
        Self::default()
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn as_readonly(mut self) -> Self {
        self.is_readonly = true;
        self
    }
}

/// Relational operator of a branch condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl Comparison {
    /// Every comparison kind
    pub const ALL: [Comparison; 6] = [
        Comparison::Equal,
        Comparison::NotEqual,
        Comparison::LessThan,
        Comparison::LessOrEqual,
        Comparison::GreaterThan,
        Comparison::GreaterOrEqual,
    ];

    /// The comparison that holds exactly when `self` does not
    pub fn negated(self) -> Self {
        match self {
            Comparison::Equal => Comparison::NotEqual,
            Comparison::NotEqual => Comparison::Equal,
            Comparison::LessThan => Comparison::GreaterOrEqual,
            Comparison::LessOrEqual => Comparison::GreaterThan,
            Comparison::GreaterThan => Comparison::LessOrEqual,
            Comparison::GreaterOrEqual => Comparison::LessThan,
        }
    }

    /// Compare-and-branch opcode taken when the comparison holds
    pub fn branch_opcode(self) -> Opcode {
        match self {
            Comparison::Equal => Opcode::BrEq,
            Comparison::NotEqual => Opcode::BrNe,
            Comparison::LessThan => Opcode::BrLt,
            Comparison::LessOrEqual => Opcode::BrLe,
            Comparison::GreaterThan => Opcode::BrGt,
            Comparison::GreaterOrEqual => Opcode::BrGe,
        }
    }

    /// Opcode that branches to the skip target when the comparison fails
    ///
    /// Ordered comparisons use the branch-unless family so that unordered
    /// operands (NaN) also skip the guarded block.
    pub fn failure_branch(self) -> Opcode {
        match self {
            Comparison::Equal => Opcode::BrNe,
            Comparison::NotEqual => Opcode::BrEq,
            Comparison::LessThan => Opcode::BrNlt,
            Comparison::LessOrEqual => Opcode::BrNle,
            Comparison::GreaterThan => Opcode::BrNgt,
            Comparison::GreaterOrEqual => Opcode::BrNge,
        }
    }

    /// Only equality applies to non-numeric operands
    pub fn is_equality(self) -> bool {
        matches!(self, Comparison::Equal | Comparison::NotEqual)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_branch_is_negation() {
        assert_eq!(Comparison::LessThan.failure_branch(), Opcode::BrNlt);
        assert_eq!(Comparison::GreaterOrEqual.failure_branch(), Opcode::BrNge);
        assert_eq!(Comparison::Equal.failure_branch(), Opcode::BrNe);
        assert_eq!(Comparison::NotEqual.failure_branch(), Opcode::BrEq);
        for cmp in Comparison::ALL {
            assert_eq!(cmp.negated().negated(), cmp);
        }
    }

    #[test]
    fn test_widening_table() {
        assert_eq!(TypeRef::I32.widening_to(&TypeRef::I64), Some(Opcode::I2L));
        assert_eq!(TypeRef::I32.widening_to(&TypeRef::F64), Some(Opcode::I2F));
        assert_eq!(TypeRef::I64.widening_to(&TypeRef::F64), Some(Opcode::L2F));
        assert_eq!(TypeRef::F64.widening_to(&TypeRef::I32), None);
        assert_eq!(
            TypeRef::common_numeric(&TypeRef::I32, &TypeRef::F64),
            Some(TypeRef::F64)
        );
        assert_eq!(TypeRef::common_numeric(&TypeRef::I32, &TypeRef::Str), None);
    }

    #[test]
    fn test_value_and_reference_types() {
        let class = TypeRef::Class {
            id: TypeId(0),
            name: Rc::from("Counter"),
        };
        assert!(class.is_reference());
        assert!(!class.is_value_type());
        assert!(TypeRef::Bool.is_value_type());
        assert!(!TypeRef::Void.is_value_type() && !TypeRef::Void.is_reference());
        assert_eq!(class.to_string(), "Counter");
        assert_eq!(TypeRef::I64.to_string(), "long");
    }

    #[test]
    fn test_attribute_builders() {
        let attrs = TypeAttributes::public().as_interface();
        assert!(attrs.is_interface && attrs.is_abstract);
        let field = FieldAttributes::private().as_static().as_readonly();
        assert!(field.is_static && field.is_readonly && !field.is_public);
    }
}
