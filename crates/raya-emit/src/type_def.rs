//! Type, field, property and enum definitions
//!
//! A [`TypeDef`] is open while members are added through a [`TypeBuilder`]
//! and sealed once it has been materialized into a [`ClassDef`].

use crate::bytecode::{ClassDef, EnumInfo, Method, PropertyEntry};
use crate::error::{require_name, EmitError, EmitResult};
use crate::method::{MethodDef, ParamDef, CONSTRUCTOR_NAME};
use crate::module::Module;
use crate::types::{
    EnumId, FieldAttributes, FieldId, MethodAttributes, MethodId, PropertyId, TypeAttributes,
    TypeId, TypeRef,
};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Class or interface definition
#[derive(Debug)]
pub struct TypeDef {
    pub(crate) id: TypeId,
    pub(crate) name: Rc<str>,
    pub(crate) attrs: TypeAttributes,
    pub(crate) base: Option<TypeId>,
    pub(crate) interfaces: Vec<TypeId>,
    pub(crate) fields: Vec<FieldId>,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) methods: Vec<MethodId>,
    pub(crate) constructors: Vec<MethodId>,
    pub(crate) created: Option<Arc<ClassDef>>,
}

impl TypeDef {
    pub(crate) fn new(
        id: TypeId,
        name: &str,
        attrs: TypeAttributes,
        base: Option<TypeId>,
        interfaces: Vec<TypeId>,
    ) -> Self {
        Self {
            id,
            name: Rc::from(name),
            attrs,
            base,
            interfaces,
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            created: None,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> TypeAttributes {
        self.attrs
    }

    pub fn base(&self) -> Option<TypeId> {
        self.base
    }

    pub fn interfaces(&self) -> &[TypeId] {
        &self.interfaces
    }

    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    pub fn constructors(&self) -> &[MethodId] {
        &self.constructors
    }

    /// Materialized types accept no further members
    pub fn is_sealed(&self) -> bool {
        self.created.is_some()
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::Class {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.properties.is_empty()
            && self.methods.is_empty()
            && self.constructors.is_empty()
    }

    /// Class table entry; member bodies must already be finalized
    pub(crate) fn materialize(&self, methods: &[MethodDef], properties: &[PropertyDef]) -> ClassDef {
        ClassDef {
            name: self.name.to_string(),
            parent_id: self.base.map(TypeId::index),
            interfaces: self.interfaces.iter().map(|i| i.index()).collect(),
            is_interface: self.attrs.is_interface,
            is_abstract: self.attrs.is_abstract,
            fields: self.fields.iter().map(|f| f.index()).collect(),
            methods: self
                .methods
                .iter()
                .map(|m| Method {
                    name: methods[m.index() as usize].name.clone(),
                    function_id: m.index(),
                })
                .collect(),
            constructors: self.constructors.iter().map(|c| c.index()).collect(),
            properties: self
                .properties
                .iter()
                .map(|p| {
                    let prop = &properties[p.index() as usize];
                    PropertyEntry {
                        name: prop.name.clone(),
                        getter: prop.getter.map(MethodId::index),
                        setter: prop.setter.map(MethodId::index),
                    }
                })
                .collect(),
        }
    }

    /// Pseudo-source of the whole type
    pub(crate) fn render(&self, module: &Module, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header = String::new();
        if self.attrs.is_public {
            header.push_str("public ");
        }
        if self.attrs.is_interface {
            header.push_str("interface ");
        } else {
            if self.attrs.is_abstract {
                header.push_str("abstract ");
            }
            if self.attrs.is_sealed {
                header.push_str("sealed ");
            }
            header.push_str("class ");
        }
        header.push_str(&self.name);

        let supertypes: Vec<&str> = self
            .base
            .iter()
            .chain(self.interfaces.iter())
            .map(|id| module.types[id.index() as usize].name.as_ref())
            .collect();
        if !supertypes.is_empty() {
            header.push_str(" : ");
            header.push_str(&supertypes.join(", "));
        }
        writeln!(f, "{} {{", header)?;

        for field in &self.fields {
            let field = &module.fields[field.index() as usize];
            writeln!(f, "    {};", field.declaration())?;
        }
        for property in &self.properties {
            let property = &module.properties[property.index() as usize];
            let mut accessors = String::new();
            if property.getter.is_some() {
                accessors.push_str("get; ");
            }
            if property.setter.is_some() {
                accessors.push_str("set; ");
            }
            writeln!(f, "    {} {} {{ {}}}", property.ty, property.name, accessors)?;
        }
        for ctor in &self.constructors {
            module.methods[ctor.index() as usize].render(f, 1, &self.name)?;
        }
        for method in &self.methods {
            let method = &module.methods[method.index() as usize];
            if !method.synthesized {
                method.render(f, 1, &self.name)?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Field definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) id: FieldId,
    pub(crate) owner: TypeId,
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    pub(crate) attrs: FieldAttributes,
}

impl FieldDef {
    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn attributes(&self) -> FieldAttributes {
        self.attrs
    }

    fn declaration(&self) -> String {
        let mut decl = String::from(if self.attrs.is_public { "public " } else { "private " });
        if self.attrs.is_static {
            decl.push_str("static ");
        }
        if self.attrs.is_readonly {
            decl.push_str("readonly ");
        }
        decl.push_str(&format!("{} {}", self.ty, self.name));
        decl
    }
}

/// Property definition; accessors are ordinary methods of the owning type
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub(crate) id: PropertyId,
    pub(crate) owner: TypeId,
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    pub(crate) getter: Option<MethodId>,
    pub(crate) setter: Option<MethodId>,
    /// Backing field of auto-properties
    pub(crate) backing_field: Option<FieldId>,
}

impl PropertyDef {
    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn owner(&self) -> TypeId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn getter(&self) -> Option<MethodId> {
        self.getter
    }

    pub fn setter(&self) -> Option<MethodId> {
        self.setter
    }

    pub fn backing_field(&self) -> Option<FieldId> {
        self.backing_field
    }
}

/// Enum definition (underlying type i32)
#[derive(Debug)]
pub struct EnumDef {
    pub(crate) id: EnumId,
    pub(crate) name: Rc<str>,
    pub(crate) members: Vec<(String, i32)>,
    pub(crate) created: Option<Arc<EnumInfo>>,
}

impl EnumDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[(String, i32)] {
        &self.members
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::Enum {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub(crate) fn materialize(&mut self) -> Arc<EnumInfo> {
        let members = &self.members;
        let name = &self.name;
        self.created
            .get_or_insert_with(|| {
                Arc::new(EnumInfo {
                    name: name.to_string(),
                    members: members.clone(),
                })
            })
            .clone()
    }

    pub(crate) fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "enum {} {{", self.name)?;
        for (member, value) in &self.members {
            writeln!(f, "    {} = {},", member, value)?;
        }
        writeln!(f, "}}")
    }
}

fn check_storage_type(what: &str, name: &str, ty: &TypeRef) -> EmitResult<()> {
    if ty.is_void() || *ty == TypeRef::Null {
        return Err(EmitError::InvalidArgument(format!(
            "{} '{}' cannot have type {}",
            what, name, ty
        )));
    }
    Ok(())
}

fn check_params(params: &[(&str, TypeRef)]) -> EmitResult<Vec<ParamDef>> {
    let mut checked: Vec<ParamDef> = Vec::with_capacity(params.len());
    for (name, ty) in params {
        require_name("parameter", name)?;
        check_storage_type("parameter", name, ty)?;
        if *name == "this" || checked.iter().any(|p| p.name == *name) {
            return Err(EmitError::InvalidArgument(format!(
                "duplicate parameter name '{}'",
                name
            )));
        }
        checked.push(ParamDef {
            name: name.to_string(),
            ty: ty.clone(),
        });
    }
    Ok(checked)
}

// ============================================================================
// Type builder
// ============================================================================

/// Adds members to an open type
pub struct TypeBuilder<'m> {
    module: &'m mut Module,
    id: TypeId,
}

impl<'m> TypeBuilder<'m> {
    pub(crate) fn new(module: &'m mut Module, id: TypeId) -> Self {
        Self { module, id }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn type_ref(&self) -> TypeRef {
        self.def().type_ref()
    }

    fn def(&self) -> &TypeDef {
        &self.module.types[self.id.index() as usize]
    }

    fn def_mut(&mut self) -> &mut TypeDef {
        &mut self.module.types[self.id.index() as usize]
    }

    fn ensure_open(&self) -> EmitResult<()> {
        self.module.ensure_open()?;
        if self.def().is_sealed() {
            return Err(EmitError::TypeSealed(self.def().name.to_string()));
        }
        Ok(())
    }

    fn duplicate(&self, member: impl Into<String>) -> EmitError {
        EmitError::DuplicateMember {
            owner: self.def().name.to_string(),
            member: member.into(),
        }
    }

    /// Fields and properties own their name; methods may only share a name with overloads
    fn ensure_unique(&self, name: &str, is_method: bool) -> EmitResult<()> {
        let def = self.def();
        let module = &*self.module;
        let taken = def
            .fields
            .iter()
            .any(|f| module.fields[f.index() as usize].name == name)
            || def
                .properties
                .iter()
                .any(|p| module.properties[p.index() as usize].name == name)
            || (!is_method
                && def
                    .methods
                    .iter()
                    .any(|m| module.methods[m.index() as usize].name == name));
        if taken {
            return Err(self.duplicate(name));
        }
        Ok(())
    }

    fn ensure_new_signature(&self, members: &[MethodId], name: &str, params: &[ParamDef]) -> EmitResult<()> {
        let clash = members.iter().any(|m| {
            let existing = &self.module.methods[m.index() as usize];
            existing.name == name
                && existing.params.len() == params.len()
                && existing.params.iter().zip(params).all(|(a, b)| a.ty == b.ty)
        });
        if clash {
            let types: Vec<String> = params.iter().map(|p| p.ty.to_string()).collect();
            return Err(self.duplicate(format!("{}({})", name, types.join(", "))));
        }
        Ok(())
    }

    fn push_method(
        &mut self,
        name: &str,
        attrs: MethodAttributes,
        return_type: TypeRef,
        params: Vec<ParamDef>,
        is_constructor: bool,
    ) -> MethodId {
        let id = MethodId(self.module.methods.len() as u32);
        self.module.methods.push(MethodDef::new(
            id,
            self.id,
            name,
            attrs,
            return_type,
            params,
            is_constructor,
        ));
        id
    }

    /// Declare a field
    pub fn define_field(&mut self, name: &str, ty: TypeRef, attrs: FieldAttributes) -> EmitResult<FieldId> {
        self.ensure_open()?;
        require_name("field", name)?;
        check_storage_type("field", name, &ty)?;
        if self.def().attrs.is_interface {
            return Err(EmitError::InvalidArgument(format!(
                "interface '{}' cannot declare field '{}'",
                self.def().name,
                name
            )));
        }
        self.ensure_unique(name, false)?;

        let id = FieldId(self.module.fields.len() as u32);
        debug!(owner = %self.def().name, field = name, ty = %ty, "defined field");
        self.module.fields.push(FieldDef {
            id,
            owner: self.id,
            name: name.to_string(),
            ty,
            attrs,
        });
        self.def_mut().fields.push(id);
        Ok(id)
    }

    /// Declare a method; interface methods are implicitly abstract
    pub fn define_method(
        &mut self,
        name: &str,
        attrs: MethodAttributes,
        return_type: TypeRef,
        params: &[(&str, TypeRef)],
    ) -> EmitResult<MethodId> {
        self.ensure_open()?;
        require_name("method", name)?;
        if name == CONSTRUCTOR_NAME {
            return Err(EmitError::InvalidArgument(
                "constructors are declared with define_constructor".to_string(),
            ));
        }
        if return_type == TypeRef::Null {
            return Err(EmitError::InvalidArgument(format!(
                "method '{}' cannot return the null type",
                name
            )));
        }
        let params = check_params(params)?;

        let mut attrs = attrs;
        let owner = self.def().attrs;
        if owner.is_interface {
            if attrs.is_static {
                return Err(EmitError::InvalidArgument(format!(
                    "interface method '{}' cannot be static",
                    name
                )));
            }
            attrs.is_abstract = true;
        } else if attrs.is_abstract && !owner.is_abstract {
            return Err(EmitError::InvalidArgument(format!(
                "abstract method '{}' requires an abstract type",
                name
            )));
        }
        if attrs.is_abstract && attrs.is_static {
            return Err(EmitError::InvalidArgument(format!(
                "method '{}' cannot be both static and abstract",
                name
            )));
        }
        self.ensure_unique(name, true)?;
        self.ensure_new_signature(&self.def().methods, name, &params)?;

        let id = self.push_method(name, attrs, return_type, params, false);
        self.def_mut().methods.push(id);
        debug!(
            owner = %self.def().name,
            method = %self.module.methods[id.index() as usize].signature(),
            "defined method"
        );
        Ok(id)
    }

    /// Declare an instance constructor
    pub fn define_constructor(
        &mut self,
        attrs: MethodAttributes,
        params: &[(&str, TypeRef)],
    ) -> EmitResult<MethodId> {
        self.ensure_open()?;
        let def = self.def();
        if def.attrs.is_interface {
            return Err(EmitError::InvalidArgument(format!(
                "interface '{}' cannot declare constructors",
                def.name
            )));
        }
        if attrs.is_static || attrs.is_abstract {
            return Err(EmitError::InvalidArgument(
                "constructors cannot be static or abstract".to_string(),
            ));
        }
        let params = check_params(params)?;
        self.ensure_new_signature(&self.def().constructors, CONSTRUCTOR_NAME, &params)?;

        let id = self.push_method(CONSTRUCTOR_NAME, attrs, TypeRef::Void, params, true);
        self.def_mut().constructors.push(id);
        Ok(id)
    }

    /// Parameterless constructor that chains to the base's parameterless constructor
    ///
    /// A base type whose constructors all take parameters cannot be chained to.
    pub fn define_default_constructor(&mut self, attrs: MethodAttributes) -> EmitResult<MethodId> {
        self.ensure_open()?;
        let mut chains = false;
        if let Some(base) = self.def().base {
            chains = self.module.find_constructor(base, &[]).is_some();
            let base_def = self.module.type_def(base)?;
            if !chains && !base_def.constructors.is_empty() {
                return Err(EmitError::UnknownMember {
                    kind: "constructor",
                    name: format!("{}()", base_def.name),
                });
            }
        }

        let id = self.define_constructor(attrs, &[])?;
        if chains {
            self.module.method(id)?.call_base_constructor(&[])?;
        }
        Ok(id)
    }

    /// Declare a property over existing accessor methods of this type
    pub fn define_property(
        &mut self,
        name: &str,
        ty: TypeRef,
        getter: Option<MethodId>,
        setter: Option<MethodId>,
    ) -> EmitResult<PropertyId> {
        self.ensure_open()?;
        require_name("property", name)?;
        check_storage_type("property", name, &ty)?;
        self.ensure_unique(name, false)?;
        if getter.is_none() && setter.is_none() {
            return Err(EmitError::InvalidArgument(format!(
                "property '{}' needs a getter or a setter",
                name
            )));
        }

        if let Some(getter) = getter {
            let method = self.accessor(getter, name)?;
            if !method.params.is_empty() {
                return Err(EmitError::InvalidArgument(format!(
                    "getter of '{}' must take no parameters",
                    name
                )));
            }
            if method.return_type != ty {
                return Err(EmitError::mismatch(&ty, &method.return_type));
            }
        }
        if let Some(setter) = setter {
            let method = self.accessor(setter, name)?;
            match method.params.as_slice() {
                [value] if value.ty == ty => {}
                [value] => return Err(EmitError::mismatch(&ty, &value.ty)),
                _ => {
                    return Err(EmitError::InvalidArgument(format!(
                        "setter of '{}' must take exactly one parameter",
                        name
                    )))
                }
            }
            if !method.return_type.is_void() {
                return Err(EmitError::mismatch(TypeRef::Void, &method.return_type));
            }
        }

        let id = PropertyId(self.module.properties.len() as u32);
        self.module.properties.push(PropertyDef {
            id,
            owner: self.id,
            name: name.to_string(),
            ty,
            getter,
            setter,
            backing_field: None,
        });
        self.def_mut().properties.push(id);
        Ok(id)
    }

    fn accessor(&self, id: MethodId, property: &str) -> EmitResult<&MethodDef> {
        let method = self.module.method_def(id).ok_or_else(|| EmitError::UnknownMember {
            kind: "method",
            name: format!("#{}", id.index()),
        })?;
        if method.owner != self.id || method.is_constructor || method.attrs.is_static {
            return Err(EmitError::InvalidArgument(format!(
                "accessor '{}' of '{}' must be an instance method of '{}'",
                method.name,
                property,
                self.def().name
            )));
        }
        Ok(method)
    }

    /// Property with a private backing field and generated `get_`/`set_` accessors
    ///
    /// Either all three members are added or none are.
    pub fn define_auto_property(&mut self, name: &str, ty: TypeRef) -> EmitResult<PropertyId> {
        self.ensure_open()?;
        require_name("property", name)?;
        check_storage_type("property", name, &ty)?;
        self.ensure_unique(name, false)?;

        let mark = self.mark();
        self.generate_auto_property(name, ty).map_err(|err| {
            self.rollback(mark);
            err
        })
    }

    fn generate_auto_property(&mut self, name: &str, ty: TypeRef) -> EmitResult<PropertyId> {
        let field = self.define_field(
            &format!("<{}>k__BackingField", name),
            ty.clone(),
            FieldAttributes::private(),
        )?;
        let getter = self.define_method(&format!("get_{}", name), MethodAttributes::public(), ty.clone(), &[])?;
        let setter = self.define_method(
            &format!("set_{}", name),
            MethodAttributes::public(),
            TypeRef::Void,
            &[("value", ty.clone())],
        )?;

        let slot = field.index();
        self.module.methods[getter.index() as usize].emit_synthesized(|e| {
            e.emit_load_local(0)?;
            e.emit_load_field(slot)?;
            e.emit_return()
        })?;
        self.module.methods[setter.index() as usize].emit_synthesized(|e| {
            e.emit_load_local(0)?;
            e.emit_load_local(1)?;
            e.emit_store_field(slot)?;
            e.emit_return_void()
        })?;

        let id = self.define_property(name, ty, Some(getter), Some(setter))?;
        self.module.properties[id.index() as usize].backing_field = Some(field);
        Ok(id)
    }

    fn mark(&self) -> MemberMark {
        let def = self.def();
        MemberMark {
            fields: (self.module.fields.len(), def.fields.len()),
            methods: (self.module.methods.len(), def.methods.len()),
            properties: (self.module.properties.len(), def.properties.len()),
        }
    }

    /// Drop every member added since `mark`; ids are handed out append-only
    fn rollback(&mut self, mark: MemberMark) {
        self.module.fields.truncate(mark.fields.0);
        self.module.methods.truncate(mark.methods.0);
        self.module.properties.truncate(mark.properties.0);
        let def = self.def_mut();
        def.fields.truncate(mark.fields.1);
        def.methods.truncate(mark.methods.1);
        def.properties.truncate(mark.properties.1);
    }
}

/// Member counts (module arena, owning type) at a point in time
#[derive(Debug, Clone, Copy)]
struct MemberMark {
    fields: (usize, usize),
    methods: (usize, usize),
    properties: (usize, usize),
}

// ============================================================================
// Enum builder
// ============================================================================

/// Adds members to an enum
pub struct EnumBuilder<'m> {
    module: &'m mut Module,
    id: EnumId,
}

impl<'m> EnumBuilder<'m> {
    pub(crate) fn new(module: &'m mut Module, id: EnumId) -> Self {
        Self { module, id }
    }

    pub fn id(&self) -> EnumId {
        self.id
    }

    pub fn type_ref(&self) -> TypeRef {
        self.module.enums[self.id.index() as usize].type_ref()
    }

    /// Append a named member
    pub fn define_member(&mut self, name: &str, value: i32) -> EmitResult<()> {
        self.module.ensure_open()?;
        require_name("enum member", name)?;
        let def = &mut self.module.enums[self.id.index() as usize];
        if def.members.iter().any(|(member, _)| member == name) {
            return Err(EmitError::DuplicateMember {
                owner: def.name.to_string(),
                member: name.to_string(),
            });
        }
        def.members.push((name.to_string(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_type() -> (Module, TypeId) {
        let mut module = Module::new("types", None);
        let id = module
            .define_type("Shape", TypeAttributes::public(), None, &[])
            .unwrap();
        (module, id)
    }

    #[test]
    fn test_duplicate_members() {
        let (mut module, id) = module_with_type();
        let mut ty = module.ty(id).unwrap();
        ty.define_field("size", TypeRef::I32, FieldAttributes::public())
            .unwrap();
        assert!(matches!(
            ty.define_field("size", TypeRef::F64, FieldAttributes::public()),
            Err(EmitError::DuplicateMember { .. })
        ));

        let attrs = MethodAttributes::public();
        ty.define_method("Scale", attrs, TypeRef::Void, &[("by", TypeRef::I32)])
            .unwrap();
        ty.define_method("Scale", attrs, TypeRef::Void, &[("by", TypeRef::F64)])
            .unwrap();
        assert!(matches!(
            ty.define_method("Scale", attrs, TypeRef::I32, &[("factor", TypeRef::I32)]),
            Err(EmitError::DuplicateMember { .. })
        ));
        assert!(matches!(
            ty.define_method("size", attrs, TypeRef::Void, &[]),
            Err(EmitError::DuplicateMember { .. })
        ));
    }

    #[test]
    fn test_invalid_arguments() {
        let (mut module, id) = module_with_type();
        let mut ty = module.ty(id).unwrap();
        assert!(matches!(
            ty.define_field("", TypeRef::I32, FieldAttributes::public()),
            Err(EmitError::InvalidArgument(_))
        ));
        assert!(matches!(
            ty.define_method(
                "Bad",
                MethodAttributes::public(),
                TypeRef::Void,
                &[("x", TypeRef::Void)]
            ),
            Err(EmitError::InvalidArgument(_))
        ));
        assert!(matches!(
            ty.define_method(
                "Area",
                MethodAttributes::public().as_abstract(),
                TypeRef::F64,
                &[]
            ),
            Err(EmitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_auto_property_shape() {
        let (mut module, id) = module_with_type();
        let prop = module
            .ty(id)
            .unwrap()
            .define_auto_property("Width", TypeRef::F64)
            .unwrap();

        let def = &module.properties[prop.index() as usize];
        let field = def.backing_field().unwrap();
        assert_eq!(module.fields[field.index() as usize].name(), "<Width>k__BackingField");

        let getter = module.method_def(def.getter().unwrap()).unwrap();
        assert_eq!(getter.name(), "get_Width");
        assert!(getter.is_finalized());
        let setter = module.method_def(def.setter().unwrap()).unwrap();
        assert_eq!(setter.name(), "set_Width");
        assert_eq!(setter.params()[0].ty, TypeRef::F64);
    }

    #[test]
    fn test_auto_property_clash_adds_nothing() {
        let (mut module, id) = module_with_type();
        let mut ty = module.ty(id).unwrap();
        ty.define_method(
            "set_Value",
            MethodAttributes::public(),
            TypeRef::Void,
            &[("v", TypeRef::I32)],
        )
        .unwrap();

        assert!(matches!(
            ty.define_auto_property("Value", TypeRef::I32),
            Err(EmitError::DuplicateMember { .. })
        ));
        let def = &module.types[id.index() as usize];
        assert!(def.fields.is_empty());
        assert!(def.properties.is_empty());
        assert_eq!(def.methods.len(), 1);
        assert_eq!(module.fields.len(), 0);
        assert_eq!(module.methods.len(), 1);
        assert!(module.find_property(id, "Value").is_none());

        // The name is still free for a different member kind
        module
            .ty(id)
            .unwrap()
            .define_field("Value", TypeRef::I32, FieldAttributes::public())
            .unwrap();
        let listing = module.to_string();
        assert!(!listing.contains("k__BackingField"));
        assert!(!listing.contains("get_Value"));
    }

    #[test]
    fn test_default_constructor_requires_parameterless_base() {
        let mut module = Module::new("types", None);
        let base = module
            .define_type("Animal", TypeAttributes::public(), None, &[])
            .unwrap();
        module
            .ty(base)
            .unwrap()
            .define_constructor(MethodAttributes::public(), &[("legs", TypeRef::I32)])
            .unwrap();
        let derived = module
            .define_type("Dog", TypeAttributes::public(), Some(base), &[])
            .unwrap();

        match module
            .ty(derived)
            .unwrap()
            .define_default_constructor(MethodAttributes::public())
        {
            Err(EmitError::UnknownMember { kind, name }) => {
                assert_eq!(kind, "constructor");
                assert_eq!(name, "Animal()");
            }
            other => panic!("expected a missing base constructor, got {:?}", other),
        }
        assert!(module.types[derived.index() as usize].constructors.is_empty());

        // A base without constructors needs no chaining
        let plain = module
            .define_type("Plain", TypeAttributes::public(), None, &[])
            .unwrap();
        let leaf = module
            .define_type("Leaf", TypeAttributes::public(), Some(plain), &[])
            .unwrap();
        module
            .ty(leaf)
            .unwrap()
            .define_default_constructor(MethodAttributes::public())
            .unwrap();
    }

    #[test]
    fn test_property_accessor_validation() {
        let (mut module, id) = module_with_type();
        let mut ty = module.ty(id).unwrap();
        let getter = ty
            .define_method("GetArea", MethodAttributes::public(), TypeRef::I32, &[])
            .unwrap();
        assert!(matches!(
            ty.define_property("Area", TypeRef::F64, Some(getter), None),
            Err(EmitError::TypeMismatch { .. })
        ));
        assert!(ty
            .define_property("Area", TypeRef::I32, Some(getter), None)
            .is_ok());
        assert!(ty.define_property("Other", TypeRef::I32, None, None).is_err());
    }

    #[test]
    fn test_interface_rules() {
        let mut module = Module::new("types", None);
        let iface = module
            .define_type("IShape", TypeAttributes::public().as_interface(), None, &[])
            .unwrap();
        let mut ty = module.ty(iface).unwrap();
        let area = ty
            .define_method("Area", MethodAttributes::public(), TypeRef::F64, &[])
            .unwrap();
        assert!(ty
            .define_field("x", TypeRef::I32, FieldAttributes::public())
            .is_err());
        assert!(ty.define_constructor(MethodAttributes::public(), &[]).is_err());
        assert!(module.method_def(area).unwrap().is_abstract());
    }

    #[test]
    fn test_sealed_type_rejects_members() {
        let (mut module, id) = module_with_type();
        module
            .ty(id)
            .unwrap()
            .define_field("size", TypeRef::I32, FieldAttributes::public())
            .unwrap();
        module.create_type(id).unwrap();
        assert!(matches!(
            module
                .ty(id)
                .unwrap()
                .define_field("other", TypeRef::I32, FieldAttributes::public()),
            Err(EmitError::TypeSealed(_))
        ));
    }

    #[test]
    fn test_enum_members() {
        let mut module = Module::new("types", None);
        let color = module.define_enum("Color").unwrap();
        let mut builder = module.enumeration(color).unwrap();
        builder.define_member("Red", 0).unwrap();
        builder.define_member("Green", 1).unwrap();
        assert!(matches!(
            builder.define_member("Red", 2),
            Err(EmitError::DuplicateMember { .. })
        ));
        let green = module.enum_constant(color, "Green").unwrap();
        assert_eq!(green.to_string(), "Color.Green");
        assert!(module.enum_constant(color, "Blue").is_err());
    }
}
