//! Module container
//!
//! Owns every definition arena, the module-wide constant pool and the name
//! counter used for generated locals. `create()` finalizes all method bodies,
//! materializes types in dependency order and assembles the bytecode
//! [`bytecode::Module`], optionally writing it to disk.

use crate::bytecode::{self, ClassDef, ConstantPool, FieldInfo, Function, ModuleKind};
use crate::command::{CallTarget, Coercion, TypeHierarchy};
use crate::config::EmitOptions;
use crate::error::{require_name, EmitError, EmitResult};
use crate::method::{MethodBuilder, MethodDef, CONSTRUCTOR_NAME};
use crate::type_def::{EnumBuilder, EnumDef, FieldDef, PropertyDef, TypeBuilder, TypeDef};
use crate::types::{EnumId, FieldId, MethodId, PropertyId, TypeAttributes, TypeId, TypeRef};
use crate::variable::{ConstValue, Variable};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A module under construction
#[derive(Debug)]
pub struct Module {
    name: String,
    options: EmitOptions,
    pub(crate) types: Vec<TypeDef>,
    pub(crate) enums: Vec<EnumDef>,
    pub(crate) methods: Vec<MethodDef>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) properties: Vec<PropertyDef>,
    pub(crate) constants: ConstantPool,
    /// Session counter for generated names
    next_name_id: usize,
    entry_point: Option<MethodId>,
    created: Option<Arc<bytecode::Module>>,
}

impl Module {
    /// Library module, written to `output_dir` on `create()` when given
    pub fn new(name: &str, output_dir: Option<PathBuf>) -> Self {
        let options = EmitOptions {
            output_dir,
            ..EmitOptions::default()
        };
        Self::with_options(name, options)
    }

    pub fn with_options(name: &str, options: EmitOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            types: Vec::new(),
            enums: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            constants: ConstantPool::new(),
            next_name_id: 0,
            entry_point: None,
            created: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    pub fn kind(&self) -> ModuleKind {
        self.options.kind
    }

    pub fn entry_point(&self) -> Option<MethodId> {
        self.entry_point
    }

    /// Whether `create()` has succeeded
    pub fn is_created(&self) -> bool {
        self.created.is_some()
    }

    /// Path `create()` writes to, if an output directory is configured
    pub fn output_path(&self) -> Option<PathBuf> {
        self.options
            .output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", self.name, self.kind().extension())))
    }

    pub(crate) fn ensure_open(&self) -> EmitResult<()> {
        if self.created.is_some() {
            return Err(EmitError::ModuleSealed(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn next_temp_name(&mut self, prefix: &str) -> String {
        self.next_name_id += 1;
        format!("__{}{}", prefix, self.next_name_id)
    }

    fn ensure_new_type_name(&self, name: &str) -> EmitResult<()> {
        let taken = self.types.iter().any(|t| &*t.name == name)
            || self.enums.iter().any(|e| &*e.name == name);
        if taken {
            return Err(EmitError::DuplicateMember {
                owner: self.name.clone(),
                member: name.to_string(),
            });
        }
        Ok(())
    }

    // ===== Definitions =====

    /// Define a class or interface
    pub fn define_type(
        &mut self,
        name: &str,
        attrs: TypeAttributes,
        base: Option<TypeId>,
        interfaces: &[TypeId],
    ) -> EmitResult<TypeId> {
        self.ensure_open()?;
        require_name("type", name)?;
        self.ensure_new_type_name(name)?;

        if let Some(base) = base {
            let base_def = self.type_def(base)?;
            if base_def.attrs.is_interface || base_def.attrs.is_sealed {
                return Err(EmitError::InvalidArgument(format!(
                    "'{}' cannot be used as a base type",
                    base_def.name
                )));
            }
            if attrs.is_interface {
                return Err(EmitError::InvalidArgument(format!(
                    "interface '{}' cannot have a base type",
                    name
                )));
            }
        }
        for iface in interfaces {
            let iface_def = self.type_def(*iface)?;
            if !iface_def.attrs.is_interface {
                return Err(EmitError::InvalidArgument(format!(
                    "'{}' is not an interface",
                    iface_def.name
                )));
            }
        }

        let id = TypeId(self.types.len() as u32);
        self.types
            .push(TypeDef::new(id, name, attrs, base, interfaces.to_vec()));
        debug!(module = %self.name, ty = name, "defined type");
        Ok(id)
    }

    /// Member builder for an open type
    pub fn ty(&mut self, id: TypeId) -> EmitResult<TypeBuilder<'_>> {
        self.type_def(id)?;
        Ok(TypeBuilder::new(self, id))
    }

    /// Define an enum with an i32 underlying type
    pub fn define_enum(&mut self, name: &str) -> EmitResult<EnumId> {
        self.ensure_open()?;
        require_name("enum", name)?;
        self.ensure_new_type_name(name)?;
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(EnumDef {
            id,
            name: name.into(),
            members: Vec::new(),
            created: None,
        });
        Ok(id)
    }

    pub fn enumeration(&mut self, id: EnumId) -> EmitResult<EnumBuilder<'_>> {
        self.enum_def(id)?;
        Ok(EnumBuilder::new(self, id))
    }

    /// Typed constant for an enum member
    pub fn enum_constant(&self, id: EnumId, member: &str) -> EmitResult<Variable> {
        let def = self.enum_def(id)?;
        let value = def
            .members
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| *value)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "enum member",
                name: format!("{}.{}", def.name, member),
            })?;
        Ok(Variable::constant(ConstValue::Enum {
            ty: def.type_ref(),
            member: member.into(),
            value,
        }))
    }

    /// Body builder for a method or constructor
    pub fn method(&mut self, id: MethodId) -> EmitResult<MethodBuilder<'_>> {
        if self.method_def(id).is_none() {
            return Err(EmitError::UnknownMember {
                kind: "method",
                name: format!("#{}", id.index()),
            });
        }
        Ok(MethodBuilder::new(self, id))
    }

    /// Static method invoked by `run_entry_point`
    pub fn set_entry_point(&mut self, method: MethodId) -> EmitResult<()> {
        self.ensure_open()?;
        let def = self.method_def(method).ok_or_else(|| EmitError::UnknownMember {
            kind: "method",
            name: format!("#{}", method.index()),
        })?;
        if !def.attrs.is_static || def.is_constructor {
            return Err(EmitError::InvalidArgument(format!(
                "entry point '{}' must be a static method",
                def.signature()
            )));
        }
        self.entry_point = Some(method);
        Ok(())
    }

    // ===== Lookups =====

    pub(crate) fn type_def(&self, id: TypeId) -> EmitResult<&TypeDef> {
        self.types
            .get(id.index() as usize)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "type",
                name: format!("#{}", id.index()),
            })
    }

    fn enum_def(&self, id: EnumId) -> EmitResult<&EnumDef> {
        self.enums
            .get(id.index() as usize)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "enum",
                name: format!("#{}", id.index()),
            })
    }

    pub fn method_def(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.get(id.index() as usize)
    }

    pub fn field_def(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.index() as usize)
    }

    pub fn property_def(&self, id: PropertyId) -> Option<&PropertyDef> {
        self.properties.get(id.index() as usize)
    }

    /// Type by name
    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types.iter().find(|t| &*t.name == name).map(|t| t.id)
    }

    /// Static type for a defined class or interface
    pub fn type_ref(&self, id: TypeId) -> EmitResult<TypeRef> {
        Ok(self.type_def(id)?.type_ref())
    }

    /// Static type for a defined enum
    pub fn enum_ref(&self, id: EnumId) -> EmitResult<TypeRef> {
        Ok(self.enum_def(id)?.type_ref())
    }

    /// The type followed by its base chain
    fn ancestors(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(ty) = current {
            match self.types.get(ty.index() as usize) {
                Some(def) => {
                    chain.push(ty);
                    current = def.base;
                }
                None => break,
            }
        }
        chain
    }

    /// Field declared on the type or an ancestor
    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.ancestors(ty).into_iter().find_map(|t| {
            self.types[t.index() as usize]
                .fields
                .iter()
                .copied()
                .find(|f| self.fields[f.index() as usize].name == name)
        })
    }

    /// Property declared on the type or an ancestor
    pub fn find_property(&self, ty: TypeId, name: &str) -> Option<PropertyId> {
        self.ancestors(ty).into_iter().find_map(|t| {
            self.types[t.index() as usize]
                .properties
                .iter()
                .copied()
                .find(|p| self.properties[p.index() as usize].name == name)
        })
    }

    /// Method by name and argument types, searching the type, its bases, then its interfaces
    pub fn find_method(&self, ty: TypeId, name: &str, arg_types: &[TypeRef]) -> Option<MethodId> {
        for t in self.ancestors(ty) {
            let def = &self.types[t.index() as usize];
            let candidates: Vec<MethodId> = def
                .methods
                .iter()
                .copied()
                .filter(|m| self.methods[m.index() as usize].name == name)
                .collect();
            if let Some(found) = self.resolve_overload(&candidates, arg_types) {
                return Some(found);
            }
            for iface in &def.interfaces {
                if let Some(found) = self.find_method(*iface, name, arg_types) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Constructor declared on the type itself
    pub fn find_constructor(&self, ty: TypeId, arg_types: &[TypeRef]) -> Option<MethodId> {
        let def = self.types.get(ty.index() as usize)?;
        self.resolve_overload(&def.constructors, arg_types)
    }

    /// Exact signature match first, then the first overload reachable through implicit conversions
    fn resolve_overload(&self, candidates: &[MethodId], arg_types: &[TypeRef]) -> Option<MethodId> {
        let params_of = |m: &MethodId| &self.methods[m.index() as usize].params;
        let arity_matches = |m: &&MethodId| params_of(*m).len() == arg_types.len();

        let exact = candidates
            .iter()
            .filter(arity_matches)
            .find(|m| params_of(*m).iter().zip(arg_types).all(|(p, a)| p.ty == *a));
        if let Some(found) = exact {
            return Some(*found);
        }
        candidates
            .iter()
            .filter(arity_matches)
            .find(|m| {
                params_of(*m).iter().zip(arg_types).all(|(p, a)| {
                    Coercion::select(a, &p.ty, self).is_ok_and(|c| c.is_implicit())
                })
            })
            .copied()
    }

    pub(crate) fn call_target(&self, id: MethodId) -> EmitResult<CallTarget> {
        let def = self.method_def(id).ok_or_else(|| EmitError::UnknownMember {
            kind: "method",
            name: format!("#{}", id.index()),
        })?;
        Ok(CallTarget {
            method: id,
            owner: self.type_def(def.owner)?.type_ref(),
            name: if def.is_constructor {
                CONSTRUCTOR_NAME.to_string()
            } else {
                def.name.clone()
            },
            params: def.param_types(),
            return_type: def.return_type.clone(),
            is_static: def.attrs.is_static,
            is_constructor: def.is_constructor,
        })
    }

    // ===== Materialization =====

    /// Seal a type and build its class table entry; bases and interfaces first
    #[tracing::instrument(skip(self), fields(module = %self.name))]
    pub fn create_type(&mut self, id: TypeId) -> EmitResult<Arc<ClassDef>> {
        let def = self.type_def(id)?;
        if let Some(created) = &def.created {
            return Ok(created.clone());
        }
        if def.is_empty() {
            return Err(EmitError::EmptyType(def.name.to_string()));
        }

        let dependencies: Vec<TypeId> = def.base.iter().chain(def.interfaces.iter()).copied().collect();
        let members: Vec<MethodId> = def
            .constructors
            .iter()
            .chain(def.methods.iter())
            .copied()
            .collect();

        for dependency in dependencies {
            self.create_type(dependency)?;
        }
        for member in members {
            self.methods[member.index() as usize].finalize()?;
        }

        let def = &self.types[id.index() as usize];
        let class = Arc::new(def.materialize(&self.methods, &self.properties));
        debug!(
            ty = %def.name,
            fields = class.fields.len(),
            methods = class.methods.len(),
            constructors = class.constructors.len(),
            "materialized type"
        );
        self.types[id.index() as usize].created = Some(class.clone());
        Ok(class)
    }

    /// Finalize everything and produce the bytecode module
    ///
    /// Repeated calls return the same `Arc` without rebuilding or rewriting.
    #[tracing::instrument(skip(self), fields(module = %self.name))]
    pub fn create(&mut self) -> EmitResult<Arc<bytecode::Module>> {
        if let Some(created) = &self.created {
            return Ok(created.clone());
        }
        if self.types.is_empty() && self.enums.is_empty() {
            return Err(EmitError::EmptyModule(self.name.clone()));
        }
        if self.kind() == ModuleKind::Executable && self.entry_point.is_none() {
            return Err(EmitError::MissingEntryPoint(self.name.clone()));
        }

        let enums: Vec<_> = self.enums.iter_mut().map(EnumDef::materialize).collect();
        let mut classes = Vec::with_capacity(self.types.len());
        for index in 0..self.types.len() {
            classes.push(self.create_type(TypeId(index as u32))?);
        }

        let mut functions = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            let body = method.body().ok_or_else(|| {
                EmitError::InvalidOperation(format!("method '{}' was not finalized", method.signature()))
            })?;
            functions.push(Function {
                name: method.name.clone(),
                owner: Some(method.owner.index()),
                flags: method.flags(),
                param_count: method.param_count(),
                param_kinds: method.params.iter().map(|p| p.ty.value_kind()).collect(),
                local_count: body.local_count,
                code: body.code.clone(),
                handlers: body.handlers.clone(),
            });
        }

        let fields = self
            .fields
            .iter()
            .map(|f| FieldInfo {
                name: f.name.clone(),
                owner: f.owner.index(),
                kind: f.ty.value_kind(),
                is_static: f.attrs.is_static,
            })
            .collect();

        let mut module = bytecode::Module::new(self.name.clone(), self.kind());
        module.entry_point = self.entry_point.map(MethodId::index);
        module.constants = self.constants.clone();
        module.functions = functions;
        module.classes = classes;
        module.fields = fields;
        module.enums = enums;
        if self.options.debug_listing {
            module.listing = Some(self.to_string());
        }

        // Header: magic, version, flags, crc32, then the SHA-256 of the payload
        let bytes = module.encode();
        module.checksum.copy_from_slice(&bytes[16..48]);

        if let Some(path) = self.output_path() {
            write_module(&path, &bytes)?;
            info!(path = %path.display(), bytes = bytes.len(), "wrote module");
        }

        info!(
            classes = module.classes.len(),
            functions = module.functions.len(),
            checksum = %module.checksum_hex(),
            "created module"
        );
        let module = Arc::new(module);
        self.created = Some(module.clone());
        Ok(module)
    }
}

fn write_module(path: &Path, bytes: &[u8]) -> EmitResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

impl TypeHierarchy for Module {
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        self.ancestors(sub).into_iter().any(|t| {
            t == sup
                || self.types[t.index() as usize]
                    .interfaces
                    .iter()
                    .any(|iface| self.is_subtype(*iface, sup))
        })
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind() {
            ModuleKind::Library => "library",
            ModuleKind::Executable => "executable",
        };
        writeln!(f, "// module {} ({})", self.name, kind)?;
        for def in &self.enums {
            writeln!(f)?;
            def.render(f)?;
        }
        for def in &self.types {
            writeln!(f)?;
            def.render(self, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldAttributes, MethodAttributes};

    #[test]
    fn test_empty_module_and_type() {
        let mut module = Module::new("empty", None);
        assert!(matches!(module.create(), Err(EmitError::EmptyModule(_))));

        let id = module
            .define_type("Nothing", TypeAttributes::public(), None, &[])
            .unwrap();
        assert!(matches!(module.create_type(id), Err(EmitError::EmptyType(_))));
    }

    #[test]
    fn test_base_type_rules() {
        let mut module = Module::new("m", None);
        let sealed = module
            .define_type("Final", TypeAttributes::public().as_sealed(), None, &[])
            .unwrap();
        let iface = module
            .define_type("IThing", TypeAttributes::public().as_interface(), None, &[])
            .unwrap();
        assert!(module
            .define_type("A", TypeAttributes::public(), Some(sealed), &[])
            .is_err());
        assert!(module
            .define_type("B", TypeAttributes::public(), Some(iface), &[])
            .is_err());
        assert!(module
            .define_type("C", TypeAttributes::public(), None, &[sealed])
            .is_err());
        assert!(module
            .define_type("D", TypeAttributes::public(), None, &[iface])
            .is_ok());
        assert!(matches!(
            module.define_type("D", TypeAttributes::public(), None, &[]),
            Err(EmitError::DuplicateMember { .. })
        ));
    }

    #[test]
    fn test_subtype_queries() {
        let mut module = Module::new("m", None);
        let iface = module
            .define_type("IShape", TypeAttributes::public().as_interface(), None, &[])
            .unwrap();
        let base = module
            .define_type("Shape", TypeAttributes::public(), None, &[iface])
            .unwrap();
        let derived = module
            .define_type("Circle", TypeAttributes::public(), Some(base), &[])
            .unwrap();
        assert!(module.is_subtype(derived, base));
        assert!(module.is_subtype(derived, iface));
        assert!(!module.is_subtype(base, derived));
    }

    #[test]
    fn test_overload_resolution_prefers_exact() {
        let mut module = Module::new("m", None);
        let id = module
            .define_type("Math", TypeAttributes::public(), None, &[])
            .unwrap();
        let attrs = MethodAttributes::public().as_static();
        let (wide, narrow) = {
            let mut ty = module.ty(id).unwrap();
            (
                ty.define_method("Abs", attrs, TypeRef::F64, &[("x", TypeRef::F64)])
                    .unwrap(),
                ty.define_method("Abs", attrs, TypeRef::I32, &[("x", TypeRef::I32)])
                    .unwrap(),
            )
        };
        assert_eq!(module.find_method(id, "Abs", &[TypeRef::I32]), Some(narrow));
        assert_eq!(module.find_method(id, "Abs", &[TypeRef::F64]), Some(wide));
        assert_eq!(module.find_method(id, "Abs", &[TypeRef::I64]), Some(wide));
        assert_eq!(module.find_method(id, "Abs", &[TypeRef::Str]), None);
    }

    #[test]
    fn test_entry_point_must_be_static() {
        let mut module = Module::new("m", None);
        let id = module
            .define_type("App", TypeAttributes::public(), None, &[])
            .unwrap();
        let instance = module
            .ty(id)
            .unwrap()
            .define_method("Run", MethodAttributes::public(), TypeRef::Void, &[])
            .unwrap();
        assert!(module.set_entry_point(instance).is_err());
    }

    #[test]
    fn test_missing_entry_point() {
        let options = EmitOptions::default().with_kind(ModuleKind::Executable);
        let mut module = Module::with_options("app", options);
        let id = module
            .define_type("App", TypeAttributes::public(), None, &[])
            .unwrap();
        module
            .ty(id)
            .unwrap()
            .define_field("x", TypeRef::I32, FieldAttributes::public().as_static())
            .unwrap();
        assert!(matches!(
            module.create(),
            Err(EmitError::MissingEntryPoint(_))
        ));
    }

    #[test]
    fn test_module_sealed_after_create() {
        let mut module = Module::new("m", None);
        let color = module.define_enum("Color").unwrap();
        module
            .enumeration(color)
            .unwrap()
            .define_member("Red", 0)
            .unwrap();
        module.create().unwrap();
        assert!(matches!(
            module.define_type("Late", TypeAttributes::public(), None, &[]),
            Err(EmitError::ModuleSealed(_))
        ));
    }
}
