//! Method and constructor bodies
//!
//! [`MethodDef`] holds a member's signature together with its emitter, the
//! commands emitted so far and the stack of open control-flow blocks.
//! [`MethodBuilder`] is the explicit method context: every operation
//! constructs a [`Command`], emits it immediately and records the code range
//! it produced. A failing operation aborts the method.

use crate::bytecode::function_flags;
use crate::command::{
    Argument, ArithmeticOp, CallTarget, Coercion, Command, Condition, EmittedCommand,
};
use crate::emit::{BytecodeEmitter, EmitContext, EmittedBody, Label};
use crate::error::{require_name, EmitError, EmitResult};
use crate::module::Module;
use crate::types::{Comparison, FieldId, MethodAttributes, MethodId, PropertyId, TypeId, TypeRef};
use crate::variable::{ConstValue, FieldAccess, Local, Parameter, PropertyAccess, Receiver, Variable};
use std::fmt;
use tracing::{debug, warn};

/// Name shared by every constructor
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// Declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodState {
    Open,
    Aborted,
    Finalized,
}

/// Open control-flow block
#[derive(Debug, Clone, Copy)]
enum Block {
    If {
        /// Target of the failed condition; `None` once `Else` was issued
        else_label: Option<Label>,
        final_label: Label,
        has_else: bool,
    },
    While {
        start: Label,
        end: Label,
    },
    Try {
        has_catch: bool,
    },
}

impl Block {
    fn kind(&self) -> &'static str {
        match self {
            Block::If { .. } => "If",
            Block::While { .. } => "While",
            Block::Try { .. } => "Try",
        }
    }

    fn describe(&self) -> String {
        match self {
            Block::If { has_else: true, .. } => "If with Else".to_string(),
            Block::Try { has_catch: false } => "Try without Catch".to_string(),
            other => other.kind().to_string(),
        }
    }
}

fn unbalanced(marker: &'static str, open: Option<&Block>) -> EmitError {
    EmitError::UnbalancedBlock {
        marker,
        open: open.map_or_else(|| "no open block".to_string(), Block::describe),
    }
}

/// Method or constructor definition
#[derive(Debug)]
pub struct MethodDef {
    pub(crate) id: MethodId,
    pub(crate) owner: TypeId,
    pub(crate) name: String,
    pub(crate) attrs: MethodAttributes,
    pub(crate) return_type: TypeRef,
    pub(crate) params: Vec<ParamDef>,
    pub(crate) is_constructor: bool,
    /// Body emitted directly (auto-property accessors)
    pub(crate) synthesized: bool,
    emitter: BytecodeEmitter,
    commands: Vec<EmittedCommand>,
    blocks: Vec<Block>,
    state: MethodState,
    body: Option<EmittedBody>,
}

impl MethodDef {
    pub(crate) fn new(
        id: MethodId,
        owner: TypeId,
        name: &str,
        attrs: MethodAttributes,
        return_type: TypeRef,
        params: Vec<ParamDef>,
        is_constructor: bool,
    ) -> Self {
        let receiver = usize::from(!attrs.is_static);
        Self {
            id,
            owner,
            name: name.to_string(),
            attrs,
            return_type,
            emitter: BytecodeEmitter::new(name, params.len() + receiver),
            params,
            is_constructor,
            synthesized: false,
            commands: Vec::new(),
            blocks: Vec::new(),
            state: MethodState::Open,
            body: None,
        }
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn owner(&self) -> TypeId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> MethodAttributes {
        self.attrs
    }

    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    pub fn is_static(&self) -> bool {
        self.attrs.is_static
    }

    pub fn is_abstract(&self) -> bool {
        self.attrs.is_abstract
    }

    pub fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    pub fn is_aborted(&self) -> bool {
        self.state == MethodState::Aborted
    }

    pub fn is_finalized(&self) -> bool {
        self.state == MethodState::Finalized
    }

    /// Commands in emission order
    pub fn commands(&self) -> &[EmittedCommand] {
        &self.commands
    }

    /// Finished body, available after finalization
    pub fn body(&self) -> Option<&EmittedBody> {
        self.body.as_ref()
    }

    /// Parameter types only
    pub fn param_types(&self) -> Vec<TypeRef> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }

    /// `Name(int, string)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Slot of declared parameter 0
    fn first_param_slot(&self) -> u16 {
        u16::from(!self.attrs.is_static)
    }

    /// Parameters plus the receiver of instance members
    pub(crate) fn param_count(&self) -> usize {
        self.params.len() + usize::from(!self.attrs.is_static)
    }

    pub(crate) fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.attrs.is_static {
            flags |= function_flags::STATIC;
        }
        if self.is_constructor {
            flags |= function_flags::CONSTRUCTOR;
        }
        if self.attrs.is_abstract {
            flags |= function_flags::ABSTRACT;
        }
        if !self.return_type.is_void() {
            flags |= function_flags::RETURNS_VALUE;
        }
        flags
    }

    fn declares_local(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
            || self.emitter.locals().iter().any(|l| l.name == name)
    }

    /// Emit a complete body without commands and seal the method
    pub(crate) fn emit_synthesized(
        &mut self,
        emit: impl FnOnce(&mut BytecodeEmitter) -> EmitResult<()>,
    ) -> EmitResult<()> {
        emit(&mut self.emitter)?;
        self.body = Some(self.emitter.finish()?);
        self.synthesized = true;
        self.state = MethodState::Finalized;
        Ok(())
    }

    /// Close the body: append the implicit return and resolve labels
    pub(crate) fn finalize(&mut self) -> EmitResult<()> {
        match self.state {
            MethodState::Finalized => return Ok(()),
            MethodState::Aborted => return Err(EmitError::MethodAborted(self.signature())),
            MethodState::Open => {}
        }
        if let Some(innermost) = self.blocks.last() {
            return Err(EmitError::UnclosedBlock {
                method: self.signature(),
                count: self.blocks.len(),
                innermost: innermost.kind(),
            });
        }

        if !self.attrs.is_abstract && self.emitter.can_fall_through() {
            if self.return_type.is_void() {
                self.emitter.emit_return_void()?;
            } else {
                self.emitter
                    .emit_default_value(self.return_type.value_kind())?;
                self.emitter.emit_return()?;
            }
        }

        let body = self.emitter.finish()?;
        debug!(
            method = %self.signature(),
            bytes = body.code.len(),
            locals = body.local_count,
            handlers = body.handlers.len(),
            "finalized method"
        );
        self.body = Some(body);
        self.state = MethodState::Finalized;
        Ok(())
    }

    fn header(&self, owner: &str) -> String {
        let mut header = String::new();
        header.push_str(if self.attrs.is_public { "public " } else { "private " });
        if self.attrs.is_static {
            header.push_str("static ");
        }
        if self.attrs.is_abstract {
            header.push_str("abstract ");
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect();
        if self.is_constructor {
            header.push_str(&format!("{}({})", owner, params.join(", ")));
        } else {
            header.push_str(&format!("{} {}({})", self.return_type, self.name, params.join(", ")));
        }
        header
    }

    /// Header plus the indented command list
    pub(crate) fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize, owner: &str) -> fmt::Result {
        let pad = "    ".repeat(indent);
        if self.attrs.is_abstract {
            return writeln!(f, "{}{};", pad, self.header(owner));
        }
        writeln!(f, "{}{} {{", pad, self.header(owner))?;
        let mut depth = indent as i32 + 1;
        for emitted in &self.commands {
            let (before, after) = emitted.command.indent_delta();
            depth = (depth + before).max(0);
            writeln!(f, "{}{}", "    ".repeat(depth as usize), emitted.command)?;
            depth += after;
        }
        writeln!(f, "{}}}", pad)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Explicit emission context for one method body
pub struct MethodBuilder<'m> {
    module: &'m mut Module,
    id: MethodId,
}

impl<'m> MethodBuilder<'m> {
    pub(crate) fn new(module: &'m mut Module, id: MethodId) -> Self {
        Self { module, id }
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.def().name
    }

    pub fn return_type(&self) -> &TypeRef {
        &self.def().return_type
    }

    /// Commands emitted so far
    pub fn commands(&self) -> &[EmittedCommand] {
        &self.def().commands
    }

    fn def(&self) -> &MethodDef {
        &self.module.methods[self.id.index() as usize]
    }

    fn def_mut(&mut self) -> &mut MethodDef {
        &mut self.module.methods[self.id.index() as usize]
    }

    fn ensure_open(&self) -> EmitResult<()> {
        let def = self.def();
        match def.state {
            MethodState::Open if def.attrs.is_abstract => Err(EmitError::InvalidOperation(format!(
                "abstract method '{}' has no body",
                def.signature()
            ))),
            MethodState::Open => Ok(()),
            MethodState::Aborted => Err(EmitError::InvalidOperation(format!(
                "method '{}' was aborted by an earlier error",
                def.signature()
            ))),
            MethodState::Finalized => Err(EmitError::InvalidOperation(format!(
                "method '{}' is sealed",
                def.signature()
            ))),
        }
    }

    /// Run one operation; any error aborts the method
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> EmitResult<T>) -> EmitResult<T> {
        self.ensure_open()?;
        let result = op(self);
        if let Err(err) = &result {
            let def = self.def_mut();
            warn!(method = %def.signature(), error = %err, "method aborted");
            def.state = MethodState::Aborted;
        }
        result
    }

    /// Emit a command and record the code it produced
    fn push(&mut self, command: Command) -> EmitResult<()> {
        let Module {
            methods, constants, ..
        } = &mut *self.module;
        let def = &mut methods[self.id.index() as usize];

        let start = def.emitter.offset();
        command.setup(&mut EmitContext::new(&mut def.emitter, constants))?;
        let code = start..def.emitter.offset();

        debug!(method = %def.name, kind = command.kind(), bytes = code.len(), "{}", command);
        def.commands.push(EmittedCommand { command, code });
        Ok(())
    }

    fn declare(&mut self, name: String, ty: TypeRef) -> EmitResult<Variable> {
        let slot = self.def_mut().emitter.declare_local(name.clone())?;
        Ok(Variable::new(Local {
            method: self.id,
            slot,
            name,
            ty,
        }))
    }

    /// Fresh local with a session-unique name such as `__add3`
    fn temp(&mut self, prefix: &str, ty: TypeRef) -> EmitResult<Variable> {
        let name = self.module.next_temp_name(prefix);
        self.declare(name, ty)
    }

    /// Locals and parameters only belong to the method that declared them
    fn owned(&self, variable: &Variable) -> EmitResult<()> {
        match variable.owner() {
            Some(owner) if owner != self.id => Err(EmitError::InvalidOperation(format!(
                "'{}' belongs to another method and cannot be used in '{}'",
                variable.name(),
                self.def().signature()
            ))),
            _ => Ok(()),
        }
    }

    fn bind_arguments(&self, target: &CallTarget, args: &[Variable]) -> EmitResult<Vec<Argument>> {
        if args.len() != target.params.len() {
            return Err(EmitError::InvalidArgument(format!(
                "'{}' expects {} argument(s), got {}",
                target.name,
                target.params.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(&target.params)
            .map(|(value, param)| {
                self.owned(value)?;
                Ok(Argument {
                    coercion: Coercion::select(value.ty(), param, &*self.module)?,
                    value: value.clone(),
                    param_type: param.clone(),
                })
            })
            .collect()
    }

    // ===== Variables =====

    /// The receiver of an instance member (slot 0)
    pub fn this(&self) -> EmitResult<Variable> {
        let def = self.def();
        if def.attrs.is_static {
            return Err(EmitError::InvalidOperation(format!(
                "static method '{}' has no 'this'",
                def.signature()
            )));
        }
        let ty = self.module.type_def(def.owner)?.type_ref();
        Ok(Variable::new(Parameter {
            method: self.id,
            slot: 0,
            name: "this".to_string(),
            ty,
        }))
    }

    /// Declared parameter by position
    pub fn param(&self, index: usize) -> EmitResult<Variable> {
        let def = self.def();
        let param = def.params.get(index).ok_or_else(|| {
            EmitError::InvalidArgument(format!(
                "'{}' has {} parameter(s), index {} is out of range",
                def.signature(),
                def.params.len(),
                index
            ))
        })?;
        Ok(Variable::new(Parameter {
            method: self.id,
            slot: def.first_param_slot() + index as u16,
            name: param.name.clone(),
            ty: param.ty.clone(),
        }))
    }

    /// Declared parameter by name
    pub fn param_named(&self, name: &str) -> EmitResult<Variable> {
        let index = self
            .def()
            .params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "parameter",
                name: name.to_string(),
            })?;
        self.param(index)
    }

    /// Declare a named local
    pub fn create_local(&mut self, name: &str, ty: TypeRef) -> EmitResult<Variable> {
        self.run(|b| {
            require_name("local", name)?;
            if ty.is_void() || ty == TypeRef::Null {
                return Err(EmitError::InvalidArgument(format!(
                    "local '{}' cannot have type {}",
                    name, ty
                )));
            }
            if b.def().declares_local(name) {
                return Err(EmitError::DuplicateMember {
                    owner: b.def().signature(),
                    member: name.to_string(),
                });
            }
            let local = b.declare(name.to_string(), ty)?;
            b.push(Command::DefineLocal {
                local: local.clone(),
            })?;
            Ok(local)
        })
    }

    /// Literal constant
    pub fn create_constant(&self, value: impl Into<ConstValue>) -> Variable {
        Variable::constant(value)
    }

    fn field_variable(&self, field: FieldId, receiver: Receiver) -> Variable {
        let info = &self.module.fields[field.index() as usize];
        let def = self.def();
        let writable =
            !info.attrs.is_readonly || (def.is_constructor && def.owner == info.owner);
        Variable::new(FieldAccess {
            field,
            name: info.name.clone(),
            ty: info.ty.clone(),
            receiver,
            writable,
        })
    }

    /// Field of the declaring type (or an ancestor) on `this`, or a static field
    pub fn field(&self, name: &str) -> EmitResult<Variable> {
        let def = self.def();
        let field = self
            .module
            .find_field(def.owner, name)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "field",
                name: name.to_string(),
            })?;
        let info = &self.module.fields[field.index() as usize];
        let receiver = if info.attrs.is_static {
            Receiver::Static(self.module.type_def(info.owner)?.name.clone())
        } else if def.attrs.is_static {
            return Err(EmitError::InvalidOperation(format!(
                "instance field '{}' used in static method '{}'",
                name,
                def.signature()
            )));
        } else {
            Receiver::This
        };
        Ok(self.field_variable(field, receiver))
    }

    /// Instance field on an object-typed variable
    pub fn field_of(&self, object: &Variable, name: &str) -> EmitResult<Variable> {
        self.owned(object)?;
        let class = object.ty().class_id().ok_or_else(|| {
            EmitError::InvalidArgument(format!("{} has no fields", object.ty()))
        })?;
        let field = self
            .module
            .find_field(class, name)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "field",
                name: format!("{}.{}", object.ty(), name),
            })?;
        if self.module.fields[field.index() as usize].attrs.is_static {
            return Err(EmitError::InvalidArgument(format!(
                "static field '{}' cannot be accessed through an instance",
                name
            )));
        }
        Ok(self.field_variable(field, Receiver::Object(object.clone())))
    }

    fn property_variable(&self, property: PropertyId, receiver: Receiver) -> Variable {
        let info = &self.module.properties[property.index() as usize];
        Variable::new(PropertyAccess {
            property,
            name: info.name.clone(),
            ty: info.ty.clone(),
            getter: info.getter,
            setter: info.setter,
            receiver,
        })
    }

    /// Property of the declaring type (or an ancestor) on `this`
    pub fn property(&self, name: &str) -> EmitResult<Variable> {
        let def = self.def();
        if def.attrs.is_static {
            return Err(EmitError::InvalidOperation(format!(
                "property '{}' used in static method '{}'",
                name,
                def.signature()
            )));
        }
        let property = self
            .module
            .find_property(def.owner, name)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "property",
                name: name.to_string(),
            })?;
        Ok(self.property_variable(property, Receiver::This))
    }

    /// Property on an object-typed variable
    pub fn property_of(&self, object: &Variable, name: &str) -> EmitResult<Variable> {
        self.owned(object)?;
        let class = object.ty().class_id().ok_or_else(|| {
            EmitError::InvalidArgument(format!("{} has no properties", object.ty()))
        })?;
        let property = self
            .module
            .find_property(class, name)
            .ok_or_else(|| EmitError::UnknownMember {
                kind: "property",
                name: format!("{}.{}", object.ty(), name),
            })?;
        Ok(self.property_variable(property, Receiver::Object(object.clone())))
    }

    // ===== Assignment & arithmetic =====

    /// `target = source`, with the coercion the two types require
    pub fn assign(&mut self, target: &Variable, source: impl Into<Variable>) -> EmitResult<()> {
        let source = source.into();
        self.run(|b| {
            b.owned(target)?;
            b.owned(&source)?;
            let coercion = Coercion::select(source.ty(), target.ty(), &*b.module)?;
            b.push(Command::Assign {
                target: target.clone(),
                source,
                coercion,
            })
        })
    }

    fn arithmetic(&mut self, op: ArithmeticOp, left: &Variable, right: Variable) -> EmitResult<Variable> {
        self.run(|b| {
            b.owned(left)?;
            b.owned(&right)?;
            let operand_type = op.operand_type(left.ty(), right.ty())?;
            let result = b.temp(op.temp_prefix(), operand_type.clone())?;
            b.push(Command::Arithmetic {
                op,
                left: left.clone(),
                right,
                operand_type,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    pub fn add(&mut self, left: &Variable, right: impl Into<Variable>) -> EmitResult<Variable> {
        self.arithmetic(ArithmeticOp::Add, left, right.into())
    }

    pub fn subtract(&mut self, left: &Variable, right: impl Into<Variable>) -> EmitResult<Variable> {
        self.arithmetic(ArithmeticOp::Subtract, left, right.into())
    }

    pub fn multiply(&mut self, left: &Variable, right: impl Into<Variable>) -> EmitResult<Variable> {
        self.arithmetic(ArithmeticOp::Multiply, left, right.into())
    }

    pub fn divide(&mut self, left: &Variable, right: impl Into<Variable>) -> EmitResult<Variable> {
        self.arithmetic(ArithmeticOp::Divide, left, right.into())
    }

    pub fn modulo(&mut self, left: &Variable, right: impl Into<Variable>) -> EmitResult<Variable> {
        self.arithmetic(ArithmeticOp::Modulo, left, right.into())
    }

    /// `target = target + 1`; returns the new value
    pub fn increment(&mut self, target: &Variable) -> EmitResult<Variable> {
        let next = self.add(target, 1)?;
        self.assign(target, &next)?;
        Ok(next)
    }

    /// `target = target - 1`; returns the new value
    pub fn decrement(&mut self, target: &Variable) -> EmitResult<Variable> {
        let next = self.subtract(target, 1)?;
        self.assign(target, &next)?;
        Ok(next)
    }

    // ===== Objects & calls =====

    /// Instantiate through the parameterless constructor
    pub fn new_object(&mut self, class: TypeId) -> EmitResult<Variable> {
        self.new_object_with(class, &[])
    }

    /// Instantiate through the constructor matching `args`
    pub fn new_object_with(&mut self, class: TypeId, args: &[Variable]) -> EmitResult<Variable> {
        self.run(|b| {
            let type_def = b.module.type_def(class)?;
            if type_def.attrs.is_abstract {
                return Err(EmitError::InvalidOperation(format!(
                    "cannot instantiate abstract type '{}'",
                    type_def.name
                )));
            }
            let class_ref = type_def.type_ref();
            let has_constructors = !type_def.constructors.is_empty();

            let arg_types: Vec<TypeRef> = args.iter().map(|a| a.ty().clone()).collect();
            let (constructor, args) = if !has_constructors && args.is_empty() {
                (None, Vec::new())
            } else {
                let ctor = b.module.find_constructor(class, &arg_types).ok_or_else(|| {
                    EmitError::UnknownMember {
                        kind: "constructor",
                        name: format!("{}({})", class_ref, join_types(&arg_types)),
                    }
                })?;
                let target = b.module.call_target(ctor)?;
                let args = b.bind_arguments(&target, args)?;
                (Some(target), args)
            };

            let result = b.temp("new", class_ref.clone())?;
            b.push(Command::NewObject {
                class: class_ref,
                constructor,
                args,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    /// Call a method; instance methods without an explicit receiver are called on `this`
    ///
    /// Returns the local holding the result for non-void methods.
    pub fn call(
        &mut self,
        method: MethodId,
        receiver: Option<&Variable>,
        args: &[Variable],
    ) -> EmitResult<Option<Variable>> {
        self.run(|b| {
            let target = b.module.call_target(method)?;
            if target.is_constructor {
                return Err(EmitError::InvalidArgument(format!(
                    "constructor of {} is invoked through new_object or call_base_constructor",
                    target.owner
                )));
            }

            let receiver = match (target.is_static, receiver) {
                (true, Some(_)) => {
                    return Err(EmitError::InvalidArgument(format!(
                        "static method '{}' takes no receiver",
                        target.name
                    )))
                }
                (true, None) => None,
                (false, Some(object)) => Some(object.clone()),
                (false, None) => Some(b.this()?),
            };
            if let Some(object) = &receiver {
                b.owned(object)?;
                let coercion = Coercion::select(object.ty(), &target.owner, &*b.module)?;
                if !coercion.is_none() {
                    return Err(EmitError::mismatch(&target.owner, object.ty()));
                }
            }

            let args = b.bind_arguments(&target, args)?;
            let result = if target.return_type.is_void() {
                None
            } else {
                Some(b.temp("call", target.return_type.clone())?)
            };
            b.push(Command::Call {
                target,
                receiver,
                args,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    /// Resolve an instance method by name and argument types, then call it
    pub fn call_named(
        &mut self,
        receiver: &Variable,
        name: &str,
        args: &[Variable],
    ) -> EmitResult<Option<Variable>> {
        let method = self.run(|b| {
            let class = receiver.ty().class_id().ok_or_else(|| {
                EmitError::InvalidArgument(format!("{} has no methods", receiver.ty()))
            })?;
            let arg_types: Vec<TypeRef> = args.iter().map(|a| a.ty().clone()).collect();
            b.module
                .find_method(class, name, &arg_types)
                .ok_or_else(|| EmitError::UnknownMember {
                    kind: "method",
                    name: format!("{}.{}({})", receiver.ty(), name, join_types(&arg_types)),
                })
        })?;
        self.call(method, Some(receiver), args)
    }

    /// Invoke the base type's constructor on `this`
    pub fn call_base_constructor(&mut self, args: &[Variable]) -> EmitResult<()> {
        self.run(|b| {
            let def = b.def();
            if !def.is_constructor {
                return Err(EmitError::InvalidOperation(format!(
                    "'{}' is not a constructor",
                    def.signature()
                )));
            }
            let owner = b.module.type_def(def.owner)?;
            let base = owner.base.ok_or_else(|| {
                EmitError::InvalidOperation(format!("'{}' has no base type", owner.name))
            })?;

            let arg_types: Vec<TypeRef> = args.iter().map(|a| a.ty().clone()).collect();
            let ctor = b.module.find_constructor(base, &arg_types).ok_or_else(|| {
                EmitError::UnknownMember {
                    kind: "constructor",
                    name: format!("base({})", join_types(&arg_types)),
                }
            })?;
            let target = b.module.call_target(ctor)?;
            let args = b.bind_arguments(&target, args)?;
            let this = b.this()?;
            b.push(Command::Call {
                target,
                receiver: Some(this),
                args,
                result: None,
            })
        })
    }

    // ===== Conversions =====

    /// Box a value-typed variable into an `object`
    pub fn box_value(&mut self, value: impl Into<Variable>) -> EmitResult<Variable> {
        let value = value.into();
        self.run(|b| {
            b.owned(&value)?;
            if !value.ty().is_value_type() {
                return Err(EmitError::InvalidArgument(format!(
                    "box requires a value type, got {}",
                    value.ty()
                )));
            }
            let result = b.temp("box", TypeRef::Object)?;
            b.push(Command::Box {
                value,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    /// Unbox a reference into a value type, checked at run time
    pub fn unbox(&mut self, value: &Variable, ty: TypeRef) -> EmitResult<Variable> {
        self.run(|b| {
            b.owned(value)?;
            if !ty.is_value_type() {
                return Err(EmitError::InvalidArgument(format!(
                    "unbox target must be a value type, got {}",
                    ty
                )));
            }
            if !value.ty().is_reference() {
                return Err(EmitError::InvalidArgument(format!(
                    "unbox source must be a reference, got {}",
                    value.ty()
                )));
            }
            let result = b.temp("unbox", ty.clone())?;
            b.push(Command::UnBox {
                value: value.clone(),
                ty,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    /// Reference conversion, checked at run time
    pub fn cast(&mut self, value: &Variable, ty: TypeRef) -> EmitResult<Variable> {
        self.run(|b| {
            b.owned(value)?;
            if ty.type_tag().is_none() {
                return Err(EmitError::InvalidArgument(format!(
                    "cast target must be a reference type, got {}",
                    ty
                )));
            }
            if !value.ty().is_reference() {
                return Err(EmitError::InvalidArgument(format!(
                    "cast source must be a reference, got {}",
                    value.ty()
                )));
            }
            let result = b.temp("cast", ty.clone())?;
            b.push(Command::Cast {
                value: value.clone(),
                ty,
                result: result.clone(),
            })?;
            Ok(result)
        })
    }

    /// Throw a reference value
    pub fn throw(&mut self, value: &Variable) -> EmitResult<()> {
        self.run(|b| {
            b.owned(value)?;
            if !value.ty().is_reference() || *value.ty() == TypeRef::Null {
                return Err(EmitError::InvalidArgument(format!(
                    "only objects can be thrown, got {}",
                    value.ty()
                )));
            }
            b.push(Command::Throw {
                value: value.clone(),
            })
        })
    }

    // ===== Control flow =====

    fn condition(&self, left: Variable, comparison: Comparison, right: Variable) -> EmitResult<Condition> {
        self.owned(&left)?;
        self.owned(&right)?;
        Condition::new(left, comparison, right)
    }

    /// Open `if (left <cmp> right) {`
    pub fn if_(
        &mut self,
        left: impl Into<Variable>,
        comparison: Comparison,
        right: impl Into<Variable>,
    ) -> EmitResult<()> {
        let (left, right) = (left.into(), right.into());
        self.run(|b| {
            let condition = b.condition(left, comparison, right)?;
            let emitter = &mut b.def_mut().emitter;
            let (else_label, final_label) = (emitter.define_label(), emitter.define_label());
            b.push(Command::If {
                condition,
                else_label,
                final_label,
            })?;
            b.def_mut().blocks.push(Block::If {
                else_label: Some(else_label),
                final_label,
                has_else: false,
            });
            Ok(())
        })
    }

    /// `} else if (left <cmp> right) {`
    pub fn else_if(
        &mut self,
        left: impl Into<Variable>,
        comparison: Comparison,
        right: impl Into<Variable>,
    ) -> EmitResult<()> {
        let (left, right) = (left.into(), right.into());
        self.run(|b| {
            let (previous_else, final_label) = match b.def().blocks.last() {
                Some(Block::If {
                    else_label: Some(else_label),
                    final_label,
                    has_else: false,
                }) => (*else_label, *final_label),
                open => return Err(unbalanced("ElseIf", open)),
            };
            let condition = b.condition(left, comparison, right)?;
            let else_label = b.def_mut().emitter.define_label();
            b.push(Command::ElseIf {
                condition,
                previous_else,
                else_label,
                final_label,
            })?;
            if let Some(Block::If { else_label: slot, .. }) = b.def_mut().blocks.last_mut() {
                *slot = Some(else_label);
            }
            Ok(())
        })
    }

    /// `} else {`
    pub fn else_(&mut self) -> EmitResult<()> {
        self.run(|b| {
            let (previous_else, final_label) = match b.def().blocks.last() {
                Some(Block::If {
                    else_label: Some(else_label),
                    final_label,
                    has_else: false,
                }) => (*else_label, *final_label),
                open => return Err(unbalanced("Else", open)),
            };
            b.push(Command::Else {
                previous_else,
                final_label,
            })?;
            if let Some(Block::If {
                else_label,
                has_else,
                ..
            }) = b.def_mut().blocks.last_mut()
            {
                *else_label = None;
                *has_else = true;
            }
            Ok(())
        })
    }

    /// Close the innermost `If`
    pub fn end_if(&mut self) -> EmitResult<()> {
        self.run(|b| {
            let (pending_else, final_label) = match b.def().blocks.last() {
                Some(Block::If {
                    else_label,
                    final_label,
                    ..
                }) => (*else_label, *final_label),
                open => return Err(unbalanced("EndIf", open)),
            };
            b.push(Command::EndIf {
                pending_else,
                final_label,
            })?;
            b.def_mut().blocks.pop();
            Ok(())
        })
    }

    /// Open `while (left <cmp> right) {`
    pub fn while_(
        &mut self,
        left: impl Into<Variable>,
        comparison: Comparison,
        right: impl Into<Variable>,
    ) -> EmitResult<()> {
        let (left, right) = (left.into(), right.into());
        self.run(|b| {
            let condition = b.condition(left, comparison, right)?;
            let emitter = &mut b.def_mut().emitter;
            let (start, end) = (emitter.define_label(), emitter.define_label());
            b.push(Command::While {
                condition,
                start,
                end,
            })?;
            b.def_mut().blocks.push(Block::While { start, end });
            Ok(())
        })
    }

    /// Close the innermost `While`
    pub fn end_while(&mut self) -> EmitResult<()> {
        self.run(|b| {
            let (start, end) = match b.def().blocks.last() {
                Some(Block::While { start, end }) => (*start, *end),
                open => return Err(unbalanced("EndWhile", open)),
            };
            b.push(Command::EndWhile { start, end })?;
            b.def_mut().blocks.pop();
            Ok(())
        })
    }

    /// Open a protected region
    pub fn try_(&mut self) -> EmitResult<()> {
        self.run(|b| {
            b.push(Command::Try)?;
            b.def_mut().blocks.push(Block::Try { has_catch: false });
            Ok(())
        })
    }

    /// Start a catch clause for `ty`; returns the local holding the caught object
    pub fn catch(&mut self, ty: TypeRef) -> EmitResult<Variable> {
        self.run(|b| {
            match b.def().blocks.last() {
                Some(Block::Try { .. }) => {}
                open => return Err(unbalanced("Catch", open)),
            }
            if ty.type_tag().is_none() {
                return Err(EmitError::InvalidArgument(format!(
                    "cannot catch values of type {}",
                    ty
                )));
            }
            let local = b.temp("ex", ty.clone())?;
            b.push(Command::Catch {
                ty,
                local: local.clone(),
            })?;
            if let Some(Block::Try { has_catch }) = b.def_mut().blocks.last_mut() {
                *has_catch = true;
            }
            Ok(local)
        })
    }

    /// Close the innermost `Try`; at least one `Catch` is required
    pub fn end_try(&mut self) -> EmitResult<()> {
        self.run(|b| {
            match b.def().blocks.last() {
                Some(Block::Try { has_catch: true }) => {}
                open => return Err(unbalanced("EndTry", open)),
            }
            b.push(Command::EndTry)?;
            b.def_mut().blocks.pop();
            Ok(())
        })
    }

    /// `return value;`, coerced to the declared return type
    pub fn ret(&mut self, value: impl Into<Variable>) -> EmitResult<()> {
        let value = value.into();
        self.run(|b| {
            b.owned(&value)?;
            let return_type = b.def().return_type.clone();
            if return_type.is_void() {
                return Err(EmitError::mismatch(&return_type, value.ty()));
            }
            let coercion = Coercion::select(value.ty(), &return_type, &*b.module)?;
            b.push(Command::Return {
                value: Some((value, coercion)),
                return_type,
            })
        })
    }

    /// `return;` from a void member
    pub fn ret_void(&mut self) -> EmitResult<()> {
        self.run(|b| {
            let return_type = b.def().return_type.clone();
            if !return_type.is_void() {
                return Err(EmitError::mismatch(&return_type, TypeRef::Void));
            }
            b.push(Command::Return {
                value: None,
                return_type,
            })
        })
    }
}

fn join_types(types: &[TypeRef]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
