//! Bytecode interpreter
//!
//! Each call runs in its own frame with a private operand stack and local
//! slots. A thrown object unwinds frame by frame: the first handler of the
//! current function that covers the faulting instruction and matches the
//! object's type receives it, otherwise the throw propagates to the caller.
//! Runtime faults ([`VmError`]) are not catchable by bytecode handlers.

use super::value::{Object, Value};
use super::{VmError, VmResult};
use crate::bytecode::{
    BytecodeReader, ClassDef, DecodeError, Function, Module, Opcode, TypeTag, ValueKind,
};
use crate::config::DEFAULT_MAX_CALL_DEPTH;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Non-local exit from a frame
enum Unwind {
    /// Bytecode-level exception, catchable by handlers
    Throw(Value),
    /// VM fault, propagates to the host
    Fault(VmError),
}

impl From<VmError> for Unwind {
    fn from(err: VmError) -> Self {
        Unwind::Fault(err)
    }
}

impl From<DecodeError> for Unwind {
    fn from(err: DecodeError) -> Self {
        Unwind::Fault(VmError::Decode(err))
    }
}

type ExecResult<T> = Result<T, Unwind>;

/// Outcome of a single instruction
enum OpcodeResult {
    Continue,
    Return(Value),
}

/// Executes functions of a materialized module
pub struct Interpreter {
    module: Arc<Module>,
    statics: FxHashMap<u32, Value>,
    max_call_depth: usize,
    depth: usize,
}

impl Interpreter {
    pub fn new(module: Arc<Module>) -> Self {
        Self {
            module,
            statics: FxHashMap::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            depth: 0,
        }
    }

    /// Limit nested calls before [`VmError::StackOverflow`]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    // ===== Host API =====

    /// Invoke a function by id
    ///
    /// `args` fill the parameter slots in order; instance members take the
    /// receiver first.
    pub fn invoke(&mut self, function_id: u32, args: &[Value]) -> VmResult<Value> {
        let module = Arc::clone(&self.module);
        let function = function_of(&module, function_id)?;
        if args.len() != function.param_count {
            return Err(VmError::ArityMismatch {
                function: function.name.clone(),
                expected: function.param_count,
                found: args.len(),
            });
        }
        match self.execute(&module, function_id, args.to_vec()) {
            Ok(value) => Ok(value),
            Err(Unwind::Fault(err)) => Err(err),
            Err(Unwind::Throw(value)) => Err(VmError::UncaughtException(self.describe(&value))),
        }
    }

    /// Invoke a static method by class and method name
    pub fn invoke_static(&mut self, class: &str, name: &str, args: &[Value]) -> VmResult<Value> {
        let class_id = self.class_id(class)?;
        let function_id = self
            .module
            .find_method(class_id, name)
            .filter(|id| self.module.function(*id).is_some_and(|f| f.is_static()))
            .ok_or_else(|| unknown("static method", format!("{}.{}", class, name)))?;
        self.invoke(function_id, args)
    }

    /// Allocate an instance and run the constructor matching `args`
    pub fn new_object(&mut self, class: &str, args: &[Value]) -> VmResult<Value> {
        let module = Arc::clone(&self.module);
        let class_id = self.class_id(class)?;
        let object = allocate(&module, class_id)?;

        let class_def = class_of(&module, class_id)?;
        let constructor = class_def.constructors.iter().copied().find(|id| {
            module
                .function(*id)
                .is_some_and(|f| f.arity() == args.len())
        });
        match constructor {
            Some(id) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(object.clone());
                full.extend_from_slice(args);
                self.invoke(id, &full)?;
            }
            None if class_def.constructors.is_empty() && args.is_empty() => {}
            None => {
                return Err(VmError::Unknown {
                    kind: "constructor",
                    name: format!("{}({} argument(s))", class, args.len()),
                })
            }
        }
        Ok(object)
    }

    /// Invoke an instance method on `receiver`, dispatching by runtime class
    pub fn call_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> VmResult<Value> {
        let class_id = receiver_class(receiver, name)?;
        let function_id = resolve_virtual(&self.module, class_id, name, args.len())
            .ok_or_else(|| unknown("method", name.to_string()))?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver.clone());
        full.extend_from_slice(args);
        self.invoke(function_id, &full)
    }

    /// Read a property through its getter
    pub fn get_property(&mut self, receiver: &Value, name: &str) -> VmResult<Value> {
        let class_id = receiver_class(receiver, name)?;
        let getter = self
            .module
            .find_property(class_id, name)
            .and_then(|p| p.getter)
            .ok_or_else(|| unknown("readable property", name.to_string()))?;
        self.invoke(getter, std::slice::from_ref(receiver))
    }

    /// Write a property through its setter
    pub fn set_property(&mut self, receiver: &Value, name: &str, value: Value) -> VmResult<()> {
        let class_id = receiver_class(receiver, name)?;
        let setter = self
            .module
            .find_property(class_id, name)
            .and_then(|p| p.setter)
            .ok_or_else(|| unknown("writable property", name.to_string()))?;
        self.invoke(setter, &[receiver.clone(), value])?;
        Ok(())
    }

    /// Read an instance field directly
    pub fn get_field(&self, receiver: &Value, name: &str) -> VmResult<Value> {
        let class_id = receiver_class(receiver, name)?;
        let field_id = self
            .module
            .find_field(class_id, name)
            .ok_or_else(|| unknown("field", name.to_string()))?;
        let object = receiver
            .as_object()
            .ok_or_else(|| VmError::NullReference(name.to_string()))?;
        let value = object.borrow().fields.get(&field_id).cloned();
        value.ok_or_else(|| unknown("field", name.to_string()))
    }

    /// Run the module's entry point
    pub fn run_entry_point(&mut self, args: &[Value]) -> VmResult<Value> {
        let entry = self.module.entry_point.ok_or(VmError::NoEntryPoint)?;
        debug!(module = %self.module.name, entry, "running entry point");
        self.invoke(entry, args)
    }

    /// Human-readable form of a value, naming the class of objects
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Object(obj) => {
                let class_id = obj.borrow().class_id;
                self.module
                    .class(class_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| value.to_string())
            }
            Value::Str(s) => format!("\"{}\"", s),
            other => other.to_string(),
        }
    }

    fn class_id(&self, name: &str) -> VmResult<u32> {
        self.module
            .find_class(name)
            .ok_or_else(|| unknown("class", name.to_string()))
    }

    // ===== Frames =====

    fn execute(&mut self, module: &Module, function_id: u32, args: Vec<Value>) -> ExecResult<Value> {
        if self.depth >= self.max_call_depth {
            return Err(VmError::StackOverflow(self.max_call_depth).into());
        }
        self.depth += 1;
        let result = self.run_frame(module, function_id, args);
        self.depth -= 1;
        result
    }

    fn run_frame(&mut self, module: &Module, function_id: u32, args: Vec<Value>) -> ExecResult<Value> {
        let function = function_of(module, function_id)?;
        if function.is_abstract() {
            return Err(VmError::TypeError(format!(
                "abstract method '{}' has no body",
                function.name
            ))
            .into());
        }
        trace!(function = %function.name, depth = self.depth, "enter");

        let mut locals = args;
        locals.resize(function.local_count.max(locals.len()), Value::Null);
        let mut stack: Vec<Value> = Vec::new();
        let mut reader = BytecodeReader::new(&function.code);

        while !reader.is_at_end() {
            let at = reader.position();
            match self.step(module, function, &mut reader, &mut stack, &mut locals) {
                Ok(OpcodeResult::Continue) => {}
                Ok(OpcodeResult::Return(value)) => return Ok(value),
                Err(Unwind::Throw(thrown)) => {
                    let handler = function
                        .handlers
                        .iter()
                        .find(|h| h.covers(at) && is_instance(module, &thrown, h.catch_type));
                    match handler {
                        Some(handler) => {
                            trace!(function = %function.name, at, "exception caught");
                            stack.clear();
                            stack.push(thrown);
                            reader.seek(handler.handler_start as usize);
                        }
                        None => return Err(Unwind::Throw(thrown)),
                    }
                }
                Err(fault) => return Err(fault),
            }
        }
        Ok(Value::Null)
    }

    fn step(
        &mut self,
        module: &Module,
        function: &Function,
        reader: &mut BytecodeReader<'_>,
        stack: &mut Vec<Value>,
        locals: &mut [Value],
    ) -> ExecResult<OpcodeResult> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode =
            Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode { opcode: byte, offset })?;
        trace!(offset, %opcode, depth = stack.len(), "exec");

        use Opcode::*;
        match opcode {
            Nop | Pop | Dup | ConstNull | ConstTrue | ConstFalse | ConstI32 | ConstF64
            | ConstStr | ConstI64 | LoadLocal | StoreLocal => {
                exec_stack_ops(module, function, reader, stack, locals, opcode)?
            }
            Iadd | Isub | Imul | Idiv | Imod | Ladd | Lsub | Lmul | Ldiv | Lmod | Fadd | Fsub
            | Fmul | Fdiv | Fmod | I2L | I2F | L2F | Sconcat => {
                exec_arithmetic_ops(function, stack, opcode)?
            }
            Jmp | BrEq | BrNe | BrLt | BrLe | BrGt | BrGe | BrNlt | BrNle | BrNgt | BrNge => {
                exec_jump_ops(function, reader, stack, opcode)?
            }
            Call | CallMethod | CallConstructor => {
                self.exec_call_ops(module, function, reader, stack, opcode)?
            }
            Return => return Ok(OpcodeResult::Return(pop(stack, function)?)),
            ReturnVoid => return Ok(OpcodeResult::Return(Value::Null)),
            New | LoadField | StoreField | LoadStatic | StoreStatic => {
                self.exec_object_ops(module, function, reader, stack, opcode)?
            }
            Box | Unbox | Cast => exec_cast_ops(module, function, reader, stack, opcode)?,
            Throw => {
                let value = pop(stack, function)?;
                if value.is_null() {
                    return Err(VmError::NullReference("throw of null".to_string()).into());
                }
                return Err(Unwind::Throw(value));
            }
        }
        Ok(OpcodeResult::Continue)
    }

    fn exec_call_ops(
        &mut self,
        module: &Module,
        function: &Function,
        reader: &mut BytecodeReader<'_>,
        stack: &mut Vec<Value>,
        opcode: Opcode,
    ) -> ExecResult<()> {
        let target_id = reader.read_u32()?;
        let argc = reader.read_u16()? as usize;
        let target = function_of(module, target_id)?;
        if stack.len() < argc {
            return Err(VmError::StackUnderflow(function.name.clone()).into());
        }
        let args = stack.split_off(stack.len() - argc);

        match opcode {
            Opcode::Call => {
                let result = self.execute(module, target_id, args)?;
                if target.returns_value() {
                    stack.push(result);
                }
            }
            Opcode::CallMethod => {
                let receiver = pop(stack, function)?;
                let class_id = receiver_class(&receiver, &target.name)?;
                let resolved = if target.is_abstract() {
                    resolve_virtual(module, class_id, &target.name, argc)
                        .ok_or_else(|| unknown("method implementation", target.name.clone()))?
                } else {
                    target_id
                };
                let mut full = Vec::with_capacity(argc + 1);
                full.push(receiver);
                full.extend(args);
                let result = self.execute(module, resolved, full)?;
                if target.returns_value() {
                    stack.push(result);
                }
            }
            Opcode::CallConstructor => {
                let object = pop(stack, function)?;
                receiver_class(&object, &target.name)?;
                let mut full = Vec::with_capacity(argc + 1);
                full.push(object.clone());
                full.extend(args);
                self.execute(module, target_id, full)?;
                stack.push(object);
            }
            _ => unreachable!("not a call opcode: {}", opcode),
        }
        Ok(())
    }

    fn exec_object_ops(
        &mut self,
        module: &Module,
        function: &Function,
        reader: &mut BytecodeReader<'_>,
        stack: &mut Vec<Value>,
        opcode: Opcode,
    ) -> ExecResult<()> {
        let operand = reader.read_u32()?;
        match opcode {
            Opcode::New => stack.push(allocate(module, operand)?),
            Opcode::LoadField => {
                let receiver = pop(stack, function)?;
                let object = object_of(module, &receiver, operand)?;
                let value = object.borrow().fields.get(&operand).cloned();
                let value = value.ok_or_else(|| unknown("field", field_name(module, operand)))?;
                stack.push(value);
            }
            Opcode::StoreField => {
                let value = pop(stack, function)?;
                let receiver = pop(stack, function)?;
                let object = object_of(module, &receiver, operand)?;
                let mut object = object.borrow_mut();
                match object.fields.get_mut(&operand) {
                    Some(slot) => *slot = value,
                    None => return Err(unknown("field", field_name(module, operand)).into()),
                }
            }
            Opcode::LoadStatic => {
                let kind = field_kind(module, operand)?;
                let value = self
                    .statics
                    .entry(operand)
                    .or_insert_with(|| Value::default_for(kind))
                    .clone();
                stack.push(value);
            }
            Opcode::StoreStatic => {
                field_kind(module, operand)?;
                let value = pop(stack, function)?;
                self.statics.insert(operand, value);
            }
            _ => unreachable!("not an object opcode: {}", opcode),
        }
        Ok(())
    }
}

// ===== Instruction Groups =====

fn exec_stack_ops(
    module: &Module,
    function: &Function,
    reader: &mut BytecodeReader<'_>,
    stack: &mut Vec<Value>,
    locals: &mut [Value],
    opcode: Opcode,
) -> ExecResult<()> {
    match opcode {
        Opcode::Nop => {}
        Opcode::Pop => {
            pop(stack, function)?;
        }
        Opcode::Dup => {
            let top = stack
                .last()
                .cloned()
                .ok_or_else(|| VmError::StackUnderflow(function.name.clone()))?;
            stack.push(top);
        }
        Opcode::ConstNull => stack.push(Value::Null),
        Opcode::ConstTrue => stack.push(Value::Bool(true)),
        Opcode::ConstFalse => stack.push(Value::Bool(false)),
        Opcode::ConstI32 => stack.push(Value::I32(reader.read_i32()?)),
        Opcode::ConstI64 => stack.push(Value::I64(reader.read_i64()?)),
        Opcode::ConstF64 => stack.push(Value::F64(reader.read_f64()?)),
        Opcode::ConstStr => {
            let index = reader.read_u32()?;
            let s = module
                .constants
                .get_string(index)
                .ok_or_else(|| unknown("string constant", index.to_string()))?;
            stack.push(Value::str(s));
        }
        Opcode::LoadLocal => {
            let slot = reader.read_u16()? as usize;
            let value = locals
                .get(slot)
                .cloned()
                .ok_or_else(|| unknown("local slot", slot.to_string()))?;
            stack.push(value);
        }
        Opcode::StoreLocal => {
            let slot = reader.read_u16()? as usize;
            let value = pop(stack, function)?;
            match locals.get_mut(slot) {
                Some(local) => *local = value,
                None => return Err(unknown("local slot", slot.to_string()).into()),
            }
        }
        _ => unreachable!("not a stack opcode: {}", opcode),
    }
    Ok(())
}

fn exec_arithmetic_ops(function: &Function, stack: &mut Vec<Value>, opcode: Opcode) -> ExecResult<()> {
    use Opcode::*;

    // Unary widening
    if matches!(opcode, I2L | I2F | L2F) {
        let value = pop(stack, function)?;
        let widened = match opcode {
            I2L => Value::I64(i64::from(expect_i32(&value, opcode)?)),
            I2F => Value::F64(f64::from(expect_i32(&value, opcode)?)),
            _ => Value::F64(expect_i64(&value, opcode)? as f64),
        };
        stack.push(widened);
        return Ok(());
    }

    let b = pop(stack, function)?;
    let a = pop(stack, function)?;
    let result = match opcode {
        Iadd | Isub | Imul | Idiv | Imod => {
            let (a, b) = (expect_i32(&a, opcode)?, expect_i32(&b, opcode)?);
            Value::I32(match opcode {
                Iadd => a.wrapping_add(b),
                Isub => a.wrapping_sub(b),
                Imul => a.wrapping_mul(b),
                Idiv if b == 0 => return Err(VmError::DivisionByZero.into()),
                Idiv => a.wrapping_div(b),
                Imod if b == 0 => return Err(VmError::DivisionByZero.into()),
                _ => a.wrapping_rem(b),
            })
        }
        Ladd | Lsub | Lmul | Ldiv | Lmod => {
            let (a, b) = (expect_i64(&a, opcode)?, expect_i64(&b, opcode)?);
            Value::I64(match opcode {
                Ladd => a.wrapping_add(b),
                Lsub => a.wrapping_sub(b),
                Lmul => a.wrapping_mul(b),
                Ldiv if b == 0 => return Err(VmError::DivisionByZero.into()),
                Ldiv => a.wrapping_div(b),
                Lmod if b == 0 => return Err(VmError::DivisionByZero.into()),
                _ => a.wrapping_rem(b),
            })
        }
        Fadd | Fsub | Fmul | Fdiv | Fmod => {
            let (a, b) = (expect_f64(&a, opcode)?, expect_f64(&b, opcode)?);
            Value::F64(match opcode {
                Fadd => a + b,
                Fsub => a - b,
                Fmul => a * b,
                Fdiv => a / b,
                _ => a % b,
            })
        }
        Sconcat => {
            let mut joined = String::new();
            for operand in [&a, &b] {
                match operand {
                    Value::Null => {}
                    Value::Str(s) => joined.push_str(s),
                    other => return Err(type_error(opcode, other).into()),
                }
            }
            Value::str(&joined)
        }
        _ => unreachable!("not an arithmetic opcode: {}", opcode),
    };
    stack.push(result);
    Ok(())
}

fn exec_jump_ops(
    function: &Function,
    reader: &mut BytecodeReader<'_>,
    stack: &mut Vec<Value>,
    opcode: Opcode,
) -> ExecResult<()> {
    let offset = reader.read_i32()?;
    let taken = if opcode == Opcode::Jmp {
        true
    } else {
        let b = pop(stack, function)?;
        let a = pop(stack, function)?;
        compare(&a, &b, opcode)?
    };
    if taken {
        let target = reader.position() as i64 + i64::from(offset);
        if target < 0 || target > function.code.len() as i64 {
            return Err(VmError::InvalidJump {
                function: function.name.clone(),
                target,
            }
            .into());
        }
        reader.seek(target as usize);
    }
    Ok(())
}

fn exec_cast_ops(
    module: &Module,
    function: &Function,
    reader: &mut BytecodeReader<'_>,
    stack: &mut Vec<Value>,
    opcode: Opcode,
) -> ExecResult<()> {
    match opcode {
        Opcode::Box => {
            read_kind(reader)?;
            let value = pop(stack, function)?;
            stack.push(Value::Boxed(Rc::new(value)));
        }
        Opcode::Unbox => {
            let kind = read_kind(reader)?;
            match pop(stack, function)? {
                Value::Null => {
                    return Err(VmError::NullReference(format!("unbox to {}", kind.name())).into())
                }
                Value::Boxed(inner) if inner.kind() == Some(kind) => stack.push((*inner).clone()),
                other => {
                    return Err(VmError::InvalidCast {
                        found: runtime_type(module, &other),
                        target: kind.name().to_string(),
                    }
                    .into())
                }
            }
        }
        Opcode::Cast => {
            let tag = TypeTag::decode(reader)?;
            let value = pop(stack, function)?;
            if !value.is_null() && !is_instance(module, &value, tag) {
                return Err(VmError::InvalidCast {
                    found: runtime_type(module, &value),
                    target: tag_name(module, tag),
                }
                .into());
            }
            stack.push(value);
        }
        _ => unreachable!("not a cast opcode: {}", opcode),
    }
    Ok(())
}

// ===== Helpers =====

fn pop(stack: &mut Vec<Value>, function: &Function) -> Result<Value, VmError> {
    stack
        .pop()
        .ok_or_else(|| VmError::StackUnderflow(function.name.clone()))
}

fn unknown(kind: &'static str, name: String) -> VmError {
    VmError::Unknown { kind, name }
}

fn function_of(module: &Module, id: u32) -> Result<&Function, VmError> {
    module
        .function(id)
        .ok_or_else(|| unknown("function", id.to_string()))
}

fn class_of(module: &Module, id: u32) -> Result<&ClassDef, VmError> {
    module
        .class(id)
        .ok_or_else(|| unknown("class", id.to_string()))
}

fn field_name(module: &Module, id: u32) -> String {
    module
        .fields
        .get(id as usize)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn field_kind(module: &Module, id: u32) -> Result<ValueKind, VmError> {
    module
        .fields
        .get(id as usize)
        .map(|f| f.kind)
        .ok_or_else(|| unknown("field", id.to_string()))
}

fn read_kind(reader: &mut BytecodeReader<'_>) -> Result<ValueKind, DecodeError> {
    let offset = reader.position();
    let tag = reader.read_u8()?;
    ValueKind::from_u8(tag).ok_or(DecodeError::InvalidTag {
        what: "value kind",
        tag,
        offset,
    })
}

/// Fresh instance with every instance field at its default
fn allocate(module: &Module, class_id: u32) -> Result<Value, VmError> {
    let class = class_of(module, class_id)?;
    if class.is_abstract || class.is_interface {
        return Err(VmError::AbstractInstantiation(class.name.clone()));
    }
    let fields = module
        .instance_fields(class_id)
        .into_iter()
        .map(|id| Ok((id, Value::default_for(field_kind(module, id)?))))
        .collect::<Result<FxHashMap<_, _>, VmError>>()?;
    Ok(Value::Object(Rc::new(RefCell::new(Object { class_id, fields }))))
}

fn receiver_class(receiver: &Value, member: &str) -> Result<u32, VmError> {
    match receiver {
        Value::Object(obj) => Ok(obj.borrow().class_id),
        Value::Null => Err(VmError::NullReference(format!("access to '{}'", member))),
        other => Err(VmError::TypeError(format!(
            "'{}' accessed on {}",
            member,
            other.type_name()
        ))),
    }
}

fn object_of<'v>(
    module: &Module,
    receiver: &'v Value,
    field: u32,
) -> Result<&'v Rc<RefCell<Object>>, VmError> {
    match receiver {
        Value::Object(obj) => Ok(obj),
        Value::Null => Err(VmError::NullReference(format!(
            "access to field '{}'",
            field_name(module, field)
        ))),
        other => Err(VmError::TypeError(format!(
            "field '{}' accessed on {}",
            field_name(module, field),
            other.type_name()
        ))),
    }
}

/// Most-derived concrete method named `name` taking `arity` arguments
fn resolve_virtual(module: &Module, class_id: u32, name: &str, arity: usize) -> Option<u32> {
    let mut current = Some(class_id);
    while let Some(id) = current {
        let class = module.class(id)?;
        let found = class.methods.iter().find(|m| {
            m.name == name
                && module
                    .function(m.function_id)
                    .is_some_and(|f| !f.is_static() && !f.is_abstract() && f.arity() == arity)
        });
        if let Some(method) = found {
            return Some(method.function_id);
        }
        current = class.parent_id;
    }
    None
}

/// Whether a non-null value is an instance of the tagged type
fn is_instance(module: &Module, value: &Value, tag: TypeTag) -> bool {
    match (tag, value) {
        (_, Value::Null) => false,
        (TypeTag::Object, _) => true,
        (TypeTag::Str, Value::Str(_)) => true,
        (TypeTag::Class(id), Value::Object(obj)) => module.is_assignable(obj.borrow().class_id, id),
        _ => false,
    }
}

fn tag_name(module: &Module, tag: TypeTag) -> String {
    match tag {
        TypeTag::Object => "object".to_string(),
        TypeTag::Str => "string".to_string(),
        TypeTag::Class(id) => module
            .class(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("class#{}", id)),
    }
}

fn runtime_type(module: &Module, value: &Value) -> String {
    match value {
        Value::Object(obj) => tag_name(module, TypeTag::Class(obj.borrow().class_id)),
        Value::Boxed(inner) => format!("boxed {}", inner.type_name()),
        other => other.type_name().to_string(),
    }
}

fn type_error(opcode: Opcode, value: &Value) -> VmError {
    VmError::TypeError(format!("{} cannot operate on {}", opcode, value.type_name()))
}

fn expect_i32(value: &Value, opcode: Opcode) -> Result<i32, VmError> {
    value.as_i32().ok_or_else(|| type_error(opcode, value))
}

fn expect_i64(value: &Value, opcode: Opcode) -> Result<i64, VmError> {
    value.as_i64().ok_or_else(|| type_error(opcode, value))
}

fn expect_f64(value: &Value, opcode: Opcode) -> Result<f64, VmError> {
    value.as_f64().ok_or_else(|| type_error(opcode, value))
}

/// Evaluate a compare-and-branch condition
///
/// Equality works on any pair of values; ordering needs two numbers of the
/// same representation or two strings. Ordered comparisons with NaN fail.
fn compare(a: &Value, b: &Value, opcode: Opcode) -> Result<bool, VmError> {
    match opcode {
        Opcode::BrEq => return Ok(a == b),
        Opcode::BrNe => return Ok(a != b),
        _ => {}
    }
    let ordering = match (a, b) {
        (Value::I32(x), Value::I32(y)) => Some(x.cmp(y)),
        (Value::I64(x), Value::I64(y)) => Some(x.cmp(y)),
        (Value::F64(x), Value::F64(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(VmError::TypeError(format!(
                "{} cannot compare {} with {}",
                opcode,
                a.type_name(),
                b.type_name()
            )))
        }
    };
    // Unordered operands (NaN) satisfy no ordered comparison
    let holds = |expected: fn(Ordering) -> bool| ordering.is_some_and(expected);
    Ok(match opcode {
        Opcode::BrLt => holds(Ordering::is_lt),
        Opcode::BrLe => holds(Ordering::is_le),
        Opcode::BrGt => holds(Ordering::is_gt),
        Opcode::BrGe => holds(Ordering::is_ge),
        Opcode::BrNlt => !holds(Ordering::is_lt),
        Opcode::BrNle => !holds(Ordering::is_le),
        Opcode::BrNgt => !holds(Ordering::is_gt),
        _ => !holds(Ordering::is_ge),
    })
}
