//! End-to-end scenarios: build a module, create it, run it

use raya_emit::{
    Comparison, EmitError, FieldAttributes, Interpreter, MethodAttributes, Module, TypeAttributes,
    TypeRef, Value, Variable, VmError,
};

fn public_static() -> MethodAttributes {
    MethodAttributes::public().as_static()
}

fn run(module: &mut Module) -> Interpreter {
    Interpreter::new(module.create().unwrap())
}

// ============================================================================
// Counter (auto-property)
// ============================================================================

fn counter_module() -> Module {
    let mut module = Module::new("counter", None);
    let counter = module
        .define_type("Counter", TypeAttributes::public(), None, &[])
        .unwrap();
    let counter_ty = module.type_ref(counter).unwrap();

    let make = {
        let mut ty = module.ty(counter).unwrap();
        ty.define_default_constructor(MethodAttributes::public())
            .unwrap();
        ty.define_auto_property("Value", TypeRef::I32).unwrap();
        ty.define_method("Make", public_static(), counter_ty, &[])
            .unwrap()
    };

    let mut body = module.method(make).unwrap();
    let c = body.new_object(counter).unwrap();
    let value = body.property_of(&c, "Value").unwrap();
    let next = body.add(&value, 1).unwrap();
    body.assign(&value, &next).unwrap();
    body.ret(&c).unwrap();
    module
}

#[test]
fn test_counter_auto_property() {
    let mut module = counter_module();
    let mut vm = run(&mut module);

    let counter = vm.invoke_static("Counter", "Make", &[]).unwrap();
    assert_eq!(vm.get_property(&counter, "Value").unwrap(), Value::I32(1));
    assert_eq!(
        vm.get_field(&counter, "<Value>k__BackingField").unwrap(),
        Value::I32(1)
    );
}

#[test]
fn test_counter_property_from_host() {
    let mut module = counter_module();
    let mut vm = run(&mut module);

    let counter = vm.new_object("Counter", &[]).unwrap();
    assert_eq!(vm.get_property(&counter, "Value").unwrap(), Value::I32(0));
    vm.set_property(&counter, "Value", Value::I32(41)).unwrap();
    assert_eq!(vm.get_property(&counter, "Value").unwrap(), Value::I32(41));
}

#[test]
fn test_counter_listing() {
    let module = counter_module();
    let listing = module.to_string();
    assert!(listing.contains("public class Counter {"));
    assert!(listing.contains("    int Value { get; set; }"));
    assert!(listing.contains("Counter __new"));
    assert!(listing.contains("return __new"));
}

// ============================================================================
// Max (if / else)
// ============================================================================

fn max_module() -> Module {
    let mut module = Module::new("math", None);
    let calc = module
        .define_type("Calc", TypeAttributes::public(), None, &[])
        .unwrap();
    let max = module
        .ty(calc)
        .unwrap()
        .define_method(
            "Max",
            public_static(),
            TypeRef::I32,
            &[("a", TypeRef::I32), ("b", TypeRef::I32)],
        )
        .unwrap();

    let mut body = module.method(max).unwrap();
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    body.if_(&a, Comparison::LessThan, &b).unwrap();
    body.ret(&b).unwrap();
    body.else_().unwrap();
    body.ret(&a).unwrap();
    body.end_if().unwrap();
    module
}

#[test]
fn test_max() {
    let mut module = max_module();
    let mut vm = run(&mut module);

    let max = |vm: &mut Interpreter, a: i32, b: i32| {
        vm.invoke_static("Calc", "Max", &[a.into(), b.into()])
            .unwrap()
    };
    assert_eq!(max(&mut vm, 3, 7), Value::I32(7));
    assert_eq!(max(&mut vm, 9, 2), Value::I32(9));
    assert_eq!(max(&mut vm, 4, 4), Value::I32(4));
}

#[test]
fn test_max_listing() {
    let module = max_module();
    let expected = "\
// module math (library)

public class Calc {
    public static int Max(int a, int b) {
        if (a < b) {
            return b;
        } else {
            return a;
        }
    }
}
";
    pretty_assertions::assert_eq!(module.to_string(), expected);
}

// ============================================================================
// Sum (while)
// ============================================================================

#[test]
fn test_while_sum() {
    let mut module = Module::new("loops", None);
    let calc = module
        .define_type("Calc", TypeAttributes::public(), None, &[])
        .unwrap();
    let sum_id = module
        .ty(calc)
        .unwrap()
        .define_method("Sum", public_static(), TypeRef::I32, &[("n", TypeRef::I32)])
        .unwrap();

    let mut body = module.method(sum_id).unwrap();
    let n = body.param(0).unwrap();
    let sum = body.create_local("sum", TypeRef::I32).unwrap();
    let i = body.create_local("i", TypeRef::I32).unwrap();
    body.assign(&sum, 0).unwrap();
    body.assign(&i, 0).unwrap();
    body.while_(&i, Comparison::LessThan, &n).unwrap();
    let next = body.add(&sum, &i).unwrap();
    body.assign(&sum, &next).unwrap();
    body.increment(&i).unwrap();
    body.end_while().unwrap();
    body.ret(&sum).unwrap();

    let mut vm = run(&mut module);
    let sum = |vm: &mut Interpreter, n: i32| vm.invoke_static("Calc", "Sum", &[n.into()]).unwrap();
    assert_eq!(sum(&mut vm, 5), Value::I32(10));
    assert_eq!(sum(&mut vm, 0), Value::I32(0));
    assert_eq!(sum(&mut vm, 100), Value::I32(4950));
}

// ============================================================================
// SafeDivide (try / catch)
// ============================================================================

fn fault_module() -> Module {
    let mut module = Module::new("faults", None);
    let fault = module
        .define_type("Fault", TypeAttributes::public(), None, &[])
        .unwrap();
    {
        let mut ty = module.ty(fault).unwrap();
        ty.define_field("Code", TypeRef::I32, FieldAttributes::public())
            .unwrap();
        ty.define_default_constructor(MethodAttributes::public())
            .unwrap();
    }
    let fault_ty = module.type_ref(fault).unwrap();

    let guard = module
        .define_type("Guard", TypeAttributes::public(), None, &[])
        .unwrap();
    let (fail, safe) = {
        let mut ty = module.ty(guard).unwrap();
        let fail = ty
            .define_method("Fail", public_static(), TypeRef::Void, &[("code", TypeRef::I32)])
            .unwrap();
        let safe = ty
            .define_method("SafeDivide", public_static(), TypeRef::I32, &[
                ("a", TypeRef::I32),
                ("b", TypeRef::I32),
            ])
            .unwrap();
        (fail, safe)
    };

    // Fail(code): throw new Fault { Code = code }
    {
        let mut body = module.method(fail).unwrap();
        let code = body.param(0).unwrap();
        let f = body.new_object(fault).unwrap();
        let field = body.field_of(&f, "Code").unwrap();
        body.assign(&field, &code).unwrap();
        body.throw(&f).unwrap();
    }

    // SafeDivide(a, b): if b == 0 the Fault thrown by Fail is caught and its code returned
    {
        let mut body = module.method(safe).unwrap();
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        body.try_().unwrap();
        body.if_(&b, Comparison::Equal, 0).unwrap();
        body.call(fail, None, &[Variable::constant(-1)]).unwrap();
        body.end_if().unwrap();
        let quotient = body.divide(&a, &b).unwrap();
        body.ret(&quotient).unwrap();
        let ex = body.catch(fault_ty).unwrap();
        let code = body.field_of(&ex, "Code").unwrap();
        body.ret(&code).unwrap();
        body.end_try().unwrap();
    }
    module
}

#[test]
fn test_try_catch_across_call() {
    let mut module = fault_module();
    let mut vm = run(&mut module);

    let safe = |vm: &mut Interpreter, a: i32, b: i32| {
        vm.invoke_static("Guard", "SafeDivide", &[a.into(), b.into()])
            .unwrap()
    };
    assert_eq!(safe(&mut vm, 10, 2), Value::I32(5));
    assert_eq!(safe(&mut vm, 10, 0), Value::I32(-1));
}

#[test]
fn test_uncaught_fault() {
    let mut module = fault_module();
    let mut vm = run(&mut module);

    match vm.invoke_static("Guard", "Fail", &[7.into()]) {
        Err(VmError::UncaughtException(what)) => assert_eq!(what, "Fault"),
        other => panic!("expected an uncaught Fault, got {:?}", other),
    }
}

#[test]
fn test_catch_region_in_listing() {
    let module = fault_module();
    let listing = module.to_string();
    assert!(listing.contains("try {"));
    assert!(listing.contains("} catch (Fault __ex"));
    assert!(listing.contains("Guard.Fail(-1);"));
}

// ============================================================================
// Aborted methods
// ============================================================================

#[test]
fn test_aborted_method_poisons_create() {
    let mut module = Module::new("broken", None);
    let calc = module
        .define_type("Calc", TypeAttributes::public(), None, &[])
        .unwrap();
    let bad = module
        .ty(calc)
        .unwrap()
        .define_method("Bad", public_static(), TypeRef::I32, &[])
        .unwrap();

    let mut body = module.method(bad).unwrap();
    let flag = Variable::constant(true);
    assert!(matches!(
        body.add(&flag, 1),
        Err(EmitError::InvalidArgument(_))
    ));
    assert!(matches!(
        body.ret(1),
        Err(EmitError::InvalidOperation(_))
    ));

    match module.create() {
        Err(EmitError::MethodAborted(signature)) => assert_eq!(signature, "Bad()"),
        other => panic!("expected MethodAborted, got {:?}", other.map(|_| ())),
    }
}
