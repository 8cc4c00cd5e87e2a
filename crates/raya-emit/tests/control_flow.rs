//! Control flow, dispatch and conversions executed through the interpreter

use raya_emit::{
    Comparison, EmitError, FieldAttributes, Interpreter, MethodAttributes, MethodId, Module,
    TypeAttributes, TypeRef, Value, Variable, VmError,
};

fn public_static() -> MethodAttributes {
    MethodAttributes::public().as_static()
}

/// Module with one static method on `Program`
fn single_method(ret: TypeRef, params: &[(&str, TypeRef)]) -> (Module, MethodId) {
    let mut module = Module::new("program", None);
    let program = module
        .define_type("Program", TypeAttributes::public(), None, &[])
        .unwrap();
    let id = module
        .ty(program)
        .unwrap()
        .define_method("Main", public_static(), ret, params)
        .unwrap();
    (module, id)
}

fn run_main(module: &mut Module, args: &[Value]) -> Result<Value, VmError> {
    let mut vm = Interpreter::new(module.create().unwrap());
    vm.invoke_static("Program", "Main", args)
}

// ============================================================================
// Branching
// ============================================================================

#[test]
fn test_else_if_chain() {
    let (mut module, main) = single_method(TypeRef::I32, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    body.if_(&n, Comparison::LessThan, 0).unwrap();
    body.ret(-1).unwrap();
    body.else_if(&n, Comparison::Equal, 0).unwrap();
    body.ret(0).unwrap();
    body.else_().unwrap();
    body.ret(1).unwrap();
    body.end_if().unwrap();

    let mut vm = Interpreter::new(module.create().unwrap());
    for (input, expected) in [(-5, -1), (0, 0), (12, 1)] {
        assert_eq!(
            vm.invoke_static("Program", "Main", &[input.into()]).unwrap(),
            Value::I32(expected)
        );
    }
}

#[test]
fn test_if_without_else_falls_through() {
    let (mut module, main) = single_method(TypeRef::I32, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    let result = body.create_local("result", TypeRef::I32).unwrap();
    body.assign(&result, 10).unwrap();
    body.if_(&n, Comparison::GreaterOrEqual, 100).unwrap();
    body.assign(&result, 20).unwrap();
    body.end_if().unwrap();
    body.ret(&result).unwrap();

    let mut vm = Interpreter::new(module.create().unwrap());
    assert_eq!(vm.invoke_static("Program", "Main", &[5.into()]).unwrap(), Value::I32(10));
    assert_eq!(vm.invoke_static("Program", "Main", &[100.into()]).unwrap(), Value::I32(20));
}

#[test]
fn test_nested_while() {
    // count pairs (i, j) with 0 <= j < i < n
    let (mut module, main) = single_method(TypeRef::I32, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    let count = body.create_local("count", TypeRef::I32).unwrap();
    let i = body.create_local("i", TypeRef::I32).unwrap();
    let j = body.create_local("j", TypeRef::I32).unwrap();
    body.assign(&count, 0).unwrap();
    body.assign(&i, 0).unwrap();
    body.while_(&i, Comparison::LessThan, &n).unwrap();
    body.assign(&j, 0).unwrap();
    body.while_(&j, Comparison::LessThan, &i).unwrap();
    body.increment(&count).unwrap();
    body.increment(&j).unwrap();
    body.end_while().unwrap();
    body.increment(&i).unwrap();
    body.end_while().unwrap();
    body.ret(&count).unwrap();

    assert_eq!(run_main(&mut module, &[5.into()]).unwrap(), Value::I32(10));
}

#[test]
fn test_implicit_default_return() {
    let (mut module, main) = single_method(TypeRef::F64, &[]);
    module.method(main).unwrap();
    assert_eq!(run_main(&mut module, &[]).unwrap(), Value::F64(0.0));
}

const ORDERED: [Comparison; 4] = [
    Comparison::LessThan,
    Comparison::LessOrEqual,
    Comparison::GreaterThan,
    Comparison::GreaterOrEqual,
];

#[test]
fn test_if_with_nan_skips_body() {
    for cmp in ORDERED {
        let (mut module, main) = single_method(TypeRef::I32, &[("x", TypeRef::F64)]);
        let mut body = module.method(main).unwrap();
        let x = body.param(0).unwrap();
        body.if_(&x, cmp, 1.0).unwrap();
        body.ret(1).unwrap();
        body.end_if().unwrap();
        body.ret(0).unwrap();

        let mut vm = Interpreter::new(module.create().unwrap());
        let run = |vm: &mut Interpreter, x: f64| vm.invoke_static("Program", "Main", &[x.into()]).unwrap();
        let inclusive = matches!(cmp, Comparison::LessOrEqual | Comparison::GreaterOrEqual);
        assert_eq!(run(&mut vm, f64::NAN), Value::I32(0), "NaN {} 1.0", cmp.symbol());
        assert_eq!(run(&mut vm, 1.0), Value::I32(i32::from(inclusive)), "1.0 {} 1.0", cmp.symbol());
    }
}

#[test]
fn test_while_with_nan_never_enters() {
    for cmp in ORDERED {
        let (mut module, main) = single_method(TypeRef::I32, &[("x", TypeRef::F64)]);
        let mut body = module.method(main).unwrap();
        let x = body.param(0).unwrap();
        body.while_(&x, cmp, 1.0).unwrap();
        body.ret(1).unwrap();
        body.end_while().unwrap();
        body.ret(0).unwrap();

        assert_eq!(
            run_main(&mut module, &[f64::NAN.into()]).unwrap(),
            Value::I32(0),
            "while (NaN {} 1.0)",
            cmp.symbol()
        );
    }
}

#[test]
fn test_else_branch_taken_for_nan() {
    let (mut module, main) = single_method(TypeRef::I32, &[("x", TypeRef::F64)]);
    let mut body = module.method(main).unwrap();
    let x = body.param(0).unwrap();
    body.if_(&x, Comparison::LessThan, 0.0).unwrap();
    body.ret(-1).unwrap();
    body.else_if(&x, Comparison::GreaterOrEqual, 0.0).unwrap();
    body.ret(1).unwrap();
    body.else_().unwrap();
    body.ret(0).unwrap();
    body.end_if().unwrap();

    let mut vm = Interpreter::new(module.create().unwrap());
    for (input, expected) in [(-2.5, -1), (3.0, 1), (f64::NAN, 0)] {
        assert_eq!(
            vm.invoke_static("Program", "Main", &[input.into()]).unwrap(),
            Value::I32(expected)
        );
    }
}

// ============================================================================
// Block balance
// ============================================================================

fn assert_unbalanced(result: Result<(), EmitError>, marker: &str) {
    match result {
        Err(EmitError::UnbalancedBlock { marker: found, .. }) => assert_eq!(found, marker),
        other => panic!("expected unbalanced {}, got {:?}", marker, other),
    }
}

#[test]
fn test_end_if_without_if() {
    let (mut module, main) = single_method(TypeRef::Void, &[]);
    assert_unbalanced(module.method(main).unwrap().end_if(), "EndIf");
}

#[test]
fn test_end_while_closing_if() {
    let (mut module, main) = single_method(TypeRef::Void, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    body.if_(&n, Comparison::Equal, 1).unwrap();
    assert_unbalanced(body.end_while(), "EndWhile");
}

#[test]
fn test_catch_outside_try() {
    let (mut module, main) = single_method(TypeRef::Void, &[]);
    let result = module.method(main).unwrap().catch(TypeRef::Object).map(|_| ());
    assert_unbalanced(result, "Catch");
}

#[test]
fn test_else_after_else() {
    let (mut module, main) = single_method(TypeRef::Void, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    body.if_(&n, Comparison::Equal, 1).unwrap();
    body.else_().unwrap();
    assert_unbalanced(body.else_(), "Else");
}

#[test]
fn test_try_requires_catch() {
    let (mut module, main) = single_method(TypeRef::Void, &[]);
    let mut body = module.method(main).unwrap();
    body.try_().unwrap();
    assert_unbalanced(body.end_try(), "EndTry");
}

#[test]
fn test_unclosed_block_at_create() {
    let (mut module, main) = single_method(TypeRef::Void, &[("n", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let n = body.param(0).unwrap();
    body.while_(&n, Comparison::GreaterThan, 0).unwrap();

    match module.create() {
        Err(EmitError::UnclosedBlock { count, .. }) => assert_eq!(count, 1),
        other => panic!("expected UnclosedBlock, got {:?}", other.map(|_| ())),
    }
}

// ============================================================================
// Conversions
// ============================================================================

#[test]
fn test_mixed_widening() {
    let (mut module, main) =
        single_method(TypeRef::F64, &[("a", TypeRef::I32), ("b", TypeRef::I64)]);
    let mut body = module.method(main).unwrap();
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let sum = body.add(&a, &b).unwrap();
    assert_eq!(sum.ty(), &TypeRef::I64);
    body.ret(&sum).unwrap();

    let result = run_main(&mut module, &[Value::I32(3), Value::I64(4)]).unwrap();
    assert_eq!(result, Value::F64(7.0));
}

#[test]
fn test_box_assign_round_trip() {
    let (mut module, main) = single_method(TypeRef::I32, &[("x", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let x = body.param(0).unwrap();
    let o = body.create_local("o", TypeRef::Object).unwrap();
    let n = body.create_local("n", TypeRef::I32).unwrap();
    body.assign(&o, &x).unwrap();
    body.assign(&n, &o).unwrap();
    body.ret(&n).unwrap();

    let rendered: Vec<String> = body_lines(&module, main);
    assert!(rendered.contains(&"o = (object)x;".to_string()));
    assert!(rendered.contains(&"n = (int)o;".to_string()));
    assert_eq!(run_main(&mut module, &[42.into()]).unwrap(), Value::I32(42));
}

#[test]
fn test_unbox_wrong_kind_faults() {
    let (mut module, main) = single_method(TypeRef::F64, &[("x", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let x = body.param(0).unwrap();
    let boxed = body.box_value(&x).unwrap();
    let back = body.unbox(&boxed, TypeRef::F64).unwrap();
    body.ret(&back).unwrap();

    assert!(matches!(
        run_main(&mut module, &[1.into()]),
        Err(VmError::InvalidCast { .. })
    ));
}

#[test]
fn test_conversion_argument_checks() {
    let (mut module, main) = single_method(TypeRef::Void, &[("x", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let x = body.param(0).unwrap();
    assert!(matches!(
        body.cast(&x, TypeRef::Object),
        Err(EmitError::InvalidArgument(_))
    ));
}

#[test]
fn test_string_concat() {
    let (mut module, main) = single_method(TypeRef::Str, &[("name", TypeRef::Str)]);
    let mut body = module.method(main).unwrap();
    let name = body.param(0).unwrap();
    let greeting = body.add(&Variable::constant("Hello, "), &name).unwrap();
    body.ret(&greeting).unwrap();

    assert_eq!(
        run_main(&mut module, &[Value::str("Ada")]).unwrap(),
        Value::str("Hello, Ada")
    );
}

#[test]
fn test_division_by_zero_is_a_fault() {
    let (mut module, main) = single_method(TypeRef::I32, &[("a", TypeRef::I32), ("b", TypeRef::I32)]);
    let mut body = module.method(main).unwrap();
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    body.try_().unwrap();
    let q = body.divide(&a, &b).unwrap();
    body.ret(&q).unwrap();
    body.catch(TypeRef::Object).unwrap();
    body.ret(-1).unwrap();
    body.end_try().unwrap();

    assert!(matches!(
        run_main(&mut module, &[1.into(), 0.into()]),
        Err(VmError::DivisionByZero)
    ));
}

fn body_lines(module: &Module, id: MethodId) -> Vec<String> {
    module
        .method_def(id)
        .unwrap()
        .commands()
        .iter()
        .map(|c| c.command.to_string())
        .collect()
}

// ============================================================================
// Types: interfaces, base constructors, statics, casts
// ============================================================================

fn shapes() -> Module {
    let mut module = Module::new("shapes", None);
    let ishape = module
        .define_type("IShape", TypeAttributes::public().as_interface(), None, &[])
        .unwrap();
    module
        .ty(ishape)
        .unwrap()
        .define_method("Area", MethodAttributes::public(), TypeRef::I32, &[])
        .unwrap();
    let ishape_ty = module.type_ref(ishape).unwrap();

    let square = module
        .define_type("Square", TypeAttributes::public(), None, &[ishape])
        .unwrap();
    let square_ty = module.type_ref(square).unwrap();
    let (ctor, area) = {
        let mut ty = module.ty(square).unwrap();
        ty.define_field("Side", TypeRef::I32, FieldAttributes::public().as_readonly())
            .unwrap();
        let ctor = ty
            .define_constructor(MethodAttributes::public(), &[("side", TypeRef::I32)])
            .unwrap();
        let area = ty
            .define_method("Area", MethodAttributes::public(), TypeRef::I32, &[])
            .unwrap();
        (ctor, area)
    };
    {
        let mut body = module.method(ctor).unwrap();
        let side = body.param(0).unwrap();
        let field = body.field("Side").unwrap();
        body.assign(&field, &side).unwrap();
    }
    {
        let mut body = module.method(area).unwrap();
        let side = body.field("Side").unwrap();
        let product = body.multiply(&side, &side).unwrap();
        body.ret(&product).unwrap();
    }

    let geometry = module
        .define_type("Geometry", TypeAttributes::public(), None, &[])
        .unwrap();
    let (measure, as_square, bump) = {
        let mut ty = module.ty(geometry).unwrap();
        ty.define_field("Calls", TypeRef::I32, FieldAttributes::public().as_static())
            .unwrap();
        let measure = ty
            .define_method("Measure", public_static(), TypeRef::I32, &[("shape", ishape_ty)])
            .unwrap();
        let as_square = ty
            .define_method("AsSquare", public_static(), square_ty.clone(), &[("o", TypeRef::Object)])
            .unwrap();
        let bump = ty
            .define_method("Bump", public_static(), TypeRef::I32, &[])
            .unwrap();
        (measure, as_square, bump)
    };
    {
        let mut body = module.method(measure).unwrap();
        let shape = body.param(0).unwrap();
        let area = body.call_named(&shape, "Area", &[]).unwrap().unwrap();
        body.ret(&area).unwrap();
    }
    {
        let mut body = module.method(as_square).unwrap();
        let o = body.param(0).unwrap();
        let cast = body.cast(&o, square_ty).unwrap();
        body.ret(&cast).unwrap();
    }
    {
        let mut body = module.method(bump).unwrap();
        let calls = body.field("Calls").unwrap();
        let next = body.increment(&calls).unwrap();
        body.ret(&next).unwrap();
    }
    module
}

#[test]
fn test_interface_dispatch() {
    let mut shapes = shapes();
    let mut vm = Interpreter::new(shapes.create().unwrap());
    let square = vm.new_object("Square", &[3.into()]).unwrap();
    assert_eq!(vm.get_field(&square, "Side").unwrap(), Value::I32(3));
    assert_eq!(
        vm.invoke_static("Geometry", "Measure", &[square.clone()]).unwrap(),
        Value::I32(9)
    );
    assert_eq!(vm.call_method(&square, "Area", &[]).unwrap(), Value::I32(9));
}

#[test]
fn test_checked_cast() {
    let mut shapes = shapes();
    let mut vm = Interpreter::new(shapes.create().unwrap());
    let square = vm.new_object("Square", &[2.into()]).unwrap();

    let same = vm.invoke_static("Geometry", "AsSquare", &[square.clone()]).unwrap();
    assert_eq!(same, square);
    assert_eq!(
        vm.invoke_static("Geometry", "AsSquare", &[Value::Null]).unwrap(),
        Value::Null
    );
    assert!(matches!(
        vm.invoke_static("Geometry", "AsSquare", &[Value::str("square")]),
        Err(VmError::InvalidCast { .. })
    ));
}

#[test]
fn test_static_field_persists_across_calls() {
    let mut shapes = shapes();
    let mut vm = Interpreter::new(shapes.create().unwrap());
    assert_eq!(vm.invoke_static("Geometry", "Bump", &[]).unwrap(), Value::I32(1));
    assert_eq!(vm.invoke_static("Geometry", "Bump", &[]).unwrap(), Value::I32(2));
}

#[test]
fn test_readonly_field_outside_constructor() {
    let mut shapes = shapes();
    let square = shapes.find_type("Square").unwrap();
    let resize = shapes
        .ty(square)
        .unwrap()
        .define_method("Resize", MethodAttributes::public(), TypeRef::Void, &[])
        .unwrap();
    let mut body = shapes.method(resize).unwrap();
    let side = body.field("Side").unwrap();
    assert!(body.assign(&side, 1).is_err());
}

#[test]
fn test_base_constructor_chain() {
    let mut module = Module::new("zoo", None);
    let animal = module
        .define_type("Animal", TypeAttributes::public(), None, &[])
        .unwrap();
    let animal_ctor = {
        let mut ty = module.ty(animal).unwrap();
        ty.define_field("Legs", TypeRef::I32, FieldAttributes::public())
            .unwrap();
        ty.define_constructor(MethodAttributes::public(), &[("legs", TypeRef::I32)])
            .unwrap()
    };
    {
        let mut body = module.method(animal_ctor).unwrap();
        let legs = body.param(0).unwrap();
        let field = body.field("Legs").unwrap();
        body.assign(&field, &legs).unwrap();
    }

    let dog = module
        .define_type("Dog", TypeAttributes::public(), Some(animal), &[])
        .unwrap();
    let dog_ctor = module
        .ty(dog)
        .unwrap()
        .define_constructor(MethodAttributes::public(), &[])
        .unwrap();
    module
        .method(dog_ctor)
        .unwrap()
        .call_base_constructor(&[Variable::constant(4)])
        .unwrap();

    let mut vm = Interpreter::new(module.create().unwrap());
    let rex = vm.new_object("Dog", &[]).unwrap();
    assert_eq!(vm.get_field(&rex, "Legs").unwrap(), Value::I32(4));
}

// ============================================================================
// Exceptions
// ============================================================================

fn exception_type(module: &mut Module, name: &str) -> (raya_emit::TypeId, TypeRef) {
    let id = module
        .define_type(name, TypeAttributes::public(), None, &[])
        .unwrap();
    module
        .ty(id)
        .unwrap()
        .define_field("Code", TypeRef::I32, FieldAttributes::public())
        .unwrap();
    (id, module.type_ref(id).unwrap())
}

#[test]
fn test_nested_try_falls_to_outer_handler() {
    let mut module = Module::new("nested", None);
    let (_, fault_ty) = exception_type(&mut module, "Fault");
    let (other, _) = exception_type(&mut module, "Other");

    let program = module
        .define_type("Program", TypeAttributes::public(), None, &[])
        .unwrap();
    let main = module
        .ty(program)
        .unwrap()
        .define_method("Main", public_static(), TypeRef::I32, &[])
        .unwrap();

    let mut body = module.method(main).unwrap();
    body.try_().unwrap();
    body.try_().unwrap();
    let thrown = body.new_object(other).unwrap();
    body.throw(&thrown).unwrap();
    body.catch(fault_ty).unwrap();
    body.ret(1).unwrap();
    body.end_try().unwrap();
    body.ret(0).unwrap();
    let caught = body.catch(TypeRef::Object).unwrap();
    assert_eq!(caught.ty(), &TypeRef::Object);
    body.ret(2).unwrap();
    body.end_try().unwrap();

    assert_eq!(run_main(&mut module, &[]).unwrap(), Value::I32(2));
}
