//! `raya-emit demo`: build a sample module with the builder API.
//!
//! The module holds a `Counter` with an auto-property, `Calc.Max` and
//! `Calc.Sum`, a `Guard.SafeDivide` that catches a thrown `Fault`, and a
//! `Program.Main` entry point calling all of them.

use crate::output::StyledOutput;
use anyhow::bail;
use raya_emit::{
    Comparison, EmitOptions, EmitResult, FieldAttributes, MethodAttributes, MethodId, Module,
    ModuleKind, TypeAttributes, TypeRef, Variable,
};
use std::path::PathBuf;
use termcolor::ColorChoice;

pub struct DemoArgs {
    pub out: Option<PathBuf>,
    pub kind: Option<String>,
    pub config: Option<PathBuf>,
    pub color: ColorChoice,
}

pub fn execute(args: DemoArgs) -> anyhow::Result<()> {
    let mut options = match &args.config {
        Some(path) => EmitOptions::from_file(path)?,
        None => EmitOptions::default(),
    };
    if let Some(kind) = &args.kind {
        options = options.with_kind(parse_kind(kind)?);
    }
    if let Some(out) = args.out {
        options = options.with_output_dir(out);
    }

    let mut module = build(options)?;
    let created = module.create()?;

    let mut out = StyledOutput::new(args.color);
    out.plain(module.to_string().trim_end());
    out.newline();
    match module.output_path() {
        Some(path) => out.success(&format!("wrote {}", path.display())),
        None => out.success("created (not persisted; pass --out DIR)"),
    }
    out.field("checksum", created.checksum_hex());
    Ok(())
}

fn parse_kind(kind: &str) -> anyhow::Result<ModuleKind> {
    match kind {
        "library" | "lib" => Ok(ModuleKind::Library),
        "executable" | "exe" => Ok(ModuleKind::Executable),
        other => bail!("unknown module kind '{}' (expected library or executable)", other),
    }
}

fn public_static() -> MethodAttributes {
    MethodAttributes::public().as_static()
}

/// Build the demo module
pub fn build(options: EmitOptions) -> EmitResult<Module> {
    let mut module = Module::with_options("demo", options);
    counter(&mut module)?;
    let (max, sum) = calc(&mut module)?;
    let safe_divide = guard(&mut module)?;

    let program = module.define_type("Program", TypeAttributes::public(), None, &[])?;
    let main = module
        .ty(program)?
        .define_method("Main", public_static(), TypeRef::I32, &[])?;
    {
        let mut body = module.method(main)?;
        let total = body.create_local("total", TypeRef::I32)?;
        let biggest = body.call(max, None, &[Variable::constant(3), Variable::constant(7)])?;
        let summed = body.call(sum, None, &[Variable::constant(5)])?;
        let divided = body.call(safe_divide, None, &[Variable::constant(10), Variable::constant(0)])?;
        body.assign(&total, 0)?;
        for part in [biggest, summed, divided].into_iter().flatten() {
            let next = body.add(&total, &part)?;
            body.assign(&total, &next)?;
        }
        body.ret(&total)?;
    }
    if module.kind() == ModuleKind::Executable {
        module.set_entry_point(main)?;
    }
    Ok(module)
}

fn counter(module: &mut Module) -> EmitResult<()> {
    let counter = module.define_type("Counter", TypeAttributes::public(), None, &[])?;
    let counter_ty = module.type_ref(counter)?;
    let make = {
        let mut ty = module.ty(counter)?;
        ty.define_default_constructor(MethodAttributes::public())?;
        ty.define_auto_property("Value", TypeRef::I32)?;
        ty.define_method("Make", public_static(), counter_ty, &[])?
    };

    let mut body = module.method(make)?;
    let c = body.new_object(counter)?;
    let value = body.property_of(&c, "Value")?;
    let next = body.add(&value, 1)?;
    body.assign(&value, &next)?;
    body.ret(&c)
}

fn calc(module: &mut Module) -> EmitResult<(MethodId, MethodId)> {
    let calc = module.define_type("Calc", TypeAttributes::public(), None, &[])?;
    let (max, sum) = {
        let mut ty = module.ty(calc)?;
        let max = ty.define_method(
            "Max",
            public_static(),
            TypeRef::I32,
            &[("a", TypeRef::I32), ("b", TypeRef::I32)],
        )?;
        let sum = ty.define_method("Sum", public_static(), TypeRef::I32, &[("n", TypeRef::I32)])?;
        (max, sum)
    };

    {
        let mut body = module.method(max)?;
        let (a, b) = (body.param(0)?, body.param(1)?);
        body.if_(&a, Comparison::LessThan, &b)?;
        body.ret(&b)?;
        body.else_()?;
        body.ret(&a)?;
        body.end_if()?;
    }
    {
        let mut body = module.method(sum)?;
        let n = body.param(0)?;
        let total = body.create_local("sum", TypeRef::I32)?;
        let i = body.create_local("i", TypeRef::I32)?;
        body.assign(&total, 0)?;
        body.assign(&i, 0)?;
        body.while_(&i, Comparison::LessThan, &n)?;
        let next = body.add(&total, &i)?;
        body.assign(&total, &next)?;
        body.increment(&i)?;
        body.end_while()?;
        body.ret(&total)?;
    }
    Ok((max, sum))
}

fn guard(module: &mut Module) -> EmitResult<MethodId> {
    let fault = module.define_type("Fault", TypeAttributes::public(), None, &[])?;
    {
        let mut ty = module.ty(fault)?;
        ty.define_field("Code", TypeRef::I32, FieldAttributes::public())?;
        ty.define_default_constructor(MethodAttributes::public())?;
    }
    let fault_ty = module.type_ref(fault)?;

    let guard = module.define_type("Guard", TypeAttributes::public(), None, &[])?;
    let (fail, safe) = {
        let mut ty = module.ty(guard)?;
        let fail = ty.define_method("Fail", public_static(), TypeRef::Void, &[("code", TypeRef::I32)])?;
        let safe = ty.define_method(
            "SafeDivide",
            public_static(),
            TypeRef::I32,
            &[("a", TypeRef::I32), ("b", TypeRef::I32)],
        )?;
        (fail, safe)
    };

    {
        let mut body = module.method(fail)?;
        let code = body.param(0)?;
        let f = body.new_object(fault)?;
        let field = body.field_of(&f, "Code")?;
        body.assign(&field, &code)?;
        body.throw(&f)?;
    }
    {
        let mut body = module.method(safe)?;
        let (a, b) = (body.param(0)?, body.param(1)?);
        body.try_()?;
        body.if_(&b, Comparison::Equal, 0)?;
        body.call(fail, None, &[Variable::constant(-1)])?;
        body.end_if()?;
        let quotient = body.divide(&a, &b)?;
        body.ret(&quotient)?;
        let ex = body.catch(fault_ty)?;
        let code = body.field_of(&ex, "Code")?;
        body.ret(&code)?;
        body.end_try()?;
    }
    Ok(safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raya_emit::{Interpreter, Value};

    #[test]
    fn test_demo_entry_point() {
        let options = EmitOptions::default().with_kind(ModuleKind::Executable);
        let mut module = build(options).unwrap();
        let mut vm = Interpreter::new(module.create().unwrap());
        // Max(3, 7) + Sum(5) + SafeDivide(10, 0)
        assert_eq!(vm.run_entry_point(&[]).unwrap(), Value::I32(7 + 10 - 1));
    }

    #[test]
    fn test_demo_persists_executable() {
        let dir = tempfile::tempdir().unwrap();
        let options = EmitOptions::default()
            .with_kind(ModuleKind::Executable)
            .with_output_dir(dir.path());
        let mut module = build(options).unwrap();
        module.create().unwrap();

        let path = dir.path().join("demo.rye");
        let loaded = crate::commands::load_module(&path).unwrap();
        assert_eq!(loaded.kind, ModuleKind::Executable);
        assert!(loaded.find_class("Counter").is_some());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("exe").unwrap(), ModuleKind::Executable);
        assert_eq!(parse_kind("library").unwrap(), ModuleKind::Library);
        assert!(parse_kind("plugin").is_err());
    }
}
