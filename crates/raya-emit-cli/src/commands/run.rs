//! `raya-emit run`: execute a persisted module on the interpreter.

use anyhow::{anyhow, bail};
use raya_emit::bytecode::{Function, Module, ValueKind};
use raya_emit::{EmitOptions, Interpreter, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct RunArgs {
    pub file: PathBuf,
    pub entry: Option<String>,
    pub config: Option<PathBuf>,
    pub args: Vec<String>,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let module = Arc::new(super::load_module(&args.file)?);
    let options = match &args.config {
        Some(path) => EmitOptions::from_file(path)?,
        None => EmitOptions::default(),
    };

    let function_id = match &args.entry {
        Some(entry) => resolve_static(&module, entry)?,
        None => module
            .entry_point
            .ok_or_else(|| anyhow!("module '{}' has no entry point; pass --entry Class.method", module.name))?,
    };
    let function = module
        .function(function_id)
        .ok_or_else(|| anyhow!("function {} is not in module '{}'", function_id, module.name))?;
    let returns_value = function.returns_value();
    let values = parse_args(function, &args.args)?;

    info!(module = %module.name, function_id, args = values.len(), "running");

    let mut vm = Interpreter::new(module).with_max_call_depth(options.max_call_depth);
    let result = vm.invoke(function_id, &values)?;
    if returns_value {
        println!("{}", result);
    }
    Ok(())
}

fn resolve_static(module: &Module, entry: &str) -> anyhow::Result<u32> {
    let Some((class, method)) = entry.rsplit_once('.') else {
        bail!("expected Class.method, got '{}'", entry);
    };
    let class_id = module
        .find_class(class)
        .ok_or_else(|| anyhow!("unknown class '{}'", class))?;
    let function_id = module
        .find_method(class_id, method)
        .ok_or_else(|| anyhow!("unknown method '{}'", entry))?;
    match module.function(function_id) {
        Some(f) if f.is_static() => Ok(function_id),
        _ => bail!("'{}' is not a static method", entry),
    }
}

/// Convert command-line arguments to the declared parameter kinds
fn parse_args(function: &Function, args: &[String]) -> anyhow::Result<Vec<Value>> {
    if args.len() != function.param_kinds.len() {
        bail!(
            "'{}' takes {} argument(s), got {}",
            function.name,
            function.param_kinds.len(),
            args.len()
        );
    }
    function
        .param_kinds
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (kind, text))| {
            parse_arg(*kind, text).ok_or_else(|| {
                anyhow!("argument {} ('{}') is not a valid {}", index + 1, text, kind.name())
            })
        })
        .collect()
}

/// `true`/`false`, `42`, `42` or `42L`, `1.5`; references take `null` or a string
fn parse_arg(kind: ValueKind, text: &str) -> Option<Value> {
    match kind {
        ValueKind::Bool => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueKind::I32 => text.parse().ok().map(Value::I32),
        ValueKind::I64 => text
            .strip_suffix('L')
            .unwrap_or(text)
            .parse()
            .ok()
            .map(Value::I64),
        ValueKind::F64 => text.parse().ok().map(Value::F64),
        ValueKind::Reference if text == "null" => Some(Value::Null),
        ValueKind::Reference => Some(Value::str(text)),
    }
}
