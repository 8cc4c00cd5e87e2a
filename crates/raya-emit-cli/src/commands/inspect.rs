//! `raya-emit inspect`: print a module's header, types and functions.

use crate::output::StyledOutput;
use raya_emit::bytecode::{disassemble, Module};
use std::path::PathBuf;
use termcolor::ColorChoice;

pub struct InspectArgs {
    pub file: PathBuf,
    pub disasm: bool,
    pub listing: bool,
    pub color: ColorChoice,
}

pub fn execute(args: InspectArgs) -> anyhow::Result<()> {
    let module = super::load_module(&args.file)?;
    let mut out = StyledOutput::new(args.color);

    out.heading(&format!("module {}", module.name));
    out.field("kind", format!("{:?}", module.kind).to_lowercase());
    out.field("checksum", module.checksum_hex());
    out.field("entry", entry_name(&module).unwrap_or_else(|| "-".to_string()));
    out.field("constants", module.constants.len());
    out.field("functions", module.functions.len());

    if !module.enums.is_empty() {
        out.newline();
        out.heading("enums");
        for e in &module.enums {
            let members: Vec<String> = e.members.iter().map(|(n, v)| format!("{} = {}", n, v)).collect();
            out.plain(&format!("  {} {{ {} }}", e.name, members.join(", ")));
        }
    }

    out.newline();
    out.heading("types");
    for class in &module.classes {
        let mut header = format!("  {}", class.name);
        if let Some(parent) = class.parent_id.and_then(|id| module.classes.get(id as usize)) {
            header.push_str(&format!(" : {}", parent.name));
        }
        if class.is_interface {
            header.push_str(" (interface)");
        } else if class.is_abstract {
            header.push_str(" (abstract)");
        }
        out.plain(&header);
        for field in class.fields.iter().filter_map(|id| module.fields.get(*id as usize)) {
            let scope = if field.is_static { "static " } else { "" };
            out.plain(&format!("    field {}{} {}", scope, field.kind.name(), field.name));
        }
        for method in &class.methods {
            if let Some(f) = module.functions.get(method.function_id as usize) {
                out.plain(&format!(
                    "    method {} #{} ({} params, {} bytes)",
                    method.name,
                    method.function_id,
                    f.param_count,
                    f.code.len()
                ));
            }
        }
    }

    if args.disasm {
        for (id, function) in module.functions.iter().enumerate() {
            out.newline();
            out.heading(&format!("#{} {}", id, qualified_name(&module, id as u32)));
            out.plain(disassemble(function, &module.constants)?.trim_end());
        }
    }

    if args.listing {
        out.newline();
        match &module.listing {
            Some(listing) => out.plain(listing.trim_end()),
            None => out.plain("(no listing; rebuild with debug_listing = true)"),
        }
    }
    Ok(())
}

fn qualified_name(module: &Module, function_id: u32) -> String {
    let Some(function) = module.functions.get(function_id as usize) else {
        return format!("<{}>", function_id);
    };
    match function.owner.and_then(|c| module.classes.get(c as usize)) {
        Some(class) => format!("{}.{}", class.name, function.name),
        None => function.name.clone(),
    }
}

fn entry_name(module: &Module) -> Option<String> {
    module.entry_point.map(|id| qualified_name(module, id))
}
