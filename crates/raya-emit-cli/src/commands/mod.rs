pub mod demo;
pub mod inspect;
pub mod run;

use anyhow::Context;
use raya_emit::bytecode::Module;
use std::path::Path;

/// Read and verify a persisted module
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Module::decode(&bytes).with_context(|| format!("invalid module file {}", path.display()))
}
