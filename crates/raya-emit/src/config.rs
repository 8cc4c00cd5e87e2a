//! Emit options (TOML)
//!
//! ```toml
//! kind = "executable"
//! output_dir = "build"
//! debug_listing = true
//! max_call_depth = 512
//! ```

use crate::bytecode::ModuleKind;
use crate::error::{EmitError, EmitResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default interpreter recursion limit
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

/// Module-wide code generation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitOptions {
    /// Library or executable
    #[serde(default)]
    pub kind: ModuleKind,

    /// Directory the module is written to on `create()` (no file when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Embed the pseudo-source listing in the materialized module
    #[serde(default)]
    pub debug_listing: bool,

    /// Interpreter call-depth limit
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            kind: ModuleKind::Library,
            output_dir: None,
            debug_listing: false,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl EmitOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> EmitResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EmitError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse options from TOML text
    pub fn from_toml(content: &str) -> EmitResult<Self> {
        let options: EmitOptions =
            toml::from_str(content).map_err(|e| EmitError::Config(e.to_string()))?;
        if options.max_call_depth == 0 {
            return Err(EmitError::Config(
                "max_call_depth must be greater than zero".to_string(),
            ));
        }
        Ok(options)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> EmitResult<String> {
        toml::to_string_pretty(self).map_err(|e| EmitError::Config(e.to_string()))
    }

    pub fn with_kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_debug_listing(mut self, enabled: bool) -> Self {
        self.debug_listing = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_fields() {
        let options = EmitOptions::from_toml("debug_listing = true").unwrap();
        assert_eq!(options.kind, ModuleKind::Library);
        assert!(options.debug_listing);
        assert_eq!(options.output_dir, None);
        assert_eq!(options.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
kind = "executable"
output_dir = "build/out"
max_call_depth = 64
"#;
        let options = EmitOptions::from_toml(toml).unwrap();
        assert_eq!(options.kind, ModuleKind::Executable);
        assert_eq!(options.output_dir, Some(PathBuf::from("build/out")));
        assert_eq!(options.max_call_depth, 64);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EmitOptions::from_toml("kind = \"plugin\""),
            Err(EmitError::Config(_))
        ));
        assert!(matches!(
            EmitOptions::from_toml("max_call_depth = 0"),
            Err(EmitError::Config(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let options = EmitOptions::default()
            .with_kind(ModuleKind::Executable)
            .with_debug_listing(true);
        let text = options.to_toml().unwrap();
        assert_eq!(EmitOptions::from_toml(&text).unwrap(), options);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emit.toml");
        std::fs::write(&path, "kind = \"library\"\n").unwrap();
        assert_eq!(EmitOptions::from_file(&path).unwrap(), EmitOptions::default());
        assert!(EmitOptions::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
