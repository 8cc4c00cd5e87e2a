//! Module-wide string constant pool

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;

/// Interned string literals referenced by `CONST_STR`
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// String constants in index order
    pub strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string constant (deduplicated) and return its index
    pub fn add_string(&mut self, s: &str) -> u32 {
        if let Some(&index) = self.index.get(s) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), index);
        index
    }

    /// Get a string constant by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Encode the constant pool to binary format
    ///
    /// Format: string count (u32), then each string length-prefixed.
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }
    }

    /// Decode the constant pool from binary format
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let mut pool = ConstantPool::new();
        let count = reader.read_u32()? as usize;
        pool.strings.reserve(count);
        for _ in 0..count {
            let s = reader.read_string()?;
            pool.add_string(&s);
        }
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_are_interned() {
        let mut pool = ConstantPool::new();
        let a = pool.add_string("hello");
        let b = pool.add_string("world");
        let c = pool.add_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get_string(b), Some("world"));
        assert_eq!(pool.get_string(9), None);
    }

    #[test]
    fn test_encode_decode() {
        let mut pool = ConstantPool::new();
        pool.add_string("alpha");
        pool.add_string("");
        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();

        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded.strings, vec!["alpha".to_string(), String::new()]);
        assert_eq!(decoded.get_string(1), Some(""));
    }
}
