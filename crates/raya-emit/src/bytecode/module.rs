//! Materialized module format
//!
//! A [`Module`] is what `create()` produces: the constant pool, every
//! compiled function, the class and field tables and the enum table. It
//! round-trips through a checksummed binary encoding so it can be written
//! to disk and loaded back by the interpreter.

use super::constants::ConstantPool;
use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Magic number for generated module files
pub const MAGIC: [u8; 4] = *b"RYEM";

/// Current module format version
pub const VERSION: u32 = 1;

/// Encoded stand-in for `None` in index fields
const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Header size: magic + version + flags + crc32 + sha256
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 32;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected RYEM, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// CRC32 mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Calculated checksum
        actual: u32,
    },

    /// SHA-256 mismatch
    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Stored hash (hex)
        expected: String,
        /// Calculated hash (hex)
        actual: String,
    },
}

/// Module flags
pub mod flags {
    /// Module embeds the pseudo-source listing
    pub const HAS_LISTING: u32 = 1 << 0;
}

/// Function flags
pub mod function_flags {
    /// No receiver in slot 0
    pub const STATIC: u32 = 1 << 0;
    /// Instance constructor
    pub const CONSTRUCTOR: u32 = 1 << 1;
    /// Declared without a body
    pub const ABSTRACT: u32 = 1 << 2;
    /// Leaves a value on return
    pub const RETURNS_VALUE: u32 = 1 << 3;
}

/// Library or executable; selects the file extension on persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Reusable module without an entry point
    #[default]
    Library,
    /// Module with a static entry point
    Executable,
}

impl ModuleKind {
    /// File extension used when the module is written to disk
    pub fn extension(self) -> &'static str {
        match self {
            ModuleKind::Library => "ryb",
            ModuleKind::Executable => "rye",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ModuleKind::Library => 0,
            ModuleKind::Executable => 1,
        }
    }

    fn from_u8(tag: u8, offset: usize) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(ModuleKind::Library),
            1 => Ok(ModuleKind::Executable),
            _ => Err(DecodeError::InvalidTag {
                what: "module kind",
                tag,
                offset,
            }),
        }
    }
}

/// Runtime representation class of a value type
///
/// Used as the operand of `BOX`/`UNBOX` and to pick field defaults.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Any reference (default `null`)
    Reference = 0,
    Bool = 1,
    I32 = 2,
    I64 = 3,
    F64 = 4,
}

impl ValueKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Reference),
            1 => Some(ValueKind::Bool),
            2 => Some(ValueKind::I32),
            3 => Some(ValueKind::I64),
            4 => Some(ValueKind::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Reference => "ref",
            ValueKind::Bool => "bool",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F64 => "f64",
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        Self::from_u8(tag).ok_or(DecodeError::InvalidTag {
            what: "value kind",
            tag,
            offset,
        })
    }
}

/// Reference type operand of `CAST` and exception handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// The root reference type; matches everything non-null
    Object,
    /// Strings
    Str,
    /// A class or interface by class id
    Class(u32),
}

impl TypeTag {
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            TypeTag::Object => {
                writer.emit_u8(0);
                writer.emit_u32(0);
            }
            TypeTag::Str => {
                writer.emit_u8(1);
                writer.emit_u32(0);
            }
            TypeTag::Class(id) => {
                writer.emit_u8(2);
                writer.emit_u32(*id);
            }
        }
    }

    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        let id = reader.read_u32()?;
        match tag {
            0 => Ok(TypeTag::Object),
            1 => Ok(TypeTag::Str),
            2 => Ok(TypeTag::Class(id)),
            _ => Err(DecodeError::InvalidTag {
                what: "type",
                tag,
                offset,
            }),
        }
    }
}

/// Protected region with its catch clause
///
/// Offsets are byte positions in the owning function's code. The region
/// covers `try_start..try_end`; on entry to `handler_start` the operand
/// stack holds only the thrown object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub catch_type: TypeTag,
}

impl ExceptionHandler {
    /// Whether the instruction at `offset` is protected by this handler
    pub fn covers(&self, offset: usize) -> bool {
        (self.try_start as usize) <= offset && offset < (self.try_end as usize)
    }
}

/// Function definition
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Owning class id
    pub owner: Option<u32>,
    /// Function flags (see [`function_flags`])
    pub flags: u32,
    /// Number of parameters, including the receiver for instance members
    pub param_count: usize,
    /// Declared kinds of the caller-supplied parameters (receiver excluded)
    pub param_kinds: Vec<ValueKind>,
    /// Number of local slots, including parameters
    pub local_count: usize,
    /// Stack-based bytecode instructions
    pub code: Vec<u8>,
    /// Exception handler table, innermost regions first
    pub handlers: Vec<ExceptionHandler>,
}

impl Function {
    pub fn is_static(&self) -> bool {
        self.flags & function_flags::STATIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.flags & function_flags::CONSTRUCTOR != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.flags & function_flags::ABSTRACT != 0
    }

    pub fn returns_value(&self) -> bool {
        self.flags & function_flags::RETURNS_VALUE != 0
    }

    /// Number of arguments a caller supplies (receiver excluded)
    pub fn arity(&self) -> usize {
        if self.is_static() {
            self.param_count
        } else {
            self.param_count.saturating_sub(1)
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.owner.unwrap_or(NO_INDEX));
        writer.emit_u32(self.flags);
        writer.emit_u32(self.param_count as u32);
        writer.emit_u32(self.param_kinds.len() as u32);
        for kind in &self.param_kinds {
            writer.emit_u8(*kind as u8);
        }
        writer.emit_u32(self.local_count as u32);

        writer.emit_u32(self.code.len() as u32);
        writer.buffer.extend_from_slice(&self.code);

        writer.emit_u32(self.handlers.len() as u32);
        for handler in &self.handlers {
            writer.emit_u32(handler.try_start);
            writer.emit_u32(handler.try_end);
            writer.emit_u32(handler.handler_start);
            handler.catch_type.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let owner = decode_index(reader.read_u32()?);
        let flags = reader.read_u32()?;
        let param_count = reader.read_u32()? as usize;
        let kind_count = reader.read_u32()? as usize;
        let mut param_kinds = preallocate(reader, kind_count);
        for _ in 0..kind_count {
            param_kinds.push(ValueKind::decode(reader)?);
        }
        let local_count = reader.read_u32()? as usize;

        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let handler_count = reader.read_u32()? as usize;
        let mut handlers = preallocate(reader, handler_count);
        for _ in 0..handler_count {
            handlers.push(ExceptionHandler {
                try_start: reader.read_u32()?,
                try_end: reader.read_u32()?,
                handler_start: reader.read_u32()?,
                catch_type: TypeTag::decode(reader)?,
            });
        }

        Ok(Self {
            name,
            owner,
            flags,
            param_count,
            param_kinds,
            local_count,
            code,
            handlers,
        })
    }
}

/// Method table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Function index
    pub function_id: u32,
}

/// Property table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    pub name: String,
    pub getter: Option<u32>,
    pub setter: Option<u32>,
}

/// Class definition
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    /// Parent class ID (None for root classes)
    pub parent_id: Option<u32>,
    /// Implemented interface class IDs
    pub interfaces: Vec<u32>,
    /// Interface type (never instantiated)
    pub is_interface: bool,
    /// Abstract type (never instantiated)
    pub is_abstract: bool,
    /// Declared field ids (global field table indices)
    pub fields: Vec<u32>,
    /// Declared methods
    pub methods: Vec<Method>,
    /// Constructor function ids
    pub constructors: Vec<u32>,
    /// Declared properties
    pub properties: Vec<PropertyEntry>,
}

impl ClassDef {
    /// Find a declared method by name
    pub fn method(&self, name: &str) -> Option<u32> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.function_id)
    }

    /// Find a declared property by name
    pub fn property(&self, name: &str) -> Option<&PropertyEntry> {
        self.properties.iter().find(|p| p.name == name)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.parent_id.unwrap_or(NO_INDEX));

        let mut class_flags = 0u8;
        if self.is_interface {
            class_flags |= 1;
        }
        if self.is_abstract {
            class_flags |= 2;
        }
        writer.emit_u8(class_flags);

        write_u32_list(writer, &self.interfaces);
        write_u32_list(writer, &self.fields);

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            writer.emit_string(&method.name);
            writer.emit_u32(method.function_id);
        }

        write_u32_list(writer, &self.constructors);

        writer.emit_u32(self.properties.len() as u32);
        for prop in &self.properties {
            writer.emit_string(&prop.name);
            writer.emit_u32(prop.getter.unwrap_or(NO_INDEX));
            writer.emit_u32(prop.setter.unwrap_or(NO_INDEX));
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let parent_id = decode_index(reader.read_u32()?);
        let class_flags = reader.read_u8()?;
        let interfaces = read_u32_list(reader)?;
        let fields = read_u32_list(reader)?;

        let method_count = reader.read_u32()? as usize;
        let mut methods = preallocate(reader, method_count);
        for _ in 0..method_count {
            methods.push(Method {
                name: reader.read_string()?,
                function_id: reader.read_u32()?,
            });
        }

        let constructors = read_u32_list(reader)?;

        let prop_count = reader.read_u32()? as usize;
        let mut properties = preallocate(reader, prop_count);
        for _ in 0..prop_count {
            properties.push(PropertyEntry {
                name: reader.read_string()?,
                getter: decode_index(reader.read_u32()?),
                setter: decode_index(reader.read_u32()?),
            });
        }

        Ok(Self {
            name,
            parent_id,
            interfaces,
            is_interface: class_flags & 1 != 0,
            is_abstract: class_flags & 2 != 0,
            fields,
            methods,
            constructors,
            properties,
        })
    }
}

/// Global field table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    /// Declaring class id
    pub owner: u32,
    /// Representation used for the default value
    pub kind: ValueKind,
    pub is_static: bool,
}

/// Enum definition (underlying type i32)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumInfo {
    pub name: String,
    pub members: Vec<(String, i32)>,
}

impl EnumInfo {
    /// Look up a member's value by name
    pub fn value_of(&self, member: &str) -> Option<i32> {
        self.members
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| *value)
    }
}

/// A materialized module
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "RYEM")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Module name
    pub name: String,
    /// Library or executable
    pub kind: ModuleKind,
    /// Static entry function for executables
    pub entry_point: Option<u32>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Function definitions
    pub functions: Vec<Function>,
    /// Class definitions, indexed by class id
    pub classes: Vec<Arc<ClassDef>>,
    /// Global field table
    pub fields: Vec<FieldInfo>,
    /// Enum definitions
    pub enums: Vec<Arc<EnumInfo>>,
    /// Pseudo-source listing (present when HAS_LISTING is set)
    pub listing: Option<String>,
    /// SHA-256 of the encoded payload (filled by encode/decode)
    pub checksum: [u8; 32],
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            name: name.into(),
            kind,
            entry_point: None,
            constants: ConstantPool::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            fields: Vec::new(),
            enums: Vec::new(),
            listing: None,
            checksum: [0; 32],
        }
    }

    /// Get a class by id
    pub fn class(&self, id: u32) -> Option<&ClassDef> {
        self.classes.get(id as usize).map(|c| c.as_ref())
    }

    /// Find a class id by name
    pub fn find_class(&self, name: &str) -> Option<u32> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as u32)
    }

    /// Get a function by id
    pub fn function(&self, id: u32) -> Option<&Function> {
        self.functions.get(id as usize)
    }

    /// Find a method on a class or any of its ancestors
    pub fn find_method(&self, class_id: u32, name: &str) -> Option<u32> {
        let mut current = Some(class_id);
        while let Some(id) = current {
            let class = self.class(id)?;
            if let Some(function_id) = class.method(name) {
                return Some(function_id);
            }
            current = class.parent_id;
        }
        None
    }

    /// Find a property on a class or any of its ancestors
    pub fn find_property(&self, class_id: u32, name: &str) -> Option<&PropertyEntry> {
        let mut current = Some(class_id);
        while let Some(id) = current {
            let class = self.class(id)?;
            if let Some(prop) = class.property(name) {
                return Some(prop);
            }
            current = class.parent_id;
        }
        None
    }

    /// Find a field id on a class or any of its ancestors
    pub fn find_field(&self, class_id: u32, name: &str) -> Option<u32> {
        let mut current = Some(class_id);
        while let Some(id) = current {
            let class = self.class(id)?;
            if let Some(&field_id) = class
                .fields
                .iter()
                .find(|f| self.fields.get(**f as usize).is_some_and(|info| info.name == name))
            {
                return Some(field_id);
            }
            current = class.parent_id;
        }
        None
    }

    /// Every instance field id of a class, ancestors first
    pub fn instance_fields(&self, class_id: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut current = Some(class_id);
        while let Some(id) = current {
            match self.class(id) {
                Some(class) => {
                    chain.push(class);
                    current = class.parent_id;
                }
                None => break,
            }
        }
        chain
            .iter()
            .rev()
            .flat_map(|class| class.fields.iter().copied())
            .filter(|f| self.fields.get(*f as usize).is_some_and(|info| !info.is_static))
            .collect()
    }

    /// Whether `class_id` is `ancestor` or derives from / implements it
    pub fn is_assignable(&self, class_id: u32, ancestor: u32) -> bool {
        let mut current = Some(class_id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            let Some(class) = self.class(id) else {
                return false;
            };
            if class
                .interfaces
                .iter()
                .any(|iface| self.is_assignable(*iface, ancestor))
            {
                return true;
            }
            current = class.parent_id;
        }
        false
    }

    /// Hex form of the content checksum
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Validate header fields
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.magic != MAGIC {
            return Err(ModuleError::InvalidMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(ModuleError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    /// Encode the module to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + crc32 (u32) + sha256 (32 bytes)
    /// - Name, kind, entry point
    /// - Constant pool
    /// - Function table
    /// - Class table
    /// - Field table
    /// - Enum table
    /// - Listing (if HAS_LISTING)
    pub fn encode(&self) -> Vec<u8> {
        use sha2::{Digest, Sha256};

        let mut writer = BytecodeWriter::new();

        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        let flags = if self.listing.is_some() {
            self.flags | flags::HAS_LISTING
        } else {
            self.flags & !flags::HAS_LISTING
        };
        writer.emit_u32(flags);
        let crc32_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for CRC32
        let sha256_offset = writer.offset();
        writer.buffer.extend_from_slice(&[0u8; 32]); // Placeholder for SHA-256

        writer.emit_string(&self.name);
        writer.emit_u8(self.kind.to_u8());
        writer.emit_u32(self.entry_point.unwrap_or(NO_INDEX));

        self.constants.encode(&mut writer);

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer);
        }

        writer.emit_u32(self.classes.len() as u32);
        for class in &self.classes {
            class.encode(&mut writer);
        }

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            writer.emit_string(&field.name);
            writer.emit_u32(field.owner);
            writer.emit_u8(field.kind as u8);
            writer.emit_u8(field.is_static as u8);
        }

        writer.emit_u32(self.enums.len() as u32);
        for info in &self.enums {
            writer.emit_string(&info.name);
            writer.emit_u32(info.members.len() as u32);
            for (name, value) in &info.members {
                writer.emit_string(name);
                writer.emit_i32(*value);
            }
        }

        if let Some(listing) = &self.listing {
            writer.emit_string(listing);
        }

        let payload = &writer.buffer[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        let hash: [u8; 32] = Sha256::digest(payload).into();

        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&hash);

        writer.into_bytes()
    }

    /// Decode a module from binary format, verifying both checksums
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        use sha2::{Digest, Sha256};

        let mut reader = BytecodeReader::new(data);

        let magic: [u8; 4] = reader.read_array()?;
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let checksum: [u8; 32] = reader.read_array()?;

        let payload = &data[HEADER_SIZE..];
        let calculated_crc32 = crc32fast::hash(payload);
        if stored_crc32 != calculated_crc32 {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_crc32,
                actual: calculated_crc32,
            });
        }

        let calculated: [u8; 32] = Sha256::digest(payload).into();
        if checksum != calculated {
            return Err(ModuleError::HashMismatch {
                expected: hex::encode(checksum),
                actual: hex::encode(calculated),
            });
        }

        let name = reader.read_string()?;
        let kind_offset = reader.position();
        let kind = ModuleKind::from_u8(reader.read_u8()?, kind_offset)?;
        let entry_point = decode_index(reader.read_u32()?);

        let constants = ConstantPool::decode(&mut reader)?;

        let func_count = reader.read_u32()? as usize;
        let mut functions = preallocate(&reader, func_count);
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let class_count = reader.read_u32()? as usize;
        let mut classes = preallocate(&reader, class_count);
        for _ in 0..class_count {
            classes.push(Arc::new(ClassDef::decode(&mut reader)?));
        }

        let field_count = reader.read_u32()? as usize;
        let mut fields = preallocate(&reader, field_count);
        for _ in 0..field_count {
            fields.push(FieldInfo {
                name: reader.read_string()?,
                owner: reader.read_u32()?,
                kind: ValueKind::decode(&mut reader)?,
                is_static: reader.read_u8()? != 0,
            });
        }

        let enum_count = reader.read_u32()? as usize;
        let mut enums = preallocate(&reader, enum_count);
        for _ in 0..enum_count {
            let name = reader.read_string()?;
            let member_count = reader.read_u32()? as usize;
            let mut members = preallocate(&reader, member_count);
            for _ in 0..member_count {
                members.push((reader.read_string()?, reader.read_i32()?));
            }
            enums.push(Arc::new(EnumInfo { name, members }));
        }

        let listing = if flags & flags::HAS_LISTING != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };

        Ok(Self {
            magic,
            version,
            flags,
            name,
            kind,
            entry_point,
            constants,
            functions,
            classes,
            fields,
            enums,
            listing,
            checksum,
        })
    }
}

fn decode_index(raw: u32) -> Option<u32> {
    if raw == NO_INDEX {
        None
    } else {
        Some(raw)
    }
}

/// Every encoded entry takes at least one byte, so a count larger than
/// the unread input is clamped before allocating
fn preallocate<T>(reader: &BytecodeReader<'_>, count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(reader.remaining()))
}

fn write_u32_list(writer: &mut BytecodeWriter, items: &[u32]) {
    writer.emit_u32(items.len() as u32);
    for item in items {
        writer.emit_u32(*item);
    }
}

fn read_u32_list(reader: &mut BytecodeReader<'_>) -> Result<Vec<u32>, DecodeError> {
    let count = reader.read_u32()? as usize;
    let mut items = preallocate(reader, count);
    for _ in 0..count {
        items.push(reader.read_u32()?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    fn sample_module() -> Module {
        let mut module = Module::new("sample", ModuleKind::Executable);
        module.constants.add_string("hi");
        module.functions.push(Function {
            name: "Main".to_string(),
            owner: Some(0),
            flags: function_flags::STATIC,
            param_count: 1,
            param_kinds: vec![ValueKind::I64],
            local_count: 1,
            code: vec![Opcode::ReturnVoid.to_u8()],
            handlers: vec![ExceptionHandler {
                try_start: 0,
                try_end: 1,
                handler_start: 1,
                catch_type: TypeTag::Class(0),
            }],
        });
        module.classes.push(Arc::new(ClassDef {
            name: "Program".to_string(),
            parent_id: None,
            interfaces: vec![],
            is_interface: false,
            is_abstract: false,
            fields: vec![0],
            methods: vec![Method {
                name: "Main".to_string(),
                function_id: 0,
            }],
            constructors: vec![],
            properties: vec![],
        }));
        module.fields.push(FieldInfo {
            name: "count".to_string(),
            owner: 0,
            kind: ValueKind::I32,
            is_static: true,
        });
        module.enums.push(Arc::new(EnumInfo {
            name: "Color".to_string(),
            members: vec![("Red".to_string(), 0), ("Blue".to_string(), 4)],
        }));
        module.entry_point = Some(0);
        module.listing = Some("class Program {}".to_string());
        module
    }

    #[test]
    fn test_encode_decode_module() {
        let module = sample_module();
        let bytes = module.encode();
        let decoded = Module::decode(&bytes).unwrap();

        assert_eq!(decoded.name, "sample");
        assert_eq!(decoded.kind, ModuleKind::Executable);
        assert_eq!(decoded.entry_point, Some(0));
        assert_eq!(decoded.constants.get_string(0), Some("hi"));
        assert_eq!(decoded.functions[0].handlers, module.functions[0].handlers);
        assert_eq!(decoded.functions[0].param_kinds, [ValueKind::I64]);
        assert_eq!(decoded.classes[0], module.classes[0]);
        assert_eq!(decoded.fields, module.fields);
        assert_eq!(decoded.enums[0].value_of("Blue"), Some(4));
        assert_eq!(decoded.listing.as_deref(), Some("class Program {}"));
        assert_ne!(decoded.checksum, [0; 32]);
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let mut bytes = sample_module().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_count_is_eof_not_allocation() {
        use sha2::{Digest, Sha256};

        let mut bytes = Module::new("huge", ModuleKind::Library).encode();
        // Trailing u32 is the enum count
        let tail = bytes.len() - 4;
        bytes[tail..].copy_from_slice(&u32::MAX.to_le_bytes());
        let crc32 = crc32fast::hash(&bytes[HEADER_SIZE..]);
        let hash: [u8; 32] = Sha256::digest(&bytes[HEADER_SIZE..]).into();
        bytes[12..16].copy_from_slice(&crc32.to_le_bytes());
        bytes[16..HEADER_SIZE].copy_from_slice(&hash);

        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::DecodeError(DecodeError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn test_preallocate_is_bounded_by_input() {
        let data = [0u8; 8];
        let mut reader = BytecodeReader::new(&data);
        reader.read_u32().unwrap();
        assert_eq!(reader.remaining(), 4);
        let items: Vec<u32> = preallocate(&reader, usize::MAX);
        assert!(items.capacity() <= 4);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_module().encode();
        bytes[0] = b'X';
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_module_kind_extension() {
        assert_eq!(ModuleKind::Library.extension(), "ryb");
        assert_eq!(ModuleKind::Executable.extension(), "rye");
    }

    #[test]
    fn test_is_assignable_through_parent_and_interface() {
        let mut module = Module::new("m", ModuleKind::Library);
        let class = |name: &str, parent_id, interfaces: Vec<u32>| {
            Arc::new(ClassDef {
                name: name.to_string(),
                parent_id,
                interfaces,
                is_interface: false,
                is_abstract: false,
                fields: vec![],
                methods: vec![],
                constructors: vec![],
                properties: vec![],
            })
        };
        module.classes.push(class("IShape", None, vec![]));
        module.classes.push(class("Base", None, vec![0]));
        module.classes.push(class("Derived", Some(1), vec![]));

        assert!(module.is_assignable(2, 1));
        assert!(module.is_assignable(2, 0));
        assert!(!module.is_assignable(1, 2));
    }
}
