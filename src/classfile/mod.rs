//! Class file container codec.
//!
//! [`ClassUnit::parse`] decodes the outer structure of a `.class` file and
//! [`ClassUnit::to_bytes`] writes it back. Only the `Code` attribute of a
//! method is decoded structurally; every other attribute is carried as raw
//! bytes, so a class that is decoded and re-encoded without changes comes
//! back byte-identical.
//!
//! Instruction-level access to a method body lives in [`crate::bytecode`].

mod constant_pool;
pub mod mutf8;

use std::borrow::Cow;

pub use constant_pool::{ConstantPool, CpInfo};

const MAGIC: u32 = 0xCAFEBABE;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_ABSTRACT: u16 = 0x0400;

/// First class file version whose verifier requires `StackMapTable` frames.
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassFileError {
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid modified UTF-8 in constant pool entry {0}")]
    InvalidMutf8(u16),
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,
    #[error("string of {0} bytes does not fit a constant pool entry")]
    StringTooLong(usize),
    #[error("attribute of {0} bytes is too large")]
    AttributeTooLarge(usize),
}

/// An attribute kept as its undecoded `info` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// A method's `Code` attribute with its bytecode still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Code(CodeAttribute),
    Raw(RawAttribute),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodUnit {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MethodUnit {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<Cow<'a, str>, ClassFileError> {
        cp.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<Cow<'a, str>, ClassFileError> {
        cp.get_utf8(self.descriptor_index)
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Code(code) => Some(code),
            Attribute::Raw(_) => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match a {
            Attribute::Code(code) => Some(code),
            Attribute::Raw(_) => None,
        })
    }
}

/// Decoded form of one class.
#[derive(Debug, Clone)]
pub struct ClassUnit {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodUnit>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassUnit {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = ConstantPool::parse(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.read_u2()?);
        }

        let fields_count = r.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let access_flags = r.read_u2()?;
            let name_index = r.read_u2()?;
            let descriptor_index = r.read_u2()?;
            let attributes = parse_raw_attributes(&mut r)?;
            fields.push(FieldInfo { access_flags, name_index, descriptor_index, attributes });
        }

        let methods_count = r.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(parse_method(&mut r, &constant_pool)?);
        }

        let attributes = parse_raw_attributes(&mut r)?;

        if r.remaining() != 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Internal name of this class, e.g. `com/example/Foo`.
    pub fn name(&self) -> Result<Cow<'_, str>, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFileError> {
        let mut w = Writer::new();
        w.u4(MAGIC);
        w.u2(self.minor_version);
        w.u2(self.major_version);
        self.constant_pool.write(&mut w);
        w.u2(self.access_flags);
        w.u2(self.this_class);
        w.u2(self.super_class);

        w.u2(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            w.u2(*interface);
        }

        w.u2(self.fields.len() as u16);
        for field in &self.fields {
            w.u2(field.access_flags);
            w.u2(field.name_index);
            w.u2(field.descriptor_index);
            write_raw_attributes(&mut w, &field.attributes)?;
        }

        w.u2(self.methods.len() as u16);
        for method in &self.methods {
            w.u2(method.access_flags);
            w.u2(method.name_index);
            w.u2(method.descriptor_index);
            w.u2(method.attributes.len() as u16);
            for attribute in &method.attributes {
                match attribute {
                    Attribute::Code(code) => write_code_attribute(&mut w, code)?,
                    Attribute::Raw(raw) => write_raw_attribute(&mut w, raw)?,
                }
            }
        }

        write_raw_attributes(&mut w, &self.attributes)?;
        Ok(w.into_inner())
    }
}

fn parse_method(r: &mut Reader, cp: &ConstantPool) -> Result<MethodUnit, ClassFileError> {
    let access_flags = r.read_u2()?;
    let name_index = r.read_u2()?;
    let descriptor_index = r.read_u2()?;
    let count = r.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = parse_raw_attribute(r)?;
        if cp.get_utf8(raw.name_index)? == "Code" {
            let mut sub = Reader::new(&raw.info);
            let code = parse_code_attribute(&mut sub, raw.name_index)?;
            if sub.remaining() != 0 {
                return Err(ClassFileError::InvalidAttribute("Code".to_string()));
            }
            attributes.push(Attribute::Code(code));
        } else {
            attributes.push(Attribute::Raw(raw));
        }
    }
    Ok(MethodUnit { access_flags, name_index, descriptor_index, attributes })
}

fn parse_raw_attribute(r: &mut Reader) -> Result<RawAttribute, ClassFileError> {
    let name_index = r.read_u2()?;
    let length = r.read_u4()? as usize;
    let info = r.read_bytes(length)?.to_vec();
    Ok(RawAttribute { name_index, info })
}

fn parse_raw_attributes(r: &mut Reader) -> Result<Vec<RawAttribute>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        attrs.push(parse_raw_attribute(r)?);
    }
    Ok(attrs)
}

fn parse_code_attribute(r: &mut Reader, name_index: u16) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.read_u2()?;
    let max_locals = r.read_u2()?;
    let code_length = r.read_u4()? as usize;
    let code = r.read_bytes(code_length)?.to_vec();
    let exception_table_length = r.read_u2()? as usize;
    let mut exception_table = Vec::with_capacity(exception_table_length);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: r.read_u2()?,
            end_pc: r.read_u2()?,
            handler_pc: r.read_u2()?,
            catch_type: r.read_u2()?,
        });
    }
    let attributes = parse_raw_attributes(r)?;
    Ok(CodeAttribute { name_index, max_stack, max_locals, code, exception_table, attributes })
}

fn write_raw_attribute(w: &mut Writer, attribute: &RawAttribute) -> Result<(), ClassFileError> {
    if attribute.info.len() > u32::MAX as usize {
        return Err(ClassFileError::AttributeTooLarge(attribute.info.len()));
    }
    w.u2(attribute.name_index);
    w.u4(attribute.info.len() as u32);
    w.bytes(&attribute.info);
    Ok(())
}

fn write_raw_attributes(w: &mut Writer, attributes: &[RawAttribute]) -> Result<(), ClassFileError> {
    w.u2(attributes.len() as u16);
    for attribute in attributes {
        write_raw_attribute(w, attribute)?;
    }
    Ok(())
}

fn write_code_attribute(w: &mut Writer, code: &CodeAttribute) -> Result<(), ClassFileError> {
    let mut info = Writer::new();
    info.u2(code.max_stack);
    info.u2(code.max_locals);
    info.u4(code.code.len() as u32);
    info.bytes(&code.code);
    info.u2(code.exception_table.len() as u16);
    for entry in &code.exception_table {
        info.u2(entry.start_pc);
        info.u2(entry.end_pc);
        info.u2(entry.handler_pc);
        info.u2(entry.catch_type);
    }
    write_raw_attributes(&mut info, &code.attributes)?;
    write_raw_attribute(w, &RawAttribute { name_index: code.name_index, info: info.into_inner() })
}

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u8(&mut self) -> Result<u64, ClassFileError> {
        let high = self.read_u4()? as u64;
        let low = self.read_u4()? as u64;
        Ok((high << 32) | low)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Big-endian output buffer.
pub(crate) struct Writer {
    out: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { out: Vec::new() }
    }

    pub(crate) fn u1(&mut self, v: u8) {
        self.out.push(v);
    }

    pub(crate) fn u2(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u4(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u8(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn bytes(&mut self, v: &[u8]) {
        self.out.extend_from_slice(v);
    }

    pub(crate) fn len(&self) -> usize {
        self.out.len()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.out
    }
}
