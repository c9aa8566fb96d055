use std::borrow::Cow;

use super::{mutf8, ClassFileError, Reader, Writer};

/// One constant pool entry.
///
/// `Utf8` keeps the raw modified UTF-8 bytes so that re-encoding never
/// changes a string the engine did not add.
#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl CpInfo {
    fn is_wide(&self) -> bool {
        matches!(self, CpInfo::Long(_) | CpInfo::Double(_))
    }
}

/// The constant pool of one class.
///
/// Index 0 and the slot after every `Long`/`Double` are unusable and stored
/// as `None`. New entries are only ever appended, so existing indices stay
/// valid while a class is being rewritten.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl ConstantPool {
    /// Largest legal `constant_pool_count`.
    pub const MAX_COUNT: usize = u16::MAX as usize;

    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    /// The `constant_pool_count` value written to the class file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(bytes) => mutf8::decode(bytes).ok_or(ClassFileError::InvalidMutf8(index)),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Internal name of a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Owner, name and descriptor of a field or method reference.
    pub fn member_ref(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>, Cow<'_, str>), ClassFileError> {
        let (class_index, nat_index) = match self.get(index)? {
            CpInfo::Fieldref { class_index, name_and_type_index }
            | CpInfo::Methodref { class_index, name_and_type_index }
            | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                (*class_index, *name_and_type_index)
            }
            _ => return Err(ClassFileError::InvalidConstantPoolIndex(index)),
        };
        let (name, descriptor) = self.name_and_type_at(nat_index)?;
        Ok((self.class_name(class_index)?, name, descriptor))
    }

    /// Name and descriptor referenced by an `invokedynamic` call site.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>), ClassFileError> {
        match self.get(index)? {
            CpInfo::InvokeDynamic { name_and_type_index, .. } => self.name_and_type_at(*name_and_type_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    fn name_and_type_at(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>), ClassFileError> {
        match self.get(index)? {
            CpInfo::NameAndType { name_index, descriptor_index } => {
                Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, ClassFileError> {
        let encoded = mutf8::encode(value);
        if encoded.len() > u16::MAX as usize {
            return Err(ClassFileError::StringTooLong(encoded.len()));
        }
        self.find_or_push(CpInfo::Utf8(encoded))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        self.find_or_push(CpInfo::Class { name_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.find_or_push(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.find_or_push(CpInfo::Methodref { class_index, name_and_type_index })
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, ClassFileError> {
        self.find_or_push(CpInfo::Integer(value))
    }

    fn find_or_push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        if let Some(pos) = self.entries.iter().position(|e| e.as_ref() == Some(&entry)) {
            return Ok(pos as u16);
        }
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > Self::MAX_COUNT {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if slots == 2 {
            self.entries.push(None);
        }
        Ok(index)
    }

    pub(crate) fn parse(r: &mut Reader) -> Result<Self, ClassFileError> {
        let count = r.read_u2()? as usize;
        let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
        entries.push(None); // index 0 is unused

        while entries.len() < count {
            let tag = r.read_u1()?;
            let entry = match tag {
                1 => {
                    let len = r.read_u2()? as usize;
                    CpInfo::Utf8(r.read_bytes(len)?.to_vec())
                }
                3 => CpInfo::Integer(r.read_u4()? as i32),
                4 => CpInfo::Float(f32::from_bits(r.read_u4()?)),
                5 => CpInfo::Long(r.read_u8()? as i64),
                6 => CpInfo::Double(f64::from_bits(r.read_u8()?)),
                7 => CpInfo::Class { name_index: r.read_u2()? },
                8 => CpInfo::String { string_index: r.read_u2()? },
                9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
                10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
                11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
                12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
                15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
                16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
                17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
                18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
                19 => CpInfo::Module { name_index: r.read_u2()? },
                20 => CpInfo::Package { name_index: r.read_u2()? },
                _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
            };

            let wide = entry.is_wide();
            entries.push(Some(entry));
            if wide {
                entries.push(None);
            }
        }

        // A trailing Long/Double may claim one slot past the declared count.
        if entries.len() > count {
            return Err(ClassFileError::InvalidConstantPoolIndex(count as u16));
        }

        Ok(Self { entries })
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.u2(self.count());
        for entry in self.entries.iter().flatten() {
            match entry {
                CpInfo::Utf8(bytes) => {
                    w.u1(1);
                    w.u2(bytes.len() as u16);
                    w.bytes(bytes);
                }
                CpInfo::Integer(v) => {
                    w.u1(3);
                    w.u4(*v as u32);
                }
                CpInfo::Float(v) => {
                    w.u1(4);
                    w.u4(v.to_bits());
                }
                CpInfo::Long(v) => {
                    w.u1(5);
                    w.u8(*v as u64);
                }
                CpInfo::Double(v) => {
                    w.u1(6);
                    w.u8(v.to_bits());
                }
                CpInfo::Class { name_index } => {
                    w.u1(7);
                    w.u2(*name_index);
                }
                CpInfo::String { string_index } => {
                    w.u1(8);
                    w.u2(*string_index);
                }
                CpInfo::Fieldref { class_index, name_and_type_index } => {
                    w.u1(9);
                    w.u2(*class_index);
                    w.u2(*name_and_type_index);
                }
                CpInfo::Methodref { class_index, name_and_type_index } => {
                    w.u1(10);
                    w.u2(*class_index);
                    w.u2(*name_and_type_index);
                }
                CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                    w.u1(11);
                    w.u2(*class_index);
                    w.u2(*name_and_type_index);
                }
                CpInfo::NameAndType { name_index, descriptor_index } => {
                    w.u1(12);
                    w.u2(*name_index);
                    w.u2(*descriptor_index);
                }
                CpInfo::MethodHandle { reference_kind, reference_index } => {
                    w.u1(15);
                    w.u1(*reference_kind);
                    w.u2(*reference_index);
                }
                CpInfo::MethodType { descriptor_index } => {
                    w.u1(16);
                    w.u2(*descriptor_index);
                }
                CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                    w.u1(17);
                    w.u2(*bootstrap_method_attr_index);
                    w.u2(*name_and_type_index);
                }
                CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                    w.u1(18);
                    w.u2(*bootstrap_method_attr_index);
                    w.u2(*name_and_type_index);
                }
                CpInfo::Module { name_index } => {
                    w.u1(19);
                    w.u2(*name_index);
                }
                CpInfo::Package { name_index } => {
                    w.u1(20);
                    w.u2(*name_index);
                }
            }
        }
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}
