//! Field and method descriptor parsing (JVMS 4.3).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed descriptor: {0}")]
pub struct DescriptorError(pub String);

/// A value type as written in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Class or array type, holding its descriptor text (`Ljava/lang/String;`, `[I`).
    Reference(String),
    Void,
}

impl JvmType {
    /// Local variable / operand stack slots taken by a value of this type.
    pub fn slot_size(&self) -> u16 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            JvmType::Void => 0,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.slot_size() == 2
    }

    /// Parse a single field descriptor such as `I` or `[Ljava/lang/Object;`.
    pub fn parse_field(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let mut pos = 0;
        let ty = parse_type(bytes, &mut pos, descriptor)?;
        if pos != bytes.len() || ty == JvmType::Void {
            return Err(DescriptorError(descriptor.to_string()));
        }
        Ok(ty)
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::Boolean => f.write_str("Z"),
            JvmType::Byte => f.write_str("B"),
            JvmType::Char => f.write_str("C"),
            JvmType::Short => f.write_str("S"),
            JvmType::Int => f.write_str("I"),
            JvmType::Float => f.write_str("F"),
            JvmType::Long => f.write_str("J"),
            JvmType::Double => f.write_str("D"),
            JvmType::Reference(desc) => f.write_str(desc),
            JvmType::Void => f.write_str("V"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<JvmType>,
    pub return_type: JvmType,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let err = || DescriptorError(descriptor.to_string());
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(err());
        }
        let mut pos = 1;
        let mut parameters = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            if pos >= bytes.len() {
                return Err(err());
            }
            let ty = parse_type(bytes, &mut pos, descriptor)?;
            if ty == JvmType::Void {
                return Err(err());
            }
            parameters.push(ty);
        }
        pos += 1;
        let return_type = parse_type(bytes, &mut pos, descriptor)?;
        if pos != bytes.len() {
            return Err(err());
        }
        Ok(Self { parameters, return_type })
    }

    /// Slots taken by the declared parameters, excluding any receiver.
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(JvmType::slot_size).sum()
    }
}

fn parse_type(bytes: &[u8], pos: &mut usize, descriptor: &str) -> Result<JvmType, DescriptorError> {
    let err = || DescriptorError(descriptor.to_string());
    let start = *pos;
    let tag = *bytes.get(*pos).ok_or_else(err)?;
    *pos += 1;
    let ty = match tag {
        b'Z' => JvmType::Boolean,
        b'B' => JvmType::Byte,
        b'C' => JvmType::Char,
        b'S' => JvmType::Short,
        b'I' => JvmType::Int,
        b'F' => JvmType::Float,
        b'J' => JvmType::Long,
        b'D' => JvmType::Double,
        b'V' => JvmType::Void,
        b'L' => {
            let end = bytes[*pos..].iter().position(|&b| b == b';').ok_or_else(err)?;
            if end == 0 {
                return Err(err());
            }
            *pos += end + 1;
            JvmType::Reference(descriptor[start..*pos].to_string())
        }
        b'[' => {
            while bytes.get(*pos) == Some(&b'[') {
                *pos += 1;
            }
            if parse_type(bytes, pos, descriptor)? == JvmType::Void {
                return Err(err());
            }
            JvmType::Reference(descriptor[start..*pos].to_string())
        }
        _ => return Err(err()),
    };
    Ok(ty)
}
