//! Label-addressed model of a method body.
//!
//! [`CodeBody::decode`] lifts a [`CodeAttribute`](crate::classfile::CodeAttribute)
//! into an ordered list of [`CodeItem`]s. Every code offset that something
//! refers to (branch targets, exception ranges, stack map frames, line
//! numbers, local variable ranges, `new` sites in uninitialized frame
//! entries) becomes a [`Label`] placed in front of the instruction it names.
//! Code can then be inserted anywhere in the list and [`CodeBody::encode`]
//! resolves every label to its new offset, re-encodes branch offsets and
//! switch padding, and relocates the tables that carry offsets.

mod decode;
mod encode;
mod frames;
pub mod opcodes;

pub use frames::{Frame, VerificationType};

use crate::classfile::RawAttribute;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error("truncated instruction at offset {0}")]
    Truncated(u32),
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: u32 },
    #[error("branch at offset {at} targets {target}, which is not an instruction")]
    InvalidBranchTarget { at: u32, target: i64 },
    #[error("offset {0} does not start an instruction")]
    UnknownOffset(u32),
    #[error("label {0:?} is never placed in the code")]
    UnplacedLabel(Label),
    #[error("branch at offset {at} cannot reach offset {target} with a 16-bit offset")]
    BranchOverflow { at: u32, target: u32 },
    #[error("method code of {0} bytes exceeds 65535")]
    CodeTooLarge(usize),
    #[error("exception range [{start}, {end}) is empty")]
    EmptyHandlerRange { start: u16, end: u16 },
    #[error("stack map frames are not in increasing offset order")]
    FrameOrder,
    #[error("malformed {0} attribute")]
    InvalidAttribute(&'static str),
}

/// A symbolic code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub(crate) u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Any instruction without code offsets. `operands` are the bytes
    /// following the opcode; for `wide` they start with the modified opcode.
    Plain { opcode: u8, operands: Vec<u8> },
    /// Conditional and unconditional branches, `jsr` and their `_w` forms.
    Jump { opcode: u8, target: Label },
    TableSwitch { default: Label, low: i32, high: i32, targets: Vec<Label> },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
}

impl Instruction {
    pub fn op(opcode: u8) -> Self {
        Instruction::Plain { opcode, operands: Vec::new() }
    }

    pub fn with_u1(opcode: u8, operand: u8) -> Self {
        Instruction::Plain { opcode, operands: vec![operand] }
    }

    pub fn with_u2(opcode: u8, operand: u16) -> Self {
        Instruction::Plain { opcode, operands: operand.to_be_bytes().to_vec() }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Plain { opcode, .. } | Instruction::Jump { opcode, .. } => *opcode,
            Instruction::TableSwitch { .. } => opcodes::TABLESWITCH,
            Instruction::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
        }
    }

    /// The opcode that determines the instruction's effect: for `wide`, the
    /// local variable instruction it modifies.
    pub fn effective_opcode(&self) -> u8 {
        match self {
            Instruction::Plain { opcode: opcodes::WIDE, operands } => {
                operands.first().copied().unwrap_or(opcodes::WIDE)
            }
            other => other.opcode(),
        }
    }

    /// First two operand bytes as a big-endian index (constant pool entries).
    pub fn u2_operand(&self) -> Option<u16> {
        match self {
            Instruction::Plain { operands, .. } if operands.len() >= 2 => {
                Some(u16::from_be_bytes([operands[0], operands[1]]))
            }
            _ => None,
        }
    }

    /// Local variable index of a load, store, `ret` or `iinc`, accounting for `wide`.
    pub fn local_index(&self) -> Option<u16> {
        match self {
            Instruction::Plain { opcode: opcodes::WIDE, operands } if operands.len() >= 3 => {
                Some(u16::from_be_bytes([operands[1], operands[2]]))
            }
            Instruction::Plain { opcode, operands } => match *opcode {
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET
                | opcodes::IINC => operands.first().map(|&b| b as u16),
                op @ opcodes::ILOAD_0..=opcodes::ALOAD_3 => Some(((op - opcodes::ILOAD_0) % 4) as u16),
                op @ opcodes::ISTORE_0..=opcodes::ASTORE_3 => Some(((op - opcodes::ISTORE_0) % 4) as u16),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeItem {
    Label(Label),
    Insn(Instruction),
}

/// One exception table entry. `catch_type == 0` catches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: u16,
}

/// A `LocalVariableTable` or `LocalVariableTypeTable` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

/// Sub-attributes of `Code`, in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttr {
    LineNumbers { name_index: u16, entries: Vec<(Label, u16)> },
    LocalVariables { name_index: u16, entries: Vec<LocalVariable> },
    StackMap { name_index: u16, frames: Vec<(Label, Frame)> },
    Raw(RawAttribute),
}

#[derive(Debug, Clone)]
pub struct CodeBody {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub items: Vec<CodeItem>,
    pub handlers: Vec<Handler>,
    pub attributes: Vec<CodeAttr>,
    next_label: u32,
}

impl CodeBody {
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Append an exception table entry after every existing one, so it
    /// only sees exceptions that no earlier handler catches.
    pub fn append_handler(&mut self, start: Label, end: Label, handler: Label, catch_type: u16) {
        self.handlers.push(Handler { start, end, handler, catch_type });
    }

    /// The frames of the `StackMapTable`, if the method has one.
    pub fn stack_map_mut(&mut self) -> Option<&mut Vec<(Label, Frame)>> {
        self.attributes.iter_mut().find_map(|a| match a {
            CodeAttr::StackMap { frames, .. } => Some(frames),
            _ => None,
        })
    }

    /// Add a frame at `label`, creating a `StackMapTable` whose name is the
    /// Utf8 entry `table_name_index` if there is none. Frames must be added
    /// in code order.
    pub fn push_frame(&mut self, label: Label, frame: Frame, table_name_index: u16) {
        match self.stack_map_mut() {
            Some(frames) => frames.push((label, frame)),
            None => self.attributes.push(CodeAttr::StackMap {
                name_index: table_name_index,
                frames: vec![(label, frame)],
            }),
        }
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            CodeItem::Insn(insn) => Some(insn),
            CodeItem::Label(_) => None,
        })
    }
}
