use std::collections::BTreeMap;

use super::frames::parse_stack_map_table;
use super::opcodes::{self, OperandLayout};
use super::{BytecodeError, CodeAttr, CodeBody, CodeItem, Handler, Instruction, Label, LocalVariable};
use crate::classfile::{CodeAttribute, ConstantPool, Reader};

/// Instruction with absolute target offsets, before labels exist.
enum RawInsn {
    Plain { opcode: u8, operands: Vec<u8> },
    Jump { opcode: u8, target: u32 },
    TableSwitch { default: u32, low: i32, high: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
}

/// Assigns one label per referenced offset.
struct Labels {
    starts: Vec<bool>,
    by_offset: BTreeMap<u32, Label>,
}

impl Labels {
    /// Label for an offset that must start an instruction.
    fn at(&mut self, offset: u32) -> Result<Label, BytecodeError> {
        if !self.starts.get(offset as usize).copied().unwrap_or(false) {
            return Err(BytecodeError::UnknownOffset(offset));
        }
        Ok(self.get_or_insert(offset))
    }

    /// Label for an exclusive range end, which may also be the code length.
    fn end(&mut self, offset: u32) -> Result<Label, BytecodeError> {
        if offset as usize == self.starts.len() - 1 {
            return Ok(self.get_or_insert(offset));
        }
        self.at(offset)
    }

    fn get_or_insert(&mut self, offset: u32) -> Label {
        let next = Label(self.by_offset.len() as u32);
        *self.by_offset.entry(offset).or_insert(next)
    }
}

impl CodeBody {
    /// Lift a `Code` attribute into labelled items.
    ///
    /// `RuntimeVisibleTypeAnnotations` and `RuntimeInvisibleTypeAnnotations`
    /// are dropped because their offsets cannot be relocated without
    /// decoding every annotation target; other unknown sub-attributes are
    /// kept verbatim.
    pub fn decode(code: &CodeAttribute, cp: &ConstantPool) -> Result<Self, BytecodeError> {
        let raw = scan(&code.code)?;

        let mut starts = vec![false; code.code.len() + 1];
        for (offset, _) in &raw {
            starts[*offset as usize] = true;
        }
        let mut labels = Labels { starts, by_offset: BTreeMap::new() };

        let mut insns = Vec::with_capacity(raw.len());
        for (offset, insn) in raw {
            let insn = match insn {
                RawInsn::Plain { opcode, operands } => Instruction::Plain { opcode, operands },
                RawInsn::Jump { opcode, target } => Instruction::Jump { opcode, target: labels.at(target)? },
                RawInsn::TableSwitch { default, low, high, targets } => Instruction::TableSwitch {
                    default: labels.at(default)?,
                    low,
                    high,
                    targets: targets.into_iter().map(|t| labels.at(t)).collect::<Result<_, _>>()?,
                },
                RawInsn::LookupSwitch { default, pairs } => Instruction::LookupSwitch {
                    default: labels.at(default)?,
                    pairs: pairs
                        .into_iter()
                        .map(|(k, t)| Ok((k, labels.at(t)?)))
                        .collect::<Result<_, BytecodeError>>()?,
                },
            };
            insns.push((offset, insn));
        }

        let mut handlers = Vec::with_capacity(code.exception_table.len());
        for entry in &code.exception_table {
            handlers.push(Handler {
                start: labels.at(entry.start_pc as u32)?,
                end: labels.end(entry.end_pc as u32)?,
                handler: labels.at(entry.handler_pc as u32)?,
                catch_type: entry.catch_type,
            });
        }

        let mut attributes = Vec::with_capacity(code.attributes.len());
        for attribute in &code.attributes {
            let name = cp
                .get_utf8(attribute.name_index)
                .map_err(|_| BytecodeError::InvalidAttribute("Code"))?;
            match name.as_ref() {
                "StackMapTable" => {
                    let frames = parse_stack_map_table(&attribute.info, |offset| labels.at(offset))?;
                    attributes.push(CodeAttr::StackMap { name_index: attribute.name_index, frames });
                }
                "LineNumberTable" => {
                    let entries = parse_line_numbers(&attribute.info, &mut labels)?;
                    attributes.push(CodeAttr::LineNumbers { name_index: attribute.name_index, entries });
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let entries = parse_local_variables(&attribute.info, &mut labels)?;
                    attributes.push(CodeAttr::LocalVariables { name_index: attribute.name_index, entries });
                }
                "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {}
                _ => attributes.push(CodeAttr::Raw(attribute.clone())),
            }
        }

        let code_end = code.code.len() as u32;
        let mut items = Vec::with_capacity(insns.len() + labels.by_offset.len());
        for (offset, insn) in insns {
            if let Some(label) = labels.by_offset.get(&offset) {
                items.push(CodeItem::Label(*label));
            }
            items.push(CodeItem::Insn(insn));
        }
        if let Some(label) = labels.by_offset.get(&code_end) {
            items.push(CodeItem::Label(*label));
        }

        Ok(CodeBody {
            name_index: code.name_index,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            items,
            handlers,
            attributes,
            next_label: labels.by_offset.len() as u32,
        })
    }
}

fn parse_line_numbers(info: &[u8], labels: &mut Labels) -> Result<Vec<(Label, u16)>, BytecodeError> {
    const ERR: BytecodeError = BytecodeError::InvalidAttribute("LineNumberTable");
    let mut r = Reader::new(info);
    let num = r.read_u2().map_err(|_| ERR)? as usize;
    let mut entries = Vec::with_capacity(num);
    for _ in 0..num {
        let start_pc = r.read_u2().map_err(|_| ERR)?;
        let line_number = r.read_u2().map_err(|_| ERR)?;
        entries.push((labels.at(start_pc as u32)?, line_number));
    }
    if r.remaining() != 0 {
        return Err(ERR);
    }
    Ok(entries)
}

fn parse_local_variables(info: &[u8], labels: &mut Labels) -> Result<Vec<LocalVariable>, BytecodeError> {
    const ERR: BytecodeError = BytecodeError::InvalidAttribute("LocalVariableTable");
    let mut r = Reader::new(info);
    let num = r.read_u2().map_err(|_| ERR)? as usize;
    let mut entries = Vec::with_capacity(num);
    for _ in 0..num {
        let start_pc = r.read_u2().map_err(|_| ERR)? as u32;
        let length = r.read_u2().map_err(|_| ERR)? as u32;
        let name_index = r.read_u2().map_err(|_| ERR)?;
        let descriptor_index = r.read_u2().map_err(|_| ERR)?;
        let index = r.read_u2().map_err(|_| ERR)?;
        entries.push(LocalVariable {
            start: labels.at(start_pc)?,
            end: labels.end(start_pc + length)?,
            name_index,
            descriptor_index,
            index,
        });
    }
    if r.remaining() != 0 {
        return Err(ERR);
    }
    Ok(entries)
}

/// Split raw bytecode into instructions with absolute branch targets.
fn scan(code: &[u8]) -> Result<Vec<(u32, RawInsn)>, BytecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < code.len() {
        let at = pos as u32;
        let opcode = code[pos];
        let layout = opcodes::operand_layout(opcode).ok_or(BytecodeError::InvalidOpcode { opcode, offset: at })?;
        let (insn, len) = match layout {
            OperandLayout::Fixed(n) => {
                let operands = slice(code, at, pos + 1, n)?.to_vec();
                (RawInsn::Plain { opcode, operands }, 1 + n)
            }
            OperandLayout::Branch16 => {
                let b = slice(code, at, pos + 1, 2)?;
                let rel = i16::from_be_bytes([b[0], b[1]]) as i64;
                (RawInsn::Jump { opcode, target: branch_target(code.len(), at, rel)? }, 3)
            }
            OperandLayout::Branch32 => {
                let rel = read_i4(code, at, pos + 1)? as i64;
                (RawInsn::Jump { opcode, target: branch_target(code.len(), at, rel)? }, 5)
            }
            OperandLayout::TableSwitch => {
                let base = pos + 1 + switch_padding(at) as usize;
                let default = branch_target(code.len(), at, read_i4(code, at, base)? as i64)?;
                let low = read_i4(code, at, base + 4)?;
                let high = read_i4(code, at, base + 8)?;
                if high < low {
                    return Err(BytecodeError::Truncated(at));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                slice(code, at, base + 12, count.checked_mul(4).ok_or(BytecodeError::Truncated(at))?)?;
                let mut targets = Vec::with_capacity(count);
                for i in 0..count {
                    targets.push(branch_target(code.len(), at, read_i4(code, at, base + 12 + 4 * i)? as i64)?);
                }
                (RawInsn::TableSwitch { default, low, high, targets }, base + 12 + 4 * count - pos)
            }
            OperandLayout::LookupSwitch => {
                let base = pos + 1 + switch_padding(at) as usize;
                let default = branch_target(code.len(), at, read_i4(code, at, base)? as i64)?;
                let npairs = read_i4(code, at, base + 4)?;
                if npairs < 0 {
                    return Err(BytecodeError::Truncated(at));
                }
                let count = npairs as usize;
                slice(code, at, base + 8, count.checked_mul(8).ok_or(BytecodeError::Truncated(at))?)?;
                let mut pairs = Vec::with_capacity(count);
                for i in 0..count {
                    let key = read_i4(code, at, base + 8 + 8 * i)?;
                    let rel = read_i4(code, at, base + 12 + 8 * i)? as i64;
                    pairs.push((key, branch_target(code.len(), at, rel)?));
                }
                (RawInsn::LookupSwitch { default, pairs }, base + 8 + 8 * count - pos)
            }
            OperandLayout::Wide => {
                let modified = *code.get(pos + 1).ok_or(BytecodeError::Truncated(at))?;
                let n = match modified {
                    opcodes::IINC => 5,
                    opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => 3,
                    _ => return Err(BytecodeError::InvalidOpcode { opcode: modified, offset: at + 1 }),
                };
                let operands = slice(code, at, pos + 1, n)?.to_vec();
                (RawInsn::Plain { opcode, operands }, 1 + n)
            }
        };
        out.push((at, insn));
        pos += len;
    }
    Ok(out)
}

fn slice(code: &[u8], at: u32, from: usize, len: usize) -> Result<&[u8], BytecodeError> {
    code.get(from..from + len).ok_or(BytecodeError::Truncated(at))
}

fn read_i4(code: &[u8], at: u32, from: usize) -> Result<i32, BytecodeError> {
    let b = slice(code, at, from, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn branch_target(code_len: usize, at: u32, rel: i64) -> Result<u32, BytecodeError> {
    let target = at as i64 + rel;
    if target < 0 || target >= code_len as i64 {
        return Err(BytecodeError::InvalidBranchTarget { at, target });
    }
    Ok(target as u32)
}

/// Zero bytes between a switch opcode at `at` and its 4-byte aligned operands.
pub(super) fn switch_padding(at: u32) -> u32 {
    (4 - (at + 1) % 4) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_aligns_operands() {
        assert_eq!(switch_padding(0), 3);
        assert_eq!(switch_padding(1), 2);
        assert_eq!(switch_padding(2), 1);
        assert_eq!(switch_padding(3), 0);
    }

    #[test]
    fn scan_rejects_truncated_and_undefined() {
        assert!(matches!(scan(&[opcodes::SIPUSH, 0]), Err(BytecodeError::Truncated(0))));
        assert!(matches!(
            scan(&[opcodes::NOP, 0xcb]),
            Err(BytecodeError::InvalidOpcode { opcode: 0xcb, offset: 1 })
        ));
    }

    #[test]
    fn scan_rejects_branch_into_nowhere() {
        // goto +100 in a 3-byte method
        let err = scan(&[opcodes::GOTO, 0, 100]).err().unwrap();
        assert!(matches!(err, BytecodeError::InvalidBranchTarget { at: 0, target: 100 }));
    }
}
