use super::decode::switch_padding;
use super::frames::write_stack_map_table;
use super::opcodes;
use super::{BytecodeError, CodeAttr, CodeBody, CodeItem, Instruction, Label};
use crate::classfile::{CodeAttribute, ExceptionTableEntry, RawAttribute, Writer};

const MAX_CODE_LENGTH: usize = u16::MAX as usize;

impl CodeBody {
    /// Lower the items back into a `Code` attribute.
    ///
    /// Branch widths are kept as written: a 16-bit branch whose target
    /// moves out of range is an error rather than being widened.
    pub fn encode(&self) -> Result<CodeAttribute, BytecodeError> {
        let offsets = self.layout()?;
        let offset_of = |label: Label| -> Result<u32, BytecodeError> {
            offsets
                .get(label.0 as usize)
                .copied()
                .flatten()
                .ok_or(BytecodeError::UnplacedLabel(label))
        };
        // Every placed offset is at most the code length, which fits a u16.
        let pc = |label: Label| offset_of(label).map(|o| o as u16);

        let mut w = Writer::new();
        for item in &self.items {
            let insn = match item {
                CodeItem::Label(_) => continue,
                CodeItem::Insn(insn) => insn,
            };
            let at = w.len() as u32;
            match insn {
                Instruction::Plain { opcode, operands } => {
                    w.u1(*opcode);
                    w.bytes(operands);
                }
                Instruction::Jump { opcode, target } => {
                    let target = offset_of(*target)?;
                    let rel = target as i64 - at as i64;
                    w.u1(*opcode);
                    if matches!(*opcode, opcodes::GOTO_W | opcodes::JSR_W) {
                        w.u4(rel as i32 as u32);
                    } else {
                        let rel = i16::try_from(rel).map_err(|_| BytecodeError::BranchOverflow { at, target })?;
                        w.u2(rel as u16);
                    }
                }
                Instruction::TableSwitch { default, low, high, targets } => {
                    w.u1(opcodes::TABLESWITCH);
                    pad(&mut w, at);
                    w.u4(relative(offset_of(*default)?, at));
                    w.u4(*low as u32);
                    w.u4(*high as u32);
                    for target in targets {
                        w.u4(relative(offset_of(*target)?, at));
                    }
                }
                Instruction::LookupSwitch { default, pairs } => {
                    w.u1(opcodes::LOOKUPSWITCH);
                    pad(&mut w, at);
                    w.u4(relative(offset_of(*default)?, at));
                    w.u4(pairs.len() as u32);
                    for (key, target) in pairs {
                        w.u4(*key as u32);
                        w.u4(relative(offset_of(*target)?, at));
                    }
                }
            }
        }
        let code = w.into_inner();

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let start_pc = pc(handler.start)?;
            let end_pc = pc(handler.end)?;
            if start_pc >= end_pc {
                return Err(BytecodeError::EmptyHandlerRange { start: start_pc, end: end_pc });
            }
            exception_table.push(ExceptionTableEntry {
                start_pc,
                end_pc,
                handler_pc: pc(handler.handler)?,
                catch_type: handler.catch_type,
            });
        }

        let mut attributes = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            let raw = match attribute {
                CodeAttr::LineNumbers { name_index, entries } => {
                    let mut info = Writer::new();
                    info.u2(entries.len() as u16);
                    for (label, line) in entries {
                        info.u2(pc(*label)?);
                        info.u2(*line);
                    }
                    RawAttribute { name_index: *name_index, info: info.into_inner() }
                }
                CodeAttr::LocalVariables { name_index, entries } => {
                    let mut info = Writer::new();
                    info.u2(entries.len() as u16);
                    for entry in entries {
                        let start = pc(entry.start)?;
                        let end = pc(entry.end)?;
                        info.u2(start);
                        info.u2(end.saturating_sub(start));
                        info.u2(entry.name_index);
                        info.u2(entry.descriptor_index);
                        info.u2(entry.index);
                    }
                    RawAttribute { name_index: *name_index, info: info.into_inner() }
                }
                CodeAttr::StackMap { name_index, frames } => {
                    let placed = frames
                        .iter()
                        .map(|(label, frame)| Ok((pc(*label)?, frame)))
                        .collect::<Result<Vec<_>, BytecodeError>>()?;
                    let info = write_stack_map_table(&placed, pc)?;
                    RawAttribute { name_index: *name_index, info }
                }
                CodeAttr::Raw(raw) => raw.clone(),
            };
            attributes.push(raw);
        }

        Ok(CodeAttribute {
            name_index: self.name_index,
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Offset of every placed label.
    fn layout(&self) -> Result<Vec<Option<u32>>, BytecodeError> {
        let mut offsets = vec![None; self.next_label as usize];
        let mut pos = 0usize;
        for item in &self.items {
            match item {
                CodeItem::Label(label) => {
                    if let Some(slot) = offsets.get_mut(label.0 as usize) {
                        *slot = Some(pos as u32);
                    }
                }
                CodeItem::Insn(insn) => {
                    pos += encoded_len(insn, pos as u32);
                    if pos > MAX_CODE_LENGTH {
                        return Err(BytecodeError::CodeTooLarge(pos));
                    }
                }
            }
        }
        Ok(offsets)
    }
}

fn encoded_len(insn: &Instruction, at: u32) -> usize {
    match insn {
        Instruction::Plain { operands, .. } => 1 + operands.len(),
        Instruction::Jump { opcode: opcodes::GOTO_W | opcodes::JSR_W, .. } => 5,
        Instruction::Jump { .. } => 3,
        Instruction::TableSwitch { targets, .. } => 1 + switch_padding(at) as usize + 12 + 4 * targets.len(),
        Instruction::LookupSwitch { pairs, .. } => 1 + switch_padding(at) as usize + 8 + 8 * pairs.len(),
    }
}

fn pad(w: &mut Writer, at: u32) {
    for _ in 0..switch_padding(at) {
        w.u1(0);
    }
}

fn relative(target: u32, at: u32) -> u32 {
    (target as i64 - at as i64) as i32 as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Frame, VerificationType};
    use crate::classfile::{ConstantPool, ExceptionTableEntry};

    fn pool() -> (ConstantPool, u16, u16) {
        let mut cp = ConstantPool::new();
        let code = cp.utf8("Code").unwrap();
        let smt = cp.utf8("StackMapTable").unwrap();
        (cp, code, smt)
    }

    // static int pick(int x) {
    //   switch (x) { case 0: return 1; case 1: return 2; default: return -1; }
    // }
    fn switch_method(smt: u16) -> CodeAttribute {
        // 0: iload_0, 1: tableswitch with two padding bytes, operands at 4..24
        let mut code = vec![opcodes::ILOAD_0, opcodes::TABLESWITCH, 0, 0];
        for word in [27i32, 0, 1, 23, 25] {
            code.extend_from_slice(&word.to_be_bytes());
        }
        code.extend_from_slice(&[opcodes::ICONST_0 + 1, opcodes::IRETURN]); // 24
        code.extend_from_slice(&[opcodes::ICONST_0 + 2, opcodes::IRETURN]); // 26
        code.extend_from_slice(&[opcodes::ICONST_M1, opcodes::IRETURN]); // 28
        CodeAttribute {
            name_index: 1,
            max_stack: 1,
            max_locals: 1,
            code,
            exception_table: Vec::new(),
            // same_frame at 24, 26 and 28
            attributes: vec![RawAttribute { name_index: smt, info: vec![0, 3, 24, 1, 1] }],
        }
    }

    #[test]
    fn unchanged_body_encodes_identically() {
        let (cp, _, smt) = pool();
        let original = switch_method(smt);
        let body = CodeBody::decode(&original, &cp).unwrap();
        assert_eq!(body.encode().unwrap(), original);
    }

    #[test]
    fn insertion_shifts_switch_and_frames() {
        let (cp, _, smt) = pool();
        let original = switch_method(smt);
        let mut body = CodeBody::decode(&original, &cp).unwrap();
        // Two bytes in front move the switch to 3, dropping its padding.
        body.items.insert(0, CodeItem::Insn(Instruction::op(opcodes::NOP)));
        body.items.insert(0, CodeItem::Insn(Instruction::op(opcodes::NOP)));
        let encoded = body.encode().unwrap();
        let code = &encoded.code;
        assert_eq!(code[3], opcodes::TABLESWITCH);
        let default = i32::from_be_bytes([code[4], code[5], code[6], code[7]]);
        let first = i32::from_be_bytes([code[16], code[17], code[18], code[19]]);
        assert_eq!(3 + default as usize, code.len() - 2);
        assert_eq!(code[3 + first as usize], opcodes::ICONST_0 + 1);

        let again = CodeBody::decode(&encoded, &cp).unwrap();
        let frames = match &again.attributes[0] {
            CodeAttr::StackMap { frames, .. } => frames.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|(_, f)| *f == Frame::Same));
    }

    #[test]
    fn branch_overflow_is_reported() {
        let (cp, _, _) = pool();
        let original = CodeAttribute {
            name_index: 1,
            max_stack: 0,
            max_locals: 0,
            code: vec![opcodes::GOTO, 0, 3, opcodes::RETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let mut body = CodeBody::decode(&original, &cp).unwrap();
        let filler = vec![CodeItem::Insn(Instruction::op(opcodes::NOP)); 40_000];
        body.items.splice(1..1, filler);
        assert!(matches!(body.encode(), Err(BytecodeError::BranchOverflow { at: 0, .. })));
    }

    #[test]
    fn appended_handler_and_frame() {
        let (mut cp, _, smt) = pool();
        let throwable = cp.class("java/lang/Throwable").unwrap();
        let original = CodeAttribute {
            name_index: 1,
            max_stack: 0,
            max_locals: 0,
            code: vec![opcodes::RETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let mut body = CodeBody::decode(&original, &cp).unwrap();
        let start = body.new_label();
        let end = body.new_label();
        body.items.insert(0, CodeItem::Label(start));
        body.items.push(CodeItem::Label(end));
        body.items.push(CodeItem::Insn(Instruction::op(opcodes::ATHROW)));
        body.append_handler(start, end, end, 0);
        let frame = Frame::Full { locals: vec![], stack: vec![VerificationType::Object(throwable)] };
        body.push_frame(end, frame, smt);

        let encoded = body.encode().unwrap();
        assert_eq!(encoded.code, vec![opcodes::RETURN, opcodes::ATHROW]);
        assert_eq!(
            encoded.exception_table,
            vec![ExceptionTableEntry { start_pc: 0, end_pc: 1, handler_pc: 1, catch_type: 0 }]
        );
        let smt_info = &encoded.attributes[0].info;
        assert_eq!(smt_info[..5], [0, 1, 255, 0, 1]);
    }

    #[test]
    fn unplaced_label_is_an_error() {
        let (cp, _, _) = pool();
        let original = CodeAttribute {
            name_index: 1,
            max_stack: 0,
            max_locals: 0,
            code: vec![opcodes::RETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let mut body = CodeBody::decode(&original, &cp).unwrap();
        let nowhere = body.new_label();
        body.items.insert(0, CodeItem::Insn(Instruction::Jump { opcode: opcodes::GOTO, target: nowhere }));
        assert!(matches!(body.encode(), Err(BytecodeError::UnplacedLabel(l)) if l == nowhere));
    }
}
