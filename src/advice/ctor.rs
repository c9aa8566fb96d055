//! Locating the point in a constructor where `this` becomes initialized.
//!
//! Before the `invokespecial <init>` on the receiver, `this` is an
//! uninitialized reference and must not escape, so the enter hook can only
//! run after that call. The scan simulates the operand stack one word at a
//! time, tagging each word as either the receiver loaded from local 0 or
//! something else, and follows branches and exception handlers until it
//! sees a constructor call whose receiver word is tagged as `this`.

use std::collections::{HashMap, VecDeque};

use crate::bytecode::opcodes::*;
use crate::bytecode::{BytecodeError, CodeBody, CodeItem, Instruction, Label};
use crate::classfile::ConstantPool;
use crate::descriptor::{JvmType, MethodDescriptor};
use crate::error::InstrumentationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Word {
    This,
    Other,
}

/// Where the enter hook goes in a constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SuperCall {
    /// Item index right after the `invokespecial`.
    pub insert_at: usize,
    /// Operand stack depth at that point.
    pub stack_depth: u16,
}

enum Step {
    Next,
    Found,
    Stop,
}

pub(crate) fn find_super_call(body: &CodeBody, cp: &ConstantPool) -> Result<SuperCall, InstrumentationError> {
    let label_index: HashMap<Label, usize> = body
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            CodeItem::Label(label) => Some((*label, i)),
            CodeItem::Insn(_) => None,
        })
        .collect();
    let index_of = |label: &Label| {
        label_index
            .get(label)
            .copied()
            .ok_or(InstrumentationError::Bytecode(BytecodeError::UnplacedLabel(*label)))
    };

    let mut visited = vec![false; body.items.len()];
    let mut pending: VecDeque<(usize, Vec<Word>)> = VecDeque::new();
    pending.push_back((0, Vec::new()));
    for handler in &body.handlers {
        pending.push_back((index_of(&handler.handler)?, vec![Word::Other]));
    }

    while let Some((start, mut stack)) = pending.pop_front() {
        let mut index = start;
        while index < body.items.len() && !visited[index] {
            visited[index] = true;
            let insn = match &body.items[index] {
                CodeItem::Label(_) => {
                    index += 1;
                    continue;
                }
                CodeItem::Insn(insn) => insn,
            };
            for target in branch_targets(insn) {
                let mut branch_stack = stack.clone();
                if matches!(insn.opcode(), JSR | JSR_W) {
                    branch_stack.push(Word::Other);
                } else {
                    pop(&mut branch_stack, branch_pops(insn.opcode()))?;
                }
                pending.push_back((index_of(&target)?, branch_stack));
            }
            match step(insn, cp, &mut stack)? {
                Step::Next => index += 1,
                Step::Found => {
                    return Ok(SuperCall { insert_at: index + 1, stack_depth: stack.len() as u16 });
                }
                Step::Stop => break,
            }
        }
    }
    Err(InstrumentationError::MissingSuperCall)
}

fn branch_targets(insn: &Instruction) -> Vec<Label> {
    match insn {
        Instruction::Jump { target, .. } => vec![*target],
        Instruction::TableSwitch { default, targets, .. } => {
            let mut all = targets.clone();
            all.push(*default);
            all
        }
        Instruction::LookupSwitch { default, pairs } => {
            let mut all: Vec<Label> = pairs.iter().map(|(_, label)| *label).collect();
            all.push(*default);
            all
        }
        Instruction::Plain { .. } => Vec::new(),
    }
}

/// Words a branching instruction consumes before control reaches its target.
fn branch_pops(opcode: u8) -> usize {
    match opcode {
        IFEQ..=IFLE | IFNULL | IFNONNULL | TABLESWITCH | LOOKUPSWITCH => 1,
        IF_ICMPEQ..=IF_ACMPNE => 2,
        _ => 0,
    }
}

fn pop(stack: &mut Vec<Word>, n: usize) -> Result<(), InstrumentationError> {
    let len = stack.len().checked_sub(n).ok_or(InstrumentationError::StackUnderflow)?;
    stack.truncate(len);
    Ok(())
}

fn push(stack: &mut Vec<Word>, n: usize) {
    stack.extend(std::iter::repeat(Word::Other).take(n));
}

/// Copy the top `width` words and insert the copy `depth` words further down.
fn dup(stack: &mut Vec<Word>, width: usize, depth: usize) -> Result<(), InstrumentationError> {
    let len = stack.len();
    if len < width + depth {
        return Err(InstrumentationError::StackUnderflow);
    }
    let copy = stack[len - width..].to_vec();
    let at = len - width - depth;
    stack.splice(at..at, copy);
    Ok(())
}

fn step(insn: &Instruction, cp: &ConstantPool, stack: &mut Vec<Word>) -> Result<Step, InstrumentationError> {
    let opcode = insn.effective_opcode();
    // (words popped, words pushed) for everything that does not need special handling
    let (pops, pushes) = match opcode {
        NOP | IINC | CHECKCAST => (0, 0),
        ACONST_NULL..=ICONST_5 | 0x0b..=0x0d | BIPUSH | SIPUSH | LDC | LDC_W => (0, 1),
        LCONST_0 | 0x0a | 0x0e | DCONST_1 | LDC2_W => (0, 2),
        ILOAD | FLOAD | 0x1a..=0x1d | 0x22..=0x25 => (0, 1),
        LLOAD | DLOAD | 0x1e..=0x21 | 0x26..=0x29 => (0, 2),
        ALOAD | ALOAD_0..=ALOAD_3 => {
            let word = if insn.local_index() == Some(0) { Word::This } else { Word::Other };
            stack.push(word);
            return Ok(Step::Next);
        }
        IALOAD | 0x30 | 0x32..=SALOAD => (2, 1),
        0x2f | 0x31 => (2, 2),
        ISTORE | FSTORE | ASTORE | 0x3b..=0x3e | 0x43..=0x46 | 0x4b..=ASTORE_3 => (1, 0),
        LSTORE | DSTORE | 0x3f..=0x42 | 0x47..=0x4a => (2, 0),
        IASTORE | 0x51 | AASTORE..=SASTORE => (3, 0),
        0x50 | 0x52 => (4, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => return dup(stack, 1, 0).map(|_| Step::Next),
        DUP_X1 => return dup(stack, 1, 1).map(|_| Step::Next),
        DUP_X2 => return dup(stack, 1, 2).map(|_| Step::Next),
        DUP2 => return dup(stack, 2, 0).map(|_| Step::Next),
        DUP2_X1 => return dup(stack, 2, 1).map(|_| Step::Next),
        DUP2_X2 => return dup(stack, 2, 2).map(|_| Step::Next),
        SWAP => {
            let len = stack.len();
            if len < 2 {
                return Err(InstrumentationError::StackUnderflow);
            }
            stack.swap(len - 1, len - 2);
            return Ok(Step::Next);
        }
        // add, sub, mul, div, rem for int, long, float, double
        IADD..=0x73 => match (opcode - IADD) % 4 {
            1 | 3 => (4, 2),
            _ => (2, 1),
        },
        INEG..=0x77 => match opcode - INEG {
            1 | 3 => (2, 2),
            _ => (1, 1),
        },
        // ishl, lshl, ishr, lshr, iushr, lushr
        0x78..=0x7d => match (opcode - 0x78) % 2 {
            1 => (3, 2),
            _ => (2, 1),
        },
        // iand, land, ior, lor, ixor, lxor
        0x7e..=0x83 => match (opcode - 0x7e) % 2 {
            1 => (4, 2),
            _ => (2, 1),
        },
        0x85 | 0x87 | 0x8c | 0x8d => (1, 2),
        0x86 | 0x8b | 0x91..=0x93 => (1, 1),
        0x88 | 0x89 | 0x8e | 0x90 => (2, 1),
        0x8a | 0x8f => (2, 2),
        0x94 | 0x97 | 0x98 => (4, 1),
        0x95 | 0x96 => (2, 1),
        IFEQ..=IFLE | IFNULL | IFNONNULL => (1, 0),
        IF_ICMPEQ..=IF_ACMPNE => (2, 0),
        JSR | JSR_W => (0, 0),
        GOTO | GOTO_W | RET | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW => return Ok(Step::Stop),
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
            let index = insn.u2_operand().ok_or(InstrumentationError::StackUnderflow)?;
            let (_, _, descriptor) = cp.member_ref(index)?;
            let size = JvmType::parse_field(&descriptor)?.slot_size() as usize;
            match opcode {
                GETSTATIC => (0, size),
                PUTSTATIC => (size, 0),
                GETFIELD => (1, size),
                _ => (1 + size, 0),
            }
        }
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
            let index = insn.u2_operand().ok_or(InstrumentationError::StackUnderflow)?;
            let (_, name, descriptor) = cp.member_ref(index)?;
            let method = MethodDescriptor::parse(&descriptor)?;
            pop(stack, method.parameter_slots() as usize)?;
            if opcode != INVOKESTATIC {
                let receiver = stack.pop().ok_or(InstrumentationError::StackUnderflow)?;
                if opcode == INVOKESPECIAL && name == "<init>" && receiver == Word::This {
                    return Ok(Step::Found);
                }
            }
            push(stack, method.return_type.slot_size() as usize);
            return Ok(Step::Next);
        }
        INVOKEDYNAMIC => {
            let index = insn.u2_operand().ok_or(InstrumentationError::StackUnderflow)?;
            let (_, descriptor) = cp.invoke_dynamic(index)?;
            let method = MethodDescriptor::parse(&descriptor)?;
            (method.parameter_slots() as usize, method.return_type.slot_size() as usize)
        }
        NEW => (0, 1),
        NEWARRAY | ANEWARRAY | ARRAYLENGTH | INSTANCEOF => (1, 1),
        MONITORENTER | MONITOREXIT => (1, 0),
        MULTIANEWARRAY => match insn {
            Instruction::Plain { operands, .. } if operands.len() == 3 => (operands[2] as usize, 1),
            _ => return Err(InstrumentationError::StackUnderflow),
        },
        _ => (0, 0),
    };
    pop(stack, pops)?;
    push(stack, pushes);
    Ok(Step::Next)
}
