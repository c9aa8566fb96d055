//! `StackMapTable` frames with label positions.

use super::{BytecodeError, Label};
use crate::classfile::{Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `CONSTANT_Class`.
    Object(u16),
    /// Value created by the `new` instruction at this label.
    Uninitialized(Label),
}

/// A frame relative to the previous one, as in the class file but without
/// its offset delta; the extended forms are chosen again when encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Same,
    SameLocals1StackItem(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full { locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

const ERR: BytecodeError = BytecodeError::InvalidAttribute("StackMapTable");

/// Parse a `StackMapTable` body, resolving every code offset through `label_at`.
pub(super) fn parse_stack_map_table(
    info: &[u8],
    mut label_at: impl FnMut(u32) -> Result<Label, BytecodeError>,
) -> Result<Vec<(Label, Frame)>, BytecodeError> {
    let mut r = Reader::new(info);
    let num = r.read_u2().map_err(|_| ERR)? as usize;
    let mut frames = Vec::with_capacity(num);
    let mut offset: Option<u32> = None;
    for _ in 0..num {
        let frame_type = r.read_u1().map_err(|_| ERR)?;
        let (delta, frame) = match frame_type {
            0..=63 => (frame_type as u16, Frame::Same),
            64..=127 => {
                let stack = parse_verification_type(&mut r, &mut label_at)?;
                ((frame_type - 64) as u16, Frame::SameLocals1StackItem(stack))
            }
            247 => {
                let delta = r.read_u2().map_err(|_| ERR)?;
                let stack = parse_verification_type(&mut r, &mut label_at)?;
                (delta, Frame::SameLocals1StackItem(stack))
            }
            248..=250 => (r.read_u2().map_err(|_| ERR)?, Frame::Chop(251 - frame_type)),
            251 => (r.read_u2().map_err(|_| ERR)?, Frame::Same),
            252..=254 => {
                let delta = r.read_u2().map_err(|_| ERR)?;
                let count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(count);
                for _ in 0..count {
                    locals.push(parse_verification_type(&mut r, &mut label_at)?);
                }
                (delta, Frame::Append(locals))
            }
            255 => {
                let delta = r.read_u2().map_err(|_| ERR)?;
                let num_locals = r.read_u2().map_err(|_| ERR)? as usize;
                let mut locals = Vec::with_capacity(num_locals);
                for _ in 0..num_locals {
                    locals.push(parse_verification_type(&mut r, &mut label_at)?);
                }
                let num_stack = r.read_u2().map_err(|_| ERR)? as usize;
                let mut stack = Vec::with_capacity(num_stack);
                for _ in 0..num_stack {
                    stack.push(parse_verification_type(&mut r, &mut label_at)?);
                }
                (delta, Frame::Full { locals, stack })
            }
            _ => return Err(ERR),
        };
        let at = match offset {
            None => delta as u32,
            Some(prev) => prev + delta as u32 + 1,
        };
        offset = Some(at);
        frames.push((label_at(at)?, frame));
    }
    if r.remaining() != 0 {
        return Err(ERR);
    }
    Ok(frames)
}

fn parse_verification_type(
    r: &mut Reader,
    label_at: &mut impl FnMut(u32) -> Result<Label, BytecodeError>,
) -> Result<VerificationType, BytecodeError> {
    let tag = r.read_u1().map_err(|_| ERR)?;
    let info = match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(r.read_u2().map_err(|_| ERR)?),
        8 => VerificationType::Uninitialized(label_at(r.read_u2().map_err(|_| ERR)? as u32)?),
        _ => return Err(ERR),
    };
    Ok(info)
}

/// Encode frames placed at the given offsets.
pub(super) fn write_stack_map_table(
    frames: &[(u16, &Frame)],
    offset_of: impl Fn(Label) -> Result<u16, BytecodeError>,
) -> Result<Vec<u8>, BytecodeError> {
    let mut w = Writer::new();
    w.u2(frames.len() as u16);
    let mut prev: Option<u16> = None;
    for &(at, frame) in frames {
        let delta = match prev {
            None => at,
            Some(p) if at > p => at - p - 1,
            Some(_) => return Err(BytecodeError::FrameOrder),
        };
        prev = Some(at);
        match frame {
            Frame::Same if delta <= 63 => w.u1(delta as u8),
            Frame::Same => {
                w.u1(251);
                w.u2(delta);
            }
            Frame::SameLocals1StackItem(stack) => {
                if delta <= 63 {
                    w.u1(64 + delta as u8);
                } else {
                    w.u1(247);
                    w.u2(delta);
                }
                write_verification_type(&mut w, stack, &offset_of)?;
            }
            Frame::Chop(k) => {
                w.u1(251 - k);
                w.u2(delta);
            }
            Frame::Append(locals) => {
                w.u1(251 + locals.len() as u8);
                w.u2(delta);
                for local in locals {
                    write_verification_type(&mut w, local, &offset_of)?;
                }
            }
            Frame::Full { locals, stack } => {
                w.u1(255);
                w.u2(delta);
                w.u2(locals.len() as u16);
                for local in locals {
                    write_verification_type(&mut w, local, &offset_of)?;
                }
                w.u2(stack.len() as u16);
                for item in stack {
                    write_verification_type(&mut w, item, &offset_of)?;
                }
            }
        }
    }
    Ok(w.into_inner())
}

fn write_verification_type(
    w: &mut Writer,
    ty: &VerificationType,
    offset_of: &impl Fn(Label) -> Result<u16, BytecodeError>,
) -> Result<(), BytecodeError> {
    match ty {
        VerificationType::Top => w.u1(0),
        VerificationType::Integer => w.u1(1),
        VerificationType::Float => w.u1(2),
        VerificationType::Double => w.u1(3),
        VerificationType::Long => w.u1(4),
        VerificationType::Null => w.u1(5),
        VerificationType::UninitializedThis => w.u1(6),
        VerificationType::Object(index) => {
            w.u1(7);
            w.u2(*index);
        }
        VerificationType::Uninitialized(label) => {
            w.u1(8);
            w.u2(offset_of(*label)?);
        }
    }
    Ok(())
}
