//! Building the `Object[]` of captured arguments passed to the enter hook.

use std::fmt;

use crate::bytecode::opcodes::*;
use crate::bytecode::Instruction;
use crate::classfile::ConstantPool;
use crate::descriptor::JvmType;
use crate::error::InstrumentationError;

/// Selects parameters by declaration index; bit `i` captures parameter `i`.
///
/// A `long` or `double` parameter uses two local slots but one bit. Bits at
/// or above the method's parameter count select nothing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CaptureMask(u32);

impl CaptureMask {
    /// Highest parameter count whose arguments can be captured.
    pub const CAPACITY: usize = 32;

    pub const NONE: CaptureMask = CaptureMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        CaptureMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask selecting the given parameter indices, or `None` if one of them
    /// is at least [`CAPACITY`](Self::CAPACITY).
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Option<Self> {
        let mut bits = 0u32;
        for index in indices {
            if index >= Self::CAPACITY {
                return None;
            }
            bits |= 1 << index;
        }
        Some(CaptureMask(bits))
    }

    pub fn is_selected(self, index: usize) -> bool {
        index < Self::CAPACITY && self.0 & (1 << index) != 0
    }

    /// Number of captured arguments for a method with `parameter_count` parameters.
    pub fn selected_count(self, parameter_count: usize) -> usize {
        (0..parameter_count.min(Self::CAPACITY)).filter(|&i| self.is_selected(i)).count()
    }
}

impl fmt::Debug for CaptureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaptureMask({:#034b})", self.0)
    }
}

/// Instructions that leave one reference on the stack: the argument array,
/// or `null` when nothing is captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentCode {
    pub insns: Vec<Instruction>,
    /// Peak operand stack words used while the array is built.
    pub max_stack: u16,
}

pub fn encode_args(
    parameters: &[JvmType],
    mask: CaptureMask,
    is_static: bool,
    pool: &mut ConstantPool,
) -> Result<ArgumentCode, InstrumentationError> {
    if parameters.len() > CaptureMask::CAPACITY {
        return Err(InstrumentationError::TooManyParameters {
            count: parameters.len(),
            max: CaptureMask::CAPACITY,
        });
    }

    let count = mask.selected_count(parameters.len());
    if count == 0 {
        return Ok(ArgumentCode { insns: vec![Instruction::op(ACONST_NULL)], max_stack: 1 });
    }

    let mut insns = vec![push_int(count as i32, pool)?, Instruction::with_u2(ANEWARRAY, pool.class("java/lang/Object")?)];
    // array, array, element index
    let mut max_stack = 3;
    let mut slot: u16 = if is_static { 0 } else { 1 };
    let mut element = 0;
    for (index, ty) in parameters.iter().enumerate() {
        if mask.is_selected(index) {
            insns.push(Instruction::op(DUP));
            insns.push(push_int(element, pool)?);
            insns.push(load(ty, slot));
            if let Some((owner, descriptor)) = boxing(ty) {
                let method = pool.method_ref(owner, "valueOf", descriptor)?;
                insns.push(Instruction::with_u2(INVOKESTATIC, method));
            }
            insns.push(Instruction::op(AASTORE));
            max_stack = max_stack.max(3 + ty.slot_size());
            element += 1;
        }
        slot += ty.slot_size();
    }
    Ok(ArgumentCode { insns, max_stack })
}

/// The shortest instruction pushing `value`.
pub(crate) fn push_int(value: i32, pool: &mut ConstantPool) -> Result<Instruction, InstrumentationError> {
    let insn = match value {
        -1..=5 => Instruction::op((ICONST_0 as i32 + value) as u8),
        v if i8::try_from(v).is_ok() => Instruction::with_u1(BIPUSH, v as i8 as u8),
        v if i16::try_from(v).is_ok() => Instruction::with_u2(SIPUSH, v as i16 as u16),
        v => {
            let index = pool.integer(v)?;
            match u8::try_from(index) {
                Ok(index) => Instruction::with_u1(LDC, index),
                Err(_) => Instruction::with_u2(LDC_W, index),
            }
        }
    };
    Ok(insn)
}

/// Parameters never reach past slot 64, so the one-byte forms always fit.
fn load(ty: &JvmType, slot: u16) -> Instruction {
    let kind = match ty {
        JvmType::Long => 1,
        JvmType::Float => 2,
        JvmType::Double => 3,
        JvmType::Reference(_) => 4,
        _ => 0,
    };
    match slot {
        0..=3 => Instruction::op(ILOAD_0 + 4 * kind + slot as u8),
        _ => Instruction::with_u1(ILOAD + kind, slot as u8),
    }
}

/// `valueOf` owner and descriptor for a primitive type.
fn boxing(ty: &JvmType) -> Option<(&'static str, &'static str)> {
    let target = match ty {
        JvmType::Boolean => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
        JvmType::Byte => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
        JvmType::Char => ("java/lang/Character", "(C)Ljava/lang/Character;"),
        JvmType::Short => ("java/lang/Short", "(S)Ljava/lang/Short;"),
        JvmType::Int => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
        JvmType::Long => ("java/lang/Long", "(J)Ljava/lang/Long;"),
        JvmType::Float => ("java/lang/Float", "(F)Ljava/lang/Float;"),
        JvmType::Double => ("java/lang/Double", "(D)Ljava/lang/Double;"),
        JvmType::Reference(_) | JvmType::Void => return None,
    };
    Some(target)
}
