//! Wrapping a method body with enter and leave hook calls.
//!
//! The rewritten body has this shape:
//!
//! ```text
//!         push id; [build Object[]]; invokestatic enter
//! start:  ...original code, with `invokestatic leave` before every return...
//! end:    invokestatic leave
//!         athrow
//! ```
//!
//! and one extra exception table entry `[start, end) -> end` catching
//! everything, appended after the method's own entries so that its catch
//! blocks keep priority. A return instruction lies inside the region but
//! `leave` has already run when it executes, and returns cannot throw, so
//! exactly one of the two `leave` calls runs per invocation.

mod ctor;

use crate::args::{encode_args, push_int, CaptureMask};
use crate::bytecode::opcodes::{ATHROW, INVOKESTATIC};
use crate::bytecode::{opcodes, CodeBody, CodeItem, Frame, Instruction, VerificationType};
use crate::classfile::{Attribute, CodeAttribute, ConstantPool, MethodUnit, STACK_MAP_MAJOR_VERSION};
use crate::descriptor::MethodDescriptor;
use crate::error::InstrumentationError;
use crate::hooks::HookRefs;

/// What to call the enter hook with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advice {
    pub id: i32,
    /// `Some` selects `enter(int, Object[])`, even when the mask is empty.
    pub capture: Option<CaptureMask>,
}

/// Class-wide state shared by every method rewritten in one class.
pub struct SynthesisContext<'a, 'h> {
    pub pool: &'a mut ConstantPool,
    pub hooks: &'a mut HookRefs<'h>,
    pub major_version: u16,
}

/// Rewrite `method` in place. Fails without touching `method` if its body
/// cannot be decoded or the result cannot be encoded.
pub fn synthesize(
    method: &mut MethodUnit,
    advice: &Advice,
    cx: &mut SynthesisContext<'_, '_>,
) -> Result<(), InstrumentationError> {
    let name = method.name(cx.pool)?.into_owned();
    let descriptor = method.descriptor(cx.pool)?.into_owned();
    let is_static = method.is_static();
    let code = method.code().ok_or(InstrumentationError::MissingCode)?;

    let rewritten = rewrite_body(code, &name, &descriptor, is_static, advice, cx)
        .map_err(|e| e.in_method(&name, &descriptor))?;

    for attribute in &mut method.attributes {
        if let Attribute::Code(code) = attribute {
            *code = rewritten;
            break;
        }
    }
    Ok(())
}

fn rewrite_body(
    code: &CodeAttribute,
    name: &str,
    descriptor: &str,
    is_static: bool,
    advice: &Advice,
    cx: &mut SynthesisContext<'_, '_>,
) -> Result<CodeAttribute, InstrumentationError> {
    let signature = MethodDescriptor::parse(descriptor)?;
    let mut body = CodeBody::decode(code, cx.pool)?;
    let (insert_at, entry_depth) = if name == "<init>" {
        let call = ctor::find_super_call(&body, cx.pool)?;
        (call.insert_at, call.stack_depth)
    } else {
        (0, 0)
    };

    let mut enter = vec![push_int(advice.id, cx.pool)?];
    let enter_cost = match advice.capture {
        Some(mask) => {
            let args = encode_args(&signature.parameters, mask, is_static, cx.pool)?;
            enter.extend(args.insns);
            enter.push(Instruction::with_u2(INVOKESTATIC, cx.hooks.enter_with_args(cx.pool)?));
            1 + args.max_stack
        }
        None => {
            enter.push(Instruction::with_u2(INVOKESTATIC, cx.hooks.enter(cx.pool)?));
            1
        }
    };
    let leave = Instruction::with_u2(INVOKESTATIC, cx.hooks.leave(cx.pool)?);

    let method_start = body.new_label();
    let method_end = body.new_label();

    let original = std::mem::take(&mut body.items);
    let mut items = Vec::with_capacity(original.len() + enter.len() + 8);
    for (index, item) in original.into_iter().enumerate() {
        if index == insert_at {
            items.extend(enter.drain(..).map(CodeItem::Insn));
            items.push(CodeItem::Label(method_start));
        }
        if let CodeItem::Insn(insn) = &item {
            if opcodes::is_return(insn.opcode()) {
                items.push(CodeItem::Insn(leave.clone()));
            }
        }
        items.push(item);
    }
    if !enter.is_empty() {
        // constructor whose super call is the last item
        items.extend(enter.drain(..).map(CodeItem::Insn));
        items.push(CodeItem::Label(method_start));
    }
    items.push(CodeItem::Label(method_end));
    items.push(CodeItem::Insn(leave));
    items.push(CodeItem::Insn(Instruction::op(ATHROW)));
    body.items = items;

    body.append_handler(method_start, method_end, method_end, 0);
    if cx.major_version >= STACK_MAP_MAJOR_VERSION {
        let throwable = cx.pool.class("java/lang/Throwable")?;
        let table_name = match body.stack_map_mut() {
            Some(_) => 0,
            None => cx.pool.utf8("StackMapTable")?,
        };
        let frame = Frame::Full { locals: Vec::new(), stack: vec![VerificationType::Object(throwable)] };
        body.push_frame(method_end, frame, table_name);
    }

    body.max_stack = body.max_stack.max(entry_depth.saturating_add(enter_cost)).max(1);
    Ok(body.encode()?)
}
