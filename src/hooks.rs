//! Coordinates of the trampoline class that receives enter and leave calls.

use serde::{Deserialize, Serialize};

use crate::classfile::{ClassFileError, ConstantPool};

pub const ENTER_DESCRIPTOR: &str = "(I)V";
pub const ENTER_WITH_ARGS_DESCRIPTOR: &str = "(I[Ljava/lang/Object;)V";
pub const LEAVE_DESCRIPTOR: &str = "()V";

/// Static methods the rewritten code calls:
///
/// - `static void <enter>(int id)`
/// - `static void <enter>(int id, Object[] args)`
/// - `static void <leave>()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookRuntime {
    /// Internal name of the trampoline class.
    pub owner: String,
    pub enter: String,
    pub leave: String,
}

impl Default for HookRuntime {
    fn default() -> Self {
        Self {
            owner: "com/google/idea/perf/tracer/TracerTrampoline".to_string(),
            enter: "enter".to_string(),
            leave: "leave".to_string(),
        }
    }
}

impl HookRuntime {
    /// The trampoline class or one of its nested classes. These are never
    /// instrumented so the hooks cannot call back into themselves.
    pub fn is_runtime_class(&self, class: &str) -> bool {
        class
            .strip_prefix(self.owner.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('$'))
    }

    /// Start resolving hook methods into `pool`. Entries are only added
    /// once they are first asked for.
    pub fn refs(&self) -> HookRefs<'_> {
        HookRefs { runtime: self, enter: None, enter_with_args: None, leave: None }
    }
}

/// Constant pool `Methodref` indices of the hooks within one class.
#[derive(Debug)]
pub struct HookRefs<'a> {
    runtime: &'a HookRuntime,
    enter: Option<u16>,
    enter_with_args: Option<u16>,
    leave: Option<u16>,
}

impl HookRefs<'_> {
    pub fn enter(&mut self, pool: &mut ConstantPool) -> Result<u16, ClassFileError> {
        resolve(&mut self.enter, pool, &self.runtime.owner, &self.runtime.enter, ENTER_DESCRIPTOR)
    }

    pub fn enter_with_args(&mut self, pool: &mut ConstantPool) -> Result<u16, ClassFileError> {
        resolve(
            &mut self.enter_with_args,
            pool,
            &self.runtime.owner,
            &self.runtime.enter,
            ENTER_WITH_ARGS_DESCRIPTOR,
        )
    }

    pub fn leave(&mut self, pool: &mut ConstantPool) -> Result<u16, ClassFileError> {
        resolve(&mut self.leave, pool, &self.runtime.owner, &self.runtime.leave, LEAVE_DESCRIPTOR)
    }
}

fn resolve(
    cached: &mut Option<u16>,
    pool: &mut ConstantPool,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> Result<u16, ClassFileError> {
    if let Some(index) = *cached {
        return Ok(index);
    }
    let index = pool.method_ref(owner, name, descriptor)?;
    *cached = Some(index);
    Ok(index)
}
