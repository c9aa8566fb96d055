use thiserror::Error;

use crate::bytecode::BytecodeError;
use crate::classfile::ClassFileError;
use crate::descriptor::DescriptorError;

/// Failure to rewrite one method, or to re-encode its class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentationError {
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    ClassFile(#[from] ClassFileError),

    #[error("cannot capture arguments of a method with {count} parameters (at most {max})")]
    TooManyParameters { count: usize, max: usize },

    #[error("method has no Code attribute")]
    MissingCode,

    #[error("constructor never calls a superclass or sibling constructor on `this`")]
    MissingSuperCall,

    #[error("operand stack underflow before the constructor's super call")]
    StackUnderflow,

    #[error("in method {method}: {source}")]
    Method {
        method: String,
        #[source]
        source: Box<InstrumentationError>,
    },
}

impl InstrumentationError {
    pub(crate) fn in_method(self, name: &str, descriptor: &str) -> Self {
        InstrumentationError::Method { method: format!("{name}{descriptor}"), source: Box::new(self) }
    }
}

/// Reported by [`Transformer::transform`](crate::Transformer::transform).
/// The class must be loaded from its original bytes, or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("failed to decode class {class}: {source}")]
    ClassDecode {
        class: String,
        #[source]
        source: ClassFileError,
    },

    #[error("failed to instrument class {class}: {source}")]
    Instrumentation {
        class: String,
        #[source]
        source: InstrumentationError,
    },
}

impl TransformError {
    pub fn class(&self) -> &str {
        match self {
            TransformError::ClassDecode { class, .. } | TransformError::Instrumentation { class, .. } => class,
        }
    }
}
