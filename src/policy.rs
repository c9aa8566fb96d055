//! The questions the rewriter asks about what to instrument.

use std::fmt;
use std::sync::Arc;

use crate::advice::Advice;
use crate::args::CaptureMask;

/// A method's name and descriptor, e.g. `("divide", "(II)I")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub name: String,
    pub descriptor: String,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self { name: name.into(), descriptor: descriptor.into() }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// The policy's current view of one instrumentable method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracepoint {
    pub id: i32,
    pub enabled: bool,
    /// `None` calls `enter(int)`; `Some` calls `enter(int, Object[])`.
    pub capture: Option<CaptureMask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NoTracepoint,
    Disabled,
    /// Abstract and native methods.
    NoCode,
    LookupFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoTracepoint => "no tracepoint",
            SkipReason::Disabled => "tracepoint disabled",
            SkipReason::NoCode => "no code",
            SkipReason::LookupFailed => "policy lookup failed",
        };
        f.write_str(reason)
    }
}

/// Per-method decision, recomputed on every transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionPlan {
    Skip(SkipReason),
    Instrument { id: i32 },
    InstrumentWithArgs { id: i32, mask: CaptureMask },
}

impl InsertionPlan {
    pub fn for_tracepoint(tracepoint: Option<Tracepoint>) -> Self {
        match tracepoint {
            None => InsertionPlan::Skip(SkipReason::NoTracepoint),
            Some(Tracepoint { enabled: false, .. }) => InsertionPlan::Skip(SkipReason::Disabled),
            Some(Tracepoint { id, capture: None, .. }) => InsertionPlan::Instrument { id },
            Some(Tracepoint { id, capture: Some(mask), .. }) => InsertionPlan::InstrumentWithArgs { id, mask },
        }
    }

    pub fn advice(&self) -> Option<Advice> {
        match *self {
            InsertionPlan::Skip(_) => None,
            InsertionPlan::Instrument { id } => Some(Advice { id, capture: None }),
            InsertionPlan::InstrumentWithArgs { id, mask } => Some(Advice { id, capture: Some(mask) }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tracepoint lookup failed: {0}")]
pub struct PolicyError(pub String);

/// Decides which classes and methods get instrumented.
///
/// Implementations are shared between concurrent transforms, so lookups
/// must be safe to call from several threads.
pub trait InstrumentationPolicy {
    /// Cheap class-level filter, asked before the class is decoded.
    fn should_instrument_class(&self, class: &str) -> bool;

    /// Called once per class with every method signature it declares,
    /// before any [`lookup_tracepoint`](Self::lookup_tracepoint) for that class.
    fn classify(&self, _class: &str, _methods: &[MethodSignature]) {}

    fn lookup_tracepoint(
        &self,
        class: &str,
        method: &str,
        descriptor: &str,
    ) -> Result<Option<Tracepoint>, PolicyError>;
}

impl<P: InstrumentationPolicy + ?Sized> InstrumentationPolicy for &P {
    fn should_instrument_class(&self, class: &str) -> bool {
        (**self).should_instrument_class(class)
    }

    fn classify(&self, class: &str, methods: &[MethodSignature]) {
        (**self).classify(class, methods)
    }

    fn lookup_tracepoint(&self, class: &str, method: &str, descriptor: &str) -> Result<Option<Tracepoint>, PolicyError> {
        (**self).lookup_tracepoint(class, method, descriptor)
    }
}

impl<P: InstrumentationPolicy + ?Sized> InstrumentationPolicy for Arc<P> {
    fn should_instrument_class(&self, class: &str) -> bool {
        (**self).should_instrument_class(class)
    }

    fn classify(&self, class: &str, methods: &[MethodSignature]) {
        (**self).classify(class, methods)
    }

    fn lookup_tracepoint(&self, class: &str, method: &str, descriptor: &str) -> Result<Option<Tracepoint>, PolicyError> {
        (**self).lookup_tracepoint(class, method, descriptor)
    }
}
