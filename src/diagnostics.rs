//! Records of instrumentation decisions.
//!
//! [`Transformer`](crate::Transformer) reports every decision to an injected
//! [`DiagnosticSink`]. [`LogSink`] forwards them to the `log` facade;
//! [`MemorySink`] keeps them for inspection.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::policy::SkipReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    ClassInstrumented {
        class: String,
        methods: usize,
    },
    MethodInstrumented {
        class: String,
        method: String,
        descriptor: String,
        id: i32,
        captures_args: bool,
    },
    MethodSkipped {
        class: String,
        method: String,
        descriptor: String,
        reason: SkipReason,
    },
    PolicyLookupFailed {
        class: String,
        method: String,
        descriptor: String,
        error: String,
    },
    TransformFailed {
        class: String,
        error: String,
    },
}

impl Diagnostic {
    pub fn class(&self) -> &str {
        match self {
            Diagnostic::ClassInstrumented { class, .. }
            | Diagnostic::MethodInstrumented { class, .. }
            | Diagnostic::MethodSkipped { class, .. }
            | Diagnostic::PolicyLookupFailed { class, .. }
            | Diagnostic::TransformFailed { class, .. } => class,
        }
    }

    pub fn level(&self) -> log::Level {
        match self {
            Diagnostic::ClassInstrumented { .. } | Diagnostic::MethodInstrumented { .. } => log::Level::Info,
            Diagnostic::MethodSkipped { reason: SkipReason::NoTracepoint, .. } => log::Level::Trace,
            Diagnostic::MethodSkipped { .. } => log::Level::Debug,
            Diagnostic::PolicyLookupFailed { .. } => log::Level::Warn,
            Diagnostic::TransformFailed { .. } => log::Level::Error,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ClassInstrumented { class, methods } => {
                write!(f, "instrumented class {class} ({methods} methods)")
            }
            Diagnostic::MethodInstrumented { class, method, descriptor, id, captures_args } => {
                write!(f, "instrumented method {class}.{method}{descriptor} as tracepoint {id}")?;
                if *captures_args {
                    f.write_str(" with arguments")?;
                }
                Ok(())
            }
            Diagnostic::MethodSkipped { class, method, descriptor, reason } => {
                write!(f, "skipped method {class}.{method}{descriptor}: {reason}")
            }
            Diagnostic::PolicyLookupFailed { class, method, descriptor, error } => {
                write!(f, "skipped method {class}.{method}{descriptor}: {error}")
            }
            Diagnostic::TransformFailed { class, error } => write!(f, "failed to instrument class {class}: {error}"),
        }
    }
}

pub trait DiagnosticSink {
    fn record(&self, diagnostic: Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &S {
    fn record(&self, diagnostic: Diagnostic) {
        (**self).record(diagnostic)
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn record(&self, diagnostic: Diagnostic) {
        (**self).record(diagnostic)
    }
}

/// Forwards diagnostics to the `log` crate under the `jvm_method_tracer` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, diagnostic: Diagnostic) {
        log::log!(target: "jvm_method_tracer", diagnostic.level(), "{diagnostic}");
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: Diagnostic) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(diagnostic);
    }
}
