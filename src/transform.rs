use crate::classfile::ClassUnit;
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink};
use crate::error::{InstrumentationError, TransformError};
use crate::hooks::HookRuntime;
use crate::policy::InstrumentationPolicy;
use crate::rewriter::rewrite;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Load the class from its original bytes.
    Unchanged,
    Rewritten(Vec<u8>),
}

impl TransformOutcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, TransformOutcome::Unchanged)
    }

    /// The bytes to load, given the bytes that were transformed.
    pub fn into_bytes(self, original: &[u8]) -> Vec<u8> {
        match self {
            TransformOutcome::Unchanged => original.to_vec(),
            TransformOutcome::Rewritten(bytes) => bytes,
        }
    }
}

/// Entry point for a class-loading hook.
///
/// A `Transformer` holds no mutable state of its own; `transform` can be
/// called from several threads at once if the policy and sink allow it.
#[derive(Debug)]
pub struct Transformer<P, S = LogSink> {
    policy: P,
    sink: S,
    hooks: HookRuntime,
}

impl<P: InstrumentationPolicy> Transformer<P, LogSink> {
    pub fn new(policy: P) -> Self {
        Self::with_sink(policy, LogSink)
    }
}

impl<P: InstrumentationPolicy, S: DiagnosticSink> Transformer<P, S> {
    pub fn with_sink(policy: P, sink: S) -> Self {
        Self { policy, sink, hooks: HookRuntime::default() }
    }

    pub fn with_hooks(mut self, hooks: HookRuntime) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn hooks(&self) -> &HookRuntime {
        &self.hooks
    }

    /// Instrument one class. `class_name` is the internal name the loader
    /// reports, e.g. `com/example/Foo`.
    ///
    /// Classes the policy filters out are not decoded and produce no
    /// diagnostics. Errors mean the class must not be loaded from a partial
    /// rewrite; nothing partial is ever returned.
    pub fn transform(&self, class_name: &str, bytes: &[u8]) -> Result<TransformOutcome, TransformError> {
        if self.hooks.is_runtime_class(class_name) || !self.policy.should_instrument_class(class_name) {
            return Ok(TransformOutcome::Unchanged);
        }
        let result = self.try_transform(class_name, bytes);
        if let Err(error) = &result {
            self.sink.record(Diagnostic::TransformFailed { class: class_name.to_string(), error: error.to_string() });
        }
        result
    }

    fn try_transform(&self, class_name: &str, bytes: &[u8]) -> Result<TransformOutcome, TransformError> {
        let mut class = ClassUnit::parse(bytes)
            .map_err(|source| TransformError::ClassDecode { class: class_name.to_string(), source })?;
        let instrumentation_error =
            |source: InstrumentationError| TransformError::Instrumentation { class: class_name.to_string(), source };

        let report = rewrite(&mut class, class_name, &self.policy, &self.hooks).map_err(instrumentation_error)?;
        if report.instrumented == 0 {
            for diagnostic in report.diagnostics {
                self.sink.record(diagnostic);
            }
            return Ok(TransformOutcome::Unchanged);
        }

        let rewritten = class.to_bytes().map_err(|e| instrumentation_error(e.into()))?;
        for diagnostic in report.diagnostics {
            self.sink.record(diagnostic);
        }
        self.sink.record(Diagnostic::ClassInstrumented { class: class_name.to_string(), methods: report.instrumented });
        Ok(TransformOutcome::Rewritten(rewritten))
    }
}
