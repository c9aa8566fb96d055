//! Per-class pipeline: classify the methods, plan each one, rewrite the
//! selected ones.

use crate::advice::{synthesize, SynthesisContext};
use crate::classfile::ClassUnit;
use crate::diagnostics::Diagnostic;
use crate::error::InstrumentationError;
use crate::hooks::HookRuntime;
use crate::policy::{InsertionPlan, InstrumentationPolicy, MethodSignature, SkipReason};

/// Result of rewriting one class.
#[derive(Debug, Default)]
pub struct Rewrite {
    /// Number of methods that were instrumented.
    pub instrumented: usize,
    /// Every per-method decision, in method order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Instrument the methods of `class` that `policy` selects.
///
/// Methods that are not selected keep their attributes untouched, and the
/// constant pool only grows once a method is instrumented. On error `class`
/// may be partially rewritten and must be discarded.
pub fn rewrite<P: InstrumentationPolicy + ?Sized>(
    class: &mut ClassUnit,
    class_name: &str,
    policy: &P,
    hooks: &HookRuntime,
) -> Result<Rewrite, InstrumentationError> {
    let signatures = class
        .methods
        .iter()
        .map(|m| -> Result<MethodSignature, InstrumentationError> {
            Ok(MethodSignature::new(m.name(&class.constant_pool)?, m.descriptor(&class.constant_pool)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // All signatures are known before the first lookup.
    policy.classify(class_name, &signatures);

    let mut report = Rewrite::default();
    let plans: Vec<InsertionPlan> = signatures
        .iter()
        .zip(&class.methods)
        .map(|(signature, method)| {
            let plan = match policy.lookup_tracepoint(class_name, &signature.name, &signature.descriptor) {
                Ok(tracepoint) => InsertionPlan::for_tracepoint(tracepoint),
                Err(error) => {
                    report.diagnostics.push(Diagnostic::PolicyLookupFailed {
                        class: class_name.to_string(),
                        method: signature.name.clone(),
                        descriptor: signature.descriptor.clone(),
                        error: error.to_string(),
                    });
                    InsertionPlan::Skip(SkipReason::LookupFailed)
                }
            };
            match plan {
                InsertionPlan::Skip(_) => plan,
                _ if method.code().is_none() => InsertionPlan::Skip(SkipReason::NoCode),
                _ => plan,
            }
        })
        .collect();

    let mut refs = hooks.refs();
    let mut cx = SynthesisContext {
        pool: &mut class.constant_pool,
        hooks: &mut refs,
        major_version: class.major_version,
    };
    for ((method, signature), plan) in class.methods.iter_mut().zip(&signatures).zip(plans) {
        let Some(advice) = plan.advice() else {
            if let InsertionPlan::Skip(reason) = plan {
                if reason != SkipReason::LookupFailed {
                    report.diagnostics.push(Diagnostic::MethodSkipped {
                        class: class_name.to_string(),
                        method: signature.name.clone(),
                        descriptor: signature.descriptor.clone(),
                        reason,
                    });
                }
            }
            continue;
        };
        synthesize(method, &advice, &mut cx)?;
        report.instrumented += 1;
        report.diagnostics.push(Diagnostic::MethodInstrumented {
            class: class_name.to_string(),
            method: signature.name.clone(),
            descriptor: signature.descriptor.clone(),
            id: advice.id,
            captures_args: advice.capture.is_some(),
        });
    }
    Ok(report)
}
