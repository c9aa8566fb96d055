//! # jvm-method-tracer
//!
//! Load-time bytecode rewriting that wraps selected JVM methods with calls
//! to a tracing trampoline.
//!
//! Given the bytes of one class file, the [`Transformer`] asks an
//! [`InstrumentationPolicy`] which methods to trace, and rewrites each of
//! them so that:
//!
//! - `enter(id)` (or `enter(id, args)` with a boxed `Object[]` of selected
//!   arguments) runs when the method starts, after the superclass
//!   constructor call in constructors;
//! - `leave()` runs before every return;
//! - `leave()` also runs when an exception escapes the method, through a
//!   catch-all handler that rethrows the exception unchanged and is placed
//!   after the method's own handlers.
//!
//! Methods that are not selected are left byte-for-byte untouched, and a
//! class in which nothing is selected comes back as
//! [`TransformOutcome::Unchanged`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jvm_method_tracer::{TracepointRegistry, TracerConfig, Transformer, TransformOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracerConfig::from_yaml_str(
//!     r#"
//! trace:
//!   - class: com.example.Calc
//!     method: divide
//!     capture: [0]
//! "#,
//! )?;
//! let registry = TracepointRegistry::from_config(&config)?;
//! let transformer = Transformer::new(registry).with_hooks(config.hooks.clone());
//!
//! let original = std::fs::read("Calc.class")?;
//! match transformer.transform("com/example/Calc", &original)? {
//!     TransformOutcome::Rewritten(bytes) => std::fs::write("Calc.class", bytes)?,
//!     TransformOutcome::Unchanged => {}
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Transformer::transform (transform)            │
//! │     class filter, error reporting, diagnostics           │
//! ├─────────────────────────────────────────────────────────┤
//! │                 rewriter::rewrite                        │
//! │     classify signatures, plan each method                │
//! ├─────────────────────────────────────────────────────────┤
//! │      advice::synthesize        args::encode_args         │
//! │   enter/leave + catch-all      boxed Object[] builder    │
//! ├─────────────────────────────────────────────────────────┤
//! │   classfile (container)  bytecode (labels)  descriptor   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`classfile`] | Class file decode/encode, constant pool |
//! | [`bytecode`] | Label-addressed method bodies, stack map frames |
//! | [`descriptor`] | Field and method descriptors |
//! | [`args`] | Capture masks and argument array construction |
//! | [`advice`] | Inserting the hook calls into one method |
//! | [`rewriter`] | Per-class pipeline |
//! | [`policy`] | What to instrument |
//! | [`registry`] | Concurrent in-memory policy |
//! | [`config`] | YAML configuration |
//! | [`diagnostics`] | Decision records and sinks |

pub mod advice;
pub mod args;
pub mod bytecode;
pub mod classfile;
pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod hooks;
pub mod policy;
pub mod registry;
pub mod rewriter;
mod transform;

pub use args::CaptureMask;
pub use config::{ConfigError, TraceRequest, TracerConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, LogSink, MemorySink};
pub use error::{InstrumentationError, TransformError};
pub use hooks::HookRuntime;
pub use policy::{InsertionPlan, InstrumentationPolicy, MethodSignature, PolicyError, SkipReason, Tracepoint};
pub use registry::{MethodKey, TracepointRegistry};
pub use transform::{TransformOutcome, Transformer};
