//! Candidate verification: compile, execute, classify.

pub mod diagnostic;
pub mod parse;
pub mod pipeline;
pub mod scratch;
pub mod toolchain;

pub use diagnostic::{Diagnostic, DiagnosticKind, SourceLocation};
pub use pipeline::{Verification, VerificationPipeline};
pub use toolchain::{CommandToolchain, CompiledUnit, ExecOptions, ProcessOutput, SourceSet, Toolchain};
