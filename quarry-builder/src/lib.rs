//! Build worker: loads a branch, enumerates its compileable modules and
//! reports progress to the controller through the build notifier.

pub mod compiler;
pub mod enumerate;
mod error;
pub mod model;
pub mod problems;
pub mod progress;
pub mod worker;

pub use compiler::{BuildAction, BuildConfig, CommandCompiler, ModuleCompiler};
pub use enumerate::{enumerate, Enumeration};
pub use error::BuildError;
pub use model::{Branch, Definition, DefinitionKind, Layer, Module};
pub use problems::{BuildOutcome, Problem, ProblemHandler, Severity};
pub use progress::{ModuleProgress, ProgressHandle, Reporter};
pub use worker::{install_fault_handler, report, run_job};
