mod checker;
mod orchestrator;

use thiserror::Error;

pub use checker::{classify, compare_output};
pub use orchestrator::{CaseResult, Orchestrator, RunReport, RunState};

pub const TESTING_COMPLETE_MESSAGE: &str = "Testing complete";
pub const TESTING_INTERRUPTED_MESSAGE: &str = "Testing interrupted";

/// Reasons a run stops before (or instead of) executing cases.
///
/// Per-case failures are verdicts, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("No source file is open")]
    NoFileOpen,
    #[error("No compiler preset selected")]
    NoPresetSelected,
    #[error("No enabled test cases to run")]
    NoCases,
    #[error("Test case `{0}` not found")]
    CaseNotFound(String),
    #[error("A test run is already in progress")]
    Busy,
    #[error("Compiler not found for preset `{preset}`, expected path: {path}")]
    CompilerNotFound { preset: String, path: String },
    #[error("{0}")]
    CompileFailure(String),
    /// Scratch files or the host itself failed
    #[error("{0}")]
    Host(String),
}

impl RunError {
    /// Errors the user fixes by changing what is open or selected
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::NoFileOpen | Self::NoPresetSelected | Self::NoCases | Self::CaseNotFound(_)
        )
    }
}
