use crate::exec::{RunOutcome, RunStatus};
use crate::model::Verdict;

/// Standard judge comparison.
///
/// Trailing whitespace on each line and trailing blank lines are ignored,
/// everything else must match exactly.
pub fn compare_output(program_output: &str, expected_output: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.lines()
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
            .trim_end()
            .to_string()
    };

    normalize(program_output) == normalize(expected_output)
}

/// Verdict of one execution against the expected output
pub fn classify(outcome: &RunOutcome, expected_output: &str) -> Verdict {
    match outcome.status {
        RunStatus::Exited(Some(0)) if compare_output(&outcome.output, expected_output) => {
            Verdict::Accepted
        }
        RunStatus::Exited(Some(0)) => Verdict::WrongAnswer,
        RunStatus::TimedOut => Verdict::TimeLimitExceeded,
        RunStatus::Cancelled => Verdict::Cancelled,
        RunStatus::Exited(_) | RunStatus::SpawnFailed => Verdict::RuntimeError,
    }
}
