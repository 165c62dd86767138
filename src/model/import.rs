use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::case::TestCase;
use super::problem::ProblemTree;

pub const INPUT_EXTENSION: &str = "in";

/// Expected-output suffixes, tried in this order
pub const ANSWER_EXTENSIONS: [&str; 3] = ["out", "ans", "a"];

/// First existing `<stem>.out` / `.ans` / `.a` next to an input file
pub fn find_answer_file(input: &Path) -> Option<PathBuf> {
    ANSWER_EXTENSIONS
        .iter()
        .map(|ext| input.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// Scans each directory (not recursively) for `*.in` files with a matching answer.
///
/// Pairs larger than `threshold` bytes stay on disk as external cases; smaller
/// ones are read into memory. Inputs without an answer file are skipped.
pub fn import_cases(dirs: &[PathBuf], threshold: u64) -> anyhow::Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    for dir in dirs {
        let mut inputs: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == INPUT_EXTENSION)
            })
            .collect();
        inputs.sort();

        for input in inputs {
            let Some(answer) = find_answer_file(&input) else {
                log::debug!("No answer file for {}, skipped", input.display());
                continue;
            };
            let name = input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = fs::metadata(&input)?.len() + fs::metadata(&answer)?.len();

            let case = if size > threshold {
                TestCase::external(name, input, answer)
            } else {
                let input_text = fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read {}", input.display()))?;
                let answer_text = fs::read_to_string(&answer)
                    .with_context(|| format!("Failed to read {}", answer.display()))?;
                TestCase::new(name, input_text, answer_text)
            };
            cases.push(case);
        }
    }
    log::info!("Imported {} cases from {} directories", cases.len(), dirs.len());
    Ok(cases)
}

/// Moves oversized inline cases to `<cases_dir>/<tree path>/<name>.in|.ans`.
///
/// Distinct labels can sanitize to the same path, so a destination that already
/// exists or was handed out earlier in the pass gets a ` (N)` suffix.
/// Returns how many cases were moved.
pub fn externalize_large_cases(
    tree: &mut ProblemTree,
    threshold: u64,
    cases_dir: &Path,
) -> anyhow::Result<usize> {
    let mut moved = 0;
    let mut assigned = HashSet::new();
    for id in tree.problem_ids() {
        let dir = tree
            .path_of(id)
            .iter()
            .fold(cases_dir.to_path_buf(), |dir, label| {
                dir.join(sanitize_component(label))
            });
        let Some(problem) = tree.problem_mut(id) else {
            continue;
        };
        for case in problem.cases.iter_mut() {
            if case.is_external() || case.combined_len() <= threshold {
                continue;
            }
            let (input, answer) = free_destination(&dir, &sanitize_component(case.name()), &mut assigned);
            case.move_to_files(&input, &answer)
                .with_context(|| format!("Failed to externalize case {}", case.name()))?;
            moved += 1;
        }
    }
    if moved > 0 {
        log::info!("Moved {moved} large cases to {}", cases_dir.display());
    }
    Ok(moved)
}

fn free_destination(dir: &Path, stem: &str, assigned: &mut HashSet<PathBuf>) -> (PathBuf, PathBuf) {
    let mut candidate = stem.to_string();
    let mut n = 1;
    loop {
        let input = dir.join(format!("{candidate}.{INPUT_EXTENSION}"));
        let answer = dir.join(format!("{candidate}.ans"));
        if !input.exists() && !answer.exists() && assigned.insert(input.clone()) {
            return (input, answer);
        }
        n += 1;
        candidate = format!("{stem} ({n})");
    }
}

fn sanitize_component(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}
