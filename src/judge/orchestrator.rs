use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::checker::classify;
use super::{RunError, TESTING_COMPLETE_MESSAGE, TESTING_INTERRUPTED_MESSAGE};
use crate::config::{self, CompilerPreset, PresetOverrides, Settings, check_preset_label_uniqueness};
use crate::exec::{CompileCache, CompileOutcome, CompileStatus, Compiler, RunRequest, run};
use crate::host::{DebugLaunch, EditorHost, pick_preset};
use crate::model::{NodeId, ProblemTree, Verdict};

const TERMINAL_NAME: &str = "mirai";

/// Where the current (or last) run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Compiling,
    CompileFailed,
    Running,
    Completed,
    Aborted,
}

/// Outcome of one executed case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub name: String,
    pub label: String,
    pub verdict: Verdict,
    pub elapsed_ms: Option<f64>,
    pub memory_kb: u64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// `Completed` or `Aborted`
    pub state: RunState,
    pub compile: CompileOutcome,
    pub results: Vec<CaseResult>,
}

impl RunReport {
    pub fn all_accepted(&self) -> bool {
        self.state == RunState::Completed
            && self
                .results
                .iter()
                .all(|result| result.verdict == Verdict::Accepted)
    }
}

/// Sequences compile, case execution and verdicts for one workspace.
///
/// At most one run is in flight; a second trigger gets `RunError::Busy`.
pub struct Orchestrator {
    settings: RwLock<Settings>,
    workspace: PathBuf,
    scratch_dir: PathBuf,
    cache: Arc<CompileCache>,
    /// Label of the selected preset
    preset: Mutex<Option<String>>,
    state: Mutex<RunState>,
    busy: AtomicBool,
    active: Mutex<Option<CancellationToken>>,
    diagnostics: Mutex<String>,
}

/// Clears the busy flag and the active token when a run ends, however it ends
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.active.lock().take();
        self.orchestrator.busy.store(false, Ordering::SeqCst);
    }
}

/// What a run needs once its entry conditions hold
struct Prepared {
    source: PathBuf,
    preset: CompilerPreset,
    executable: PathBuf,
}

impl Orchestrator {
    pub fn new(settings: Settings, workspace: impl Into<PathBuf>, cache: Arc<CompileCache>) -> Self {
        Self {
            settings: RwLock::new(settings),
            workspace: workspace.into(),
            scratch_dir: config::scratch_dir(),
            cache,
            preset: Mutex::new(None),
            state: Mutex::new(RunState::Idle),
            busy: AtomicBool::new(false),
            active: Mutex::new(None),
            diagnostics: Mutex::new(String::new()),
        }
    }

    /// Directory for debug input and diff files
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Replaces the configuration; the compile cache is dropped wholesale
    pub fn update_settings(&self, settings: Settings) {
        if let Some(label) = check_preset_label_uniqueness(&settings.presets) {
            log::warn!("Duplicate preset label `{label}`, only the first one will be used");
        }
        let mut preset = self.preset.lock();
        if preset
            .as_deref()
            .is_some_and(|label| settings.find_preset(label).is_none())
        {
            log::info!("Selected preset no longer exists, selection cleared");
            *preset = None;
        }
        *self.settings.write() = settings;
        self.cache.invalidate();
    }

    /// Switches the active preset; the compile cache is dropped wholesale
    pub fn select_preset(&self, label: &str) -> Result<CompilerPreset, RunError> {
        let preset = self
            .settings
            .read()
            .find_preset(label)
            .ok_or(RunError::NoPresetSelected)?;
        *self.preset.lock() = Some(preset.label.clone());
        self.cache.invalidate();
        log::info!("Preset `{label}` selected");
        Ok(preset)
    }

    pub fn current_preset(&self) -> Option<CompilerPreset> {
        let label = self.preset.lock().clone()?;
        self.settings.read().find_preset(&label)
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        log::debug!("Run state: {state:?}");
        *self.state.lock() = state;
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Token of the run in flight, if any
    pub fn active_token(&self) -> Option<CancellationToken> {
        self.active.lock().clone()
    }

    /// Cancels whatever is running; returns whether there was something to stop
    pub fn stop_all(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                log::info!("Stopping the active run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Compiler output of the last failed compile
    pub fn diagnostics(&self) -> String {
        self.diagnostics.lock().clone()
    }

    pub fn clear_compile_cache(&self) {
        self.cache.invalidate();
    }

    fn begin(&self) -> Result<(RunGuard<'_>, CancellationToken), RunError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunError::Busy);
        }
        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());
        Ok((RunGuard { orchestrator: self }, token))
    }

    /// Checks the entry conditions: an open file and a preset, asking the host if needed
    async fn prepare<H: EditorHost>(&self, host: &H, overrides: Option<&PresetOverrides>) -> Result<Prepared, RunError> {
        let source = host.current_file().ok_or(RunError::NoFileOpen)?;
        let preset = match self.current_preset() {
            Some(preset) => preset,
            None => {
                let presets = self.settings.read().effective_presets();
                let preset = pick_preset(host, &presets)
                    .await
                    .ok_or(RunError::NoPresetSelected)?;
                *self.preset.lock() = Some(preset.label.clone());
                preset
            }
        };
        let preset = match overrides {
            Some(overrides) => preset.with_overrides(overrides),
            None => preset,
        };

        let settings = self.settings.read();
        let executable = preset.executable_path(
            &source,
            &settings.src_base(&self.workspace),
            &settings.build_base(&self.workspace),
        );
        Ok(Prepared {
            source,
            preset,
            executable,
        })
    }

    /// Compile step shared by every entry point; failures are shown to the user
    async fn compile_step<H: EditorHost>(
        &self,
        host: &H,
        prepared: &Prepared,
        force: bool,
        token: &CancellationToken,
    ) -> Result<CompileOutcome, RunError> {
        self.set_state(RunState::Compiling);
        host.report_progress("Compiling", 0.0);
        let compiler = Compiler::new(self.cache.clone(), self.settings.read().compile_timeout());
        let outcome = compiler
            .compile(
                &prepared.preset,
                &prepared.source,
                &prepared.executable,
                force,
                token,
            )
            .await;

        match outcome.status {
            CompileStatus::Compiled | CompileStatus::Unchanged => {
                self.diagnostics.lock().clear();
                Ok(outcome)
            }
            CompileStatus::Cancelled => {
                self.set_state(RunState::Aborted);
                host.show_info(TESTING_INTERRUPTED_MESSAGE);
                Ok(outcome)
            }
            CompileStatus::CompilerNotFound => {
                self.set_state(RunState::CompileFailed);
                *self.diagnostics.lock() = outcome.message.clone();
                let error = RunError::CompilerNotFound {
                    preset: prepared.preset.label.clone(),
                    path: prepared.preset.compiler_path.clone(),
                };
                host.show_error_with_details(&error.to_string(), &outcome.message);
                Err(error)
            }
            CompileStatus::Failed => {
                self.set_state(RunState::CompileFailed);
                *self.diagnostics.lock() = outcome.output.clone();
                host.show_error_with_details(&outcome.message, &outcome.output);
                Err(RunError::CompileFailure(outcome.message))
            }
        }
    }

    /// Compiles the host's current file without running anything
    pub async fn compile_current<H: EditorHost>(&self, host: &H, force: bool) -> Result<CompileOutcome, RunError> {
        let (_guard, token) = self.begin()?;
        let prepared = self.prepare(host, None).await.inspect_err(|e| host.show_error(&e.to_string()))?;
        let outcome = self.compile_step(host, &prepared, force, &token).await?;
        if outcome.is_success() {
            self.set_state(RunState::Idle);
            host.show_info(&format!("Compiled {}: {}", prepared.source.display(), outcome.message));
        }
        Ok(outcome)
    }

    /// Runs every enabled case of `problem`, in list order
    pub async fn run_all<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        force: bool,
    ) -> Result<RunReport, RunError> {
        self.run_cases(host, tree, problem, None, force).await
    }

    /// Runs the single case called `case`, enabled or not
    pub async fn run_one<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        case: &str,
        force: bool,
    ) -> Result<RunReport, RunError> {
        self.run_cases(host, tree, problem, Some(case), force).await
    }

    async fn run_cases<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        only: Option<&str>,
        force: bool,
    ) -> Result<RunReport, RunError> {
        let (_guard, token) = self.begin()?;
        let entry = self.check_entry(host, tree, problem, only).await;
        let (prepared, targets) = entry.inspect_err(|e| host.show_error(&e.to_string()))?;

        let compile = self.compile_step(host, &prepared, force, &token).await?;
        if compile.status == CompileStatus::Cancelled {
            return Ok(RunReport {
                state: RunState::Aborted,
                compile,
                results: Vec::new(),
            });
        }

        self.set_state(RunState::Running);
        let (timeout, mix_streams) = {
            let settings = self.settings.read();
            (
                settings.timeout_for(&prepared.preset),
                settings.mix_streams_for(&prepared.preset),
            )
        };
        let increment = 100.0 / targets.len() as f64;
        let mut results = Vec::with_capacity(targets.len());
        let mut aborted = false;

        for name in &targets {
            if token.is_cancelled() {
                aborted = true;
                break;
            }
            // Snapshot the case so the tree is never locked across an await
            let snapshot = {
                let mut tree = tree.lock();
                tree.problem_mut(problem)
                    .and_then(|p| p.cases.get_mut(name))
                    .map(|case| {
                        case.verdict = Verdict::Pending;
                        (case.label().to_string(), case.input(), case.expected_output())
                    })
            };
            let Some((label, input, expected)) = snapshot else {
                log::warn!("Case `{name}` disappeared during the run, skipped");
                continue;
            };

            host.reveal_case(name);
            log::debug!("Running case `{name}`");
            let outcome = run(
                RunRequest {
                    executable: &prepared.executable,
                    args: &[],
                    timeout,
                    input: &input,
                    mix_streams,
                },
                &token,
            )
            .await;
            let verdict = classify(&outcome, &expected);
            log::info!("Case `{name}`: {verdict} ({})", outcome.message);

            if let Some(case) = tree
                .lock()
                .problem_mut(problem)
                .and_then(|p| p.cases.get_mut(name))
            {
                case.verdict = verdict;
                case.output = outcome.output.clone();
                case.elapsed_ms = outcome.elapsed_ms;
                case.memory_kb = outcome.memory_kb;
            }

            if verdict == Verdict::Cancelled {
                aborted = true;
                break;
            }
            results.push(CaseResult {
                name: name.clone(),
                label,
                verdict,
                elapsed_ms: outcome.elapsed_ms,
                memory_kb: outcome.memory_kb,
                message: outcome.message,
            });
            host.report_progress(&format!("{}/{}", results.len(), targets.len()), increment);
        }

        let state = if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        self.set_state(state);
        host.show_info(if aborted {
            TESTING_INTERRUPTED_MESSAGE
        } else {
            TESTING_COMPLETE_MESSAGE
        });
        Ok(RunReport {
            state,
            compile,
            results,
        })
    }

    /// Entry conditions of a run plus the names of the cases to execute.
    ///
    /// Previous results of those cases are cleared here.
    async fn check_entry<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        only: Option<&str>,
    ) -> Result<(Prepared, Vec<String>), RunError> {
        if host.current_file().is_none() {
            return Err(RunError::NoFileOpen);
        }
        let targets: Vec<String> = {
            let tree = tree.lock();
            let cases = &tree.problem(problem).ok_or(RunError::NoCases)?.cases;
            match only {
                Some(name) => {
                    let case = cases
                        .get(name)
                        .ok_or_else(|| RunError::CaseNotFound(name.to_string()))?;
                    vec![case.name().to_string()]
                }
                None => cases
                    .iter()
                    .filter(|case| case.enabled)
                    .map(|case| case.name().to_string())
                    .collect(),
            }
        };
        if targets.is_empty() {
            return Err(RunError::NoCases);
        }
        let prepared = self.prepare(host, None).await?;

        let mut tree = tree.lock();
        if let Some(p) = tree.problem_mut(problem) {
            for case in p.cases.iter_mut().filter(|c| targets.iter().any(|t| t == c.name())) {
                case.clear_result();
            }
        }
        Ok((prepared, targets))
    }

    /// Compiles, then hands the executable to a terminal for interactive use
    pub async fn compile_and_run<H: EditorHost>(&self, host: &H, force: bool) -> Result<PathBuf, RunError> {
        let (_guard, token) = self.begin()?;
        let prepared = self.prepare(host, None).await.inspect_err(|e| host.show_error(&e.to_string()))?;
        let outcome = self.compile_step(host, &prepared, force, &token).await?;
        if !outcome.is_success() {
            return Err(RunError::CompileFailure(outcome.message));
        }
        self.set_state(RunState::Idle);
        let command = shell_quote(&prepared.executable.to_string_lossy());
        host.send_to_terminal(TERMINAL_NAME, &command);
        Ok(prepared.executable)
    }

    /// Builds a debug variant and asks the host to start a debug session.
    ///
    /// The input of `case` (or of the current case) is written to a scratch
    /// file and redirected to stdin.
    pub async fn debug<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        case: Option<&str>,
    ) -> Result<DebugLaunch, RunError> {
        let (_guard, token) = self.begin()?;
        let input = {
            let tree = tree.lock();
            let cases = tree.problem(problem).map(|p| &p.cases);
            match (case, cases) {
                (Some(name), Some(cases)) => Some(
                    cases
                        .get(name)
                        .ok_or_else(|| RunError::CaseNotFound(name.to_string()))?
                        .input(),
                ),
                (Some(name), None) => return Err(RunError::CaseNotFound(name.to_string())),
                (None, cases) => cases.and_then(|c| c.current()).map(|c| c.input()),
            }
        };

        let prepared = self
            .prepare(host, Some(&PresetOverrides::debug_build()))
            .await
            .inspect_err(|e| host.show_error(&e.to_string()))?;
        let outcome = self.compile_step(host, &prepared, false, &token).await?;
        if !outcome.is_success() {
            return Err(RunError::CompileFailure(outcome.message));
        }
        self.set_state(RunState::Idle);

        let stdin = match input {
            Some(text) => Some(write_scratch(&self.scratch_subdir()?, "debug.in", &text)?),
            None => None,
        };
        let launch = DebugLaunch {
            cwd: prepared
                .executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.workspace.clone()),
            program: prepared.executable,
            args: Vec::new(),
            stdin,
        };
        host.start_debug(&launch).map_err(|e| {
            let error = RunError::Host(format!("Failed to start debugging: {e:#}"));
            host.show_error(&error.to_string());
            error
        })?;
        Ok(launch)
    }

    /// Opens the expected and captured output of a case side by side
    pub fn show_diff<H: EditorHost>(
        &self,
        host: &H,
        tree: &Mutex<ProblemTree>,
        problem: NodeId,
        case: &str,
    ) -> Result<(PathBuf, PathBuf), RunError> {
        let (label, expected, output) = {
            let tree = tree.lock();
            let found = tree
                .problem(problem)
                .and_then(|p| p.cases.get(case))
                .ok_or_else(|| RunError::CaseNotFound(case.to_string()))?;
            (found.label().to_string(), found.expected_output(), found.output.clone())
        };
        let dir = self.scratch_subdir()?;
        let expected_path = write_scratch(&dir, "expected.txt", &expected)?;
        let output_path = write_scratch(&dir, "output.txt", &output)?;
        host.open_diff(
            &expected_path,
            &output_path,
            &format!("{label}: expected vs output"),
        );
        Ok((expected_path, output_path))
    }

    /// Fresh timestamped directory under the scratch dir
    fn scratch_subdir(&self) -> Result<PathBuf, RunError> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S-%f");
        let dir = self.scratch_dir.join(stamp.to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| RunError::Host(format!("Failed to create {}: {e}", dir.display())))?;
        Ok(dir)
    }
}

fn write_scratch(dir: &Path, file_name: &str, content: &str) -> Result<PathBuf, RunError> {
    let path = dir.join(file_name);
    fs::write(&path, content)
        .map_err(|e| RunError::Host(format!("Failed to write {}: {e}", path.display())))?;
    Ok(path)
}

fn shell_quote(text: &str) -> String {
    if text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-+".contains(c))
    {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use crate::model::TestCase;
    use crate::test_support::TestDir;

    fn orchestrator(dir: &TestDir) -> Orchestrator {
        Orchestrator::new(Settings::default(), dir.path(), Arc::new(CompileCache::new()))
            .with_scratch_dir(dir.path().join("scratch"))
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/ws/build/a"), "/ws/build/a");
        assert_eq!(shell_quote("/my dir/a"), "'/my dir/a'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_select_preset_invalidates_cache() {
        let dir = TestDir::new("orch-select");
        let cache = Arc::new(CompileCache::new());
        let mut settings = Settings::default();
        settings.presets = vec![CompilerPreset::new("a", "g++")];
        let orchestrator = Orchestrator::new(settings.clone(), dir.path(), cache.clone());

        cache.record(Path::new("a.cpp"), "key".to_string());
        assert_eq!(orchestrator.select_preset("a").unwrap().label, "a");
        assert!(cache.is_empty());
        assert_eq!(orchestrator.select_preset("zzz"), Err(RunError::NoPresetSelected));
        assert_eq!(orchestrator.current_preset().unwrap().label, "a");

        // Dropping the preset from the settings clears the selection
        cache.record(Path::new("a.cpp"), "key".to_string());
        settings.presets.clear();
        orchestrator.update_settings(settings);
        assert!(cache.is_empty());
        assert!(orchestrator.current_preset().is_none());
    }

    #[tokio::test]
    async fn test_entry_conditions() {
        let dir = TestDir::new("orch-entry");
        let orchestrator = orchestrator(&dir);
        let tree = Mutex::new(ProblemTree::new());
        let problem = tree.lock().ensure_problem("P").unwrap();

        let no_file = RecordingHost::default();
        let err = orchestrator.run_all(&no_file, &tree, problem, false).await.unwrap_err();
        assert_eq!(err, RunError::NoFileOpen);
        assert_eq!(no_file.events(), vec!["error: No source file is open"]);

        let host = RecordingHost::with_file(dir.write("a.cpp", ""));
        let err = orchestrator.run_all(&host, &tree, problem, false).await.unwrap_err();
        assert_eq!(err, RunError::NoCases);

        let err = orchestrator.run_one(&host, &tree, problem, "nope", false).await.unwrap_err();
        assert_eq!(err, RunError::CaseNotFound("nope".to_string()));

        tree.lock().problem_mut(problem).unwrap().cases.push(TestCase::new("1", "", ""));
        let err = orchestrator.run_all(&host, &tree, problem, false).await.unwrap_err();
        assert_eq!(err, RunError::NoPresetSelected);
        assert!(err.is_user_input());
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_compiler_not_found_keeps_diagnostics() {
        let dir = TestDir::new("orch-no-compiler");
        let orchestrator = orchestrator(&dir);
        let mut settings = Settings::default();
        settings.presets = vec![CompilerPreset::new("ghost", "/nonexistent/g++")];
        orchestrator.update_settings(settings);

        let host = RecordingHost::with_file(dir.write("a.cpp", "int main() {}\n"));
        let err = orchestrator.compile_current(&host, false).await.unwrap_err();
        assert_eq!(
            err,
            RunError::CompilerNotFound {
                preset: "ghost".to_string(),
                path: "/nonexistent/g++".to_string()
            }
        );
        assert_eq!(orchestrator.state(), RunState::CompileFailed);
        assert!(orchestrator.diagnostics().contains("/nonexistent/g++"));
        assert!(host.has_event(
            "error: Compiler not found for preset `ghost`, expected path: /nonexistent/g++"
        ));
        assert!(host.events().iter().any(|e| e.starts_with("details: ") && e.contains("/nonexistent/g++")));
    }

    #[test]
    fn test_show_diff_writes_both_sides() {
        let dir = TestDir::new("orch-diff");
        let orchestrator = orchestrator(&dir);
        let tree = Mutex::new(ProblemTree::new());
        let problem = tree.lock().ensure_problem("P").unwrap();
        {
            let mut tree = tree.lock();
            let case = tree.problem_mut(problem).unwrap().cases.push(TestCase::new("1", "5\n", "5\n"));
            case.output = "6\n".to_string();
        }
        let host = RecordingHost::default();
        let (expected, output) = orchestrator.show_diff(&host, &tree, problem, "1").unwrap();
        assert_eq!(fs::read_to_string(expected).unwrap(), "5\n");
        assert_eq!(fs::read_to_string(output).unwrap(), "6\n");
        assert!(host.events()[0].starts_with("diff: 1: expected vs output"));

        assert_eq!(
            orchestrator.show_diff(&host, &tree, problem, "2"),
            Err(RunError::CaseNotFound("2".to_string()))
        );
    }

    #[test]
    fn test_stop_all_without_run() {
        let dir = TestDir::new("orch-stop");
        let orchestrator = orchestrator(&dir);
        assert!(!orchestrator.stop_all());
        assert!(orchestrator.active_token().is_none());
    }
}
