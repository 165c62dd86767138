#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use mirai::config::{CompilerPreset, Settings};
use mirai::host::{DebugLaunch, EditorHost, QuickPickItem};

// Global counter to keep workspaces of parallel tests apart
static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Scratch workspace removed on drop
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(tag: &str) -> Self {
        let id = TEST_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "mirai-it-{}-{tag}-{id}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Compiler stand-in: copies the "source" (a shell script) to the output path.
///
/// Sources containing `COMPILE_ERROR` fail with a diagnostic on stderr; every
/// invocation is logged to `compiler.log`.
#[cfg(unix)]
pub fn fake_compiler(dir: &TestDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let log = dir.path().join("compiler.log");
    let body = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
prev1=""
last=""
for arg in "$@"; do prev2=$prev1; prev1=$last; last=$arg; done
src=$prev2
if grep -q COMPILE_ERROR "$src"; then
  echo "$src:1:1: error: expected unqualified-id" >&2
  exit 1
fi
cp "$src" "$last" && chmod +x "$last"
"#,
        log = log.display()
    );
    let path = dir.write("fakecc", &body);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lines logged by the fake compiler, one per invocation
pub fn compiler_log(dir: &TestDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("compiler.log"))
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Settings with a single preset driving the fake compiler
#[cfg(unix)]
pub fn fake_settings(dir: &TestDir, timeout_seconds: f64) -> Settings {
    let mut preset = CompilerPreset::new("fake", fake_compiler(dir).to_string_lossy());
    preset.language_standard = Some("c++17".to_string());
    preset.optimization_level = Some("2".to_string());
    preset.timeout_seconds = Some(timeout_seconds);
    Settings {
        presets: vec![preset],
        ..Settings::default()
    }
}

/// Host that records every call and answers prompts from a script.
///
/// Same event formats as the unit-test host in `src/host.rs`.
#[derive(Default)]
pub struct RecordingHost {
    pub file: Option<PathBuf>,
    pub answers: Mutex<Vec<String>>,
    pub picks: Mutex<Vec<usize>>,
    events: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn with_file(file: PathBuf) -> Self {
        Self {
            file: Some(file),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl EditorHost for RecordingHost {
    fn current_file(&self) -> Option<PathBuf> {
        self.file.clone()
    }

    fn show_info(&self, message: &str) {
        self.record(format!("info: {message}"));
    }

    fn show_error(&self, message: &str) {
        self.record(format!("error: {message}"));
    }

    fn show_error_with_details(&self, message: &str, details: &str) {
        self.record(format!("error: {message}"));
        self.record(format!("details: {details}"));
    }

    async fn input_box(&self, _prompt: &str, _value: &str) -> Option<String> {
        self.answers.lock().pop()
    }

    async fn quick_pick(&self, _title: &str, _items: &[QuickPickItem]) -> Option<usize> {
        self.picks.lock().pop()
    }

    fn open_diff(&self, left: &Path, right: &Path, title: &str) {
        self.record(format!("diff: {title} {} {}", left.display(), right.display()));
    }

    fn send_to_terminal(&self, name: &str, text: &str) {
        self.record(format!("terminal {name}: {text}"));
    }

    fn start_debug(&self, launch: &DebugLaunch) -> anyhow::Result<()> {
        self.record(format!("debug: {}", launch.program.display()));
        Ok(())
    }

    fn reveal_case(&self, name: &str) {
        self.record(format!("reveal: {name}"));
    }

    fn report_progress(&self, _message: &str, increment: f64) {
        self.record(format!("progress: {increment:.0}"));
    }
}
