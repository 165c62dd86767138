use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

// Global counter to keep scratch directories of parallel tests apart
static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Scratch directory removed on drop
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(tag: &str) -> Self {
        let id = TEST_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "mirai-unit-{}-{tag}-{id}",
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

#[cfg(unix)]
pub fn write_script(dir: &TestDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.write(name, body);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in compiler: "compiles" a shell script by copying it to the output path.
///
/// Every invocation appends its arguments as a line to `<dir>/compiler.log`; sources
/// containing `COMPILE_ERROR` fail with a diagnostic on stderr. Integration tests
/// use the copy in `tests/common/mod.rs`, which must stay the same script.
#[cfg(unix)]
pub fn fake_compiler(dir: &TestDir) -> PathBuf {
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
    write_script(dir, "fakecc", &body)
}

pub fn compiler_runs(dir: &TestDir) -> usize {
    fs::read_to_string(dir.path().join("compiler.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}
