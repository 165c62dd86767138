use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::cache::CompileCache;
use super::process::{RunRequest, RunStatus, run};
use crate::config::CompilerPreset;

pub const NO_CHANGE_MESSAGE: &str = "No change";
const SOURCE_EXTENSION: &str = "cpp";
const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Compiled,
    /// Cache hit, the compiler was not spawned
    Unchanged,
    Failed,
    CompilerNotFound,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub status: CompileStatus,
    pub message: String,
    /// Interleaved stdout and stderr of the compiler
    pub output: String,
}

impl CompileOutcome {
    fn failed(message: String, output: String) -> Self {
        Self {
            status: CompileStatus::Failed,
            message,
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            CompileStatus::Compiled | CompileStatus::Unchanged
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { -1 }
    }
}

/// Compiler driver sitting in front of the shared compile cache
pub struct Compiler {
    cache: Arc<CompileCache>,
    timeout: Duration,
}

impl Compiler {
    pub fn new(cache: Arc<CompileCache>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    /// Compiles `source` into `executable` unless the cache proves it unnecessary.
    ///
    /// The cache is only updated after a zero exit code.
    pub async fn compile(
        &self,
        preset: &CompilerPreset,
        source: &Path,
        executable: &Path,
        force: bool,
        token: &CancellationToken,
    ) -> CompileOutcome {
        let key = match CompileCache::key_for(source, preset) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Failed to read source {}: {e}", source.display());
                return CompileOutcome::failed(
                    format!("Failed to read source file {}: {e}", source.display()),
                    String::new(),
                );
            }
        };
        if !force && self.cache.is_fresh(source, &key) {
            log::debug!("{} unchanged, skipping compilation", source.display());
            return CompileOutcome {
                status: CompileStatus::Unchanged,
                message: NO_CHANGE_MESSAGE.to_string(),
                output: String::new(),
            };
        }

        let Some(compiler) = resolve_compiler(&preset.compiler_path) else {
            log::warn!(
                "Compiler for preset `{}` not found at `{}`",
                preset.label,
                preset.compiler_path
            );
            return CompileOutcome {
                status: CompileStatus::CompilerNotFound,
                message: format!(
                    "Compiler not found for preset `{}`, expected path: {}",
                    preset.label, preset.compiler_path
                ),
                output: String::new(),
            };
        };

        if let Some(dir) = executable.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                return CompileOutcome::failed(
                    format!("Failed to create output directory {}: {e}", dir.display()),
                    String::new(),
                );
            }
        }

        let args = preset.compile_args(source, executable);
        log::info!(
            "Compiling {} with preset `{}`: {}",
            source.display(),
            preset.label,
            preset.compile_command_line(source, executable)
        );
        let outcome = run(
            RunRequest {
                executable: &compiler,
                args: &args,
                timeout: self.timeout,
                input: "",
                mix_streams: true,
            },
            token,
        )
        .await;

        match outcome.status {
            RunStatus::Exited(Some(0)) => {
                self.cache.record(source, key);
                CompileOutcome {
                    status: CompileStatus::Compiled,
                    message: outcome.message,
                    output: outcome.output,
                }
            }
            RunStatus::Cancelled => {
                log::info!("Compilation of {} cancelled", source.display());
                CompileOutcome {
                    status: CompileStatus::Cancelled,
                    message: outcome.message,
                    output: String::new(),
                }
            }
            RunStatus::TimedOut => CompileOutcome::failed(
                format!("Compilation timed out after {:?}", self.timeout),
                outcome.output,
            ),
            RunStatus::SpawnFailed => CompileOutcome::failed(outcome.message, outcome.output),
            RunStatus::Exited(_) => {
                log::info!("Compilation of {} failed: {}", source.display(), outcome.message);
                CompileOutcome::failed("Compilation failed".to_string(), outcome.output)
            }
        }
    }
}

/// An existing executable path, or the first match on `PATH`
fn resolve_compiler(compiler_path: &str) -> Option<PathBuf> {
    let path = Path::new(compiler_path);
    if is_executable(path) {
        return Some(path.to_path_buf());
    }
    find_in_path(compiler_path)
}

/// Looks a bare program name up on `PATH`; names with a directory part never match
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.is_empty() || Path::new(program).components().count() != 1 {
        return None;
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if cfg!(windows) && !program.ends_with(".exe") {
            let candidate = dir.join(format!("{program}.exe"));
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// One entry of a clang `compile_commands.json`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompileCommand {
    pub directory: String,
    pub command: String,
    pub file: String,
}

/// Compile commands for every `.cpp` file below `base_dir`, sorted by path
pub fn generate_compile_commands(
    preset: &CompilerPreset,
    base_dir: &Path,
    src_base: &Path,
    build_base: &Path,
) -> anyhow::Result<Vec<CompileCommand>> {
    let mut sources = collect_sources(base_dir)?;
    sources.sort();

    Ok(sources
        .into_iter()
        .map(|source| {
            let executable = preset.executable_path(&source, src_base, build_base);
            CompileCommand {
                directory: source
                    .parent()
                    .map(|dir| dir.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                command: preset.compile_command_line(&source, &executable),
                file: source.to_string_lossy().into_owned(),
            }
        })
        .collect())
}

fn collect_sources(base_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(base_dir).follow_links(false).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to read directory {}", base_dir.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
        {
            sources.push(entry.into_path());
        }
    }
    Ok(sources)
}

/// Writes `compile_commands.json` into `base_dir` and returns its path
pub fn write_compile_commands(
    preset: &CompilerPreset,
    base_dir: &Path,
    src_base: &Path,
    build_base: &Path,
) -> anyhow::Result<PathBuf> {
    let commands = generate_compile_commands(preset, base_dir, src_base, build_base)?;
    let path = base_dir.join(COMPILE_COMMANDS_FILE);
    fs::write(&path, serde_json::to_string_pretty(&commands)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote {} entries to {}", commands.len(), path.display());
    Ok(path)
}
