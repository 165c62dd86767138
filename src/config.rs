use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::exec::find_in_path;

/// Name of the per-workspace problem state file
pub const STATE_FILE_NAME: &str = "mirai_config.json";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Compilers probed on `PATH` when auto-detection is enabled
const AUTO_DETECT_CANDIDATES: [&str; 2] = ["g++", "clang++"];

#[derive(Parser)]
#[command(name = "mirai", version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the settings file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Workspace directory holding the problem state file
    #[arg(long = "workspace", short = 'w', default_value = ".")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a source file and run it against the cases of a problem
    Test {
        /// Source file to compile
        source: PathBuf,
        /// Problem path, folder labels joined with '/'
        #[arg(long, short)]
        problem: String,
        /// Preset label, defaults to the first configured preset
        #[arg(long)]
        preset: Option<String>,
        /// Run only the case with this name
        #[arg(long)]
        case: Option<String>,
        /// Recompile even if nothing changed
        #[arg(long, short, default_value_t = false)]
        force: bool,
    },
    /// Compile a source file without running any case
    Compile {
        source: PathBuf,
        #[arg(long)]
        preset: Option<String>,
        #[arg(long, short, default_value_t = false)]
        force: bool,
    },
    /// Import `.in` / answer file pairs from directories into a problem
    Import {
        #[arg(long, short)]
        problem: String,
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Accept problems pushed by a browser companion over HTTP
    Listen,
    /// List the effective compiler presets
    Presets,
    /// Write compile_commands.json for every .cpp file under a directory
    CompileCommands {
        dir: PathBuf,
        #[arg(long)]
        preset: Option<String>,
    },
}

impl CliArgs {
    /// Load the settings from the specified file, the default location, or built-in defaults
    pub fn to_settings(&self) -> anyhow::Result<Settings> {
        match &self.config_path {
            Some(path) => Settings::load(path),
            None => match default_settings_path() {
                Some(path) if path.exists() => Settings::load(&path),
                _ => {
                    log::info!("No settings file found, using defaults");
                    Ok(Settings::default())
                }
            },
        }
    }
}

/// Location of the settings file when `--config` is not given
pub fn default_settings_path() -> Option<PathBuf> {
    use directories::ProjectDirs;

    ProjectDirs::from("", "", "mirai").map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
}

/// Directory for throwaway files (debug input, diff sides)
pub fn scratch_dir() -> PathBuf {
    use directories::ProjectDirs;

    ProjectDirs::from("", "", "mirai")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("mirai"))
}

/// Converts user supplied seconds into a `Duration`.
///
/// Negative and NaN values become zero, values past the representable range saturate.
pub fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub presets: Vec<CompilerPreset>,
    pub auto_detect_compiler: bool,
    pub default_timeout_seconds: f64,
    pub mix_stdout_stderr: bool,
    /// Cases whose input plus answer exceed this many bytes live in files
    pub external_case_threshold: u64,
    pub src_base_dir: String,
    pub build_base_dir: String,
    pub cases_dir: String,
    pub compile_timeout_seconds: f64,
    pub listener: ListenerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            presets: Vec::new(),
            auto_detect_compiler: false,
            default_timeout_seconds: 1.0,
            mix_stdout_stderr: false,
            external_case_threshold: 1024 * 1024,
            src_base_dir: String::new(),
            build_base_dir: "build".to_string(),
            cases_dir: ".mirai/cases".to_string(),
            compile_timeout_seconds: 30.0,
            listener: ListenerConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open settings file {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let settings: Settings = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;

        if let Some(label) = check_preset_label_uniqueness(&settings.presets) {
            log::warn!("Duplicate preset label `{label}`, only the first one will be used");
        }
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Configured presets followed by auto-detected compilers, if enabled
    pub fn effective_presets(&self) -> Vec<CompilerPreset> {
        let mut presets = self.presets.clone();
        if self.auto_detect_compiler {
            let detected = detect_compilers(&presets);
            presets.extend(detected);
        }
        presets
    }

    /// First preset carrying `label`
    pub fn find_preset(&self, label: &str) -> Option<CompilerPreset> {
        self.effective_presets()
            .into_iter()
            .find(|preset| preset.label == label)
    }

    pub fn timeout_for(&self, preset: &CompilerPreset) -> Duration {
        seconds(preset.timeout_seconds.unwrap_or(self.default_timeout_seconds))
    }

    pub fn mix_streams_for(&self, preset: &CompilerPreset) -> bool {
        self.mix_stdout_stderr || preset.mix_stdout_and_stderr
    }

    pub fn compile_timeout(&self) -> Duration {
        seconds(self.compile_timeout_seconds)
    }

    pub fn src_base(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.src_base_dir)
    }

    pub fn build_base(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.build_base_dir)
    }

    pub fn cases_base(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.cases_dir)
    }
}

fn default_memory_limit_mb() -> u64 {
    512
}

/// One toolchain configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompilerPreset {
    #[serde(alias = "name")]
    pub label: String,
    pub compiler_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_standard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_level: Option<String>,
    #[serde(default, alias = "args")]
    pub additional_args: Vec<String>,
    #[serde(default)]
    pub additional_include_paths: Vec<String>,
    #[serde(default)]
    pub relative_output_path: String,
    #[serde(default, alias = "timeoutSec")]
    pub timeout_seconds: Option<f64>,
    #[serde(default = "default_memory_limit_mb", alias = "memoryLimitMB")]
    pub memory_limit_mb: u64,
    #[serde(default, alias = "mixStdoutStderr")]
    pub mix_stdout_and_stderr: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub description: String,
}

/// Per-invocation flag overrides applied on a copy of a preset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetOverrides {
    pub language_standard: Option<String>,
    pub optimization_level: Option<String>,
    pub debug: Option<bool>,
}

impl PresetOverrides {
    pub fn debug_build() -> Self {
        Self {
            language_standard: None,
            optimization_level: Some("0".to_string()),
            debug: Some(true),
        }
    }
}

impl CompilerPreset {
    pub fn new(label: impl Into<String>, compiler_path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            compiler_path: compiler_path.into(),
            language_standard: None,
            optimization_level: None,
            additional_args: Vec::new(),
            additional_include_paths: Vec::new(),
            relative_output_path: String::new(),
            timeout_seconds: None,
            memory_limit_mb: default_memory_limit_mb(),
            mix_stdout_and_stderr: false,
            debug: false,
            description: String::new(),
        }
    }

    pub fn with_overrides(&self, overrides: &PresetOverrides) -> Self {
        let mut derived = self.clone();
        if let Some(std) = &overrides.language_standard {
            derived.language_standard = Some(std.clone());
        }
        if let Some(level) = &overrides.optimization_level {
            derived.optimization_level = Some(level.clone());
        }
        if let Some(debug) = overrides.debug {
            derived.debug = debug;
        }
        derived
    }

    /// Where the executable for `source` lands.
    ///
    /// Sources under `src_base` keep their relative directory inside `build_base`;
    /// anything else goes straight into `build_base`.
    pub fn executable_path(&self, source: &Path, src_base: &Path, build_base: &Path) -> PathBuf {
        let relative_dir = source
            .parent()
            .and_then(|dir| dir.strip_prefix(src_base).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());

        build_base
            .join(&self.relative_output_path)
            .join(relative_dir)
            .join(format!("{stem}{}", std::env::consts::EXE_SUFFIX))
    }

    /// Compiler arguments; the output path always comes last
    pub fn compile_args(&self, source: &Path, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(std) = &self.language_standard {
            args.push(format!("-std={std}"));
        }
        if let Some(level) = &self.optimization_level {
            args.push(format!("-O{level}"));
        }
        args.extend(self.additional_args.iter().cloned());
        if self.debug {
            args.push("-g".to_string());
        }
        args.extend(
            self.additional_include_paths
                .iter()
                .map(|path| format!("-I{path}")),
        );
        args.push(source.to_string_lossy().into_owned());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    pub fn compile_command_line(&self, source: &Path, output: &Path) -> String {
        let mut parts = vec![quote_if_needed(&self.compiler_path)];
        parts.extend(
            self.compile_args(source, output)
                .iter()
                .map(|arg| quote_if_needed(arg)),
        );
        parts.join(" ")
    }

    /// Serialized form fed into the compile cache key
    pub fn fingerprint(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn quote_if_needed(arg: &str) -> String {
    if arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// Returns the first label that appears more than once
pub fn check_preset_label_uniqueness(presets: &[CompilerPreset]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    presets
        .iter()
        .map(|preset| preset.label.as_str())
        .find(|label| !seen.insert(*label))
}

/// Presets for the well-known compilers found on `PATH`, skipping taken labels
pub fn detect_compilers(existing: &[CompilerPreset]) -> Vec<CompilerPreset> {
    AUTO_DETECT_CANDIDATES
        .iter()
        .filter_map(|name| {
            let label = format!("{name} (auto)");
            if existing.iter().any(|preset| preset.label == label) {
                return None;
            }
            let path = find_in_path(name)?;
            log::debug!("Detected compiler {name} at {}", path.display());

            let mut preset = CompilerPreset::new(label, path.to_string_lossy());
            preset.language_standard = Some("c++17".to_string());
            preset.optimization_level = Some("2".to_string());
            preset.description = format!("Detected at {}", path.display());
            Some(preset)
        })
        .collect()
}
