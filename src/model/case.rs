use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Outcome of the last run of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Verdict {
    #[default]
    None,
    Pending,
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    Cancelled,
}

impl Verdict {
    /// Short judge code, empty when there is nothing to show
    pub fn code(&self) -> &'static str {
        match self {
            Self::None | Self::Cancelled => "",
            Self::Pending => "..",
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::RuntimeError => "RE",
            Self::TimeLimitExceeded => "TLE",
            Self::MemoryLimitExceeded => "MLE",
        }
    }

    /// Whether the verdict says something about the program
    pub fn is_result(&self) -> bool {
        !matches!(self, Self::None | Self::Pending | Self::Cancelled)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "Waiting",
            Self::Pending => "Running",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::RuntimeError => "Runtime Error",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::Cancelled => "Cancelled",
        };
        f.pad(text)
    }
}

/// Storage of one text field of a case: kept in memory or backed by a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseField {
    Inline(String),
    File(PathBuf),
}

impl CaseField {
    /// Current content. Invalid UTF-8 is replaced; a file that cannot be read yields an empty string.
    pub fn read(&self) -> String {
        match self {
            Self::Inline(text) => text.clone(),
            Self::File(path) => match fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    log::warn!("Failed to read case file {}: {e}", path.display());
                    String::new()
                }
            },
        }
    }

    /// Replaces the content. Writes to a removed backing file are skipped.
    pub fn write(&mut self, text: &str) {
        match self {
            Self::Inline(stored) => *stored = text.to_string(),
            Self::File(path) if path.exists() => {
                if let Err(e) = fs::write(&*path, text) {
                    log::warn!("Failed to write case file {}: {e}", path.display());
                }
            }
            Self::File(path) => {
                log::debug!("Case file {} is gone, write skipped", path.display());
            }
        }
    }

    /// Content size in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::Inline(text) => text.len() as u64,
            Self::File(path) => fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// The persisted form: the text itself, or the backing path
    pub fn stored_value(&self) -> String {
        match self {
            Self::Inline(text) => text.clone(),
            Self::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// One input / expected output pair
#[derive(Debug, Clone)]
pub struct TestCase {
    name: String,
    label: String,
    pub enabled: bool,
    input: CaseField,
    expected_output: CaseField,
    /// Captured output of the last run
    pub output: String,
    pub verdict: Verdict,
    pub elapsed_ms: Option<f64>,
    pub memory_kb: u64,
}

impl TestCase {
    pub fn new(name: impl Into<String>, input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::from_fields(
            name.into(),
            CaseField::Inline(input.into()),
            CaseField::Inline(expected.into()),
        )
    }

    /// A case whose data stays in `input_path` / `expected_path`
    pub fn external(name: impl Into<String>, input_path: PathBuf, expected_path: PathBuf) -> Self {
        Self::from_fields(
            name.into(),
            CaseField::File(input_path),
            CaseField::File(expected_path),
        )
    }

    fn from_fields(name: String, input: CaseField, expected_output: CaseField) -> Self {
        Self {
            label: name.clone(),
            name,
            enabled: true,
            input,
            expected_output,
            output: String::new(),
            verdict: Verdict::None,
            elapsed_ms: None,
            memory_kb: 0,
        }
    }

    /// Stable identifier, also used for on-disk file names
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Changes the display label only; `name` and any backing files stay put
    pub fn rename(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.label = label;
    }

    pub fn is_external(&self) -> bool {
        self.input.is_external()
    }

    pub fn input(&self) -> String {
        self.input.read()
    }

    pub fn expected_output(&self) -> String {
        self.expected_output.read()
    }

    pub fn set_input(&mut self, text: &str) {
        self.input.write(text);
    }

    pub fn set_expected_output(&mut self, text: &str) {
        self.expected_output.write(text);
    }

    pub fn input_field(&self) -> &CaseField {
        &self.input
    }

    pub fn expected_field(&self) -> &CaseField {
        &self.expected_output
    }

    /// Input plus expected output size in bytes
    pub fn combined_len(&self) -> u64 {
        self.input.len() + self.expected_output.len()
    }

    /// Forgets everything about the last run
    pub fn clear_result(&mut self) {
        self.output.clear();
        self.verdict = Verdict::None;
        self.elapsed_ms = None;
        self.memory_kb = 0;
    }

    /// Moves inline data into the two files and switches to file-backed storage
    pub(crate) fn move_to_files(&mut self, input_path: &Path, expected_path: &Path) -> std::io::Result<()> {
        for path in [input_path, expected_path] {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(input_path, self.input.read())?;
        fs::write(expected_path, self.expected_output.read())?;
        self.input = CaseField::File(input_path.to_path_buf());
        self.expected_output = CaseField::File(expected_path.to_path_buf());
        Ok(())
    }
}

/// Ordered cases of one problem plus the "current case" selection
#[derive(Debug, Clone, Default)]
pub struct CaseList {
    data: Vec<TestCase>,
    /// Name of the selected case, always a member of `data`
    current: Option<String>,
}

impl CaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cases(cases: Vec<TestCase>) -> Self {
        let mut list = Self::new();
        for case in cases {
            list.push(case);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.data
    }

    pub fn cases_mut(&mut self) -> &mut [TestCase] {
        &mut self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TestCase> {
        self.data.iter_mut()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.data.iter().position(|case| case.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.data.iter().find(|case| case.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TestCase> {
        self.data.iter_mut().find(|case| case.name == name)
    }

    /// Appends a case, suffixing its name if it is already taken
    pub fn push(&mut self, mut case: TestCase) -> &mut TestCase {
        if self.get(&case.name).is_some() {
            let base = case.name.clone();
            let mut n = 2;
            while self.get(&format!("{base} ({n})")).is_some() {
                n += 1;
            }
            case.name = format!("{base} ({n})");
            if case.label == base {
                case.label = case.name.clone();
            }
        }
        self.data.push(case);
        let last = self.data.len() - 1;
        &mut self.data[last]
    }

    /// Appends an empty case named "Case N"
    pub fn add_case(&mut self) -> &mut TestCase {
        let name = self.next_case_name();
        self.push(TestCase::new(name, "", ""))
    }

    pub fn next_case_name(&self) -> String {
        (self.data.len() + 1..)
            .map(|n| format!("Case {n}"))
            .find(|name| self.get(name).is_none())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, name: &str) -> Option<TestCase> {
        let index = self.position(name)?;
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        Some(self.data.remove(index))
    }

    pub fn current(&self) -> Option<&TestCase> {
        self.get(self.current.as_deref()?)
    }

    pub fn current_mut(&mut self) -> Option<&mut TestCase> {
        let name = self.current.clone()?;
        self.get_mut(&name)
    }

    /// Selects a case; names outside the list are refused
    pub fn set_current(&mut self, name: &str) -> bool {
        if self.get(name).is_some() {
            self.current = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    pub fn enabled_count(&self) -> usize {
        self.data.iter().filter(|case| case.enabled).count()
    }
}
