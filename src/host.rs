//! The editor side of the engine.
//!
//! Everything the core needs from its surroundings goes through `EditorHost`:
//! where the source file is, how to talk to the user, and how to hand off to a
//! terminal, diff view or debugger. The CLI front-end and the tests each
//! provide their own implementation.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::CompilerPreset;
use crate::model::TestCase;

/// One entry of a quick-pick list
#[derive(Debug, Clone, PartialEq)]
pub struct QuickPickItem {
    pub label: String,
    pub description: String,
}

/// Everything a debugger front-end needs to launch the program
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// File redirected to the program's stdin
    pub stdin: Option<PathBuf>,
}

#[allow(async_fn_in_trait)]
pub trait EditorHost {
    /// Source file the user is working on, if any
    fn current_file(&self) -> Option<PathBuf>;

    fn show_info(&self, message: &str);

    fn show_error(&self, message: &str);

    /// An error with a longer payload the user may choose to look at
    fn show_error_with_details(&self, message: &str, details: &str);

    async fn input_box(&self, prompt: &str, value: &str) -> Option<String>;

    /// Index of the chosen item, `None` when dismissed
    async fn quick_pick(&self, title: &str, items: &[QuickPickItem]) -> Option<usize>;

    fn open_diff(&self, left: &Path, right: &Path, title: &str);

    /// Reveals (or creates) the terminal `name` and types `text` into it
    fn send_to_terminal(&self, name: &str, text: &str);

    fn start_debug(&self, launch: &DebugLaunch) -> anyhow::Result<()>;

    /// Brings a case into view before it runs
    fn reveal_case(&self, _name: &str) {}

    /// `increment` is a percentage of the whole run
    fn report_progress(&self, _message: &str, _increment: f64) {}
}

/// Lets the user choose among `presets`; a single preset is taken without asking
pub async fn pick_preset<H: EditorHost>(host: &H, presets: &[CompilerPreset]) -> Option<CompilerPreset> {
    match presets {
        [] => None,
        [only] => Some(only.clone()),
        _ => {
            let items: Vec<QuickPickItem> = presets
                .iter()
                .map(|preset| QuickPickItem {
                    label: preset.label.clone(),
                    description: preset.description.clone(),
                })
                .collect();
            let index = host.quick_pick("Select a compiler preset", &items).await?;
            presets.get(index).cloned()
        }
    }
}

/// Asks for a new display label; returns whether the case changed
pub async fn rename_case<H: EditorHost>(host: &H, case: &mut TestCase) -> bool {
    let Some(label) = host.input_box("New case name", case.label()).await else {
        return false;
    };
    let label = label.trim();
    if label.is_empty() || label == case.label() {
        return false;
    }
    case.rename(label);
    true
}
