use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use anyhow::{Context, anyhow};
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

use mirai::config::{CliArgs, Command, Settings};
use mirai::exec::{CompileCache, write_compile_commands};
use mirai::host::{DebugLaunch, EditorHost, QuickPickItem};
use mirai::judge::{Orchestrator, RunReport};
use mirai::model::{ProblemTree, import_cases};
use mirai::persistence;
use mirai::web_server::build_server;

const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Terminal stand-in for an editor
struct CliHost {
    file: Option<PathBuf>,
}

impl CliHost {
    async fn read_line(prompt: &str) -> Option<String> {
        print!("{prompt}");
        std::io::stdout().flush().ok()?;
        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .ok()?;
        (read > 0).then(|| line.trim_end().to_string())
    }
}

impl EditorHost for CliHost {
    fn current_file(&self) -> Option<PathBuf> {
        self.file.clone()
    }

    fn show_info(&self, message: &str) {
        println!("{message}");
    }

    fn show_error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn show_error_with_details(&self, message: &str, details: &str) {
        eprintln!("error: {message}");
        if !details.is_empty() {
            eprintln!("{details}");
        }
    }

    async fn input_box(&self, prompt: &str, value: &str) -> Option<String> {
        let answer = Self::read_line(&format!("{prompt} [{value}]: ")).await?;
        Some(if answer.is_empty() { value.to_string() } else { answer })
    }

    async fn quick_pick(&self, title: &str, items: &[QuickPickItem]) -> Option<usize> {
        println!("{title}:");
        for (i, item) in items.iter().enumerate() {
            println!("  {}) {}  {}", i + 1, item.label, item.description);
        }
        let answer = Self::read_line("> ").await?;
        let index = answer.trim().parse::<usize>().ok()?;
        (1..=items.len()).contains(&index).then(|| index - 1)
    }

    fn open_diff(&self, left: &Path, right: &Path, title: &str) {
        println!("{title}\n  diff -u {} {}", left.display(), right.display());
    }

    fn send_to_terminal(&self, _name: &str, text: &str) {
        println!("{text}");
    }

    fn start_debug(&self, launch: &DebugLaunch) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(launch)?);
        Ok(())
    }

    fn reveal_case(&self, name: &str) {
        log::debug!("Running {name}");
    }
}

fn print_report(report: &RunReport) {
    for result in &report.results {
        let elapsed = result
            .elapsed_ms
            .map_or_else(|| "-".to_string(), |ms| format!("{ms:.0} ms"));
        println!(
            "{:<24} {:<22} {:>10} {:>9} KiB",
            result.label, result.verdict, elapsed, result.memory_kb
        );
    }
}

fn find_problem(tree: &ProblemTree, path: &str) -> anyhow::Result<mirai::model::NodeId> {
    tree.find_by_path(path)
        .filter(|&id| tree.problem(id).is_some())
        .ok_or_else(|| anyhow!("No problem at `{path}`"))
}

fn preset_or_first(settings: &Settings, label: Option<&str>) -> anyhow::Result<mirai::config::CompilerPreset> {
    match label {
        Some(label) => settings
            .find_preset(label)
            .ok_or_else(|| anyhow!("No preset labelled `{label}`")),
        None => settings
            .effective_presets()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No compiler presets configured")),
    }
}

/// Cancels the active run on ctrl-c
fn stop_on_ctrl_c(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-c received, stopping");
            orchestrator.stop_all();
        }
    });
}

fn save(tree: &Mutex<ProblemTree>, settings: &Settings, workspace: &Path) {
    if let Err(e) = persistence::save_workspace(&mut tree.lock(), settings, workspace) {
        log::error!("Failed to save workspace state: {e:#}");
    }
}

async fn listen(tree: Arc<Mutex<ProblemTree>>, settings: &Settings, workspace: &Path) -> anyhow::Result<()> {
    let server = build_server(&settings.listener, web::Data::from(tree.clone()))
        .context("Failed to start the problem listener")?;
    let server_handle = server.handle();
    let mut server_task = actix_web::rt::spawn(server);
    let mut autosave = tokio::time::interval(AUTOSAVE_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-c received, shutting down...");
                break;
            }
            res_server = &mut server_task => {
                log::error!("Listener terminated unexpectedly: {res_server:?}");
                break;
            }
            _ = autosave.tick() => save(&tree, settings, workspace),
        }
    }

    server_handle.stop(true).await;
    save(&tree, settings, workspace);
    log::info!("Shutdown complete");
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let settings = cli.to_settings()?;
    let workspace = cli.workspace.clone();
    let state_path = persistence::state_path(&workspace);
    let tree = Arc::new(Mutex::new(persistence::load(&state_path)?));
    let cache = Arc::new(CompileCache::new());

    match cli.command {
        Command::Test {
            source,
            problem,
            preset,
            case,
            force,
        } => {
            let orchestrator = Arc::new(Orchestrator::new(settings.clone(), &workspace, cache));
            let preset = preset_or_first(&settings, preset.as_deref())?;
            orchestrator.select_preset(&preset.label)?;
            let problem = find_problem(&tree.lock(), &problem)?;
            stop_on_ctrl_c(orchestrator.clone());

            let host = CliHost { file: Some(source) };
            let report = match case.as_deref() {
                Some(case) => orchestrator.run_one(&host, &tree, problem, case, force).await,
                None => orchestrator.run_all(&host, &tree, problem, force).await,
            };
            save(&tree, &settings, &workspace);
            let report = report?;
            print_report(&report);
            if !report.all_accepted() {
                std::process::exit(1);
            }
        }
        Command::Compile {
            source,
            preset,
            force,
        } => {
            let orchestrator = Arc::new(Orchestrator::new(settings.clone(), &workspace, cache));
            let preset = preset_or_first(&settings, preset.as_deref())?;
            orchestrator.select_preset(&preset.label)?;
            stop_on_ctrl_c(orchestrator.clone());

            let host = CliHost { file: Some(source) };
            let outcome = orchestrator.compile_current(&host, force).await?;
            if !outcome.output.is_empty() {
                println!("{}", outcome.output);
            }
        }
        Command::Import { problem, dirs } => {
            let cases = import_cases(&dirs, settings.external_case_threshold)?;
            let count = cases.len();
            {
                let mut tree = tree.lock();
                let id = tree.ensure_problem(&problem)?;
                if let Some(problem) = tree.problem_mut(id) {
                    for case in cases {
                        problem.cases.push(case);
                    }
                }
            }
            persistence::save_workspace(&mut tree.lock(), &settings, &workspace)?;
            println!("Imported {count} cases into `{problem}`");
        }
        Command::Listen => listen(tree, &settings, &workspace).await?,
        Command::Presets => {
            for preset in settings.effective_presets() {
                println!("{:<24} {}  {}", preset.label, preset.compiler_path, preset.description);
            }
        }
        Command::CompileCommands { dir, preset } => {
            let preset = preset_or_first(&settings, preset.as_deref())?;
            let path = write_compile_commands(
                &preset,
                &dir,
                &settings.src_base(&workspace),
                &settings.build_base(&workspace),
            )?;
            println!("{}", path.display());
        }
    }

    Ok(())
}
