//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use expkit_core::config::{ConfigOverrides, ProjectConfig, config_path, load_config, write_config};
use expkit_core::{EntryTable, ExtractedExperiment, Extractor, LaunchRequest, ParamBundle};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            experiment_name,
            run_name,
            max_repeats,
            project_name,
            extra_args,
        } => {
            let overrides = ConfigOverrides {
                project_name,
                ..Default::default()
            };
            let request = LaunchRequest {
                project_name: String::new(),
                experiment_name,
                run_name,
                max_repeats,
                args: extra_args,
            };
            handle_run(request, &overrides, workspace)
        }
        Commands::List => handle_list(workspace),
        Commands::Inspect { path } => handle_inspect(&path),
        Commands::Render { experiment } => handle_render(experiment.as_deref(), workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn handle_run(
    mut request: LaunchRequest,
    overrides: &ConfigOverrides,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), Some(overrides))
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    request.project_name = config
        .resolve_project_name(workspace)
        .ok_or_else(|| anyhow::anyhow!("No project name configured; pass --project_name"))?;

    let entries = EntryTable::new().with_fallback(print_bundle);
    expkit_core::dispatch(
        &config.declarations_root(workspace),
        &config.file_extension,
        Arc::new(entries),
        &request,
    )?;
    Ok(())
}

/// Host handler used for every declared function: prints the resolved
/// bundle as JSON.
fn print_bundle(bundle: &ParamBundle) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(bundle)?);
    Ok(())
}

fn extract_project(workspace: &Path) -> anyhow::Result<(ProjectConfig, Vec<ExtractedExperiment>)> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let root = config.declarations_root(workspace);
    if !root.is_dir() {
        anyhow::bail!("Declarations directory not found: {}", root.display());
    }
    let mut extractor = Extractor::new()?;
    let experiments = extractor.extract_dir(&root, &config.file_extension)?;
    if !extractor.skipped().is_empty() {
        eprintln!(
            "Skipped {} declaration(s) that could not be read statically (run with -v for details)",
            extractor.skipped().len()
        );
    }
    Ok((config, experiments))
}

fn handle_list(workspace: &Path) -> anyhow::Result<()> {
    let (config, experiments) = extract_project(workspace)?;
    if experiments.is_empty() {
        println!(
            "No experiments declared in: {}",
            config.declarations_root(workspace).display()
        );
    } else {
        print!("{}", format_listing(&experiments, workspace));
    }
    Ok(())
}

fn format_listing(experiments: &[ExtractedExperiment], workspace: &Path) -> String {
    let mut out = format!("Experiments ({}):\n", experiments.len());
    for experiment in experiments {
        let decl = &experiment.experiment;
        let location = decl
            .file
            .as_deref()
            .map(|file| file.strip_prefix(workspace).unwrap_or(file).display().to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "  {} ({} at {}:{}, {} params)\n",
            decl.name,
            decl.function,
            location,
            decl.line,
            experiment.parameters().len()
        ));
    }
    out
}

fn handle_inspect(path: &Path) -> anyhow::Result<()> {
    let experiments = Extractor::new()?.extract_file(path)?;
    println!("{}", serde_json::to_string_pretty(&experiments)?);
    Ok(())
}

fn handle_render(only: Option<&str>, workspace: &Path) -> anyhow::Result<()> {
    let (_, experiments) = extract_project(workspace)?;
    let selected: Vec<&ExtractedExperiment> = experiments
        .iter()
        .filter(|e| only.is_none_or(|name| e.name() == name))
        .collect();
    if let Some(name) = only {
        if selected.is_empty() {
            anyhow::bail!("Experiment '{}' not found", name);
        }
    }
    for experiment in selected {
        println!("{}", format_render(experiment));
    }
    Ok(())
}

fn format_render(experiment: &ExtractedExperiment) -> String {
    let mut out = format!("# {}\n", experiment.name());
    out.push_str(&format!("run: {}\n", experiment.run_params()));
    out.push_str("inputs:\n");
    for input in experiment.action_inputs() {
        for line in input.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_path(workspace);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }

            let default_config = ProjectConfig {
                project_name: ProjectConfig::default().resolve_project_name(workspace),
                ..Default::default()
            };
            let path = write_config(workspace, &default_config)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
