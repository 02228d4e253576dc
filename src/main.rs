//! Faceplate CLI - check and evaluate faceplate files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use faceplate::ast::Faceplate;
use faceplate::binding::BindingMap;
use faceplate::script::{compile_body, compile_transform, ModuleRegistry};
use faceplate::{BindingMode, FaceplateError, FaceplateRuntime, FixSuggestion, MemoryStore, RuntimeConfig};

#[derive(Parser)]
#[command(name = "faceplate")]
#[command(about = "Faceplate - live data-binding runtime for operator panels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a faceplate and compile its scripts (no store needed)
    Check {
        /// Path to a .yaml or .json faceplate
        file: PathBuf,
    },

    /// Evaluate all bindings against a store snapshot and print the values
    Eval {
        /// Path to a .yaml or .json faceplate
        file: PathBuf,

        /// YAML store snapshot (fields + entities)
        #[arg(short, long)]
        state: PathBuf,

        /// Entity the faceplate is bound to
        #[arg(short, long)]
        entity: String,

        /// Runtime config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { file } => check(&file).await,
        Commands::Eval {
            file,
            state,
            entity,
            config,
        } => eval(&file, &state, &entity, config.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn check(file: &Path) -> Result<(), FaceplateError> {
    let faceplate = Faceplate::load(file)?;
    faceplate.validate()?;

    let config = RuntimeConfig::default();
    let (registry, failures) = ModuleRegistry::compile(&faceplate.script_modules, config.script).await;
    let mut problems: Vec<String> = failures
        .iter()
        .map(|f| format!("module '{}': {}", f.module, f.error))
        .collect();

    let map = BindingMap::build(&faceplate.all_bindings());
    println!(
        "{} Faceplate '{}' ({} components, {} modules)",
        "→".cyan(),
        faceplate.id.cyan().bold(),
        faceplate.components.len(),
        registry.len()
    );

    for key in map.keys() {
        let Some(meta) = map.meta(key) else {
            continue;
        };
        let mode = match meta.mode {
            BindingMode::Literal => meta.mode.as_str().dimmed(),
            BindingMode::Field => meta.mode.as_str().green(),
            BindingMode::Script => meta.mode.as_str().magenta(),
        };
        let targets: Vec<String> = map.targets(key).iter().map(|t| t.slot()).collect();
        println!("  {:<8} {}  → {}", mode, key.as_str().bold(), targets.join(", "));
        if !meta.dependencies.is_empty() {
            println!("           deps: {}", meta.dependencies.join(", "));
        }

        if meta.mode == BindingMode::Script {
            if let Err(e) = compile_body(&meta.expression) {
                problems.push(format!("script {}: {}", key, e));
            }
        }
        for target in map.targets(key) {
            if let Some(transform) = target.transform.as_deref().filter(|t| !t.trim().is_empty()) {
                if let Err(e) = compile_transform(transform) {
                    problems.push(format!("transform {}: {}", target.slot(), e));
                }
            }
        }
    }

    if problems.is_empty() {
        println!("{} '{}' is valid", "✓".green(), file.display());
        return Ok(());
    }
    for problem in &problems {
        eprintln!("  {} {}", "✗".red(), problem);
    }
    Err(FaceplateError::ScriptCompile {
        label: file.display().to_string(),
        message: format!("{} script(s) failed to compile", problems.len()),
    })
}

async fn eval(
    file: &Path,
    state: &Path,
    entity: &str,
    config: Option<&Path>,
) -> Result<(), FaceplateError> {
    let faceplate = Faceplate::load(file)?;
    let config = match config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    }
    .with_env();
    let store = MemoryStore::load(state)?;

    let runtime = FaceplateRuntime::new(Arc::new(store), config);
    runtime.initialize(faceplate, Some(entity)).await?;

    let values = runtime.binding_value_map();
    println!("{}", serde_json::to_string_pretty(&values)?);

    for error in runtime.compilation_errors() {
        eprintln!("  {} {}: {}", "compile".red(), error.module, error.message);
    }
    for error in runtime.runtime_errors() {
        eprintln!("  {} {}: {}", error.kind.label().yellow(), error.context, error.message);
    }

    runtime.teardown().await;
    Ok(())
}
