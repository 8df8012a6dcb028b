//! Kiln CLI - design-to-code generation with validation and repair
//!
//! Usage:
//!   kiln init                   Write default configuration
//!   kiln run --design <file>    Generate, validate and repair artifacts
//!   kiln validate               Type-check (and lint) the output tree
//!   kiln registry               List generated artifacts by tier
//!   kiln summary                Show the last run summary

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::{KilnConfig, Tier};
use kiln_orchestrator::{RunSummary, Workflow};
use kiln_registry::{check_tier_ordering, ArtifactRegistry};
use kiln_validation::{CommandToolRunner, Grouped, LintChecker, TypeChecker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Design-to-code generation with validation and repair")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default `.kiln/config.toml`
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run the full workflow against a design document
    Run {
        /// Design spec JSON file
        #[arg(short, long)]
        design: PathBuf,

        /// Skip story generation
        #[arg(long)]
        no_stories: bool,
    },

    /// Type-check and lint the current output tree
    Validate,

    /// List registered artifacts
    Registry {
        /// Print the registry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the summary of the last run
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the flag
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.project, force),
        Commands::Run { design, no_stories } => cmd_run(&cli.project, design, no_stories).await,
        Commands::Validate => cmd_validate(&cli.project).await,
        Commands::Registry { json } => cmd_registry(&cli.project, json),
        Commands::Summary => cmd_summary(&cli.project).await,
    }
}

fn load_config(project: &Path) -> Result<KilnConfig> {
    KilnConfig::load_or_default(project).context("Failed to load .kiln/config.toml")
}

fn cmd_init(project: &Path, force: bool) -> Result<()> {
    let existing = KilnConfig::kiln_dir(project).join("config.toml");
    if existing.exists() && !force {
        println!("Already initialized: {}", existing.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let path = KilnConfig::write_default(project).context("Failed to write configuration")?;
    let config = KilnConfig::default();
    for tier in Tier::ALL {
        std::fs::create_dir_all(config.output_root(project).join(tier.dir_name()))
            .with_context(|| format!("Failed to create {} directory", tier))?;
    }

    println!("Initialized Kiln in {:?}", project);
    println!("Created:");
    println!("  {}", path.display());
    println!("  {}/{{icons,elements,components,modules}}/", config.output_dir.display());
    Ok(())
}

async fn cmd_run(project: &Path, design: PathBuf, no_stories: bool) -> Result<()> {
    let mut config = load_config(project)?;
    if no_stories {
        config.workflow.generate_stories = false;
    }

    info!(design = %design.display(), "starting run");
    let workflow =
        Workflow::from_config(project, config, design).context("Failed to set up workflow")?;
    let state = workflow.run().await;

    match &state.summary {
        Some(summary) => print!("{}", summary.render()),
        None => println!("Run {} ended without a summary", state.run_id),
    }

    if !state.success {
        bail!("run {} did not converge", state.run_id);
    }
    Ok(())
}

async fn cmd_validate(project: &Path) -> Result<()> {
    let config = load_config(project)?;

    let runner = CommandToolRunner::from_command_line("typecheck", &config.tools.typecheck, project)
        .context("Invalid typecheck command")?;
    let report = TypeChecker::new(Arc::new(runner))
        .check_tree()
        .await
        .context("Type checker failed")?;

    println!("Type check");
    println!("==========");
    if report.passed() {
        println!("  clean");
    } else {
        print_groups(&report.lines);
    }

    let mut lint_errors = 0;
    if let Some(command) = &config.tools.lint {
        let runner = CommandToolRunner::from_command_line("lint", command, project)
            .context("Invalid lint command")?;
        let groups = LintChecker::new(Arc::new(runner))
            .lint_tree()
            .await
            .context("Linter failed")?;

        println!("\nLint");
        println!("====");
        if groups.is_empty() {
            println!("  clean");
        }
        for (name, issues) in &groups.artifacts {
            println!("{}:", name);
            for issue in issues {
                println!("  {}", issue.render());
            }
            lint_errors += issues.iter().filter(|d| d.is_error()).count();
        }
    }

    if !report.passed() || lint_errors > 0 {
        bail!(
            "validation failed: {} artifact(s) with type errors, {} lint error(s)",
            report.lines.len(),
            lint_errors
        );
    }
    Ok(())
}

fn print_groups(groups: &Grouped<String>) {
    for (name, lines) in &groups.artifacts {
        println!("{}:", name);
        for line in lines {
            println!("  {}", line);
        }
    }
    if !groups.unattributed.is_empty() {
        println!("(unattributed):");
        for line in &groups.unattributed {
            println!("  {}", line);
        }
    }
}

fn cmd_registry(project: &Path, json: bool) -> Result<()> {
    let config = load_config(project)?;
    let registry = ArtifactRegistry::build(&config.output_root(project));

    if json {
        let records: Vec<_> = registry.get_all();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("Registry: {}", registry.root().display());
    println!("==========");
    for (tier, count) in registry.tier_counts() {
        println!("{:<12} {}", tier.dir_name(), count);
        for record in registry.get_by_tier(tier) {
            let import = registry.import_path_of(&record.name).unwrap_or("-");
            println!("  {:<24} {}", record.name, import);
        }
    }
    println!("Total: {}", registry.len());

    let violations = check_tier_ordering(&registry);
    if !violations.is_empty() {
        println!("\nTier violations:");
        for violation in violations {
            println!("  {}", violation);
        }
    }
    Ok(())
}

async fn cmd_summary(project: &Path) -> Result<()> {
    let summary = RunSummary::read(&KilnConfig::kiln_dir(project))
        .await
        .context("No previous run found; use 'kiln run' first")?;
    print!("{}", summary.render());
    Ok(())
}
