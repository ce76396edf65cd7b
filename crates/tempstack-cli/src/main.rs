//! Tempstack - disposable cloud environments for end-to-end tests
//!
//! ## Commands
//!
//! - `run`: provision, validate, build, test locally, deploy, test remotely,
//!   then destroy the app whatever happened
//! - `destroy`: tear down an app left behind by an interrupted run
//! - `resolve`: print the endpoint of a deployed app
//! - `set-app-name`: point an `app.arc` manifest at another app name

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use tempstack_core::telemetry::{init_tracing, level_for_verbosity};
use tempstack_core::{
    ArcDeployer, AwsCliInventory, Deployer, Environment, Lifecycle, RunConfig, RunIdentity,
    TokioProcessRunner,
};

#[derive(Parser, Debug)]
#[command(name = "tempstack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disposable cloud environments for end-to-end deployment tests", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full lifecycle of one disposable app
    Run(RunArgs),

    /// Destroy a deployed app by name
    Destroy {
        /// App name as written in the manifest
        #[arg(long)]
        app: String,

        /// Target the production environment
        #[arg(long, env = "TEMPSTACK_PRODUCTION")]
        production: bool,

        /// Project directory to run the deployer from
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long, env = "TEMPSTACK_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the endpoint of a deployed app
    Resolve {
        /// App name as written in the manifest
        #[arg(long)]
        app: String,

        /// Target the production environment
        #[arg(long, env = "TEMPSTACK_PRODUCTION")]
        production: bool,

        /// JSON configuration file
        #[arg(short, long, env = "TEMPSTACK_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Overwrite the app name of an app.arc manifest
    SetAppName {
        /// Path to the manifest
        manifest: PathBuf,

        /// New app name
        name: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long, env = "TEMPSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Scaffolder template
    #[arg(long, env = "TEMPSTACK_TEMPLATE")]
    template: Option<String>,

    /// Parent directory of the generated project
    #[arg(long, env = "TEMPSTACK_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Test fixture directory copied into the project
    #[arg(long, env = "TEMPSTACK_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Test harness config file copied into the project
    #[arg(long, env = "TEMPSTACK_FIXTURE_CONFIG")]
    fixture_config: Option<PathBuf>,

    /// Fixed run suffix instead of a random one
    #[arg(long, env = "TEMPSTACK_RUN_SUFFIX")]
    run_suffix: Option<String>,

    /// Deploy to the production environment
    #[arg(long, env = "TEMPSTACK_PRODUCTION")]
    production: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Fail the run when teardown fails
    #[arg(long, env = "TEMPSTACK_FAIL_ON_CLEANUP_ERROR")]
    fail_on_cleanup_error: bool,

    /// Write a JSON run report to this path
    #[arg(long, env = "TEMPSTACK_REPORT")]
    report: Option<PathBuf>,
}

impl RunArgs {
    /// Resolve the effective configuration: defaults, then the file, then flags.
    fn resolve_config(&self) -> Result<RunConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(template) = &self.template {
            config.template = template.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.fixtures {
            config.fixtures.dir = dir.clone();
        }
        if let Some(file) = &self.fixture_config {
            config.fixtures.config_file = file.clone();
        }
        if let Some(suffix) = &self.run_suffix {
            config.run_suffix = Some(suffix.clone());
        }
        if self.production {
            config.environment = Environment::Production;
        }
        if self.headed {
            config.headless = false;
        }
        if self.fail_on_cleanup_error {
            config.fail_on_cleanup_error = true;
        }
        Ok(config)
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

fn environment(production: bool) -> Environment {
    if production {
        Environment::Production
    } else {
        Environment::Staging
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Destroy {
            app,
            production,
            project_dir,
            config,
        } => cmd_destroy(&app, production, project_dir.as_deref(), config.as_deref()).await,
        Commands::Resolve {
            app,
            production,
            config,
        } => cmd_resolve(&app, production, config.as_deref()).await,
        Commands::SetAppName { manifest, name } => cmd_set_app_name(&manifest, &name),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let config = args.resolve_config()?;
    let identity = RunIdentity::generate(&config);
    let lifecycle = Lifecycle::from_config(&config, Arc::new(TokioProcessRunner::new()))
        .context("Failed to set up lifecycle")?;

    let outcome = lifecycle.run(&identity).await;

    if let Some(path) = &args.report {
        match outcome.write_report(path) {
            Ok(()) => info!(path = %path.display(), "Run report written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write run report"),
        }
    }

    if let Some(failure) = &outcome.failure {
        eprintln!("{failure}");
    }
    if let tempstack_core::CleanupStatus::Failed(reason) = &outcome.cleanup {
        eprintln!(
            "Cleanup of {} failed: {reason}\nRetry with: tempstack destroy --app {}",
            identity.app_name, identity.app_name
        );
    }
    if let Some(endpoint) = &outcome.endpoint {
        println!("{endpoint}");
    }

    Ok(ExitCode::from(outcome.exit_code.clamp(0, 255) as u8))
}

async fn cmd_destroy(
    app: &str,
    production: bool,
    project_dir: Option<&Path>,
    config: Option<&Path>,
) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    config.environment = environment(production);

    let runner = Arc::new(TokioProcessRunner::new());
    let inventory = Arc::new(AwsCliInventory::new(runner.clone(), &config));
    let deployer = ArcDeployer::new(runner, inventory, &config);

    let dir = project_dir.map(Path::to_path_buf).unwrap_or_default();
    deployer
        .destroy(app, &dir)
        .await
        .with_context(|| format!("Failed to destroy {app}"))?;
    println!("Destroyed {app}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_resolve(app: &str, production: bool, config: Option<&Path>) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    config.environment = environment(production);
    let identity = RunIdentity::new(app, config.environment, &config.work_dir);

    let runner = Arc::new(TokioProcessRunner::new());
    let inventory = Arc::new(AwsCliInventory::new(runner.clone(), &config));
    let deployer = ArcDeployer::new(runner, inventory, &config);

    let record = deployer
        .resolve_endpoint(&identity.stack_id)
        .await
        .with_context(|| format!("Failed to resolve {}", identity.stack_id))?;
    println!("{}", record.endpoint);
    Ok(ExitCode::SUCCESS)
}

fn cmd_set_app_name(manifest: &Path, name: &str) -> Result<ExitCode> {
    arc_manifest::set_app_name(manifest, name)
        .with_context(|| format!("Failed to update {}", manifest.display()))?;
    println!("{} now deploys as {name}", manifest.display());
    Ok(ExitCode::SUCCESS)
}
