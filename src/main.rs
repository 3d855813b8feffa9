//! stackplan CLI entrypoint.
//!
//! This is the main entrypoint for the stackplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackplan::cli::{Cli, Commands, MessageLevel, OutputFormatter, StateCommands};
use stackplan::config::{
    find_config_file, ConfigParser, ConfigValidator, ProviderBackend, StackConfig, StateBackend,
    ENV_OVERRIDES,
};
use stackplan::deployer::Deployer;
use stackplan::error::{ConfigError, Result};
use stackplan::planner::ExecutionResult;
use stackplan::provider::{HttpProvider, ResourceProvider, SimulatedProvider};
use stackplan::state::{
    generate_holder_id, DeploymentOperation, LocalStateStore, S3StateStore, StateStore,
    DEFAULT_STATE_DIR,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.message(MessageLevel::Error, &e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let cancellation = CancellationToken::new();
    let token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current operation");
            token.cancel();
        }
    });

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, formatter),
        Commands::Graph => cmd_graph(config, formatter).await,
        Commands::Plan { detailed } => cmd_plan(config, detailed, formatter).await,
        Commands::Apply { yes } => cmd_apply(config, yes, cancellation, formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, cancellation, formatter).await,
        Commands::Drift => cmd_drift(config, formatter).await,
        Commands::Refresh => cmd_refresh(config, formatter).await,
        Commands::State { command } => cmd_state(config, command, formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stackplan project in: {}", path.display());

    let config_path = path.join("stackplan.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stackplan.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let ignored = [".env", DEFAULT_STATE_DIR];
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = ignored
            .iter()
            .copied()
            .filter(|entry| !existing.lines().any(|line| line.trim_end_matches('/') == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# stackplan")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!("{}\n", ignored.join("\n")))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Edit stackplan.yaml to describe your resources");
    eprintln!("  2. Run 'stackplan validate' to check the declaration");
    eprintln!("  3. Run 'stackplan plan' to see what would change");
    eprintln!("  4. Run 'stackplan apply' to provision it");

    Ok(())
}

/// Validate configuration and every resource declaration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;

    let deployment = stackplan::model::Deployment::from_config(&config)?;
    let references = stackplan::graph::ReferenceResolver::new().resolve(&deployment)?;
    stackplan::graph::DependencyGraph::build(&deployment, &references)?;

    println!(
        "{}",
        formatter.message(MessageLevel::Success, "Configuration is valid")
    );

    if show_warnings {
        for warning in &result.warnings {
            println!("{}", formatter.message(MessageLevel::Warning, warning));
        }
    }

    if !formatter.is_json() {
        println!("\nConfiguration summary:");
        println!("  Deployment: {}", config.deployment_id());
        println!("  State backend: {}", config.state.backend);
        println!("  Provider: {}", config.provider.backend);
        println!("  Resources: {}", deployment.len());
        println!("  References: {}", references.len());

        let overrides: Vec<&str> = ENV_OVERRIDES
            .iter()
            .copied()
            .filter(|name| std::env::var_os(name).is_some())
            .collect();
        if !overrides.is_empty() {
            println!("  Environment overrides: {}", overrides.join(", "));
        }
    }

    Ok(())
}

/// Show resources in dependency order.
async fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;

    let (deployment, graph) = Deployer::new(&config, &*store, &*provider).build_deployment()?;
    println!("{}", formatter.format_graph(&deployment, &graph));

    Ok(())
}

/// Show deployment plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;

    let plan = Deployer::new(&config, &*store, &*provider).plan().await?;
    println!("{}", formatter.format_plan(&plan, detailed));

    Ok(())
}

/// Plan and apply the declaration.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    cancellation: CancellationToken,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;
    let deployer = Deployer::new(&config, &*store, &*provider).with_cancellation(cancellation);

    let plan = deployer.plan().await?;
    if !plan.has_changes() {
        println!("{}", formatter.format_plan(&plan, false));
        return Ok(());
    }

    println!("{}", formatter.format_plan(&plan, false));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", |input| {
        input.eq_ignore_ascii_case("y")
    })? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let result = deployer
        .execute_plan(&plan, DeploymentOperation::Apply)
        .await?;
    report_execution(&result, formatter)
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    cancellation: CancellationToken,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;
    let deployer = Deployer::new(&config, &*store, &*provider).with_cancellation(cancellation);

    let plan = deployer.plan_destroy().await?;
    if plan.is_empty() {
        eprintln!("No recorded resources to destroy.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&plan, false));

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            |input| input == "destroy",
        )?
    {
        eprintln!("Destroy cancelled.");
        return Ok(());
    }

    let result = deployer
        .execute_plan(&plan, DeploymentOperation::Destroy)
        .await?;
    report_execution(&result, formatter)
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;

    let report = Deployer::new(&config, &*store, &*provider)
        .check_drift()
        .await?;
    println!("{}", formatter.format_drift(&report));

    Ok(())
}

/// Update recorded state from the provider.
async fn cmd_refresh(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;
    let provider = create_provider(&config, &base_dir).await?;

    let report = Deployer::new(&config, &*store, &*provider).refresh().await?;
    println!("{}", formatter.format_drift(&report));
    if report.has_drift() {
        println!(
            "{}",
            formatter.message(MessageLevel::Success, "State refreshed from the provider")
        );
    }

    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = create_state_store(&config, &base_dir).await;

    match command {
        StateCommands::Show => {
            let lock = store.get_lock_info().await?;
            if let Some(state) = store.load().await? {
                println!("{}", formatter.format_state(&state, lock.as_ref()));
            } else {
                eprintln!("No state found for {}.", config.deployment_id());
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            println!(
                "{}",
                formatter.message(MessageLevel::Success, &format!("State locked: {}", lock.lock_id))
            );
        }
        StateCommands::Unlock { lock_id, force } => match (lock_id, force) {
            (_, true) => match store.force_unlock().await? {
                Some(lock) => println!(
                    "{}",
                    formatter.message(MessageLevel::Warning, &format!("Removed lock {lock}"))
                ),
                None => eprintln!("State is not locked."),
            },
            (Some(id), false) => {
                store.release_lock(&id).await?;
                println!("{}", formatter.message(MessageLevel::Success, "State unlocked"));
            }
            (None, false) => {
                return Err(ConfigError::validation(
                    "A lock id is required unless --force is given",
                    "lock_id",
                )
                .into());
            }
        },
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Prints an execution result and fails the command unless every operation ran.
fn report_execution(result: &ExecutionResult, formatter: &OutputFormatter) -> Result<()> {
    println!("{}", formatter.format_execution(result));
    result.clone().into_result().map(|_| ())
}

/// Prompts on stderr and checks the trimmed answer.
fn confirm(prompt: &str, accept: impl Fn(&str) -> bool) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(accept(input.trim()))
}

/// Loads, overrides and validates the declaration.
///
/// Returns the config and the directory relative paths resolve against.
fn load_config(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |p| Ok(p.to_path_buf()))?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((config, base_dir))
}

/// Creates the state store selected by the declaration.
async fn create_state_store(config: &StackConfig, base_dir: &Path) -> Box<dyn StateStore> {
    let deployment_id = config.deployment_id();

    match config.state.backend {
        StateBackend::Local => {
            let dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(DEFAULT_STATE_DIR), |p| base_dir.join(p));
            Box::new(LocalStateStore::new(dir, &deployment_id))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().unwrap_or_default();
            Box::new(
                S3StateStore::new(
                    bucket,
                    config.state.prefix.as_deref(),
                    config.state.region.as_deref(),
                    &deployment_id,
                )
                .await,
            )
        }
    }
}

/// Creates the provider selected by the declaration.
async fn create_provider(config: &StackConfig, base_dir: &Path) -> Result<Box<dyn ResourceProvider>> {
    match config.provider.backend {
        ProviderBackend::Simulated => match &config.provider.path {
            Some(path) => Ok(Box::new(SimulatedProvider::open(base_dir.join(path)).await?)),
            None => {
                warn!("Simulated provider has no path; resources will not outlive this run");
                Ok(Box::new(SimulatedProvider::new()))
            }
        },
        ProviderBackend::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                ConfigError::validation(
                    "An endpoint is required when using the http provider",
                    "provider.endpoint",
                )
            })?;
            Ok(Box::new(HttpProvider::from_env(
                endpoint,
                config.provider.timeout_secs,
            )?))
        }
    }
}
