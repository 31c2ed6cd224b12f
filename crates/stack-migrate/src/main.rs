//! stack-migrate CLI
//!
//! Exports a stack into a content directory and imports it into another.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stack_migrate::client::http::HttpStackClient;
use stack_migrate::orchestrator::missing_prerequisites;
use stack_migrate::{Exporter, Importer, ModuleKind, RunConfig, RunSummary, SharedClient};

#[derive(Parser)]
#[command(name = "stack-migrate")]
#[command(version)]
#[command(about = "Export and import content between stacks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Overrides shared by `export` and `import`.
#[derive(clap::Args)]
struct RunArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "STACK_MIGRATE_CONFIG")]
    config: PathBuf,

    /// Run a single module (e.g. `content-types`)
    #[arg(short, long)]
    module: Option<ModuleKind>,

    /// Branch to process; repeat for several
    #[arg(short, long)]
    branch: Vec<String>,

    /// Content directory override
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Stack API key override
    #[arg(long, env = "STACK_API_KEY")]
    api_key: Option<String>,

    /// Management token override
    #[arg(long, env = "STACK_MANAGEMENT_TOKEN", hide_env_values = true)]
    management_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a stack into the content directory
    Export {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Import the content directory into a stack
    Import {
        #[command(flatten)]
        args: RunArgs,

        /// Backup directory the import reads from and writes uid maps into
        #[arg(long, value_name = "DIR")]
        backup_dir: Option<PathBuf>,

        /// Import into an in-memory stack instead of the target
        #[arg(long)]
        dry_run: bool,

        /// Do not publish imported entries and assets
        #[arg(long)]
        skip_publish: bool,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Export { args } => {
            let config = load_config(&args)?;
            let client = connect(&config)?;
            let summary = Exporter::new(config, client).run().await?;
            print_summary("Export", &summary);
        }
        Commands::Import {
            args,
            backup_dir,
            dry_run,
            skip_publish,
        } => {
            let mut config = load_config(&args)?;
            if backup_dir.is_some() {
                config.backup_dir = backup_dir;
            }
            config.dry_run |= dry_run;
            config.skip_publish |= skip_publish;
            for (module, prerequisite) in missing_prerequisites(&config) {
                warn!(
                    module = module.as_str(),
                    prerequisite = prerequisite.as_str(),
                    "prerequisite not selected, its uid map must come from an earlier run"
                );
            }
            let client = connect(&config)?;
            let summary = Importer::new(config, client).run().await?;
            print_summary("Import", &summary);
        }
        Commands::Validate { config } => {
            validate_config(&config)?;
        }
        Commands::Init { output } => {
            generate_config(&output)?;
        }
    }

    Ok(())
}

fn load_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    info!("Loading configuration from {:?}", args.config);

    let mut config = RunConfig::from_file(&args.config)?;
    if let Some(module) = args.module {
        config.single_module = Some(module);
    }
    if !args.branch.is_empty() {
        config.branches = Some(args.branch.clone());
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(key) = &args.api_key {
        config.stack.api_key = key.clone();
    }
    if let Some(token) = &args.management_token {
        config.stack.management_token = Some(token.clone());
    }
    config.validate()?;
    Ok(config)
}

fn connect(config: &RunConfig) -> anyhow::Result<SharedClient> {
    Ok(Arc::new(HttpStackClient::new(&config.stack)?))
}

fn print_summary(operation: &str, summary: &RunSummary) {
    for branch in &summary.branches {
        if let Some(uid) = &branch.branch {
            println!("\nBranch {}", uid);
        }
        for module in &branch.modules {
            println!(
                "   {:<20} total {:>6}  success {:>6}  failed {:>6}",
                module.module, module.counts.total, module.counts.success, module.counts.failures
            );
        }
    }

    let totals = summary.totals();
    if summary.no_success_msg {
        println!(
            "\n{} finished with {} failed item(s); see mapper/<module>/failed.json",
            operation, totals.failures
        );
    } else {
        println!("\n{} complete: {} item(s)", operation, totals.success);
    }
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    info!("Validating configuration from {:?}", config_path);

    let config = RunConfig::from_file(config_path)?;
    config.validate()?;
    let modules = config.resolved_modules()?;

    println!("Configuration is valid!");
    println!("   Stack:    {}", config.stack.api_key);
    println!("   Content:  {:?}", config.data_dir);
    println!(
        "   Modules:  {}",
        modules
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(branches) = &config.branches {
        println!("   Branches: {}", branches.join(", "));
    }

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: stack-migrate export --config {:?}",
        output
    );

    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# stack-migrate configuration
stack:
  api_key: your-stack-api-key
  management_token: your-management-token
  # host: https://api.contentstack.io/v3

# Content directory written by export and read by import
data_dir: ./content
# backup_dir: ./content_backup

# branches: [main]

modules:
  types:
    - locales
    - environments
    - stack-settings
    - extensions
    - marketplace-apps
    - assets
    - taxonomies
    - global-fields
    - content-types
    - personalize
    - custom-roles
    - workflows
    - labels
    - webhooks
    - entries
  assets:
    include_versioned_assets: false
    download_limit: 5

defaults:
  batch_limit: 100
  fetch_concurrency: 5
  write_concurrency: 5
  chunk_file_size_mb: 1.0

retry:
  max_retries: 3
  delay_ms: 1000

skip_publish: false
import_webhook_status: disable
"#;
