use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use vmfleet::fleet::report;
use vmfleet::platform::sim::{Inventory, SimulatedPlatform};
use vmfleet::platform::{ConnectionParams, PlatformClient};
use vmfleet::{AbortPolicy, FleetConfig, FleetCoordinator, logging, spec};

/// Clone a fleet of VMs from templates, one pipeline per instance.
#[derive(Debug, Parser)]
#[clap(name = "vmfleet", version, verbatim_doc_comment)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Suppress terminal control codes in log output.
    #[clap(long, global = true)]
    disable_ansi: bool,

    /// Also write logs to a daily-rotated file in this directory.
    #[clap(long, global = true, env = "VMFLEET_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision every instance of a batch file.
    Provision(ProvisionArgs),
    /// Parse and validate a batch file without contacting the platform.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    /// Batch file: `address name host datastore template` per line.
    #[clap(long)]
    batch: PathBuf,

    /// JSON configuration; defaults to `<config dir>/vmfleet/config.json`.
    #[clap(long)]
    config: Option<PathBuf>,

    /// JSON inventory of the simulated platform.
    #[clap(long, env = "VMFLEET_INVENTORY")]
    inventory: PathBuf,

    /// Instances provisioned at once.
    #[clap(long)]
    concurrency: Option<usize>,

    /// Stop remaining instances before their next stage once one fails.
    #[clap(long)]
    abort_on_failure: bool,

    /// Serialize every platform call.
    #[clap(long)]
    serialize: bool,

    #[clap(long, env = "VMFLEET_SERVER", default_value = "localhost")]
    server: String,

    #[clap(long, env = "VMFLEET_USER", default_value = "")]
    user: String,

    #[clap(long, env = "VMFLEET_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Guest account used for the in-guest address rewrite.
    #[clap(long, env = "VMFLEET_GUEST_USER")]
    guest_user: Option<String>,

    #[clap(long, env = "VMFLEET_GUEST_PASSWORD", hide_env_values = true)]
    guest_password: Option<String>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[clap(long)]
    batch: PathBuf,

    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match logging::init_logging(cli.log_dir.as_deref(), !cli.disable_ansi) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = match &cli.command {
        Command::Provision(args) => provision(args).await,
        Command::Check(args) => check(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    FleetConfig::load_or_default(path).context("failed to load configuration")
}

async fn provision(args: &ProvisionArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.abort_on_failure {
        config.abort_policy = AbortPolicy::Abort;
    }
    if args.serialize {
        config.serialize_platform_calls = true;
    }
    if args.guest_user.is_some() {
        config.guest.username = args.guest_user.clone();
    }
    if args.guest_password.is_some() {
        config.guest.password = args.guest_password.clone();
    }
    config.sanitize().context("invalid configuration")?;

    let specs = spec::read_batch(&args.batch, &config.instance)
        .with_context(|| format!("invalid batch {}", args.batch.display()))?;

    let inventory = Inventory::from_file(&args.inventory)
        .with_context(|| format!("invalid inventory {}", args.inventory.display()))?;
    let params = ConnectionParams {
        server: args.server.clone(),
        username: args.user.clone(),
        password: args.password.clone(),
    };
    let platform = SimulatedPlatform::connect(&params, inventory)
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let client = PlatformClient::with_serialization(Arc::new(platform), config.serialize_platform_calls);

    let coordinator = FleetCoordinator::new(client, config);
    let batch = coordinator.run(specs).await;

    print!("{}", report::render(&batch));
    Ok(if batch.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn check(args: &CheckArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let specs = spec::read_batch(&args.batch, &config.instance)
        .with_context(|| format!("invalid batch {}", args.batch.display()))?;

    let mut invalid = 0;
    for spec in &specs {
        match spec.validate() {
            Ok(()) => println!("{}: ok", spec.name),
            Err(e) => {
                invalid += 1;
                println!("{}: {}", spec.name, e);
            }
        }
    }
    println!("{} instance(s), {} invalid", specs.len(), invalid);

    Ok(if invalid == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
