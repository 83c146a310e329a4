use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use composeprobe::cli;
use composeprobe::cli::wait::Protocol;
use composeprobe::errors::Result;
use composeprobe::logging::{self, LogFormat};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cprobe")]
#[command(about = "Acceptance tests for container images deployed with docker compose", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenarios of a suite file
    Run {
        /// Suite file (YAML)
        suite: PathBuf,
        /// Run only the scenario with this name
        #[arg(long)]
        scenario: Option<String>,
        /// Keep workspaces on disk after the run
        #[arg(long)]
        keep_workspace: bool,
        /// Image under test (overrides config and COMPOSEPROBE_IMAGE)
        #[arg(long)]
        image: Option<String>,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the scenarios of a suite file
    List {
        suite: PathBuf,
    },
    /// Wait until an endpoint is ready
    Wait {
        /// host:port
        endpoint: String,
        #[arg(long, value_enum, default_value_t = Protocol::Bolt)]
        protocol: Protocol,
        /// e.g. 90s, 2m
        #[arg(long)]
        timeout: Option<String>,
    },
    /// Authenticate against a Bolt endpoint
    Verify {
        /// host:port
        endpoint: String,
        #[arg(long, default_value = "neo4j")]
        user: String,
        #[arg(long)]
        password: String,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Run {
            suite,
            scenario,
            keep_workspace,
            image,
            json,
        } => cli::run::run(cli::run::RunOptions {
            suite,
            scenario,
            keep_workspace,
            image,
            json,
        })?,
        Commands::List { suite } => cli::list::run(&suite)?,
        Commands::Wait {
            endpoint,
            protocol,
            timeout,
        } => cli::wait::run(&endpoint, protocol, timeout.as_deref())?,
        Commands::Verify {
            endpoint,
            user,
            password,
        } => cli::verify::run(&endpoint, &user, &password)?,
        Commands::Config => cli::config_cmd::show()?,
        Commands::Completions { shell } => cli::completions::run(shell, Cli::command()),
    }

    Ok(())
}
