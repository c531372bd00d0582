use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::GlobalArgs;

#[derive(Parser)]
#[command(name = "phpbox")]
#[command(about = "Run PHP code on a pool of sandboxed engine workers")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet of code and print its output
    Run(cli::run::RunArgs),
    /// Run the script a request targets, with the request's superglobals
    Request(cli::request::RequestArgs),
    /// Fetch the engine image and install the application archive
    Install,
    /// Pack a project directory into an application archive
    Pack(cli::pack::PackArgs),
    /// Inspect or clear the cached image and installed files
    Cache {
        #[command(subcommand)]
        action: cli::cache::CacheAction,
    },
}

/// Workspace crates whose `tracing` output is shown by default.
const LOG_TARGETS: [&str; 6] = ["phpbox", "runtime", "pool", "install", "engine", "store"];

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect();
        EnvFilter::new(format!("warn,{}", directives.join(",")))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.global.debug {
        stdio::set_log_level(stdio::LogLevel::Debug);
    }
    init_tracing(cli.global.debug);

    let result = match cli.command {
        Commands::Run(args) => cli::run::cmd(&cli.global, args).await,
        Commands::Request(args) => cli::request::cmd(&cli.global, args).await,
        Commands::Install => cli::install::cmd(&cli.global).await,
        Commands::Pack(args) => cli::pack::cmd(args),
        Commands::Cache { action } => cli::cache::cmd(&cli.global, action),
    };

    if let Err(err) = result {
        stdio::error("error", &format!("{:#}", err));
        std::process::exit(1);
    }
}
