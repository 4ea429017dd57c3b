//! # mcpgate
//!
//! Command-line front end for the mcpgate MCP gateway.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcpgate_core::{format_error_with_suggestion, AdapterMode, Config};

mod commands;
mod context;

pub use context::GatewayContext;

/// mcpgate - one MCP backend over many MCP servers
#[derive(Parser)]
#[command(name = "mcpgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file layered over the user and project settings
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// MCP servers file
    #[arg(short, long, global = true, value_name = "PATH")]
    servers: Option<PathBuf>,

    /// Backend mode
    #[arg(short, long, global = true, value_enum)]
    mode: Option<ModeArg>,

    /// Fail instead of falling back to the single server
    #[arg(long, global = true)]
    no_fallback: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    Single,
    Multi,
}

impl From<ModeArg> for AdapterMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => AdapterMode::Auto,
            ModeArg::Single => AdapterMode::Single,
            ModeArg::Multi => AdapterMode::Multi,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate settings and the servers file without connecting
    Check,
    /// List aggregated tools
    Tools,
    /// List aggregated resources
    Resources,
    /// Call a tool
    Call {
        /// Tool name, namespaced (server.tool) or unique raw name
        name: String,
        /// Arguments as a JSON object
        #[arg(value_name = "JSON")]
        arguments: Option<String>,
    },
    /// Read a resource
    Read {
        /// Resource URI, optionally prefixed with the server name
        uri: String,
    },
    /// Ping every server
    Health,
    /// Initialize, then print adapter statistics
    Stats,
    /// Show version information
    Version,
}

/// Output options shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(servers) = &self.servers {
            config.adapter.servers_config = servers.clone();
        }
        if let Some(mode) = self.mode {
            config.adapter.mode = mode.into();
        }
        if self.no_fallback {
            config.adapter.fallback_enabled = false;
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("mcpgate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let loaded = Config::load_validated(cli.config.as_deref());
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_with_suggestion(&e));
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    let output = OutputOptions { json: cli.json };
    let result = run(cli.command, config, output).await;

    if let Err(e) = result {
        match e.downcast_ref::<mcpgate_core::Error>() {
            Some(gateway) => eprintln!("{}", format_error_with_suggestion(gateway)),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, config: Config, output: OutputOptions) -> anyhow::Result<()> {
    if let Commands::Check = command {
        return commands::check::run(&config, output);
    }

    let ctx = GatewayContext::start(config).await?;
    let result = match command {
        Commands::Tools => commands::list::tools(&ctx, output).await,
        Commands::Resources => commands::list::resources(&ctx, output).await,
        Commands::Call { name, arguments } => {
            commands::call::tool(&ctx, &name, arguments.as_deref(), output).await
        }
        Commands::Read { uri } => commands::call::resource(&ctx, &uri, output).await,
        Commands::Health => commands::status::health(&ctx, output).await,
        Commands::Stats => commands::status::stats(&ctx, output),
        Commands::Check | Commands::Version => Ok(()),
    };
    ctx.shutdown().await;
    result
}
