use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use restgate_core::config::{Config, LoggingConfig};
use restgate_core::memory::MemoryServices;
use restgate_gateway::{GatewayModule, LifecycleGroup};

#[derive(Parser)]
#[command(
    name = "restgate",
    about = "RESTCONF-style HTTP gateway over pluggable backend services",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted
    Serve {
        /// Port to listen on (default: 8888)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,

        /// Path the API tree is mounted under (default: /restconf)
        #[arg(long)]
        context_path: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;

    init_logging(&config.logging(), cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            bind,
            context_path,
        } => {
            let restconf = config.restconf.get_or_insert_with(Default::default);
            if let Some(port) = port {
                restconf.port = port;
            }
            if let Some(bind) = bind {
                restconf.bind = bind;
            }
            if let Some(context_path) = context_path {
                restconf.context_path = context_path;
            }
            serve(&config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!(
                        "{} has {} error(s)",
                        config_path.display(),
                        errors.len()
                    );
                }
                println!("{}: OK", config_path.display());
            }
        },
    }

    Ok(())
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if let Some(first) = errors.first() {
        anyhow::bail!("Invalid configuration: {first}");
    }

    let services = MemoryServices::default();
    let gateway = GatewayModule::from_config(services.handles.clone(), config)?;
    let addr = gateway.address().clone();

    let mut group = LifecycleGroup::new();
    group.register(Box::new(gateway));
    group.initialize_all().await?;

    tracing::info!(
        "RESTCONF gateway listening on http://{}{}",
        addr.socket_addr(),
        addr.context_path()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    group.shutdown_all().await?;
    Ok(())
}

/// Install the global subscriber from the `logging` config section.
///
/// `RUST_LOG` takes precedence over the configured level and filters.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };

    let mut rejected = Vec::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(level);
        for directive in &logging.filters {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(_) => rejected.push(directive.clone()),
            }
        }
        filter
    });

    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    for directive in rejected {
        tracing::warn!("Ignoring invalid log filter '{directive}'");
    }
}
