use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use vmark::config::{LoggingConfig, VmarkConfig};
use vmark::registry::{NodeRegistry, StaticRegistry};
use vmark::twamp::report::format_outcome;
use vmark::twamp::validate::validate;
use vmark::twamp::{CommandSet, IpVersion, RawTestParameters, RunState};

#[derive(Parser)]
#[command(
    name = "vmark",
    about = "Orchestrates ad-hoc TWAMP benchmarks between vMark nodes",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "VMARK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller API server
    Serve {
        /// Bind address (overrides [api].bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one TWAMP test and wait for the result (Ctrl-C cancels)
    Run {
        #[command(flatten)]
        test: TestArgs,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the agent commands a test would send, without running it
    Commands {
        #[command(flatten)]
        test: TestArgs,
    },

    /// List registered nodes
    Nodes,
}

#[derive(Args)]
struct TestArgs {
    /// Node that transmits probe packets
    #[arg(long)]
    sender: String,

    /// Node that reflects probe packets
    #[arg(long)]
    responder: String,

    /// Use IPv6 instead of IPv4
    #[arg(long)]
    ipv6: bool,

    /// TWAMP test port
    #[arg(long)]
    port: Option<i64>,

    /// Number of probe packets
    #[arg(long)]
    count: Option<i64>,

    /// Interval between packets in milliseconds
    #[arg(long)]
    interval: Option<i64>,

    /// Padding bytes per packet
    #[arg(long)]
    padding: Option<i64>,

    #[arg(long)]
    ttl: Option<i64>,

    #[arg(long)]
    tos: Option<i64>,

    /// Set the IPv4 don't-fragment bit
    #[arg(long)]
    do_not_fragment: bool,
}

impl From<TestArgs> for RawTestParameters {
    fn from(a: TestArgs) -> Self {
        RawTestParameters {
            ip_version: if a.ipv6 { IpVersion::V6 } else { IpVersion::V4 },
            port: a.port,
            count: a.count,
            interval_ms: a.interval,
            padding_bytes: a.padding,
            ttl: a.ttl,
            tos: a.tos,
            do_not_fragment: a.do_not_fragment,
            sender_node_id: a.sender,
            responder_node_id: a.responder,
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_commands(commands: &CommandSet) {
    println!("Commands:");
    println!("  start responder: {}", commands.start_responder);
    println!("  start sender:    {}", commands.start_sender);
    println!("  stop responder:  {}", commands.stop_responder);
    println!("  stop sender:     {}", commands.stop_sender);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = VmarkConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting vmark controller");
            vmark::serve(&config).await?;
        }
        Commands::Run { test, json } => {
            let controller = vmark::build_controller(&config)?;
            let handle = controller.start(&test.into())?;
            if !json {
                println!("TWAMP run {}", handle.run_id);
                print_commands(&handle.commands);
                println!(
                    "Max wait: {} ms, on-the-wire size: {} bytes\n",
                    handle.derived.max_wait_ms, handle.derived.on_the_wire_bytes
                );
            }

            let canceller = {
                let controller = controller.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("Cancelling run...");
                        controller.cancel();
                    }
                })
            };
            let mut states = controller.subscribe();
            let watcher = tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    let state = *states.borrow_and_update();
                    tracing::info!(%state, "run state changed");
                }
            });

            let outcome = handle.wait().await?;
            canceller.abort();
            watcher.abort();

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", format_outcome(&outcome));
            }
            if outcome.state != RunState::Completed {
                anyhow::bail!("run ended in state {}", outcome.state);
            }
        }
        Commands::Commands { test } => {
            let registry = StaticRegistry::new(config.nodes.clone());
            let (params, derived) = validate(
                &test.into(),
                &registry,
                config.controller.wait_buffer_ms,
            )?;
            print_commands(&CommandSet::build(&params));
            println!(
                "Max wait: {} ms, on-the-wire size: {} bytes",
                derived.max_wait_ms, derived.on_the_wire_bytes
            );
        }
        Commands::Nodes => {
            let registry = StaticRegistry::new(config.nodes.clone());
            if registry.is_empty() {
                println!("No nodes configured.");
            } else {
                println!("{:<20} | {:<40} | {:<6} | Tags", "ID", "Address", "Port");
                println!("{:-<20}-|-{:-<40}-|-{:-<6}-|-{:-<10}", "", "", "", "");
                for node in registry.nodes() {
                    println!(
                        "{:<20} | {:<40} | {:<6} | {}",
                        node.id,
                        node.ip,
                        node.port,
                        node.tags.join(",")
                    );
                }
            }
        }
    }

    Ok(())
}
