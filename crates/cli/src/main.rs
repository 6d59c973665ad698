use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::gateway::Gateway;
use memory_transport::MemoryTransport;

#[derive(Parser)]
#[command(name = "wagate")]
#[command(about = "Wagate CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration file with defaults (credentials, timing).
    Init {
        /// Config file path (default: WAGATE_CONFIG_PATH or ~/.wagate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Send text messages over the loopback transport and print the
    /// exchange result as JSON. Blocks until every message is acknowledged.
    Send {
        /// Config file path (default: WAGATE_CONFIG_PATH or ~/.wagate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Account address (overrides credentials.address from config)
        #[arg(long, value_name = "ADDRESS")]
        address: Option<String>,

        /// Recipient: phone number, group id (with '-'), or full JID
        #[arg(long, value_name = "ADDRESS")]
        to: String,

        /// Message text
        message: String,
    },

    /// Run one receive unit of work over the loopback transport and print
    /// whatever arrived (returns after the idle budget elapses).
    Receive {
        /// Config file path (default: WAGATE_CONFIG_PATH or ~/.wagate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Account address (overrides credentials.address from config)
        #[arg(long, value_name = "ADDRESS")]
        address: Option<String>,

        /// Inject a sample inbound message with this text to exercise the
        /// ack round-trip on the loopback link.
        #[arg(long, value_name = "TEXT")]
        inject: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wagate {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            address,
            to,
            message,
        }) => {
            if let Err(e) = run_send(config, address, to, message) {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Receive {
            config,
            address,
            inject,
        }) => {
            if let Err(e) = run_receive(config, address, inject) {
                log::error!("receive failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let defaults = serde_json::to_string_pretty(&lib::config::Config::default())?;
    std::fs::write(&path, defaults)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

fn load_gateway(
    config_path: Option<std::path::PathBuf>,
    address: Option<String>,
) -> anyhow::Result<(Gateway<MemoryTransport>, memory_transport::MemoryHandle)> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(a) = address {
        config.credentials.address = a;
    }
    let transport = MemoryTransport::new();
    let handle = transport.handle();
    let gateway = Gateway::new(&config, transport)
        .context("set credentials.address in the config or pass --address")?;
    Ok((gateway, handle))
}

fn run_send(
    config_path: Option<std::path::PathBuf>,
    address: Option<String>,
    to: String,
    message: String,
) -> anyhow::Result<()> {
    let (mut gateway, _handle) = load_gateway(config_path, address)?;
    log::info!("sending 1 message to {}", to);
    let result = gateway.send_messages(vec![(to, message)])?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_receive(
    config_path: Option<std::path::PathBuf>,
    address: Option<String>,
    inject: Option<String>,
) -> anyhow::Result<()> {
    let (mut gateway, handle) = load_gateway(config_path, address)?;
    if let Some(text) = inject {
        let queue = gateway.detached_queue();
        queue.push(move || {
            handle.deliver_message("demo@s.whatsapp.net", &text);
        });
    }
    let result = gateway.receive_messages()?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
