// ChatPay — Chat-driven USDC transfers in Rust
// License: Apache-2.0

use chatpay::bot::gateway::{build_router, Gateway};
use chatpay::bus::MessageBus;
use chatpay::channel::console::ConsoleChannel;
use chatpay::channel::Channel;
use chatpay::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

const LOGO: &str = "💸";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "chatpay",
    about = "ChatPay — Chat-driven USDC transfers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat gateway (Telegram and other enabled channels)
    Gateway {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Chat with the bot from the terminal
    Console {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Conversation id used for this terminal
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Initialize workspace and config
    Onboard,
    /// Show version information
    Version,
    /// Show status of configuration and workspace
    Status {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    chatpay::logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Gateway { config }) => {
            gateway_cmd(config).await;
        }
        Some(Commands::Console { config, session }) => {
            console_cmd(config, session).await;
        }
        Some(Commands::Onboard) => {
            onboard_cmd();
        }
        Some(Commands::Version) => {
            version_cmd();
        }
        Some(Commands::Status { config }) => {
            status_cmd(config);
        }
        None => {
            // Default: chat from the terminal
            console_cmd(None, "default".into()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway command
// ---------------------------------------------------------------------------

async fn gateway_cmd(config_path: Option<String>) {
    let cfg = load_valid_config(config_path.as_deref());
    let bus = Arc::new(MessageBus::new());

    let router = match build_router(&cfg, bus.clone()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let gateway = Gateway::from_config(&cfg, router, bus);
    if gateway.channel_count() == 0 {
        eprintln!("{} No channels enabled. Enable one in the config or use `chatpay console`.", LOGO);
        std::process::exit(1);
    }

    println!("{} ChatPay Gateway starting...", LOGO);
    if let Err(e) = gateway.run().await {
        eprintln!("{} Gateway error: {}", LOGO, e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Console command
// ---------------------------------------------------------------------------

async fn console_cmd(config_path: Option<String>, session: String) {
    let cfg = load_valid_config(config_path.as_deref());
    let bus = Arc::new(MessageBus::new());

    let router = match build_router(&cfg, bus.clone()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let console = Arc::new(ConsoleChannel::new(&session, bus.clone()));
    let channels: Vec<Arc<dyn Channel>> = vec![console.clone()];
    let gateway = Gateway::new(router, bus, channels);

    println!("{} ChatPay v{} — console session '{}'", LOGO, chatpay::VERSION, session);
    println!("Type /help for commands. Type 'exit' or Ctrl+D to quit.\n");

    tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!("Gateway error: {}", e);
        }
    });

    console.wait_closed().await;
    println!("Goodbye!");
}

// ---------------------------------------------------------------------------
// Onboard command
// ---------------------------------------------------------------------------

fn onboard_cmd() {
    println!("{} ChatPay Onboard — Setting up your workspace\n", LOGO);

    let config_path = match Config::default_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };
    let cfg = Config::default();
    let workspace_dir = match cfg.workspace_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let mut dirs = vec![workspace_dir.clone(), workspace_dir.join("sessions")];
    if let Some(parent) = config_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    for dir in &dirs {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    // Write default config if it doesn't exist
    if !config_path.exists() {
        match write_config(&cfg, &config_path) {
            Ok(()) => println!("  ✅ Config created at {}", config_path.display()),
            Err(e) => {
                eprintln!("Failed to write config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        println!("  ⏭️  Config already exists at {}", config_path.display());
    }

    println!("\n{} Setup complete!", LOGO);
    println!("\nNext steps:");
    println!("  1. Edit {} and set api.base_url", config_path.display());
    println!("  2. Try it locally: chatpay console");
    println!("  3. Add a Telegram token and run: chatpay gateway");
}

// ---------------------------------------------------------------------------
// Other commands
// ---------------------------------------------------------------------------

fn version_cmd() {
    println!("{} ChatPay v{}", LOGO, chatpay::VERSION);
    println!("  Chat-driven USDC transfers");
}

fn status_cmd(config_path: Option<String>) {
    println!("{} ChatPay Status\n", LOGO);

    let cfg = load_config(config_path.as_deref());

    let config_path = config_path
        .map(PathBuf::from)
        .or_else(|| Config::default_path().ok())
        .unwrap_or_default();
    if config_path.exists() {
        println!("  Config:    ✅ {}", config_path.display());
    } else {
        println!("  Config:    ❌ Not found (run 'chatpay onboard')");
    }
    if let Err(e) = cfg.validate() {
        println!("  Problems:  ❌ {}", e);
    }

    match cfg.workspace_path() {
        Ok(ws) if ws.exists() => println!("  Workspace: ✅ {}", ws.display()),
        Ok(ws) => println!("  Workspace: ❌ {} (not created)", ws.display()),
        Err(_) => println!("  Workspace: ❌ Could not resolve path"),
    }

    println!("  API:       {}", cfg.api.base_url);
    println!(
        "  Amounts:   {} to {} {}",
        cfg.transfers.min_amount, cfg.transfers.max_amount, cfg.transfers.currency
    );
    match cfg.conversation.prompt_timeout_secs {
        Some(secs) => println!("  Timeout:   {}s per prompt", secs),
        None => println!("  Timeout:   none"),
    }

    if cfg.channels.telegram.enabled {
        println!("  Channels:  telegram");
    } else {
        println!("  Channels:  None enabled");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> Config {
    let config_path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json"))
    };

    Config::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    })
}

fn write_config(cfg: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, content)?;
    Ok(())
}

fn load_valid_config(path: Option<&str>) -> Config {
    let cfg = load_config(path);
    if let Err(e) = cfg.validate() {
        eprintln!("{} Configuration Error: {}", LOGO, e);
        eprintln!("\nRun `chatpay onboard` to set up your configuration.");
        std::process::exit(1);
    }
    cfg
}
