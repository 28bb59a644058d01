// LocalAgent Gate - Main Entry Point
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// CLI and HTTP server. Every chat prompt routes through this gateway.
// Usage:
//   localagent-gate serve                 # Run HTTP server (default)
//   localagent-gate dispatch <prompt>     # One-shot dispatcher run
//   localagent-gate status                # Show sandbox and domain policy
//   localagent-gate whitelist             # Print learned-domain document
//   localagent-gate init-config           # Write default config.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use localagent_gate::{
    config::AgentConfig,
    domains::{WhitelistDocument, WhitelistStore},
    metrics::Metrics,
    paths,
    server::{self, AppState},
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "localagent-gate")]
#[command(author = "Joseph Stone")]
#[command(version)]
#[command(about = "LocalAgent Gate - sandboxed tool dispatch for chat-completion prompts")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, default_value_os_t = paths::default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (chat completions, test, health, whitelist)
    Serve,

    /// Run one prompt through the dispatcher, no loop protection or model fallback
    Dispatch {
        /// Prompt text
        prompt: String,
    },

    /// Show sandbox mode, domain policy and learned domains
    Status,

    /// Print the learned-domain document as JSON
    Whitelist,

    /// Write the effective config (defaults where unset) to the config path
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging (safe if already init)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let cli = Cli::parse();

    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let state = AppState::from_config(&config)?;
            server::run(state, &config.server)?;
        }

        Commands::Dispatch { prompt } => {
            let dispatcher = server::dispatcher_from_config(&config, Arc::new(Metrics::new()))?;
            let result = dispatcher.dispatch(&prompt);
            println!("{}", result.render());

            if !result.recognized() {
                std::process::exit(1);
            }
        }

        Commands::Status => {
            let domains = server::domains_from_config(&config);
            println!("LocalAgent Gate v{}", env!("CARGO_PKG_VERSION"));
            println!("Config:  {:?}", cli.config);
            println!("Sandbox: {} ({:?})", if config.sandbox { "ON" } else { "OFF" }, config.sandbox_root());
            println!(
                "Shell:   {}{}",
                if config.shell_enabled() { "enabled" } else { "disabled" },
                if config.shell_execution.require_explicit_trigger { " (explicit trigger required)" } else { "" }
            );
            println!();
            if domains.wildcard() {
                println!("Domains: * (wildcard)");
            } else {
                println!("Domains: {}", domains.static_domains().join(", "));
            }
            println!(
                "Auto-whitelist: {} ({:?})",
                if domains.auto_learn() { "enabled" } else { "disabled" },
                domains.store_path()
            );
            let learned = domains.learned_domains();
            println!("Learned ({}):", learned.len());
            for d in &learned {
                println!("  + {}", d);
            }
            println!();
            println!("Model: {} @ {}", config.llm.model, config.llm.base_url);
            println!("Listen: http://{}", config.bind_addr());
        }

        Commands::Whitelist => {
            let store = WhitelistStore::new(config.whitelist_path());
            let learned = store
                .load()
                .with_context(|| format!("Failed to read whitelist {:?}", store.path()))?;
            let doc = WhitelistDocument { approved_domains: learned.into_iter().collect() };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", cli.config);
            }
            config.save(&cli.config)?;
            println!("Config written to {:?}", cli.config);
        }
    }

    Ok(())
}
