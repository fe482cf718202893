//! chatrelay command-line entry point.

use anyhow::{Context, Result};
use chatrelay::config::{Config, Overrides};
use chatrelay::daemon::DaemonClient;
use chatrelay::RelayServer;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(author, version, about = "Chat with a local Ollama model from any device on your network")]
struct Cli {
    /// Config file (default: ~/.config/chatrelay/config.toml)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config_file: Option<PathBuf>,

    /// Address to bind
    #[arg(long, value_name = "HOST", global = true)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Ollama base URL
    #[arg(long, value_name = "URL", global = true)]
    daemon_url: Option<String>,

    /// Model to generate with
    #[arg(short = 'm', long, value_name = "MODEL", global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve,
    /// Check that Ollama is reachable and list installed models
    Check,
    /// Open configuration file in $EDITOR
    Config {
        /// Print the config file path and exit
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = cli.config_file.as_deref();
    let overrides = Overrides {
        host: cli.host,
        port: cli.port,
        daemon_url: cli.daemon_url,
        model: cli.model,
    };

    match cli.command {
        Some(Commands::Config { path }) => {
            let config_path = match config_file {
                Some(file) => file.to_path_buf(),
                None => Config::config_path()?,
            };
            handle_config(&config_path, path)
        }
        Some(Commands::Check) => {
            let config = load_config(config_file, overrides)?;
            handle_check(config).await
        }
        Some(Commands::Serve) | None => {
            init_tracing();
            let config = load_config(config_file, overrides)?;
            run_server(config).await
        }
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["chatrelay=info", "reqwest=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the given config file, or the default one, then apply CLI overrides.
fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    Ok(config
        .context("Failed to load configuration")?
        .with_overrides(overrides))
}

/// Run the relay in the foreground.
async fn run_server(config: Config) -> Result<()> {
    info!("Starting chatrelay...");
    info!(
        "Using daemon {} (model: {})",
        config.daemon.url, config.daemon.model
    );

    let server = RelayServer::new(config)?;
    server.run().await
}

/// Check the daemon and print its models.
async fn handle_check(config: Config) -> Result<()> {
    let client = DaemonClient::new(config.daemon)?;
    let models = client.list_models().await?;

    println!("Ollama: reachable at {}", client.base_url());
    println!("Configured model: {}", client.model());

    if models.is_empty() {
        println!("\nNo models installed.");
        println!("Pull one with: ollama pull {}", client.model());
        return Ok(());
    }

    println!("\nInstalled models:");
    for model in &models {
        let size = model.size.map(format_size).unwrap_or_else(|| "?".to_string());
        let marker = if model.name.starts_with(client.model()) {
            " (configured)"
        } else {
            ""
        };
        println!("  {} ({}){}", model.name, size, marker);
    }
    Ok(())
}

/// Format bytes to human-readable size.
fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.0}MB", bytes as f64 / MB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Handle the config command.
fn handle_config(config_path: &Path, print_only: bool) -> Result<()> {
    if print_only {
        println!("{}", config_path.display());
        return Ok(());
    }

    // Create default config if it doesn't exist
    if !config_path.exists() {
        Config::default().save_to(config_path)?;
        println!("Created default config at {}", config_path.display());
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = ProcessCommand::new(&editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        eprintln!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(5 * 1024 * 1024), "5MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0GB");
    }

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::try_parse_from(["chatrelay", "serve", "--port", "8080", "-m", "mistral"])
            .unwrap();
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.model.as_deref(), Some("mistral"));
        assert!(matches!(cli.command, Some(Commands::Serve)));
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let path = std::env::temp_dir()
            .join(format!("chatrelay-main-{}", std::process::id()))
            .join("config.toml");
        let mut file_config = Config::default();
        file_config.daemon.model = "from-file".to_string();
        file_config.server.port = 6000;
        file_config.save_to(&path).unwrap();

        let config = load_config(
            Some(&path),
            Overrides {
                model: Some("from-cli".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.daemon.model, "from-cli");
        let _ = std::fs::remove_file(&path);
    }
}
