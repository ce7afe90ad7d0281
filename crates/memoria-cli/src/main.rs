//! Operator CLI for the memoria engine: schema initialization, API key
//! generation, and starting the server.
//!
//! Exit codes: 0 success, 1 validation error, 2 runtime failure.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use memoria_core::EngineConfig;
use sha2::{Digest, Sha256};

#[derive(Parser)]
#[command(name = "memoria")]
#[command(author, version, about = "memoria - persona-scoped vector memory for AI agents")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default `memoria.toml` if one doesn't already exist
    InitDb {
        /// Path to write the config file to
        #[arg(long, default_value = "memoria.toml")]
        config: PathBuf,

        /// Overwrite an existing config file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Generate a new API key
    Keygen {
        /// Human-readable label for the key
        #[arg(long)]
        name: Option<String>,

        /// Permissions to grant, comma-separated
        /// (read, write, vectors:read, vectors:write, personas:read, personas:write, admin)
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,

        /// Requests per minute this key is allowed
        #[arg(long, default_value_t = 60)]
        rate_limit: u32,

        /// Days until the key expires; omit for no expiration
        #[arg(long)]
        expiry_days: Option<u32>,

        /// Prompt for each field instead of reading flags
        #[arg(long, default_value_t = false)]
        interactive: bool,
    },

    /// Start the HTTP server (thin wrapper around the `memoria-server` binary)
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "memoria.toml")]
        config: PathBuf,
    },
}

/// Distinguishes a bad invocation (exit 1) from a failure while doing the
/// work (exit 2), per spec §6.4.
#[derive(Debug)]
enum CliError {
    Validation(String),
    Runtime(anyhow::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(err)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Runtime(err.into())
    }
}

type CliResult<T> = Result<T, CliError>;

const VALID_PERMISSIONS: &[&str] = &[
    "read",
    "write",
    "vectors:read",
    "vectors:write",
    "personas:read",
    "personas:write",
    "admin",
];

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn run_init_db(config: PathBuf, force: bool) -> CliResult<()> {
    if config.exists() && !force {
        return Err(CliError::Validation(format!(
            "{} already exists; pass --force to overwrite",
            config.display()
        )));
    }
    let defaults = EngineConfig::default();
    let toml = toml::to_string_pretty(&defaults).map_err(|err| anyhow::anyhow!(err))?;
    std::fs::write(&config, toml)?;
    println!("wrote default config to {}", config.display());
    Ok(())
}

fn run_keygen(
    mut name: Option<String>,
    mut permissions: Vec<String>,
    mut rate_limit: u32,
    mut expiry_days: Option<u32>,
    interactive: bool,
) -> CliResult<()> {
    if interactive {
        name = Some(prompt("Key name")?);
        let raw = prompt("Permissions (comma-separated)")?;
        permissions = raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        let raw_rate = prompt("Rate limit (requests/minute)")?;
        rate_limit = raw_rate
            .parse()
            .map_err(|_| CliError::Validation("rate limit must be an integer".to_string()))?;
        let raw_expiry = prompt("Expiry in days (blank for none)")?;
        expiry_days = if raw_expiry.is_empty() {
            None
        } else {
            Some(raw_expiry.parse().map_err(|_| {
                CliError::Validation("expiry_days must be an integer".to_string())
            })?)
        };
    }

    if permissions.is_empty() {
        return Err(CliError::Validation(
            "at least one permission is required".to_string(),
        ));
    }
    for permission in &permissions {
        if !VALID_PERMISSIONS.contains(&permission.as_str()) {
            return Err(CliError::Validation(format!(
                "unknown permission '{permission}'; valid values are {}",
                VALID_PERMISSIONS.join(", ")
            )));
        }
    }
    if rate_limit == 0 {
        return Err(CliError::Validation(
            "rate_limit must be greater than zero".to_string(),
        ));
    }

    let name = name.unwrap_or_else(|| "unnamed-key".to_string());
    let raw_key = generate_raw_key();
    let hashed = hex::encode(Sha256::digest(raw_key.as_bytes()));

    let key_json = serde_json::json!({
        "name": name,
        "permissions": permissions,
        "rate_limit_per_minute": rate_limit,
        "expiry_days": expiry_days,
        "hashed_key": hashed,
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&key_json).map_err(|err| anyhow::anyhow!(err))?
    );
    println!();
    println!("raw key (shown once, store it securely): {raw_key}");
    Ok(())
}

fn generate_raw_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("mk_{}", hex::encode(bytes))
}

fn run_serve(host: String, port: u16, config: PathBuf) -> CliResult<()> {
    let status = std::process::Command::new("memoria-server")
        .arg("--host")
        .arg(&host)
        .arg("--port")
        .arg(port.to_string())
        .arg("--config")
        .arg(&config)
        .status()?;

    if !status.success() {
        return Err(CliError::Runtime(anyhow::anyhow!(
            "memoria-server exited with {status}"
        )));
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::InitDb { config, force } => run_init_db(config, force),
        Commands::Keygen {
            name,
            permissions,
            rate_limit,
            expiry_days,
            interactive,
        } => run_keygen(name, permissions, rate_limit, expiry_days, interactive),
        Commands::Serve { host, port, config } => run_serve(host, port, config),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Validation(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Runtime(err)) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
