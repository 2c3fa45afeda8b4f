use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formdesk::auth::password::hash_password;
use formdesk::auth::{SqliteCredentialStore, ADMIN_ROLE};
use formdesk::config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Contact-form and portfolio gateway.
#[derive(Parser, Debug)]
#[command(name = "formdesk", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Path to config.toml (defaults to the platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print an argon2 PHC hash for `admin_password_hash`
    HashPassword {
        /// Password to hash; prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Manage database-backed admin credentials
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Add an admin to the `admins` table
    Add {
        #[arg(short, long)]
        username: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = ADMIN_ROLE)]
        role: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn prompt_password(confirm: bool) -> Result<String> {
    let mut prompt = dialoguer::Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "Passwords do not match");
    }
    let password = prompt.interact().context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formdesk=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = config::load(config)?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            formdesk::gateway::run_gateway(config).await
        }

        Command::HashPassword { password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password(true)?,
            };
            println!("{}", hash_password(&password)?);
            Ok(())
        }

        Command::Admin {
            command:
                AdminCommand::Add {
                    username,
                    password,
                    role,
                    config,
                },
        } => {
            let path = match config {
                Some(p) => p,
                None => config::default_config_path()?,
            };
            let mut cfg = config::Config::load_from(&path)?;
            cfg.apply_env_overrides();

            let password = match password {
                Some(p) => p,
                None => prompt_password(true)?,
            };
            let store = SqliteCredentialStore::open(&cfg.storage.db_path)?;
            store.add(&username, &hash_password(&password)?, &role)?;
            println!(
                "Added {role} '{}' to {}",
                username.trim(),
                cfg.storage.db_path.display()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_overrides() {
        let cli = Cli::try_parse_from(["formdesk", "serve", "--port", "8080", "--host", "0.0.0.0"])
            .unwrap();
        match cli.command {
            Command::Serve { host, port, config } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(8080));
                assert!(config.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn admin_add_defaults_role() {
        let cli = Cli::try_parse_from([
            "formdesk", "admin", "add", "--username", "root", "--password", "pw",
        ])
        .unwrap();
        let Command::Admin {
            command: AdminCommand::Add { role, username, .. },
        } = cli.command
        else {
            panic!("expected admin add");
        };
        assert_eq!(username, "root");
        assert_eq!(role, ADMIN_ROLE);
    }
}
