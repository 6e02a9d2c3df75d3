use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use propstore::config::{self, StoreConfig};
use propstore::db::RecordId;
use propstore::repo::{ClientListQuery, ClientRepo, UserRepo};
use propstore::store::Store;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Inspect the client and account store on whichever backend is configured
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// TOML config file. Backend credentials below fill in what it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    backends: BackendArgs,

    #[command(subcommand)]
    command: Command,
}

/// Backend settings, each also read from its environment variable.
#[derive(Args, Debug, Default)]
struct BackendArgs {
    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Base URL of the REST data API
    #[arg(long, global = true, env = "REST_API_URL")]
    rest_url: Option<String>,

    #[arg(long, global = true, env = "REST_API_KEY", hide_env_values = true)]
    rest_key: Option<String>,

    /// Local SQLite file
    #[arg(long, global = true, env = "STORE_SQLITE_PATH")]
    sqlite_path: Option<PathBuf>,

    /// Password hash for the seeded admin account
    #[arg(long, global = true, env = "ADMIN_PASSWORD_HASH", hide_env_values = true)]
    admin_password_hash: Option<String>,

    /// Use the local file when PostgreSQL is unreachable
    #[arg(
        long,
        global = true,
        env = "STORE_LOCAL_FALLBACK",
        value_parser = BoolishValueParser::new()
    )]
    local_fallback: bool,
}

impl BackendArgs {
    /// Answer config lookups from the parsed arguments.
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            config::ENV_DATABASE_URL => self.database_url.clone(),
            config::ENV_REST_URL => self.rest_url.clone(),
            config::ENV_REST_KEY => self.rest_key.clone(),
            config::ENV_SQLITE_PATH => self
                .sqlite_path
                .as_ref()
                .map(|p| p.display().to_string()),
            config::ENV_ADMIN_PASSWORD_HASH => self.admin_password_hash.clone(),
            config::ENV_LOCAL_FALLBACK => self.local_fallback.then(|| "true".to_string()),
            _ => None,
        }
    }

    fn resolve(&self, file: Option<&Path>) -> Result<StoreConfig> {
        let lookup = |key: &str| self.lookup(key);
        Ok(match file {
            Some(path) => StoreConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
                .with_credentials_from(lookup),
            None => StoreConfig::from_lookup(lookup),
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Show the primary and fallback backends
    Backend,
    /// Client records
    Clients {
        #[command(subcommand)]
        action: ClientsAction,
    },
    /// User accounts
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand)]
enum ClientsAction {
    List {
        /// Match on name, or on document digits
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        created_by: Option<i64>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    Get {
        id: i64,
    },
    Count,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = cli.backends.resolve(cli.config.as_deref())?;
    let store = Store::from_config(&config).context("Failed to initialize store")?;

    match cli.command {
        Command::Backend => {
            let selection = config.selection();
            print_json(&serde_json::json!({
                "primary": selection.primary.label(),
                "fallback": selection.fallback.map(|k| k.label()),
                "sqlite_path": config.sqlite_path,
            }))?;
        }
        Command::Clients { action } => {
            let repo = ClientRepo::new(store);
            match action {
                ClientsAction::List {
                    search,
                    created_by,
                    page,
                    limit,
                } => {
                    let page = repo
                        .list(&ClientListQuery {
                            search,
                            created_by,
                            page,
                            limit,
                        })
                        .await
                        .context("Failed to list clients")?;
                    print_json(&page)?;
                }
                ClientsAction::Get { id } => {
                    let client = repo
                        .get(&RecordId::Int(id))
                        .await
                        .context("Failed to fetch client")?;
                    match client {
                        Some(client) => print_json(&client)?,
                        None => anyhow::bail!("no client with id {}", id),
                    }
                }
                ClientsAction::Count => {
                    let total = repo.count().await.context("Failed to count clients")?;
                    print_json(&serde_json::json!({ "total_count": total }))?;
                }
                ClientsAction::Delete { id } => {
                    let deleted = repo
                        .delete(&RecordId::Int(id))
                        .await
                        .context("Failed to delete client")?;
                    print_json(&serde_json::json!({ "success": deleted }))?;
                }
            }
        }
        Command::Users { action } => match action {
            UsersAction::List => {
                let users = UserRepo::new(store)
                    .list()
                    .await
                    .context("Failed to list users")?;
                print_json(&users)?;
            }
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_backend_args_read_their_env_vars() {
        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|a| a.get_id() == id)
                .and_then(|a| a.get_env())
                .and_then(|e| e.to_str())
                .map(str::to_string)
        };
        assert_eq!(env_of("database_url").as_deref(), Some(config::ENV_DATABASE_URL));
        assert_eq!(env_of("rest_url").as_deref(), Some(config::ENV_REST_URL));
        assert_eq!(env_of("rest_key").as_deref(), Some(config::ENV_REST_KEY));
        assert_eq!(env_of("sqlite_path").as_deref(), Some(config::ENV_SQLITE_PATH));
        assert_eq!(env_of("local_fallback").as_deref(), Some(config::ENV_LOCAL_FALLBACK));
    }

    #[test]
    fn test_flags_select_backends() {
        let cli = Cli::try_parse_from([
            "propstore",
            "--rest-url",
            "https://api.example",
            "--rest-key",
            "k",
            "--sqlite-path",
            "/tmp/store.db",
            "clients",
            "count",
        ])
        .unwrap();
        let config = cli.backends.resolve(None).unwrap();
        assert_eq!(config.rest.unwrap().base_url, "https://api.example");
        assert_eq!(config.sqlite_path, PathBuf::from("/tmp/store.db"));
    }

    #[test]
    fn test_local_fallback_flag() {
        let args = BackendArgs {
            database_url: Some("postgres://db/app".into()),
            local_fallback: true,
            ..BackendArgs::default()
        };
        let config = args.resolve(None).unwrap();
        assert!(config.local_fallback_when_remote_down);
        assert!(config.network.is_some());
    }
}
