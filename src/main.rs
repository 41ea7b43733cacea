use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sso::auth::{AuthService, CredentialVerifier, Role, Sweeper};
use sso::config::Config;
use sso::gateway::{self, GatewayState};
use sso::store::sqlite::{SqliteOptions, SqliteStore};
use sso::RequestContext;

/// Single-sign-on identity service.
#[derive(Parser, Debug)]
#[command(name = "sso", version, about)]
struct Cli {
    /// Path to config.toml (defaults to $SSO_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway and the token sweeper
    Serve,

    /// Manage registered applications
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// Administrative account operations
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Run one sweep pass and exit
    Sweep,
}

#[derive(Subcommand, Debug)]
enum AppCommand {
    /// Register (or update) an application and its signing secret
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        secret: String,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Grant the admin role
    Promote {
        #[arg(long)]
        id: i64,
    },
    /// Revert to the user role
    Demote {
        #[arg(long)]
        id: i64,
    },
    /// Revoke every live token of an account
    Revoke {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.gateway.log_level);

    let store = Arc::new(open_store(&config)?);
    let auth = Arc::new(
        AuthService::from_store(store.clone(), config.token_ttl())
            .with_verifier(CredentialVerifier::new(config.auth.password_rounds))
            .with_min_password_len(config.auth.min_password_len),
    );

    match cli.command {
        Command::Serve => serve(&config, auth).await,
        Command::App {
            command: AppCommand::Add { id, name, secret },
        } => {
            if secret.is_empty() {
                anyhow::bail!("--secret must not be empty");
            }
            store
                .insert_app(id, &name, secret.as_bytes())
                .await
                .context("registering app")?;
            println!("app {id} ({name}) registered");
            Ok(())
        }
        Command::User { command } => match command {
            UserCommand::Promote { id } => set_role(&store, id, Role::Admin).await,
            UserCommand::Demote { id } => set_role(&store, id, Role::User).await,
            UserCommand::Revoke { id } => {
                let revoked = auth
                    .revoke_sessions(&RequestContext::background(), id)
                    .await
                    .context("revoking sessions")?;
                println!("revoked {revoked} token(s) for user {id}");
                Ok(())
            }
        },
        Command::Sweep => {
            let sweeper = Sweeper::new(auth.ledger(), auth.clock(), config.sweep_interval());
            let deleted = sweeper.sweep_once().await.context("sweeping ledger")?;
            println!("deleted {deleted} expired token record(s)");
            Ok(())
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = config.store.resolved_path()?;
    SqliteStore::open(
        &path,
        SqliteOptions {
            pool_size: config.store.pool_size,
            busy_timeout: config.store.busy_timeout(),
        },
    )
    .with_context(|| format!("opening store at {}", path.display()))
}

async fn set_role(store: &SqliteStore, id: i64, role: Role) -> Result<()> {
    store
        .set_role(id, role)
        .await
        .with_context(|| format!("setting role of user {id}"))?;
    println!("user {id} is now {role}");
    Ok(())
}

async fn serve(config: &Config, auth: Arc<AuthService>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let sweeper = if config.sweep.enabled {
        let sweeper = Sweeper::new(auth.ledger(), auth.clock(), config.sweep_interval());
        Some(sweeper.spawn(shutdown.child_token()))
    } else {
        tracing::warn!("token sweeper disabled; expired ledger rows will accumulate");
        None
    };

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
        signal.cancel();
    });

    let state = GatewayState::new(auth, config.request_timeout());
    gateway::serve(listener, state, shutdown.clone()).await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    tracing::info!("sso service stopped");
    Ok(())
}
