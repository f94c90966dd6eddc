//! Vigil Agent -- TCP command protocol server for monitoring agents.
//!
//! Usage:
//!   vigil-agent                          # Run with default config
//!   vigil-agent --config path.toml run   # Run with custom config
//!   vigil-agent token create scheduler   # Mint a token for a role
//!   vigil-agent token revoke <id>
//!   vigil-agent token list

use std::sync::Arc;

use clap::{Parser, Subcommand};
use vigil_agent::commands::{builtin_registry, DisabledCamera};
use vigil_agent::config::AgentConfig;
use vigil_agent::connection::ConnectionSettings;
use vigil_agent::expand_tilde;
use vigil_agent::pipeline::Pipeline;
use vigil_agent::server::AgentServer;
use vigil_auth::{mint_token, TokenService};
use vigil_storage::{SqliteTokenStore, TokenRecord, TokenStore};

#[derive(Parser)]
#[command(name = "vigil-agent", about = "Vigil monitoring agent")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.vigil/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Run,
    /// Manage authentication tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Mint a token for a configured role; prints the credential once
    Create {
        /// Role name from [roles] in the config
        role: String,
        /// Lifetime in seconds (omit for no expiry)
        expires_seconds: Option<u64>,
    },
    /// Revoke a token by its id
    Revoke { token_id: String },
    /// List tokens (metadata only, never secrets)
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_agent=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = AgentConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Run) | None => run_agent(cfg).await?,
        Some(Commands::Token { action }) => {
            let store = open_store(&cfg)?;
            match action {
                TokenAction::Create {
                    role,
                    expires_seconds,
                } => token_create(&cfg, store.as_ref(), &role, expires_seconds)?,
                TokenAction::Revoke { token_id } => token_revoke(store.as_ref(), &token_id)?,
                TokenAction::List => token_list(store.as_ref())?,
            }
        }
    }

    Ok(())
}

fn open_store(cfg: &AgentConfig) -> anyhow::Result<Arc<SqliteTokenStore>> {
    let db_path = expand_tilde(&cfg.agent.database);
    Ok(Arc::new(SqliteTokenStore::open(&db_path)?))
}

async fn run_agent(cfg: AgentConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %cfg.agent.listen_addr,
        max_frame = cfg.protocol.max_frame_bytes,
        max_in_flight = cfg.limits.max_in_flight,
        "starting vigil-agent"
    );

    let store = open_store(&cfg)?;
    tracing::info!(db = %expand_tilde(&cfg.agent.database).display(), "token store opened");

    let tokens = TokenService::new(store);
    let registry = Arc::new(builtin_registry(&cfg, Arc::new(DisabledCamera)));
    let pipeline = Arc::new(Pipeline::new(registry, tokens, cfg.limits.max_in_flight));
    let settings = ConnectionSettings::from_config(&cfg);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let server = AgentServer::bind(&cfg.agent.listen_addr, pipeline, settings).await?;

    let serve_handle = tokio::spawn(server.serve(shutdown_tx.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());
    let _ = serve_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}

fn token_create(
    cfg: &AgentConfig,
    store: &dyn TokenStore,
    role: &str,
    expires_seconds: Option<u64>,
) -> anyhow::Result<()> {
    let Some(scopes) = cfg.role_scopes(role) else {
        let mut known: Vec<&str> = cfg.roles.keys().map(String::as_str).collect();
        known.sort_unstable();
        anyhow::bail!("unknown role: {role} (configured roles: {})", known.join(", "));
    };

    let minted = mint_token(store, scopes, expires_seconds)?;

    println!("Token created");
    println!();
    println!("  Token:   {}", minted.display);
    println!("  Role:    {role}");
    println!("  Scopes:  {}", minted.scopes.join(", "));
    println!("  Expires: {}", format_millis(minted.expires_at));
    println!();
    println!("Store this token securely. It cannot be recovered.");
    Ok(())
}

fn token_revoke(store: &dyn TokenStore, token_id: &str) -> anyhow::Result<()> {
    if store.mark_revoked(token_id)? {
        println!("Token {token_id} revoked");
        Ok(())
    } else {
        anyhow::bail!("token {token_id} not found or already revoked");
    }
}

fn token_list(store: &dyn TokenStore) -> anyhow::Result<()> {
    let tokens = store.list_tokens()?;
    if tokens.is_empty() {
        println!("No tokens registered");
        return Ok(());
    }

    println!(
        "{:<10} {:<30} {:<9} {:<20} {:<20}",
        "ID", "SCOPES", "STATUS", "CREATED", "EXPIRES"
    );
    for token in tokens {
        println!(
            "{:<10} {:<30} {:<9} {:<20} {:<20}",
            id_prefix(&token.token_id),
            token.scopes.join(","),
            token_status(&token),
            format_millis(Some(token.created_at)),
            format_millis(token.expires_at),
        );
    }
    Ok(())
}

fn token_status(token: &TokenRecord) -> &'static str {
    if token.revoked {
        "REVOKED"
    } else if token
        .expires_at
        .is_some_and(|at| chrono::Utc::now().timestamp_millis() > at)
    {
        "EXPIRED"
    } else {
        "ACTIVE"
    }
}

fn id_prefix(token_id: &str) -> &str {
    &token_id[..token_id.len().min(8)]
}

fn format_millis(ts: Option<i64>) -> String {
    match ts.and_then(chrono::DateTime::from_timestamp_millis) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => "never".into(),
    }
}
