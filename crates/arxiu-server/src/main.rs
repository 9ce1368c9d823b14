//! arxiu server binary.
//!
//! Loads configuration, opens the SQLite store, starts the import worker
//! and the sync scheduler, and serves the JSON API under `/api`.
//!
//! # Seeding users
//!
//! ```text
//! arxiu --hash-password                       # prints a PHC string
//! arxiu add-user anna anna@example.org admin  # prompts for the password
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use arxiu_api::AppState;
use arxiu_core::user::UserRole;
use arxiu_engine::Engine;
use arxiu_gramps::SecretBox;
use arxiu_store_sqlite::SqliteStore;
use axum::Router;
use clap::{Parser, Subcommand};
use rand_core::OsRng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "arxiu genealogy server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Create a user; the password is read from stdin.
  AddUser {
    username: String,
    email:    String,
    #[arg(default_value = "user")]
    role:     UserRole,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    println!("{}", hash_password(&read_password()?)?);
    return Ok(());
  }

  let server_cfg = ServerConfig::load(&cli.config)?;
  let secrets = SecretBox::from_secret(server_cfg.secret()?)
    .context("ESP_GRAMPS_SECRET is not a usable key")?;

  let store = SqliteStore::open(&server_cfg.database_path).await.with_context(|| {
    format!("failed to open store at {}", server_cfg.database_path.display())
  })?;
  let engine = Arc::new(Engine::new(Arc::new(store), server_cfg.engine_config(), secrets));

  if let Some(Command::AddUser { username, email, role }) = cli.command {
    let hash = hash_password(&read_password()?)?;
    let user = engine
      .register_user(&username, &email, &hash, role)
      .await
      .context("failed to create user")?;
    println!("created user {} (id {})", user.username, user.id);
    return Ok(());
  }

  let shutdown = CancellationToken::new();
  let worker = tokio::spawn(engine.clone().run_import_worker(shutdown.child_token()));
  let scheduler = tokio::spawn(engine.clone().run_sync_scheduler(shutdown.child_token()));

  let state = AppState { engine, shutdown: shutdown.clone() };
  let app = Router::new().nest("/api", arxiu_api::router(state)).layer(TraceLayer::new_for_http());

  let address = server_cfg.address();
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  tracing::info!("listening on http://{address}");

  let signal = shutdown.clone();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
      }
      tracing::info!("shutting down");
      signal.cancel();
    })
    .await
    .context("server error")?;

  shutdown.cancel();
  let _ = tokio::join!(worker, scheduler);
  Ok(())
}

fn hash_password(password: &str) -> anyhow::Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Ok(
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string(),
  )
}

fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  let password = line.trim_end_matches(['\n', '\r']).to_owned();
  anyhow::ensure!(!password.is_empty(), "empty password");
  Ok(password)
}
