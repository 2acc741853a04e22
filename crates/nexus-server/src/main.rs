//! The `nexus` binary.
//!
//! Subcommands: `serve` (HTTP API plus scheduler), `reset-tables`,
//! `superuser`, `gen-pain` and `parse-camt`. The database location comes
//! from `LIBEUFIN_NEXUS_DB_CONNECTION`, a TOML config file, or the
//! `NEXUS_DB_CONNECTION` environment variable, in that order of
//! precedence.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use nexus_core::{
  clock::{Clock as _, SystemClock},
  initiation::{Creditor, PaymentIdentifiers, PaymentInitiation},
  store::{NexusStore as _, NexusUser},
};
use nexus_iso20022::{
  pain001::{DebtorAccount, Pain001Document, PainVersion},
  parse_camt,
};
use nexus_server::{AppState, auth::hash_password, router, scheduler};
use nexus_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Nexus EBICS banking middleware")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "nexus.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the HTTP API and the task scheduler.
  Serve {
    #[arg(long, default_value_t = 5001)]
    port: u16,
    /// Bind 127.0.0.1 instead of all interfaces.
    #[arg(long)]
    localhost_only: bool,
    /// Bind an IPv4 wildcard instead of the dual-stack one.
    #[arg(long)]
    ipv4_only: bool,
    /// Serve on a unix domain socket instead of TCP.
    #[arg(long)]
    unix_socket: Option<PathBuf>,
  },
  /// Drop and recreate every table.
  ResetTables,
  /// Create (or promote) a superuser. The password is read from
  /// `NEXUS_SUPERUSER_PASSWORD` or prompted on stdin.
  Superuser { username: String },
  /// Generate a sample pain.001 document on stdout.
  GenPain {
    #[arg(long)]
    iban: String,
    #[arg(long)]
    bic: Option<String>,
    #[arg(long)]
    name: String,
    /// `CURRENCY:VALUE`, e.g. `EUR:4.50`.
    #[arg(long)]
    amount: String,
    #[arg(long)]
    subject: String,
  },
  /// Parse a camt file and print the canonical entries as JSON.
  ParseCamt { file: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
  db_connection: Option<String>,
}

/// Resolve the database path from env and config, accepting the
/// `jdbc:sqlite:` and `sqlite://` prefixes found in deployed setups.
fn database_path(cli_config: &PathBuf) -> anyhow::Result<String> {
  if let Ok(uri) = std::env::var("LIBEUFIN_NEXUS_DB_CONNECTION") {
    return Ok(strip_db_prefix(&uri));
  }

  let settings: Settings = config::Config::builder()
    .add_source(config::File::from(cli_config.clone()).required(false))
    .add_source(config::Environment::with_prefix("NEXUS"))
    .build()
    .context("failed to read configuration")?
    .try_deserialize()
    .context("failed to deserialise configuration")?;

  Ok(
    settings
      .db_connection
      .map(|uri| strip_db_prefix(&uri))
      .unwrap_or_else(|| "nexus.sqlite3".to_owned()),
  )
}

fn strip_db_prefix(uri: &str) -> String {
  uri
    .strip_prefix("jdbc:sqlite:")
    .or_else(|| uri.strip_prefix("sqlite://"))
    .unwrap_or(uri)
    .to_owned()
}

fn read_password() -> anyhow::Result<String> {
  if let Ok(password) = std::env::var("NEXUS_SUPERUSER_PASSWORD") {
    return Ok(password);
  }
  use std::io::{self, BufRead as _, Write as _};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
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

  match cli.command {
    Command::Serve { port, localhost_only, ipv4_only, unix_socket } => {
      let db = database_path(&cli.config)?;
      let store = SqliteStore::open(&db)
        .await
        .with_context(|| format!("failed to open store at {db}"))?;
      let state = AppState::new(store);

      let (shutdown_tx, shutdown_rx) = watch::channel(false);
      let scheduler_handle =
        tokio::spawn(scheduler::run(state.clone(), shutdown_rx));

      let app = router(state);
      let serve_result = if let Some(path) = unix_socket {
        // A stale socket from a previous run blocks the bind.
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path)
          .with_context(|| format!("failed to bind {path:?}"))?;
        info!("listening on unix socket {path:?}");
        axum::serve(listener, app)
          .with_graceful_shutdown(shutdown_signal())
          .await
      } else {
        let host = match (localhost_only, ipv4_only) {
          (true, _) => "127.0.0.1",
          (false, true) => "0.0.0.0",
          (false, false) => "[::]",
        };
        let address = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&address)
          .await
          .with_context(|| format!("failed to bind {address}"))?;
        info!("listening on http://{address}");
        axum::serve(listener, app)
          .with_graceful_shutdown(shutdown_signal())
          .await
      };

      shutdown_tx.send(true).ok();
      scheduler_handle.await.ok();
      serve_result.context("server error")?;
    }

    Command::ResetTables => {
      let db = database_path(&cli.config)?;
      let store = SqliteStore::open(&db).await?;
      store.reset_tables().await?;
      info!("tables reset");
    }

    Command::Superuser { username } => {
      let db = database_path(&cli.config)?;
      let store = SqliteStore::open(&db).await?;
      let password = read_password()?;
      let hash = hash_password(&password)
        .map_err(|e| anyhow::anyhow!("cannot hash password: {e}"))?;
      store
        .upsert_user(NexusUser {
          username: username.clone(),
          password_hash: hash,
          superuser: true,
        })
        .await?;
      info!(%username, "superuser ready");
    }

    Command::GenPain { iban, bic, name, amount, subject } => {
      let clock = SystemClock;
      let now = clock.now();
      let initiation = PaymentInitiation {
        id: Uuid::new_v4(),
        bank_account: "sample".into(),
        preparation_date: now,
        submission_date: None,
        amount: amount.parse().map_err(|e| anyhow::anyhow!("{e}"))?,
        subject,
        creditor: Creditor { iban, bic, name },
        identifiers: PaymentIdentifiers::derive(now, 1, "sample"),
        submitted: false,
        invalid: false,
        confirmation_transaction_id: None,
        client_uid: None,
      };
      let debtor = DebtorAccount {
        name:      "Sample Debtor".into(),
        iban:      "DE00000000000000000000".into(),
        bank_code: "SAMPLEXX".into(),
      };
      let document =
        Pain001Document::render(PainVersion::V03, &debtor, &initiation, now);
      println!("{}", String::from_utf8_lossy(&document.bytes));
    }

    Command::ParseCamt { file } => {
      let xml = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read {file:?}"))?;
      let document = parse_camt(&xml).map_err(|e| anyhow::anyhow!("{e}"))?;
      let out = serde_json::json!({
        "messageId": document.message_id,
        "creationTimestamp": document.creation_timestamp,
        "droppedWithoutRef": document.dropped_without_ref,
        "entries": document.entries,
      });
      println!("{}", serde_json::to_string_pretty(&out)?);
    }
  }

  Ok(())
}

async fn shutdown_signal() {
  tokio::signal::ctrl_c().await.ok();
  info!("shutdown requested");
}
