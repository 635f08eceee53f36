//! `tokvault` CLI: command-line front end for the token vault and TOTP engine.
//!
//! Every subcommand maps onto one library operation. Results go to stdout
//! one value per line so they compose with shell pipelines; errors go to
//! stderr and the process exits non-zero.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::io::Read as _;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokvault_core::{CryptoCodec, EncryptionKey, Expiry, TotpConfig, TotpEngine, Vault};
use tokvault_storage::{MemoryRepository, TokenRepository};
use tracing::info;

use crate::config::{CliConfig, KEY_VAR, StorageBackendType};

// ── CLI structure ────────────────────────────────────────────────────

/// tokvault: tokenize sensitive values and manage TOTP codes.
#[derive(Parser)]
#[command(
    name = "tokvault",
    version,
    about = "tokvault CLI: tokenize sensitive values, manage token lifecycle, and generate or verify TOTP codes",
    long_about = None,
    after_help = "Environment variables:\n  \
         TOKVAULT_ENCRYPTION_KEY   64 hex chars or base64:<key> (required for vault commands)\n  \
         TOKVAULT_CIPHER           cbc or gcm (default: cbc)\n  \
         TOKVAULT_STORAGE          memory, redb, or postgres (default: redb)\n  \
         TOKVAULT_STORAGE_PATH     redb file (default: ./tokvault.redb)\n  \
         TOKVAULT_LOG_LEVEL        log filter (default: warn)\n\n\
         Examples:\n  \
         export TOKVAULT_ENCRYPTION_KEY=$(tokvault keygen)\n  \
         tokvault tokenize 'card 4111 1111 1111 1111'\n  \
         tokvault totp verify <secret> 123456 --drift"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new 256-bit encryption key (hex).
    Keygen,
    /// Encrypt a payload and print the token that stands in for it.
    Tokenize {
        /// Value to protect. Read from stdin when omitted.
        payload: Option<String>,
        /// Absolute expiry (RFC 3339). Defaults to now plus the configured TTL.
        #[arg(long, value_parser = parse_rfc3339, conflicts_with = "no_expiry")]
        expires_at: Option<DateTime<Utc>>,
        /// Issue a token that never expires.
        #[arg(long)]
        no_expiry: bool,
    },
    /// Print the original payload for a token.
    Detokenize {
        /// 32-character hex token.
        token: String,
    },
    /// Permanently revoke a token.
    Revoke {
        /// 32-character hex token.
        token: String,
    },
    /// Show token metadata as JSON (never the payload).
    Inspect {
        /// 32-character hex token.
        token: String,
    },
    /// Print whether a token has expired.
    Expired {
        /// 32-character hex token.
        token: String,
    },
    /// Count one use of a token without reading its payload.
    TrackUsage {
        /// 32-character hex token.
        token: String,
    },
    /// Time-based one-time password operations.
    Totp {
        #[command(subcommand)]
        action: TotpCommands,
    },
}

#[derive(Subcommand)]
enum TotpCommands {
    /// Generate a new shared secret (hex).
    Secret,
    /// Print the OTP for a secret.
    Code {
        /// Hex-encoded shared secret.
        secret: String,
        /// Unix time to compute the code for (default: now).
        #[arg(long)]
        at: Option<i64>,
    },
    /// Check an OTP. Exits 0 when valid, 1 otherwise.
    Verify {
        /// Hex-encoded shared secret.
        secret: String,
        /// Candidate code.
        otp: String,
        /// Also accept the codes of the adjacent time steps.
        #[arg(long)]
        drift: bool,
        /// Unix time to verify at (default: now).
        #[arg(long)]
        at: Option<i64>,
    },
    /// Print an otpauth:// enrollment URI.
    Uri {
        /// Hex-encoded shared secret.
        secret: String,
        /// Service name shown in the authenticator.
        #[arg(long)]
        issuer: String,
        /// Account label shown in the authenticator.
        #[arg(long)]
        account: String,
    },
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config::log_level())),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: Commands) -> Result<ExitCode> {
    match cmd {
        Commands::Keygen => cmd_keygen(),
        Commands::Totp { action } => {
            let totp = config::totp_config_from_env().context("invalid configuration")?;
            return cmd_totp(totp, action);
        }
        Commands::Tokenize {
            payload,
            expires_at,
            no_expiry,
        } => {
            let vault = vault_from_env().await?;
            cmd_tokenize(&vault, payload, expires_at, no_expiry).await?;
        }
        Commands::Detokenize { token } => {
            let payload = vault_from_env().await?.detokenize(&token).await?;
            println!("{payload}");
        }
        Commands::Revoke { token } => {
            let changed = vault_from_env().await?.revoke(&token).await?;
            println!("{}", if changed { "revoked" } else { "unchanged" });
        }
        Commands::Inspect { token } => {
            let metadata = vault_from_env().await?.inspect(&token).await?;
            let json = serde_json::to_string_pretty(&metadata)
                .context("failed to render token metadata")?;
            println!("{json}");
        }
        Commands::Expired { token } => {
            println!("{}", vault_from_env().await?.is_expired(&token).await?);
        }
        Commands::TrackUsage { token } => {
            vault_from_env().await?.track_usage(&token).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ── Vault commands ───────────────────────────────────────────────────

fn cmd_keygen() {
    let key = EncryptionKey::generate();
    println!("{}", key.to_hex().as_str());
}

async fn cmd_tokenize(
    vault: &Vault,
    payload: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    no_expiry: bool,
) -> Result<()> {
    let payload = match payload {
        Some(p) => p,
        None => read_stdin_payload()?,
    };
    let expiry = match (expires_at, no_expiry) {
        (Some(at), _) => Expiry::At(at),
        (None, true) => Expiry::Never,
        (None, false) => Expiry::Default,
    };
    let token = vault.tokenize(&payload, expiry).await?;
    println!("{token}");
    Ok(())
}

/// Read the payload from stdin, dropping one trailing line ending.
fn read_stdin_payload() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read payload from stdin")?;
    if buf.ends_with('\n') {
        buf.pop();
        if buf.ends_with('\r') {
            buf.pop();
        }
    }
    Ok(buf)
}

async fn vault_from_env() -> Result<Vault> {
    let config = CliConfig::from_env().context("invalid configuration")?;
    let key = config::encryption_key_from_env()
        .with_context(|| format!("{KEY_VAR} must hold the vault key"))?;
    let codec = CryptoCodec::new(key, config.cipher);
    let repo = open_repository(&config.storage_backend).await?;
    Ok(Vault::new(repo, codec, config.vault)?)
}

async fn open_repository(backend: &StorageBackendType) -> Result<Arc<dyn TokenRepository>> {
    let repo: Arc<dyn TokenRepository> = match backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (tokens will not persist)");
            Arc::new(MemoryRepository::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            Arc::new(
                tokvault_storage::RedbRepository::open(path)
                    .with_context(|| format!("failed to open redb at {path}"))?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            Arc::new(
                tokvault_storage::PostgresRepository::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    };
    Ok(repo)
}

// ── TOTP commands ────────────────────────────────────────────────────

fn cmd_totp(totp: TotpConfig, action: TotpCommands) -> Result<ExitCode> {
    let engine = TotpEngine::new(totp)?;
    match action {
        TotpCommands::Secret => println!("{}", TotpEngine::generate_secret_key()),
        TotpCommands::Code { secret, at } => {
            let step = engine.time_step_at(instant(at)?);
            println!("{}", engine.compute_otp(&secret, step)?);
        }
        TotpCommands::Verify {
            secret,
            otp,
            drift,
            at,
        } => {
            let at = instant(at)?;
            let valid = if drift {
                engine.verify_with_drift_at(&secret, &otp, at)?
            } else {
                engine.verify_at(&secret, &otp, at)?
            };
            println!("{}", if valid { "valid" } else { "invalid" });
            if !valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        TotpCommands::Uri {
            secret,
            issuer,
            account,
        } => println!("{}", engine.enrollment_uri(&secret, &issuer, &account)),
    }
    Ok(ExitCode::SUCCESS)
}

fn instant(at: Option<i64>) -> Result<DateTime<Utc>> {
    match at {
        Some(secs) => match DateTime::from_timestamp(secs, 0) {
            Some(dt) => Ok(dt),
            None => bail!("--at {secs} is out of range"),
        },
        None => Ok(Utc::now()),
    }
}
