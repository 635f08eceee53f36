//! CLI configuration for `tokvault`.
//!
//! Loads settings from `TOKVAULT_*` environment variables. Unlike defaults
//! for paths and policy, the encryption key has no fallback: vault commands
//! refuse to run without one.

use chrono::Duration;
use tokvault_core::config::{DEFAULT_OTP_DIGITS, DEFAULT_OTP_STEP_SECS, DEFAULT_TOKEN_TTL_DAYS};
use tokvault_core::{CipherMode, ConfigError, EncryptionKey, TotpConfig, VaultConfig};
use zeroize::Zeroizing;

/// Environment variable holding the vault key.
pub const KEY_VAR: &str = "TOKVAULT_ENCRYPTION_KEY";

/// Default redb file when `TOKVAULT_STORAGE_PATH` is unset.
const DEFAULT_STORAGE_PATH: &str = "./tokvault.redb";

/// Default log filter when neither `RUST_LOG` nor `TOKVAULT_LOG_LEVEL` is set.
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Where token records live.
    pub storage_backend: StorageBackendType,
    /// Cipher used for newly tokenized payloads.
    pub cipher: CipherMode,
    /// Token lifecycle policy.
    pub vault: VaultConfig,
    /// OTP length and time step.
    pub totp: TotpConfig,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (records vanish when the process exits).
    Memory,
    /// Redb file storage.
    Redb { path: String },
    /// PostgreSQL.
    Postgres { url: String },
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TOKVAULT_STORAGE`: `memory`, `redb`, or `postgres` (default: `redb`)
    /// - `TOKVAULT_STORAGE_PATH`: redb file (default: `./tokvault.redb`)
    /// - `DATABASE_URL`: PostgreSQL connection string (required for `postgres`)
    /// - `TOKVAULT_CIPHER`: `cbc` or `gcm` (default: `cbc`)
    /// - `TOKVAULT_DEFAULT_TTL_DAYS`: token lifetime, `0` for none (default: `30`)
    /// - `TOKVAULT_CONCEAL_REVOKED`: report revoked tokens as not found (default: `false`)
    /// - `TOKVAULT_OTP_DIGITS`: OTP length, 6 to 8 (default: `6`)
    /// - `TOKVAULT_OTP_STEP`: TOTP step in seconds (default: `30`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first variable that is present but
    /// unusable, or when `DATABASE_URL` is missing for the postgres backend.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let storage_backend = match get("TOKVAULT_STORAGE")
            .unwrap_or_else(|| "redb".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            "redb" => StorageBackendType::Redb {
                path: get("TOKVAULT_STORAGE_PATH")
                    .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_owned()),
            },
            "postgres" | "postgresql" => StorageBackendType::Postgres {
                url: get("DATABASE_URL").ok_or_else(|| ConfigError::Missing {
                    name: "DATABASE_URL".to_owned(),
                })?,
            },
            other => {
                return Err(invalid(
                    "TOKVAULT_STORAGE",
                    format!("unknown backend '{other}' (expected memory, redb, or postgres)"),
                ));
            }
        };

        let cipher = match get("TOKVAULT_CIPHER") {
            Some(value) => value.parse()?,
            None => CipherMode::default(),
        };

        let ttl_days = parse_number::<i64>(
            "TOKVAULT_DEFAULT_TTL_DAYS",
            get("TOKVAULT_DEFAULT_TTL_DAYS"),
            DEFAULT_TOKEN_TTL_DAYS,
        )?;
        let default_ttl = match ttl_days {
            0 => None,
            days if days < 0 => {
                return Err(invalid(
                    "TOKVAULT_DEFAULT_TTL_DAYS",
                    "must not be negative".to_owned(),
                ));
            }
            days => Some(Duration::try_days(days).ok_or_else(|| {
                invalid("TOKVAULT_DEFAULT_TTL_DAYS", "out of range".to_owned())
            })?),
        };

        let vault = VaultConfig {
            default_ttl,
            conceal_revoked: parse_bool(
                "TOKVAULT_CONCEAL_REVOKED",
                get("TOKVAULT_CONCEAL_REVOKED"),
            )?,
        };
        vault.validate()?;

        let totp = totp_from_lookup(&lookup)?;

        Ok(Self {
            storage_backend,
            cipher,
            vault,
            totp,
        })
    }
}

/// Load only the TOTP settings (`TOKVAULT_OTP_DIGITS`, `TOKVAULT_OTP_STEP`).
///
/// TOTP commands use this so that storage settings they never touch cannot
/// make them fail.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSetting`] if either value is malformed or
/// out of range.
pub fn totp_config_from_env() -> Result<TotpConfig, ConfigError> {
    totp_from_lookup(|name| std::env::var(name).ok())
}

fn totp_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<TotpConfig, ConfigError> {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let totp = TotpConfig {
        digits: parse_number("TOKVAULT_OTP_DIGITS", get("TOKVAULT_OTP_DIGITS"), DEFAULT_OTP_DIGITS)?,
        step_secs: parse_number("TOKVAULT_OTP_STEP", get("TOKVAULT_OTP_STEP"), DEFAULT_OTP_STEP_SECS)?,
    };
    totp.validate()?;
    Ok(totp)
}

/// Read the vault key from `TOKVAULT_ENCRYPTION_KEY`.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] if the variable is unset or empty and
/// [`ConfigError::InvalidKey`] if it does not decode to 32 bytes.
pub fn encryption_key_from_env() -> Result<EncryptionKey, ConfigError> {
    parse_key(std::env::var(KEY_VAR).ok().map(Zeroizing::new))
}

/// Decode a key given as 64 hex characters or as `base64:<standard base64>`.
fn parse_key(raw: Option<Zeroizing<String>>) -> Result<EncryptionKey, ConfigError> {
    let raw = raw
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing {
            name: KEY_VAR.to_owned(),
        })?;
    match raw.trim().strip_prefix("base64:") {
        Some(encoded) => EncryptionKey::from_base64(encoded),
        None => EncryptionKey::from_hex(&raw),
    }
}

/// Log filter for the subscriber: `TOKVAULT_LOG_LEVEL` or `warn`.
#[must_use]
pub fn log_level() -> String {
    std::env::var("TOKVAULT_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned())
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| invalid(name, format!("'{v}' is not a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(v) = value else {
        return Ok(false);
    };
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, format!("'{v}' is not a boolean"))),
    }
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidSetting {
        name: name.to_owned(),
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<CliConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        CliConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(
            config.storage_backend,
            StorageBackendType::Redb {
                path: DEFAULT_STORAGE_PATH.to_owned()
            }
        );
        assert_eq!(config.cipher, CipherMode::Cbc);
        assert_eq!(config.vault, VaultConfig::default());
        assert_eq!(config.totp, TotpConfig::default());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("TOKVAULT_STORAGE", "memory"),
            ("TOKVAULT_CIPHER", "gcm"),
            ("TOKVAULT_DEFAULT_TTL_DAYS", "0"),
            ("TOKVAULT_CONCEAL_REVOKED", "yes"),
            ("TOKVAULT_OTP_DIGITS", "8"),
            ("TOKVAULT_OTP_STEP", "60"),
        ])
        .unwrap();
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.cipher, CipherMode::Gcm);
        assert_eq!(config.vault.default_ttl, None);
        assert!(config.vault.conceal_revoked);
        assert_eq!(config.totp.digits, 8);
        assert_eq!(config.totp.step_secs, 60);
    }

    #[test]
    fn postgres_requires_url() {
        let err = load(&[("TOKVAULT_STORAGE", "postgres")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));

        let config = load(&[
            ("TOKVAULT_STORAGE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/tokvault"),
        ])
        .unwrap();
        assert!(matches!(
            config.storage_backend,
            StorageBackendType::Postgres { .. }
        ));
    }

    #[test]
    fn rejects_bad_values() {
        for vars in [
            [("TOKVAULT_STORAGE", "rocksdb")],
            [("TOKVAULT_CIPHER", "des")],
            [("TOKVAULT_DEFAULT_TTL_DAYS", "-1")],
            [("TOKVAULT_DEFAULT_TTL_DAYS", "soon")],
            [("TOKVAULT_CONCEAL_REVOKED", "maybe")],
            [("TOKVAULT_OTP_DIGITS", "9")],
            [("TOKVAULT_OTP_STEP", "0")],
        ] {
            assert!(load(&vars).is_err(), "{vars:?}");
        }
    }

    #[test]
    fn totp_settings_ignore_storage() {
        let vars: HashMap<&str, &str> = [
            ("TOKVAULT_STORAGE", "postgres"),
            ("TOKVAULT_OTP_DIGITS", "7"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| vars.get(name).map(|v| (*v).to_owned());

        assert!(CliConfig::from_lookup(lookup).is_err());
        let totp = totp_from_lookup(lookup).unwrap();
        assert_eq!(totp.digits, 7);
        assert_eq!(totp.step_secs, DEFAULT_OTP_STEP_SECS);
    }

    #[test]
    fn huge_ttl_is_rejected() {
        let err = load(&[("TOKVAULT_DEFAULT_TTL_DAYS", "100000000")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn key_is_required() {
        assert!(matches!(parse_key(None), Err(ConfigError::Missing { .. })));
        assert!(matches!(
            parse_key(Some(Zeroizing::new("  ".to_owned()))),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn key_formats() {
        let hex_key = "00".repeat(32);
        assert!(parse_key(Some(Zeroizing::new(hex_key))).is_ok());

        let b64_key = format!("base64:{}", "A".repeat(43) + "=");
        assert!(parse_key(Some(Zeroizing::new(b64_key))).is_ok());

        let short = "00".repeat(16);
        assert!(matches!(
            parse_key(Some(Zeroizing::new(short))),
            Err(ConfigError::InvalidKey { .. })
        ));
    }
}
