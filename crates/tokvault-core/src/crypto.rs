//! Crypto codec for `tokvault`.
//!
//! Turns a payload into a storage-safe ciphertext blob and back. Two modes
//! are supported:
//!
//! - [`CipherMode::Cbc`]: AES-256-CBC with PKCS#7 padding and a fresh 16-byte
//!   IV per call. Confidentiality only: CBC has no integrity tag, so a
//!   tampered blob may decrypt to garbage instead of failing.
//! - [`CipherMode::Gcm`]: AES-256-GCM with a fresh 96-bit nonce per call.
//!   Authenticated: any modification makes decryption fail.
//!
//! # Blob format
//!
//! ```text
//! CBC: base64( base64(ciphertext) "::" iv )
//! GCM: base64( "gcm$" base64(ciphertext || tag) "::" nonce )
//! ```
//!
//! The inner ciphertext is base64 text, which never contains `:`, so the
//! first `::` is always the separator even though the IV is raw bytes. CBC
//! blobs use the same layout as OpenSSL's default (base64 output) mode, so
//! records written by other tooling in that format remain readable.
//! [`decrypt`] dispatches on the `gcm$` marker, which lets one store hold
//! blobs of both kinds.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ConfigError, CryptoError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Required key length for AES-256.
pub const KEY_LEN: usize = 32;

/// IV length for AES-CBC (one 128-bit block).
const CBC_IV_LEN: usize = 16;

/// Nonce length for AES-256-GCM (96 bits).
const GCM_NONCE_LEN: usize = 12;

const SEPARATOR: &[u8] = b"::";

const GCM_MARKER: &[u8] = b"gcm$";

/// A 256-bit encryption key that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a key from a byte slice of exactly [`KEY_LEN`] bytes.
    ///
    /// Short keys are rejected, never padded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] if the slice is empty or has the
    /// wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.is_empty() {
            return Err(ConfigError::InvalidKey {
                reason: "key is empty".to_owned(),
            });
        }
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| ConfigError::InvalidKey {
            reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self(array))
    }

    /// Decode a key from 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] if the input is not hex or does
    /// not decode to [`KEY_LEN`] bytes.
    pub fn from_hex(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(hex::decode(encoded.trim()).map_err(|_| {
            ConfigError::InvalidKey {
                reason: "key is not valid hex".to_owned(),
            }
        })?);
        Self::from_slice(&bytes)
    }

    /// Decode a key from standard base64.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] if the input is not base64 or does
    /// not decode to [`KEY_LEN`] bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|_| {
            ConfigError::InvalidKey {
                reason: "key is not valid base64".to_owned(),
            }
        })?);
        Self::from_slice(&bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Hex-encode the key for one-time display (e.g. by a key generator).
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Cipher mode used for new encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    /// AES-256-CBC, unauthenticated.
    #[default]
    Cbc,
    /// AES-256-GCM, authenticated.
    Gcm,
}

impl CipherMode {
    /// Whether the mode detects tampering.
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Gcm)
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbc => f.write_str("aes-256-cbc"),
            Self::Gcm => f.write_str("aes-256-gcm"),
        }
    }
}

impl FromStr for CipherMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbc" | "aes-256-cbc" => Ok(Self::Cbc),
            "gcm" | "aes-256-gcm" => Ok(Self::Gcm),
            other => Err(ConfigError::InvalidSetting {
                name: "cipher".to_owned(),
                reason: format!("unknown cipher mode '{other}' (expected cbc or gcm)"),
            }),
        }
    }
}

/// A key plus the mode used for new encryptions.
///
/// Decryption always follows the marker in the blob, not `mode`.
#[derive(Debug, Clone)]
pub struct CryptoCodec {
    key: EncryptionKey,
    mode: CipherMode,
}

impl CryptoCodec {
    /// Create a codec. Selecting [`CipherMode::Cbc`] logs a warning, since
    /// blobs written in that mode cannot detect tampering.
    #[must_use]
    pub fn new(key: EncryptionKey, mode: CipherMode) -> Self {
        if !mode.is_authenticated() {
            warn!(
                cipher = %mode,
                "codec configured with an unauthenticated cipher; tampered ciphertext will not be detected"
            );
        }
        Self { key, mode }
    }

    /// The mode used for new encryptions.
    #[must_use]
    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Encrypt `plaintext` into a blob.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        encrypt(&self.key, self.mode, plaintext)
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// See [`decrypt`].
    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        decrypt(&self.key, blob)
    }
}

/// Encrypt `plaintext` under `key` with a fresh random IV/nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the cipher fails.
pub fn encrypt(
    key: &EncryptionKey,
    mode: CipherMode,
    plaintext: &[u8],
) -> Result<String, CryptoError> {
    match mode {
        CipherMode::Cbc => {
            let mut iv = [0u8; CBC_IV_LEN];
            OsRng.fill_bytes(&mut iv);
            let ciphertext = cbc_encrypt(key, &iv, plaintext)?;
            Ok(seal_envelope(None, &ciphertext, &iv))
        }
        CipherMode::Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext =
                cipher
                    .encrypt(&nonce, plaintext)
                    .map_err(|e| CryptoError::Encryption {
                        reason: e.to_string(),
                    })?;
            Ok(seal_envelope(Some(GCM_MARKER), &ciphertext, &nonce))
        }
    }
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::Decode`] if the blob is not base64, the separator is
///   missing, or the IV has the wrong length.
/// - [`CryptoError::Decryption`] if the key is wrong, padding is invalid, or
///   (in GCM mode) the tag does not verify.
pub fn decrypt(key: &EncryptionKey, blob: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let envelope = open_envelope(blob)?;

    let plaintext = match envelope.mode {
        CipherMode::Cbc => Aes256CbcDec::new_from_slices(key.as_bytes(), &envelope.iv)
            .map_err(|_| CryptoError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(&envelope.ciphertext)
            .map_err(|_| CryptoError::Decryption)?,
        CipherMode::Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
            cipher
                .decrypt(Nonce::from_slice(&envelope.iv), envelope.ciphertext.as_slice())
                .map_err(|_| CryptoError::Decryption)?
        }
    };
    Ok(Zeroizing::new(plaintext))
}

fn cbc_encrypt(key: &EncryptionKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let encryptor =
        Aes256CbcEnc::new_from_slices(key.as_bytes(), iv).map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// A decoded blob.
struct Envelope {
    mode: CipherMode,
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
}

fn seal_envelope(marker: Option<&[u8]>, ciphertext: &[u8], iv: &[u8]) -> String {
    let encoded = STANDARD.encode(ciphertext);
    let marker = marker.unwrap_or_default();
    let mut inner = Vec::with_capacity(
        marker.len() + encoded.len() + SEPARATOR.len() + iv.len(),
    );
    inner.extend_from_slice(marker);
    inner.extend_from_slice(encoded.as_bytes());
    inner.extend_from_slice(SEPARATOR);
    inner.extend_from_slice(iv);
    STANDARD.encode(inner)
}

fn open_envelope(blob: &str) -> Result<Envelope, CryptoError> {
    let inner = STANDARD.decode(blob).map_err(|_| CryptoError::Decode {
        reason: "blob is not valid base64".to_owned(),
    })?;

    let (mode, body) = match inner.strip_prefix(GCM_MARKER) {
        Some(rest) => (CipherMode::Gcm, rest),
        None => (CipherMode::Cbc, inner.as_slice()),
    };

    let split = body
        .windows(SEPARATOR.len())
        .position(|w| w == SEPARATOR)
        .ok_or_else(|| CryptoError::Decode {
            reason: "separator not found".to_owned(),
        })?;
    let (encoded, rest) = body.split_at(split);
    let iv = rest.get(SEPARATOR.len()..).unwrap_or_default();

    let expected_iv = match mode {
        CipherMode::Cbc => CBC_IV_LEN,
        CipherMode::Gcm => GCM_NONCE_LEN,
    };
    if iv.len() != expected_iv {
        return Err(CryptoError::Decode {
            reason: format!("expected {expected_iv}-byte IV, got {}", iv.len()),
        });
    }

    let ciphertext = STANDARD.decode(encoded).map_err(|_| CryptoError::Decode {
        reason: "ciphertext is not valid base64".to_owned(),
    })?;

    Ok(Envelope {
        mode,
        ciphertext,
        iv: iv.to_vec(),
    })
}
