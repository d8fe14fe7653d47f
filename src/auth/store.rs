use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token::TokenRecord;
use crate::error::AuthError;

const TOKEN_FILE_VERSION: u32 = 1;

/// Durable storage of at most one [`TokenRecord`] per realm.
///
/// `save` must replace the whole record atomically: after a failed save,
/// `load` returns either the previous complete record or `None`.
pub trait TokenStore: Send + Sync {
    fn load(&self, realm: &str) -> Result<Option<TokenRecord>, AuthError>;
    fn save(&self, record: &TokenRecord) -> Result<(), AuthError>;
    fn clear(&self, realm: &str) -> Result<(), AuthError>;
}

/// Configuration for file-backed token storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

impl Default for TokenStoreConfig {
    /// `~/.ledger-oauth/tokens`, or a relative directory when no home exists.
    fn default() -> Self {
        Self::new(default_store_dir())
    }
}

/// File-backed token store, one TOML file per realm.
///
/// Writes go to a temporary sibling file that is fsynced and renamed over the
/// target, so a crash mid-save never leaves a half-written record.
///
/// # Example
/// ```no_run
/// use chrono::{Duration, Utc};
/// use ledger_oauth::auth::{FileTokenStore, TokenRecord, TokenStore};
///
/// let store = FileTokenStore::new_default();
/// let record = TokenRecord {
///     access_token: "access".to_string(),
///     refresh_token: "refresh".to_string(),
///     access_expires_at: Utc::now() + Duration::hours(1),
///     refresh_expires_at: None,
///     realm: "9341454425005330".to_string(),
///     issued_at: Utc::now(),
/// };
/// store.save(&record)?;
/// # Ok::<(), ledger_oauth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    pub fn new_default() -> Self {
        Self::new(TokenStoreConfig::default())
    }

    fn record_path(&self, realm: &str) -> Result<PathBuf, AuthError> {
        if realm.is_empty() {
            return Err(AuthError::InvalidCallback("realm is missing".to_string()));
        }
        Ok(self.base_dir.join(format!("{}.toml", encode_realm(realm))))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, realm: &str) -> Result<Option<TokenRecord>, AuthError> {
        let path = self.record_path(realm)?;
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: TokenFile = toml::from_str(&raw)?;
        if file.version != TOKEN_FILE_VERSION {
            return Err(AuthError::Persistence(format!(
                "Unsupported token file version {} at {}",
                file.version,
                path.display()
            )));
        }
        if file.record.realm != realm {
            return Err(AuthError::Persistence(format!(
                "Token file {} belongs to realm {}",
                path.display(),
                file.record.realm
            )));
        }
        file.record.validate()?;
        Ok(Some(file.record))
    }

    fn save(&self, record: &TokenRecord) -> Result<(), AuthError> {
        record.validate()?;
        let file = TokenFile {
            version: TOKEN_FILE_VERSION,
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let serialized = toml::to_string(&file)?;
        atomic_write(&self.record_path(&record.realm)?, serialized.as_bytes())
    }

    fn clear(&self, realm: &str) -> Result<(), AuthError> {
        match fs::remove_file(self.record_path(realm)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    saved_at: DateTime<Utc>,
    record: TokenRecord,
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        AuthError::Persistence(format!("Token path {} has no file name", path.display()))
    })?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    replace_file(path, &path.with_file_name(temp_name), data)
}

/// Write `data` to `temp_path`, fsync it and rename it over `path`.
///
/// On any failure the temp file is removed and `path` is left untouched.
fn replace_file(path: &Path, temp_path: &Path, data: &[u8]) -> Result<(), AuthError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(temp_path, path) {
        let _ = fs::remove_file(temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

fn default_store_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".ledger-oauth").join("tokens"))
        .unwrap_or_else(|| PathBuf::from(".ledger-oauth/tokens"))
}

/// File stem for a realm. Lowercase ASCII letters, digits, `-` and `_` are
/// kept; every other byte becomes `%xx`, so distinct realms never share a
/// file, even on case-insensitive filesystems.
fn encode_realm(realm: &str) -> String {
    let mut out = String::with_capacity(realm.len());
    for byte in realm.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02x}")),
        }
    }
    out
}
