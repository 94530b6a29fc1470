//! Key stores, selected by name in the server configuration.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use gix_serve_core::AccessPermission;

use super::{KeyError, SshKey};

/// The error returned by [`KeyStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored key could not be parsed.
    #[error("{path}:{line}: {source}")]
    Key {
        /// The file containing the key.
        path: PathBuf,
        /// The 1-based line number.
        line: usize,
        /// The cause.
        #[source]
        source: KeyError,
    },
    /// The user name cannot be used to locate keys.
    #[error("invalid user name {0:?}")]
    InvalidUser(String),
    /// The store does not support changing keys.
    #[error("the key store is read-only")]
    ReadOnly,
    /// The configured strategy is unknown.
    #[error("unknown key manager {0:?}, expected one of 'memory', 'file' or 'readonly-file'")]
    UnknownStrategy(String),
}

/// Keeps the public keys of users, in the order they were added.
pub trait KeyStore: Send + Sync {
    /// The keys of `username`, in insertion order.
    fn keys(&self, username: &str) -> Result<Vec<SshKey>, StoreError>;
    /// Add `key`, or replace the equal key at its current position.
    fn add_key(&self, username: &str, key: SshKey) -> Result<(), StoreError>;
    /// Remove `key`, returning `true` if it was present.
    fn remove_key(&self, username: &str, key: &SshKey) -> Result<bool, StoreError>;
    /// Remove all keys, returning `true` if there were any.
    fn remove_all_keys(&self, username: &str) -> Result<bool, StoreError>;

    /// Return `true` if keys of `username` may be added and removed.
    fn supports_writing_keys(&self, _username: &str) -> bool {
        true
    }
    /// Return `true` if comments of keys of `username` may be changed.
    fn supports_comment_changes(&self, _username: &str) -> bool {
        true
    }
    /// Return `true` if permissions of keys of `username` may be changed.
    fn supports_permission_changes(&self, _username: &str) -> bool {
        true
    }
}

fn upsert(keys: &mut Vec<SshKey>, key: SshKey) {
    match keys.iter_mut().find(|existing| **existing == key) {
        Some(existing) => *existing = key,
        None => keys.push(key),
    }
}

/// Keys kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Vec<SshKey>>>,
}

impl KeyStore for MemoryKeyStore {
    fn keys(&self, username: &str) -> Result<Vec<SshKey>, StoreError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.get(username).cloned().unwrap_or_default())
    }

    fn add_key(&self, username: &str, key: SshKey) -> Result<(), StoreError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        upsert(keys.entry(username.to_owned()).or_default(), key);
        Ok(())
    }

    fn remove_key(&self, username: &str, key: &SshKey) -> Result<bool, StoreError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let Some(user_keys) = keys.get_mut(username) else {
            return Ok(false);
        };
        let before = user_keys.len();
        user_keys.retain(|existing| existing != key);
        Ok(user_keys.len() != before)
    }

    fn remove_all_keys(&self, username: &str) -> Result<bool, StoreError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.remove(username).is_some_and(|keys| !keys.is_empty()))
    }
}

/// Keys kept in `<directory>/<username>.keys`, one `<permission-code> <public key>` line per key.
///
/// Lines without a permission code grant the default permission, and lines starting with `#` are ignored.
#[derive(Debug)]
pub struct FileKeyStore {
    directory: PathBuf,
    writable: bool,
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Manage key files in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileKeyStore {
            directory: directory.into(),
            writable: true,
            write_lock: Mutex::new(()),
        }
    }

    /// Read key files in `directory`, which are maintained by other means.
    pub fn read_only(directory: impl Into<PathBuf>) -> Self {
        FileKeyStore {
            writable: false,
            ..Self::new(directory)
        }
    }

    fn path(&self, username: &str) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(username).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !username.contains(['/', '\\']) => {
                Ok(self.directory.join(format!("{username}.keys")))
            }
            _ => Err(StoreError::InvalidUser(username.to_owned())),
        }
    }

    fn read(&self, path: &Path) -> Result<Vec<SshKey>, StoreError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let key = parse_line(line).map_err(|source| StoreError::Key {
                path: path.to_owned(),
                line: index + 1,
                source,
            })?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn write(&self, path: &Path, keys: &[SshKey]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.directory)?;
        let mut text = String::new();
        for key in keys {
            text.push_str(key.permission().code());
            text.push(' ');
            text.push_str(key.raw_data());
            text.push('\n');
        }
        let tmp = path.with_extension("keys.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn modify<T>(&self, username: &str, edit: impl FnOnce(&mut Vec<SshKey>) -> T) -> Result<T, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }
        let path = self.path(username)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys = self.read(&path)?;
        let out = edit(&mut keys);
        self.write(&path, &keys)?;
        Ok(out)
    }
}

fn parse_line(line: &str) -> Result<SshKey, KeyError> {
    let with_permission = line.split_once(' ').and_then(|(code, raw)| {
        AccessPermission::ALL
            .into_iter()
            .find(|level| level.code() == code)
            .map(|level| (level, raw))
    });
    match with_permission {
        Some((permission, raw)) => SshKey::parse(raw)?.with_stored_permission(permission),
        None => SshKey::parse(line),
    }
}

impl KeyStore for FileKeyStore {
    fn keys(&self, username: &str) -> Result<Vec<SshKey>, StoreError> {
        let path = self.path(username)?;
        self.read(&path)
    }

    fn add_key(&self, username: &str, key: SshKey) -> Result<(), StoreError> {
        self.modify(username, |keys| upsert(keys, key))
    }

    fn remove_key(&self, username: &str, key: &SshKey) -> Result<bool, StoreError> {
        self.modify(username, |keys| {
            let before = keys.len();
            keys.retain(|existing| existing != key);
            keys.len() != before
        })
    }

    fn remove_all_keys(&self, username: &str) -> Result<bool, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }
        let path = self.path(username)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let had_keys = !self.read(&path)?.is_empty();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(had_keys),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn supports_writing_keys(&self, _username: &str) -> bool {
        self.writable
    }

    fn supports_comment_changes(&self, _username: &str) -> bool {
        self.writable
    }

    fn supports_permission_changes(&self, _username: &str) -> bool {
        self.writable
    }
}

/// The available key stores, as named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStoreKind {
    /// [`MemoryKeyStore`], named `memory`.
    Memory,
    /// [`FileKeyStore::new()`], named `file`.
    File,
    /// [`FileKeyStore::read_only()`], named `readonly-file`.
    ReadOnlyFile,
}

impl FromStr for KeyStoreKind {
    type Err = StoreError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name.trim().to_ascii_lowercase().as_str() {
            "memory" => KeyStoreKind::Memory,
            "file" => KeyStoreKind::File,
            "readonly-file" => KeyStoreKind::ReadOnlyFile,
            _ => return Err(StoreError::UnknownStrategy(name.to_owned())),
        })
    }
}

impl KeyStoreKind {
    /// Create the store, keeping files in `directory` if it uses any.
    pub fn open(self, directory: impl Into<PathBuf>) -> Arc<dyn KeyStore> {
        match self {
            KeyStoreKind::Memory => Arc::new(MemoryKeyStore::default()),
            KeyStoreKind::File => Arc::new(FileKeyStore::new(directory)),
            KeyStoreKind::ReadOnlyFile => Arc::new(FileKeyStore::read_only(directory)),
        }
    }
}
