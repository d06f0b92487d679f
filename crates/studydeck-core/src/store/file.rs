//! Directory-backed store: one JSON file per record.
//!
//! ```text
//! <root>/
//!   .lock                 (advisory lock held by merge and seed restore)
//!   records/
//!     practiceSeconds.json
//!     chat.maria.json
//! ```
//!
//! Keys are percent-encoded into file names so any key round-trips. An
//! encoded name too long for the filesystem is cut short and suffixed with
//! `~<sha256>`; those files wrap the value as `{"key": .., "value": ..}` so
//! the key can still be listed. Each write lands in a temp file in the same
//! directory and is renamed over the target, so a crash never leaves a
//! half-written record.

use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Store, StoreError};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, LockError, StoreLock};
use crate::notify::ChangeFeed;

const RECORDS_DIR: &str = "records";
const RECORD_EXT: &str = ".json";
const LOCK_FILE: &str = ".lock";
/// Common filesystem limit on one path component, in bytes.
const MAX_FILE_NAME: usize = 255;
const HASHED_PREFIX_LEN: usize = 120;
const HASH_MARK: char = '~';

/// Body of a record file whose name was hashed.
#[derive(Deserialize)]
struct Envelope {
    key: String,
    value: Value,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
    feed: ChangeFeed,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let records = root.join(RECORDS_DIR);
        fs::create_dir_all(&records).map_err(|source| StoreError::Io {
            path: records.clone(),
            source,
        })?;
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            feed: ChangeFeed::new(),
        })
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file, and whether its name is hashed.
    fn record_path(&self, key: &str) -> (PathBuf, bool) {
        let (name, hashed) = file_stem(key);
        (
            self.root.join(RECORDS_DIR).join(format!("{name}{RECORD_EXT}")),
            hashed,
        )
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let (path, hashed) = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let corrupt = |source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        };
        if !hashed {
            return serde_json::from_slice(&bytes).map(Some).map_err(corrupt);
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(corrupt)?;
        if envelope.key != key {
            return Err(StoreError::KeyCollision {
                key: key.to_string(),
                found: envelope.key,
            });
        }
        Ok(Some(envelope.value))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let (path, hashed) = self.record_path(key);
        let value = if hashed {
            json!({"key": key, "value": value})
        } else {
            value
        };
        let dir = self.root.join(RECORDS_DIR);
        let io_err = |source: io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };

        let bytes = serde_json::to_vec(&value).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let (path, _) = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(RECORDS_DIR);
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|name| name.strip_suffix(RECORD_EXT))
            else {
                continue;
            };
            let key = if stem.contains(HASH_MARK) {
                enveloped_key(&entry.path())
            } else {
                decode_key(stem)
            };
            match key {
                Some(key) => keys.push(key),
                None => tracing::warn!(file = %stem, "ignoring record file with undecodable name"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    fn lock(&self) -> Result<Option<StoreLock>, LockError> {
        StoreLock::acquire(&self.root.join(LOCK_FILE), self.lock_timeout).map(Some)
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.')
}

/// Percent-encode everything outside `[A-Za-z0-9._-]`. A leading dot is
/// encoded too so record files never shadow the lock file.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        if is_plain(byte) && !(i == 0 && byte == b'.') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// File name (without extension) for `key`, and whether it was hashed.
fn file_stem(key: &str) -> (String, bool) {
    let encoded = encode_key(key);
    if encoded.len() + RECORD_EXT.len() <= MAX_FILE_NAME {
        return (encoded, false);
    }
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    // `encoded` is ASCII, so any byte offset is a char boundary.
    (
        format!("{}{HASH_MARK}{}", &encoded[..HASHED_PREFIX_LEN], &digest[..32]),
        true,
    )
}

fn enveloped_key(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice::<Envelope>(&bytes).ok().map(|envelope| envelope.key)
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
