//! Directory-backed key-value store.

use super::KeyValueStore;
use crate::error::{CartError, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for value files.
const VALUE_MAGIC: &[u8; 4] = b"KVS\0";

/// Current value file format version.
const VALUE_VERSION: u8 = 1;

/// Extension of committed value files.
const VALUE_EXT: &str = "kv";

/// Extension of in-flight writes.
const TEMP_EXT: &str = "tmp";

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding the value files.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./cart-data"),
            create_if_missing: true,
        }
    }
}

/// Key-value store keeping one checksummed file per key.
///
/// File layout:
///
/// ```text
/// magic "KVS\0" | version u8 | key_len u16 | key | value_len u64 | value | crc32(value) u32
/// ```
///
/// All integers are little-endian. File names are the SHA-256 hex of the key,
/// so arbitrary keys (including `@scope:name` forms) map to safe names. The
/// directory is held under an exclusive lock for the lifetime of the store.
pub struct FileStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Serializes writers so temp files are never shared.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store directory, creating it if configured to.
    pub fn open(config: FileStoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(CartError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        Ok(Self {
            path: config.path,
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory this store writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| CartError::Locked)?;

        Ok(lock_file)
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}.{}", key_file_stem(key), VALUE_EXT))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}.{}", key_file_stem(key), TEMP_EXT))
    }

    fn read_value(path: &Path, key: &str) -> Result<String> {
        let mut file = File::open(path)?;

        // Read and verify magic
        let mut magic = [0u8; 4];
        read_exact(&mut file, &mut magic)?;
        if &magic != VALUE_MAGIC {
            return Err(CartError::InvalidFormat("Invalid value file magic".into()));
        }

        // Read version
        let mut version = [0u8; 1];
        read_exact(&mut file, &mut version)?;
        if version[0] != VALUE_VERSION {
            return Err(CartError::InvalidFormat(format!(
                "Unsupported value file version: {}",
                version[0]
            )));
        }

        // Read key
        let mut key_len_bytes = [0u8; 2];
        read_exact(&mut file, &mut key_len_bytes)?;
        let key_len = u16::from_le_bytes(key_len_bytes) as u64;
        ensure_remaining(&mut file, key_len, "key")?;

        let mut key_bytes = vec![0u8; key_len as usize];
        read_exact(&mut file, &mut key_bytes)?;
        let stored_key = String::from_utf8_lossy(&key_bytes).into_owned();
        if stored_key != key {
            return Err(CartError::KeyMismatch {
                expected: key.to_string(),
                found: stored_key,
            });
        }

        // Read value
        let mut value_len_bytes = [0u8; 8];
        read_exact(&mut file, &mut value_len_bytes)?;
        let value_len = u64::from_le_bytes(value_len_bytes);
        // Value plus trailing checksum must fit in what is left of the file
        ensure_remaining(&mut file, value_len.saturating_add(4), "value")?;

        let mut value = vec![0u8; value_len as usize];
        read_exact(&mut file, &mut value)?;

        // Read and verify checksum
        let mut checksum_bytes = [0u8; 4];
        read_exact(&mut file, &mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&value);

        if stored_checksum != computed_checksum {
            return Err(CartError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        String::from_utf8(value)
            .map_err(|e| CartError::InvalidFormat(format!("Value is not UTF-8: {}", e)))
    }

    fn write_value(path: &Path, key: &str, value: &str) -> Result<()> {
        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
            CartError::Storage(format!("Key too long: {} bytes", key_bytes.len()))
        })?;
        let value_bytes = value.as_bytes();

        let mut file = File::create(path)?;

        file.write_all(VALUE_MAGIC)?;
        file.write_all(&[VALUE_VERSION])?;

        file.write_all(&key_len.to_le_bytes())?;
        file.write_all(key_bytes)?;

        file.write_all(&(value_bytes.len() as u64).to_le_bytes())?;
        file.write_all(value_bytes)?;

        let checksum = crc32fast::hash(value_bytes);
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.value_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_value(&path, key).map(Some)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.write_lock.lock();

        let temp = self.temp_path(key);
        if let Err(e) = Self::write_value(&temp, key, value) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        fs::rename(&temp, self.value_path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let _lock = self.write_lock.lock();

        let path = self.value_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// File name stem for a key.
fn key_file_stem(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fail unless at least `needed` bytes remain after the current position.
fn ensure_remaining(file: &mut File, needed: u64, field: &str) -> Result<()> {
    let remaining = file
        .metadata()?
        .len()
        .saturating_sub(file.stream_position()?);
    if needed > remaining {
        return Err(CartError::InvalidFormat(format!(
            "{} length exceeds file size ({} > {})",
            field, needed, remaining
        )));
    }
    Ok(())
}

/// `read_exact` that reports a short file as a format error.
fn read_exact(file: &mut File, buf: &mut [u8]) -> Result<()> {
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CartError::InvalidFormat("Truncated value file".into()),
        _ => CartError::Io(e),
    })
}
