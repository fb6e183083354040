//! Directory-backed asset store.
//!
//! Layout under the store root:
//!
//! ```text
//! MANIFEST          magic + format version
//! LOCK              exclusive lock held while the store is open
//! assets/ab/<id>    one file per asset, sharded by the first id byte
//! board.snapshot    the board snapshot
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! reader sees either the previous record or the complete new one.

use super::AssetStore;
use crate::error::{BoardError, Result};
use crate::snapshot::BoardSnapshot;
use crate::types::{AssetId, AssetInfo, AssetRecord, Clock, SystemClock, Timestamp};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"MBD\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for asset files.
const ASSET_MAGIC: &[u8; 4] = b"AST\0";

/// Current asset file format version.
const ASSET_VERSION: u8 = 1;

/// Magic bytes for the snapshot file.
const SNAPSHOT_MAGIC: &[u8; 4] = b"BSN\0";

/// Current snapshot file format version.
const SNAPSHOT_FILE_VERSION: u8 = 1;

const SNAPSHOT_FILE: &str = "board.snapshot";

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Root directory of the store.
    pub path: PathBuf,

    /// Asset cache size (number of records).
    pub asset_cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum total bytes of asset files, if limited.
    pub quota_bytes: Option<u64>,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./board-store"),
            asset_cache_size: 64,
            create_if_missing: true,
            quota_bytes: None,
        }
    }
}

/// Per-asset metadata stored ahead of the payload.
#[derive(Serialize, Deserialize)]
struct AssetHeader {
    mime_type: String,
    created_at: i64,
    /// Hex SHA-256 of the payload.
    digest: String,
}

/// Asset store rooted in a directory.
pub struct FileAssetStore {
    config: FileStoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// LRU cache for recently read records.
    cache: Mutex<LruCache<AssetId, AssetRecord>>,

    clock: Arc<dyn Clock>,
}

impl FileAssetStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: FileStoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(BoardError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: FileStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        fs::create_dir_all(config.path.join("assets"))?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        Ok(Self::assemble(config, lock_file))
    }

    /// Open an existing store.
    pub fn open(config: FileStoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        fs::create_dir_all(config.path.join("assets"))?;
        Ok(Self::assemble(config, lock_file))
    }

    /// Stamp `created_at` from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn assemble(config: FileStoreConfig, lock_file: File) -> Self {
        let cache_size = NonZeroUsize::new(config.asset_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cache_size)),
            config,
            _lock_file: lock_file,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Total size of all asset files on disk.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for entry in fs::read_dir(self.assets_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for asset_entry in fs::read_dir(entry.path())? {
                    total += asset_entry?.metadata()?.len();
                }
            }
        }
        Ok(total)
    }

    fn assets_dir(&self) -> PathBuf {
        self.config.path.join("assets")
    }

    fn shard_path(&self, id: &AssetId) -> PathBuf {
        self.assets_dir().join(id.shard_prefix())
    }

    fn asset_path(&self, id: &AssetId) -> PathBuf {
        self.shard_path(id).join(id.to_string())
    }

    fn encode_asset(record: &AssetRecord) -> Result<Vec<u8>> {
        let header = AssetHeader {
            mime_type: record.mime_type.clone(),
            created_at: record.created_at.0,
            digest: hex::encode(Sha256::digest(&record.payload)),
        };
        let header_bytes = rmp_serde::to_vec(&header)?;

        let mut out = Vec::with_capacity(record.payload.len() + header_bytes.len() + 32);
        out.extend_from_slice(ASSET_MAGIC);
        out.push(ASSET_VERSION);
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&(record.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&record.payload);
        out.extend_from_slice(&crc32fast::hash(&record.payload).to_le_bytes());
        Ok(out)
    }

    /// Read magic, version and header. Leaves `file` positioned at the content length.
    fn read_header(file: &mut File) -> Result<AssetHeader> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ASSET_MAGIC {
            return Err(BoardError::InvalidFormat("Invalid asset magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ASSET_VERSION {
            return Err(BoardError::InvalidFormat(format!(
                "Unsupported asset version: {}",
                version[0]
            )));
        }

        let mut header_len_bytes = [0u8; 4];
        file.read_exact(&mut header_len_bytes)?;
        let header_len = u32::from_le_bytes(header_len_bytes) as u64;

        let header_bytes = read_sized(file, header_len, "asset header")?;
        Ok(rmp_serde::from_slice(&header_bytes)?)
    }

    fn read_asset(&self, id: &AssetId, path: &Path) -> Result<AssetRecord> {
        let mut file = File::open(path)?;
        let header = Self::read_header(&mut file)?;

        let mut content_len_bytes = [0u8; 8];
        file.read_exact(&mut content_len_bytes)?;
        let content_len = u64::from_le_bytes(content_len_bytes);

        let payload = read_sized(&mut file, content_len, "asset payload")?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(BoardError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let digest = hex::encode(Sha256::digest(&payload));
        if digest != header.digest {
            return Err(BoardError::DigestMismatch {
                expected: header.digest,
                got: digest,
            });
        }

        Ok(AssetRecord {
            id: *id,
            payload,
            mime_type: header.mime_type,
            created_at: Timestamp(header.created_at),
        })
    }

    fn read_info(&self, id: AssetId, path: &Path) -> Result<AssetInfo> {
        let mut file = File::open(path)?;
        let header = Self::read_header(&mut file)?;

        let mut content_len_bytes = [0u8; 8];
        file.read_exact(&mut content_len_bytes)?;

        Ok(AssetInfo {
            id,
            mime_type: header.mime_type,
            created_at: Timestamp(header.created_at),
            size: u64::from_le_bytes(content_len_bytes),
        })
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(BoardError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(BoardError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| BoardError::Locked)?;

        Ok(lock_file)
    }
}

/// Read `len` bytes at the current position. Lengths past the end of the
/// file are rejected before anything is allocated.
fn read_sized(file: &mut File, len: u64, what: &str) -> Result<Vec<u8>> {
    let remaining = file
        .metadata()?
        .len()
        .saturating_sub(file.stream_position()?);
    if len > remaining {
        return Err(BoardError::InvalidFormat(format!(
            "{what} length {len} exceeds the {remaining} bytes left in the file"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

impl AssetStore for FileAssetStore {
    fn put(&self, payload: &[u8], mime_type: &str) -> Result<AssetId> {
        if let Some(limit) = self.config.quota_bytes {
            let needed = self.total_size()? + payload.len() as u64;
            if needed > limit {
                return Err(BoardError::QuotaExceeded { needed, limit });
            }
        }

        let id = AssetId::generate();
        let record = AssetRecord {
            id,
            payload: payload.to_vec(),
            mime_type: mime_type.to_string(),
            created_at: self.clock.now(),
        };

        let bytes = Self::encode_asset(&record)?;
        write_atomic(&self.asset_path(&id), &bytes)?;
        debug!(asset = %id, size = payload.len(), "asset stored");

        self.cache.lock().put(id, record);
        Ok(id)
    }

    fn get(&self, id: &AssetId) -> Result<Option<AssetRecord>> {
        if let Some(cached) = self.cache.lock().get(id).cloned() {
            return Ok(Some(cached));
        }

        let path = self.asset_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let record = self.read_asset(id, &path)?;
        self.cache.lock().put(*id, record.clone());
        Ok(Some(record))
    }

    fn contains(&self, id: &AssetId) -> Result<bool> {
        if self.cache.lock().contains(id) {
            return Ok(true);
        }
        Ok(self.asset_path(id).exists())
    }

    fn delete(&self, id: &AssetId) -> Result<bool> {
        self.cache.lock().pop(id);

        match fs::remove_file(self.asset_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_all(&self) -> Result<Vec<AssetInfo>> {
        let mut infos = Vec::new();

        for entry in fs::read_dir(self.assets_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for asset_entry in fs::read_dir(entry.path())? {
                let asset_entry = asset_entry?;
                let filename = asset_entry.file_name();
                let Ok(id) = AssetId::parse(&filename.to_string_lossy()) else {
                    continue;
                };
                match self.read_info(id, &asset_entry.path()) {
                    Ok(info) => infos.push(info),
                    Err(e) => warn!(asset = %id, error = %e, "skipping unreadable asset"),
                }
            }
        }

        Ok(infos)
    }

    fn save_snapshot(&self, snapshot: &BoardSnapshot) -> Result<()> {
        let body = snapshot.to_bytes()?;

        let mut out = Vec::with_capacity(body.len() + 17);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.push(SNAPSHOT_FILE_VERSION);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

        write_atomic(&self.config.path.join(SNAPSHOT_FILE), &out)?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<BoardSnapshot>> {
        let path = self.config.path.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(BoardError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_FILE_VERSION {
            return Err(BoardError::InvalidFormat(format!(
                "Unsupported snapshot file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let body = read_sized(&mut file, len, "snapshot body")?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&body);
        if stored_checksum != computed_checksum {
            return Err(BoardError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        BoardSnapshot::from_bytes(&body).map(Some)
    }
}
