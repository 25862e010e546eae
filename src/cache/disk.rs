use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use log::{debug, warn};
use lru::LruCache;
use xxhash_rust::xxh64::xxh64;

use crate::cache::{Cache, Entry};
use crate::headers::Headers;

/// Default disk budget: 5 MiB.
pub const DEFAULT_DISK_CACHE_BYTES: u64 = 5 * 1024 * 1024;

/// Magic number identifying a cache file.
const CACHE_MAGIC: u32 = 0x2015_0306;

/// Default eviction target as a fraction of the budget.
pub const DEFAULT_HYSTERESIS_FACTOR: f32 = 0.9;

/// Upper bound on any length prefix read back from disk; longer means the
/// file is corrupt.
const MAX_FIELD_BYTES: u64 = 16 * 1024 * 1024;

/// A file-per-entry [`Cache`] with an in-memory LRU index.
///
/// Each entry is one file in the root directory, named by the hash of its
/// key; the file header echoes the key, so a hash collision is detected on
/// read and degrades to a miss. `initialize` rebuilds the index by scanning
/// the directory and dropping unreadable files — a crash between header and
/// body writes leaves a file the magic/length checks reject on the next
/// start. Before each write, least-recently-used entries are evicted until
/// the new total fits within the hysteresis fraction of the budget
/// (default [`DEFAULT_HYSTERESIS_FACTOR`]).
///
/// All operations serialize on one internal lock; index updates are atomic
/// with the corresponding file operation.
pub struct DiskCache {
    root: PathBuf,
    max_size: u64,
    hysteresis: f32,
    state: Mutex<DiskState>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

struct DiskState {
    /// key → file size, in access order.
    index: LruCache<String, u64>,
    total_size: u64,
    initialized: bool,
}

impl DiskCache {
    /// Creates a cache rooted at `root` with the default 5 MiB budget.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_size(root, DEFAULT_DISK_CACHE_BYTES)
    }

    /// Creates a cache rooted at `root` with an explicit byte budget.
    pub fn with_max_size(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
            hysteresis: DEFAULT_HYSTERESIS_FACTOR,
            state: Mutex::new(DiskState {
                index: LruCache::unbounded(),
                total_size: 0,
                initialized: false,
            }),
        }
    }

    /// Overrides the eviction target ratio (default 0.9): writes evict
    /// least-recently-used entries until the new total fits within
    /// `max_size × factor`.
    pub fn with_hysteresis(mut self, factor: f32) -> Self {
        self.hysteresis = factor.clamp(0.1, 1.0);
        self
    }

    /// Bytes currently accounted to the cache.
    pub fn total_size(&self) -> u64 {
        self.state.lock().expect("disk cache poisoned").total_size
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{:016x}", xxh64(key.as_bytes(), 0)))
    }

    fn delete_file(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("could not delete cache file {}: {err}", path.display());
            }
        }
    }

    fn evict_for(&self, state: &mut DiskState, needed: u64) {
        if state.total_size + needed < self.max_size {
            return;
        }
        let before = state.total_size;
        let target = (self.max_size as f32 * self.hysteresis) as u64;
        while state.total_size + needed > target {
            let Some((key, size)) = state.index.pop_lru() else { break };
            self.delete_file(&self.path_for(&key));
            state.total_size -= size;
        }
        debug!(
            "evicted {} bytes to make room for {needed}",
            before - state.total_size
        );
    }
}

impl Cache for DiskCache {
    fn initialize(&self) {
        let mut state = self.state.lock().expect("disk cache poisoned");
        if state.initialized {
            return;
        }
        state.initialized = true;
        if let Err(err) = fs::create_dir_all(&self.root) {
            warn!(
                "could not create cache directory {}: {err}",
                self.root.display()
            );
            return;
        }
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("could not scan cache directory: {err}");
                return;
            }
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            let size = match dir_entry.metadata() {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => continue,
            };
            let key = File::open(&path)
                .and_then(|file| read_header(&mut BufReader::new(file)))
                .map(|(key, _)| key);
            match key {
                Ok(key) => {
                    state.index.put(key, size);
                    state.total_size += size;
                }
                Err(err) => {
                    warn!(
                        "dropping unreadable cache file {}: {err}",
                        path.display()
                    );
                    self.delete_file(&path);
                }
            }
        }
        debug!(
            "cache initialized: {} entries, {} bytes",
            state.index.len(),
            state.total_size
        );
    }

    fn get(&self, key: &str) -> Option<Entry> {
        let mut state = self.state.lock().expect("disk cache poisoned");
        // touch the index so the LRU order reflects this access
        state.index.get(key)?;
        let path = self.path_for(key);
        let loaded = File::open(&path)
            .and_then(|file| read_entry(&mut BufReader::new(file)));
        match loaded {
            Ok((stored_key, entry)) if stored_key == key => Some(entry),
            Ok((stored_key, _)) => {
                warn!(
                    "cache file {} holds key {stored_key:?}, expected {key:?}",
                    path.display()
                );
                self.delete_file(&path);
                if let Some(size) = state.index.pop(key) {
                    state.total_size -= size;
                }
                None
            }
            Err(err) => {
                warn!("dropping corrupt cache file {}: {err}", path.display());
                self.delete_file(&path);
                if let Some(size) = state.index.pop(key) {
                    state.total_size -= size;
                }
                None
            }
        }
    }

    fn put(&self, key: &str, entry: Entry) {
        let mut state = self.state.lock().expect("disk cache poisoned");
        let mut encoded = Vec::new();
        if write_entry(&mut encoded, key, &entry).is_err() {
            return;
        }
        self.evict_for(&mut state, encoded.len() as u64);
        let path = self.path_for(key);
        let written = File::create(&path).and_then(|file| {
            let mut writer = BufWriter::new(file);
            writer.write_all(&encoded)?;
            writer.flush()
        });
        if let Err(err) = written {
            warn!("could not write cache file {}: {err}", path.display());
            self.delete_file(&path);
            if let Some(size) = state.index.pop(key) {
                state.total_size -= size;
            }
            return;
        }
        if let Some(previous) = state.index.put(key.to_string(), encoded.len() as u64)
        {
            state.total_size -= previous;
        }
        state.total_size += encoded.len() as u64;
    }

    fn remove(&self, key: &str) {
        let mut state = self.state.lock().expect("disk cache poisoned");
        self.delete_file(&self.path_for(key));
        if let Some(size) = state.index.pop(key) {
            state.total_size -= size;
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock().expect("disk cache poisoned");
        let keys: Vec<String> =
            state.index.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            self.delete_file(&self.path_for(&key));
        }
        state.index.clear();
        state.total_size = 0;
        debug!("cache cleared");
    }
}

fn write_u32(w: &mut impl Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_u64(w: &mut impl Write, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_string(w: &mut impl Write, value: &str) -> io::Result<()> {
    write_u32(w, value.len() as u32)?;
    w.write_all(value.as_bytes())
}

fn write_entry(w: &mut impl Write, key: &str, entry: &Entry) -> io::Result<()> {
    write_u32(w, CACHE_MAGIC)?;
    write_string(w, key)?;
    write_string(w, entry.etag.as_deref().unwrap_or(""))?;
    write_u64(w, entry.server_date)?;
    write_u64(w, entry.last_modified)?;
    write_u64(w, entry.ttl)?;
    write_u64(w, entry.soft_ttl)?;
    write_u32(w, entry.headers.len() as u32)?;
    for (name, value) in entry.headers.iter() {
        write_string(w, name)?;
        write_string(w, value)?;
    }
    w.write_all(&entry.data)
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    r.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_string(r: &mut impl Read) -> io::Result<String> {
    let len = u64::from(read_u32(r)?);
    if len > MAX_FIELD_BYTES {
        return Err(corrupt("string length out of bounds"));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| corrupt("invalid utf-8"))
}

fn corrupt(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

/// Reads everything up to (not including) the body. Returns the stored key
/// and the entry with an empty body.
fn read_header(r: &mut impl Read) -> io::Result<(String, Entry)> {
    if read_u32(r)? != CACHE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let key = read_string(r)?;
    let etag = read_string(r)?;
    let server_date = read_u64(r)?;
    let last_modified = read_u64(r)?;
    let ttl = read_u64(r)?;
    let soft_ttl = read_u64(r)?;
    let header_count = read_u32(r)?;
    if u64::from(header_count) > MAX_FIELD_BYTES {
        return Err(corrupt("header count out of bounds"));
    }
    let mut headers = Headers::new();
    for _ in 0..header_count {
        let name = read_string(r)?;
        let value = read_string(r)?;
        headers.insert(name, value);
    }
    Ok((
        key,
        Entry {
            data: Bytes::new(),
            etag: if etag.is_empty() { None } else { Some(etag) },
            server_date,
            last_modified,
            ttl,
            soft_ttl,
            headers,
        },
    ))
}

fn read_entry(r: &mut impl Read) -> io::Result<(String, Entry)> {
    let (key, mut entry) = read_header(r)?;
    let mut body = Vec::new();
    r.read_to_end(&mut body)?;
    entry.data = Bytes::from(body);
    Ok((key, entry))
}
