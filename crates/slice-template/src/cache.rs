/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled-artifact caching.
//!
//! [`ByteCache`] is the storage collaborator: a string-keyed byte store that
//! records when each entry was written. [`CacheGate`] sits on top of it and
//! decides, per template, whether a stored program may be reused or the
//! source must be recompiled.

use crate::directive::DirectiveRegistry;
use crate::error::{TemplateError, TemplateResult};
use crate::resolver::{ResolvedTemplate, TemplateResolver};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// Metadata stored alongside a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was written.
    pub mtime: SystemTime,
}

/// A string-keyed byte store.
///
/// Implementations must tolerate concurrent readers; concurrent writers to
/// the same key resolve as last-writer-wins. A `ttl` of zero means the entry
/// never expires.
pub trait ByteCache: Send + Sync {
    fn get(&self, key: &str) -> TemplateResult<Option<Vec<u8>>>;

    fn metadata(&self, key: &str) -> TemplateResult<Option<CacheMetadata>>;

    fn save(&self, key: &str, bytes: &[u8], ttl: Duration) -> TemplateResult<()>;
}

fn expired(mtime: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    !ttl.is_zero() && mtime + ttl < now
}

// ── In-memory ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    metadata: CacheMetadata,
    ttl: Duration,
}

/// Process-local cache behind an `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> Option<MemoryEntry> {
        // Entries are plain bytes, so a poisoned lock still holds usable data.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|e| !expired(e.metadata.mtime, e.ttl, SystemTime::now()))
            .cloned()
    }

    /// Overwrite an entry's recorded write time.
    pub fn set_mtime(&self, key: &str, mtime: SystemTime) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) => {
                entry.metadata.mtime = mtime;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteCache for MemoryCache {
    fn get(&self, key: &str) -> TemplateResult<Option<Vec<u8>>> {
        Ok(self.live_entry(key).map(|e| e.bytes))
    }

    fn metadata(&self, key: &str) -> TemplateResult<Option<CacheMetadata>> {
        Ok(self.live_entry(key).map(|e| e.metadata))
    }

    fn save(&self, key: &str, bytes: &[u8], ttl: Duration) -> TemplateResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: bytes.to_vec(),
                metadata: CacheMetadata {
                    mtime: SystemTime::now(),
                },
                ttl,
            },
        );
        Ok(())
    }
}

// ── Filesystem ──────────────────────────────────────────────────────────────

/// First line of every cache file.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    metadata: CacheMetadata,
    ttl_secs: u64,
}

/// Cache that stores one file per key in a directory.
///
/// Each file holds a one-line JSON envelope (write time and TTL) followed by
/// the raw bytes. Writes go through a temporary file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FileSystemCache {
    dir: PathBuf,
}

impl FileSystemCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read_failure(key: &str, message: impl ToString) -> TemplateError {
        TemplateError::CacheReadFailure {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Open an entry and read its envelope. `None` when absent or expired.
    fn open(&self, key: &str) -> TemplateResult<Option<(Envelope, BufReader<std::fs::File>)>> {
        let file = match std::fs::File::open(self.entry_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::read_failure(key, e)),
        };
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader
            .read_line(&mut header)
            .map_err(|e| Self::read_failure(key, e))?;
        let envelope: Envelope = serde_json::from_str(header.trim_end())
            .map_err(|e| Self::read_failure(key, format!("malformed envelope: {e}")))?;

        let ttl = Duration::from_secs(envelope.ttl_secs);
        if expired(envelope.metadata.mtime, ttl, SystemTime::now()) {
            return Ok(None);
        }
        Ok(Some((envelope, reader)))
    }
}

impl ByteCache for FileSystemCache {
    fn get(&self, key: &str) -> TemplateResult<Option<Vec<u8>>> {
        let Some((_, mut reader)) = self.open(key)? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| Self::read_failure(key, e))?;
        Ok(Some(bytes))
    }

    fn metadata(&self, key: &str) -> TemplateResult<Option<CacheMetadata>> {
        Ok(self.open(key)?.map(|(envelope, _)| envelope.metadata))
    }

    fn save(&self, key: &str, bytes: &[u8], ttl: Duration) -> TemplateResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let envelope = Envelope {
            metadata: CacheMetadata {
                mtime: SystemTime::now(),
            },
            ttl_secs: ttl.as_secs(),
        };
        let header = serde_json::to_string(&envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(header.as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(bytes)?;
        file.persist(self.entry_path(key)).map_err(|e| e.error)?;
        Ok(())
    }
}

// ── Null ────────────────────────────────────────────────────────────────────

/// Cache that stores nothing; every compile runs the full pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl ByteCache for NullCache {
    fn get(&self, _key: &str) -> TemplateResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn metadata(&self, _key: &str) -> TemplateResult<Option<CacheMetadata>> {
        Ok(None)
    }

    fn save(&self, _key: &str, _bytes: &[u8], _ttl: Duration) -> TemplateResult<()> {
        Ok(())
    }
}

// ── Gate ────────────────────────────────────────────────────────────────────

/// Cache key for a resolved template: `slice-` + hex SHA-256 of its path.
pub fn cache_key(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    format!("slice-{:x}", digest)
}

/// Per-template reuse policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Serve any cached artifact without checking the source.
    Trust,
    /// Serve a cached artifact only if it is at least as new as the source.
    Validate,
}

/// Decides between a cached program and a fresh compile.
pub struct CacheGate<'a> {
    pub resolver: &'a dyn TemplateResolver,
    pub cache: &'a dyn ByteCache,
    pub directives: &'a DirectiveRegistry,
    pub policy: CachePolicy,
    pub ttl: Duration,
}

impl CacheGate<'_> {
    /// Program text for `name`, compiling on a miss or when stale.
    pub fn compile(&self, name: &str) -> TemplateResult<String> {
        let template = self.resolver.resolve(name)?;
        let key = cache_key(&template.path);

        if let Some(program) = self.cached(&template, &key) {
            tracing::debug!(template = %name, %key, "serving cached program");
            return Ok(program);
        }

        tracing::debug!(template = %name, %key, "compiling template");
        let source = self.resolver.load(&template)?;
        let program = crate::compiler::compile_source(&source, self.directives)?;
        if let Err(e) = self.cache.save(&key, program.as_bytes(), self.ttl) {
            tracing::warn!(template = %name, error = %e, "failed to store compiled program");
        }
        Ok(program)
    }

    fn cached(&self, template: &ResolvedTemplate, key: &str) -> Option<String> {
        let fresh = match self.policy {
            CachePolicy::Trust => true,
            CachePolicy::Validate => {
                let metadata = match self.cache.metadata(key) {
                    Ok(Some(metadata)) => metadata,
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::warn!(error = %e, "cache metadata unreadable, recompiling");
                        return None;
                    }
                };
                match template.modified {
                    Some(source_mtime) => metadata.mtime >= source_mtime,
                    None => false,
                }
            }
        };
        if !fresh {
            tracing::debug!(template = %template.name, "cached program is stale");
            return None;
        }

        let bytes = match self.cache.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "cache entry unreadable, recompiling");
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(program) => Some(program),
            Err(_) => {
                tracing::warn!(%key, "cache entry is not UTF-8, recompiling");
                None
            }
        }
    }
}
