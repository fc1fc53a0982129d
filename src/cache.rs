//! Render Cache - gzip-compressed, TTL-bound rendered output.
//!
//! Entries are derived data. Every backend failure is logged and treated as
//! a miss, and an empty render is stored as such so it is never confused
//! with "not cached".

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::context::RenderContext;
use crate::hashing::render_cache_key;

/// Expiry for rendered SVG and converted PNG entries.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

const HASH_KEY_SUFFIX: &str = "_gz";
const FIELD_OUTPUT: &str = "o";
const FIELD_LENGTH: &str = "l";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generic keyed byte store with expiry.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// The hash-map capable interface, if this backend has one.
    fn hash_store(&self) -> Option<&dyn HashStore> {
        None
    }
}

/// Hash-map operations of a richer backend (Redis-like).
pub trait HashStore: Send + Sync {
    fn h_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    fn h_mset(&self, key: &str, fields: &[(&str, &[u8])]) -> Result<(), CacheError>;

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// gzip bytes plus the uncompressed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedOutput {
    pub data: Vec<u8>,
    pub length: usize,
}

impl CompressedOutput {
    pub fn compress(text: &[u8]) -> Result<Self, CacheError> {
        if text.is_empty() {
            return Ok(Self {
                data: Vec::new(),
                length: 0,
            });
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(text)?;
        Ok(Self {
            data: encoder.finish()?,
            length: text.len(),
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>, CacheError> {
        if self.data.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.length);
        GzDecoder::new(self.data.as_slice()).read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// What a lookup hands to the response layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedOutput {
    /// Passed through as a gzip-encoded body.
    Compressed(CompressedOutput),
    Plain(Vec<u8>),
}

impl CachedOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            CachedOutput::Compressed(c) => c.is_empty(),
            CachedOutput::Plain(p) => p.is_empty(),
        }
    }

    /// The uncompressed bytes; an undecodable entry reads as empty.
    pub fn into_plain(self) -> Vec<u8> {
        match self {
            CachedOutput::Plain(p) => p,
            CachedOutput::Compressed(c) => c.decompress().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding undecodable cached output");
                Vec::new()
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Store a fresh render; off when the client key did not validate.
    pub allow_write: bool,
    /// Hand back compressed bytes for passthrough.
    pub raw: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            allow_write: true,
            raw: false,
        }
    }
}

/// Render cache in front of a [`CacheBackend`].
#[derive(Clone)]
pub struct RenderCache {
    backend: Option<Arc<dyn CacheBackend>>,
    allow_cached: bool,
    modifier: String,
}

impl RenderCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            allow_cached: true,
            modifier: String::new(),
        }
    }

    /// No backend: every lookup renders.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            allow_cached: false,
            modifier: String::new(),
        }
    }

    pub fn with_allow_cached(mut self, allow_cached: bool) -> Self {
        self.allow_cached = allow_cached;
        self
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifier = modifier.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.allow_cached && self.backend.is_some()
    }

    pub fn key(&self, templates: &[String], ctx: &RenderContext) -> String {
        render_cache_key(
            templates,
            ctx.style_id(),
            ctx.style_last_modified(),
            ctx.language_id,
            &self.modifier,
        )
    }

    /// Cached output for `templates`, or `render()` stored and returned.
    ///
    /// `render` returning `None` means "nothing to serve"; it is not cached.
    pub fn get_or_render<F>(
        &self,
        templates: &[String],
        ctx: &RenderContext,
        options: LookupOptions,
        render: F,
    ) -> Option<CachedOutput>
    where
        F: FnOnce() -> Option<String>,
    {
        let backend = match &self.backend {
            Some(backend) if self.allow_cached => backend.as_ref(),
            _ => return render().map(|text| CachedOutput::Plain(text.into_bytes())),
        };

        let key = self.key(templates, ctx);
        if let Some((hit, plain)) = self.lookup(backend, &key) {
            tracing::debug!(%key, "svg cache hit");
            return Some(if options.raw {
                CachedOutput::Compressed(hit)
            } else {
                CachedOutput::Plain(plain)
            });
        }

        tracing::debug!(%key, "svg cache miss");
        let text = render()?;
        let compressed = match CompressedOutput::compress(text.as_bytes()) {
            Ok(compressed) => compressed,
            Err(err) => {
                tracing::warn!(%key, error = %err, "failed to compress svg output");
                return Some(CachedOutput::Plain(text.into_bytes()));
            }
        };

        if options.allow_write {
            if let Err(err) = store(backend, &key, &compressed) {
                tracing::warn!(%key, error = %err, "failed to store svg output");
            }
        }

        if options.raw {
            Some(CachedOutput::Compressed(compressed))
        } else {
            Some(CachedOutput::Plain(text.into_bytes()))
        }
    }

    /// Plain byte entry under `key`, or `produce()` stored and returned.
    /// Empty results are not stored.
    pub fn get_or_produce_bytes<F>(&self, key: &str, produce: F) -> Vec<u8>
    where
        F: FnOnce() -> Vec<u8>,
    {
        let backend = match &self.backend {
            Some(backend) if self.allow_cached => backend.as_ref(),
            _ => return produce(),
        };

        match backend.get(key) {
            Ok(Some(bytes)) if !bytes.is_empty() => return bytes,
            Ok(_) => {}
            Err(err) => tracing::warn!(%key, error = %err, "byte cache lookup failed"),
        }

        let bytes = produce();
        if !bytes.is_empty() {
            if let Err(err) = backend.set(key, &bytes, CACHE_TTL) {
                tracing::warn!(%key, error = %err, "failed to store bytes");
            }
        }
        bytes
    }

    /// A verified hit with its decoded bytes. Undecodable entries are misses.
    fn lookup(&self, backend: &dyn CacheBackend, key: &str) -> Option<(CompressedOutput, Vec<u8>)> {
        let result = match backend.hash_store() {
            Some(hashes) => lookup_hash(hashes, key),
            None => lookup_plain(backend, key),
        };
        let verified = result.and_then(|hit| hit.map(|output| verify(key, output)).transpose());
        verified.unwrap_or_else(|err| {
            tracing::warn!(%key, error = %err, "svg cache lookup failed");
            None
        })
    }
}

/// Decode a stored entry and check it against its recorded length.
fn verify(key: &str, output: CompressedOutput) -> Result<(CompressedOutput, Vec<u8>), CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let plain = output
        .decompress()
        .map_err(|err| corrupt(format!("undecodable gzip data: {}", err)))?;
    if plain.len() != output.length {
        return Err(corrupt(format!(
            "length {} does not match recorded {}",
            plain.len(),
            output.length
        )));
    }
    Ok((output, plain))
}

fn lookup_hash(hashes: &dyn HashStore, key: &str) -> Result<Option<CompressedOutput>, CacheError> {
    let hash_key = format!("{}{}", key, HASH_KEY_SUFFIX);
    let mut fields = hashes.h_get_all(&hash_key)?;
    if fields.is_empty() {
        return Ok(None);
    }

    let corrupt = |reason: &str| CacheError::Corrupt {
        key: hash_key.clone(),
        reason: reason.to_string(),
    };
    let length = fields.get(FIELD_LENGTH).ok_or_else(|| corrupt("missing length"))?;
    let length = std::str::from_utf8(length)
        .ok()
        .and_then(|l| l.parse::<usize>().ok())
        .ok_or_else(|| corrupt("invalid length"))?;
    let data = fields.remove(FIELD_OUTPUT).unwrap_or_default();

    Ok(Some(CompressedOutput { data, length }))
}

fn lookup_plain(backend: &dyn CacheBackend, key: &str) -> Result<Option<CompressedOutput>, CacheError> {
    let Some(data) = backend.get(key)? else {
        return Ok(None);
    };
    if data.is_empty() {
        return Ok(Some(CompressedOutput { data, length: 0 }));
    }
    let length = gzip_length(&data).ok_or_else(|| CacheError::Corrupt {
        key: key.to_string(),
        reason: "truncated gzip data".to_string(),
    })?;
    Ok(Some(CompressedOutput { data, length }))
}

/// Uncompressed size from the gzip ISIZE trailer.
fn gzip_length(data: &[u8]) -> Option<usize> {
    if data.len() < 18 {
        return None;
    }
    let trailer: [u8; 4] = data[data.len() - 4..].try_into().ok()?;
    Some(u32::from_le_bytes(trailer) as usize)
}

fn store(backend: &dyn CacheBackend, key: &str, output: &CompressedOutput) -> Result<(), CacheError> {
    match backend.hash_store() {
        Some(hashes) => {
            let hash_key = format!("{}{}", key, HASH_KEY_SUFFIX);
            let length = output.length.to_string();
            hashes.h_mset(
                &hash_key,
                &[(FIELD_OUTPUT, output.data.as_slice()), (FIELD_LENGTH, length.as_bytes())],
            )?;
            hashes.expire(&hash_key, CACHE_TTL)
        }
        None => backend.set(key, &output.data, CACHE_TTL),
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process backend. With [`with_hash_store`](Self::with_hash_store) it
/// also serves the hash-map interface.
#[derive(Debug, Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, Entry<Vec<u8>>>>,
    hashes: Mutex<HashMap<String, Entry<HashMap<String, Vec<u8>>>>>,
    hash_store: bool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash_store() -> Self {
        Self {
            hash_store: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let values = self.values.lock().map(|v| v.values().filter(|e| e.live(now)).count());
        let hashes = self.hashes.lock().map(|h| h.values().filter(|e| e.live(now)).count());
        values.unwrap_or(0) + hashes.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("memory cache lock poisoned".to_string())
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let values = self.values.lock().map_err(poisoned)?;
        Ok(values
            .get(key)
            .filter(|e| e.live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut values = self.values.lock().map_err(poisoned)?;
        let now = Instant::now();
        values.retain(|_, e| e.live(now));
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    fn hash_store(&self) -> Option<&dyn HashStore> {
        if self.hash_store {
            Some(self)
        } else {
            None
        }
    }
}

impl HashStore for MemoryCache {
    fn h_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let hashes = self.hashes.lock().map_err(poisoned)?;
        Ok(hashes
            .get(key)
            .filter(|e| e.live(Instant::now()))
            .map(|e| e.value.clone())
            .unwrap_or_default())
    }

    fn h_mset(&self, key: &str, fields: &[(&str, &[u8])]) -> Result<(), CacheError> {
        let mut hashes = self.hashes.lock().map_err(poisoned)?;
        let now = Instant::now();
        hashes.retain(|_, e| e.live(now));
        let entry = hashes.entry(key.to_string()).or_insert_with(|| Entry {
            value: HashMap::new(),
            expires_at: None,
        });
        for (field, value) in fields {
            entry.value.insert(field.to_string(), value.to_vec());
        }
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut hashes = self.hashes.lock().map_err(poisoned)?;
        if let Some(entry) = hashes.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
