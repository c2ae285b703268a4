//! Content-addressed asset cache.
//!
//! Rasterizing SVG icons is cheap per icon but adds up across a CV full of
//! them, and in watch mode the same icons are resolved on every rebuild.
//! The cache skips that work when neither the source bytes nor the requested
//! resolution changed.
//!
//! ## Cache keys
//!
//! Lookups are by `"{source_hash}:{params_hash}"`, never by path:
//!
//! - **`source_hash`**: SHA-256 of the source file contents. Editing an icon
//!   changes its hash; renaming or moving it does not.
//! - **`params_hash`**: SHA-256 of the requested [`Resolution`]. Changing
//!   `dpi` or the pixel box re-rasterizes.
//!
//! ## Lifetime
//!
//! One cache is owned by the [`Builder`](crate::build::Builder) and shared
//! (by reference) with the parallel resolver threads. It lives as long as
//! the builder, so in watch mode it spans rebuilds. [`AssetCache::sweep`]
//! drops entries not touched since the previous sweep, so icons removed
//! from the CV don't pin memory forever.

use super::ResolvedAsset;
use crate::model::Resolution;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
struct Slot {
    asset: Arc<ResolvedAsset>,
    touched: bool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    stats: CacheStats,
}

/// Thread-safe in-memory cache of resolved assets.
#[derive(Debug, Default)]
pub struct AssetCache {
    inner: Mutex<Inner>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached asset for `(source_hash, resolution)`, or build it
    /// with `produce` and remember the result. Errors are not cached.
    pub fn get_or_insert_with<E>(
        &self,
        source_hash: &str,
        resolution: Resolution,
        produce: impl FnOnce() -> Result<ResolvedAsset, E>,
    ) -> Result<Arc<ResolvedAsset>, E> {
        let key = content_key(source_hash, resolution);
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = inner.entries.get_mut(&key) {
                slot.touched = true;
                let asset = Arc::clone(&slot.asset);
                inner.stats.hit();
                return Ok(asset);
            }
        }

        // Produce outside the lock so parallel resolvers don't serialize.
        let asset = Arc::new(produce()?);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.stats.miss();
        inner.entries.insert(
            key,
            Slot {
                asset: Arc::clone(&asset),
                touched: true,
            },
        );
        Ok(asset)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries unused since the last sweep and reset the touch marks.
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| slot.touched);
        for slot in inner.entries.values_mut() {
            slot.touched = false;
        }
        before - inner.entries.len()
    }

    /// Hit/miss counts since the last call, resetting them.
    pub fn take_stats(&self) -> CacheStats {
        std::mem::take(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner).stats)
    }
}

fn content_key(source_hash: &str, resolution: Resolution) -> String {
    format!("{}:{}", source_hash, hash_resolution_params(resolution))
}

/// SHA-256 of raw bytes, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of the requested output resolution.
pub fn hash_resolution_params(resolution: Resolution) -> String {
    let mut hasher = Sha256::new();
    match resolution {
        Resolution::Dpi(dpi) => {
            hasher.update(b"dpi\0");
            hasher.update(dpi.to_le_bytes());
        }
        Resolution::Pixels { width, height } => {
            hasher.update(b"pixels\0");
            hasher.update(width.to_le_bytes());
            hasher.update(height.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Summary of cache performance for a build run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} resolved ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} resolved", self.misses)
        }
    }
}
