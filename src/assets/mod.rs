//! Asset resolver: [`AssetReference`] → embeddable [`ResolvedAsset`].
//!
//! | Source | `Dpi` | `Pixels` |
//! |--------|-------|----------|
//! | `.svg` | rasterized at `dpi / 96` | rasterized to fit the box |
//! | png, jpg, webp, gif | validated, passed through | resized (Lanczos3), re-encoded as PNG |
//!
//! A missing or undecodable asset never fails the build. [`resolve_all`]
//! reports it as a warning and maps the id to [`ResolvedAsset::placeholder`].
//!
//! Themes may ship an `assets/` directory; [`discover`] turns its files into
//! references so templates can use them without the CV declaring them.

pub mod cache;
pub mod raster;

pub use cache::{AssetCache, CacheStats};
pub use raster::{Rasterizer, ResvgRasterizer};

use crate::error::{Stage, Warning};
use crate::model::{AssetReference, Resolution};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use image::imageops::FilterType;
use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Inline SVG substituted for any asset that could not be resolved.
pub const PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 16 16">"##,
    r##"<rect x="0.5" y="0.5" width="15" height="15" fill="none" stroke="#bbbbbb" stroke-dasharray="2 2"/>"##,
    r##"</svg>"##
);

const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset `{id}`: file not found: {}", .path.display())]
    NotFound { id: String, path: PathBuf },
    #[error("asset `{id}`: cannot decode {}: {message}", .path.display())]
    Decode {
        id: String,
        path: PathBuf,
        message: String,
    },
    #[error("asset `{id}`: cannot read {}: {source}", .path.display())]
    Io {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes ready to embed, plus how they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub resolution: Resolution,
    /// True when this is the stand-in for a failed asset.
    pub placeholder: bool,
}

impl ResolvedAsset {
    pub fn placeholder(resolution: Resolution) -> Self {
        Self {
            bytes: PLACEHOLDER_SVG.as_bytes().to_vec(),
            mime: "image/svg+xml",
            resolution,
            placeholder: true,
        }
    }

    /// `data:<mime>;base64,<bytes>` for `src=` / `url()`.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// Asset id → resolved asset, for the template stage.
pub type AssetMap = HashMap<String, Arc<ResolvedAsset>>;

/// Everything [`resolve_all`] produced.
#[derive(Debug, Default)]
pub struct Resolved {
    pub assets: AssetMap,
    pub warnings: Vec<Warning>,
}

/// Resolve one asset, going through `cache`.
pub fn resolve(
    reference: &AssetReference,
    rasterizer: &dyn Rasterizer,
    cache: &AssetCache,
) -> Result<Arc<ResolvedAsset>, AssetError> {
    let bytes = std::fs::read(&reference.path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            AssetError::NotFound {
                id: reference.id.clone(),
                path: reference.path.clone(),
            }
        } else {
            AssetError::Io {
                id: reference.id.clone(),
                path: reference.path.clone(),
                source,
            }
        }
    })?;
    let source_hash = cache::hash_bytes(&bytes);
    cache.get_or_insert_with(&source_hash, reference.resolution, || {
        tracing::debug!("resolving asset `{}` at {}", reference.id, reference.resolution);
        convert(reference, &bytes, rasterizer)
    })
}

fn convert(
    reference: &AssetReference,
    bytes: &[u8],
    rasterizer: &dyn Rasterizer,
) -> Result<ResolvedAsset, AssetError> {
    let decode_err = |message: String| AssetError::Decode {
        id: reference.id.clone(),
        path: reference.path.clone(),
        message,
    };
    let ext = extension(&reference.path);

    if ext == "svg" {
        let png = rasterizer
            .rasterize(bytes, reference.resolution)
            .map_err(|e| decode_err(e.to_string()))?;
        return Ok(ResolvedAsset {
            bytes: png,
            mime: "image/png",
            resolution: reference.resolution,
            placeholder: false,
        });
    }
    if !RASTER_EXTENSIONS.contains(&ext.as_str()) {
        return Err(decode_err(format!("unsupported file type `.{ext}`")));
    }

    let format = image::guess_format(bytes).map_err(|e| decode_err(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| decode_err(e.to_string()))?;
    match reference.resolution {
        Resolution::Dpi(_) => Ok(ResolvedAsset {
            bytes: bytes.to_vec(),
            mime: format.to_mime_type(),
            resolution: reference.resolution,
            placeholder: false,
        }),
        Resolution::Pixels { width, height } => {
            let resized = img.resize(width, height, FilterType::Lanczos3);
            let mut out = Vec::new();
            resized
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .map_err(|e| decode_err(e.to_string()))?;
            Ok(ResolvedAsset {
                bytes: out,
                mime: "image/png",
                resolution: reference.resolution,
                placeholder: false,
            })
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Resolve every reference in parallel. Failures become warnings plus a
/// placeholder under the same id; this never fails as a whole.
pub fn resolve_all(
    references: &[AssetReference],
    rasterizer: &dyn Rasterizer,
    cache: &AssetCache,
) -> Resolved {
    let results: Vec<(String, Result<Arc<ResolvedAsset>, AssetError>)> = references
        .par_iter()
        .map(|r| (r.id.clone(), resolve(r, rasterizer, cache)))
        .collect();

    let mut resolved = Resolved::default();
    for ((id, result), reference) in results.into_iter().zip(references) {
        let asset = match result {
            Ok(asset) => asset,
            Err(e) => {
                tracing::warn!("{e}; using placeholder");
                resolved.warnings.push(Warning::new(Stage::Assets, e.to_string()));
                Arc::new(ResolvedAsset::placeholder(reference.resolution))
            }
        };
        resolved.assets.insert(id, asset);
    }
    resolved
}

/// Asset references for every image under `dir`, id = relative path without
/// extension (`icons/github` for `dir/icons/github.svg`). Missing `dir`
/// yields nothing.
pub fn discover(dir: &Path, default_dpi: u32) -> Vec<AssetReference> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut found: Vec<AssetReference> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let ext = extension(e.path());
            ext == "svg" || RASTER_EXTENSIONS.contains(&ext.as_str())
        })
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?.with_extension("");
            let id = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some(AssetReference {
                id,
                path: e.path().to_path_buf(),
                resolution: Resolution::Dpi(default_dpi),
            })
        })
        .collect();
    found.dedup_by(|a, b| a.id == b.id);
    found
}

/// Theme-provided references first, then document ones; a document
/// declaration replaces a theme asset with the same id.
pub fn merge_references(
    theme: Vec<AssetReference>,
    document: &[AssetReference],
) -> Vec<AssetReference> {
    let mut merged: Vec<AssetReference> = theme
        .into_iter()
        .filter(|t| !document.iter().any(|d| d.id == t.id))
        .collect();
    merged.extend(document.iter().cloned());
    merged
}
