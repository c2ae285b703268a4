//! Data loader: YAML files → [`DocumentModel`].
//!
//! Input files are parsed independently, merged in order, then normalized
//! once. Merge rules:
//!
//! - Mappings merge key-by-key; later files win on conflicts.
//! - Scalars and sequences in a later file replace the earlier value
//!   wholesale. A later `sections:` list replaces the whole list, it is
//!   never appended.
//!
//! Paths inside a file (`bibliography`, asset paths) are anchored to that
//! file's directory *before* merging, so an override in `job-ad.yaml`
//! resolves next to `job-ad.yaml`.
//!
//! ## Accepted layout
//!
//! ```yaml
//! theme: classic
//! bibliography: pubs.bib
//! assets:
//!   github: icons/github.svg
//!   photo: { path: me.jpg, width: 300, height: 300 }
//! cv:
//!   name: Jane Doe
//!   sections:
//!     - title: Experience
//!       entries:
//!         - organization: ACME
//!           date: 2020 - 2022
//!     - title: Summary
//!       text: Systems programmer.
//!     - title: Publications
//!       bibliography: true
//! ```
//!
//! The `cv:` wrapper is optional; without it the root mapping holds `sections`
//! and the meta keys directly.
//!
//! `sections` may also be a mapping keyed by section id. Mappings merge, so a
//! later file can then add or override single sections; the key doubles as
//! the title when `title` is absent.

use crate::model::{
    AssetReference, DocumentModel, Entry, FieldValue, Resolution, Section, SectionContent,
};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keys that configure the build rather than describe the CV.
const ROOT_KEYS: &[&str] = &["theme", "bibliography", "assets"];
const SECTION_KEYS: &[&str] = &["title", "layout", "text", "entries", "bibliography"];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{}: malformed YAML{}: {message}", .path.display(), position(.line, .column))]
    Malformed {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },
    #[error("schema error at `{location}`: {message}")]
    Schema { location: String, message: String },
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no input files given")]
    NoInputs,
}

fn position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

fn schema(location: impl Into<String>, message: impl Into<String>) -> LoadError {
    LoadError::Schema {
        location: location.into(),
        message: message.into(),
    }
}

/// Load, merge, and normalize the given YAML files.
///
/// `default_dpi` is the resolution for assets that don't declare one.
pub fn load(paths: &[PathBuf], default_dpi: u32) -> Result<DocumentModel, LoadError> {
    let merged = load_merged(paths)?;
    normalize(merged, default_dpi)
}

/// Parse every file and merge them in order, without normalizing.
pub fn load_merged(paths: &[PathBuf]) -> Result<Value, LoadError> {
    if paths.is_empty() {
        return Err(LoadError::NoInputs);
    }
    let mut merged = Value::Mapping(Mapping::new());
    for path in paths {
        let mut value = read_yaml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        anchor_paths(&mut value, base);
        tracing::debug!("loaded {}", path.display());
        merged = merge_yaml(merged, value);
    }
    Ok(merged)
}

fn read_yaml(path: &Path) -> Result<Value, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| {
        let location = e.location();
        LoadError::Malformed {
            path: path.to_path_buf(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
            message: e.to_string(),
        }
    })?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(schema(
            path.display().to_string(),
            "top level of an input file must be a mapping",
        )),
    }
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Mappings are merged key-by-key (overlay keys override base keys).
/// - Anything else in overlay (scalars, sequences) replaces base entirely.
/// - Keys in base that are not in overlay are preserved, in their original position.
pub fn merge_yaml(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.get_mut(&key) {
                    Some(slot) => merge_yaml(std::mem::take(slot), overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Rewrite relative file references in a single input to be relative to `base`.
fn anchor_paths(value: &mut Value, base: &Path) {
    let Value::Mapping(root) = value else {
        return;
    };
    if let Some(Value::String(bib)) = root.get_mut("bibliography") {
        *bib = anchor(base, bib);
    }
    if let Some(Value::Mapping(assets)) = root.get_mut("assets") {
        for (_, declared) in assets.iter_mut() {
            match declared {
                Value::String(path) => *path = anchor(base, path),
                Value::Mapping(spec) => {
                    if let Some(Value::String(path)) = spec.get_mut("path") {
                        *path = anchor(base, path);
                    }
                }
                _ => {}
            }
        }
    }
}

fn anchor(base: &Path, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        path.to_string()
    } else {
        base.join(p).to_string_lossy().into_owned()
    }
}

/// Turn a merged YAML tree into a validated [`DocumentModel`].
pub fn normalize(merged: Value, default_dpi: u32) -> Result<DocumentModel, LoadError> {
    let Value::Mapping(mut root) = merged else {
        return Err(schema("<root>", "expected a mapping"));
    };

    let theme = match root.remove("theme") {
        None | Some(Value::Null) => None,
        Some(v) => Some(scalar_string(&v).ok_or_else(|| schema("theme", "expected a string"))?),
    };
    let bibliography = match root.remove("bibliography") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(PathBuf::from(s)),
        Some(_) => return Err(schema("bibliography", "expected a file path")),
    };
    let assets = match root.remove("assets") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Mapping(m)) => normalize_assets(m, default_dpi)?,
        Some(_) => return Err(schema("assets", "expected a mapping of id to path")),
    };

    let (mut body, prefix) = match root.remove("cv") {
        Some(Value::Mapping(cv)) => {
            if let Some(key) = root.keys().next() {
                let name = scalar_string(key).unwrap_or_else(|| "?".into());
                return Err(schema(
                    name,
                    "unexpected top-level key next to `cv` (move it inside `cv`)",
                ));
            }
            (cv, "cv.")
        }
        Some(_) => return Err(schema("cv", "expected a mapping")),
        None => (root, ""),
    };

    let sections_location = format!("{prefix}sections");
    let sections = match body.remove("sections") {
        Some(Value::Sequence(seq)) => seq
            .into_iter()
            .enumerate()
            .map(|(i, s)| normalize_section(s, None, &format!("{sections_location}[{i}]")))
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Mapping(map)) => map
            .into_iter()
            .map(|(key, s)| {
                let name = scalar_string(&key).unwrap_or_default();
                let location = format!("{sections_location}.{name}");
                normalize_section(s, Some(name), &location)
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(schema(
                sections_location,
                "expected a list or a keyed mapping of sections",
            ));
        }
        None => return Err(schema(sections_location, "missing required field")),
    };

    let meta = match serde_json::to_value(Value::Mapping(body)) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(e) => return Err(schema(format!("{prefix}<meta>"), e.to_string())),
    };

    Ok(DocumentModel {
        meta,
        sections,
        assets,
        bibliography,
        theme,
    })
}

/// `default_title` is the mapping key when sections are given as a keyed mapping.
fn normalize_section(
    value: Value,
    default_title: Option<String>,
    location: &str,
) -> Result<Section, LoadError> {
    let Value::Mapping(mut map) = value else {
        return Err(schema(location, "expected a mapping"));
    };

    for key in map.keys() {
        let name = scalar_string(key).unwrap_or_default();
        if !SECTION_KEYS.contains(&name.as_str()) {
            return Err(schema(
                format!("{location}.{name}"),
                "unknown section key (expected title, layout, text, entries or bibliography)",
            ));
        }
    }

    let title = match (map.remove("title"), default_title) {
        (None | Some(Value::Null), Some(key)) => key,
        (None | Some(Value::Null), None) => {
            return Err(schema(format!("{location}.title"), "missing required field"));
        }
        (Some(v), _) => scalar_string(&v)
            .ok_or_else(|| schema(format!("{location}.title"), "expected a string"))?,
    };
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(schema(format!("{location}.title"), "must not be empty"));
    }

    let layout = match map.remove("layout") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            scalar_string(&v)
                .ok_or_else(|| schema(format!("{location}.layout"), "expected a string"))?,
        ),
    };

    let present: Vec<&str> = ["text", "entries", "bibliography"]
        .into_iter()
        .filter(|k| map.contains_key(*k))
        .collect();
    if present.len() != 1 {
        return Err(schema(
            location,
            format!(
                "section `{title}` needs exactly one of text, entries or bibliography (found {})",
                if present.is_empty() {
                    "none".to_string()
                } else {
                    present.join(", ")
                }
            ),
        ));
    }

    let content = match present[0] {
        "text" => {
            let v = map.remove("text").unwrap_or(Value::Null);
            let text = scalar_string(&v)
                .ok_or_else(|| schema(format!("{location}.text"), "expected a string"))?;
            SectionContent::Text { text }
        }
        "entries" => match map.remove("entries") {
            Some(Value::Sequence(seq)) => SectionContent::Entries {
                entries: seq
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| normalize_entry(e, &format!("{location}.entries[{i}]")))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            _ => return Err(schema(format!("{location}.entries"), "expected a list")),
        },
        _ => match map.remove("bibliography") {
            Some(Value::Bool(true)) => SectionContent::Bibliography { keys: None },
            Some(Value::Sequence(seq)) => {
                let keys = string_list(seq)
                    .ok_or_else(|| schema(format!("{location}.bibliography"), "expected keys"))?;
                SectionContent::Bibliography { keys: Some(keys) }
            }
            _ => {
                return Err(schema(
                    format!("{location}.bibliography"),
                    "expected `true` or a list of citation keys",
                ));
            }
        },
    };

    Ok(Section {
        title,
        layout,
        content,
    })
}

fn normalize_entry(value: Value, location: &str) -> Result<Entry, LoadError> {
    let Value::Mapping(map) = value else {
        return Err(schema(location, "expected a mapping of fields"));
    };
    let mut fields = Vec::with_capacity(map.len());
    for (key, value) in map {
        let name = scalar_string(&key)
            .ok_or_else(|| schema(location, "field names must be strings"))?;
        let field = match value {
            Value::Null => FieldValue::Text(String::new()),
            Value::Sequence(seq) => FieldValue::List(string_list(seq).ok_or_else(|| {
                schema(
                    format!("{location}.{name}"),
                    "lists may only contain strings",
                )
            })?),
            other => FieldValue::Text(scalar_string(&other).ok_or_else(|| {
                schema(
                    format!("{location}.{name}"),
                    "expected a string or a list of strings",
                )
            })?),
        };
        fields.push((name, field));
    }
    Ok(Entry { fields })
}

fn normalize_assets(map: Mapping, default_dpi: u32) -> Result<Vec<AssetReference>, LoadError> {
    let mut assets = Vec::with_capacity(map.len());
    for (key, spec) in map {
        let id = scalar_string(&key).ok_or_else(|| schema("assets", "ids must be strings"))?;
        let location = format!("assets.{id}");
        let asset = match spec {
            Value::String(path) => AssetReference {
                id,
                path: PathBuf::from(path),
                resolution: Resolution::Dpi(default_dpi),
            },
            Value::Mapping(mut spec) => {
                let path = match spec.remove("path") {
                    Some(Value::String(p)) => PathBuf::from(p),
                    _ => return Err(schema(format!("{location}.path"), "missing file path")),
                };
                let dpi = spec.remove("dpi").map(|v| positive(&v, &location, "dpi")).transpose()?;
                let width = spec
                    .remove("width")
                    .map(|v| positive(&v, &location, "width"))
                    .transpose()?;
                let height = spec
                    .remove("height")
                    .map(|v| positive(&v, &location, "height"))
                    .transpose()?;
                if let Some(extra) = spec.keys().next() {
                    let name = scalar_string(extra).unwrap_or_default();
                    return Err(schema(format!("{location}.{name}"), "unknown asset option"));
                }
                let resolution = match (dpi, width, height) {
                    (None, None, None) => Resolution::Dpi(default_dpi),
                    (Some(dpi), None, None) => Resolution::Dpi(dpi),
                    (None, Some(width), Some(height)) => Resolution::Pixels { width, height },
                    _ => {
                        return Err(schema(
                            location,
                            "give either `dpi` or both `width` and `height`",
                        ));
                    }
                };
                AssetReference {
                    id,
                    path,
                    resolution,
                }
            }
            _ => return Err(schema(location, "expected a path or a mapping with `path`")),
        };
        assets.push(asset);
    }
    Ok(assets)
}

fn positive(value: &Value, location: &str, field: &str) -> Result<u32, LoadError> {
    value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| schema(format!("{location}.{field}"), "expected a positive integer"))
}

/// Stringify a YAML scalar. Numbers and booleans keep their source spelling.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(seq: Vec<Value>) -> Option<Vec<String>> {
    seq.iter().map(scalar_string).collect()
}
