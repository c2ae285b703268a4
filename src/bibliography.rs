//! Bibliography resolver: BibTeX/BibLaTeX file → ordered [`Bibliography`].
//!
//! The source is split into top-level `@type{...}` blocks and each block is
//! parsed on its own with the `biblatex` crate, so one broken entry costs a
//! warning instead of the whole file. `@string` abbreviations are prepended
//! to every block so they stay visible. `@comment` and `@preamble` blocks are
//! ignored.
//!
//! Records keep source-file order. Sorting is left to templates.

use crate::error::{Stage, Warning};
use biblatex::ChunksExt;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BibliographyError {
    #[error("cannot read bibliography {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no valid entries in {} ({skipped} skipped)", .path.display())]
    Empty { path: PathBuf, skipped: usize },
}

/// One parsed citation.
#[derive(Debug, Clone, PartialEq)]
pub struct BibliographyRecord {
    pub key: String,
    /// Lowercased entry type (`article`, `book`, `inproceedings`, ...).
    pub entry_type: String,
    /// Field name (lowercased) → verbatim value.
    pub fields: BTreeMap<String, String>,
    /// Authors as "Given Family".
    pub authors: Vec<String>,
}

impl BibliographyRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Templates see a flat mapping: `key`, `type`, `authors`, then every field.
impl Serialize for BibliographyRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry("key", &self.key)?;
        map.serialize_entry("type", &self.entry_type)?;
        map.serialize_entry("authors", &self.authors)?;
        for (name, value) in &self.fields {
            if !matches!(name.as_str(), "key" | "type" | "authors") {
                map.serialize_entry(name, value)?;
            }
        }
        map.end()
    }
}

/// Records in source order with lookup by citation key.
#[derive(Debug, Clone, Default)]
pub struct Bibliography {
    records: Vec<BibliographyRecord>,
    index: HashMap<String, usize>,
}

impl Bibliography {
    pub fn get(&self, key: &str) -> Option<&BibliographyRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[BibliographyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records for `keys` in the given order. Returns the first unknown key on miss.
    pub fn select(&self, keys: &[String]) -> Result<Vec<&BibliographyRecord>, String> {
        keys.iter()
            .map(|k| self.get(k).ok_or_else(|| k.clone()))
            .collect()
    }

    fn push(&mut self, record: BibliographyRecord) -> bool {
        if self.index.contains_key(&record.key) {
            return false;
        }
        self.index.insert(record.key.clone(), self.records.len());
        self.records.push(record);
        true
    }
}

/// Outcome of a resolve: the records plus per-entry warnings.
#[derive(Debug, Default)]
pub struct Resolved {
    pub bibliography: Bibliography,
    pub warnings: Vec<Warning>,
}

/// Read and parse a bibliography file.
pub fn resolve(path: &Path) -> Result<Resolved, BibliographyError> {
    let source = fs::read_to_string(path).map_err(|source| BibliographyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let resolved = parse_source(&source, &path.display().to_string());
    if resolved.bibliography.is_empty() {
        return Err(BibliographyError::Empty {
            path: path.to_path_buf(),
            skipped: resolved.warnings.len(),
        });
    }
    tracing::info!(
        "bibliography: {} records from {}",
        resolved.bibliography.len(),
        path.display()
    );
    Ok(resolved)
}

/// Parse BibTeX text. `origin` only labels warnings.
pub fn parse_source(source: &str, origin: &str) -> Resolved {
    let blocks = split_blocks(source);
    let strings: String = blocks
        .iter()
        .filter(|b| b.kind == "string")
        .map(|b| b.text)
        .collect::<Vec<_>>()
        .join("\n");

    let mut resolved = Resolved::default();
    for block in blocks.iter().filter(|b| is_entry(&b.kind)) {
        let mut warn = |message: String| {
            tracing::warn!("{origin}: {message}");
            resolved
                .warnings
                .push(Warning::new(Stage::Bibliography, format!("{origin}: {message}")));
        };

        let text = if strings.is_empty() {
            block.text.to_string()
        } else {
            format!("{strings}\n{}", block.text)
        };
        match biblatex::Bibliography::parse(&text) {
            Ok(parsed) => {
                let mut entries = parsed.iter();
                match entries.next() {
                    Some(entry) => {
                        let record = to_record(entry, &block.kind);
                        let key = record.key.clone();
                        if !resolved.bibliography.push(record) {
                            warn(format!("duplicate key `{key}` on line {}, skipped", block.line));
                        }
                    }
                    None => warn(format!("entry on line {} has no content, skipped", block.line)),
                }
            }
            Err(e) => warn(format!("skipping malformed entry on line {}: {e}", block.line)),
        }
    }
    resolved
}

fn is_entry(kind: &str) -> bool {
    !matches!(kind, "string" | "comment" | "preamble")
}

fn to_record(entry: &biblatex::Entry, kind: &str) -> BibliographyRecord {
    let fields: BTreeMap<String, String> = entry
        .fields
        .iter()
        .map(|(name, chunks)| (name.to_lowercase(), chunks.format_verbatim()))
        .collect();
    let authors = fields
        .get("author")
        .map(|a| split_names(a))
        .unwrap_or_default();
    BibliographyRecord {
        key: entry.key.clone(),
        entry_type: kind.to_string(),
        fields,
        authors,
    }
}

/// Split a BibTeX `and`-separated name list into "Given Family" strings.
fn split_names(list: &str) -> Vec<String> {
    list.split(" and ")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|name| match name.split_once(',') {
            Some((family, given)) => format!("{} {}", given.trim(), family.trim()),
            None => name.to_string(),
        })
        .collect()
}

// ============================================================================
// Block splitting
// ============================================================================

/// One top-level `@kind{...}` block.
#[derive(Debug)]
struct Block<'a> {
    kind: String,
    text: &'a str,
    /// 1-based line of the `@`.
    line: usize,
}

/// Cut the source into `@kind{...}` / `@kind(...)` blocks, tracking brace
/// depth. Text between blocks is treated as a comment, like BibTeX does.
fn split_blocks(source: &str) -> Vec<Block<'_>> {
    let bytes = source.as_bytes();
    let mut blocks = Vec::new();
    let mut i = 0;
    while let Some(offset) = source[i..].find('@') {
        let start = i + offset;
        let Some(open) = block_open(bytes, start) else {
            i = start + 1;
            continue;
        };
        let end = block_end(bytes, open);
        blocks.push(Block {
            kind: source[start + 1..open].trim_end().to_ascii_lowercase(),
            text: &source[start..end],
            line: source[..start].matches('\n').count() + 1,
        });
        i = end;
    }
    blocks
}

/// Index of the opening delimiter when `@kind{` / `@kind(` starts at `at`.
fn block_open(bytes: &[u8], at: usize) -> Option<usize> {
    let mut j = at + 1;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if j == at + 1 {
        return None;
    }
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    (j < bytes.len() && matches!(bytes[j], b'{' | b'(')).then_some(j)
}

/// Index just past the delimiter closing the one at `open`.
///
/// A block that is still open when a line starts with a new `@kind{` ends
/// right before that line, so an unbalanced entry only loses itself.
fn block_end(bytes: &[u8], open: usize) -> usize {
    let paren = bytes[open] == b'(';
    let mut depth = 0usize;
    let mut line_start = false;
    for (k, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'\n' => {
                line_start = true;
                continue;
            }
            b'@' if line_start && block_open(bytes, k).is_some() => return k,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if !paren && depth == 0 {
                    return k + 1;
                }
            }
            b')' if paren && depth == 0 => return k + 1,
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            line_start = false;
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use tempfile::TempDir;

    const GOOD: &str = r#"
@article{knuth84,
  author = {Knuth, Donald E.},
  title = {Literate Programming},
  journal = {The Computer Journal},
  year = {1984},
}

@book{lamport94,
  author = {Leslie Lamport},
  title = {LaTeX: A Document Preparation System},
  publisher = {Addison-Wesley},
  year = {1994},
}
"#;

    fn keys(bib: &Bibliography) -> Vec<&str> {
        bib.records().iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn parses_records_in_source_order() {
        let resolved = parse_source(GOOD, "pubs.bib");
        assert!(resolved.warnings.is_empty());
        assert_eq!(keys(&resolved.bibliography), vec!["knuth84", "lamport94"]);

        let knuth = resolved.bibliography.get("knuth84").unwrap();
        assert_eq!(knuth.entry_type, "article");
        assert_eq!(knuth.field("title"), Some("Literate Programming"));
        assert_eq!(knuth.field("year"), Some("1984"));
        assert_eq!(knuth.authors, vec!["Donald E. Knuth"]);
    }

    #[test]
    fn order_is_file_order_not_alphabetical() {
        let src = "@misc{zz, title={Z}}\n@misc{aa, title={A}}\n@misc{mm, title={M}}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["zz", "aa", "mm"]);
    }

    #[test]
    fn bad_entry_is_skipped_with_one_warning() {
        let src = format!("{GOOD}\n@article{{broken, title = {{unclosed\n");
        let resolved = parse_source(&src, "pubs.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["knuth84", "lamport94"]);
        assert_eq!(resolved.warnings.len(), 1);
        assert_eq!(resolved.warnings[0].stage, Stage::Bibliography);
    }

    #[test]
    fn unclosed_entry_does_not_swallow_later_entries() {
        let src = format!("@article{{broken, title = {{unclosed\n{GOOD}");
        let resolved = parse_source(&src, "pubs.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["knuth84", "lamport94"]);
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].message.contains("line 1"));
    }

    #[test]
    fn unclosed_entry_between_good_ones_is_skipped() {
        let src = "@misc{a, title={A}}\n@misc{b, title={B\n  @misc{c, title={C}}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["a", "c"]);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn at_sign_inside_field_is_not_a_new_entry() {
        let src = "@misc{a, note={mail me@example.com},\n  title={A}}\n@misc{b, title={B}}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["a", "b"]);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn duplicate_key_keeps_first() {
        let src = "@misc{a, title={First}}\n@misc{a, title={Second}}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(resolved.bibliography.len(), 1);
        assert_eq!(
            resolved.bibliography.get("a").unwrap().field("title"),
            Some("First")
        );
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn string_abbreviations_reach_every_entry() {
        let src = "@string{acm = {ACM Press}}\n@book{x, title={T}, publisher = acm}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(
            resolved.bibliography.get("x").unwrap().field("publisher"),
            Some("ACM Press")
        );
    }

    #[test]
    fn comments_between_entries_are_ignored() {
        let src = "Generated by hand.\n@comment{ignored}\n@misc{only, title={T}}\n";
        let resolved = parse_source(src, "x.bib");
        assert_eq!(keys(&resolved.bibliography), vec!["only"]);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn select_preserves_requested_order() {
        let resolved = parse_source(GOOD, "pubs.bib");
        let picked = resolved
            .bibliography
            .select(&["lamport94".into(), "knuth84".into()])
            .unwrap();
        assert_eq!(picked[0].key, "lamport94");
        assert_eq!(picked[1].key, "knuth84");
        assert_eq!(
            resolved.bibliography.select(&["nope".into()]).unwrap_err(),
            "nope"
        );
    }

    #[test]
    fn record_serializes_flat() {
        let resolved = parse_source(GOOD, "pubs.bib");
        let v = serde_json::to_value(resolved.bibliography.get("lamport94").unwrap()).unwrap();
        assert_eq!(v["key"], "lamport94");
        assert_eq!(v["type"], "book");
        assert_eq!(v["publisher"], "Addison-Wesley");
        assert_eq!(v["authors"][0], "Leslie Lamport");
    }

    #[test]
    fn split_names_handles_both_forms() {
        assert_eq!(
            split_names("Knuth, Donald and Leslie Lamport"),
            vec!["Donald Knuth", "Leslie Lamport"]
        );
    }

    #[test]
    fn resolve_all_bad_is_empty_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "bad.bib", "@article{x, title = {oops\n");
        let err = resolve(&path).unwrap_err();
        assert!(matches!(err, BibliographyError::Empty { skipped: 1, .. }));
    }

    #[test]
    fn resolve_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = resolve(&tmp.path().join("missing.bib")).unwrap_err();
        assert!(matches!(err, BibliographyError::Io { .. }));
    }

    #[test]
    fn resolve_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "pubs.bib", GOOD);
        let resolved = resolve(&path).unwrap();
        assert_eq!(resolved.bibliography.len(), 2);
    }
}
