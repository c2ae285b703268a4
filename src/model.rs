//! The normalized document model handed from the loader to every later stage.
//!
//! Nothing downstream mutates these values: the loader builds them once and
//! later stages only read them.

use serde::Serialize;
use serde::ser::Serializer;
use std::fmt;
use std::path::PathBuf;

/// Normalized CV content.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentModel {
    /// Header data (name, contact, links, ...). Passed to templates as-is.
    pub meta: serde_json::Map<String, serde_json::Value>,
    /// Sections in presentation order.
    pub sections: Vec<Section>,
    /// Assets declared by the input files, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetReference>,
    /// Bibliography source, resolved against the declaring file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bibliography: Option<PathBuf>,
    /// Theme requested by the input files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl DocumentModel {
    /// Whether any section renders bibliography records.
    pub fn cites(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s.content, SectionContent::Bibliography { .. }))
    }
}

/// One titled block of the CV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    /// Never empty.
    pub title: String,
    /// Named partial (`sections/<layout>.html`) the template renders this section with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(flatten)]
    pub content: SectionContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SectionContent {
    Text { text: String },
    Entries { entries: Vec<Entry> },
    /// `None` selects every record; `Some` selects these keys in this order.
    Bibliography { keys: Option<Vec<String>> },
}

impl SectionContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Entries { .. } => "entries",
            Self::Bibliography { .. } => "bibliography",
        }
    }
}

/// One item within a section (a job, degree, project, skill).
///
/// Field order follows the source file. Serialized as a plain mapping so
/// templates can write `entry.organization`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub fields: Vec<(String, FieldValue)>,
}

impl Entry {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.fields.iter().map(|(k, v)| (k, v)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::List(_) => None,
        }
    }
}

/// Requested output resolution for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Dots per inch, relative to the 96 DPI CSS pixel.
    Dpi(u32),
    /// Fit inside this pixel box, preserving aspect ratio.
    Pixels { width: u32, height: u32 },
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dpi(dpi) => write!(f, "{dpi}dpi"),
            Self::Pixels { width, height } => write!(f, "{width}x{height}px"),
        }
    }
}

/// An image or icon the document wants embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReference {
    /// Name templates use to look the asset up.
    pub id: String,
    pub path: PathBuf,
    pub resolution: Resolution,
}
