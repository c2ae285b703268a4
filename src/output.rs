//! CLI output formatting for builds and checks.
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! ==> Built out/cv.pdf (48.2 KB) in 1.31s
//!     Assets: 6 cached, 1 resolved (7 total)
//! Warnings
//!     [assets] asset `photo`: file not found: me.jpg
//! ```
//!
//! A failed build lists its stage-tagged errors instead:
//!
//! ```text
//! ==> Build failed after 0.02s
//!     [template] cv.html:12: undefined value
//! ```
//!
//! ## Check
//!
//! ```text
//! Sections
//! 001 Experience (3 entries)
//!     Layout: compact
//! 002 Summary (text)
//! 003 Publications (all records)
//!
//! Bibliography
//!     12 records
//!
//! Assets
//!     github  300dpi image/png
//!     photo   300x300px placeholder
//! ```

use crate::assets::AssetMap;
use crate::build::{BuildResult, Outcome, Prepared};
use crate::error::Warning;
use crate::model::SectionContent;
use std::path::PathBuf;
use std::time::Duration;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count.
fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

fn warning_lines(warnings: &[Warning]) -> Vec<String> {
    if warnings.is_empty() {
        return Vec::new();
    }
    let mut lines = vec!["Warnings".to_string()];
    lines.extend(warnings.iter().map(|w| format!("{}{}", indent(1), w)));
    lines
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_result(result: &BuildResult) -> Vec<String> {
    let mut lines = Vec::new();
    match &result.outcome {
        Outcome::Success { output, size } => {
            lines.push(format!(
                "==> Built {} ({}) in {}",
                output.display(),
                format_size(*size),
                format_elapsed(result.elapsed)
            ));
            if result.cache.total() > 0 {
                lines.push(format!("{}Assets: {}", indent(1), result.cache));
            }
        }
        Outcome::Failed { errors } => {
            lines.push(format!(
                "==> Build failed after {}",
                format_elapsed(result.elapsed)
            ));
            lines.extend(errors.iter().map(|e| format!("{}{}", indent(1), e)));
        }
        Outcome::Cancelled => {
            lines.push("==> Build cancelled, a newer change is pending".to_string());
        }
    }
    lines.extend(warning_lines(&result.warnings));
    lines
}

pub fn print_build_result(result: &BuildResult) {
    for line in format_build_result(result) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

fn section_detail(content: &SectionContent) -> String {
    match content {
        SectionContent::Text { .. } => "text".to_string(),
        SectionContent::Entries { entries } if entries.len() == 1 => "1 entry".to_string(),
        SectionContent::Entries { entries } => format!("{} entries", entries.len()),
        SectionContent::Bibliography { keys: None } => "all records".to_string(),
        SectionContent::Bibliography { keys: Some(keys) } => format!("{} cited", keys.len()),
    }
}

fn asset_lines(assets: &AssetMap) -> Vec<String> {
    let mut ids: Vec<&String> = assets.keys().collect();
    ids.sort();
    let width = ids.iter().map(|id| id.len()).max().unwrap_or(0);
    ids.into_iter()
        .map(|id| {
            let asset = &assets[id];
            let kind = if asset.placeholder {
                "placeholder"
            } else {
                asset.mime
            };
            format!(
                "{}{:<width$}  {} {}",
                indent(1),
                id,
                asset.resolution,
                kind
            )
        })
        .collect()
}

pub fn format_check_output(prepared: &Prepared) -> Vec<String> {
    let mut lines = vec!["Sections".to_string()];
    for (i, section) in prepared.document.sections.iter().enumerate() {
        lines.push(format!(
            "{} {} ({})",
            format_index(i + 1),
            section.title,
            section_detail(&section.content)
        ));
        if let Some(layout) = &section.layout {
            lines.push(format!("{}Layout: {}", indent(1), layout));
        }
    }

    lines.push(String::new());
    lines.push("Template".to_string());
    lines.push(format!(
        "{}{}",
        indent(1),
        prepared.template.entry_path().display()
    ));

    if let Some(bib) = &prepared.bibliography {
        lines.push(String::new());
        lines.push("Bibliography".to_string());
        lines.push(format!("{}{} records", indent(1), bib.len()));
    }

    if !prepared.assets.is_empty() {
        lines.push(String::new());
        lines.push("Assets".to_string());
        lines.extend(asset_lines(&prepared.assets));
    }

    let warnings = warning_lines(&prepared.warnings);
    if !warnings.is_empty() {
        lines.push(String::new());
        lines.extend(warnings);
    }
    lines
}

pub fn print_check_output(prepared: &Prepared) {
    for line in format_check_output(prepared) {
        println!("{}", line);
    }
}

// ============================================================================
// Themes
// ============================================================================

pub fn format_theme_list(themes: &[(String, PathBuf)]) -> Vec<String> {
    if themes.is_empty() {
        return vec!["No themes found (looked for themes/<name>/templates/cv.html)".to_string()];
    }
    let mut lines = vec!["Themes".to_string()];
    for (i, (name, dir)) in themes.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), name));
        lines.push(format!("{}Source: {}", indent(1), dir.display()));
    }
    lines
}

pub fn print_theme_list(themes: &[(String, PathBuf)]) {
    for line in format_theme_list(themes) {
        println!("{}", line);
    }
}
