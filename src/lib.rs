//! # cvpress
//!
//! Builds a styled PDF résumé from YAML content, a Jinja-style HTML template
//! and a headless browser. Publication lists come from a BibTeX file; icons
//! and photos are rasterized and embedded as data URIs.
//!
//! # Architecture: One Pipeline, One Loop
//!
//! ```text
//! load ─┬─ bibliography ─┬─ template ── render ── write
//!       └─ assets ───────┘
//! ```
//!
//! 1. **Load** reads the YAML inputs, deep-merges them in order and
//!    normalizes the result into a [`model::DocumentModel`].
//! 2. **Bibliography** and **assets** are independent and run in parallel.
//!    Both tolerate local damage: a bad BibTeX entry or a missing icon becomes
//!    a warning plus a substitute, not a failed build.
//! 3. **Template** binds model, records and assets into the template and
//!    produces one HTML document.
//! 4. **Render** loads that HTML into a browser engine and prints it to PDF.
//! 5. **Write** moves the PDF into place atomically.
//!
//! [`build::Builder`] runs the pipeline and reports a [`build::BuildResult`].
//! [`watch`] reruns it whenever an input changes, with debouncing and
//! coalescing so a burst of saves costs one rebuild.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`load`] | YAML parsing, merging and normalization |
//! | [`model`] | The normalized document model shared by every stage |
//! | [`bibliography`] | BibTeX/BibLaTeX parsing into ordered records |
//! | [`assets`] | SVG/raster resolution, content-addressed cache, placeholders |
//! | [`template`] | minijinja environment, binding contract, CV filters |
//! | [`render`] | `RenderEngine` trait, headless Chrome engine, engine slot |
//! | [`build`] | Stage orchestration, atomic output, cancellation |
//! | [`watch`] | Debounced rebuild state machine and filesystem watcher |
//! | [`config`] | `cvpress.toml` loading, merging and validation |
//! | [`error`] | Stage tags for errors and warnings |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Immutable Hand-offs
//!
//! Each stage returns an owned value and never touches an earlier stage's
//! output mutably. The parallel stage shares the document model by shared
//! reference only; the join in [`build`] is the single synchronization point.
//!
//! ## Narrow Engine Seams
//!
//! The browser and the SVG rasterizer sit behind small traits
//! ([`render::RenderEngine`], [`assets::Rasterizer`]). Everything above them is
//! tested with in-memory implementations; only `tests/browser_render.rs`
//! needs a real Chrome.
//!
//! ## Runtime Templates
//!
//! Templates are files the user edits, loaded at build time with strict
//! undefined handling: a misspelled variable is an error with a file and line,
//! not an empty string in the PDF.

pub mod assets;
pub mod bibliography;
pub mod build;
pub mod config;
pub mod error;
pub mod load;
pub mod model;
pub mod output;
pub mod render;
pub mod template;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
