//! Shared test utilities for the cvpress test suite.
//!
//! Provides a throwaway project layout (YAML input, template directory, an
//! SVG icon), small file helpers, and [`MockEngine`], an in-memory
//! [`RenderEngine`] that records what it was asked to do.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_project();
//! let doc = load::load(&[tmp.path().join("cv.yaml")], 300).unwrap();
//! assert_eq!(doc.sections[0].title, "Experience");
//! ```

use crate::render::{PageHandle, PageOptions, RenderEngine, RenderError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

// =========================================================================
// Fixture content
// =========================================================================

/// One section, one entry, one declared icon.
pub const MINIMAL_CV: &str = r#"
assets:
  logo: icons/logo.svg
cv:
  name: Jane Doe
  email: jane@example.com
  sections:
    - title: Experience
      entries:
        - organization: ACME Rocket Works
          position: Staff Engineer
          date: 2020 - 2024
"#;

/// Entry template used by the fixture project. Every section kind is covered
/// so the same template serves text, entries and bibliography sections.
pub const CV_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ cv.name }}</title></head>
<body>
<h1>{{ cv.name }}</h1>
<img class="logo" src="{{ asset('logo') }}">
{% for section in cv.sections %}
<section>
<h2>{{ section.title }}</h2>
{% if section.layout %}{% include "sections/" ~ section.layout ~ ".html" %}
{% elif section.kind == "text" %}<p>{{ section.text }}</p>
{% elif section.kind == "entries" %}{% for entry in section.entries %}
<div class="entry">{{ entry.organization }}{% if entry.position is defined %}, {{ entry.position }}{% endif %}</div>
{% endfor %}
{% else %}<ol>{% for record in section.records %}<li>{{ record.title }}</li>{% endfor %}</ol>
{% endif %}
</section>
{% endfor %}
</body>
</html>
"#;

/// `layout: compact` partial.
pub const COMPACT_PARTIAL: &str = r#"<ul class="compact">{% for entry in section.entries %}<li>{{ entry.organization }}</li>{% endfor %}</ul>"#;

/// 10x10 red square.
pub const SQUARE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10" viewBox="0 0 10 10"><path d="M0 0h10v10H0z" fill="#ff0000"/></svg>"##;

// =========================================================================
// Fixture setup
// =========================================================================

/// Write `content` to `dir/rel`, creating parent directories. Returns the full path.
pub fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// A complete project in a temp directory:
///
/// ```text
/// cv.yaml
/// icons/logo.svg
/// templates/cv.html
/// templates/sections/compact.html
/// ```
pub fn setup_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "cv.yaml", MINIMAL_CV);
    write_file(tmp.path(), "icons/logo.svg", SQUARE_SVG);
    write_file(tmp.path(), "templates/cv.html", CV_TEMPLATE);
    write_file(tmp.path(), "templates/sections/compact.html", COMPACT_PARTIAL);
    tmp
}

/// Path of the fixture project's entry template.
pub fn template_path(project: &Path) -> PathBuf {
    project.join("templates/cv.html")
}

/// Names of all files under `dir` (non-recursive), sorted.
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =========================================================================
// Mock render engine
// =========================================================================

/// Which call a [`MockEngine`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Load,
    Export,
    Timeout,
}

/// Everything a [`MockEngine`] has seen.
#[derive(Debug, Default)]
pub struct MockState {
    pub loaded: Vec<String>,
    pub base_urls: Vec<String>,
    pub open: usize,
    pub closed: usize,
    pub exports: usize,
}

/// In-memory engine. Clones share state, so a test can keep one handle
/// while the code under test owns another.
///
/// Export produces `%PDF-mock\n` followed by the loaded HTML.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    failure: Option<MockFailure>,
    delay: Duration,
}

impl MockEngine {
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    /// Sleep this long inside every `export`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl RenderEngine for MockEngine {
    fn load(&mut self, html: &str, base_url: &str) -> Result<PageHandle, RenderError> {
        if self.failure == Some(MockFailure::Load) {
            return Err(RenderError::Engine("mock load failure".into()));
        }
        let mut state = self.state();
        state.loaded.push(html.to_string());
        state.base_urls.push(base_url.to_string());
        state.open += 1;
        Ok(PageHandle::new(state.loaded.len() as u64 - 1))
    }

    fn export(&mut self, page: &PageHandle, _options: &PageOptions) -> Result<Vec<u8>, RenderError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.failure {
            Some(MockFailure::Export) => Err(RenderError::Engine("mock export failure".into())),
            Some(MockFailure::Timeout) => Err(RenderError::Timeout(Duration::from_millis(10))),
            _ => {
                let mut state = self.state();
                state.exports += 1;
                let html = &state.loaded[page.id() as usize];
                Ok(format!("%PDF-mock\n{html}").into_bytes())
            }
        }
    }

    fn close(&mut self, _page: PageHandle) {
        let mut state = self.state();
        state.open -= 1;
        state.closed += 1;
    }
}
