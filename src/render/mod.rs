//! Document renderer: HTML → paginated PDF through a browser engine.
//!
//! [`RenderEngine`] is the narrow contract the build depends on:
//!
//! ```text
//! load(html, base_url) -> PageHandle
//! export(&PageHandle, &PageOptions) -> bytes
//! close(PageHandle)
//! ```
//!
//! The production engine is [`chrome::ChromeEngine`]. Pages are scoped with
//! [`PageGuard`], which closes the page on every exit path, including early
//! returns through `?`. Engines themselves are owned by an [`EngineSlot`]:
//! created on first use, reused by later builds, and thrown away after an
//! engine-level failure so the next build starts from a fresh browser.

pub mod chrome;

use crate::config::{PageConfig, RenderConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("page did not settle within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("browser engine failure: {0}")]
    Engine(String),
}

/// Opaque handle to a loaded page. Only meaningful to the engine that issued it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PageHandle(u64);

impl PageHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Paper setup for export. Lengths are inches.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub landscape: bool,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
}

impl PageOptions {
    pub fn from_config(page: &PageConfig) -> Self {
        Self {
            width: page.width,
            height: page.height,
            margin_top: page.margin_top,
            margin_bottom: page.margin_bottom,
            margin_left: page.margin_left,
            margin_right: page.margin_right,
            landscape: page.landscape,
            print_background: page.print_background,
            prefer_css_page_size: page.prefer_css_page_size,
        }
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::from_config(&PageConfig::default())
    }
}

/// A browser-like engine that loads HTML and exports paginated documents.
pub trait RenderEngine: Send {
    /// Load `html`, resolving relative URLs against `base_url`, and wait for
    /// the page to settle.
    fn load(&mut self, html: &str, base_url: &str) -> Result<PageHandle, RenderError>;

    fn export(&mut self, page: &PageHandle, options: &PageOptions) -> Result<Vec<u8>, RenderError>;

    /// Release the page. Must not fail; problems are logged.
    fn close(&mut self, page: PageHandle);
}

/// Closes its page when dropped.
pub struct PageGuard<'e> {
    engine: &'e mut dyn RenderEngine,
    page: Option<PageHandle>,
}

impl<'e> PageGuard<'e> {
    pub fn open(
        engine: &'e mut dyn RenderEngine,
        html: &str,
        base_url: &str,
    ) -> Result<Self, RenderError> {
        let page = engine.load(html, base_url)?;
        Ok(Self {
            engine,
            page: Some(page),
        })
    }

    pub fn export(&mut self, options: &PageOptions) -> Result<Vec<u8>, RenderError> {
        match &self.page {
            Some(page) => self.engine.export(page, options),
            None => Err(RenderError::Engine("page already closed".into())),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.engine.close(page);
        }
    }
}

/// Load, export and close one document.
pub fn render_document(
    engine: &mut dyn RenderEngine,
    html: &str,
    base_url: &str,
    options: &PageOptions,
) -> Result<Vec<u8>, RenderError> {
    let mut page = PageGuard::open(engine, html, base_url)?;
    let bytes = page.export(options)?;
    if bytes.is_empty() {
        return Err(RenderError::Engine("engine produced an empty document".into()));
    }
    Ok(bytes)
}

/// Builds a fresh engine on demand.
pub type EngineFactory = Box<dyn FnMut() -> Result<Box<dyn RenderEngine>, RenderError> + Send>;

/// A pool of one engine.
///
/// The engine is created lazily on first use and reused by later calls.
/// After a [`RenderError::Engine`] failure it is dropped, so the next call
/// launches a new one. Timeouts are page-level problems and keep the engine.
pub struct EngineSlot {
    factory: EngineFactory,
    engine: Option<Box<dyn RenderEngine>>,
    launches: usize,
}

impl EngineSlot {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: None,
            launches: 0,
        }
    }

    /// Slot backed by headless Chrome with the given settings.
    pub fn chrome(config: RenderConfig) -> Self {
        Self::new(Box::new(move || {
            chrome::ChromeEngine::launch(&config).map(|e| Box::new(e) as Box<dyn RenderEngine>)
        }))
    }

    /// Run `f` with the pooled engine, creating it if needed.
    pub fn with_engine<T>(
        &mut self,
        f: impl FnOnce(&mut dyn RenderEngine) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => {
                tracing::debug!("launching render engine");
                self.launches += 1;
                (self.factory)()?
            }
        };
        let result = f(engine.as_mut());
        match &result {
            Err(RenderError::Engine(msg)) => {
                tracing::warn!("discarding render engine after failure: {msg}");
            }
            _ => self.engine = Some(engine),
        }
        result
    }

    /// How many engines this slot has created.
    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn is_warm(&self) -> bool {
        self.engine.is_some()
    }
}

/// `file://` URL of a directory, with trailing slash so relative URLs resolve inside it.
pub fn file_url(dir: &Path) -> String {
    let dir = absolute(dir);
    Url::from_directory_path(&dir)
        .map(String::from)
        .unwrap_or_else(|()| format!("file://{}/", dir.display()))
}

/// Percent-encoded `file://` URL of a single file.
pub fn file_page_url(path: &Path) -> String {
    let path = absolute(path);
    Url::from_file_path(&path)
        .map(String::from)
        .unwrap_or_else(|()| format!("file://{}", path.display()))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Insert `<base href>` right after `<head>` unless the document already has one.
/// Documents without a `<head>` get it prepended.
pub fn inject_base(html: &str, base_url: &str) -> String {
    let lower = html.to_ascii_lowercase();
    if lower.contains("<base ") || lower.contains("<base>") {
        return html.to_string();
    }
    let tag = format!(r#"<base href="{base_url}">"#);
    let head = lower.match_indices("<head").map(|(i, _)| i).find(|&i| {
        lower
            .as_bytes()
            .get(i + 5)
            .is_some_and(|b| *b == b'>' || b.is_ascii_whitespace())
    });
    match head {
        Some(start) => match lower[start..].find('>') {
            Some(end) => {
                let at = start + end + 1;
                format!("{}{}{}", &html[..at], tag, &html[at..])
            }
            None => format!("{tag}{html}"),
        },
        None => format!("{tag}{html}"),
    }
}
