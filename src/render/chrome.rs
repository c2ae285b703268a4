//! Headless Chrome engine.
//!
//! Each page is a tab. The HTML is written to a temporary `.html` file and
//! navigated to, with a `<base href>` injected so stylesheets, fonts and
//! images resolve against the caller's base URL. Export is Chrome's
//! `Page.printToPDF`.

use super::{PageHandle, PageOptions, RenderEngine, RenderError, file_page_url, inject_base};
use crate::config::RenderConfig;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Evaluates to `true` once the document, its fonts and its images are done.
const SETTLED_CHECK: &str = "document.readyState === 'complete' \
    && document.fonts.status === 'loaded' \
    && Array.from(document.images).every(img => img.complete)";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The browser outlives a watch session's idle stretches.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

struct OpenPage {
    tab: Arc<Tab>,
    // Held so the file exists until the tab is closed.
    _source: NamedTempFile,
}

pub struct ChromeEngine {
    browser: Browser,
    pages: HashMap<u64, OpenPage>,
    next_id: u64,
    settle_timeout: Duration,
}

fn engine_err(e: impl std::fmt::Display) -> RenderError {
    RenderError::Engine(e.to_string())
}

/// A browser-side wait that ran out is a page problem; anything else is the engine's.
fn browser_err(e: anyhow::Error, limit: Duration) -> RenderError {
    if e.downcast_ref::<Timeout>().is_some() {
        RenderError::Timeout(limit)
    } else {
        engine_err(e)
    }
}

impl ChromeEngine {
    pub fn launch(config: &RenderConfig) -> Result<Self, RenderError> {
        let options = LaunchOptions {
            headless: true,
            path: config.chrome_path.as_ref().map(PathBuf::from),
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(engine_err)?;
        tracing::debug!("chrome launched");
        Ok(Self {
            browser,
            pages: HashMap::new(),
            next_id: 0,
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
        })
    }

    /// Poll until the page settles or `deadline` passes.
    fn wait_settled(&self, tab: &Tab, deadline: Instant) -> Result<(), RenderError> {
        loop {
            // Each check only gets what is left of the page's budget.
            let remaining = deadline.saturating_duration_since(Instant::now());
            tab.set_default_timeout(remaining.max(POLL_INTERVAL));
            let settled = tab
                .evaluate(SETTLED_CHECK, false)
                .map_err(|e| browser_err(e, self.settle_timeout))?
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if settled {
                tab.set_default_timeout(self.settle_timeout);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RenderError::Timeout(self.settle_timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl RenderEngine for ChromeEngine {
    fn load(&mut self, html: &str, base_url: &str) -> Result<PageHandle, RenderError> {
        let mut source = tempfile::Builder::new()
            .prefix("cvpress-")
            .suffix(".html")
            .tempfile()
            .map_err(engine_err)?;
        source
            .write_all(inject_base(html, base_url).as_bytes())
            .and_then(|_| source.flush())
            .map_err(engine_err)?;

        let tab = self.browser.new_tab().map_err(engine_err)?;
        let deadline = Instant::now() + self.settle_timeout;
        tab.set_default_timeout(self.settle_timeout);

        let navigated = tab
            .navigate_to(&file_page_url(source.path()))
            .and_then(|t| t.wait_until_navigated().map(|_| ()))
            .map_err(|e| browser_err(e, self.settle_timeout))
            .and_then(|_| self.wait_settled(&tab, deadline));
        if let Err(e) = navigated {
            if let Err(close) = tab.close(false) {
                tracing::debug!("failed to close page after load error: {close}");
            }
            return Err(e);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.pages.insert(
            id,
            OpenPage {
                tab,
                _source: source,
            },
        );
        Ok(PageHandle::new(id))
    }

    fn export(&mut self, page: &PageHandle, options: &PageOptions) -> Result<Vec<u8>, RenderError> {
        let open = self
            .pages
            .get(&page.id())
            .ok_or_else(|| RenderError::Engine(format!("unknown page {}", page.id())))?;
        let pdf_options = PrintToPdfOptions {
            landscape: Some(options.landscape),
            display_header_footer: Some(false),
            print_background: Some(options.print_background),
            paper_width: Some(options.width),
            paper_height: Some(options.height),
            margin_top: Some(options.margin_top),
            margin_bottom: Some(options.margin_bottom),
            margin_left: Some(options.margin_left),
            margin_right: Some(options.margin_right),
            prefer_css_page_size: Some(options.prefer_css_page_size),
            ..Default::default()
        };
        open.tab
            .print_to_pdf(Some(pdf_options))
            .map_err(|e| browser_err(e, self.settle_timeout))
    }

    fn close(&mut self, page: PageHandle) {
        if let Some(open) = self.pages.remove(&page.id())
            && let Err(e) = open.tab.close(false)
        {
            tracing::warn!("failed to close page {}: {e}", page.id());
        }
    }
}
