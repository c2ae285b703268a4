//! Project configuration module.
//!
//! Handles loading, validating, and merging `cvpress.toml`. Stock defaults
//! are the base layer; the user's file only needs the keys it wants to
//! change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [build]
//! inputs = ["cv.yaml"]      # YAML files, merged in order
//! theme = "classic"         # theme name or template file path
//! output = "cv.pdf"
//! keep_html = false         # also write cv.html next to the PDF
//!
//! [page]
//! width = 8.27              # inches (A4)
//! height = 11.69
//! margin_top = 0.0
//! margin_bottom = 0.0
//! margin_left = 0.0
//! margin_right = 0.0
//! landscape = false
//! print_background = true
//! prefer_css_page_size = true
//!
//! [render]
//! settle_timeout_ms = 30000 # max wait for fonts/images before export
//! # chrome_path = "/usr/bin/chromium"
//!
//! [assets]
//! default_dpi = 300         # rasterization DPI for assets without one
//!
//! [watch]
//! debounce_ms = 300         # quiet period before a rebuild starts
//!
//! [processing]
//! max_threads = 4           # omit for auto = CPU cores
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the project config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "cvpress.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Project configuration loaded from `cvpress.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// What to build and where to put it.
    pub build: BuildConfig,
    /// Paper size and margins for the exported document.
    pub page: PageConfig,
    /// Browser rendering settings.
    pub render: RenderConfig,
    /// Asset rasterization settings.
    pub assets: AssetsConfig,
    /// Watch mode settings.
    pub watch: WatchConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl ProjectConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.inputs.is_empty() {
            return Err(ConfigError::Validation(
                "build.inputs must not be empty".into(),
            ));
        }
        if self.build.output.trim().is_empty() {
            return Err(ConfigError::Validation(
                "build.output must not be empty".into(),
            ));
        }
        if !(self.page.width > 0.0 && self.page.height > 0.0) {
            return Err(ConfigError::Validation(
                "page.width and page.height must be positive".into(),
            ));
        }
        let margins = [
            self.page.margin_top,
            self.page.margin_bottom,
            self.page.margin_left,
            self.page.margin_right,
        ];
        if margins.iter().any(|m| *m < 0.0) {
            return Err(ConfigError::Validation(
                "page margins must not be negative".into(),
            ));
        }
        if self.render.settle_timeout_ms == 0 || self.render.settle_timeout_ms > 600_000 {
            return Err(ConfigError::Validation(
                "render.settle_timeout_ms must be 1-600000".into(),
            ));
        }
        if self.assets.default_dpi == 0 || self.assets.default_dpi > 2400 {
            return Err(ConfigError::Validation(
                "assets.default_dpi must be 1-2400".into(),
            ));
        }
        if self.watch.debounce_ms == 0 || self.watch.debounce_ms > 10_000 {
            return Err(ConfigError::Validation(
                "watch.debounce_ms must be 1-10000".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// YAML input files, merged in order (later files win).
    pub inputs: Vec<String>,
    /// Theme name (`themes/<name>/templates/cv.html`) or a template file path.
    pub theme: String,
    /// Output document path.
    pub output: String,
    /// Keep the generated HTML next to the output.
    pub keep_html: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            inputs: vec!["cv.yaml".to_string()],
            theme: "classic".to_string(),
            output: "cv.pdf".to_string(),
            keep_html: false,
        }
    }
}

/// Page geometry in inches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageConfig {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub landscape: bool,
    /// Print CSS backgrounds (colored sidebars, header bands).
    pub print_background: bool,
    /// Let an `@page { size: ... }` rule in the template win over width/height.
    pub prefer_css_page_size: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            width: 8.27,
            height: 11.69,
            margin_top: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
            margin_right: 0.0,
            landscape: false,
            print_background: true,
            prefer_css_page_size: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Upper bound on waiting for the page to finish loading fonts and images.
    pub settle_timeout_ms: u64,
    /// Explicit Chrome/Chromium binary. Auto-detected when absent.
    pub chrome_path: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: 30_000,
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// DPI used for assets that don't request a resolution.
    pub default_dpi: u32,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { default_dpi: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Quiet period after the last change before a rebuild starts.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads for asset rasterization.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_threads
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ProjectConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `cvpress.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<ProjectConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ProjectConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `cvpress.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<ProjectConfig, ConfigError> {
    resolve_config(load_raw_config(dir)?)
}

/// Returns a fully-commented stock `cvpress.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cvpress configuration
# =====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# YAML files with the CV content. Later files override earlier ones:
# mappings merge key by key, lists are replaced wholesale.
inputs = ["cv.yaml"]

# Theme name (looked up as themes/<name>/templates/cv.html in this directory
# or its parent) or a path to a template file.
theme = "classic"

# Where the finished document goes.
output = "cv.pdf"

# Also write the generated HTML beside the output (cv.html for cv.pdf).
keep_html = false

# ---------------------------------------------------------------------------
# Page geometry (inches)
# ---------------------------------------------------------------------------
[page]
width = 8.27
height = 11.69
margin_top = 0.0
margin_bottom = 0.0
margin_left = 0.0
margin_right = 0.0
landscape = false
print_background = true
# An @page { size: ... } rule in the template takes precedence when true.
prefer_css_page_size = true

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Upper bound on waiting for web fonts and images before export.
settle_timeout_ms = 30000
# Explicit browser binary. Auto-detected when omitted.
# chrome_path = "/usr/bin/chromium"

# ---------------------------------------------------------------------------
# Assets
# ---------------------------------------------------------------------------
[assets]
# Rasterization DPI for assets declared without a resolution.
default_dpi = 300

# ---------------------------------------------------------------------------
# Watch mode
# ---------------------------------------------------------------------------
[watch]
# Quiet period after the last file change before rebuilding.
debounce_ms = 300

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel rasterization workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}
