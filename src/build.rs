//! Build orchestrator: one pipeline run from YAML to a finished document.
//!
//! ```text
//! load ─┬─ bibliography ─┬─ template ── render ── write
//!       └─ assets ───────┘
//! ```
//!
//! Bibliography and asset resolution are independent of each other and run
//! under one `rayon::join`; both must finish before templating starts.
//!
//! A fatal error in any stage stops the run and is reported with the
//! [`Stage`] it came from. Recoverable problems (a broken icon, a malformed
//! BibTeX entry) are collected as [`Warning`]s and the build carries on with
//! a substitute.
//!
//! ## Atomic output
//!
//! The document is written to a temporary file in the output directory and
//! renamed over the final path only after everything succeeded. A failed or
//! cancelled build leaves whatever was there before untouched, and no
//! temporary files behind.
//!
//! ## Cancellation
//!
//! A [`CancelToken`] is checked between stages and once more right before the
//! rename. After the rename a build is final.

use crate::assets::{self, AssetCache, AssetMap, CacheStats, Rasterizer, ResvgRasterizer};
use crate::bibliography::{self, Bibliography};
use crate::config::{BuildConfig, ProjectConfig};
use crate::error::{Stage, StageError, Warning};
use crate::load;
use crate::model::DocumentModel;
use crate::render::{self, EngineSlot, PageOptions};
use crate::template::{self, TemplateRef};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared flag asking an in-progress build to stop at its next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before starting the next build.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// YAML inputs, merged in order.
    pub inputs: Vec<PathBuf>,
    /// Template file, template directory, or theme name. When `None` the
    /// document's own `theme:` is used, then the configured theme.
    pub template: Option<String>,
    pub output: PathBuf,
    /// Overrides the document's `bibliography:` path.
    pub bibliography: Option<PathBuf>,
    /// Also write the intermediate HTML next to the output.
    pub keep_html: bool,
    /// Directory relative template references and theme lookup start from.
    pub root: PathBuf,
}

impl BuildRequest {
    /// Request described by the `[build]` config table, relative to `root`.
    pub fn from_config(config: &BuildConfig, root: &Path) -> Self {
        Self {
            inputs: config.inputs.iter().map(|p| root.join(p)).collect(),
            template: None,
            output: root.join(&config.output),
            bibliography: None,
            keep_html: config.keep_html,
            root: root.to_path_buf(),
        }
    }

    /// Where `keep_html` writes the intermediate document.
    pub fn html_path(&self) -> PathBuf {
        self.output.with_extension("html")
    }
}

/// How a build ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { output: PathBuf, size: usize },
    /// Stage-tagged fatal errors, in the order they were hit.
    Failed { errors: Vec<StageError> },
    Cancelled,
}

/// Report of one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
    pub elapsed: Duration,
    pub cache: CacheStats,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn errors(&self) -> &[StageError] {
        match &self.outcome {
            Outcome::Failed { errors } => errors,
            _ => &[],
        }
    }
}

/// Everything up to (not including) templating. Produced by [`Builder::check`].
#[derive(Debug)]
pub struct Prepared {
    pub document: DocumentModel,
    pub template: TemplateRef,
    pub bibliography: Option<Bibliography>,
    pub assets: AssetMap,
    pub warnings: Vec<Warning>,
}

/// Why a run stopped early.
enum Halt {
    Failed(Vec<StageError>),
    Cancelled,
}

impl From<StageError> for Halt {
    fn from(e: StageError) -> Self {
        Halt::Failed(vec![e])
    }
}

fn checkpoint(cancel: &CancelToken, next: Stage) -> Result<(), Halt> {
    if cancel.is_cancelled() {
        tracing::info!("build cancelled before {next}");
        return Err(Halt::Cancelled);
    }
    Ok(())
}

/// Owns the long-lived pieces shared across builds: the render engine slot
/// and the asset cache.
pub struct Builder {
    config: ProjectConfig,
    engine: EngineSlot,
    cache: AssetCache,
    rasterizer: Box<dyn Rasterizer>,
}

impl Builder {
    /// Builder rendering through headless Chrome.
    pub fn new(config: ProjectConfig) -> Self {
        let engine = EngineSlot::chrome(config.render.clone());
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: ProjectConfig, engine: EngineSlot) -> Self {
        Self {
            config,
            engine,
            cache: AssetCache::new(),
            rasterizer: Box::new(ResvgRasterizer::new()),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Number of render engines launched so far.
    pub fn engine_launches(&self) -> usize {
        self.engine.launches()
    }

    /// Run the whole pipeline once.
    pub fn build(&mut self, request: &BuildRequest, cancel: &CancelToken) -> BuildResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let outcome = match self.run(request, cancel, &mut warnings) {
            Ok((output, size)) => Outcome::Success { output, size },
            Err(Halt::Failed(errors)) => {
                for e in &errors {
                    tracing::error!("{e}");
                }
                Outcome::Failed { errors }
            }
            Err(Halt::Cancelled) => Outcome::Cancelled,
        };
        BuildResult {
            outcome,
            warnings,
            elapsed: started.elapsed(),
            cache: self.cache.take_stats(),
        }
    }

    /// Load, bibliography and assets only. Nothing is rendered or written.
    pub fn check(&self, request: &BuildRequest) -> Result<Prepared, Vec<StageError>> {
        let prepared = self.prepare(request).map_err(|e| vec![e])?;
        template::check_layouts(&prepared.template, &prepared.document)
            .map_err(|e| vec![StageError::new(Stage::Template, e)])?;
        Ok(prepared)
    }

    fn run(
        &mut self,
        request: &BuildRequest,
        cancel: &CancelToken,
        warnings: &mut Vec<Warning>,
    ) -> Result<(PathBuf, usize), Halt> {
        checkpoint(cancel, Stage::Load)?;
        let prepared = self.prepare(request)?;
        warnings.extend(prepared.warnings);

        checkpoint(cancel, Stage::Template)?;
        tracing::info!("rendering template {}", prepared.template.entry_path().display());
        let rendered = template::render(
            &prepared.template,
            &prepared.document,
            prepared.bibliography.as_ref(),
            &prepared.assets,
        )
        .map_err(|e| StageError::new(Stage::Template, e))?;
        warnings.extend(rendered.warnings);

        if request.keep_html {
            write_atomic(&request.html_path(), rendered.html.as_bytes(), None)
                .map_err(|e| StageError::new(Stage::Write, e))?;
        }

        checkpoint(cancel, Stage::Render)?;
        tracing::info!("rendering document");
        let base_url = render::file_url(&prepared.template.dir);
        let options = PageOptions::from_config(&self.config.page);
        let bytes = self
            .engine
            .with_engine(|engine| render::render_document(engine, &rendered.html, &base_url, &options))
            .map_err(|e| StageError::new(Stage::Render, e))?;

        checkpoint(cancel, Stage::Write)?;
        match write_atomic(&request.output, &bytes, Some(cancel)) {
            Ok(true) => {}
            Ok(false) => return Err(Halt::Cancelled),
            Err(e) => return Err(StageError::new(Stage::Write, e).into()),
        }
        tracing::info!("wrote {} ({} bytes)", request.output.display(), bytes.len());
        Ok((request.output.clone(), bytes.len()))
    }

    fn prepare(&self, request: &BuildRequest) -> Result<Prepared, StageError> {
        tracing::info!("loading {} input file(s)", request.inputs.len());
        let document = load::load(&request.inputs, self.config.assets.default_dpi)
            .map_err(|e| StageError::new(Stage::Load, e))?;

        let spec = request
            .template
            .as_deref()
            .or(document.theme.as_deref())
            .unwrap_or(&self.config.build.theme);
        let template =
            TemplateRef::resolve(spec, &request.root).map_err(|e| StageError::new(Stage::Template, e))?;

        let bib_path = request
            .bibliography
            .clone()
            .or_else(|| document.bibliography.clone());
        let references = assets::merge_references(
            assets::discover(&template.assets_dir(), self.config.assets.default_dpi),
            &document.assets,
        );
        let rasterizer = self.rasterizer.as_ref();
        let cache = &self.cache;

        let (bib, resolved_assets) = rayon::join(
            || bib_path.as_deref().map(bibliography::resolve),
            || {
                tracing::info!("resolving {} asset(s)", references.len());
                assets::resolve_all(&references, rasterizer, cache)
            },
        );

        // Only a run that resolved assets knows which cache entries are stale.
        let evicted = cache.sweep();
        if evicted > 0 {
            tracing::debug!("evicted {evicted} unused assets from cache");
        }

        let mut warnings = Vec::new();
        let bibliography = match bib {
            None => None,
            Some(Ok(resolved)) => {
                warnings.extend(resolved.warnings);
                Some(resolved.bibliography)
            }
            Some(Err(e)) if document.cites() => {
                return Err(StageError::new(Stage::Bibliography, e));
            }
            Some(Err(e)) => {
                tracing::warn!("{e}");
                warnings.push(Warning::new(Stage::Bibliography, e.to_string()));
                None
            }
        };
        warnings.extend(resolved_assets.warnings);

        Ok(Prepared {
            document,
            template,
            bibliography,
            assets: resolved_assets.assets,
            warnings,
        })
    }
}

/// Write `bytes` to `path` through a temporary sibling file and a rename.
///
/// With a `cancel` token, the flag is checked after the data is on disk and
/// before the rename; `Ok(false)` means the rename was skipped.
pub fn write_atomic(
    path: &Path,
    bytes: &[u8],
    cancel: Option<&CancelToken>,
) -> std::io::Result<bool> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".cvpress-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Ok(false);
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(true)
}
