//! Template renderer: model + bibliography + assets → HTML.
//!
//! Templates are minijinja files loaded from a template directory at run
//! time. The entry template (usually `cv.html`) sees exactly this binding
//! contract and nothing else:
//!
//! | Name | Kind | Contents |
//! |------|------|----------|
//! | `cv` | value | document meta keys plus `sections` |
//! | `cv.sections[i]` | value | `title`, `kind` (`text` / `entries` / `bibliography`), `layout`, `text`, `entries`, `records` |
//! | `bibliography` | value | every record, in source order |
//! | `theme_dir` | value | absolute template directory |
//! | `cite(key)` | function | one record; unknown key fails the render |
//! | `asset(id)` | function | `data:` URI; unknown id → placeholder + warning |
//! | `read_text(path)` | function | file contents, relative to the template directory |
//! | `read_bytes(path)` | function | raw file bytes, for `b64encode` / `rasterize` |
//! | `embed_svg(path, **attrs)` | function | inline SVG with attributes set on its root |
//!
//! The file functions refuse paths that leave the template directory. The
//! filters are listed in [`filters`].
//!
//! Every section key is always present (`null` / empty when not applicable),
//! so templates can branch on `section.kind` under strict undefined checks.
//!
//! Section layouts are checked before rendering: a section with
//! `layout: compact` requires `sections/compact.html` in the template
//! directory, and its absence is reported as [`TemplateError::UndefinedLayout`]
//! rather than as a failed include deep inside the template.
//!
//! ## Theme lookup
//!
//! A template reference is either a path (a template file, or a directory
//! containing `cv.html`) or a theme name. Names are looked up as
//! `themes/<name>/templates/cv.html` under the working directory, then under
//! its parent.

pub mod filters;

use crate::assets::{AssetMap, PLACEHOLDER_SVG};
use crate::bibliography::Bibliography;
use crate::error::{Stage, Warning};
use crate::model::{DocumentModel, SectionContent};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use minijinja::value::Kwargs;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior, Value, context};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Default entry template name.
pub const ENTRY_TEMPLATE: &str = "cv.html";
/// Directory (relative to the template directory) holding section layouts.
pub const LAYOUT_DIR: &str = "sections";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{name}{}: {message}", .line.map(|l| format!(":{l}")).unwrap_or_default())]
    Engine {
        name: String,
        line: Option<usize>,
        message: String,
    },
    #[error("section `{section}` uses layout `{layout}`, but sections/{layout}.html does not exist")]
    UndefinedLayout { section: String, layout: String },
    #[error("section `{section}` cites unknown key `{key}`")]
    UnknownCitation { section: String, key: String },
    #[error("section `{section}` lists publications, but no bibliography file is configured")]
    NoBibliography { section: String },
    #[error("template directory not found: {}", .0.display())]
    TemplateDirMissing(PathBuf),
    #[error("theme `{name}` not found (looked for {})", .searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    ThemeNotFound { name: String, searched: Vec<PathBuf> },
}

impl From<Error> for TemplateError {
    fn from(err: Error) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {detail}", err.kind()),
            None => err.kind().to_string(),
        };
        TemplateError::Engine {
            name: err.name().unwrap_or("<template>").to_string(),
            line: err.line(),
            message,
        }
    }
}

/// Which template to render: a directory plus the entry file inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub dir: PathBuf,
    pub entry: String,
}

impl TemplateRef {
    pub fn new(dir: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            entry: entry.into(),
        }
    }

    /// Resolve a user-supplied reference: an existing file, an existing
    /// directory (entry `cv.html`), or a theme name.
    pub fn resolve(spec: &str, cwd: &Path) -> Result<Self, TemplateError> {
        let as_path = cwd.join(spec);
        if as_path.is_file() {
            let dir = as_path.parent().unwrap_or(cwd).to_path_buf();
            let entry = as_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ENTRY_TEMPLATE.to_string());
            return Ok(Self::new(dir, entry));
        }
        if as_path.is_dir() {
            return Ok(Self::new(as_path, ENTRY_TEMPLATE));
        }
        Self::theme(spec, cwd)
    }

    /// Find `themes/<name>/templates/` under `cwd`, then under its parent.
    pub fn theme(name: &str, cwd: &Path) -> Result<Self, TemplateError> {
        let mut searched = Vec::new();
        for root in std::iter::once(cwd).chain(cwd.parent()) {
            let dir = root.join("themes").join(name).join("templates");
            if dir.join(ENTRY_TEMPLATE).is_file() {
                return Ok(Self::new(dir, ENTRY_TEMPLATE));
            }
            searched.push(dir);
        }
        Err(TemplateError::ThemeNotFound {
            name: name.to_string(),
            searched,
        })
    }

    /// Files a theme may ship next to its templates (`<theme>/assets`).
    pub fn assets_dir(&self) -> PathBuf {
        let root = if self.dir.file_name().is_some_and(|n| n == "templates") {
            self.dir.parent().unwrap_or(&self.dir)
        } else {
            &self.dir
        };
        root.join("assets")
    }

    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }
}

/// Themes visible from `cwd`, as `(name, template dir)`, sorted by name.
/// A theme in `cwd` shadows one with the same name in its parent.
pub fn list_themes(cwd: &Path) -> Vec<(String, PathBuf)> {
    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for root in std::iter::once(cwd).chain(cwd.parent()) {
        let Ok(entries) = std::fs::read_dir(root.join("themes")) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let dir = entry.path().join("templates");
            if dir.join(ENTRY_TEMPLATE).is_file() && !found.iter().any(|(n, _)| *n == name) {
                found.push((name, dir));
            }
        }
    }
    found.sort();
    found
}

/// HTML plus the warnings collected while rendering it.
#[derive(Debug)]
pub struct Rendered {
    pub html: String,
    pub warnings: Vec<Warning>,
}

/// Render the entry template of `template`.
pub fn render(
    template: &TemplateRef,
    doc: &DocumentModel,
    bibliography: Option<&Bibliography>,
    assets: &AssetMap,
) -> Result<Rendered, TemplateError> {
    if !template.dir.is_dir() {
        return Err(TemplateError::TemplateDirMissing(template.dir.clone()));
    }
    check_layouts(template, doc)?;
    let cv = bind_cv(doc, bibliography)?;

    let warnings = Arc::new(Mutex::new(Vec::new()));
    let env = environment(template, bibliography, assets, Arc::clone(&warnings));
    let all_records: Vec<_> = bibliography.map(|b| b.records().to_vec()).unwrap_or_default();

    let tmpl = env.get_template(&template.entry)?;
    let html = tmpl.render(context! {
        cv => Value::from_serialize(&cv),
        bibliography => Value::from_serialize(&all_records),
        theme_dir => template.dir.to_string_lossy().into_owned(),
    })?;
    tracing::debug!("rendered {} ({} bytes)", template.entry, html.len());

    let warnings = std::mem::take(&mut *warnings.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(Rendered { html, warnings })
}

/// Every declared layout must exist as a partial.
pub fn check_layouts(template: &TemplateRef, doc: &DocumentModel) -> Result<(), TemplateError> {
    for section in &doc.sections {
        if let Some(layout) = &section.layout {
            let partial = template.dir.join(LAYOUT_DIR).join(format!("{layout}.html"));
            if !partial.is_file() {
                return Err(TemplateError::UndefinedLayout {
                    section: section.title.clone(),
                    layout: layout.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Build the `cv` value: meta keys plus fully-populated sections.
fn bind_cv(
    doc: &DocumentModel,
    bibliography: Option<&Bibliography>,
) -> Result<serde_json::Value, TemplateError> {
    let mut sections = Vec::with_capacity(doc.sections.len());
    for section in &doc.sections {
        let (text, entries, records) = match &section.content {
            SectionContent::Text { text } => (json!(text), json!([]), json!([])),
            SectionContent::Entries { entries } => (json!(null), json!(entries), json!([])),
            SectionContent::Bibliography { keys } => {
                let bib = bibliography.ok_or_else(|| TemplateError::NoBibliography {
                    section: section.title.clone(),
                })?;
                let records = match keys {
                    None => json!(bib.records()),
                    Some(keys) => json!(bib.select(keys).map_err(|key| {
                        TemplateError::UnknownCitation {
                            section: section.title.clone(),
                            key,
                        }
                    })?),
                };
                (json!(null), json!([]), records)
            }
        };
        sections.push(json!({
            "title": section.title,
            "kind": section.content.kind(),
            "layout": section.layout,
            "text": text,
            "entries": entries,
            "records": records,
        }));
    }

    let mut cv = doc.meta.clone();
    cv.insert("sections".to_string(), serde_json::Value::Array(sections));
    Ok(serde_json::Value::Object(cv))
}

fn environment(
    template: &TemplateRef,
    bibliography: Option<&Bibliography>,
    assets: &AssetMap,
    warnings: Arc<Mutex<Vec<Warning>>>,
) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader(&template.dir));
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|name| {
        if name.ends_with(".css") || name.ends_with(".js") || name.ends_with(".txt") {
            AutoEscape::None
        } else {
            AutoEscape::Html
        }
    });
    filters::register(&mut env);

    let records: HashMap<String, Value> = bibliography
        .map(|b| {
            b.records()
                .iter()
                .map(|r| (r.key.clone(), Value::from_serialize(r)))
                .collect()
        })
        .unwrap_or_default();
    env.add_function("cite", move |key: &str| -> Result<Value, Error> {
        records.get(key).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown citation key `{key}`"),
            )
        })
    });

    let uris: HashMap<String, String> = assets
        .iter()
        .map(|(id, asset)| (id.clone(), asset.data_uri()))
        .collect();
    let placeholder = format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(PLACEHOLDER_SVG)
    );
    let reported = Mutex::new(HashSet::new());
    // data: URIs are plain ASCII; marked safe so `/` is not entity-escaped.
    env.add_function("asset", move |id: &str| -> Value {
        if let Some(uri) = uris.get(id) {
            return Value::from_safe_string(uri.clone());
        }
        let first = reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        if first {
            tracing::warn!("template uses undeclared asset `{id}`; using placeholder");
            warnings
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Warning::new(
                    Stage::Template,
                    format!("undeclared asset `{id}` replaced by placeholder"),
                ));
        }
        Value::from_safe_string(placeholder.clone())
    });

    let root = template.dir.clone();
    env.add_function("read_text", move |path: &str| read_text(&root, path));
    let root = template.dir.clone();
    env.add_function("read_bytes", move |path: &str| {
        read_bytes(&root, path).map(Value::from_bytes)
    });
    let root = template.dir.clone();
    env.add_function("embed_svg", move |path: &str, kwargs: Kwargs| -> Result<Value, Error> {
        let attrs = filters::attributes(&kwargs, &[])?;
        let svg = read_text(&root, path)?;
        filters::set_root_attributes(&svg, &attrs).map(Value::from_safe_string)
    });
    env
}

/// `path` relative to `root`, refusing anything that escapes `root`.
fn confined(root: &Path, path: &str, function: &str) -> Result<PathBuf, Error> {
    let io_err = |e: std::io::Error| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("{function}({path}): {e}"),
        )
    };
    let root = root.canonicalize().map_err(io_err)?;
    let target = root.join(path).canonicalize().map_err(io_err)?;
    if !target.starts_with(&root) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("{function}({path}): outside the template directory"),
        ));
    }
    Ok(target)
}

fn read_text(root: &Path, path: &str) -> Result<String, Error> {
    let target = confined(root, path, "read_text")?;
    std::fs::read_to_string(&target).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("read_text({path}): {e}"),
        )
    })
}

fn read_bytes(root: &Path, path: &str) -> Result<Vec<u8>, Error> {
    let target = confined(root, path, "read_bytes")?;
    std::fs::read(&target).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("read_bytes({path}): {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ResolvedAsset;
    use crate::bibliography::parse_source;
    use crate::load;
    use crate::model::Resolution;
    use crate::test_helpers::*;
    use tempfile::TempDir;

    fn logo_assets() -> AssetMap {
        let mut assets = AssetMap::new();
        assets.insert(
            "logo".into(),
            Arc::new(ResolvedAsset {
                bytes: b"abc".to_vec(),
                mime: "image/png",
                resolution: Resolution::Dpi(300),
                placeholder: false,
            }),
        );
        assets
    }

    fn project_doc(tmp: &TempDir) -> DocumentModel {
        load::load(&[tmp.path().join("cv.yaml")], 300).unwrap()
    }

    fn fixture_template(tmp: &TempDir) -> TemplateRef {
        TemplateRef::new(tmp.path().join("templates"), ENTRY_TEMPLATE)
    }

    // =========================================================================
    // Binding contract
    // =========================================================================

    #[test]
    fn renders_section_title_and_entry_text() {
        let tmp = setup_project();
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap();
        assert!(out.html.contains("<h2>Experience</h2>"));
        assert!(out.html.contains("ACME Rocket Works, Staff Engineer"));
        assert!(out.html.contains("data:image/png;base64,YWJj"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn meta_is_autoescaped() {
        let tmp = setup_project();
        let mut doc = project_doc(&tmp);
        doc.meta.insert("name".into(), json!("<b>Jane</b>"));
        let out = render(&fixture_template(&tmp), &doc, None, &logo_assets()).unwrap();
        assert!(out.html.contains("&lt;b&gt;Jane"));
        assert!(!out.html.contains("<b>Jane"));
    }

    #[test]
    fn undeclared_asset_is_placeholder_with_one_warning() {
        let tmp = setup_project();
        write_file(
            tmp.path(),
            "templates/cv.html",
            r#"<img src="{{ asset('nope') }}"><img src="{{ asset('nope') }}">"#,
        );
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &AssetMap::new(),
        )
        .unwrap();
        assert!(out.html.contains("data:image/svg+xml;base64,"));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].stage, Stage::Template);
    }

    #[test]
    fn cite_and_bibliography_sections() {
        let tmp = setup_project();
        let bib = parse_source(
            "@misc{b, title={Second}}\n@misc{a, title={First}}\n",
            "pubs.bib",
        )
        .bibliography;
        write_file(
            tmp.path(),
            "cv.yaml",
            "sections:\n  - title: Publications\n    bibliography: [a]\n",
        );
        write_file(
            tmp.path(),
            "templates/cv.html",
            "{% for s in cv.sections %}{% for r in s.records %}[{{ r.title }}]{% endfor %}{% endfor %}|{{ cite('b').title }}|{{ bibliography|length }}",
        );
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            Some(&bib),
            &AssetMap::new(),
        )
        .unwrap();
        assert_eq!(out.html, "[First]|Second|2");
    }

    #[test]
    fn unknown_cite_fails_render() {
        let tmp = setup_project();
        let bib = parse_source("@misc{a, title={T}}", "x.bib").bibliography;
        write_file(tmp.path(), "templates/cv.html", "{{ cite('zzz').title }}");
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            Some(&bib),
            &AssetMap::new(),
        )
        .unwrap_err();
        match err {
            TemplateError::Engine { name, message, .. } => {
                assert_eq!(name, "cv.html");
                assert!(message.contains("zzz"));
            }
            other => panic!("expected Engine error, got {other:?}"),
        }
    }

    #[test]
    fn section_selecting_unknown_key_fails_at_bind() {
        let tmp = setup_project();
        let bib = parse_source("@misc{a, title={T}}", "x.bib").bibliography;
        write_file(
            tmp.path(),
            "cv.yaml",
            "sections:\n  - title: Pubs\n    bibliography: [missing]\n",
        );
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            Some(&bib),
            &AssetMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownCitation { key, .. } if key == "missing"));
    }

    #[test]
    fn bibliography_section_without_file_fails() {
        let tmp = setup_project();
        write_file(
            tmp.path(),
            "cv.yaml",
            "sections:\n  - title: Pubs\n    bibliography: true\n",
        );
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &AssetMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::NoBibliography { .. }));
    }

    // =========================================================================
    // Layouts
    // =========================================================================

    #[test]
    fn declared_layout_renders_partial() {
        let tmp = setup_project();
        let mut doc = project_doc(&tmp);
        doc.sections[0].layout = Some("compact".into());
        let out = render(&fixture_template(&tmp), &doc, None, &logo_assets()).unwrap();
        assert!(out.html.contains(r#"<ul class="compact"><li>ACME Rocket Works</li></ul>"#));
    }

    #[test]
    fn undefined_layout_fails_before_rendering() {
        let tmp = setup_project();
        let mut doc = project_doc(&tmp);
        doc.sections[0].layout = Some("timeline".into());
        let err = render(&fixture_template(&tmp), &doc, None, &logo_assets()).unwrap_err();
        match err {
            TemplateError::UndefinedLayout { section, layout } => {
                assert_eq!(section, "Experience");
                assert_eq!(layout, "timeline");
            }
            other => panic!("expected UndefinedLayout, got {other:?}"),
        }
    }

    // =========================================================================
    // Engine errors
    // =========================================================================

    #[test]
    fn undefined_variable_reports_line() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/cv.html", "line one\n{{ cv.nickname }}\n");
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap_err();
        match &err {
            TemplateError::Engine { name, line, .. } => {
                assert_eq!(name, "cv.html");
                assert_eq!(*line, Some(2));
            }
            other => panic!("expected Engine error, got {other:?}"),
        }
        assert!(err.to_string().starts_with("cv.html:2:"));
    }

    #[test]
    fn syntax_error_is_engine_error() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/cv.html", "{% for x in %}");
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::Engine { .. }));
    }

    #[test]
    fn missing_entry_template_is_engine_error() {
        let tmp = setup_project();
        let template = TemplateRef::new(tmp.path().join("templates"), "nope.html");
        let err = render(&template, &project_doc(&tmp), None, &logo_assets()).unwrap_err();
        assert!(matches!(err, TemplateError::Engine { .. }));
    }

    #[test]
    fn missing_directory_is_reported() {
        let tmp = setup_project();
        let template = TemplateRef::new(tmp.path().join("gone"), ENTRY_TEMPLATE);
        let err = render(&template, &project_doc(&tmp), None, &logo_assets()).unwrap_err();
        assert!(matches!(err, TemplateError::TemplateDirMissing(_)));
    }

    // =========================================================================
    // File functions
    // =========================================================================

    #[test]
    fn read_text_reads_inside_template_dir() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/style.css", "body { color: red; }");
        write_file(
            tmp.path(),
            "templates/cv.html",
            "<style>{{ read_text('style.css')|safe }}</style>",
        );
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap();
        assert_eq!(out.html, "<style>body { color: red; }</style>");
    }

    #[test]
    fn read_text_refuses_to_escape() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/cv.html", "{{ read_text('../cv.yaml') }}");
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside the template directory"));
    }

    #[test]
    fn embed_svg_inlines_with_root_attributes() {
        let tmp = setup_project();
        write_file(
            tmp.path(),
            "templates/icons/mail.svg",
            r#"<svg viewBox="0 0 16 16"><path d="M0 0"/></svg>"#,
        );
        write_file(
            tmp.path(),
            "templates/cv.html",
            r#"{{ embed_svg('icons/mail.svg', class_='icon', height='1em') }}"#,
        );
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap();
        assert_eq!(
            out.html,
            r#"<svg viewBox="0 0 16 16" class="icon" height="1em"><path d="M0 0"/></svg>"#
        );
    }

    #[test]
    fn read_bytes_feeds_image_filters() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/photo.jpg", "abc");
        write_file(
            tmp.path(),
            "templates/cv.html",
            r#"{{ read_bytes('photo.jpg')|b64encode|embed_image('jpg', alt='me') }}"#,
        );
        let out = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap();
        assert_eq!(
            out.html,
            r#"<img alt="me" src="data:image/jpeg;base64,YWJj">"#
        );
    }

    #[test]
    fn read_bytes_refuses_to_escape() {
        let tmp = setup_project();
        write_file(tmp.path(), "templates/cv.html", "{{ read_bytes('../cv.yaml') }}");
        let err = render(
            &fixture_template(&tmp),
            &project_doc(&tmp),
            None,
            &logo_assets(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("read_bytes(../cv.yaml): outside the template directory"));
    }

    // =========================================================================
    // TemplateRef
    // =========================================================================

    #[test]
    fn resolve_file_directory_and_theme() {
        let tmp = setup_project();
        let by_file = TemplateRef::resolve("templates/cv.html", tmp.path()).unwrap();
        assert_eq!(by_file, fixture_template(&tmp));

        let by_dir = TemplateRef::resolve("templates", tmp.path()).unwrap();
        assert_eq!(by_dir, fixture_template(&tmp));

        write_file(tmp.path(), "themes/modern/templates/cv.html", "x");
        let by_name = TemplateRef::resolve("modern", tmp.path()).unwrap();
        assert_eq!(by_name.dir, tmp.path().join("themes/modern/templates"));
        assert_eq!(by_name.assets_dir(), tmp.path().join("themes/modern/assets"));
    }

    #[test]
    fn theme_found_in_parent_directory() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "themes/classic/templates/cv.html", "x");
        let work = tmp.path().join("jobs");
        std::fs::create_dir_all(&work).unwrap();
        let t = TemplateRef::theme("classic", &work).unwrap();
        assert_eq!(t.dir, tmp.path().join("themes/classic/templates"));
    }

    #[test]
    fn unknown_theme_lists_searched_paths() {
        let tmp = TempDir::new().unwrap();
        let err = TemplateRef::theme("nope", tmp.path()).unwrap_err();
        match err {
            TemplateError::ThemeNotFound { searched, .. } => assert_eq!(searched.len(), 2),
            other => panic!("expected ThemeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn list_themes_prefers_working_directory() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("jobs");
        write_file(&work, "themes/modern/templates/cv.html", "x");
        write_file(tmp.path(), "themes/classic/templates/cv.html", "x");
        write_file(tmp.path(), "themes/modern/templates/cv.html", "x");
        write_file(tmp.path(), "themes/broken/templates/other.html", "x");

        let themes = list_themes(&work);
        let names: Vec<&str> = themes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["classic", "modern"]);
        assert_eq!(themes[1].1, work.join("themes/modern/templates"));
    }
}
