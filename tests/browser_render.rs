//! End-to-end rendering through a real headless Chrome.
//!
//! Run with: `cargo test --test browser_render -- --ignored`

use cvpress::build::{BuildRequest, Builder, CancelToken};
use cvpress::config::{ProjectConfig, RenderConfig};
use cvpress::render::chrome::ChromeEngine;
use cvpress::render::{PageOptions, RenderEngine, file_url, render_document};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/jane-doe")
}

/// The demo CV, built once through the CLI into a scratch directory.
fn demo_build() -> &'static Path {
    static OUT: OnceLock<tempfile::TempDir> = OnceLock::new();
    OUT.get_or_init(|| {
        let out = tempfile::TempDir::new().expect("failed to create output dir");
        let status = Command::new(env!("CARGO_BIN_EXE_cvpress"))
            .args([
                "-C",
                demo_dir().to_str().unwrap(),
                "build",
                "--keep-html",
                "--output",
                out.path().join("jane-doe.pdf").to_str().unwrap(),
            ])
            .status()
            .expect("failed to run cvpress");
        assert!(status.success(), "demo build failed");
        out
    })
    .path()
}

fn assert_pdf(bytes: &[u8]) {
    assert!(
        bytes.starts_with(b"%PDF"),
        "not a PDF: {:?}",
        String::from_utf8_lossy(&bytes[..bytes.len().min(16)])
    );
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn demo_builds_to_pdf() {
    let pdf = std::fs::read(demo_build().join("jane-doe.pdf")).unwrap();
    assert_pdf(&pdf);
}

#[test]
#[ignore]
fn demo_keeps_html_and_leaves_no_temp_files() {
    let mut names: Vec<String> = std::fs::read_dir(demo_build())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["jane-doe.html", "jane-doe.pdf"]);
}

#[test]
#[ignore]
fn demo_html_embeds_theme_icons_and_publications() {
    let html = std::fs::read_to_string(demo_build().join("jane-doe.html")).unwrap();
    assert!(html.contains("Jane Doe"));
    assert!(html.contains("data:image/png;base64,"));
    assert!(html.contains("Cost-Aware Tiering for Object Stores"));
    assert!(html.contains("janedoe.dev"));
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn engine_exports_inline_document() {
    let mut engine = ChromeEngine::launch(&RenderConfig::default()).unwrap();
    let pdf = render_document(
        &mut engine,
        "<html><head><title>t</title></head><body><h1>Hello</h1></body></html>",
        "file:///",
        &PageOptions::default(),
    )
    .unwrap();
    assert_pdf(&pdf);
}

#[test]
#[ignore]
fn engine_resolves_relative_urls_against_base() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("my theme #1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("dot.svg"),
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><rect width="4" height="4"/></svg>"#,
    )
    .unwrap();

    let mut engine = ChromeEngine::launch(&RenderConfig::default()).unwrap();
    let page = engine
        .load(
            r#"<html><head></head><body><img src="dot.svg"></body></html>"#,
            &file_url(&dir),
        )
        .unwrap();
    let pdf = engine.export(&page, &PageOptions::default()).unwrap();
    engine.close(page);
    assert_pdf(&pdf);
}

#[test]
#[ignore]
fn builder_reuses_one_browser_across_builds() {
    let out = tempfile::TempDir::new().unwrap();
    let mut request = BuildRequest::from_config(&Default::default(), &demo_dir());
    request.output = out.path().join("cv.pdf");

    let mut builder = Builder::new(ProjectConfig::default());
    for _ in 0..2 {
        let result = builder.build(&request, &CancelToken::new());
        assert!(result.is_success(), "{:?}", result.errors());
    }
    assert_eq!(builder.engine_launches(), 1);
    assert_pdf(&std::fs::read(out.path().join("cv.pdf")).unwrap());
}
