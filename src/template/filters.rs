//! Template filters available to every theme.
//!
//! | Filter | Example | Result |
//! |--------|---------|--------|
//! | `strip_url_protocol` | `"https://x.dev/a"` | `x.dev/a` |
//! | `github_username` | `"https://github.com/jane/cv"` | `jane` |
//! | `parse_date` | `"2022-03"` | `2022-03-01` |
//! | `format_date(fmt)` | `"2022-03-05"\|format_date("%B %Y")` | `March 2022` |
//! | `day_suffix` | `"2022-03-02"` | `nd` |
//! | `href_phone` | `"+49 (0) 123-45"` | `tel:+49012345` |
//! | `href_email` | `"a@b.c"` | `mailto:a@b.c` |
//! | `split_paragraphs` | `"a\n\nb"` | `["a", "b"]` |
//! | `markdown` | `"*hi*"` | `<p><em>hi</em></p>` (safe) |
//! | `b64encode` | `"abc"` | `YWJj` |
//! | `set_fill(color)` / `set_stroke(color)` | inline SVG markup | recolored `<path>`s (safe) |
//! | `add_attributes(**attrs)` | inline SVG markup | attributes set on the root `<svg>` (safe) |
//! | `embed_image(ext="png", **attrs)` | base64 text | `<img src="data:...">` (safe) |
//! | `embed_js` | script source | `<script>` element (safe) |
//! | `rasterize(dpi=300)` | SVG markup or bytes | PNG bytes |
//! | `bibtex` | BibTeX source | numbered `<ol class="bibliography">` (safe) |
//!
//! `class_` is accepted as a spelling of `class` in attribute keywords; giving
//! both is an error. `svg|rasterize|b64encode|embed_image` inlines an icon as
//! a bitmap.
//!
//! Dates are passed between filters as ISO `YYYY-MM-DD` strings, so
//! `"2022-03"|parse_date|format_date("%b %Y")` and `"2022-03"|format_date("%b %Y")`
//! are equivalent.

use crate::assets::{Rasterizer, ResvgRasterizer};
use crate::bibliography::{self, BibliographyRecord};
use crate::model::Resolution;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{Datelike, NaiveDate};
use image::ImageFormat;
use minijinja::value::Kwargs;
use minijinja::{Environment, Error, ErrorKind, Value};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Write as _;
use std::io::Cursor;

pub fn register(env: &mut Environment<'_>) {
    env.add_filter("strip_url_protocol", strip_url_protocol);
    env.add_filter("github_username", github_username);
    env.add_filter("parse_date", parse_date);
    env.add_filter("format_date", format_date);
    env.add_filter("day_suffix", day_suffix);
    env.add_filter("href_phone", href_phone);
    env.add_filter("href_email", href_email);
    env.add_filter("split_paragraphs", split_paragraphs);
    env.add_filter("markdown", markdown);
    env.add_filter("b64encode", b64encode);
    env.add_filter("set_fill", set_fill);
    env.add_filter("set_stroke", set_stroke);
    env.add_filter("add_attributes", add_attributes);
    env.add_filter("embed_image", embed_image);
    env.add_filter("embed_js", embed_js);
    env.add_filter("rasterize", rasterize);
    env.add_filter("bibtex", bibtex);
}

/// Default resolution of the `rasterize` filter.
pub const RASTERIZE_DPI: u32 = 300;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `scheme://rest` → `rest`. A string without a scheme is an error.
pub fn strip_url_protocol(url: &str) -> Result<String, Error> {
    match url.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty() && scheme.chars().all(is_word_char) && !rest.is_empty() =>
        {
            Ok(rest.to_string())
        }
        _ => Err(invalid(format!("invalid URL: {url}"))),
    }
}

/// User name from a `https://github.com/<user>[/...]` URL.
pub fn github_username(url: &str) -> Result<String, Error> {
    let rest = strip_url_protocol(url)?;
    let invalid_url = || invalid(format!("invalid GitHub URL: {url}"));
    let path = rest.strip_prefix("github.com/").ok_or_else(invalid_url)?;
    let end = path
        .find(|c: char| !(is_word_char(c) || c == '-'))
        .unwrap_or(path.len());
    let (user, tail) = path.split_at(end);
    if user.is_empty() || !(tail.is_empty() || tail.starts_with('/')) {
        return Err(invalid_url());
    }
    Ok(user.to_string())
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM` and `YYYY`; missing parts default to 1.
pub fn to_date(value: &str) -> Result<NaiveDate, Error> {
    let bad = || invalid(format!("invalid date: {value}"));
    let padded = match value.len() {
        10 => value.to_string(),
        7 => format!("{value}-01"),
        4 => format!("{value}-01-01"),
        _ => return Err(bad()),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d").map_err(|_| bad())
}

pub fn parse_date(value: &str) -> Result<String, Error> {
    Ok(to_date(value)?.format("%Y-%m-%d").to_string())
}

/// strftime-style formatting via chrono.
pub fn format_date(value: &str, format: &str) -> Result<String, Error> {
    let date = to_date(value)?;
    let mut out = String::new();
    write!(out, "{}", date.format(format))
        .map_err(|_| invalid(format!("invalid date format: {format}")))?;
    Ok(out)
}

/// English ordinal suffix for the day of a date (or a bare day number).
pub fn day_suffix(value: Value) -> Result<String, Error> {
    let day = match value.as_i64() {
        Some(n) if (1..=31).contains(&n) => n as u32,
        Some(n) => return Err(invalid(format!("invalid day: {n}"))),
        None => {
            let text = value
                .as_str()
                .ok_or_else(|| invalid("day_suffix expects a date string or a day number"))?;
            to_date(text)?.day()
        }
    };
    Ok(suffix_for_day(day).to_string())
}

fn suffix_for_day(day: u32) -> &'static str {
    if (4..=20).contains(&day) || (24..=30).contains(&day) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        _ => "rd",
    }
}

pub fn href_phone(phone: &str) -> String {
    let digits: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    format!("tel:{digits}")
}

pub fn href_email(email: &str) -> String {
    format!("mailto:{email}")
}

pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n").map(str::to_string).collect()
}

/// CommonMark → HTML, marked safe.
pub fn markdown(text: &str) -> Value {
    use pulldown_cmark::{Options, Parser, html};
    let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    Value::from_safe_string(out)
}

pub fn b64encode(value: Value) -> Result<String, Error> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| invalid("b64encode expects a string or bytes"))?;
    Ok(STANDARD.encode(bytes))
}

pub fn set_fill(svg: &str, color: &str) -> Result<Value, Error> {
    set_path_attribute(svg, "fill", color).map(Value::from_safe_string)
}

pub fn set_stroke(svg: &str, color: &str) -> Result<Value, Error> {
    set_path_attribute(svg, "stroke", color).map(Value::from_safe_string)
}

/// Rewrite `attr` on every `<path>` element of an SVG document.
fn set_path_attribute(svg: &str, attr: &str, value: &str) -> Result<String, Error> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(svg.len())));

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"path" => {
                Event::Start(with_attribute(&e, attr, value).map_err(xml_err)?)
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"path" => {
                Event::Empty(with_attribute(&e, attr, value).map_err(xml_err)?)
            }
            Ok(event) => event,
            Err(e) => return Err(xml_err(e)),
        };
        writer.write_event(event).map_err(xml_err)?;
    }

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    invalid(format!("invalid SVG: {e}"))
}

fn with_attribute(
    element: &BytesStart<'_>,
    attr: &str,
    value: &str,
) -> Result<BytesStart<'static>, quick_xml::events::attributes::AttrError> {
    with_attributes(element, &[(attr.to_string(), value.to_string())])
}

/// Copy `element`, replacing or appending each of `attrs`.
fn with_attributes(
    element: &BytesStart<'_>,
    attrs: &[(String, String)],
) -> Result<BytesStart<'static>, quick_xml::events::attributes::AttrError> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut rebuilt = BytesStart::new(name);
    for a in element.attributes() {
        let a = a?;
        if !attrs.iter().any(|(k, _)| k.as_bytes() == a.key.as_ref()) {
            rebuilt.push_attribute(a);
        }
    }
    for (k, v) in attrs {
        rebuilt.push_attribute((k.as_str(), v.as_str()));
    }
    Ok(rebuilt)
}

/// Keyword arguments as sorted `(name, value)` pairs, with `class_` read as
/// `class`. Names in `skip` are left to the caller.
pub fn attributes(kwargs: &Kwargs, skip: &[&str]) -> Result<Vec<(String, String)>, Error> {
    let mut attrs = Vec::new();
    for key in kwargs.args() {
        if skip.contains(&key) {
            continue;
        }
        let value: Value = kwargs.get(key)?;
        let name = if key == "class_" { "class" } else { key };
        if attrs.iter().any(|(k, _): &(String, String)| k == name) {
            return Err(invalid("cannot set both `class` and `class_`"));
        }
        attrs.push((name.to_string(), value.to_string()));
    }
    attrs.sort();
    Ok(attrs)
}

/// Set attributes on the root `<svg>` element only.
pub fn add_attributes(svg: &str, kwargs: Kwargs) -> Result<Value, Error> {
    let attrs = attributes(&kwargs, &[])?;
    set_root_attributes(svg, &attrs).map(Value::from_safe_string)
}

pub(crate) fn set_root_attributes(svg: &str, attrs: &[(String, String)]) -> Result<String, Error> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(svg.len())));
    let mut seen_root = false;

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) if !seen_root && e.local_name().as_ref() == b"svg" => {
                seen_root = true;
                Event::Start(with_attributes(&e, attrs).map_err(xml_err)?)
            }
            Ok(Event::Empty(e)) if !seen_root && e.local_name().as_ref() == b"svg" => {
                seen_root = true;
                Event::Empty(with_attributes(&e, attrs).map_err(xml_err)?)
            }
            Ok(event) => event,
            Err(e) => return Err(xml_err(e)),
        };
        writer.write_event(event).map_err(xml_err)?;
    }

    if !seen_root {
        return Err(invalid("invalid SVG: no <svg> element"));
    }
    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

/// Mime type for a file extension; `svg` and the raster formats `image` knows.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    if extension == "svg" {
        return Some("image/svg+xml");
    }
    ImageFormat::from_extension(&extension).map(|f| f.to_mime_type())
}

/// `<img>` with base64 `data` inlined.
pub fn embed_image(data: &str, extension: Option<&str>, kwargs: Kwargs) -> Result<Value, Error> {
    let extension = match extension {
        Some(ext) => ext.to_string(),
        None => kwargs
            .get::<Option<String>>("extension")?
            .unwrap_or_else(|| "png".to_string()),
    };
    let mime = mime_for_extension(&extension)
        .ok_or_else(|| invalid(format!("unknown image extension: {extension}")))?;
    let attrs = attributes(&kwargs, &["extension"])?;
    Ok(Value::from_safe_string(img_tag(
        &format!("data:{mime};base64,{data}"),
        &attrs,
    )))
}

fn img_tag(src: &str, attrs: &[(String, String)]) -> String {
    let mut out = String::from("<img");
    for (k, v) in attrs {
        let _ = write!(out, " {k}=\"{}\"", escape(v.as_str()));
    }
    let _ = write!(out, " src=\"{}\">", escape(src));
    out
}

pub fn embed_js(code: &str) -> Value {
    Value::from_safe_string(format!("<script type=\"text/javascript\">{code}</script>"))
}

/// SVG → PNG bytes at `dpi`.
pub fn rasterize(svg: Value, dpi: Option<u32>) -> Result<Value, Error> {
    let bytes = svg
        .as_bytes()
        .ok_or_else(|| invalid("rasterize expects SVG markup or bytes"))?;
    let png = ResvgRasterizer::new()
        .rasterize(bytes, Resolution::Dpi(dpi.unwrap_or(RASTERIZE_DPI)))
        .map_err(|e| invalid(e.to_string()))?;
    Ok(Value::from_bytes(png))
}

/// Render BibTeX source as a numbered reference list.
///
/// Names are abbreviated to initials plus family name. Entries the parser
/// skips are logged, not fatal.
pub fn bibtex(source: &str) -> Value {
    let resolved = bibliography::parse_source(source, "bibtex filter");
    let mut out = String::from("<ol class=\"bibliography\">");
    for record in resolved.bibliography.records() {
        let _ = write!(
            out,
            "<li id=\"{}\">{}</li>",
            escape(record.key.as_str()),
            reference_html(record)
        );
    }
    out.push_str("</ol>");
    Value::from_safe_string(out)
}

fn reference_html(record: &BibliographyRecord) -> String {
    let mut parts = Vec::new();
    if !record.authors.is_empty() {
        let names: Vec<String> = record.authors.iter().map(|a| abbreviate(a)).collect();
        parts.push(escape(join_names(&names).as_str()).into_owned());
    }
    if let Some(title) = record.field("title") {
        parts.push(format!("<em>{}</em>", escape(strip_braces(title).as_str())));
    }
    let venue = ["journal", "booktitle", "publisher", "school", "institution"]
        .iter()
        .find_map(|f| record.field(f));
    let tail: Vec<String> = venue
        .into_iter()
        .chain(record.field("year"))
        .map(|s| escape(strip_braces(s).as_str()).into_owned())
        .collect();
    if !tail.is_empty() {
        parts.push(tail.join(", "));
    }
    let mut text = parts.join(". ");
    if !text.is_empty() {
        text.push('.');
    }
    text
}

fn strip_braces(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '{' | '}')).collect()
}

/// "Donald E. Knuth" → "D. E. Knuth".
fn abbreviate(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let Some((family, given)) = words.split_last() else {
        return String::new();
    };
    let mut out: Vec<String> = given
        .iter()
        .filter_map(|w| w.chars().next())
        .map(|c| format!("{c}."))
        .collect();
    out.push(strip_braces(family));
    out.join(" ")
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}
