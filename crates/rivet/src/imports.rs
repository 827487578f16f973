//! Static import discovery on transformed module text.

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// `import x from '...'`, `import { a, b } from '...'` and bare `import '...'`
static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s+(?:[\w*{}\s,$]+?\s+from\s+)?["']([^"'\n]+)["']"#)
        .expect("valid import regex")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bexport\s+(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s+["']([^"'\n]+)["']"#)
        .expect("valid export regex")
});

static REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#).expect("valid require regex")
});

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#).expect("valid dynamic import regex")
});

/// Quotes may be escaped once the stylesheet has been wrapped in a string.
static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?\\?["']([^"'\\]+)\\?["']"#).expect("valid @import regex")
});

const STYLESHEET_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less"];

pub fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| STYLESHEET_EXTENSIONS.contains(&ext))
}

/// Import specifiers of one module, de-duplicated, in order of first
/// appearance.
pub fn extract_imports(path: &Path, source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    if is_stylesheet(path) {
        for captures in CSS_IMPORT.captures_iter(source) {
            if let Some(specifier) = captures.get(1) {
                found.push((specifier.start(), stylesheet_request(specifier.as_str())));
            }
        }
    } else {
        for regex in [&*IMPORT_FROM, &*EXPORT_FROM, &*REQUIRE, &*DYNAMIC_IMPORT] {
            for captures in regex.captures_iter(source) {
                if let Some(specifier) = captures.get(1) {
                    found.push((specifier.start(), specifier.as_str().to_owned()));
                }
            }
        }
    }

    found.sort_by_key(|(position, _)| *position);
    found
        .into_iter()
        .map(|(_, specifier)| specifier)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Stylesheet imports are relative unless prefixed with `~`, which names a
/// package.
fn stylesheet_request(specifier: &str) -> String {
    if let Some(package) = specifier.strip_prefix('~') {
        return package.to_owned();
    }
    let is_path_like = specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.contains("://")
        || specifier.starts_with("data:");
    if is_path_like {
        specifier.to_owned()
    } else {
        format!("./{specifier}")
    }
}
