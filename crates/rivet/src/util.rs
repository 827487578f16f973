use cow_utils::CowUtils;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::Path;
use sugar_path::SugarPath;

/// Normalize line endings to LF (\n) so output does not depend on the platform
/// the sources were checked out on.
pub fn normalize_line_endings(content: &str) -> Cow<'_, str> {
    match content.cow_replace("\r\n", "\n") {
        Cow::Borrowed(borrowed) => borrowed.cow_replace('\r', "\n"),
        Cow::Owned(owned) => Cow::Owned(owned.cow_replace('\r', "\n").into_owned()),
    }
}

/// Forward-slash rendering of `path` relative to `base`.
pub fn relative_slash_path(path: &Path, base: &Path) -> String {
    path.relative(base).as_path().to_slash_lossy().into_owned()
}

/// Human friendly name for a module file: its stem, or the parent directory
/// name for `index` files (`ui/index.js` -> `ui`).
pub fn representative_file_name(path: &Path) -> Cow<'_, str> {
    let file_name = path
        .file_stem()
        .map_or_else(|| path.to_string_lossy(), OsStr::to_string_lossy);

    match &*file_name {
        "index" => path
            .parent()
            .and_then(Path::file_stem)
            .map_or(file_name, OsStr::to_string_lossy),
        _ => file_name,
    }
}

/// Replace everything but ASCII alphanumerics, `-` and `_` so a chunk name can
/// be used inside a file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Escape `text` as a double-quoted JavaScript string literal.
pub fn js_string_literal(text: &str) -> String {
    // JSON strings are valid JS string literals; the two line separators are
    // the only characters JSON allows that older JS engines reject.
    serde_json::Value::String(text.to_owned())
        .to_string()
        .cow_replace('\u{2028}', "\\u2028")
        .cow_replace('\u{2029}', "\\u2029")
        .into_owned()
}
