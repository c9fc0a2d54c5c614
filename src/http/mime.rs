//! Content-Type detection from file extensions.

use std::path::Path;

/// Types that get the server's default charset appended.
const TEXT_TYPES: &[&str] = &[
    "text/css",
    "text/html",
    "text/javascript",
    "application/javascript",
    "text/plain",
];

/// `Content-Type` value for `path`, or `None` when the extension is unknown.
///
/// ```
/// # use srs::http::mime::content_type;
/// # use std::path::Path;
/// assert_eq!(
///     content_type(Path::new("index.html"), "UTF-8").as_deref(),
///     Some("text/html; charset=UTF-8")
/// );
/// assert_eq!(content_type(Path::new("logo.png"), "UTF-8").as_deref(), Some("image/png"));
/// ```
pub fn content_type(path: &Path, charset: &str) -> Option<String> {
    let mime = mime_guess::from_path(path).first()?;
    let essence = mime.essence_str();

    if TEXT_TYPES.contains(&essence) {
        Some(format!("{essence}; charset={charset}"))
    } else {
        Some(essence.to_string())
    }
}
