//! # api-adapters
//!
//! The HTTP surface of the collector. Each web framework lives behind its
//! own feature; only axum (`web-axum`) exists today.

#[cfg(feature = "web-axum")]
pub mod http;

/// Plugin name carried by `/report/<name>`, taken verbatim.
pub fn plugin_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/report/")
}

/// Plugin name carried by `/report.php?plugin=<name>`: everything after
/// the `plugin=` prefix of the raw query.
pub fn plugin_from_query(query: Option<&str>) -> Option<&str> {
    query?.strip_prefix("plugin=")
}
