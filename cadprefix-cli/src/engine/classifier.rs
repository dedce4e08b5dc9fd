use serde::Serialize;
use std::path::Path;

use crate::core::DocumentKind;

/// Path markers identifying content-center and vendor/standard-parts libraries.
///
/// A marker ending in `_` is a standard-part file-name prefix and only matches
/// the start of the file name; any other marker matches anywhere in the path.
pub const DEFAULT_LIBRARY_MARKERS: &[&str] = &[
    "content center",
    "contentcenter",
    "content_center",
    "standard parts",
    "standardparts",
    "/libraries/",
    "/library/",
    "/vendor/",
    "iso_",
    "din_",
    "ansi_",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: DocumentKind,
    /// Library documents are never renamed
    pub excluded: bool,
}

/// Decides document kind and library exclusion from a path alone
#[derive(Debug, Clone)]
pub struct DocumentClassifier {
    markers: Vec<String>,
}

impl DocumentClassifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers: Vec<String> = markers
            .into_iter()
            .map(|m| normalize(m.as_ref().trim()))
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    pub fn classify(&self, path: &Path) -> Classification {
        Classification {
            kind: DocumentKind::from_path(path),
            excluded: self.is_library(path),
        }
    }

    pub fn is_library(&self, path: &Path) -> bool {
        let normalized = normalize(&path.to_string_lossy());
        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        self.markers.iter().any(|marker| {
            if marker.ends_with('_') {
                file_name.starts_with(marker.as_str())
            } else {
                normalized.contains(marker.as_str())
            }
        })
    }
}

impl Default for DocumentClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LIBRARY_MARKERS)
    }
}

/// Lowercase with forward slashes so markers match Windows and unix paths alike
fn normalize(text: &str) -> String {
    text.replace('\\', "/").to_lowercase()
}
