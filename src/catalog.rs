//! Target-format catalog: lowercase extension → LibreOffice export filter.
//!
//! The catalog is built once at startup and shared read-only (behind an
//! `Arc`) by the orchestrator and both engine strategies. Keys are normalised
//! on the way in and on every lookup, so `"PDF"`, `".pdf"` and `" pdf "` all
//! resolve to the same entry.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};

static DEFAULT_FILTERS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("pdf", "writer_pdf_Export"),
        ("doc", "MS Word 97"),
        ("docx", "Office Open XML Text"),
        ("odt", "writer8"),
        ("rtf", "Rich Text Format"),
        ("txt", "Text (encoded)"),
        ("html", "HTML (StarWriter)"),
        ("xls", "MS Excel 97"),
        ("xlsx", "Calc MS Excel 2007 XML"),
        ("ods", "calc8"),
        ("ppt", "MS PowerPoint 97"),
        ("pptx", "Impress MS PowerPoint 2007 XML"),
        ("odp", "impress8"),
    ]
});

/// Normalise a user-supplied format name into a catalog key.
pub fn normalize_format(format: &str) -> String {
    format.trim().trim_start_matches('.').to_lowercase()
}

/// Immutable mapping of target extensions to engine filter identifiers.
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    filters: HashMap<String, String>,
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_FILTERS.iter().copied())
    }
}

impl FormatCatalog {
    /// Build a catalog from `(extension, filter)` pairs. Later duplicates win.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let filters = pairs
            .into_iter()
            .map(|(k, v)| (normalize_format(k.as_ref()), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { filters }
    }

    /// The export filter for `format`, if supported.
    pub fn filter_for(&self, format: &str) -> Option<&str> {
        self.filters.get(&normalize_format(format)).map(String::as_str)
    }

    pub fn is_supported(&self, format: &str) -> bool {
        self.filter_for(format).is_some()
    }

    /// Sorted copy of the whole table.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.filters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
