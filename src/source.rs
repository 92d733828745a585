//! Source items: the remote files a caller wants in one archive.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Name used when neither the caller nor the locator provides one
const FALLBACK_NAME: &str = "download";

/// One remote file to include in an archive
///
/// Immutable once a job starts; only the fetcher reads the locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    /// Opaque caller-supplied identifier
    pub id: String,
    /// Directly fetchable URL (already public or pre-signed)
    pub locator: Url,
    /// Entry name requested for this file; the writer may suffix it on collision
    pub suggested_name: String,
}

impl SourceItem {
    /// Build an item, deriving the name from the locator when none is given
    pub fn new(id: impl Into<String>, locator: Url, suggested_name: Option<&str>) -> Self {
        let suggested_name = match suggested_name.map(str::trim) {
            Some(name) if !name.is_empty() => sanitize_name(name),
            _ => name_from_locator(&locator),
        };
        Self {
            id: id.into(),
            locator,
            suggested_name,
        }
    }
}

/// Wire shape of a source as callers send it
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Optional caller identifier; defaults to the input position
    #[serde(default)]
    pub id: Option<String>,
    /// URL of the file
    #[serde(alias = "url")]
    pub locator: String,
    /// Optional entry name
    #[serde(default)]
    pub suggested_name: Option<String>,
}

impl From<&str> for SourceSpec {
    fn from(locator: &str) -> Self {
        Self {
            id: None,
            locator: locator.to_string(),
            suggested_name: None,
        }
    }
}

/// Validate caller input and turn it into source items
///
/// Fails on an empty list or on any locator that is not an absolute
/// `http`/`https` URL. No I/O is performed.
pub fn resolve_sources(specs: Vec<SourceSpec>) -> Result<Vec<SourceItem>> {
    if specs.is_empty() {
        return Err(Error::Validation(
            "at least one source is required".to_string(),
        ));
    }

    specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| {
            let locator = Url::parse(spec.locator.trim()).map_err(|e| {
                Error::Validation(format!("source {index}: invalid locator: {e}"))
            })?;
            if !matches!(locator.scheme(), "http" | "https") {
                return Err(Error::Validation(format!(
                    "source {index}: unsupported scheme {}",
                    locator.scheme()
                )));
            }
            let id = spec.id.unwrap_or_else(|| index.to_string());
            Ok(SourceItem::new(id, locator, spec.suggested_name.as_deref()))
        })
        .collect()
}

/// Entry name for a locator: its last non-empty path segment, then its host
pub fn name_from_locator(locator: &Url) -> String {
    let segment = locator
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        });

    match segment {
        Some(name) => sanitize_name(&name),
        None => locator
            .host_str()
            .map(sanitize_name)
            .unwrap_or_else(|| FALLBACK_NAME.to_string()),
    }
}

/// Make a name safe to use as a flat archive entry
///
/// Path separators and control characters become `_`; leading dots and
/// whitespace are dropped so entries can never escape or hide.
pub fn sanitize_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_start_matches('.').trim();
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn name_comes_from_last_path_segment() {
        assert_eq!(name_from_locator(&url("https://x/a/b/photo.png")), "photo.png");
        assert_eq!(name_from_locator(&url("https://x/files/report.pdf/")), "report.pdf");
        assert_eq!(
            name_from_locator(&url("https://x/files/My%20Report.pdf?sig=abc")),
            "My Report.pdf"
        );
    }

    #[test]
    fn name_falls_back_to_host() {
        assert_eq!(name_from_locator(&url("https://cdn.example.com/")), "cdn.example.com");
    }

    #[test]
    fn encoded_separators_are_flattened() {
        assert_eq!(name_from_locator(&url("https://x/a%2F..%2Fetc")), "a_.._etc");
        assert_eq!(sanitize_name("../../secret"), "_.._secret");
        assert_eq!(sanitize_name(".."), "download");
        assert_eq!(sanitize_name("  "), "download");
        assert_eq!(sanitize_name(".env"), "env");
    }

    #[test]
    fn explicit_name_wins_over_locator() {
        let item = SourceItem::new("7", url("https://x/abc123"), Some("cover.jpg"));
        assert_eq!(item.suggested_name, "cover.jpg");
        let item = SourceItem::new("8", url("https://x/abc123"), Some("   "));
        assert_eq!(item.suggested_name, "abc123");
    }

    #[test]
    fn empty_input_is_rejected() {
        match resolve_sources(Vec::new()) {
            Err(Error::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn bad_locators_are_rejected_with_their_index() {
        let specs = vec![SourceSpec::from("https://x/a.png"), SourceSpec::from("ftp://x/b")];
        match resolve_sources(specs) {
            Err(Error::Validation(message)) => assert!(message.starts_with("source 1")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(resolve_sources(vec![SourceSpec::from("not a url")]).is_err());
    }

    #[test]
    fn ids_default_to_position() {
        let items = resolve_sources(vec![
            SourceSpec::from("https://x/a.png"),
            SourceSpec {
                id: Some("item-9".to_string()),
                locator: "https://x/b.pdf".to_string(),
                suggested_name: None,
            },
        ])
        .unwrap();
        assert_eq!(items[0].id, "0");
        assert_eq!(items[1].id, "item-9");
        assert_eq!(items[1].suggested_name, "b.pdf");
    }

    #[test]
    fn wire_shape_accepts_url_alias_and_camel_case() {
        let spec: SourceSpec =
            serde_json::from_str(r#"{"url": "https://x/a.png", "suggestedName": "b.png"}"#)
                .unwrap();
        assert_eq!(spec.locator, "https://x/a.png");
        assert_eq!(spec.suggested_name.as_deref(), Some("b.png"));
    }
}
