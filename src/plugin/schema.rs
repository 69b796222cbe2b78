//! Plugin definitions and source splitting.
//!
//! A plugin is one text blob with two logical regions: delivery-time code
//! run against the response body before it leaves the pipeline, and an
//! optional content-execution region (delimited by a fixed marker pair)
//! injected into the destination content to run there. The split happens
//! once at ingestion, not on every execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Opens the content-execution region.
pub const CONTENT_BEGIN_MARKER: &str = "==begin content-context==";
/// Closes the content-execution region.
pub const CONTENT_END_MARKER: &str = "==end content-context==";

/// The two executable fragments split out of one source blob.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginCode {
    /// Code run against the materialized body at delivery time, taking
    /// exactly `(body, url, headers)`.
    pub delivery: String,
    /// Code injected into the destination content, if the source carried
    /// a marker-delimited region.
    pub content: Option<String>,
}

impl PluginCode {
    /// Splits a source blob at the fixed marker pair. At most one region
    /// is recognized (the first); an unterminated or whitespace-only
    /// region leaves the whole blob as delivery code.
    pub fn split(source: &str) -> Self {
        let Some(begin) = source.find(CONTENT_BEGIN_MARKER) else {
            return Self {
                delivery: source.to_string(),
                content: None,
            };
        };

        let after_begin = begin + CONTENT_BEGIN_MARKER.len();
        let Some(end_rel) = source[after_begin..].find(CONTENT_END_MARKER) else {
            return Self {
                delivery: source.to_string(),
                content: None,
            };
        };

        let end = after_begin + end_rel;
        let content = source[after_begin..end].trim();
        let delivery = format!(
            "{}{}",
            &source[..begin],
            &source[end + CONTENT_END_MARKER.len()..]
        );

        Self {
            delivery,
            content: if content.is_empty() {
                None
            } else {
                Some(content.to_string())
            },
        }
    }
}

/// Persisted plugin metadata, stored separately from the source blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMeta {
    pub name: String,
    pub sites: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A registered plugin: identity, scope, the raw source as authored, and
/// the split form executed by the runner.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub sites: Vec<String>,
    pub source: String,
    pub code: PluginCode,
    pub created_at: DateTime<Utc>,
}

impl Plugin {
    /// Validates and ingests a plugin definition. An empty scope is
    /// invalid; a single `*` pattern means all sites.
    pub fn new(
        name: impl Into<String>,
        sites: Vec<String>,
        source: impl Into<String>,
    ) -> Result<Self, PluginError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PluginError::InvalidName {
                reason: "name cannot be empty".to_string(),
            });
        }
        if sites.is_empty() {
            return Err(PluginError::EmptyScope { name });
        }

        let source = source.into();
        let code = PluginCode::split(&source);

        Ok(Self {
            name,
            sites,
            source,
            code,
            created_at: Utc::now(),
        })
    }

    /// Rebuilds a plugin from its persisted source and metadata record.
    pub fn from_parts(meta: PluginMeta, source: String) -> Result<Self, PluginError> {
        let code = PluginCode::split(&source);
        if meta.sites.is_empty() {
            return Err(PluginError::EmptyScope { name: meta.name });
        }

        Ok(Self {
            name: meta.name,
            sites: meta.sites,
            source,
            code,
            created_at: meta.created_at,
        })
    }

    pub fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: self.name.clone(),
            sites: self.sites.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_without_markers() {
        let code = PluginCode::split("return body;");
        assert_eq!(code.delivery, "return body;");
        assert_eq!(code.content, None);
    }

    #[test]
    fn test_split_with_content_region() {
        let source = "return body.toUpperCase();\n\
                      ==begin content-context==\n\
                      console.log(url);\n\
                      ==end content-context==\n";
        let code = PluginCode::split(source);

        assert_eq!(code.content.as_deref(), Some("console.log(url);"));
        assert!(code.delivery.contains("return body.toUpperCase();"));
        assert!(!code.delivery.contains("content-context"));
        assert!(!code.delivery.contains("console.log"));
    }

    #[test]
    fn test_split_keeps_delivery_code_around_region() {
        let source = "var a = 1;\n==begin content-context==\nwork();\n==end content-context==\nreturn body;";
        let code = PluginCode::split(source);

        assert!(code.delivery.contains("var a = 1;"));
        assert!(code.delivery.contains("return body;"));
        assert_eq!(code.content.as_deref(), Some("work();"));
    }

    #[test]
    fn test_unterminated_region_is_all_delivery() {
        let source = "before\n==begin content-context==\nnever closed";
        let code = PluginCode::split(source);

        assert_eq!(code.delivery, source);
        assert_eq!(code.content, None);
    }

    #[test]
    fn test_whitespace_only_region_is_no_content() {
        let source = "return body;\n==begin content-context==\n   \n==end content-context==";
        let code = PluginCode::split(source);

        assert_eq!(code.content, None);
        assert!(code.delivery.contains("return body;"));
    }

    #[test]
    fn test_only_first_region_is_recognized() {
        let source = "==begin content-context==one==end content-context==\
                      ==begin content-context==two==end content-context==";
        let code = PluginCode::split(source);

        assert_eq!(code.content.as_deref(), Some("one"));
        // The second pair survives verbatim in the delivery fragment.
        assert!(code.delivery.contains("two"));
    }

    #[test]
    fn test_plugin_requires_scope() {
        let err = Plugin::new("p", vec![], "return body;").unwrap_err();
        assert!(matches!(err, PluginError::EmptyScope { .. }));
    }

    #[test]
    fn test_plugin_requires_name() {
        let err = Plugin::new("  ", vec!["*".into()], "x").unwrap_err();
        assert!(matches!(err, PluginError::InvalidName { .. }));
    }

    #[test]
    fn test_meta_round_trip() {
        let plugin = Plugin::new("t", vec!["example.com".into()], "return body;").unwrap();
        let rebuilt = Plugin::from_parts(plugin.meta(), plugin.source.clone()).unwrap();

        assert_eq!(rebuilt.name, plugin.name);
        assert_eq!(rebuilt.sites, plugin.sites);
        assert_eq!(rebuilt.code, plugin.code);
    }
}
