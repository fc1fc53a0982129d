//! Render context and the host capabilities it is resolved from.
//!
//! Everything a nested collaborator needs about the current request is
//! carried in [`RenderContext`] and passed explicitly.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::config::Config;
use crate::hashing::sha256_hex;

/// A style as seen by the SVG pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleInfo {
    pub id: u32,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl StyleInfo {
    pub fn new(id: u32, last_modified: i64) -> Self {
        Self {
            id,
            last_modified,
            properties: BTreeMap::new(),
        }
    }

    /// Scalar style properties as LESS variable declarations.
    pub fn less_variables(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.properties {
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                continue;
            }
            let value = match value {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            out.push_str(&format!("@{}: {};\n", name, value));
        }
        out
    }
}

/// Style and language lookup provided by the host.
pub trait StyleSource: Send + Sync {
    fn style(&self, style_id: u32) -> Option<StyleInfo>;

    fn default_style(&self) -> StyleInfo;

    fn default_language_id(&self) -> u32;
}

/// Fixed style table, used by the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticStyles {
    styles: HashMap<u32, StyleInfo>,
    default_style_id: u32,
    default_language_id: u32,
}

impl StaticStyles {
    pub fn new(default_style: StyleInfo, default_language_id: u32) -> Self {
        let default_style_id = default_style.id;
        let mut styles = HashMap::new();
        styles.insert(default_style.id, default_style);
        Self {
            styles,
            default_style_id,
            default_language_id,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut styles = Self {
            styles: HashMap::new(),
            default_style_id: config.default_style_id,
            default_language_id: config.default_language_id,
        };
        for style in &config.styles {
            styles.insert(style.clone());
        }
        styles
    }

    pub fn insert(&mut self, style: StyleInfo) {
        self.styles.insert(style.id, style);
    }
}

impl StyleSource for StaticStyles {
    fn style(&self, style_id: u32) -> Option<StyleInfo> {
        self.styles.get(&style_id).cloned()
    }

    fn default_style(&self) -> StyleInfo {
        self.styles
            .get(&self.default_style_id)
            .cloned()
            .unwrap_or_else(|| StyleInfo::new(self.default_style_id, 0))
    }

    fn default_language_id(&self) -> u32 {
        self.default_language_id
    }
}

/// Immutable per-request render state.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub style: StyleInfo,
    pub language_id: u32,
    pub validation_key: Option<String>,
    /// The client's `If-Modified-Since`, when it sent a valid one.
    pub not_modified_since: Option<DateTime<Utc>>,
    pub auto_rewrite: bool,
}

impl RenderContext {
    pub fn new(style: StyleInfo, language_id: u32) -> Self {
        Self {
            style,
            language_id,
            validation_key: None,
            not_modified_since: None,
            auto_rewrite: true,
        }
    }

    /// Resolve ids from a request; `0` or unknown ids fall back to the defaults.
    pub fn resolve(styles: &dyn StyleSource, style_id: u32, language_id: u32) -> Self {
        let style = if style_id == 0 {
            None
        } else {
            styles.style(style_id)
        };
        let style = style.unwrap_or_else(|| styles.default_style());
        let language_id = if language_id == 0 {
            styles.default_language_id()
        } else {
            language_id
        };
        Self::new(style, language_id)
    }

    pub fn style_id(&self) -> u32 {
        self.style.id
    }

    pub fn style_last_modified(&self) -> i64 {
        self.style.last_modified
    }

    /// The client copy is current when it is not older than the style.
    pub fn can_send_304(&self) -> bool {
        self.not_modified_since
            .map_or(false, |since| since.timestamp() >= self.style_last_modified())
    }
}

/// Reports whether the requesting client needs a raster fallback.
pub trait ClientCapabilities {
    fn requires_raster_fallback(&self) -> bool;
}

/// Mobile/tablet detection from the User-Agent header.
#[derive(Debug, Clone, Default)]
pub struct UserAgentSniffer {
    user_agent: Option<String>,
}

impl UserAgentSniffer {
    pub fn new(user_agent: Option<&str>) -> Self {
        Self {
            user_agent: user_agent.map(str::to_string),
        }
    }
}

fn mobile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)mobile|android|iphone|ipad|ipod|tablet|kindle|silk/|opera mini|blackberry|windows phone",
        )
        .expect("valid user agent pattern")
    })
}

impl ClientCapabilities for UserAgentSniffer {
    fn requires_raster_fallback(&self) -> bool {
        self.user_agent
            .as_deref()
            .map_or(false, |ua| mobile_pattern().is_match(ua))
    }
}

/// The style validation subsystem: issues keys that prove a URL was
/// generated for the current style state.
pub trait ValidationKeySource: Send + Sync {
    fn validation_key(&self, templates: &[String], ctx: &RenderContext) -> Option<String>;
}

/// Validation keys derived from a shared secret and the style state.
#[derive(Debug, Clone)]
pub struct HashValidationKeys {
    secret: String,
}

impl HashValidationKeys {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl ValidationKeySource for HashValidationKeys {
    fn validation_key(&self, templates: &[String], ctx: &RenderContext) -> Option<String> {
        if self.secret.is_empty() {
            return None;
        }
        let mut templates = templates.to_vec();
        templates.sort();
        templates.dedup();
        let combined = format!(
            "{}:{}:{}:{}",
            self.secret,
            templates.join(","),
            ctx.style_id(),
            ctx.style_last_modified()
        );
        Some(sha256_hex(combined.as_bytes())[..16].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let styles = StaticStyles::new(StyleInfo::new(1, 100), 1);
        let ctx = RenderContext::resolve(&styles, 0, 0);
        assert_eq!(ctx.style_id(), 1);
        assert_eq!(ctx.language_id, 1);

        let ctx = RenderContext::resolve(&styles, 42, 3);
        assert_eq!(ctx.style_id(), 1);
        assert_eq!(ctx.language_id, 3);
    }

    #[test]
    fn test_can_send_304_compares_against_style_time() {
        let since = Utc.timestamp_opt(784111777, 0).single();
        let ctx = |modified| RenderContext {
            not_modified_since: since,
            ..RenderContext::new(StyleInfo::new(1, modified), 1)
        };
        assert!(ctx(784111777).can_send_304());
        assert!(ctx(784111000).can_send_304());
        assert!(!ctx(784111778).can_send_304());
        assert!(!RenderContext::new(StyleInfo::new(1, 0), 1).can_send_304());
    }

    #[test]
    fn test_less_variables_skips_non_scalars() {
        let mut style = StyleInfo::new(1, 0);
        style.properties.insert("textColor".into(), json!("#141414"));
        style.properties.insert("borderRadius".into(), json!(4));
        style.properties.insert("nested".into(), json!({"a": 1}));
        style.properties.insert("bad name".into(), json!("x"));
        assert_eq!(style.less_variables(), "@borderRadius: 4;\n@textColor: #141414;\n");
    }

    #[test]
    fn test_user_agent_sniffer() {
        let phone = UserAgentSniffer::new(Some(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 9_0 like Mac OS X) Mobile/13A344",
        ));
        assert!(phone.requires_raster_fallback());
        let desktop = UserAgentSniffer::new(Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0"));
        assert!(!desktop.requires_raster_fallback());
        assert!(!UserAgentSniffer::new(None).requires_raster_fallback());
    }

    #[test]
    fn test_validation_key_ignores_order() {
        let keys = HashValidationKeys::new("secret");
        let ctx = RenderContext::new(StyleInfo::new(1, 5), 1);
        let a = keys.validation_key(&["b".into(), "a".into()], &ctx);
        let b = keys.validation_key(&["a".into(), "b".into(), "a".into()], &ctx);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert!(HashValidationKeys::new("").validation_key(&[], &ctx).is_none());
    }
}
