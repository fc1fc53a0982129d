//! Configuration - the add-on options as a camelCase JSON document.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::context::StyleInfo;
use crate::convert::ConversionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Pretty `data/svg/...` URLs instead of `svg.php?...`.
    pub use_friendly_urls: bool,
    /// Whether the router decorator intercepts SVG paths at all.
    pub router_integration: bool,
    pub board_url: String,
    pub development: bool,
    pub dev_mode_cache: bool,
    pub debug: bool,
    #[serde(
        deserialize_with = "deserialize_conversion",
        skip_serializing_if = "Option::is_none"
    )]
    pub render_svg_as_png: Option<ConversionConfig>,
    pub cache_modifier: String,
    pub less_prelude: String,
    pub less_prelude_by_prefix: BTreeMap<String, String>,
    /// Secret for validation keys; empty disables them.
    pub validation_secret: String,
    pub styles: Vec<StyleInfo>,
    pub default_style_id: u32,
    pub default_language_id: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_friendly_urls: true,
            router_integration: true,
            board_url: String::new(),
            development: false,
            dev_mode_cache: false,
            debug: false,
            render_svg_as_png: None,
            cache_modifier: String::new(),
            less_prelude: String::new(),
            less_prelude_by_prefix: BTreeMap::new(),
            validation_secret: String::new(),
            styles: Vec::new(),
            default_style_id: 1,
            default_language_id: 1,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Editor cruft is stripped unless developing without the dev cache.
    pub fn compact_mode(&self) -> bool {
        !self.development || self.dev_mode_cache
    }

    /// Same rule as compact mode: development output is never cached
    /// unless the dev cache is on.
    pub fn cache_enabled(&self) -> bool {
        !self.development || self.dev_mode_cache
    }
}

/// `{"type": ""}` (or no `type`) means conversion is switched off.
fn deserialize_conversion<'de, D>(deserializer: D) -> Result<Option<ConversionConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(value) = value else {
        return Ok(None);
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind.is_empty() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
