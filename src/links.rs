//! URL construction and inline CSS for the templating layer.

use base64::engine::general_purpose;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::context::{ClientCapabilities, RenderContext, ValidationKeySource};
use crate::router::{FRIENDLY_PREFIX, RAW_PREFIX};
use crate::selector::{self, SelectError, SelectOptions};
use crate::templates::svg_template_name;

/// Builds SVG URLs for templates, the way template helper functions see them.
#[derive(Clone)]
pub struct SvgTemplaterHelper {
    use_friendly_urls: bool,
    board_url: String,
    png_enabled: bool,
    automatic_url_rewriting: bool,
    debug: bool,
    validation_keys: Option<Arc<dyn ValidationKeySource>>,
}

impl SvgTemplaterHelper {
    pub fn new(use_friendly_urls: bool, png_enabled: bool) -> Self {
        Self {
            use_friendly_urls,
            board_url: String::new(),
            png_enabled,
            automatic_url_rewriting: true,
            debug: false,
            validation_keys: None,
        }
    }

    pub fn from_config(config: &Config, png_enabled: bool) -> Self {
        Self {
            board_url: config.board_url.clone(),
            debug: config.debug,
            ..Self::new(config.use_friendly_urls, png_enabled)
        }
    }

    pub fn with_validation_keys(mut self, keys: Arc<dyn ValidationKeySource>) -> Self {
        self.validation_keys = Some(keys);
        self
    }

    pub fn with_automatic_url_rewriting(mut self, enabled: bool) -> Self {
        self.automatic_url_rewriting = enabled;
        self
    }

    pub fn png_enabled(&self) -> bool {
        self.png_enabled
    }

    /// `getSvgUrl(template, includeValidation)`.
    pub fn get_svg_url(
        &self,
        template: &str,
        include_validation: bool,
        ctx: &RenderContext,
        client: Option<&dyn ClientCapabilities>,
    ) -> Result<Option<String>, SelectError> {
        self.build_url(template, None, include_validation, ctx, client)
    }

    /// `getSvgUrlAs(template, extension, includeValidation)`.
    ///
    /// An unsupported `extension` yields `Ok(None)` rather than an error.
    pub fn get_svg_url_as(
        &self,
        template: &str,
        extension: &str,
        include_validation: bool,
        ctx: &RenderContext,
        client: Option<&dyn ClientCapabilities>,
    ) -> Result<Option<String>, SelectError> {
        self.build_url(template, Some(extension), include_validation, ctx, client)
    }

    fn build_url(
        &self,
        template: &str,
        forced_extension: Option<&str>,
        include_validation: bool,
        ctx: &RenderContext,
        client: Option<&dyn ClientCapabilities>,
    ) -> Result<Option<String>, SelectError> {
        let options = SelectOptions {
            png_capable: self.png_enabled,
            auto_rewrite: self.automatic_url_rewriting && ctx.auto_rewrite,
            forced_extension,
            client,
            debug: self.debug,
        };
        let Some(selection) = selector::resolve(template, &options)? else {
            return Ok(None);
        };
        let filename = selection.filename;

        let mut url = if self.use_friendly_urls {
            format!(
                "{}{}/{}/{}/{}",
                FRIENDLY_PREFIX,
                ctx.style_id(),
                ctx.language_id,
                ctx.style_last_modified(),
                filename
            )
        } else {
            format!(
                "{}?svg={}&s={}&l={}&d={}",
                RAW_PREFIX,
                filename,
                ctx.style_id(),
                ctx.language_id,
                ctx.style_last_modified()
            )
        };

        if include_validation {
            let key = self.validation_keys.as_ref().and_then(|keys| {
                let rendered = svg_template_name(&filename)?;
                keys.validation_key(&[rendered], ctx)
            });
            if let Some(key) = key {
                let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
                url.push(if self.use_friendly_urls { '?' } else { '&' });
                url.push_str("k=");
                url.push_str(&encoded);
            }
        }

        Ok(Some(self.absolute(&url)))
    }

    fn absolute(&self, url: &str) -> String {
        if self.board_url.is_empty() {
            url.to_string()
        } else {
            format!("{}/{}", self.board_url.trim_end_matches('/'), url)
        }
    }

    /// Add the `svg` entry to the template globals object.
    pub fn inject_svg_args(&self, globals: &mut Map<String, Value>) {
        globals.insert(
            "svg".to_string(),
            json!({
                "enabled": true,
                "as": { "png": self.png_enabled },
            }),
        );
    }
}

/// Colors that are no longer than their hex spelling once `#` is escaped.
const COLOR_KEYWORDS: &[(&str, &str)] = &[
    ("#ffffff", "white"),
    ("#fff", "white"),
    ("#000000", "black"),
    ("#000", "black"),
    ("#ff0000", "red"),
    ("#f00", "red"),
    ("#808080", "gray"),
    ("#008000", "green"),
    ("#000080", "navy"),
    ("#800000", "maroon"),
    ("#808000", "olive"),
    ("#800080", "purple"),
    ("#008080", "teal"),
    ("#c0c0c0", "silver"),
];

/// Wrap SVG text as a CSS `url()` literal.
///
/// With `base64` the data URI is base64 encoded. Otherwise common hex colors
/// become keywords, `"` becomes `'`, `#` becomes `%23`, and newlines are
/// escaped, or with `escape_whitespace` all whitespace runs collapse to one
/// space.
pub fn inline_css_literal(svg: &str, base64: bool, escape_whitespace: bool) -> String {
    if base64 {
        let encoded = base64::Engine::encode(&general_purpose::STANDARD, svg.as_bytes());
        return format!("url(\"data:image/svg+xml;base64,{}\")", encoded);
    }

    let mut text = svg.trim().to_string();
    for (hex, keyword) in COLOR_KEYWORDS {
        text = replace_color(&text, hex, keyword);
    }
    let text = text.replace('"', "'").replace('#', "%23");

    let text = if escape_whitespace {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text.replace("\r\n", "\n").replace('\n', "%0A")
    };

    format!("url(\"data:image/svg+xml,{}\")", text)
}

/// Case-insensitive replacement of a hex color that is not followed by
/// another hex digit.
fn replace_color(text: &str, hex: &str, keyword: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(hex) {
        if idx < last {
            continue;
        }
        let end = idx + hex.len();
        if lower[end..].starts_with(|c: char| c.is_ascii_hexdigit()) {
            continue;
        }
        out.push_str(&text[last..idx]);
        out.push_str(keyword);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HashValidationKeys, StyleInfo};

    fn ctx() -> RenderContext {
        RenderContext::new(StyleInfo::new(2, 1700000000), 3)
    }

    #[test]
    fn test_friendly_and_raw_urls() {
        let friendly = SvgTemplaterHelper::new(true, false);
        assert_eq!(
            friendly.get_svg_url("icon", false, &ctx(), None).unwrap().as_deref(),
            Some("data/svg/2/3/1700000000/icon.svg")
        );

        let raw = SvgTemplaterHelper::new(false, false);
        assert_eq!(
            raw.get_svg_url("icon.svg", false, &ctx(), None).unwrap().as_deref(),
            Some("svg.php?svg=icon.svg&s=2&l=3&d=1700000000")
        );
    }

    #[test]
    fn test_forced_extension() {
        let helper = SvgTemplaterHelper::new(true, true);
        assert_eq!(
            helper.get_svg_url_as("icon", "png", false, &ctx(), None).unwrap().as_deref(),
            Some("data/svg/2/3/1700000000/icon.png")
        );
        assert_eq!(helper.get_svg_url_as("icon", "jpg", false, &ctx(), None), Ok(None));
        assert_eq!(
            SvgTemplaterHelper::new(true, false).get_svg_url_as("icon", "png", false, &ctx(), None),
            Ok(None)
        );
    }

    #[test]
    fn test_path_input_is_rejected() {
        let helper = SvgTemplaterHelper::new(true, false);
        assert!(matches!(
            helper.get_svg_url("nested/icon", false, &ctx(), None),
            Err(SelectError::UnsupportedExtensionProvided(_))
        ));
    }

    #[test]
    fn test_validation_key_and_board_url() {
        let mut config = Config::default();
        config.board_url = "https://example.com/forum/".into();
        let helper = SvgTemplaterHelper::from_config(&config, false)
            .with_validation_keys(Arc::new(HashValidationKeys::new("secret")));

        let url = helper.get_svg_url("icon", true, &ctx(), None).unwrap().unwrap();
        assert!(url.starts_with("https://example.com/forum/data/svg/2/3/1700000000/icon.svg?k="));

        let url = helper.get_svg_url("icon", false, &ctx(), None).unwrap().unwrap();
        assert!(!url.contains("k="));
    }

    #[test]
    fn test_inject_svg_args() {
        let mut globals = Map::new();
        SvgTemplaterHelper::new(true, true).inject_svg_args(&mut globals);
        assert_eq!(globals["svg"], json!({"enabled": true, "as": {"png": true}}));
    }

    #[test]
    fn test_inline_css_escaping() {
        let svg = "<svg fill=\"#FFF\">\n  <rect fill=\"#123456\"/>\n</svg>";
        assert_eq!(
            inline_css_literal(svg, false, false),
            "url(\"data:image/svg+xml,<svg fill='white'>%0A  <rect fill='%23123456'/>%0A</svg>\")"
        );
        assert_eq!(
            inline_css_literal(svg, false, true),
            "url(\"data:image/svg+xml,<svg fill='white'> <rect fill='%23123456'/> </svg>\")"
        );
    }

    #[test]
    fn test_inline_css_keeps_longer_hex_values() {
        assert_eq!(replace_color("#fffe #fff", "#fff", "white"), "#fffe white");
    }

    #[test]
    fn test_inline_css_base64() {
        assert_eq!(
            inline_css_literal("<svg/>", true, false),
            "url(\"data:image/svg+xml;base64,PHN2Zy8+\")"
        );
    }
}
