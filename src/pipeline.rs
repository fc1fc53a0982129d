//! SVG Pipeline - single entry point for rendering and serving templates.
//!
//! Request flow: selector, render cache (render + rewrite on miss), PNG
//! conversion when asked for, response assembly.

use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheBackend, CachedOutput, LookupOptions, RenderCache};
use crate::config::Config;
use crate::context::{
    HashValidationKeys, RenderContext, StyleInfo, StyleSource, UserAgentSniffer, ValidationKeySource,
};
use crate::convert::PngConverter;
use crate::hashing::png_cache_key;
use crate::links::{inline_css_literal, SvgTemplaterHelper};
use crate::migrate;
use crate::response::{RequestHeaders, SvgResponse};
use crate::rewriter::{RewriteError, SvgRewriter};
use crate::router::SvgRequestParams;
use crate::selector::{self, OutputFormat, SelectError, SelectOptions};
use crate::templates::{svg_template_name, TemplateError, TemplateSource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("PNG conversion is not available")]
    ConversionUnavailable,
}

/// The SVG pipeline, composed once at startup from host collaborators.
pub struct SvgPipeline {
    config: Config,
    templates: Arc<dyn TemplateSource>,
    styles: Arc<dyn StyleSource>,
    cache: RenderCache,
    rewriter: SvgRewriter,
    converter: PngConverter,
    validation_keys: Option<Arc<dyn ValidationKeySource>>,
}

impl SvgPipeline {
    pub fn new(config: Config, templates: Arc<dyn TemplateSource>, styles: Arc<dyn StyleSource>) -> Self {
        let validation_keys: Option<Arc<dyn ValidationKeySource>> = if config.validation_secret.is_empty() {
            None
        } else {
            Some(Arc::new(HashValidationKeys::new(config.validation_secret.clone())))
        };

        Self {
            rewriter: SvgRewriter::from_config(&config),
            converter: PngConverter::from_config(config.render_svg_as_png.as_ref()),
            cache: RenderCache::disabled(),
            validation_keys,
            templates,
            styles,
            config,
        }
    }

    pub fn with_cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = RenderCache::new(backend)
            .with_allow_cached(self.config.cache_enabled())
            .with_modifier(self.config.cache_modifier.clone());
        self
    }

    pub fn with_validation_keys(mut self, keys: Arc<dyn ValidationKeySource>) -> Self {
        self.validation_keys = Some(keys);
        self
    }

    pub fn with_converter(mut self, converter: PngConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn converter(&self) -> &PngConverter {
        &self.converter
    }

    pub fn png_enabled(&self) -> bool {
        self.converter.is_enabled()
    }

    pub fn context(&self, style_id: u32, language_id: u32) -> RenderContext {
        RenderContext::resolve(self.styles.as_ref(), style_id, language_id)
    }

    /// URL helper bound to this pipeline's configuration.
    pub fn links(&self) -> SvgTemplaterHelper {
        let helper = SvgTemplaterHelper::from_config(&self.config, self.png_enabled());
        match &self.validation_keys {
            Some(keys) => helper.with_validation_keys(keys.clone()),
            None => helper,
        }
    }

    /// Render and rewrite one canonical template.
    pub fn render_checked(&self, template: &str, ctx: &RenderContext) -> Result<String, PipelineError> {
        if !self.templates.is_known(template) {
            return Err(PipelineError::TemplateNotFound(template.to_string()));
        }
        let rendered = self.templates.render(template, ctx)?;
        let rendered = rendered.trim();
        if rendered.is_empty() {
            return Ok(String::new());
        }
        Ok(self.rewriter.rewrite_for_style(template, rendered, &ctx.style)?)
    }

    /// Like [`render_checked`](Self::render_checked), but failures are logged
    /// and come back as `None`.
    pub fn render_template(&self, template: &str, ctx: &RenderContext) -> Option<String> {
        match self.render_checked(template, ctx) {
            Ok(svg) => Some(svg),
            Err(PipelineError::TemplateNotFound(_)) => {
                tracing::debug!(template = %template, "unknown svg template");
                None
            }
            Err(err) => {
                tracing::error!(template = %template, error = %err, "failed to render svg template");
                None
            }
        }
    }

    /// Rendered SVG for `templates` (only the first is rendered), through
    /// the render cache.
    pub fn render_svg(
        &self,
        templates: &[String],
        ctx: &RenderContext,
        options: LookupOptions,
    ) -> Option<CachedOutput> {
        let template = templates.first()?;
        self.cache
            .get_or_render(templates, ctx, options, || self.render_template(template, ctx))
    }

    /// PNG for the given SVG, cached by SVG content. Empty when conversion
    /// is unavailable or fails.
    pub fn convert_png(&self, svg: &[u8]) -> Vec<u8> {
        if svg.is_empty() || !self.png_enabled() {
            return Vec::new();
        }
        self.cache
            .get_or_produce_bytes(&png_cache_key(svg), || self.converter.convert(svg))
    }

    /// Render one template and convert it, bypassing the render cache for
    /// the SVG step.
    pub fn render_png(&self, template: &str, ctx: &RenderContext) -> Result<Vec<u8>, PipelineError> {
        if !self.png_enabled() {
            return Err(PipelineError::ConversionUnavailable);
        }
        let name = svg_template_name(template)
            .ok_or_else(|| SelectError::UnsupportedExtensionProvided(template.to_string()))?;
        let svg = self.render_checked(&name, ctx)?;
        Ok(self.convert_png(svg.as_bytes()))
    }

    /// `getSvgAsInlineCss(template, base64, escapeWhitespace)`.
    pub fn inline_css(
        &self,
        template: &str,
        base64: bool,
        escape_whitespace: bool,
        ctx: &RenderContext,
    ) -> Result<String, PipelineError> {
        let name = svg_template_name(template)
            .ok_or_else(|| SelectError::UnsupportedExtensionProvided(template.to_string()))?;
        let svg = self.render_checked(&name, ctx)?;
        Ok(inline_css_literal(&svg, base64, escape_whitespace))
    }

    /// Replace `{{ getSvgUrl(...) }}` calls in a style's properties.
    pub fn inject_style_properties(&self, style: &mut StyleInfo, language_id: u32) -> usize {
        let ctx = RenderContext::new(style.clone(), language_id);
        let links = self.links();
        migrate::inject_style_properties(&mut style.properties, |name| {
            links.get_svg_url(name, false, &ctx, None).ok().flatten()
        })
    }

    /// Serve one request.
    pub fn handle(&self, params: &SvgRequestParams, headers: &RequestHeaders) -> SvgResponse {
        let mut ctx = self.context(params.s, params.l);
        ctx.not_modified_since = headers.if_modified_since();
        let last_modified = ctx.style_last_modified();

        let requested = params.svg.trim();
        let requested_format = if requested.to_ascii_lowercase().ends_with(".png") {
            OutputFormat::Png
        } else {
            OutputFormat::Svg
        };

        let options = SelectOptions {
            png_capable: self.png_enabled(),
            auto_rewrite: false,
            debug: self.config.debug,
            ..SelectOptions::default()
        };
        let selection = match selector::resolve(requested, &options) {
            Ok(Some(selection)) => selection,
            Ok(None) => return SvgResponse::not_found(requested_format),
            Err(err) => {
                tracing::debug!(template = %requested, error = %err, "rejected svg request");
                return SvgResponse::not_found(requested_format);
            }
        };
        // the URL carries the negotiated extension
        let format = requested_format;

        let show_debug_output = self.config.debug && params.debug;
        if !show_debug_output && ctx.can_send_304() {
            return SvgResponse::not_modified(format, last_modified);
        }

        let Some(template) = svg_template_name(&selection.filename) else {
            return SvgResponse::not_found(format);
        };
        let templates = vec![template];

        let mut allow_write = true;
        if !params.k.is_empty() {
            ctx.validation_key = Some(params.k.clone());
            if let Some(keys) = &self.validation_keys {
                allow_write = keys.validation_key(&templates, &ctx).as_deref() == Some(params.k.as_str());
            }
        }

        let accepts_gzip = headers.accepts_gzip();
        let lookup = LookupOptions {
            allow_write,
            raw: accepts_gzip && format == OutputFormat::Svg,
        };
        let Some(output) = self.render_svg(&templates, &ctx, lookup) else {
            return SvgResponse::not_found(format);
        };

        match format {
            OutputFormat::Svg => SvgResponse::svg(output, accepts_gzip, last_modified),
            OutputFormat::Png => {
                let png = self.convert_png(&output.into_plain());
                SvgResponse::png(png, last_modified)
            }
        }
    }

    /// `getSvgUrl` with PNG negotiation from the request's User-Agent.
    pub fn url_for_client(
        &self,
        template: &str,
        include_validation: bool,
        ctx: &RenderContext,
        headers: &RequestHeaders,
    ) -> Result<Option<String>, PipelineError> {
        let client = UserAgentSniffer::new(headers.user_agent.as_deref());
        Ok(self.links().get_svg_url(template, include_validation, ctx, Some(&client))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::context::StaticStyles;
    use crate::templates::TemplateRegistry;

    fn pipeline(config: Config) -> SvgPipeline {
        let mut registry = TemplateRegistry::new();
        registry.register("icon", r#"<svg><style>.a{color:red}</style><rect class="a"/></svg>"#);
        registry.register("broken", "<svg><rect></svg>");
        let styles = StaticStyles::new(StyleInfo::new(1, 1_700_000_000), 1);
        SvgPipeline::new(config, Arc::new(registry), Arc::new(styles))
            .with_cache(Arc::new(MemoryCache::new()))
    }

    fn request(svg: &str) -> SvgRequestParams {
        SvgRequestParams {
            svg: svg.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_handle_renders_svg() {
        let response = pipeline(Config::default()).handle(&request("icon.svg"), &RequestHeaders::default());
        assert_eq!(response.status, 200);
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            r#"<svg><style>.a{color:red}</style><rect class="a"/></svg>"#
        );
    }

    #[test]
    fn test_broken_and_unknown_templates_are_404() {
        let pipeline = pipeline(Config::default());
        for name in ["broken.svg", "missing.svg", "", "a/b.svg"] {
            let response = pipeline.handle(&request(name), &RequestHeaders::default());
            assert_eq!(response.status, 404, "{}", name);
            assert!(response.body.is_empty());
        }
    }

    #[test]
    fn test_png_while_disabled_is_404() {
        let mut config = Config::default();
        config.debug = true;
        let response = pipeline(config).handle(&request("icon.png"), &RequestHeaders::default());
        assert_eq!(response.status, 404);
        assert_eq!(response.header("Content-Type"), Some("image/png"));
    }

    #[test]
    fn test_render_checked_reports_rewrite_errors() {
        let pipeline = pipeline(Config::default());
        let ctx = pipeline.context(0, 0);
        assert!(matches!(
            pipeline.render_checked("public:broken.svg", &ctx),
            Err(PipelineError::Rewrite(_))
        ));
        assert!(matches!(
            pipeline.render_checked("public:missing.svg", &ctx),
            Err(PipelineError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_render_png_requires_converter() {
        let pipeline = pipeline(Config::default());
        let ctx = pipeline.context(0, 0);
        assert!(matches!(
            pipeline.render_png("icon", &ctx),
            Err(PipelineError::ConversionUnavailable)
        ));
    }

    #[test]
    fn test_inline_css() {
        let pipeline = pipeline(Config::default());
        let ctx = pipeline.context(0, 0);
        let css = pipeline.inline_css("icon", false, false, &ctx).unwrap();
        assert!(css.starts_with("url(\"data:image/svg+xml,<svg>"));
        assert!(css.contains("class='a'"));
    }

    #[test]
    fn test_url_for_client_without_png() {
        let pipeline = pipeline(Config::default());
        let ctx = pipeline.context(0, 0);
        let headers = RequestHeaders {
            user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile".into()),
            ..Default::default()
        };
        assert_eq!(
            pipeline.url_for_client("icon", false, &ctx, &headers).unwrap().as_deref(),
            Some("data/svg/1/1/1700000000/icon.svg")
        );
    }

    #[test]
    fn test_inject_style_properties() {
        let pipeline = pipeline(Config::default());
        let mut style = StyleInfo::new(1, 5);
        style
            .properties
            .insert("logo".into(), serde_json::json!("url({{ getSvgUrl('icon') }})"));
        assert_eq!(pipeline.inject_style_properties(&mut style, 1), 1);
        assert_eq!(style.properties["logo"], serde_json::json!("url(data/svg/1/1/5/icon.svg)"));
    }
}
