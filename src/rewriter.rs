//! SVG Rewriter - parse, sanitize, compile styles, serialize.
//!
//! The output is always re-serialized from a parsed tree, so whatever the
//! template author wrote, a successful rewrite is well-formed XML.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::Config;
use crate::context::StyleInfo;
use crate::less::{LessCompiler, StyleError};
use crate::sanitize::{sanitize, SanitizeOptions};
use crate::xml::{self, Element, Node, QName, XmlError};

#[derive(Debug, Error)]
pub enum RewriteCause {
    #[error("must be valid XML: {0}")]
    Parse(String),

    #[error("must be valid XML: no root element")]
    MissingRoot,

    #[error("style compilation failed: {0}")]
    Style(#[from] StyleError),

    #[error("serialized output is empty")]
    EmptyOutput,
}

impl From<XmlError> for RewriteCause {
    fn from(err: XmlError) -> Self {
        match err {
            XmlError::MissingRoot => RewriteCause::MissingRoot,
            XmlError::Parse(err) => RewriteCause::Parse(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Unable to rewrite {template}: {cause}")]
    UnableToRewrite {
        template: String,
        #[source]
        cause: RewriteCause,
    },
}

impl RewriteError {
    pub fn template(&self) -> &str {
        match self {
            RewriteError::UnableToRewrite { template, .. } => template,
        }
    }

    pub fn cause(&self) -> &RewriteCause {
        match self {
            RewriteError::UnableToRewrite { cause, .. } => cause,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SvgRewriter {
    compact: bool,
    compiler: LessCompiler,
    prelude: String,
    prefix_preludes: BTreeMap<String, String>,
}

impl SvgRewriter {
    pub fn new(compact: bool) -> Self {
        Self {
            compact,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut rewriter = Self::new(config.compact_mode()).with_prelude(config.less_prelude.clone());
        for (prefix, prelude) in &config.less_prelude_by_prefix {
            rewriter = rewriter.with_prefix_prelude(prefix.clone(), prelude.clone());
        }
        rewriter
    }

    /// Source prepended to every style block before compiling.
    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = prelude.into();
        self
    }

    /// Extra prelude for templates whose name starts with `prefix`.
    pub fn with_prefix_prelude(mut self, prefix: impl Into<String>, prelude: impl Into<String>) -> Self {
        self.prefix_preludes.insert(prefix.into(), prelude.into());
        self
    }

    pub fn is_compact(&self) -> bool {
        self.compact
    }

    pub fn rewrite(&self, template: &str, rendered: &str) -> Result<String, RewriteError> {
        self.rewrite_with(template, rendered, None)
    }

    /// Like [`rewrite`](Self::rewrite), with the style's properties
    /// available as LESS variables.
    pub fn rewrite_for_style(
        &self,
        template: &str,
        rendered: &str,
        style: &StyleInfo,
    ) -> Result<String, RewriteError> {
        self.rewrite_with(template, rendered, Some(style))
    }

    fn rewrite_with(
        &self,
        template: &str,
        rendered: &str,
        style: Option<&StyleInfo>,
    ) -> Result<String, RewriteError> {
        let fail = |cause: RewriteCause| RewriteError::UnableToRewrite {
            template: template.to_string(),
            cause,
        };

        let mut root = xml::parse(rendered).map_err(|e| fail(e.into()))?;
        let styles = sanitize(&mut root, SanitizeOptions { compact: self.compact });

        let styles = styles.trim();
        if !styles.is_empty() {
            let source = self.style_source(template, styles, style);
            let css = self.compiler.compile(&source).map_err(|e| fail(e.into()))?;
            if !css.is_empty() {
                insert_style(&mut root, css);
            }
        }

        let output = xml::serialize(&root);
        if output.is_empty() {
            return Err(fail(RewriteCause::EmptyOutput));
        }
        Ok(output)
    }

    fn style_source(&self, template: &str, styles: &str, style: Option<&StyleInfo>) -> String {
        let mut source = String::new();
        if let Some(style) = style {
            source.push_str(&style.less_variables());
        }
        source.push_str(&self.prelude);
        source.push('\n');
        for (prefix, prelude) in &self.prefix_preludes {
            if template.starts_with(prefix.as_str()) {
                source.push_str(prelude);
                source.push('\n');
            }
        }
        source.push_str(styles);
        source
    }
}

/// Insert compiled CSS just before the root's last child.
fn insert_style(root: &mut Element, css: String) {
    let name = QName::new(root.name.prefix.as_deref(), "style").with_namespace(root.name.namespace.as_deref());
    let index = root.children.len().saturating_sub(1);
    root.children.insert(index, Node::Element(Element::with_text(name, css)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rewriter() -> SvgRewriter {
        SvgRewriter::new(true)
    }

    #[test]
    fn test_style_is_compiled_and_moved() {
        let out = rewriter()
            .rewrite("public:icon.svg", r#"<svg><style>.a { color: red; }</style><rect class="a"/></svg>"#)
            .unwrap();
        assert_eq!(out, r#"<svg><style>.a{color:red}</style><rect class="a"/></svg>"#);
    }

    #[test]
    fn test_style_goes_before_last_child() {
        let out = rewriter()
            .rewrite("public:icon.svg", "<svg><style>.a{color:red}</style><g/><rect/><circle/></svg>")
            .unwrap();
        assert_eq!(out, "<svg><g/><rect/><style>.a{color:red}</style><circle/></svg>");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let once = rewriter()
            .rewrite(
                "public:icon.svg",
                "<svg>\n  <style>.a { color: red; &:hover { color: blue; } }</style>\n  <g><style>.b{fill:#000}</style><path d=\"M0 0\"/></g>\n</svg>",
            )
            .unwrap();
        let twice = rewriter().rewrite("public:icon.svg", &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_failures_carry_template_name() {
        let err = rewriter().rewrite("public:broken.svg", "<svg><g></svg>").unwrap_err();
        assert_eq!(err.template(), "public:broken.svg");
        assert!(matches!(err.cause(), RewriteCause::Parse(_)));
        assert!(err.to_string().contains("public:broken.svg"));

        let err = rewriter().rewrite("public:empty.svg", "").unwrap_err();
        assert!(matches!(err.cause(), RewriteCause::Parse(_) | RewriteCause::MissingRoot));
    }

    #[test]
    fn test_style_errors_fail_the_rewrite() {
        let err = rewriter()
            .rewrite("public:icon.svg", "<svg><style>.a { color: @missing; }</style></svg>")
            .unwrap_err();
        assert!(matches!(
            err.cause(),
            RewriteCause::Style(StyleError::UndefinedVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_preludes_and_style_variables() {
        let mut style = StyleInfo::new(1, 0);
        style.properties.insert("brand".into(), json!("#ff0000"));

        let rewriter = SvgRewriter::new(true)
            .with_prelude("@size: 2px;")
            .with_prefix_prelude("admin:", "@size: 3px;");
        let svg = "<svg><style>.a { color: @brand; margin: @size; }</style><rect/></svg>";

        let public = rewriter.rewrite_for_style("public:icon.svg", svg, &style).unwrap();
        assert!(public.contains("margin:2px"));
        assert!(public.contains("color:red"));

        let admin = rewriter.rewrite_for_style("admin:icon.svg", svg, &style).unwrap();
        assert!(admin.contains("margin:3px"));
    }

    #[test]
    fn test_prefixed_root_gets_prefixed_style() {
        let out = rewriter()
            .rewrite(
                "public:icon.svg",
                r#"<s:svg xmlns:s="http://www.w3.org/2000/svg"><s:style>.a{color:red}</s:style><s:rect/></s:svg>"#,
            )
            .unwrap();
        assert!(out.contains("<s:style>.a{color:red}</s:style><s:rect/>"));
    }
}
