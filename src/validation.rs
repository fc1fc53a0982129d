//! Validation System - authoring-time checks for `*.svg` templates
//!
//! Rules produce structured violations.
//! Policy decides whether the template may be saved.

use serde::{Deserialize, Serialize};

use crate::rewriter::{RewriteCause, SvgRewriter};
use crate::xml::{self, XmlError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub template: String,
}

impl ValidationResult {
    pub fn success(template: &str) -> Self {
        Self {
            valid: true,
            violations: vec![],
            template: template.to_string(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }
}

/// The template being saved.
#[derive(Debug, Clone, Copy)]
pub struct TemplateInput<'a> {
    pub title: &'a str,
    pub text: &'a str,
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &TemplateInput<'_>) -> Vec<ValidationViolation>;
}

/// Titles this validator cares about.
pub fn is_svg_template(title: &str) -> bool {
    title.to_ascii_lowercase().ends_with(".svg")
}

// --- Concrete Rules ---

pub struct WellFormedXmlRule;

impl ValidationRule for WellFormedXmlRule {
    fn name(&self) -> &'static str { "well_formed_xml" }

    fn validate(&self, input: &TemplateInput<'_>) -> Vec<ValidationViolation> {
        match xml::parse(input.text) {
            Ok(_) => vec![],
            Err(err) => {
                let message = match err {
                    XmlError::MissingRoot => "SVG template must have a root element".to_string(),
                    XmlError::Parse(err) => format!("SVG template must be valid XML: {}", err),
                };
                vec![ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message,
                    expected: Some("well-formed XML document".to_string()),
                    actual: None,
                    remediation: vec!["Fix the markup so the template parses as XML".to_string()],
                }]
            }
        }
    }
}

pub struct SvgRootRule;

impl ValidationRule for SvgRootRule {
    fn name(&self) -> &'static str { "svg_root" }

    fn validate(&self, input: &TemplateInput<'_>) -> Vec<ValidationViolation> {
        let Ok(root) = xml::parse(input.text) else {
            return vec![];
        };
        if root.name.local == "svg" {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Warning,
            message: "Root element is not <svg>".to_string(),
            expected: Some("svg".to_string()),
            actual: Some(root.name.full_name()),
            remediation: vec!["Wrap the content in an <svg> element".to_string()],
        }]
    }
}

/// Runs the full rewrite so style errors surface while editing.
pub struct StylesCompileRule {
    rewriter: SvgRewriter,
}

impl StylesCompileRule {
    pub fn new(rewriter: SvgRewriter) -> Self {
        Self { rewriter }
    }
}

impl ValidationRule for StylesCompileRule {
    fn name(&self) -> &'static str { "styles_compile" }

    fn validate(&self, input: &TemplateInput<'_>) -> Vec<ValidationViolation> {
        match self.rewriter.rewrite(input.title, input.text) {
            Err(err) if matches!(err.cause(), RewriteCause::Style(_)) => vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: err.to_string(),
                expected: None,
                actual: None,
                remediation: vec!["Fix the CSS/LESS inside <style> elements".to_string()],
            }],
            // markup problems are reported by the XML rule
            _ => vec![],
        }
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new(rewriter: SvgRewriter) -> Self {
        Self {
            rules: vec![
                Box::new(WellFormedXmlRule),
                Box::new(SvgRootRule),
                Box::new(StylesCompileRule::new(rewriter)),
            ],
        }
    }

    /// Validate a template before it is saved. Titles not ending in `.svg`
    /// always pass; warnings never block.
    pub fn validate(&self, input: &TemplateInput<'_>) -> ValidationResult {
        if !is_svg_template(input.title) {
            return ValidationResult::success(input.title);
        }

        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(input))
            .collect();
        let has_errors = violations.iter().any(|v| v.severity == ViolationSeverity::Error);

        ValidationResult {
            valid: !has_errors,
            violations,
            template: input.title.to_string(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(SvgRewriter::new(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(title: &str, text: &str) -> ValidationResult {
        Validator::default().validate(&TemplateInput { title, text })
    }

    #[test]
    fn test_non_svg_templates_are_ignored() {
        let result = validate("PAGE_CONTAINER", "<div>");
        assert!(result.valid);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_valid_svg_passes() {
        let result = validate("icon.svg", "<svg><style>.a{fill:red}</style><rect/></svg>");
        assert!(result.valid);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let result = validate("icon.svg", "<svg><rect></svg>");
        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].rule, "well_formed_xml");
    }

    #[test]
    fn test_non_svg_root_is_a_warning() {
        let result = validate("ICON.SVG", "<g/>");
        assert!(result.valid);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Warning);
        assert_eq!(result.violations[0].actual.as_deref(), Some("g"));
    }

    #[test]
    fn test_style_errors_block() {
        let result = validate("icon.svg", "<svg><style>.a{fill:@nope}</style></svg>");
        assert!(!result.valid);
        assert_eq!(result.violations[0].rule, "styles_compile");
    }
}
