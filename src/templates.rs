//! Template System - Names, Lookup and Rendering
//!
//! The host templating engine is a collaborator: this crate only asks it
//! whether a template exists and to render one to text.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::context::RenderContext;

pub type TemplateName = String;

pub const DEFAULT_NAMESPACE: &str = "public";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template {template} failed to render: {message}")]
    Render { template: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `{namespace}:{name}[.{ext}]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    pub namespace: String,
    pub name: String,
    pub extension: Option<String>,
}

impl TemplateRef {
    /// Parse a reference. The name must be non-empty and free of path separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (namespace, rest) = match raw.split_once(':') {
            Some((ns, rest)) if !ns.is_empty() => (ns, rest),
            Some(_) => return None,
            None => (DEFAULT_NAMESPACE, raw),
        };

        if rest.contains('/') || rest.contains('\\') {
            return None;
        }

        let (name, extension) = match rest.rsplit_once('.') {
            Some((name, ext)) if !ext.is_empty() => (name, Some(ext.to_ascii_lowercase())),
            Some((name, _)) => (name, None),
            None => (rest, None),
        };

        if name.is_empty() {
            return None;
        }

        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            extension,
        })
    }

    /// `{namespace}:{name}.{ext}`, defaulting the extension to `svg`.
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}.{}",
            self.namespace,
            self.name,
            self.extension.as_deref().unwrap_or("svg")
        )
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn valid_template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^([a-z0-9_]+:|)([a-z0-9_]+?)(\.svg)?$").expect("valid template pattern")
    })
}

/// Reduce requested names to the canonical `{type}:{name}.svg` to render.
///
/// Only one SVG is rendered per request, so at most one name is returned.
pub fn filter_valid_templates<'a, I>(requested: I) -> Vec<TemplateName>
where
    I: IntoIterator<Item = &'a str>,
{
    requested
        .into_iter()
        .find_map(|template| {
            let caps = valid_template_pattern().captures(template)?;
            let kind = caps.get(1).map_or("", |m| m.as_str());
            let kind = if kind.is_empty() { "public:" } else { kind };
            let name = caps.get(2)?.as_str();
            Some(format!("{}{}.svg", kind, name))
        })
        .into_iter()
        .collect()
}

/// The SVG template behind a requested `{name}.svg` or `{name}.png`.
pub fn svg_template_name(requested: &str) -> Option<TemplateName> {
    let lower = requested.to_ascii_lowercase();
    let stem = if lower.ends_with(".svg") || lower.ends_with(".png") {
        &requested[..requested.len() - 4]
    } else {
        requested
    };
    filter_valid_templates([format!("{}.svg", stem).as_str()]).pop()
}

/// What the host templating engine provides to this crate.
pub trait TemplateSource: Send + Sync {
    fn is_known(&self, name: &str) -> bool;

    fn render(&self, name: &str, ctx: &RenderContext) -> Result<String, TemplateError>;
}

/// Template registry - holds template text keyed by canonical name.
///
/// Stands in for the host engine: rendering returns the stored text as-is.
pub struct TemplateRegistry {
    templates: HashMap<TemplateName, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    /// Load `*.svg` files. Files directly in `dir` are `public:` templates,
    /// files in a subdirectory use the subdirectory name as namespace.
    pub fn load_from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        if dir.exists() {
            registry.load_namespace(dir, DEFAULT_NAMESPACE)?;
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    if let Some(namespace) = path.file_name().and_then(|n| n.to_str()) {
                        let namespace = namespace.to_string();
                        registry.load_namespace(&path, &namespace)?;
                    }
                }
            }
        }
        Ok(registry)
    }

    fn load_namespace(&mut self, dir: &Path, namespace: &str) -> Result<(), TemplateError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().map_or(true, |e| e != "svg") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            self.templates.insert(format!("{}:{}.svg", namespace, stem), content);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// All template names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register template text; the name is normalized to its canonical form.
    pub fn register(&mut self, name: &str, text: impl Into<String>) {
        let key = TemplateRef::parse(name)
            .map(|r| r.canonical())
            .unwrap_or_else(|| name.to_string());
        self.templates.insert(key, text.into());
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateSource for TemplateRegistry {
    fn is_known(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    fn render(&self, name: &str, _ctx: &RenderContext) -> Result<String, TemplateError> {
        self.get(name)
            .map(str::to_string)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }
}
