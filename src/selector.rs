//! Template Selector - maps a requested name onto one canonical filename
//! and output format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ClientCapabilities;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("Template name is required")]
    InvalidInput,

    #[error("Unsupported extension or path provided: {0}")]
    UnsupportedExtensionProvided(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml; charset=utf-8",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "svg" => Some(OutputFormat::Svg),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

/// The outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub filename: String,
    pub format: OutputFormat,
}

/// Inputs that shape a selection besides the raw name.
#[derive(Clone, Copy, Default)]
pub struct SelectOptions<'a> {
    pub png_capable: bool,
    pub auto_rewrite: bool,
    pub forced_extension: Option<&'a str>,
    pub client: Option<&'a dyn ClientCapabilities>,
    pub debug: bool,
}

/// `pathinfo`-style split of a requested template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathParts<'a> {
    dirname: &'a str,
    filename: &'a str,
    extension: Option<&'a str>,
}

fn split_path(raw: &str) -> PathParts<'_> {
    let (dirname, basename) = match raw.rfind(|c: char| c == '/' || c == '\\') {
        Some(idx) => (&raw[..idx], &raw[idx + 1..]),
        None => (".", raw),
    };
    let (filename, extension) = match basename.rfind('.') {
        Some(idx) => (&basename[..idx], Some(&basename[idx + 1..])),
        None => (basename, None),
    };
    PathParts {
        dirname,
        filename,
        extension: extension.filter(|e| !e.is_empty()),
    }
}

/// Resolve a requested template into `{name}.{ext}`.
///
/// `Ok(None)` means "no output": forced extensions degrade silently.
pub fn resolve(raw: &str, options: &SelectOptions<'_>) -> Result<Option<Selection>, SelectError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SelectError::InvalidInput);
    }

    let parts = split_path(raw);
    if parts.filename.is_empty() || parts.filename.ends_with(':') {
        return Err(SelectError::InvalidInput);
    }

    let mut supported = vec![OutputFormat::Svg];
    if options.png_capable {
        supported.push(OutputFormat::Png);
    }
    let is_supported =
        |ext: &str| OutputFormat::from_extension(ext).map_or(false, |f| supported.contains(&f));

    let forced = options.forced_extension.filter(|e| !e.is_empty());
    let format = match forced {
        Some(ext) if !is_supported(ext) => return Ok(None),
        Some(ext) => OutputFormat::from_extension(ext).unwrap_or(OutputFormat::Svg),
        None => {
            let wants_png = options
                .client
                .map_or(false, |client| client.requires_raster_fallback());
            if options.png_capable && options.auto_rewrite && wants_png {
                OutputFormat::Png
            } else {
                OutputFormat::Svg
            }
        }
    };

    let bad_extension = parts.extension.map_or(false, |ext| !is_supported(ext));
    let has_path = !parts.dirname.is_empty() && parts.dirname != ".";
    if bad_extension || has_path {
        if !options.png_capable && parts.extension == Some("png") && options.debug {
            tracing::error!(
                template = %raw,
                "Requesting a png for {}.svg, but svg => png transcoding is not enabled",
                parts.filename
            );
            return Ok(None);
        }
        if forced.is_some() {
            return Ok(None);
        }
        return Err(SelectError::UnsupportedExtensionProvided(raw.to_string()));
    }

    Ok(Some(Selection {
        filename: format!("{}.{}", parts.filename, format.extension()),
        format,
    }))
}
