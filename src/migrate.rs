//! Rewrites of stored style property text.
//!
//! Style properties may embed `{{ getSvgUrl('name') }}`; those calls are
//! replaced with real URLs when the properties are loaded. Older stored text
//! that asked for a `.png` by name is upgraded to the explicit
//! `getSvgUrlAs` form.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn url_call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*getSvgUrl\s*\(\s*'([^']+)'\s*\)\s*\}\}").expect("valid getSvgUrl pattern")
    })
}

fn legacy_png_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)getSvgUrl\s*\(\s*'([^'./]+)\.png'\s*").expect("valid legacy png pattern")
    })
}

/// Replace every `{{ getSvgUrl('name') }}` with `resolve(name)`.
///
/// Returns `None` when nothing changed; calls that resolve to nothing are
/// left as they are.
pub fn rewrite_svg_url_calls<F>(text: &str, mut resolve: F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut changed = false;
    let rewritten = url_call_pattern().replace_all(text, |caps: &Captures<'_>| {
        match resolve(&caps[1]) {
            Some(url) if url != caps[1] => {
                changed = true;
                url
            }
            _ => caps[0].to_string(),
        }
    });
    if changed {
        Some(rewritten.into_owned())
    } else {
        None
    }
}

/// Apply [`rewrite_svg_url_calls`] to scalar properties and to the string
/// members of array/map properties. Returns how many values changed.
pub fn inject_style_properties<F>(properties: &mut BTreeMap<String, Value>, mut resolve: F) -> usize
where
    F: FnMut(&str) -> Option<String>,
{
    let mut changed = 0;
    let mut rewrite = |value: &mut Value| {
        if let Value::String(text) = value {
            if let Some(new_text) = rewrite_svg_url_calls(text, &mut resolve) {
                *text = new_text;
                changed += 1;
            }
        }
    };

    for property in properties.values_mut() {
        match property {
            Value::Object(components) => components.values_mut().for_each(&mut rewrite),
            Value::Array(components) => components.iter_mut().for_each(&mut rewrite),
            other => rewrite(other),
        }
    }
    changed
}

/// Upgrade `getSvgUrl('name.png'...)` to `getSvgUrlAs('name', 'png'...)`.
pub fn upgrade_svg_url_calls(text: &str) -> Option<String> {
    let pattern = legacy_png_pattern();
    if !pattern.is_match(text) {
        return None;
    }
    Some(pattern.replace_all(text, "getSvgUrlAs('$1', 'png'").into_owned())
}
