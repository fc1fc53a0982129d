//! Style preprocessing bridge.
//!
//! Inline SVG styles are written in the same LESS dialect as the rest of
//! the style system. This module understands the subset that shows up in
//! practice (variables, `@{}` interpolation, `~"escapes"`, nested rules with
//! `&`, nested at-rules, `//` comments), flattens it to plain CSS and hands
//! the result to lightningcss, which validates and minifies it.
//!
//! Mixins, guards and operations are not supported.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

const MAX_VARIABLE_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StyleError {
    #[error("unbalanced braces in style source")]
    UnbalancedBraces,

    #[error("undefined variable @{0}")]
    UndefinedVariable(String),

    #[error("variable @{0} is defined recursively")]
    RecursiveVariable(String),

    #[error("invalid CSS: {0}")]
    Css(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Variable(String, String),
    Declaration(String),
    Statement(String),
    Rule { selector: String, items: Vec<Item> },
    AtRule { prelude: String, items: Vec<Item> },
}

/// Compiles LESS-flavoured source to minified CSS.
#[derive(Debug, Clone, Copy, Default)]
pub struct LessCompiler;

impl LessCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(&self, source: &str) -> Result<String, StyleError> {
        let stripped = strip_comments(source);
        let chars: Vec<char> = stripped.chars().collect();
        let mut pos = 0;
        let items = parse_items(&chars, &mut pos, false)?;

        let mut emitter = Emitter::default();
        emitter.emit_block(&items, &[])?;
        if emitter.out.trim().is_empty() {
            return Ok(String::new());
        }
        minify_css(&emitter.out)
    }
}

/// Parse and re-print CSS through lightningcss.
pub fn minify_css(css: &str) -> Result<String, StyleError> {
    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| StyleError::Css(e.to_string()))?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;
    Ok(result.code)
}

fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut quote: Option<char> = None;
    let mut parens = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 1;
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                continue;
            }
            ('/', Some('/')) if parens == 0 => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            ('"' | '\'', _) => quote = Some(c),
            ('(', _) => parens += 1,
            (')', _) => parens = parens.saturating_sub(1),
            _ => {}
        }
        out.push(c);
        i += 1;
    }

    out
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^@([A-Za-z0-9_-]+)\s*:(.*)$").expect("valid variable pattern")
    })
}

fn parse_items(chars: &[char], pos: &mut usize, nested: bool) -> Result<Vec<Item>, StyleError> {
    let mut items = Vec::new();
    let mut buf = String::new();
    let mut quote: Option<char> = None;
    let mut parens = 0usize;

    while *pos < chars.len() {
        let c = chars[*pos];
        *pos += 1;

        if let Some(q) = quote {
            buf.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(*pos) {
                    buf.push(next);
                    *pos += 1;
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                buf.push(c);
            }
            '(' => {
                parens += 1;
                buf.push(c);
            }
            ')' => {
                parens = parens.saturating_sub(1);
                buf.push(c);
            }
            ';' if parens == 0 => {
                push_statement(&mut items, &buf);
                buf.clear();
            }
            '{' if parens == 0 => {
                let header = buf.trim().to_string();
                buf.clear();
                let children = parse_items(chars, pos, true)?;
                if header.starts_with('@') {
                    items.push(Item::AtRule {
                        prelude: header,
                        items: children,
                    });
                } else {
                    items.push(Item::Rule {
                        selector: header,
                        items: children,
                    });
                }
            }
            '}' if parens == 0 => {
                if !nested {
                    return Err(StyleError::UnbalancedBraces);
                }
                push_statement(&mut items, &buf);
                return Ok(items);
            }
            _ => buf.push(c),
        }
    }

    if nested {
        return Err(StyleError::UnbalancedBraces);
    }
    push_statement(&mut items, &buf);
    Ok(items)
}

fn push_statement(items: &mut Vec<Item>, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if let Some(caps) = variable_pattern().captures(text) {
        items.push(Item::Variable(caps[1].to_string(), caps[2].trim().to_string()));
    } else if text.starts_with('@') {
        items.push(Item::Statement(text.to_string()));
    } else {
        items.push(Item::Declaration(text.to_string()));
    }
}

#[derive(Default)]
struct Emitter {
    scopes: Vec<HashMap<String, String>>,
    out: String,
}

impl Emitter {
    fn emit_block(&mut self, items: &[Item], parents: &[String]) -> Result<(), StyleError> {
        let scope = items
            .iter()
            .filter_map(|item| match item {
                Item::Variable(name, value) => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();
        self.scopes.push(scope);
        let result = self.emit_items(items, parents);
        self.scopes.pop();
        result
    }

    fn emit_items(&mut self, items: &[Item], parents: &[String]) -> Result<(), StyleError> {
        let mut declarations = Vec::new();
        for item in items {
            if let Item::Declaration(decl) = item {
                declarations.push(self.resolve_declaration(decl)?);
            }
        }

        if !declarations.is_empty() {
            if !parents.is_empty() {
                self.out.push_str(&parents.join(","));
                self.out.push('{');
            }
            for decl in &declarations {
                self.out.push_str(decl);
                self.out.push(';');
            }
            if !parents.is_empty() {
                self.out.push('}');
            }
        }

        for item in items {
            match item {
                Item::Statement(statement) => {
                    self.out.push_str(&self.resolve_prelude(statement)?);
                    self.out.push(';');
                }
                Item::Rule { selector, items } => {
                    let selectors = self.compose_selectors(parents, selector)?;
                    self.emit_block(items, &selectors)?;
                }
                Item::AtRule { prelude, items } => {
                    let prelude = self.resolve_prelude(prelude)?;
                    self.out.push_str(&prelude);
                    self.out.push('{');
                    self.emit_block(items, parents)?;
                    self.out.push('}');
                }
                Item::Variable(..) | Item::Declaration(_) => {}
            }
        }

        Ok(())
    }

    fn resolve_declaration(&self, decl: &str) -> Result<String, StyleError> {
        match decl.split_once(':') {
            Some((property, value)) => Ok(format!(
                "{}:{}",
                self.interpolate(property.trim())?,
                self.resolve_value(value.trim(), 0)?
            )),
            None => Ok(decl.to_string()),
        }
    }

    /// Resolve variables after the at-keyword, leaving the keyword alone.
    fn resolve_prelude(&self, prelude: &str) -> Result<String, StyleError> {
        match prelude.split_once(char::is_whitespace) {
            Some((keyword, rest)) => Ok(format!("{} {}", keyword, self.resolve_value(rest.trim(), 0)?)),
            None => Ok(prelude.to_string()),
        }
    }

    fn compose_selectors(&self, parents: &[String], selector: &str) -> Result<Vec<String>, StyleError> {
        let selector = self.interpolate(selector)?;
        let children = split_top_level(&selector, ',');
        let mut composed = Vec::new();

        if parents.is_empty() {
            for child in children {
                let child = child.replace('&', "");
                let child = child.trim();
                if !child.is_empty() {
                    composed.push(child.to_string());
                }
            }
            return Ok(composed);
        }

        for parent in parents {
            for child in &children {
                let child = child.trim();
                if child.contains('&') {
                    composed.push(child.replace('&', parent));
                } else {
                    composed.push(format!("{} {}", parent, child));
                }
            }
        }
        Ok(composed)
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(String::as_str)
    }

    fn variable(&self, name: &str, depth: usize) -> Result<String, StyleError> {
        if depth >= MAX_VARIABLE_DEPTH {
            return Err(StyleError::RecursiveVariable(name.to_string()));
        }
        let value = self
            .lookup(name)
            .ok_or_else(|| StyleError::UndefinedVariable(name.to_string()))?;
        self.resolve_value(value, depth + 1)
    }

    /// Replace `@{name}` only.
    fn interpolate(&self, text: &str) -> Result<String, StyleError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("@{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            out.push_str(&self.variable(&after[..end], 0)?);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Replace `@name`, `@{name}` and `~"escaped"` strings in a value.
    fn resolve_value(&self, value: &str, depth: usize) -> Result<String, StyleError> {
        let chars: Vec<char> = value.chars().collect();
        let mut out = String::with_capacity(value.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '~' if matches!(chars.get(i + 1), Some('"') | Some('\'')) => {
                    let (inner, next) = read_quoted(&chars, i + 1);
                    out.push_str(&self.interpolate(&inner)?);
                    i = next;
                }
                '"' | '\'' => {
                    let (inner, next) = read_quoted(&chars, i);
                    out.push(c);
                    out.push_str(&self.interpolate(&inner)?);
                    out.push(c);
                    i = next;
                }
                '@' if chars.get(i + 1) == Some(&'{') => {
                    let end = chars[i + 2..].iter().position(|&ch| ch == '}');
                    match end {
                        Some(len) => {
                            let name: String = chars[i + 2..i + 2 + len].iter().collect();
                            out.push_str(&self.variable(&name, depth)?);
                            i += len + 3;
                        }
                        None => {
                            out.push(c);
                            i += 1;
                        }
                    }
                }
                '@' => {
                    let name: String = chars[i + 1..]
                        .iter()
                        .take_while(|ch| ch.is_ascii_alphanumeric() || **ch == '-' || **ch == '_')
                        .collect();
                    if name.is_empty() {
                        out.push(c);
                        i += 1;
                    } else {
                        out.push_str(&self.variable(&name, depth)?);
                        i += name.chars().count() + 1;
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        Ok(out)
    }
}

/// Read a quoted string starting at `start` (the quote); returns the
/// unquoted content and the index after the closing quote.
fn read_quoted(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut inner = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            inner.push(c);
            inner.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            return (inner, i + 1);
        }
        inner.push(c);
        i += 1;
    }
    (inner, i)
}

fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if c == separator && depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Result<String, StyleError> {
        LessCompiler::new().compile(source)
    }

    #[test]
    fn test_plain_css_is_minified() {
        assert_eq!(compile(".a { color: red; }").unwrap(), ".a{color:red}");
    }

    #[test]
    fn test_variables_and_interpolation() {
        let css = compile("@main: red;\n@name: icon;\n.@{name} { color: @main; }").unwrap();
        assert_eq!(css, ".icon{color:red}");
    }

    #[test]
    fn test_variable_chains_resolve() {
        let css = compile("@a: @b;\n@b: 2px;\n.x { margin: @a; }").unwrap();
        assert_eq!(css, ".x{margin:2px}");
    }

    #[test]
    fn test_scoped_variables_shadow_globals() {
        let css = compile("@c: red;\n.a { @c: blue; color: @c; }\n.b { color: @c; }").unwrap();
        assert!(css.contains(".a{color:#00f}"));
        assert!(css.contains(".b{color:red}"));
    }

    #[test]
    fn test_nesting_is_flattened() {
        let css = compile(".a { color: red; &:hover { color: blue; } .b { margin: 0; } }").unwrap();
        assert!(css.starts_with(".a{color:red}"));
        assert!(css.contains(".a:hover{color:#00f}"));
        assert!(css.contains(".a .b{margin:0}"));
    }

    #[test]
    fn test_nested_media_bubbles_up() {
        let css = compile(".a { @media (min-width: 10px) { color: red; } }").unwrap();
        assert!(css.starts_with("@media"));
        assert!(css.contains(".a{color:red}"));
    }

    #[test]
    fn test_comments_are_removed_but_urls_survive() {
        let css = compile("// leading comment\n.a { /* block */ background: url(http://x/y.png); }")
            .unwrap();
        assert!(css.contains("http://x/y.png"));
        assert!(!css.contains("comment"));
    }

    #[test]
    fn test_escape_strings() {
        let css = compile("@w: 10px;\n.a { width: ~\"calc(100% - @{w})\"; }").unwrap();
        assert!(css.contains("calc(100% - 10px)"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(compile(".a { color: @nope; }"), Err(StyleError::UndefinedVariable("nope".into())));
        assert_eq!(compile("@a: @a;\n.x { margin: @a; }"), Err(StyleError::RecursiveVariable("a".into())));
        assert_eq!(compile(".a { color: red;"), Err(StyleError::UnbalancedBraces));
        assert_eq!(compile(".a { color: red; } }"), Err(StyleError::UnbalancedBraces));
    }

    #[test]
    fn test_only_variables_compile_to_nothing() {
        assert_eq!(compile("@a: 1px;").unwrap(), "");
    }

    #[test]
    fn test_compiled_output_is_stable() {
        let once = compile(".a { color: red; &:hover { color: blue; } }").unwrap();
        assert_eq!(compile(&once).unwrap(), once);
    }
}
