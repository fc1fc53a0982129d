//! Strips editor cruft from a parsed SVG and lifts out `<style>` text.

use crate::xml::{Element, Node, QName};

pub const SODIPODI_NS: &str = "http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd";
pub const INKSCAPE_NS: &str = "http://www.inkscape.org/namespaces/inkscape";

const EDITOR_PREFIXES: &[&str] = &["sodipodi", "inkscape"];
const EDITOR_NAMESPACES: &[&str] = &[SODIPODI_NS, INKSCAPE_NS];
const METADATA_ELEMENTS: &[&str] = &["metadata", "desc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanitizeOptions {
    /// Drop editor-only nodes/attributes and whitespace-only text.
    pub compact: bool,
}

/// Sanitize `root` in place and return the accumulated `<style>` text,
/// one block per line in document order.
pub fn sanitize(root: &mut Element, options: SanitizeOptions) -> String {
    root.remove_attribute(Some("xml"), "space");

    let mut styles = String::new();
    walk(root, options, &mut styles);
    styles
}

fn walk(element: &mut Element, options: SanitizeOptions, styles: &mut String) {
    if options.compact {
        element
            .namespaces
            .retain(|ns| !EDITOR_NAMESPACES.contains(&ns.uri.as_str()));
        element.attributes.retain(|a| !is_editor_name(&a.name));
    }

    let children = std::mem::take(&mut element.children);
    for child in children {
        match child {
            Node::Element(e) if e.name.local == "style" && !is_editor_name(&e.name) => {
                if !styles.is_empty() {
                    styles.push('\n');
                }
                styles.push_str(&e.text_content());
            }
            Node::Element(e) if options.compact && is_editor_element(&e) => {}
            Node::Element(mut e) => {
                walk(&mut e, options, styles);
                element.children.push(Node::Element(e));
            }
            Node::Text(text) if options.compact && text.trim().is_empty() => {}
            Node::Text(text) => element.children.push(Node::Text(text)),
            Node::Comment(_) => {}
        }
    }
}

/// Editor names are matched by namespace URI whatever the prefix; names
/// without a resolved namespace fall back to the well-known prefixes.
fn is_editor_name(name: &QName) -> bool {
    match name.namespace.as_deref() {
        Some(uri) => EDITOR_NAMESPACES.contains(&uri),
        None => name
            .prefix
            .as_deref()
            .map_or(false, |p| EDITOR_PREFIXES.contains(&p)),
    }
}

fn is_editor_element(element: &Element) -> bool {
    is_editor_name(&element.name) || METADATA_ELEMENTS.contains(&element.name.local.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse, serialize};

    const INKSCAPE_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
     xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd"
     xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
     xml:space="preserve" width="16" inkscape:version="1.2">
  <!-- generated -->
  <metadata>rdf junk</metadata>
  <sodipodi:namedview id="nv" inkscape:zoom="2"/>
  <desc>An icon</desc>
  <g id="layer" inkscape:label="Layer 1" inkscape:groupmode="layer">
    <rect x="1" y="2" sodipodi:nodetypes="cc"/>
  </g>
</svg>"#;

    #[test]
    fn test_compact_strips_editor_content_only() {
        let mut root = parse(INKSCAPE_SVG).unwrap();
        let styles = sanitize(&mut root, SanitizeOptions { compact: true });
        assert!(styles.is_empty());
        assert_eq!(
            serialize(&root),
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="16"><g id="layer"><rect x="1" y="2"/></g></svg>"#
        );
    }

    #[test]
    fn test_compact_matches_editor_namespaces_by_uri() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:ink="http://www.inkscape.org/namespaces/inkscape"><g ink:label="x"><ink:path/><rect/></g></svg>"#;
        let mut root = parse(svg).unwrap();
        sanitize(&mut root, SanitizeOptions { compact: true });
        let out = serialize(&root);
        assert_eq!(out, r#"<svg xmlns="http://www.w3.org/2000/svg"><g><rect/></g></svg>"#);
        assert!(parse(&out).is_ok());
    }

    #[test]
    fn test_editor_prefix_bound_elsewhere_is_kept() {
        let svg = r#"<svg xmlns:inkscape="urn:example:not-the-editor"><g inkscape:label="x"/></svg>"#;
        let mut root = parse(svg).unwrap();
        sanitize(&mut root, SanitizeOptions { compact: true });
        let out = serialize(&root);
        assert_eq!(out, svg);
        assert!(parse(&out).is_ok());
    }

    #[test]
    fn test_non_compact_keeps_editor_content_but_drops_comments() {
        let mut root = parse(INKSCAPE_SVG).unwrap();
        sanitize(&mut root, SanitizeOptions { compact: false });
        let out = serialize(&root);
        assert!(out.contains("sodipodi:namedview"));
        assert!(out.contains("inkscape:label"));
        assert!(!out.contains("<!--"));
        assert!(!out.contains("xml:space"));
    }

    #[test]
    fn test_styles_collected_in_document_order() {
        let mut root = parse(
            "<svg><style>.a{}</style><g><style>.b{}</style></g><style>.c{}</style><rect/></svg>",
        )
        .unwrap();
        let styles = sanitize(&mut root, SanitizeOptions { compact: true });
        assert_eq!(styles, ".a{}\n.b{}\n.c{}");
        assert_eq!(serialize(&root), "<svg><g/><rect/></svg>");
    }
}
