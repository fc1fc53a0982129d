//! Route matching for `data/svg/...` and `svg.php?...`, as a decorator
//! over the host router.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::Config;

pub const FRIENDLY_PREFIX: &str = "data/svg/";
pub const RAW_PREFIX: &str = "svg.php";

/// Parameters of one SVG render request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvgRequestParams {
    pub svg: String,
    pub s: u32,
    pub l: u32,
    pub k: String,
    pub d: u64,
    /// `_debug` was passed.
    pub debug: bool,
}

impl SvgRequestParams {
    /// Parse `svg.php` query parameters, honouring the old `style` and
    /// `langauge` names when `s`/`l` are missing.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        let mut legacy_style = 0;
        let mut legacy_language = 0;

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "svg" => params.svg = value.into_owned(),
                "s" => params.s = parse_uint(&value) as u32,
                "l" => params.l = parse_uint(&value) as u32,
                "k" => params.k = value.into_owned(),
                "d" => params.d = parse_uint(&value),
                "style" => legacy_style = parse_uint(&value) as u32,
                "langauge" => legacy_language = parse_uint(&value) as u32,
                "_debug" => params.debug = !value.is_empty() && value != "0",
                _ => {}
            }
        }

        if params.s == 0 {
            params.s = legacy_style;
        }
        if params.l == 0 {
            params.l = legacy_language;
        }
        params
    }
}

/// Leading digits as an unsigned integer; anything else is 0.
fn parse_uint(value: &str) -> u64 {
    let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn friendly_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^data/svg/([^/]+)/([^/]+)/([^/]+)/([^./]+)\.(svg|png)$")
            .expect("valid svg route pattern")
    })
}

fn has_prefix_ignore_case(path: &str, prefix: &str) -> bool {
    path.get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

/// Match either SVG URL shape. `path` has no query string.
pub fn match_svg_route(path: &str, query: &str) -> Option<SvgRequestParams> {
    let path = path.trim_start_matches('/');

    if has_prefix_ignore_case(path, FRIENDLY_PREFIX) {
        let caps = friendly_pattern().captures(path)?;
        let query = SvgRequestParams::from_query(query);
        return Some(SvgRequestParams {
            svg: format!("{}.{}", &caps[4], caps[5].to_ascii_lowercase()),
            s: parse_uint(&caps[1]) as u32,
            l: parse_uint(&caps[2]) as u32,
            d: parse_uint(&caps[3]),
            k: query.k,
            debug: query.debug,
        });
    }

    if has_prefix_ignore_case(path, RAW_PREFIX) {
        return Some(SvgRequestParams::from_query(query));
    }

    None
}

/// The host router: path and query in, route target out.
pub trait Router {
    type Target;

    fn route(&self, path: &str, query: &str) -> Option<Self::Target>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed<T> {
    Svg(SvgRequestParams),
    Inner(T),
}

/// Router with no routes of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRouter;

impl Router for NullRouter {
    type Target = ();

    fn route(&self, _path: &str, _query: &str) -> Option<()> {
        None
    }
}

/// Intercepts SVG URLs before the wrapped router sees them.
#[derive(Debug, Clone)]
pub struct SvgRouter<R> {
    inner: R,
    integration: bool,
}

impl<R: Router> SvgRouter<R> {
    pub fn new(inner: R, integration: bool) -> Self {
        Self { inner, integration }
    }

    pub fn from_config(inner: R, config: &Config) -> Self {
        Self::new(inner, config.router_integration)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Router> Router for SvgRouter<R> {
    type Target = Routed<R::Target>;

    fn route(&self, path: &str, query: &str) -> Option<Self::Target> {
        if self.integration {
            if let Some(params) = match_svg_route(path, query) {
                return Some(Routed::Svg(params));
            }
        }
        self.inner.route(path, query).map(Routed::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pages;

    impl Router for Pages {
        type Target = String;

        fn route(&self, path: &str, _query: &str) -> Option<String> {
            Some(format!("page:{}", path))
        }
    }

    #[test]
    fn test_friendly_route() {
        let params = match_svg_route("/data/svg/2/3/1700000000/icon.png", "k=abc").unwrap();
        assert_eq!(
            params,
            SvgRequestParams {
                svg: "icon.png".into(),
                s: 2,
                l: 3,
                d: 1700000000,
                k: "abc".into(),
                debug: false,
            }
        );
        assert_eq!(match_svg_route("DATA/SVG/1/1/1/icon.SVG", "").unwrap().svg, "icon.svg");
    }

    #[test]
    fn test_friendly_route_rejects_other_shapes() {
        assert!(match_svg_route("data/svg/1/1/icon.svg", "").is_none());
        assert!(match_svg_route("data/svg/1/1/1/icon.gif", "").is_none());
        assert!(match_svg_route("data/svg/1/1/1/a.b.svg", "").is_none());
    }

    #[test]
    fn test_raw_route_with_legacy_aliases() {
        let params = match_svg_route("svg.php", "svg=icon.svg&style=4&langauge=2&d=99").unwrap();
        assert_eq!(params.s, 4);
        assert_eq!(params.l, 2);
        assert_eq!(params.d, 99);

        let params = match_svg_route("svg.php", "svg=icon&s=5&style=4&l=x").unwrap();
        assert_eq!(params.s, 5);
        assert_eq!(params.l, 0);
    }

    #[test]
    fn test_query_values_are_decoded() {
        let params = SvgRequestParams::from_query("svg=admin%3Alogo&k=a%2Bb&_debug=1");
        assert_eq!(params.svg, "admin:logo");
        assert_eq!(params.k, "a+b");
        assert!(params.debug);
    }

    #[test]
    fn test_decorator_respects_integration_flag() {
        let router = SvgRouter::new(Pages, true);
        assert!(matches!(router.route("svg.php", "svg=icon"), Some(Routed::Svg(_))));
        assert_eq!(router.route("threads/1", ""), Some(Routed::Inner("page:threads/1".into())));

        let router = SvgRouter::new(Pages, false);
        assert_eq!(router.route("svg.php", "svg=icon"), Some(Routed::Inner("page:svg.php".into())));

        assert_eq!(SvgRouter::new(NullRouter, true).route("forums/", ""), None);
    }
}
