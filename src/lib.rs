//! SVG Template Core - SVG templates served as real images
//!
//! # Pipeline
//! 1. Select: requested name to `{name}.{svg|png}`
//! 2. Render: host templating engine produces text
//! 3. Rewrite: sanitize markup, compile and relocate styles
//! 4. Cache: compressed output keyed by style state
//! 5. Convert: optional SVG to PNG
//! 6. Respond: conditional GET, gzip passthrough, 404 on failure

pub mod cache;
pub mod config;
pub mod context;
pub mod convert;
pub mod hashing;
pub mod less;
pub mod links;
pub mod migrate;
pub mod pipeline;
pub mod response;
pub mod rewriter;
pub mod router;
pub mod sanitize;
pub mod selector;
pub mod templates;
pub mod validation;
pub mod xml;

pub use cache::{CacheBackend, CachedOutput, HashStore, LookupOptions, MemoryCache, RenderCache};
pub use config::Config;
pub use context::{RenderContext, StaticStyles, StyleInfo, StyleSource};
pub use convert::{ConversionCapabilities, ConversionConfig, PngConverter};
pub use links::SvgTemplaterHelper;
pub use pipeline::{PipelineError, SvgPipeline};
pub use response::{RequestHeaders, SvgResponse};
pub use rewriter::{RewriteError, SvgRewriter};
pub use router::{match_svg_route, SvgRequestParams, SvgRouter};
pub use selector::{OutputFormat, SelectError};
pub use templates::{TemplateRegistry, TemplateSource};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, Validator, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
