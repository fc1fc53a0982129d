//! SVG Template CLI - render, inspect and serve SVG templates
//!
//! Commands: templates, render, url, inline-css, validate, capabilities, serve
//! Outputs JSON to stdout (rendered images go to stdout or `--output`)
//! Returns non-zero on failure, 2 on validation failure

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use svgtemplate_core::{
    context::UserAgentSniffer,
    router::{NullRouter, Router, Routed},
    templates::svg_template_name,
    validation::TemplateInput,
    Config, ConversionCapabilities, MemoryCache, RequestHeaders, StaticStyles, SvgPipeline, SvgRewriter,
    SvgRouter, TemplateRegistry, Validator,
};

#[derive(Parser)]
#[command(name = "svgtemplate-cli")]
#[command(about = "SVG Template CLI - render, inspect and serve SVG templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Path to a JSON options file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Style id (0 = default style)
    #[arg(short, long, default_value_t = 0)]
    style: u32,

    /// Language id (0 = default language)
    #[arg(short, long, default_value_t = 0)]
    language: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Render a template to SVG (or PNG)
    Render {
        /// Template name, e.g. `icon` or `admin:logo`
        name: String,

        /// Convert the rendered SVG to PNG
        #[arg(long)]
        png: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the URL a template would be served from
    Url {
        name: String,

        /// Force an output extension (`svg` or `png`)
        #[arg(long = "as")]
        extension: Option<String>,

        /// Append the validation key
        #[arg(long)]
        validation: bool,

        /// User-Agent used for PNG negotiation
        #[arg(long)]
        user_agent: Option<String>,
    },

    /// Print a template as a CSS `url()` literal
    InlineCss {
        name: String,

        #[arg(long)]
        base64: bool,

        #[arg(long)]
        escape_whitespace: bool,
    },

    /// Validate a template file before saving it
    Validate {
        file: PathBuf,

        /// Template title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
    },

    /// Report which PNG conversion strategies this host supports
    Capabilities,

    /// Serve `data/svg/...` and `svg.php?...` over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    print_json(&json!({ "success": false, "error": message.to_string() }));
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => return fail(format!("Failed to load config: {}", e)),
        },
        None => Config::default(),
    };

    // Load templates
    let registry = match TemplateRegistry::load_from_dir(&cli.templates_dir) {
        Ok(r) => Arc::new(r),
        Err(e) => return fail(format!("Failed to load templates: {}", e)),
    };

    let styles = Arc::new(StaticStyles::from_config(&config));
    let pipeline = SvgPipeline::new(config, registry.clone(), styles)
        .with_cache(Arc::new(MemoryCache::with_hash_store()));
    let ctx = pipeline.context(cli.style, cli.language);

    match cli.command {
        Commands::Templates => {
            print_json(&json!(registry.list()));
            ExitCode::SUCCESS
        }

        Commands::Render { name, png, output } => {
            let bytes = if png {
                pipeline.render_png(&name, &ctx)
            } else {
                match svg_template_name(&name) {
                    Some(template) => pipeline.render_checked(&template, &ctx).map(String::into_bytes),
                    None => return fail(format!("Invalid template name: {}", name)),
                }
            };
            let bytes = match bytes {
                Ok(b) if b.is_empty() => return fail(format!("{} rendered no output", name)),
                Ok(b) => b,
                Err(e) => return fail(e),
            };
            write_output(output.as_deref(), &bytes)
        }

        Commands::Url {
            name,
            extension,
            validation,
            user_agent,
        } => {
            let client = UserAgentSniffer::new(user_agent.as_deref());
            let links = pipeline.links();
            let url = match extension {
                Some(ext) => links.get_svg_url_as(&name, &ext, validation, &ctx, Some(&client)),
                None => links.get_svg_url(&name, validation, &ctx, Some(&client)),
            };
            match url {
                Ok(url) => {
                    print_json(&json!({ "success": true, "url": url }));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Commands::InlineCss {
            name,
            base64,
            escape_whitespace,
        } => match pipeline.inline_css(&name, base64, escape_whitespace, &ctx) {
            Ok(css) => {
                print_json(&json!({ "success": true, "css": css }));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::Validate { file, title } => {
            let text = match fs::read_to_string(&file) {
                Ok(t) => t,
                Err(e) => return fail(format!("Failed to read {}: {}", file.display(), e)),
            };
            let title = title.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            let validator = Validator::new(SvgRewriter::from_config(pipeline.config()));
            let result = validator.validate(&TemplateInput {
                title: &title,
                text: &text,
            });
            print_json(&serde_json::to_value(&result).unwrap_or(Value::Null));
            if result.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Validation failure
            }
        }

        Commands::Capabilities => {
            let capabilities = ConversionCapabilities::probe();
            let converter = pipeline.converter();
            print_json(&json!({
                "capabilities": capabilities,
                "warnings": capabilities.warnings(),
                "configured": converter.name(),
                "supported": capabilities.supports(converter),
            }));
            ExitCode::SUCCESS
        }

        Commands::Serve { addr } => serve(&pipeline, &addr),
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> ExitCode {
    let result = match path {
        Some(path) => fs::write(path, bytes),
        None => std::io::stdout().write_all(bytes),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(format!("Failed to write output: {}", e)),
    }
}

fn serve(pipeline: &SvgPipeline, addr: &str) -> ExitCode {
    let server = match tiny_http::Server::http(addr) {
        Ok(s) => s,
        Err(e) => return fail(format!("Failed to bind {}: {}", addr, e)),
    };
    let router = SvgRouter::from_config(NullRouter, pipeline.config());
    eprintln!("Serving SVG templates on http://{}/", addr);

    for request in server.incoming_requests() {
        let (path, query) = request
            .url()
            .split_once('?')
            .map(|(p, q)| (p.to_string(), q.to_string()))
            .unwrap_or_else(|| (request.url().to_string(), String::new()));

        let header = |name: &str| {
            request
                .headers()
                .iter()
                .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                .map(|h| h.value.to_string())
        };
        let headers = RequestHeaders {
            accept_encoding: header("Accept-Encoding"),
            if_modified_since: header("If-Modified-Since"),
            user_agent: header("User-Agent"),
        };

        let response = match router.route(&path, &query) {
            Some(Routed::Svg(params)) => {
                let svg = pipeline.handle(&params, &headers);
                let mut response =
                    tiny_http::Response::from_data(svg.body).with_status_code(tiny_http::StatusCode(svg.status));
                for h in response_headers(&svg.headers) {
                    response.add_header(h);
                }
                response
            }
            Some(Routed::Inner(())) | None => {
                tiny_http::Response::from_data(Vec::new()).with_status_code(tiny_http::StatusCode(404))
            }
        };

        if let Err(e) = request.respond(response) {
            eprintln!("Failed to send response: {}", e);
        }
    }

    ExitCode::SUCCESS
}

/// Headers to copy onto a tiny_http response. tiny_http derives
/// `Content-Length` from the body itself.
fn response_headers(headers: &[(String, String)]) -> Vec<tiny_http::Header> {
    headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("Content-Length"))
        .filter_map(|(name, value)| tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use svgtemplate_core::{OutputFormat, SvgResponse};

    #[test]
    fn test_response_headers_leave_content_length_to_tiny_http() {
        let svg = SvgResponse::png(b"png".to_vec(), 784111777);
        assert!(svg.headers.iter().any(|(n, _)| n == "Content-Length"));

        let headers = response_headers(&svg.headers);
        assert!(headers
            .iter()
            .all(|h| !h.field.equiv("Content-Length")));
        assert!(headers.iter().any(|h| h.field.equiv("Content-Type")));
        assert_eq!(headers.len(), svg.headers.len() - 1);

        let missing = SvgResponse::not_found(OutputFormat::Png);
        assert!(response_headers(&missing.headers)
            .iter()
            .all(|h| !h.field.equiv("content-length")));
    }
}
