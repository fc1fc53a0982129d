//! PNG Conversion Strategy - SVG bytes in, PNG bytes (or nothing) out.
//!
//! Exactly one strategy is active, chosen once from configuration. A strategy
//! whose prerequisites are missing converts everything to empty output.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no" ?>"#;

/// The `renderSvgAsPng` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConversionConfig {
    #[serde(alias = "imagick")]
    Native,
    Cli {
        #[serde(default, alias = "cli")]
        command: String,
    },
    CliPipe {
        #[serde(default, alias = "cli_pipe")]
        command: String,
    },
}

#[derive(Debug, Error)]
enum ConvertError {
    #[error("no shell available")]
    NoShell,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("render error: {0}")]
    Render(String),

    #[error("command failed with {0}")]
    Failed(std::process::ExitStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PngConverter {
    #[default]
    Disabled,
    Native,
    /// Runs `command` through the shell with `{sourceFile}`/`{destFile}`
    /// replaced by temp file paths.
    CliTempFile { command: String },
    /// Pipes SVG into `command` and reads PNG from its stdout.
    CliPipe { command: String },
}

impl PngConverter {
    pub fn from_config(config: Option<&ConversionConfig>) -> Self {
        match config {
            None => PngConverter::Disabled,
            Some(ConversionConfig::Native) => PngConverter::Native,
            Some(ConversionConfig::Cli { command }) => PngConverter::CliTempFile {
                command: command.clone(),
            },
            Some(ConversionConfig::CliPipe { command }) => PngConverter::CliPipe {
                command: command.clone(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PngConverter::Disabled => "disabled",
            PngConverter::Native => "native",
            PngConverter::CliTempFile { .. } => "cli",
            PngConverter::CliPipe { .. } => "cli-pipe",
        }
    }

    /// Availability check for the configured strategy.
    pub fn is_enabled(&self) -> bool {
        match self {
            PngConverter::Disabled => false,
            PngConverter::Native => native_available(),
            PngConverter::CliTempFile { command } | PngConverter::CliPipe { command } => {
                !command.trim().is_empty() && shell_path().is_some()
            }
        }
    }

    /// Convert SVG to PNG. Empty output means "unavailable or failed".
    pub fn convert(&self, svg: &[u8]) -> Vec<u8> {
        if svg.is_empty() || !self.is_enabled() {
            return Vec::new();
        }

        tracing::debug!(strategy = self.name(), bytes = svg.len(), "converting svg to png");
        let result = match self {
            PngConverter::Disabled => return Vec::new(),
            PngConverter::Native => convert_native(svg),
            PngConverter::CliTempFile { command } => convert_with_temp_files(command, svg),
            PngConverter::CliPipe { command } => convert_with_pipe(command, svg),
        };

        match result {
            Ok(png) => png,
            Err(err) => {
                tracing::warn!(strategy = self.name(), error = %err, "svg to png conversion failed");
                Vec::new()
            }
        }
    }
}

fn shell_path() -> Option<&'static Path> {
    static SHELL: OnceLock<Option<PathBuf>> = OnceLock::new();
    SHELL.get_or_init(|| which::which("sh").ok()).as_deref()
}

fn native_available() -> bool {
    cfg!(feature = "native-png")
}

#[cfg(feature = "native-png")]
fn convert_native(svg: &[u8]) -> Result<Vec<u8>, ConvertError> {
    use resvg::{tiny_skia, usvg};

    let mut data = Vec::with_capacity(XML_DECLARATION.len() + svg.len());
    let has_declaration = svg.starts_with(b"<?xml");
    if !has_declaration {
        data.extend_from_slice(XML_DECLARATION.as_bytes());
    }
    data.extend_from_slice(svg);

    let options = usvg::Options {
        fontdb: font_database(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_data(&data, &options).map_err(|e| ConvertError::Render(e.to_string()))?;
    let size = tree.size().to_int_size();
    // new pixmaps start fully transparent
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| ConvertError::Render("invalid image size".to_string()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    pixmap.encode_png().map_err(|e| ConvertError::Render(e.to_string()))
}

#[cfg(feature = "native-png")]
fn font_database() -> std::sync::Arc<resvg::usvg::fontdb::Database> {
    static FONTS: OnceLock<std::sync::Arc<resvg::usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut fontdb = resvg::usvg::fontdb::Database::new();
            fontdb.load_system_fonts();
            std::sync::Arc::new(fontdb)
        })
        .clone()
}

#[cfg(not(feature = "native-png"))]
fn convert_native(_svg: &[u8]) -> Result<Vec<u8>, ConvertError> {
    Err(ConvertError::Render("native rasterizer not compiled in".to_string()))
}

/// Source/destination files, removed on drop whatever happened.
struct TempPair {
    source: PathBuf,
    dest: PathBuf,
}

impl Drop for TempPair {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.source);
        let _ = fs::remove_file(&self.dest);
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

fn convert_with_temp_files(command: &str, svg: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let shell = shell_path().ok_or(ConvertError::NoShell)?;

    // keep the base file alive so its name is not handed out again
    let base = tempfile::Builder::new().prefix("svg2png").tempfile()?;
    let files = TempPair {
        source: with_suffix(base.path(), "svg"),
        dest: with_suffix(base.path(), "png"),
    };

    fs::write(&files.source, svg)?;
    let command = command
        .replace("{destFile}", &files.dest.to_string_lossy())
        .replace("{sourceFile}", &files.source.to_string_lossy());

    let status = Command::new(shell)
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(ConvertError::Failed(status));
    }

    match fs::read(&files.dest) {
        Ok(png) => Ok(png),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

fn convert_with_pipe(command: &str, svg: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let shell = shell_path().ok_or(ConvertError::NoShell)?;

    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut stdin = child.stdin.take().ok_or_else(|| io::Error::other("stdin not captured"))?;
    let input = svg.to_vec();
    // feed stdin from another thread so a full stdout pipe cannot deadlock us
    let writer = std::thread::spawn(move || {
        let _ = stdin.write_all(&input);
    });

    let mut png = Vec::new();
    let read = match child.stdout.take() {
        Some(mut stdout) => stdout.read_to_end(&mut png).map(|_| ()),
        None => Err(io::Error::other("stdout not captured")),
    };
    if read.is_err() {
        let _ = child.kill();
    }
    let _ = writer.join();
    let status = child.wait()?;
    read?;

    // partial output of a failed command is never a png
    if !status.success() {
        return Err(ConvertError::Failed(status));
    }
    Ok(png)
}

/// What this host can do, for the options screen and install checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionCapabilities {
    pub native: bool,
    pub shell: bool,
    pub process: bool,
}

impl ConversionCapabilities {
    pub fn probe() -> Self {
        let shell = shell_path().is_some();
        Self {
            native: native_available(),
            shell,
            process: shell,
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.native {
            warnings.push(
                "Native rasterizer is not compiled in; native SVG to PNG conversion is unavailable"
                    .to_string(),
            );
        }
        if !self.shell || !self.process {
            warnings.push("A POSIX shell is required for converting SVGs to PNGs via CLI".to_string());
        }
        warnings
    }

    pub fn supports(&self, converter: &PngConverter) -> bool {
        match converter {
            PngConverter::Disabled => false,
            PngConverter::Native => self.native,
            PngConverter::CliTempFile { .. } => self.shell,
            PngConverter::CliPipe { .. } => self.process,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "native-png")]
    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    #[test]
    fn test_disabled_converts_nothing() {
        let converter = PngConverter::from_config(None);
        assert!(!converter.is_enabled());
        assert!(converter.convert(b"<svg/>").is_empty());
    }

    #[test]
    fn test_empty_cli_command_is_disabled() {
        for converter in [
            PngConverter::CliTempFile { command: String::new() },
            PngConverter::CliPipe { command: "  ".into() },
        ] {
            assert!(!converter.is_enabled());
            assert!(converter.convert(b"<svg/>").is_empty());
        }
    }

    #[test]
    fn test_empty_input_converts_to_nothing() {
        assert!(PngConverter::Native.convert(b"").is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = ConversionConfig::Cli { command: "x {sourceFile}".into() };
        assert_eq!(
            PngConverter::from_config(Some(&config)),
            PngConverter::CliTempFile { command: "x {sourceFile}".into() }
        );
        assert_eq!(PngConverter::from_config(Some(&ConversionConfig::Native)).name(), "native");
    }

    #[cfg(feature = "native-png")]
    #[test]
    fn test_native_rasterizes() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><rect width="4" height="4" fill="red"/></svg>"#;
        let png = PngConverter::Native.convert(svg);
        assert!(png.starts_with(PNG_MAGIC));
    }

    #[cfg(feature = "native-png")]
    #[test]
    fn test_native_garbage_yields_nothing() {
        assert!(PngConverter::Native.convert(b"not svg at all").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_temp_file_round_trip() {
        let converter = PngConverter::CliTempFile {
            command: "cp {sourceFile} {destFile}".into(),
        };
        assert_eq!(converter.convert(b"<svg/>"), b"<svg/>".to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_temp_file_missing_output_is_empty() {
        let converter = PngConverter::CliTempFile { command: "true".into() };
        assert!(converter.convert(b"<svg/>").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_pipe_captures_stdout() {
        let converter = PngConverter::CliPipe { command: "cat".into() };
        assert_eq!(converter.convert(b"<svg/>"), b"<svg/>".to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_pipe_failure_discards_partial_output() {
        let converter = PngConverter::CliPipe {
            command: "head -c 3; exit 1".into(),
        };
        assert!(converter.is_enabled());
        assert!(converter.convert(b"<svg/>").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_temp_file_failure_discards_output() {
        let converter = PngConverter::CliTempFile {
            command: "cp {sourceFile} {destFile}; exit 3".into(),
        };
        assert!(converter.convert(b"<svg/>").is_empty());
    }

    #[test]
    fn test_capability_warnings() {
        let none = ConversionCapabilities {
            native: false,
            shell: false,
            process: false,
        };
        assert_eq!(none.warnings().len(), 2);
        assert!(!none.supports(&PngConverter::Native));

        let all = ConversionCapabilities {
            native: true,
            shell: true,
            process: true,
        };
        assert!(all.warnings().is_empty());
        assert!(all.supports(&PngConverter::CliPipe { command: "cat".into() }));
    }
}
