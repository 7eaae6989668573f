// Config loader and validator
//
// Loads tickertape.yaml, validates structure, resolves variable
// interpolation, and computes a deterministic config hash for boot logging.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All errors that can occur during config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config source: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("undefined variable ${{{name}}} in config (not set in environment)")]
    UndefinedVariable { name: String },
}

// ---------------------------------------------------------------------------
// ConfigSource trait (interface-first, dependency injection)
// ---------------------------------------------------------------------------

/// Abstraction over where config YAML comes from.
///
/// `FileSource` reads from disk; `StringSource` provides content directly
/// (used in tests to avoid file I/O).
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Loads config from a file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// Provides config content directly as a string. Used for testing.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Typed config structs
// ---------------------------------------------------------------------------

pub const DEFAULT_UPSTREAM_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_CHROMA_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_COLLECTION: &str = "financial_docs";
const DEFAULT_WEB_PAGE_CAP: usize = 3;
const DEFAULT_WEB_TEXT_CAP: usize = 4000;

/// Top-level parsed and validated tickertape config.
#[derive(Debug)]
pub struct Config {
    /// Contract version. Always "v1".
    pub version: String,
    /// Model backend settings.
    pub upstream: UpstreamConfig,
    /// Tool catalog settings.
    pub tools: ToolsConfig,
    /// SHA256 hash of the raw YAML bytes: "sha256:{hex}".
    pub config_hash: String,
}

/// Model backend settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the Ollama-compatible backend.
    pub host: String,
    /// Model used when a request does not name one.
    pub model: String,
    /// Sampling temperature used when a request does not set one.
    pub temperature: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_UPSTREAM_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Tool catalog settings.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// http.fetch host allow-list. Empty means every host is allowed.
    pub allowed_hosts: Vec<String>,
    /// Chroma server base URL.
    pub chroma_url: String,
    /// Vector collection name, one per deployment.
    pub collection: String,
    /// Maximum pages fetched per web.search invocation.
    pub web_page_cap: usize,
    /// Maximum extracted characters per page.
    pub web_text_cap: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            chroma_url: DEFAULT_CHROMA_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            web_page_cap: DEFAULT_WEB_PAGE_CAP,
            web_text_cap: DEFAULT_WEB_TEXT_CAP,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw YAML deserialization types (internal)
// ---------------------------------------------------------------------------
// Separate from the public Config structs: serde_yaml needs Deserialize,
// and variable interpolation plus defaulting happen between raw and public.

mod raw {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct RawConfig {
        pub tickertape: String,
        pub upstream: Option<RawUpstream>,
        pub tools: Option<RawTools>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RawUpstream {
        pub host: Option<String>,
        pub model: Option<String>,
        pub temperature: Option<f64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RawTools {
        #[serde(default)]
        pub allowed_hosts: Vec<String>,
        pub chroma_url: Option<String>,
        pub collection: Option<String>,
        pub web_page_cap: Option<usize>,
        pub web_text_cap: Option<usize>,
    }
}

// ---------------------------------------------------------------------------
// Variable interpolation
// ---------------------------------------------------------------------------

/// Resolves `${VAR_NAME}` references in a string from environment variables.
/// Returns `ConfigError::UndefinedVariable` if a referenced variable is not set.
fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_name.push(c);
            }
            if !found_close || var_name.is_empty() {
                // Malformed interpolation -- treat literally
                result.push('$');
                result.push('{');
                result.push_str(&var_name);
                continue;
            }
            let value = std::env::var(&var_name).map_err(|_| ConfigError::UndefinedVariable {
                name: var_name.clone(),
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Config loading and validation
// ---------------------------------------------------------------------------

/// Load and validate a tickertape config from the given source.
///
/// Steps:
/// 1. Read raw YAML bytes from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate required fields and values
/// 5. Resolve variable interpolation in string fields
/// 6. Build typed Config struct, filling defaults
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    // Validate version
    if raw.tickertape != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported contract version \"{}\", expected \"v1\"",
            raw.tickertape
        )));
    }

    let upstream = build_upstream_config(raw.upstream)?;
    let tools = build_tools_config(raw.tools)?;

    Ok(Config {
        version: raw.tickertape,
        upstream,
        tools,
        config_hash,
    })
}

fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_upstream_config(raw: Option<raw::RawUpstream>) -> Result<UpstreamConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(UpstreamConfig::default()),
    };

    let host = match raw.host {
        Some(h) => resolve_variables(&h)?,
        None => DEFAULT_UPSTREAM_HOST.to_string(),
    };

    let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "upstream temperature {temperature} out of range, expected 0.0..=2.0"
        )));
    }

    Ok(UpstreamConfig {
        host,
        model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        temperature,
    })
}

fn build_tools_config(raw: Option<raw::RawTools>) -> Result<ToolsConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(ToolsConfig::default()),
    };

    let allowed_hosts = raw
        .allowed_hosts
        .iter()
        .map(|h| resolve_variables(h))
        .collect::<Result<Vec<_>, _>>()?;

    let chroma_url = match raw.chroma_url {
        Some(u) => resolve_variables(&u)?,
        None => DEFAULT_CHROMA_URL.to_string(),
    };

    let web_page_cap = raw.web_page_cap.unwrap_or(DEFAULT_WEB_PAGE_CAP);
    if web_page_cap == 0 {
        return Err(ConfigError::Validation(
            "tools web_page_cap must be at least 1".to_string(),
        ));
    }

    Ok(ToolsConfig {
        allowed_hosts,
        chroma_url,
        collection: raw
            .collection
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        web_page_cap,
        web_text_cap: raw.web_text_cap.unwrap_or(DEFAULT_WEB_TEXT_CAP),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
