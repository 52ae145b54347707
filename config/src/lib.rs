//! Configuration file discovery, `${VAR}` placeholder resolution, and
//! environment-variable overrides, per the CLI's configuration contract:
//! an optional JSON file discovered in the current directory then the
//! home directory, with a fixed set of environment overrides layered on
//! top at the highest precedence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use codinglm_core::CompressorConfig;

const CONFIG_FILE_NAME: &str = ".codinglm.json";

const DEFAULT_MODEL: &str = "glm-4.6";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_API_TIMEOUT_MS: u64 = 600_000;

const API_KEY_ENV_VARS: &[&str] = &["Z_AI_API_KEY", "ZAI_API_KEY", "ANTHROPIC_AUTH_TOKEN"];
const MODEL_ENV_VARS: &[&str] = &["CODINGLM_MODEL", "GLM_CODER_MODEL"];
const BASE_URL_ENV_VARS: &[&str] = &[
    "CODINGLM_BASE_URL",
    "GLM_CODER_BASE_URL",
    "ANTHROPIC_BASE_URL",
    "Z_AI_BASE_URL",
];
const TIMEOUT_ENV_VARS: &[&str] = &[
    "CODINGLM_TIMEOUT_MS",
    "GLM_CODER_TIMEOUT_MS",
    "API_TIMEOUT_MS",
    "ANTHROPIC_TIMEOUT_MS",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no API key configured (set apiKey in {}, or one of {:?})", CONFIG_FILE_NAME, API_KEY_ENV_VARS)]
    MissingApiKey,
}

#[derive(Clone, Debug, Deserialize, Default)]
struct McpServerFile {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
struct ToolsFile {
    #[serde(rename = "maxToolIterations")]
    max_tool_iterations: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
struct CompressionFile {
    enabled: Option<bool>,
    #[serde(rename = "maxContextTokens")]
    max_context_tokens: Option<u32>,
    #[serde(rename = "targetContextTokens")]
    target_context_tokens: Option<u32>,
    #[serde(rename = "preserveRecentMessages")]
    preserve_recent_messages: Option<usize>,
    #[serde(rename = "summaryMaxTokens")]
    summary_max_tokens: Option<u32>,
    #[serde(rename = "summaryModel")]
    summary_model: Option<String>,
    #[serde(rename = "maxCompressionPasses")]
    max_compression_passes: Option<u32>,
    verbose: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
struct ContextFile {
    compression: Option<CompressionFile>,
}

/// The on-disk JSON shape, every field optional — entirely absent fields
/// fall back to defaults or must be supplied via an environment override.
#[derive(Clone, Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    #[serde(rename = "maxTokens")]
    max_tokens: Option<u32>,
    #[serde(rename = "apiBase")]
    api_base: Option<String>,
    #[serde(rename = "apiTimeoutMs")]
    api_timeout_ms: Option<u64>,
    #[serde(rename = "mcpServers")]
    mcp_servers: Option<HashMap<String, McpServerFile>>,
    tools: Option<ToolsFile>,
    context: Option<ContextFile>,
}

/// Fully resolved, validated configuration ready for the CLI to build an
/// `AnthropicClient`, a `TurnController`, and a `Compressor` from.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_base: Option<String>,
    pub api_timeout_ms: u64,
    pub mcp_servers: HashMap<String, McpServerConfig>,
    pub max_tool_iterations: Option<u32>,
    pub compression: CompressorConfig,
}

#[derive(Clone, Debug)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Locates the config file: current directory first, then the home
/// directory. Returns `None` if neither exists — an absent config file is
/// not an error, since environment overrides may supply everything.
pub fn discover_config_path() -> Option<PathBuf> {
    let cwd_candidate = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_candidate.is_file() {
        return Some(cwd_candidate);
    }
    let home_candidate = dirs::home_dir()?.join(CONFIG_FILE_NAME);
    if home_candidate.is_file() {
        return Some(home_candidate);
    }
    None
}

/// Loads, resolves `${VAR}` placeholders in, and validates the
/// configuration, applying environment overrides at the highest
/// precedence. `path` overrides discovery (tests pass an explicit path);
/// `None` uses [`discover_config_path`].
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let resolved_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => discover_config_path(),
    };

    let file = match resolved_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let mut value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            resolve_placeholders(&mut value);
            serde_json::from_value(value).map_err(|source| ConfigError::Parse { path, source })?
        }
        None => ConfigFile::default(),
    };

    build_config(file)
}

/// Recursively substitutes every string leaf that is *entirely* a `${VAR}`
/// placeholder with the value of the environment variable `VAR`; a leaf that
/// merely contains `${...}` alongside other text is left untouched, and an
/// unset variable leaves the literal `${VAR}` text in place.
fn resolve_placeholders(value: &mut Value) {
    match value {
        Value::String(s) => {
            *s = substitute_env(s);
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_placeholders(v);
            }
        }
        _ => {}
    }
}

fn substitute_env(input: &str) -> String {
    let Some(var_name) = input.strip_prefix("${").and_then(|s| s.strip_suffix('}')) else {
        return input.to_string();
    };
    std::env::var(var_name).unwrap_or_else(|_| input.to_string())
}

/// Returns the first non-empty environment variable among `names`.
fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

/// Handles the one glob-shaped chain in the external contract:
/// `ANTHROPIC_DEFAULT_*_MODEL`.
fn first_wildcard_model_env() -> Option<String> {
    std::env::vars()
        .filter(|(k, v)| k.starts_with("ANTHROPIC_DEFAULT_") && k.ends_with("_MODEL") && !v.is_empty())
        .map(|(_, v)| v)
        .next()
}

fn build_config(file: ConfigFile) -> Result<Config, ConfigError> {
    let api_key = first_env(API_KEY_ENV_VARS).or(file.api_key).ok_or(ConfigError::MissingApiKey)?;

    let model = first_env(MODEL_ENV_VARS)
        .or_else(first_wildcard_model_env)
        .or(file.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let api_base = first_env(BASE_URL_ENV_VARS).or(file.api_base);

    let api_timeout_ms = first_env(TIMEOUT_ENV_VARS)
        .and_then(|v| v.parse::<u64>().ok())
        .or(file.api_timeout_ms)
        .unwrap_or(DEFAULT_API_TIMEOUT_MS);

    let mcp_servers = file
        .mcp_servers
        .unwrap_or_default()
        .into_iter()
        .map(|(name, server)| {
            (
                name,
                McpServerConfig {
                    command: server.command,
                    args: server.args,
                    env: server.env,
                },
            )
        })
        .collect();

    let max_tool_iterations = file.tools.and_then(|t| t.max_tool_iterations);
    if let Some(0) = max_tool_iterations {
        return Err(ConfigError::Invalid("tools.maxToolIterations must be >= 1".to_string()));
    }

    let default_compression = CompressorConfig::default();
    let compression_file = file.context.and_then(|c| c.compression).unwrap_or_default();
    let compression = CompressorConfig {
        enabled: compression_file.enabled.unwrap_or(default_compression.enabled),
        max_context_tokens: compression_file.max_context_tokens.unwrap_or(default_compression.max_context_tokens),
        target_context_tokens: compression_file
            .target_context_tokens
            .unwrap_or(default_compression.target_context_tokens),
        preserve_recent_messages: compression_file
            .preserve_recent_messages
            .unwrap_or(default_compression.preserve_recent_messages),
        summary_max_tokens: compression_file.summary_max_tokens.unwrap_or(default_compression.summary_max_tokens),
        summary_model: compression_file.summary_model.or(default_compression.summary_model),
        max_compression_passes: compression_file
            .max_compression_passes
            .unwrap_or(default_compression.max_compression_passes),
        verbose: compression_file.verbose.unwrap_or(default_compression.verbose),
    };

    validate_compression(&compression)?;

    Ok(Config {
        api_key,
        model,
        temperature: file.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: file.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        api_base,
        api_timeout_ms,
        mcp_servers,
        max_tool_iterations,
        compression,
    })
}

fn validate_compression(config: &CompressorConfig) -> Result<(), ConfigError> {
    if config.target_context_tokens >= config.max_context_tokens {
        return Err(ConfigError::Invalid(
            "context.compression.targetContextTokens must be less than maxContextTokens".to_string(),
        ));
    }
    if config.max_context_tokens == 0 || config.target_context_tokens == 0 || config.summary_max_tokens == 0 {
        return Err(ConfigError::Invalid("context.compression token counts must be positive".to_string()));
    }
    if config.preserve_recent_messages == 0 {
        return Err(ConfigError::Invalid(
            "context.compression.preserveRecentMessages must be >= 1".to_string(),
        ));
    }
    if config.max_compression_passes == 0 {
        return Err(ConfigError::Invalid(
            "context.compression.maxCompressionPasses must be >= 1".to_string(),
        ));
    }
    Ok(())
}
