//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `PSYCHOTROPIC_WORK_DIR` and `PSYCHOTROPIC_LOG_LEVEL` env
//! overrides. The TOML is deserialised into a private `Raw*` layer first and
//! resolved into [`Config`], so defaults and path expansion live in one
//! place.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;

/// Lookup/cache layer configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached subject records before LRU eviction.
    pub capacity: usize,
    /// Absolute time-to-live for a cached record.
    pub ttl: Duration,
}

/// Upstream (PsychonautWiki) endpoints and limits.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// GraphQL endpoint for substance queries.
    pub api_url: String,
    /// MediaWiki api.php endpoint for page-image queries.
    pub mediawiki_url: String,
    /// Base wiki URL — `thumb.php` schematic fetches hang off this.
    pub wiki_url: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Requested schematic thumbnail width in pixels.
    pub schematic_width: u32,
}

/// Render engine configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Canvas width in pixels — fixed for every template.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// Candidate font files, tried in order until one loads.
    pub font_paths: Vec<PathBuf>,
}

/// Response dispatcher retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum delivery attempts (first try included).
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry.
    pub backoff_base: Duration,
}

/// Fully-resolved bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    /// Working directory for artifacts written by the console transport.
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Prefix character(s) that mark a message as a command.
    pub command_prefix: String,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub render: RenderConfig,
    pub dispatch: DispatchConfig,
}

// ── Raw TOML shape ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    bot: RawBot,
    #[serde(default)]
    cache: RawCache,
    #[serde(default)]
    upstream: RawUpstream,
    #[serde(default)]
    render: RawRender,
    #[serde(default)]
    dispatch: RawDispatch,
}

#[derive(Deserialize)]
struct RawBot {
    name: String,
    work_dir: String,
    log_level: String,
    #[serde(default = "default_prefix")]
    command_prefix: String,
}

#[derive(Deserialize)]
struct RawCache {
    #[serde(default = "default_cache_capacity")]
    capacity: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    ttl_seconds: u64,
}

#[derive(Deserialize)]
struct RawUpstream {
    #[serde(default = "default_api_url")]
    api_url: String,
    #[serde(default = "default_mediawiki_url")]
    mediawiki_url: String,
    #[serde(default = "default_wiki_url")]
    wiki_url: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_schematic_width")]
    schematic_width: u32,
}

#[derive(Deserialize)]
struct RawRender {
    #[serde(default = "default_canvas_width")]
    canvas_width: u32,
    #[serde(default = "default_canvas_height")]
    canvas_height: u32,
    #[serde(default)]
    font_paths: Vec<String>,
}

#[derive(Deserialize)]
struct RawDispatch {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    backoff_base_ms: u64,
}

fn default_prefix() -> String { "!".to_string() }
fn default_cache_capacity() -> usize { 256 }
fn default_cache_ttl_seconds() -> u64 { 3600 }
fn default_api_url() -> String { "https://api.psychonautwiki.org/".to_string() }
fn default_mediawiki_url() -> String { "https://psychonautwiki.org/w/api.php".to_string() }
fn default_wiki_url() -> String { "https://psychonautwiki.org/w/".to_string() }
fn default_timeout_seconds() -> u64 { 20 }
fn default_schematic_width() -> u32 { 500 }
fn default_canvas_width() -> u32 { 640 }
fn default_canvas_height() -> u32 { 480 }
fn default_max_attempts() -> u32 { 4 }
fn default_backoff_base_ms() -> u64 { 250 }

impl Default for RawCache {
    fn default() -> Self {
        Self { capacity: default_cache_capacity(), ttl_seconds: default_cache_ttl_seconds() }
    }
}

impl Default for RawUpstream {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            mediawiki_url: default_mediawiki_url(),
            wiki_url: default_wiki_url(),
            timeout_seconds: default_timeout_seconds(),
            schematic_width: default_schematic_width(),
        }
    }
}

impl Default for RawRender {
    fn default() -> Self {
        Self {
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
            font_paths: Vec::new(),
        }
    }
}

impl Default for RawDispatch {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), backoff_base_ms: default_backoff_base_ms() }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let work_dir_override = env::var("PSYCHOTROPIC_WORK_DIR").ok();
    let log_level_override = env::var("PSYCHOTROPIC_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let b = parsed.bot;

    let work_dir_str = work_dir_override.unwrap_or(&b.work_dir).to_string();
    let work_dir = expand_home(&work_dir_str);
    let log_level = log_level_override.unwrap_or(&b.log_level).to_string();

    if parsed.cache.capacity == 0 {
        return Err(AppError::Config("cache.capacity must be at least 1".into()));
    }
    if parsed.dispatch.max_attempts == 0 {
        return Err(AppError::Config("dispatch.max_attempts must be at least 1".into()));
    }

    Ok(Config {
        bot_name: b.name,
        work_dir,
        log_level,
        command_prefix: b.command_prefix,
        cache: CacheConfig {
            capacity: parsed.cache.capacity,
            ttl: Duration::from_secs(parsed.cache.ttl_seconds),
        },
        upstream: UpstreamConfig {
            api_url: parsed.upstream.api_url,
            mediawiki_url: parsed.upstream.mediawiki_url,
            wiki_url: parsed.upstream.wiki_url,
            timeout: Duration::from_secs(parsed.upstream.timeout_seconds),
            schematic_width: parsed.upstream.schematic_width,
        },
        render: RenderConfig {
            canvas_width: parsed.render.canvas_width,
            canvas_height: parsed.render.canvas_height,
            font_paths: parsed.render.font_paths.iter().map(|p| expand_home(p)).collect(),
        },
        dispatch: DispatchConfig {
            max_attempts: parsed.dispatch.max_attempts,
            backoff_base: Duration::from_millis(parsed.dispatch.backoff_base_ms),
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ─────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — unreachable upstream, tiny limits.
#[cfg(test)]
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            bot_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            command_prefix: "!".into(),
            cache: CacheConfig {
                capacity: 4,
                ttl: Duration::from_secs(60),
            },
            upstream: UpstreamConfig {
                api_url: "http://localhost:0/".into(),
                mediawiki_url: "http://localhost:0/api.php".into(),
                wiki_url: "http://localhost:0/w/".into(),
                timeout: Duration::from_secs(1),
                schematic_width: 100,
            },
            render: RenderConfig {
                canvas_width: 64,
                canvas_height: 48,
                font_paths: Vec::new(),
            },
            dispatch: DispatchConfig {
                max_attempts: 3,
                backoff_base: Duration::from_millis(10),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[bot]
name = "test-bot"
work_dir = "~/.psychotropic"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.bot_name, "test-bot");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.command_prefix, "!");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.cache.capacity, 256);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(3600));
        assert_eq!(cfg.dispatch.max_attempts, 4);
        assert!(cfg.upstream.api_url.contains("psychonautwiki"));
    }

    #[test]
    fn explicit_sections_override_defaults() {
        let toml = format!(
            "{MINIMAL_TOML}\n[cache]\ncapacity = 8\nttl_seconds = 5\n\n[dispatch]\nmax_attempts = 2\nbackoff_base_ms = 100\n"
        );
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.cache.capacity, 8);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(5));
        assert_eq!(cfg.dispatch.max_attempts, 2);
        assert_eq!(cfg.dispatch.backoff_base, Duration::from_millis(100));
    }

    #[test]
    fn zero_capacity_rejected() {
        let toml = format!("{MINIMAL_TOML}\n[cache]\ncapacity = 0\n");
        let f = write_toml(&toml);
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.psychotropic");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".psychotropic"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    #[test]
    fn test_default_is_offline_safe() {
        let cfg = Config::test_default(Path::new("/tmp/psychotropic-test"));
        assert_eq!(cfg.command_prefix, "!");
        assert!(cfg.upstream.api_url.starts_with("http://localhost"));
        assert!(cfg.cache.capacity >= 1);
    }

    #[test]
    fn env_style_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.log_level, "debug");
    }
}
