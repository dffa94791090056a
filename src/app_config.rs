//! Application configuration: config file loading and effective settings.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use segfetch_core::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_RATE_LIMIT_BYTES_PER_SEC, DEFAULT_THREAD_COUNT,
    MAX_THREAD_COUNT,
};
use segfetch_core::ledger::DEFAULT_MAX_RETRIES;
use segfetch_core::pool::{DEFAULT_CACHE_ENDPOINT, DEFAULT_CAPACITY, GateConfig};

use crate::cli::Args;

const GIB: u64 = 1024 * 1024 * 1024;
const DEFAULT_PAUSE_THRESHOLD_GIB: u64 = 18;
const DEFAULT_RESUME_THRESHOLD_GIB: u64 = 15;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const PROBE_RETRY_INTERVAL_SECS: u64 = 10;

/// File configuration (`key = value` lines, TOML subset).
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Directory files are downloaded into.
    pub staging_dir: Option<PathBuf>,
    /// Directory finished files are moved to.
    pub output_dir: Option<PathBuf>,
    /// Pool capacity (1..=100).
    pub concurrency: Option<u8>,
    /// Range requests per file (1..=64).
    pub threads: Option<u8>,
    /// Per-stream rate limit in bytes per second.
    pub rate_limit: Option<u64>,
    /// Retry rounds (0..=10).
    pub max_retries: Option<u8>,
    /// Whether relocation waits on the downstream cache.
    pub backpressure: Option<bool>,
    /// Cache statistics endpoint.
    pub cache_endpoint: Option<String>,
    /// Pause threshold in GiB.
    pub pause_threshold_gib: Option<u64>,
    /// Resume threshold in GiB.
    pub resume_threshold_gib: Option<u64>,
    /// Seconds between cache samples while paused.
    pub poll_interval_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Per-download deadline in seconds.
    pub task_timeout_secs: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("concurrency", self.concurrency.map(u64::from), 1, 100)?;
        validate_range(
            "threads",
            self.threads.map(u64::from),
            1,
            u64::try_from(MAX_THREAD_COUNT).unwrap_or(u64::MAX),
        )?;
        validate_range("max_retries", self.max_retries.map(u64::from), 0, 10)?;
        validate_range("poll_interval_secs", self.poll_interval_secs, 1, 3600)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("task_timeout_secs", self.task_timeout_secs, 1, u64::MAX)?;
        if let (Some(pause), Some(resume)) = (self.pause_threshold_gib, self.resume_threshold_gib)
            && resume >= pause
        {
            bail!(
                "Invalid config: `resume_threshold_gib` ({resume}) must be below `pause_threshold_gib` ({pause})"
            );
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerbositySetting {
    #[default]
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// Log filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Config path that was considered, if any.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/segfetch/config.toml`
/// 2. `$HOME/.config/segfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("segfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("segfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default path is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "staging_dir" => {
                cfg.staging_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "concurrency" => cfg.concurrency = Some(parse_integer_u8(value).with_context(context)?),
            "threads" => cfg.threads = Some(parse_integer_u8(value).with_context(context)?),
            "rate_limit" => cfg.rate_limit = Some(parse_integer_u64(value).with_context(context)?),
            "max_retries" => cfg.max_retries = Some(parse_integer_u8(value).with_context(context)?),
            "backpressure" => cfg.backpressure = Some(parse_boolean(value).with_context(context)?),
            "cache_endpoint" => {
                cfg.cache_endpoint = Some(parse_string_literal(value).with_context(context)?);
            }
            "pause_threshold_gib" => {
                cfg.pause_threshold_gib = Some(parse_integer_u64(value).with_context(context)?);
            }
            "resume_threshold_gib" => {
                cfg.resume_threshold_gib = Some(parse_integer_u64(value).with_context(context)?);
            }
            "poll_interval_secs" => {
                cfg.poll_interval_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "task_timeout_secs" => {
                cfg.task_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let value = parse_integer_u64(raw_value)?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Effective run settings after merging command line, config file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub staging_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub threads: usize,
    pub rate_limit: u64,
    pub max_retries: u32,
    pub backpressure: bool,
    pub cache_endpoint: String,
    pub gate: GateConfig,
    pub connect_timeout_secs: u64,
    pub task_timeout: Option<Duration>,
    pub verbosity: VerbositySetting,
}

impl Settings {
    /// Merges `args` over `file` over built-in defaults.
    pub fn resolve(args: &Args, file: Option<&FileConfig>) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();

        let verbosity = if args.quiet {
            VerbositySetting::Quiet
        } else {
            match args.verbose {
                0 => file.verbosity.unwrap_or_default(),
                1 => VerbositySetting::Verbose,
                _ => VerbositySetting::Debug,
            }
        };

        let pause_gib = args
            .pause_threshold_gib
            .or(file.pause_threshold_gib)
            .unwrap_or(DEFAULT_PAUSE_THRESHOLD_GIB);
        let resume_gib = args
            .resume_threshold_gib
            .or(file.resume_threshold_gib)
            .unwrap_or(DEFAULT_RESUME_THRESHOLD_GIB);
        if resume_gib >= pause_gib {
            bail!(
                "Invalid effective thresholds: resume ({resume_gib} GiB) must be below pause ({pause_gib} GiB)"
            );
        }
        let poll_secs = args
            .poll_interval_secs
            .or(file.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let settings = Self {
            staging_dir: args
                .staging_dir
                .clone()
                .or(file.staging_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            output_dir: args.output_dir.clone().or(file.output_dir),
            concurrency: args
                .concurrency
                .or(file.concurrency)
                .map_or(DEFAULT_CAPACITY, usize::from),
            threads: args
                .threads
                .or(file.threads)
                .map_or(DEFAULT_THREAD_COUNT, usize::from),
            rate_limit: args
                .rate_limit
                .or(file.rate_limit)
                .unwrap_or(DEFAULT_RATE_LIMIT_BYTES_PER_SEC),
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .map_or(DEFAULT_MAX_RETRIES, u32::from),
            backpressure: !args.no_backpressure && file.backpressure.unwrap_or(true),
            cache_endpoint: args
                .cache_endpoint
                .clone()
                .or(file.cache_endpoint)
                .unwrap_or_else(|| DEFAULT_CACHE_ENDPOINT.to_string()),
            gate: GateConfig {
                pause_threshold: pause_gib.saturating_mul(GIB),
                resume_threshold: resume_gib.saturating_mul(GIB),
                poll_interval: Duration::from_secs(poll_secs),
                probe_retry_interval: Duration::from_secs(PROBE_RETRY_INTERVAL_SECS),
            },
            connect_timeout_secs: args
                .connect_timeout_secs
                .or(file.connect_timeout_secs)
                .unwrap_or(CONNECT_TIMEOUT_SECS),
            task_timeout: args
                .task_timeout_secs
                .or(file.task_timeout_secs)
                .map(Duration::from_secs),
            verbosity,
        };
        Ok(settings)
    }
}
