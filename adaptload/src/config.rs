//! INI configuration.
//!
//! ```ini
//! [sampler]
//! heap_interval_secs = 30
//!
//! [loader]
//! max_retries = 3
//! base_delay_ms = 1000
//! stale_while_revalidate = true
//! progress_tracking = true
//!
//! [strategy]
//! image_quality = 0.7
//! max_concurrent_requests = 3
//! timeout_ms = 6000
//! enable_preload = false
//! cache_strategy = moderate
//! retry_strategy = exponential
//! disabled_units = slideshow, testimonials
//!
//! [logging]
//! level = info
//! directory = /var/log/adaptload
//! ```
//!
//! Every key is optional and unknown keys are ignored. A `[strategy]` key
//! becomes a [`StrategyOverrides`] field and is still subject to the
//! network, memory and data-saver clamps.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::capability::SamplerConfig;
use crate::loader::LoaderOptions;
use crate::logging::LoggingConfig;
use crate::strategy::{CacheStrategy, RetryStrategy, StrategyOverrides};
use crate::unit::ContentUnit;

/// File name looked up under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Parsed configuration, one field per section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptloadConfig {
    pub sampler: SamplerConfig,
    pub loader: LoaderOptions,
    pub strategy: StrategyOverrides,
    pub logging: LoggingConfig,
}

impl AdaptloadConfig {
    /// `<config dir>/adaptload/config.ini`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("adaptload").join(CONFIG_FILE_NAME))
    }

    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Load `path` if given, else the default path if it exists, else
    /// defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("sampler")) {
            if let Some(secs) = get::<u64>(section, "sampler", "heap_interval_secs")? {
                if secs == 0 {
                    return Err(invalid("sampler", "heap_interval_secs", "0", "must be at least 1"));
                }
                config.sampler.heap_interval = Duration::from_secs(secs);
            }
        }

        if let Some(section) = ini.section(Some("loader")) {
            let loader = &mut config.loader;
            if let Some(retries) = get::<u32>(section, "loader", "max_retries")? {
                loader.max_retries = retries;
            }
            if let Some(ms) = get::<u64>(section, "loader", "base_delay_ms")? {
                loader.base_delay = Duration::from_millis(ms);
            }
            if let Some(swr) = get_bool(section, "loader", "stale_while_revalidate")? {
                loader.stale_while_revalidate = swr;
            }
            if let Some(progress) = get_bool(section, "loader", "progress_tracking")? {
                loader.progress_tracking = progress;
            }
        }

        if let Some(section) = ini.section(Some("strategy")) {
            config.strategy = parse_strategy(section)?;
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(level) = section.get("level").map(str::trim).filter(|l| !l.is_empty()) {
                config.logging.level = level.to_string();
            }
            if let Some(dir) = section.get("directory").map(str::trim).filter(|d| !d.is_empty()) {
                config.logging.directory = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// Loader options for a unit, keeping the configured retry budget
    /// unless the strategy disables retries.
    pub fn loader_options(&self, retry_strategy: RetryStrategy) -> LoaderOptions {
        LoaderOptions {
            max_retries: if retry_strategy.is_enabled() {
                self.loader.max_retries
            } else {
                0
            },
            ..self.loader
        }
    }
}

fn parse_strategy(section: &Properties) -> Result<StrategyOverrides, ConfigError> {
    const S: &str = "strategy";
    let mut overrides = StrategyOverrides::default();

    if let Some(quality) = get::<f64>(section, S, "image_quality")? {
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(invalid(S, "image_quality", quality, "must be in (0, 1]"));
        }
        overrides.image_quality = Some(quality);
    }
    if let Some(max) = get::<u32>(section, S, "max_concurrent_requests")? {
        if max == 0 {
            return Err(invalid(S, "max_concurrent_requests", max, "must be at least 1"));
        }
        overrides.max_concurrent_requests = Some(max);
    }
    if let Some(ms) = get::<u64>(section, S, "timeout_ms")? {
        overrides.timeout = Some(Duration::from_millis(ms));
    }
    overrides.enable_preload = get_bool(section, S, "enable_preload")?;
    overrides.enable_prefetch = get_bool(section, S, "enable_prefetch")?;
    overrides.graceful_degradation = get_bool(section, S, "graceful_degradation")?;
    overrides.cache_strategy = get::<CacheStrategy>(section, S, "cache_strategy")?;
    overrides.retry_strategy = get::<RetryStrategy>(section, S, "retry_strategy")?;

    if let Some(raw) = section.get("disabled_units") {
        for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let unit = name
                .parse::<ContentUnit>()
                .map_err(|reason| invalid(S, "disabled_units", name, reason))?;
            overrides.disabled_units.insert(unit);
        }
    }

    Ok(overrides)
}

fn get<T>(section: &Properties, name: &'static str, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match section.get(key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(name, key, raw, e)),
    }
}

fn get_bool(section: &Properties, name: &'static str, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match section.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(raw) => match raw.as_str() {
            "" => Ok(None),
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(invalid(name, key, &raw, "expected true or false")),
        },
    }
}

fn invalid(section: &'static str, key: &'static str, value: impl Display, reason: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
