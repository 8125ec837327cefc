//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and
//! `PROBER_*` environment variables, and merging them into a
//! [`ProberConfig`] with proper precedence rules.

use crate::error::ProberError;
use crate::presets::{get_available_sequences, is_available};
use crate::types::ProberConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Configuration loaded from TOML files.
///
/// Every field is optional so that several files can be layered.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Scheduling and timeout defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Web WHOIS target settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_whois: Option<WebWhoisSection>,

    /// EPP server and credential settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epp: Option<EppSection>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DefaultsConfig {
    /// Time between passes (e.g. "60s", "5m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Per-step timeout; "0s" disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// TCP connect and TLS handshake timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,

    /// Delay before each step after the first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_delay: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,

    /// Names of the sequences to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequences: Option<Vec<String>>,

    /// Directory with EPP template overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

/// `[web_whois]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WebWhoisSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tlds: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[epp]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EppSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tld: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

/// Copy every `Some` field of `higher` over `lower`.
macro_rules! overlay {
    ($lower:expr, $higher:expr, [$($field:ident),+ $(,)?]) => {
        $(
            if $higher.$field.is_some() {
                $lower.$field = $higher.$field;
            }
        )+
    };
}

fn merge_section<T>(lower: Option<T>, higher: Option<T>, merge: impl FnOnce(&mut T, T)) -> Option<T> {
    match (lower, higher) {
        (Some(mut lower), Some(higher)) => {
            merge(&mut lower, higher);
            Some(lower)
        }
        (None, Some(higher)) => Some(higher),
        (lower, None) => lower,
    }
}

impl FileConfig {
    /// Layer this file's values over `config`.
    pub fn apply_to(&self, mut config: ProberConfig) -> Result<ProberConfig, ProberError> {
        if let Some(defaults) = &self.defaults {
            if let Some(interval) = &defaults.interval {
                config.interval = require_duration("interval", interval)?;
            }
            if let Some(timeout) = &defaults.timeout {
                config = config.with_step_timeout(require_duration("timeout", timeout)?);
            }
            if let Some(timeout) = &defaults.connect_timeout {
                config.connect_timeout = require_duration("connect_timeout", timeout)?;
            }
            if let Some(delay) = &defaults.step_delay {
                config.step_delay = require_duration("step_delay", delay)?;
            }
            if let Some(max_redirects) = defaults.max_redirects {
                config.max_redirects = Some(max_redirects);
            }
            if let Some(sequences) = &defaults.sequences {
                config.sequences = sequences.clone();
            }
            if let Some(dir) = &defaults.template_dir {
                config.template_dir = Some(dir.clone());
            }
        }

        if let Some(web) = &self.web_whois {
            if let Some(prefix) = &web.prefix {
                config.web_whois.prefix = prefix.clone();
            }
            if let Some(tlds) = &web.tlds {
                config.web_whois.tlds = tlds.clone();
            }
            if let Some(path) = &web.path {
                config.web_whois.path = path.clone();
            }
        }

        if let Some(epp) = &self.epp {
            let target = &mut config.epp;
            if let Some(host) = &epp.host {
                target.host = host.clone();
            }
            if let Some(port) = epp.port {
                target.port = port;
            }
            if let Some(client_id) = &epp.client_id {
                target.client_id = client_id.clone();
            }
            if let Some(password) = &epp.password {
                target.password = password.clone();
            }
            if let Some(tld) = &epp.tld {
                target.tld = tld.clone();
            }
            if let Some(client_host) = &epp.client_host {
                target.client_host = client_host.clone();
            }
            if let Some(cert_path) = &epp.cert_path {
                target.cert_path = Some(cert_path.clone());
            }
            if let Some(key_path) = &epp.key_path {
                target.key_path = Some(key_path.clone());
            }
        }

        Ok(config)
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to report which files were used
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if parsing fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, ProberError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProberError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProberError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config is the lowest precedence, then the home directory file,
    /// then `./registry-prober.toml`.
    pub fn discover_and_load(&self) -> Result<FileConfig, ProberError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];
        for path in candidates.into_iter().flatten() {
            let config = self.load_file(&path)?;
            merged_config = self.merge_configs(merged_config, config);
            loaded_files.push(path);
        }

        if self.verbose {
            for path in &loaded_files {
                info!(path = %path.display(), "loaded configuration file");
            }
        }

        Ok(merged_config)
    }

    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./registry-prober.toml", "./.registry-prober.toml"];

        candidates
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".registry-prober.toml", "registry-prober.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("registry-prober").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: merge_section(lower.defaults, higher.defaults, |lower, higher| {
                overlay!(
                    lower,
                    higher,
                    [
                        interval,
                        timeout,
                        connect_timeout,
                        step_delay,
                        max_redirects,
                        sequences,
                        template_dir
                    ]
                );
            }),
            web_whois: merge_section(lower.web_whois, higher.web_whois, |lower, higher| {
                overlay!(lower, higher, [prefix, tlds, path]);
            }),
            epp: merge_section(lower.epp, higher.epp, |lower, higher| {
                overlay!(
                    lower,
                    higher,
                    [host, port, client_id, password, tld, client_host, cert_path, key_path]
                );
            }),
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), ProberError> {
        if let Some(defaults) = &config.defaults {
            for (name, value) in [
                ("interval", &defaults.interval),
                ("timeout", &defaults.timeout),
                ("connect_timeout", &defaults.connect_timeout),
                ("step_delay", &defaults.step_delay),
            ] {
                if let Some(value) = value {
                    require_duration(name, value)?;
                }
            }

            if let Some(interval) = &defaults.interval {
                if parse_duration_string(interval) == Some(Duration::ZERO) {
                    return Err(ProberError::config("interval must be greater than zero"));
                }
            }

            if let Some(sequences) = &defaults.sequences {
                validate_sequence_names(sequences)?;
            }
        }

        if let Some(web) = &config.web_whois {
            if let Some(tlds) = &web.tlds {
                validate_tlds(tlds)?;
            }
        }

        if let Some(epp) = &config.epp {
            if epp.port == Some(0) {
                return Err(ProberError::config("EPP port cannot be 0"));
            }
            if epp.cert_path.is_some() != epp.key_path.is_some() {
                return Err(ProberError::config(
                    "EPP cert_path and key_path must be set together",
                ));
            }
        }

        Ok(())
    }
}

/// Reject sequence names that no preset provides.
pub fn validate_sequence_names(names: &[String]) -> Result<(), ProberError> {
    if names.is_empty() {
        return Err(ProberError::config("At least one sequence must be selected"));
    }
    for name in names {
        if !is_available(name) {
            return Err(ProberError::config(format!(
                "Unknown sequence '{}'. Available: {}",
                name,
                get_available_sequences().join(", ")
            )));
        }
    }
    Ok(())
}

fn validate_tlds(tlds: &[String]) -> Result<(), ProberError> {
    if tlds.is_empty() {
        return Err(ProberError::config("TLD list cannot be empty"));
    }
    for tld in tlds {
        if tld.is_empty() || tld.contains(' ') || tld.starts_with('.') {
            return Err(ProberError::config(format!("Invalid TLD '{}'", tld)));
        }
    }
    Ok(())
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via `PROBER_*`
/// environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub max_redirects: Option<usize>,
    pub sequences: Option<Vec<String>>,
    pub tlds: Option<Vec<String>>,
    pub epp_host: Option<String>,
    pub epp_port: Option<u16>,
    pub epp_client_id: Option<String>,
    pub epp_password: Option<String>,
    pub config: Option<String>,
}

impl EnvConfig {
    /// Layer the environment over `config`.
    pub fn apply_to(&self, mut config: ProberConfig) -> ProberConfig {
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(timeout) = self.timeout {
            config = config.with_step_timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(max_redirects) = self.max_redirects {
            config.max_redirects = Some(max_redirects);
        }
        if let Some(sequences) = &self.sequences {
            config.sequences = sequences.clone();
        }
        if let Some(tlds) = &self.tlds {
            config.web_whois.tlds = tlds.clone();
        }
        if let Some(host) = &self.epp_host {
            config.epp.host = host.clone();
        }
        if let Some(port) = self.epp_port {
            config.epp.port = port;
        }
        if let Some(client_id) = &self.epp_client_id {
            config.epp.client_id = client_id.clone();
        }
        if let Some(password) = &self.epp_password {
            config.epp.password = password.clone();
        }
        config
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_duration(name: &str, verbose: bool) -> Option<Duration> {
    let value = env_value(name)?;
    match parse_duration_string(&value) {
        Some(duration) => {
            if verbose {
                info!("Using {}={}", name, value);
            }
            Some(duration)
        }
        None => {
            warn!("Invalid {}='{}', use a format like '500ms', '5s', '2m'", name, value);
            None
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str, verbose: bool) -> Option<T> {
    let value = env_value(name)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            if verbose {
                info!("Using {}={}", name, value);
            }
            Some(parsed)
        }
        Err(_) => {
            warn!("Invalid {}='{}', expected a number", name, value);
            None
        }
    }
}

fn env_string(name: &str, verbose: bool, secret: bool) -> Option<String> {
    let value = env_value(name)?;
    if verbose {
        if secret {
            info!("Using {}=<redacted>", name);
        } else {
            info!("Using {}={}", name, value);
        }
    }
    Some(value)
}

/// Load configuration from environment variables.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config(verbose: bool) -> EnvConfig {
    EnvConfig {
        interval: env_duration("PROBER_INTERVAL", verbose).filter(|d| !d.is_zero()),
        timeout: env_duration("PROBER_TIMEOUT", verbose),
        connect_timeout: env_duration("PROBER_CONNECT_TIMEOUT", verbose),
        max_redirects: env_number("PROBER_MAX_REDIRECTS", verbose),
        sequences: env_string("PROBER_SEQUENCES", verbose, false)
            .map(|value| parse_list(&value))
            .filter(|list| !list.is_empty()),
        tlds: env_string("PROBER_TLDS", verbose, false)
            .map(|value| parse_list(&value))
            .filter(|list| !list.is_empty()),
        epp_host: env_string("PROBER_EPP_HOST", verbose, false),
        epp_port: env_number("PROBER_EPP_PORT", verbose).filter(|port: &u16| *port != 0),
        epp_client_id: env_string("PROBER_EPP_CLIENT_ID", verbose, false),
        epp_password: env_string("PROBER_EPP_PASSWORD", verbose, true),
        config: env_string("PROBER_CONFIG", verbose, false),
    }
}

/// Parse a duration like "250ms", "5s", "2m" or a bare number of seconds.
pub fn parse_duration_string(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = value.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(m) = value.strip_suffix('m') {
        m.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        // Assume seconds if no unit
        value.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn require_duration(name: &str, value: &str) -> Result<Duration, ProberError> {
    parse_duration_string(value).ok_or_else(|| {
        ProberError::config(format!(
            "Invalid {} format '{}'. Use format like '500ms', '5s', '2m'",
            name, value
        ))
    })
}
