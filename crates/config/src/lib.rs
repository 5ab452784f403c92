//! Configuration loading, validation, and management for Chorus.
//!
//! Loads configuration from `~/.chorus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use chorus_core::{PersonaDefinition, SafetyMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Live handles a destination may hold before the platform refuses more.
pub const PLATFORM_HANDLE_CEILING: usize = 15;

/// The root configuration structure.
///
/// Maps directly to `~/.chorus/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend used when a request doesn't name one
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Work queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Per-caller admission control
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Persona delivery configuration
    #[serde(default)]
    pub personas: PersonaConfig,

    /// Backend-specific configurations
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

fn default_backend() -> String {
    "openai".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrent backend calls
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_parallelism() -> usize {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Fixed window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests per window for ordinary callers
    #[serde(default = "default_baseline_limit")]
    pub baseline_limit: u32,

    /// Requests per window for restricted callers (half the baseline when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_limit: Option<u32>,

    /// Caller identities subject to the restricted limit
    #[serde(default)]
    pub restricted_identities: Vec<String>,

    /// How often idle windows are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}
fn default_baseline_limit() -> u32 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The restricted limit, defaulting to half the baseline (at least 1).
    pub fn effective_restricted_limit(&self) -> u32 {
        self.restricted_limit
            .unwrap_or((self.baseline_limit / 2).max(1))
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            baseline_limit: default_baseline_limit(),
            restricted_limit: None,
            restricted_identities: vec![],
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Platform ceiling on live handles per destination
    #[serde(default = "default_handle_ceiling")]
    pub handle_ceiling: usize,

    /// Safety mode used when a request doesn't specify one
    #[serde(default)]
    pub default_mode: SafetyMode,
}

fn default_handle_ceiling() -> usize {
    PLATFORM_HANDLE_CEILING
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            handle_ceiling: default_handle_ceiling(),
            default_mode: SafetyMode::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prompt token budget (instruction + history)
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Timeout imposed on each backend call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Merge consecutive same-role turns before sending
    #[serde(default)]
    pub strict_alternation: bool,
}

fn default_token_budget() -> usize {
    4096
}
fn default_timeout_secs() -> u64 {
    120
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: None,
            token_budget: default_token_budget(),
            timeout_secs: default_timeout_secs(),
            strict_alternation: false,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("token_budget", &self.token_budget)
            .field("timeout_secs", &self.timeout_secs)
            .field("strict_alternation", &self.strict_alternation)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chorus/config.toml).
    ///
    /// Environment overrides:
    /// - `CHORUS_API_KEY` (falls back to `OPENAI_API_KEY`) for the default backend
    /// - `CHORUS_BACKEND` selects the default backend
    /// - `CHORUS_MODEL` overrides the default backend's model
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("CHORUS_BACKEND") {
            self.default_backend = backend;
        }

        let name = self.default_backend.clone();
        let backend = self.backends.entry(name).or_default();

        if backend.api_key.is_none() {
            backend.api_key = std::env::var("CHORUS_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CHORUS_MODEL") {
            backend.model = Some(model);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chorus")
    }

    /// Configuration of the default backend (defaults if it isn't listed).
    pub fn backend(&self) -> BackendConfig {
        self.backends
            .get(&self.default_backend)
            .cloned()
            .unwrap_or_default()
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "queue.parallelism must be at least 1".into(),
            ));
        }

        if self.admission.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "admission.window_secs must be > 0".into(),
            ));
        }

        if self.admission.baseline_limit == 0 {
            return Err(ConfigError::ValidationError(
                "admission.baseline_limit must be at least 1".into(),
            ));
        }

        if self.admission.restricted_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "admission.restricted_limit must be at least 1".into(),
            ));
        }

        if self.personas.handle_ceiling == 0 {
            return Err(ConfigError::ValidationError(
                "personas.handle_ceiling must be at least 1".into(),
            ));
        }

        for (name, backend) in &self.backends {
            if backend.token_budget == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "backends.{name}.token_budget must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config
            .backends
            .insert(default_backend(), BackendConfig::default());
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            queue: QueueConfig::default(),
            admission: AdmissionConfig::default(),
            personas: PersonaConfig::default(),
            backends: HashMap::new(),
        }
    }
}

/// Load a persona definition from a TOML or JSON file (chosen by extension).
pub fn load_persona(path: &Path) -> Result<PersonaDefinition, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let persona: PersonaDefinition = if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    if persona.display_name.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "persona at {} has an empty display_name",
            path.display()
        )));
    }
    Ok(persona)
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
