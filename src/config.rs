use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::core::matcher::{MatchSettings, ReconcilePolicy};
use crate::core::pipeline::{ScopeStrategy, SynthesisSettings};
use crate::core::sampler::{SamplerSettings, SamplingUnit};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
    /// Upper bound on JSON request bodies in bytes
    #[serde(default = "default_payload_limit")]
    pub payload_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            payload_limit: default_payload_limit(),
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_payload_limit() -> usize { 256 * 1024 * 1024 }

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub unit: SamplingUnit,
    #[serde(default)]
    pub renormalize: bool,
    #[serde(default)]
    pub uniform_fallback: bool,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            unit: SamplingUnit::default(),
            renormalize: false,
            uniform_fallback: false,
            tolerance: default_tolerance(),
        }
    }
}

fn default_seed() -> u64 { 123 }
fn default_tolerance() -> f64 { 1e-6 }

/// Capacity handling of the reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    #[default]
    IgnoreCapacity,
    ScaledCapacity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_capacity_slack")]
    pub capacity_slack: f64,
    #[serde(default)]
    pub reconcile: ReconcileMode,
    #[serde(default = "default_reconcile_headroom")]
    pub reconcile_headroom: f64,
    /// Maximum student-to-school distance in miles
    pub distance_cutoff_miles: Option<f64>,
    #[serde(default = "default_public_scope")]
    pub public_scope: ScopeStrategy,
    #[serde(default = "default_private_scope")]
    pub private_scope: ScopeStrategy,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            capacity_slack: default_capacity_slack(),
            reconcile: ReconcileMode::default(),
            reconcile_headroom: default_reconcile_headroom(),
            distance_cutoff_miles: None,
            public_scope: default_public_scope(),
            private_scope: default_private_scope(),
        }
    }
}

fn default_capacity_slack() -> f64 { 1.0 }
fn default_reconcile_headroom() -> f64 { 0.1 }
fn default_public_scope() -> ScopeStrategy { ScopeStrategy::Jurisdiction }
fn default_private_scope() -> ScopeStrategy { ScopeStrategy::Region }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with POPSYNTH__)
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }

    /// Engine settings derived from the sampling and matching sections
    pub fn synthesis_settings(&self) -> SynthesisSettings {
        let reconcile = match self.matching.reconcile {
            ReconcileMode::IgnoreCapacity => ReconcilePolicy::IgnoreCapacity,
            ReconcileMode::ScaledCapacity => ReconcilePolicy::ScaledCapacity {
                headroom: self.matching.reconcile_headroom,
            },
        };

        SynthesisSettings {
            sampling: SamplerSettings {
                seed: self.sampling.seed,
                unit: self.sampling.unit,
                renormalize: self.sampling.renormalize,
                uniform_fallback: self.sampling.uniform_fallback,
                tolerance: self.sampling.tolerance,
            },
            matching: MatchSettings {
                capacity_slack: self.matching.capacity_slack,
                reconcile,
            },
            distance_cutoff_miles: self.matching.distance_cutoff_miles,
            public_scope: self.matching.public_scope,
            private_scope: self.matching.private_scope,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("POPSYNTH")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
