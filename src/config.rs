//! Named, tunable configuration for every component.
//!
//! All thresholds and coefficients live here rather than as literals in the
//! algorithms. Every struct deserializes with defaults for missing fields, so
//! a partial JSON document is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::FlowDirection;
use crate::{Error, Result};

/// Nominal round-port radius when none is declared (6 in duct), inches.
pub const DEFAULT_PORT_RADIUS: f64 = 3.0;
/// Upper bound of the main-duct velocity band, feet per minute.
pub const DEFAULT_MAX_VELOCITY_FPM: f64 = 2000.0;
/// Fraction below the threshold that still earns a WARN.
pub const DEFAULT_WARN_MARGIN: f64 = 0.10;
/// Corrected dimensions round up to this increment, inches.
pub const DEFAULT_SIZE_INCREMENT: f64 = 0.5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub discovery: DiscoveryConfig,
    pub matching: MatchConfig,
    pub audit: AuditConfig,
    pub healing: HealingConfig,
    pub watcher: WatcherConfig,
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_matching(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_healing(mut self, healing: HealingConfig) -> Self {
        self.healing = healing;
        self
    }

    pub fn with_watcher(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.matching.validate()?;
        self.audit.validate()?;
        self.healing.validate()?;
        Ok(())
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Radius used for round ports that declare neither radius nor diameter.
    pub default_radius: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { default_radius: DEFAULT_PORT_RADIUS }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.default_radius > 0.0) {
            return Err(Error::Config("discovery.default_radius must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Matching
// ============================================================================

/// How the proximity term decays with distance. Every variant is
/// monotonically decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceDecay {
    /// `1 / (1 + d / scale)`
    Inverse { scale: f64 },
    /// `-d`
    Linear,
    /// `exp(-d / length)`
    Exponential { length: f64 },
}

impl Default for DistanceDecay {
    fn default() -> Self {
        DistanceDecay::Inverse { scale: 12.0 }
    }
}

impl DistanceDecay {
    pub fn apply(&self, distance: f64) -> f64 {
        match *self {
            DistanceDecay::Inverse { scale } => 1.0 / (1.0 + distance / scale),
            DistanceDecay::Linear => -distance,
            DistanceDecay::Exponential { length } => (-distance / length).exp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub system_weight: f64,
    pub direction_weight: f64,
    pub proximity_weight: f64,
    pub decay: DistanceDecay,
    /// Pairs farther apart than this are disqualified. `None` = unlimited.
    pub max_distance: Option<f64>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            system_weight: 1.0,
            direction_weight: 1.0,
            proximity_weight: 1.0,
            decay: DistanceDecay::default(),
            max_distance: None,
        }
    }
}

impl MatchConfig {
    pub fn with_decay(mut self, decay: DistanceDecay) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_max_distance(mut self, max: f64) -> Self {
        self.max_distance = Some(max);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.proximity_weight > 0.0) {
            return Err(Error::Config("matching.proximity_weight must be > 0".into()));
        }
        match self.decay {
            DistanceDecay::Inverse { scale } if !(scale > 0.0) => {
                return Err(Error::Config("matching.decay.scale must be > 0".into()));
            }
            DistanceDecay::Exponential { length } if !(length > 0.0) => {
                return Err(Error::Config("matching.decay.length must be > 0".into()));
            }
            _ => {}
        }
        if let Some(max) = self.max_distance {
            if max < 0.0 {
                return Err(Error::Config("matching.max_distance must be >= 0".into()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Recommended velocity band for a duct service, feet per minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityBand {
    pub min_fpm: f64,
    pub max_fpm: f64,
}

impl VelocityBand {
    pub const fn new(min_fpm: f64, max_fpm: f64) -> Self {
        Self { min_fpm, max_fpm }
    }
}

/// Service bands from common duct-sizing practice.
pub fn default_service_bands() -> BTreeMap<String, VelocityBand> {
    [
        ("supply", VelocityBand::new(1000.0, 1500.0)),
        ("return", VelocityBand::new(800.0, 1200.0)),
        ("exhaust", VelocityBand::new(1000.0, 2000.0)),
        ("outside_air", VelocityBand::new(500.0, 1000.0)),
        ("branch", VelocityBand::new(600.0, 1000.0)),
        ("main", VelocityBand::new(1200.0, 2000.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Velocity limit when the component declares no known service.
    pub max_velocity_fpm: f64,
    pub warn_margin: f64,
    pub size_increment: f64,
    /// Which ports carry the audited flow.
    pub direction: FlowDirection,
    pub service_bands: BTreeMap<String, VelocityBand>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_velocity_fpm: DEFAULT_MAX_VELOCITY_FPM,
            warn_margin: DEFAULT_WARN_MARGIN,
            size_increment: DEFAULT_SIZE_INCREMENT,
            direction: FlowDirection::Outlet,
            service_bands: default_service_bands(),
        }
    }
}

impl AuditConfig {
    pub fn with_max_velocity(mut self, fpm: f64) -> Self {
        self.max_velocity_fpm = fpm;
        self
    }

    pub fn with_warn_margin(mut self, margin: f64) -> Self {
        self.warn_margin = margin;
        self
    }

    /// Velocity threshold for an optional service name (case-insensitive).
    pub fn threshold_for(&self, service: Option<&str>) -> f64 {
        service
            .map(|s| s.trim().to_ascii_lowercase())
            .and_then(|s| self.service_bands.get(&s))
            .map(|band| band.max_fpm)
            .unwrap_or(self.max_velocity_fpm)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_velocity_fpm > 0.0) {
            return Err(Error::Config("audit.max_velocity_fpm must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.warn_margin) {
            return Err(Error::Config("audit.warn_margin must be in [0, 1)".into()));
        }
        if !(self.size_increment >= 0.0) {
            return Err(Error::Config("audit.size_increment must be >= 0".into()));
        }
        for (name, band) in &self.service_bands {
            if !(band.max_fpm > 0.0) || band.min_fpm > band.max_fpm {
                return Err(Error::Config(format!("audit.service_bands.{name} is inverted or empty")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Healing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub max_attempts: u32,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl HealingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("healing.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Watcher
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Run self-healing when a cycle's audit is not PASS.
    pub auto_heal: bool,
}

impl WatcherConfig {
    pub fn with_auto_heal(mut self, enabled: bool) -> Self {
        self.auto_heal = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = CoreConfig::from_json_str(
            r#"{ "audit": { "max_velocity_fpm": 1500.0 }, "watcher": { "auto_heal": true } }"#,
        ).unwrap();
        assert_eq!(config.audit.max_velocity_fpm, 1500.0);
        assert_eq!(config.audit.warn_margin, DEFAULT_WARN_MARGIN);
        assert_eq!(config.healing.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.watcher.auto_heal);
    }

    #[test]
    fn test_invalid_json_config_rejected() {
        let err = CoreConfig::from_json_str(r#"{ "healing": { "max_attempts": 0 } }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(matches!(CoreConfig::from_json_str("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_decay_is_monotonic() {
        for decay in [
            DistanceDecay::default(),
            DistanceDecay::Linear,
            DistanceDecay::Exponential { length: 24.0 },
        ] {
            assert!(decay.apply(0.0) > decay.apply(10.0));
            assert!(decay.apply(10.0) > decay.apply(100.0));
        }
    }

    #[test]
    fn test_threshold_for_service() {
        let audit = AuditConfig::default();
        assert_eq!(audit.threshold_for(Some("Supply")), 1500.0);
        assert_eq!(audit.threshold_for(Some("unknown")), DEFAULT_MAX_VELOCITY_FPM);
        assert_eq!(audit.threshold_for(None), DEFAULT_MAX_VELOCITY_FPM);
    }
}
