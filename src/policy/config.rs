use super::types::{PriorityFeeMode, SelectionMode};
use serde::Deserialize;
use std::path::Path;

/// Adaptive-fee tuning knobs, `spec.md` §4.C "adaptive thresholds".
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThresholds {
    pub target_confirm_ms: u64,
    pub high_confirm_ms: u64,
    pub critical_confirm_ms: u64,
    pub up_pct: f64,
    pub down_pct: f64,
    pub per_input_bump_sompi: u128,
    pub fragmentation_threshold: usize,
    pub fragmentation_bump_sompi: u128,
    pub truncation_bump_sompi: u128,
    pub daa_congestion_threshold_pct: f64,
    pub daa_congestion_bump_sompi: u128,
    pub receipt_lag_high_ms: u64,
    pub receipt_lag_critical_ms: u64,
    pub receipt_lag_bump_sompi: u128,
    pub scheduler_callback_high_ms: u64,
    pub scheduler_callback_critical_ms: u64,
    pub scheduler_callback_bump_sompi: u128,
    /// Dampening factor applied to the latency multiplier's delta from
    /// neutral when telemetry is `stale_soft` (`spec.md` §4.C step 4).
    pub stale_soft_dampening: f64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            target_confirm_ms: 3_000,
            high_confirm_ms: 10_000,
            critical_confirm_ms: 30_000,
            up_pct: 0.25,
            down_pct: 0.10,
            per_input_bump_sompi: 50,
            fragmentation_threshold: 8,
            fragmentation_bump_sompi: 500,
            truncation_bump_sompi: 1_000,
            daa_congestion_threshold_pct: 70.0,
            daa_congestion_bump_sompi: 2_000,
            receipt_lag_high_ms: 60_000,
            receipt_lag_critical_ms: 300_000,
            receipt_lag_bump_sompi: 1_000,
            scheduler_callback_high_ms: 60_000,
            scheduler_callback_critical_ms: 300_000,
            scheduler_callback_bump_sompi: 1_000,
            stale_soft_dampening: 0.45,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    pub selection_mode: SelectionMode,
    pub max_inputs: usize,
    pub estimated_network_fee_sompi: u128,
    pub per_input_fee_buffer_sompi: u128,
    pub extra_safety_buffer_sompi: u128,
    pub priority_fee_mode: PriorityFeeMode,
    pub priority_fee_fixed_sompi: u128,
    pub priority_fee_output_bps: u32,
    pub priority_fee_per_output_sompi: u128,
    pub priority_fee_min_sompi: u128,
    pub priority_fee_max_sompi: u128,
    pub prefer_consolidation: bool,
    pub adaptive: AdaptiveThresholds,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            selection_mode: SelectionMode::Auto,
            max_inputs: 100,
            estimated_network_fee_sompi: 1_000,
            per_input_fee_buffer_sompi: 10,
            extra_safety_buffer_sompi: 0,
            priority_fee_mode: PriorityFeeMode::Fixed,
            priority_fee_fixed_sompi: 1_000,
            priority_fee_output_bps: 10,
            priority_fee_per_output_sompi: 200,
            priority_fee_min_sompi: 1_000,
            priority_fee_max_sompi: 100_000,
            prefer_consolidation: false,
            adaptive: AdaptiveThresholds::default(),
        }
    }
}

/// Partial override of [`AdaptiveThresholds`], as read from an optional
/// YAML file. Every field is optional; unset fields keep the default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptiveThresholdsOverride {
    target_confirm_ms: Option<u64>,
    high_confirm_ms: Option<u64>,
    critical_confirm_ms: Option<u64>,
    up_pct: Option<f64>,
    down_pct: Option<f64>,
    per_input_bump_sompi: Option<u128>,
    fragmentation_threshold: Option<usize>,
    fragmentation_bump_sompi: Option<u128>,
    truncation_bump_sompi: Option<u128>,
    daa_congestion_threshold_pct: Option<f64>,
    daa_congestion_bump_sompi: Option<u128>,
    receipt_lag_high_ms: Option<u64>,
    receipt_lag_critical_ms: Option<u64>,
    receipt_lag_bump_sompi: Option<u128>,
    scheduler_callback_high_ms: Option<u64>,
    scheduler_callback_critical_ms: Option<u64>,
    scheduler_callback_bump_sompi: Option<u128>,
    stale_soft_dampening: Option<f64>,
}

impl AdaptiveThresholdsOverride {
    fn apply(self, base: AdaptiveThresholds) -> AdaptiveThresholds {
        AdaptiveThresholds {
            target_confirm_ms: self.target_confirm_ms.unwrap_or(base.target_confirm_ms),
            high_confirm_ms: self.high_confirm_ms.unwrap_or(base.high_confirm_ms),
            critical_confirm_ms: self.critical_confirm_ms.unwrap_or(base.critical_confirm_ms),
            up_pct: self.up_pct.unwrap_or(base.up_pct),
            down_pct: self.down_pct.unwrap_or(base.down_pct),
            per_input_bump_sompi: self.per_input_bump_sompi.unwrap_or(base.per_input_bump_sompi),
            fragmentation_threshold: self.fragmentation_threshold.unwrap_or(base.fragmentation_threshold),
            fragmentation_bump_sompi: self.fragmentation_bump_sompi.unwrap_or(base.fragmentation_bump_sompi),
            truncation_bump_sompi: self.truncation_bump_sompi.unwrap_or(base.truncation_bump_sompi),
            daa_congestion_threshold_pct: self
                .daa_congestion_threshold_pct
                .unwrap_or(base.daa_congestion_threshold_pct),
            daa_congestion_bump_sompi: self.daa_congestion_bump_sompi.unwrap_or(base.daa_congestion_bump_sompi),
            receipt_lag_high_ms: self.receipt_lag_high_ms.unwrap_or(base.receipt_lag_high_ms),
            receipt_lag_critical_ms: self.receipt_lag_critical_ms.unwrap_or(base.receipt_lag_critical_ms),
            receipt_lag_bump_sompi: self.receipt_lag_bump_sompi.unwrap_or(base.receipt_lag_bump_sompi),
            scheduler_callback_high_ms: self.scheduler_callback_high_ms.unwrap_or(base.scheduler_callback_high_ms),
            scheduler_callback_critical_ms: self
                .scheduler_callback_critical_ms
                .unwrap_or(base.scheduler_callback_critical_ms),
            scheduler_callback_bump_sompi: self
                .scheduler_callback_bump_sompi
                .unwrap_or(base.scheduler_callback_bump_sompi),
            stale_soft_dampening: self.stale_soft_dampening.unwrap_or(base.stale_soft_dampening),
        }
    }
}

/// Partial override of [`PolicyConfig`], as read from an optional YAML
/// file (`spec.md` §6.5's `from_file` sentinel pattern: read, validate,
/// keep the previous config on any error rather than crash the service).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyConfigOverride {
    selection_mode: Option<SelectionMode>,
    max_inputs: Option<usize>,
    estimated_network_fee_sompi: Option<u128>,
    per_input_fee_buffer_sompi: Option<u128>,
    extra_safety_buffer_sompi: Option<u128>,
    priority_fee_mode: Option<PriorityFeeMode>,
    priority_fee_fixed_sompi: Option<u128>,
    priority_fee_output_bps: Option<u32>,
    priority_fee_per_output_sompi: Option<u128>,
    priority_fee_min_sompi: Option<u128>,
    priority_fee_max_sompi: Option<u128>,
    prefer_consolidation: Option<bool>,
    #[serde(default)]
    adaptive: Option<AdaptiveThresholdsOverride>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("failed to read policy config file: {0}")]
    Read(String),
    #[error("failed to parse policy config file: {0}")]
    Parse(String),
    #[error("invalid policy config: {0}")]
    Invalid(String),
}

fn validate(config: &PolicyConfig) -> Result<(), PolicyConfigError> {
    if config.max_inputs == 0 {
        return Err(PolicyConfigError::Invalid("maxInputs must be at least 1".to_string()));
    }
    if config.priority_fee_min_sompi > config.priority_fee_max_sompi {
        return Err(PolicyConfigError::Invalid(
            "priorityFeeMinSompi must not exceed priorityFeeMaxSompi".to_string(),
        ));
    }
    Ok(())
}

impl PolicyConfig {
    /// Parses and applies a YAML override file onto `self`, validating
    /// the merged result. Called eagerly at startup and, by a watcher in
    /// front of this function, on every poll tick.
    pub fn merge_file(&self, path: &Path) -> Result<Self, PolicyConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PolicyConfigError::Read(e.to_string()))?;
        let override_: PolicyConfigOverride =
            serde_yaml::from_str(&raw).map_err(|e| PolicyConfigError::Parse(e.to_string()))?;
        let merged = Self {
            selection_mode: override_.selection_mode.unwrap_or(self.selection_mode),
            max_inputs: override_.max_inputs.unwrap_or(self.max_inputs),
            estimated_network_fee_sompi: override_
                .estimated_network_fee_sompi
                .unwrap_or(self.estimated_network_fee_sompi),
            per_input_fee_buffer_sompi: override_
                .per_input_fee_buffer_sompi
                .unwrap_or(self.per_input_fee_buffer_sompi),
            extra_safety_buffer_sompi: override_
                .extra_safety_buffer_sompi
                .unwrap_or(self.extra_safety_buffer_sompi),
            priority_fee_mode: override_.priority_fee_mode.unwrap_or(self.priority_fee_mode),
            priority_fee_fixed_sompi: override_
                .priority_fee_fixed_sompi
                .unwrap_or(self.priority_fee_fixed_sompi),
            priority_fee_output_bps: override_
                .priority_fee_output_bps
                .unwrap_or(self.priority_fee_output_bps),
            priority_fee_per_output_sompi: override_
                .priority_fee_per_output_sompi
                .unwrap_or(self.priority_fee_per_output_sompi),
            priority_fee_min_sompi: override_.priority_fee_min_sompi.unwrap_or(self.priority_fee_min_sompi),
            priority_fee_max_sompi: override_.priority_fee_max_sompi.unwrap_or(self.priority_fee_max_sompi),
            prefer_consolidation: override_.prefer_consolidation.unwrap_or(self.prefer_consolidation),
            adaptive: match override_.adaptive {
                Some(partial) => partial.apply(self.adaptive),
                None => self.adaptive,
            },
        };
        validate(&merged)?;
        Ok(merged)
    }

    /// Loads the env-default config, then applies `path` as an override
    /// if given. Read/parse/validation failures are logged and the
    /// unmodified default is kept rather than failing startup.
    pub fn load(path: Option<&str>) -> Self {
        let base = Self::default();
        let Some(path) = path else { return base };
        match base.merge_file(Path::new(path)) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::error!(error = %e, path, "failed to apply policy config override, keeping defaults");
                base
            }
        }
    }
}

#[cfg(test)]
mod override_tests {
    use super::*;

    #[test]
    fn merge_file_overrides_only_specified_fields() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("forgeos-policy-override-test-{}.yaml", std::process::id()));
        std::fs::write(&path, "maxInputs: 42\npriorityFeeMode: adaptive\n").unwrap();

        let base = PolicyConfig::default();
        let merged = base.merge_file(&path).unwrap();
        assert_eq!(merged.max_inputs, 42);
        assert_eq!(merged.priority_fee_mode, PriorityFeeMode::Adaptive);
        assert_eq!(merged.selection_mode, base.selection_mode);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn merge_file_rejects_inverted_fee_bounds() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("forgeos-policy-override-invalid-{}.yaml", std::process::id()));
        std::fs::write(&path, "priorityFeeMinSompi: 999999\npriorityFeeMaxSompi: 1\n").unwrap();

        let base = PolicyConfig::default();
        assert!(base.merge_file(&path).is_err());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_falls_back_to_defaults_when_path_missing() {
        let config = PolicyConfig::load(Some("/nonexistent/path/to/policy.yaml"));
        assert_eq!(config.max_inputs, PolicyConfig::default().max_inputs);
    }
}
