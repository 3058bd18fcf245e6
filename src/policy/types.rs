use crate::money::Sompi;
use serde::{Deserialize, Serialize};

/// A spendable output as reported by chain RPC, normalised per `spec.md`
/// §4.D step 2 before it ever reaches [`super::select`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub txid: String,
    pub index: u32,
    pub amount: Sompi,
    pub script_hex: String,
    /// DAA score of the block the UTXO was confirmed in. Used as the age
    /// key for `oldest-first`/`newest-first` ordering.
    pub block_daa_score: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    LargestFirst,
    SmallestFirst,
    OldestFirst,
    NewestFirst,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityFeeMode {
    Fixed,
    OutputBps,
    PerOutput,
    RequestOrFixed,
    Adaptive,
}

/// Freshness classification of the telemetry backing an adaptive fee
/// computation, per `spec.md` §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessState {
    Fresh,
    StaleSoft,
    StaleHard,
    Missing,
    NotRequired,
}

/// Telemetry signals consumed by the adaptive fee engine. All fields are
/// optional: a missing signal simply does not contribute its bump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub observed_confirm_p95_ms: Option<u64>,
    pub daa_congestion_pct: Option<f64>,
    pub receipt_lag_ms: Option<u64>,
    pub scheduler_callback_lag_ms: Option<u64>,
    #[serde(default)]
    pub freshness_state: Option<FreshnessState>,
    #[serde(default)]
    pub freshness_max_age_ms: Option<u64>,
}

/// Diagnostics recorded only when `priority_fee_mode == Adaptive`
/// (`spec.md` §4.C step 6: "including `adaptiveSignals` when adaptive").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSignals {
    pub latency_multiplier: f64,
    pub dampened: bool,
    pub forced_neutral: bool,
    pub summary_freshness_state: FreshnessState,
    pub per_input_bump_sompi: u128,
    pub fragmentation_bump_applied: bool,
    pub truncation_bump_applied: bool,
    pub daa_congestion_bump_applied: bool,
    pub receipt_lag_bump_sompi: u128,
    pub scheduler_callback_bump_sompi: u128,
    pub fee_before_clamp_sompi: u128,
    pub clamped: bool,
}

/// Result of [`super::select`]: `spec.md` §4.C "Return the plan with all
/// diagnostics recorded."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPlan {
    pub selected: Vec<UtxoEntry>,
    pub selected_amount: Sompi,
    pub priority_fee: Sompi,
    pub selection_mode_used: SelectionMode,
    pub truncated: bool,
    pub extended_for_adaptive_fee: bool,
    pub adaptive_signals: Option<AdaptiveSignals>,
}
