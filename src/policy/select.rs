use super::config::PolicyConfig;
use super::types::{
    AdaptiveSignals, FreshnessState, PolicyPlan, PriorityFeeMode, SelectionMode, Telemetry,
    UtxoEntry,
};
use crate::money::Sompi;

/// `spec.md` §4.C: select inputs and compute the priority fee for a
/// transaction paying `outputs_total` sompi across `output_count`
/// outputs. Pure and infallible: an under-funded selection is reported
/// via `selected_amount < outputs_total + fees`, left for the caller
/// to classify as an error.
pub fn select(
    candidates: &[UtxoEntry],
    outputs_total: Sompi,
    output_count: usize,
    requested_priority_fee: Option<Sompi>,
    telemetry: Option<Telemetry>,
    config: &PolicyConfig,
) -> PolicyPlan {
    let target = outputs_total.to_raw();
    let baseline_fee = clamp_u128(
        baseline_priority_fee(config, target, output_count, requested_priority_fee),
        config.priority_fee_min_sompi,
        config.priority_fee_max_sompi,
    );

    let (sorted, mode_used) = sort_candidates(candidates, config.selection_mode, config.prefer_consolidation);

    let mut cursor = 0usize;
    let (mut selected, mut selected_amount, mut truncated) = greedy_accumulate(
        &sorted,
        &mut cursor,
        target,
        config.estimated_network_fee_sompi,
        config.extra_safety_buffer_sompi,
        baseline_fee,
        config.per_input_fee_buffer_sompi,
        config.max_inputs,
        Vec::new(),
        0,
    );

    let mut final_fee = baseline_fee;
    let mut adaptive_signals = None;
    let mut extended = false;

    if config.priority_fee_mode == PriorityFeeMode::Adaptive {
        let telemetry = telemetry.unwrap_or_default();
        let freshness = telemetry.freshness_state.unwrap_or(FreshnessState::Missing);
        let raw_multiplier = latency_multiplier(telemetry.observed_confirm_p95_ms, config);
        let (multiplier, dampened, forced_neutral) = match freshness {
            FreshnessState::Fresh | FreshnessState::NotRequired => (raw_multiplier, false, false),
            FreshnessState::StaleSoft => (
                1.0 + (raw_multiplier - 1.0) * config.adaptive.stale_soft_dampening,
                true,
                false,
            ),
            FreshnessState::StaleHard | FreshnessState::Missing => (1.0, false, true),
        };

        let per_input_bump = config.adaptive.per_input_bump_sompi * selected.len() as u128;
        let fragmentation_bump_applied = selected.len() >= config.adaptive.fragmentation_threshold;
        let fragmentation_bump = if fragmentation_bump_applied {
            config.adaptive.fragmentation_bump_sompi
        } else {
            0
        };
        let truncation_bump_applied = truncated;
        let truncation_bump = if truncation_bump_applied {
            config.adaptive.truncation_bump_sompi
        } else {
            0
        };
        let daa_congestion_bump_applied = telemetry
            .daa_congestion_pct
            .is_some_and(|pct| pct > config.adaptive.daa_congestion_threshold_pct);
        let daa_bump = if daa_congestion_bump_applied {
            config.adaptive.daa_congestion_bump_sompi
        } else {
            0
        };
        let receipt_lag_bump = severity_bump(
            telemetry.receipt_lag_ms,
            config.adaptive.receipt_lag_high_ms,
            config.adaptive.receipt_lag_critical_ms,
            config.adaptive.receipt_lag_bump_sompi,
        );
        let scheduler_callback_bump = severity_bump(
            telemetry.scheduler_callback_lag_ms,
            config.adaptive.scheduler_callback_high_ms,
            config.adaptive.scheduler_callback_critical_ms,
            config.adaptive.scheduler_callback_bump_sompi,
        );

        let scaled_baseline = ((baseline_fee as f64) * multiplier).ceil() as u128;
        let fee_before_clamp = scaled_baseline
            + per_input_bump
            + fragmentation_bump
            + truncation_bump
            + daa_bump
            + receipt_lag_bump
            + scheduler_callback_bump;
        let fee_clamped = clamp_u128(
            fee_before_clamp,
            config.priority_fee_min_sompi,
            config.priority_fee_max_sompi,
        );
        let clamped = fee_clamped != fee_before_clamp;

        adaptive_signals = Some(AdaptiveSignals {
            latency_multiplier: multiplier,
            dampened,
            forced_neutral,
            summary_freshness_state: freshness,
            per_input_bump_sompi: per_input_bump,
            fragmentation_bump_applied,
            truncation_bump_applied,
            daa_congestion_bump_applied,
            receipt_lag_bump_sompi: receipt_lag_bump,
            scheduler_callback_bump_sompi: scheduler_callback_bump,
            fee_before_clamp_sompi: fee_before_clamp,
            clamped,
        });

        final_fee = fee_clamped;

        let required_now = target
            + config.estimated_network_fee_sompi
            + config.extra_safety_buffer_sompi
            + final_fee
            + (selected.len() as u128) * config.per_input_fee_buffer_sompi;
        if selected_amount < required_now && selected.len() < config.max_inputs {
            let prior_len = selected.len();
            let (more_selected, more_amount, more_truncated) = greedy_accumulate(
                &sorted,
                &mut cursor,
                target,
                config.estimated_network_fee_sompi,
                config.extra_safety_buffer_sompi,
                final_fee,
                config.per_input_fee_buffer_sompi,
                config.max_inputs,
                std::mem::take(&mut selected),
                selected_amount,
            );
            if more_selected.len() > prior_len {
                extended = true;
            }
            selected = more_selected;
            selected_amount = more_amount;
            truncated = more_truncated;
        }
    }

    PolicyPlan {
        selected,
        selected_amount: Sompi::new(selected_amount),
        priority_fee: Sompi::new(final_fee),
        selection_mode_used: mode_used,
        truncated,
        extended_for_adaptive_fee: extended,
        adaptive_signals,
    }
}

fn baseline_priority_fee(
    config: &PolicyConfig,
    target: u128,
    output_count: usize,
    requested: Option<Sompi>,
) -> u128 {
    match config.priority_fee_mode {
        PriorityFeeMode::Fixed | PriorityFeeMode::Adaptive => config.priority_fee_fixed_sompi,
        PriorityFeeMode::OutputBps => (target * config.priority_fee_output_bps as u128) / 10_000,
        PriorityFeeMode::PerOutput => {
            config.priority_fee_per_output_sompi * output_count as u128
        }
        PriorityFeeMode::RequestOrFixed => requested
            .map(Sompi::to_raw)
            .unwrap_or(config.priority_fee_fixed_sompi),
    }
}

fn clamp_u128(value: u128, min: u128, max: u128) -> u128 {
    value.clamp(min, max)
}

fn sort_candidates(
    candidates: &[UtxoEntry],
    mode: SelectionMode,
    prefer_consolidation: bool,
) -> (Vec<UtxoEntry>, SelectionMode) {
    let mut sorted: Vec<UtxoEntry> = candidates.to_vec();
    let resolved = match mode {
        SelectionMode::Auto if prefer_consolidation => SelectionMode::OldestFirst,
        SelectionMode::Auto => SelectionMode::LargestFirst,
        other => other,
    };
    match resolved {
        SelectionMode::LargestFirst => sorted.sort_by(|a, b| b.amount.cmp(&a.amount)),
        SelectionMode::SmallestFirst => sorted.sort_by(|a, b| a.amount.cmp(&b.amount)),
        SelectionMode::OldestFirst => sorted.sort_by(|a, b| {
            a.block_daa_score
                .cmp(&b.block_daa_score)
                .then_with(|| a.amount.cmp(&b.amount))
        }),
        SelectionMode::NewestFirst => sorted.sort_by(|a, b| b.block_daa_score.cmp(&a.block_daa_score)),
        SelectionMode::Auto => unreachable!(),
    }
    (sorted, resolved)
}

#[allow(clippy::too_many_arguments)]
fn greedy_accumulate(
    sorted: &[UtxoEntry],
    cursor: &mut usize,
    target: u128,
    network_fee: u128,
    safety_buffer: u128,
    fee: u128,
    per_input_buffer: u128,
    max_inputs: usize,
    mut selected: Vec<UtxoEntry>,
    mut selected_amount: u128,
) -> (Vec<UtxoEntry>, u128, bool) {
    let satisfied = |count: usize, amount: u128| {
        amount >= target + network_fee + safety_buffer + fee + (count as u128) * per_input_buffer
    };

    while !satisfied(selected.len(), selected_amount) && selected.len() < max_inputs && *cursor < sorted.len() {
        let entry = sorted[*cursor].clone();
        *cursor += 1;
        selected_amount += entry.amount.to_raw();
        selected.push(entry);
    }

    let truncated = selected.len() == max_inputs && !satisfied(selected.len(), selected_amount);
    (selected, selected_amount, truncated)
}

fn latency_multiplier(p95_ms: Option<u64>, config: &PolicyConfig) -> f64 {
    match p95_ms {
        None => 1.0,
        Some(p95) if p95 > config.adaptive.critical_confirm_ms => 1.0 + config.adaptive.up_pct * 2.0,
        Some(p95) if p95 > config.adaptive.high_confirm_ms => 1.0 + config.adaptive.up_pct,
        Some(p95) if p95 < config.adaptive.target_confirm_ms => 1.0 - config.adaptive.down_pct,
        Some(_) => 1.0,
    }
}

fn severity_bump(value_ms: Option<u64>, high_ms: u64, critical_ms: u64, bump: u128) -> u128 {
    match value_ms {
        Some(v) if v > critical_ms => bump * 2,
        Some(v) if v > high_ms => bump,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AdaptiveThresholds, FreshnessState, PolicyConfig};

    fn entry(txid: &str, amount: u128, daa: u64) -> UtxoEntry {
        UtxoEntry {
            txid: txid.to_string(),
            index: 0,
            amount: Sompi::new(amount),
            script_hex: "76a914".to_string(),
            block_daa_score: daa,
        }
    }

    #[test]
    fn largest_first_accumulates_fewest_inputs() {
        let candidates = vec![entry("a", 100, 1), entry("b", 500, 2), entry("c", 50, 3)];
        let config = PolicyConfig {
            selection_mode: SelectionMode::LargestFirst,
            priority_fee_mode: PriorityFeeMode::Fixed,
            priority_fee_fixed_sompi: 0,
            priority_fee_min_sompi: 0,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            ..PolicyConfig::default()
        };
        let plan = select(&candidates, Sompi::new(400), 1, None, None, &config);
        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.selected[0].txid, "b");
        assert!(!plan.truncated);
    }

    #[test]
    fn max_inputs_cap_sets_truncated_when_insufficient() {
        let candidates = vec![entry("a", 10, 1), entry("b", 10, 2), entry("c", 10, 3)];
        let config = PolicyConfig {
            selection_mode: SelectionMode::LargestFirst,
            max_inputs: 2,
            priority_fee_mode: PriorityFeeMode::Fixed,
            priority_fee_fixed_sompi: 0,
            priority_fee_min_sompi: 0,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            ..PolicyConfig::default()
        };
        let plan = select(&candidates, Sompi::new(100), 1, None, None, &config);
        assert!(plan.truncated);
        assert_eq!(plan.selected.len(), 2);
    }

    #[test]
    fn adaptive_fee_escalates_on_high_latency_and_extends_selection() {
        let candidates = vec![
            entry("a", 1_000, 1),
            entry("b", 1_000, 2),
            entry("c", 1_000, 3),
            entry("d", 1_000, 4),
        ];
        let config = PolicyConfig {
            selection_mode: SelectionMode::LargestFirst,
            max_inputs: 10,
            priority_fee_mode: PriorityFeeMode::Adaptive,
            priority_fee_fixed_sompi: 100,
            priority_fee_min_sompi: 0,
            priority_fee_max_sompi: 10_000,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            adaptive: AdaptiveThresholds {
                target_confirm_ms: 1_000,
                high_confirm_ms: 2_000,
                critical_confirm_ms: 5_000,
                up_pct: 1.0,
                ..AdaptiveThresholds::default()
            },
            ..PolicyConfig::default()
        };
        let telemetry = Telemetry {
            observed_confirm_p95_ms: Some(6_000),
            freshness_state: Some(FreshnessState::Fresh),
            ..Telemetry::default()
        };
        let plan = select(&candidates, Sompi::new(1_900), 1, None, Some(telemetry), &config);
        let signals = plan.adaptive_signals.expect("adaptive mode must record signals");
        assert_eq!(signals.latency_multiplier, 3.0); // 1.0 + up_pct*2
        assert!(plan.priority_fee.to_raw() > 100);
    }

    #[test]
    fn stale_hard_telemetry_forces_neutral_multiplier() {
        let candidates = vec![entry("a", 10_000, 1)];
        let config = PolicyConfig {
            priority_fee_mode: PriorityFeeMode::Adaptive,
            priority_fee_fixed_sompi: 500,
            priority_fee_min_sompi: 0,
            priority_fee_max_sompi: 100_000,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            ..PolicyConfig::default()
        };
        let telemetry = Telemetry {
            observed_confirm_p95_ms: Some(999_999),
            freshness_state: Some(FreshnessState::StaleHard),
            ..Telemetry::default()
        };
        let plan = select(&candidates, Sompi::new(1_000), 1, None, Some(telemetry), &config);
        let signals = plan.adaptive_signals.unwrap();
        assert!(signals.forced_neutral);
        assert_eq!(signals.latency_multiplier, 1.0);
    }

    #[test]
    fn stale_soft_dampens_the_escalation() {
        let candidates = vec![entry("a", 10_000, 1)];
        let adaptive = AdaptiveThresholds {
            target_confirm_ms: 1_000,
            high_confirm_ms: 2_000,
            critical_confirm_ms: 5_000,
            up_pct: 1.0,
            stale_soft_dampening: 0.5,
            ..AdaptiveThresholds::default()
        };
        let config = PolicyConfig {
            priority_fee_mode: PriorityFeeMode::Adaptive,
            priority_fee_fixed_sompi: 1_000,
            priority_fee_min_sompi: 0,
            priority_fee_max_sompi: 1_000_000,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            adaptive,
            ..PolicyConfig::default()
        };
        let telemetry = Telemetry {
            observed_confirm_p95_ms: Some(6_000),
            freshness_state: Some(FreshnessState::StaleSoft),
            ..Telemetry::default()
        };
        let plan = select(&candidates, Sompi::new(1_000), 1, None, Some(telemetry), &config);
        let signals = plan.adaptive_signals.unwrap();
        assert!(signals.dampened);
        // raw multiplier would be 3.0 (delta 2.0); dampened by 0.5 -> 1.0 + 1.0 = 2.0
        assert_eq!(signals.latency_multiplier, 2.0);
    }

    #[test]
    fn fee_is_clamped_to_configured_bounds() {
        let candidates = vec![entry("a", 10_000, 1)];
        let config = PolicyConfig {
            priority_fee_mode: PriorityFeeMode::Adaptive,
            priority_fee_fixed_sompi: 10_000,
            priority_fee_min_sompi: 0,
            priority_fee_max_sompi: 50,
            estimated_network_fee_sompi: 0,
            per_input_fee_buffer_sompi: 0,
            extra_safety_buffer_sompi: 0,
            ..PolicyConfig::default()
        };
        let plan = select(&candidates, Sompi::new(1_000), 1, None, None, &config);
        assert_eq!(plan.priority_fee.to_raw(), 50);
        assert!(plan.adaptive_signals.unwrap().clamped);
    }
}
