//! Derived telemetry summary (`spec.md` §4.F "Derived summary").

use super::model::{
    CallbacksSummary, ConfirmTsSource, ConfirmTsSourceCounts, ConsistencyCounters, Percentiles,
    ReceiptsSummary, SchedulerSummary, TelemetrySummary,
};
use super::model::{ConsistencyStatus, ExecutionReceipt};

/// p50/p95 via the ceiling-index rule (`spec.md` §4.F, §8): for a sorted
/// array of `n` samples, `index = ceil(p * n)`, 1-based, clamped to
/// `[1, n]`.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let idx = ((p * n as f64).ceil() as usize).clamp(1, n);
    sorted[idx - 1]
}

fn percentiles(mut samples: Vec<u64>) -> Percentiles {
    samples.sort_unstable();
    Percentiles {
        p50: percentile(&samples, 0.50),
        p95: percentile(&samples, 0.95),
    }
}

/// Builds the `receipts` half of the summary from `recentReceipts`
/// (`spec.md` §4.F step-by-step derivation).
pub fn receipts_summary(receipts: &[ExecutionReceipt], now: i64) -> ReceiptsSummary {
    let mut confirmation_latency = Vec::new();
    let mut receipt_lag = Vec::new();
    let mut counts = ConfirmTsSourceCounts::default();
    let mut sample_count = 0usize;

    for receipt in receipts {
        if !receipt.counts_as_confirmed() {
            continue;
        }
        sample_count += 1;

        if let (Some(confirm_ts), Some(broadcast_ts)) = (receipt.confirm_ts, receipt.broadcast_ts) {
            if confirm_ts >= broadcast_ts && broadcast_ts > 0 {
                confirmation_latency.push((confirm_ts - broadcast_ts) as u64);
            }
        }
        if let Some(confirm_ts) = receipt.confirm_ts {
            if confirm_ts > 0 && confirm_ts <= now {
                receipt_lag.push((now - confirm_ts) as u64);
            }
        }
        match receipt.confirm_ts_source {
            Some(ConfirmTsSource::Chain) => counts.chain += 1,
            Some(ConfirmTsSource::Backend) => counts.backend += 1,
            None => {}
        }
    }

    ReceiptsSummary {
        confirmation_latency_ms: percentiles(confirmation_latency),
        receipt_lag_ms: percentiles(receipt_lag),
        confirm_ts_source_counts: counts,
        sample_count,
    }
}

/// A single cycle-ingestion observation feeding the scheduler-saturation
/// proxy: whether the call was accepted vs. deduped/stale, and its
/// arrival time. `spec.md` gives no closed-form for `saturationProxyPct`
/// / `callbacks.latencyP95BucketMs`; the derivation below is this
/// crate's own decision (recorded in DESIGN.md) — the contention ratio
/// of non-accepted to total calls, and the p95 gap between consecutive
/// ingestions.
#[derive(Debug, Clone, Copy)]
pub struct CycleIngestionSample {
    pub accepted: bool,
    pub ts_ms: i64,
}

pub fn scheduler_summary(samples: &[CycleIngestionSample]) -> SchedulerSummary {
    if samples.is_empty() {
        return SchedulerSummary::default();
    }
    let total = samples.len() as f64;
    let non_accepted = samples.iter().filter(|s| !s.accepted).count() as f64;
    let saturation_proxy_pct = (non_accepted / total) * 100.0;

    let mut gaps: Vec<u64> = samples
        .windows(2)
        .map(|w| w[1].ts_ms.saturating_sub(w[0].ts_ms).max(0) as u64)
        .collect();
    gaps.sort_unstable();
    let latency_p95_bucket_ms = percentile(&gaps, 0.95);

    SchedulerSummary {
        saturation_proxy_pct,
        callbacks: CallbacksSummary { latency_p95_bucket_ms },
    }
}

pub fn consistency_counters(reports: &[ConsistencyStatus]) -> ConsistencyCounters {
    let mut counters = ConsistencyCounters::default();
    for status in reports {
        match status {
            ConsistencyStatus::Consistent => counters.consistent += 1,
            ConsistencyStatus::Mismatch => counters.mismatch += 1,
            ConsistencyStatus::Insufficient => counters.insufficient += 1,
        }
    }
    counters
}

pub fn build_summary(
    receipts: &[ExecutionReceipt],
    now: i64,
    cycle_samples: &[CycleIngestionSample],
    consistency_reports: &[ConsistencyStatus],
) -> TelemetrySummary {
    TelemetrySummary {
        receipts: receipts_summary(receipts, now),
        scheduler: scheduler_summary(cycle_samples),
        consistency: consistency_counters(consistency_reports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::model::ReceiptStatus;

    fn confirmed(confirm_ts: i64, broadcast_ts: i64, source: ConfirmTsSource) -> ExecutionReceipt {
        ExecutionReceipt {
            txid: "a".repeat(64),
            agent_key: None,
            status: ReceiptStatus::Confirmed,
            confirmations: 1,
            fee_sompi: None,
            broadcast_ts: Some(broadcast_ts),
            confirm_ts: Some(confirm_ts),
            confirm_ts_source: Some(source),
            updated_at: confirm_ts,
        }
    }

    #[test]
    fn percentile_uses_ceiling_index_rule() {
        let samples = vec![10, 20, 30, 40];
        assert_eq!(percentile(&samples, 0.50), 20);
        assert_eq!(percentile(&samples, 0.95), 40);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0);
    }

    #[test]
    fn receipts_summary_computes_latency_and_lag() {
        let receipts = vec![confirmed(1_000, 500, ConfirmTsSource::Chain), confirmed(2_000, 1_000, ConfirmTsSource::Backend)];
        let summary = receipts_summary(&receipts, 3_000);
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.confirm_ts_source_counts.chain, 1);
        assert_eq!(summary.confirm_ts_source_counts.backend, 1);
        assert!(summary.confirmation_latency_ms.p95 > 0);
        assert!(summary.receipt_lag_ms.p95 > 0);
    }

    #[test]
    fn unconfirmed_receipts_are_excluded() {
        let mut receipt = confirmed(1_000, 500, ConfirmTsSource::Chain);
        receipt.status = ReceiptStatus::Pending;
        receipt.confirmations = 0;
        let summary = receipts_summary(&[receipt], 2_000);
        assert_eq!(summary.sample_count, 0);
    }

    #[test]
    fn scheduler_saturation_reflects_non_accepted_ratio() {
        let samples = vec![
            CycleIngestionSample { accepted: true, ts_ms: 0 },
            CycleIngestionSample { accepted: false, ts_ms: 10 },
            CycleIngestionSample { accepted: true, ts_ms: 20 },
            CycleIngestionSample { accepted: false, ts_ms: 30 },
        ];
        let summary = scheduler_summary(&samples);
        assert_eq!(summary.saturation_proxy_pct, 50.0);
    }
}
