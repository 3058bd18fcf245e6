//! Hand-rolled Prometheus exposition with plain `AtomicU64` counters, the
//! same style as `gateway::state::AppState::order_id_gen` and
//! `gateway::handlers::health`'s rate-limited check timestamp, rather
//! than pulling in a dedicated metrics crate.
//!
//! Every counter named in `spec.md` §8's testable properties and §7's
//! error-kind table gets a slot here. `render()` produces the text
//! exposition format served by `GET /metrics` on both HTTP services.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($name:ident { $($field:ident => $metric:expr),* $(,)? }) => {
        #[derive(Default)]
        pub struct $name {
            $(pub $field: AtomicU64,)*
        }

        impl $name {
            pub fn render(&self, out: &mut String) {
                $(
                    let _ = writeln!(
                        out,
                        "# TYPE {m} counter\n{m} {v}",
                        m = $metric,
                        v = self.$field.load(Ordering::Relaxed)
                    );
                )*
            }
        }
    };
}

counters!(BuilderMetrics {
    requests_total => "forgeos_builder_requests_total",
    requests_accepted_total => "forgeos_builder_requests_accepted_total",
    requests_rejected_total => "forgeos_builder_requests_rejected_total",
    utxo_fetch_failures_total => "forgeos_builder_utxo_fetch_failures_total",
    fallback_used_all_inputs_total => "forgeos_builder_fallback_used_all_inputs_total",
    telemetry_summary_missing_total => "forgeos_builder_telemetry_summary_missing_total",
    telemetry_summary_stale_hard_total => "forgeos_builder_telemetry_summary_stale_hard_total",
    timeouts_total => "forgeos_builder_timeouts_total",
    internal_errors_total => "forgeos_builder_internal_errors_total",
});

counters!(ConsumerMetrics {
    cycle_events_accepted_total => "forgeos_consumer_cycle_events_accepted_total",
    cycle_events_duplicate_total => "forgeos_consumer_cycle_events_duplicate_total",
    cycle_events_stale_total => "forgeos_consumer_cycle_events_stale_total",
    receipts_accepted_total => "forgeos_consumer_receipts_accepted_total",
    receipts_duplicate_total => "forgeos_consumer_receipts_duplicate_total",
    receipts_rejected_total => "forgeos_consumer_receipts_rejected_total",
    consistency_reports_total => "forgeos_consumer_consistency_reports_total",
    consistency_mismatches_total => "forgeos_consumer_consistency_mismatches_total",
    sse_clients_current => "forgeos_consumer_sse_clients_current",
    sse_clients_rejected_total => "forgeos_consumer_sse_clients_rejected_total",
    redis_fail_open_total => "forgeos_consumer_redis_fail_open_total",
    internal_errors_total => "forgeos_consumer_internal_errors_total",
});

counters!(TelemetryCacheMetrics {
    cache_hits_total => "forgeos_telemetry_cache_hits_total",
    cache_misses_total => "forgeos_telemetry_cache_misses_total",
    singleflight_joins_total => "forgeos_telemetry_singleflight_joins_total",
    upstream_failures_total => "forgeos_telemetry_upstream_failures_total",
    served_stale_total => "forgeos_telemetry_served_stale_total",
});

counters!(DispatcherMetrics {
    admitted_total => "forgeos_dispatcher_admitted_total",
    rejected_capacity_total => "forgeos_dispatcher_rejected_capacity_total",
    rejected_per_origin_total => "forgeos_dispatcher_rejected_per_origin_total",
    resolved_total => "forgeos_dispatcher_resolved_total",
    resolved_stale_total => "forgeos_dispatcher_resolved_stale_total",
    expired_total => "forgeos_dispatcher_expired_total",
    tab_closed_removed_total => "forgeos_dispatcher_tab_closed_removed_total",
    dropped_messages_total => "forgeos_dispatcher_dropped_messages_total",
    unknown_origin_total => "forgeos_dispatcher_unknown_origin_total",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn render_includes_each_counter() {
        let m = BuilderMetrics::default();
        m.requests_total.fetch_add(3, Ordering::Relaxed);
        let mut out = String::new();
        m.render(&mut out);
        assert!(out.contains("forgeos_builder_requests_total 3"));
        assert!(out.contains("forgeos_builder_internal_errors_total 0"));
    }
}
