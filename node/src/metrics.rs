//! # Prometheus Metrics
//!
//! Operational metrics for the loyalty node, scraped at `/metrics` on the
//! configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with a
//! `loyalty` prefix so they do not collide with any default global registry
//! consumers. Ledger and redemption events feed the counters through
//! [`MetricsSink`]; the reconciliation loop feeds the audit gauges.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use loyalty_engine::events::{Envelope, EventSink, LedgerEvent, TracingSink};
use loyalty_engine::ReconcileReport;
use loyalty_redemption::RedemptionEvent;

/// Holds all Prometheus metric handles for the node.
///
/// Prometheus handles are reference-counted, so clones share counters.
#[derive(Clone)]
pub struct LedgerMetrics {
    registry: Registry,
    /// Points added by accruals, positive adjustments and reversals.
    pub points_credited_total: IntCounter,
    /// Points removed by negative adjustments and reversals of accruals.
    pub points_debited_total: IntCounter,
    /// Redemption events, labelled `requested` / `completed`.
    pub redemptions_total: IntCounterVec,
    pub reconcile_runs_total: IntCounter,
    /// Keys whose stored balance disagreed with the movement sum in the
    /// latest audit.
    pub inconsistent_balances: IntGauge,
    pub balance_rows: IntGauge,
    pub movements: IntGauge,
    pub reconcile_latency_seconds: Histogram,
}

impl LedgerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("loyalty".into()), None)?;

        let points_credited_total =
            IntCounter::new("points_credited_total", "Total points credited to balances")?;
        registry.register(Box::new(points_credited_total.clone()))?;

        let points_debited_total =
            IntCounter::new("points_debited_total", "Total points debited from balances")?;
        registry.register(Box::new(points_debited_total.clone()))?;

        let redemptions_total = IntCounterVec::new(
            Opts::new("redemptions_total", "Redemption lifecycle events by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(redemptions_total.clone()))?;

        let reconcile_runs_total =
            IntCounter::new("reconcile_runs_total", "Completed reconciliation audits")?;
        registry.register(Box::new(reconcile_runs_total.clone()))?;

        let inconsistent_balances = IntGauge::new(
            "inconsistent_balances",
            "Balances that disagreed with their movement sum in the last audit",
        )?;
        registry.register(Box::new(inconsistent_balances.clone()))?;

        let balance_rows = IntGauge::new("balance_rows", "Balance keys seen by the last audit")?;
        registry.register(Box::new(balance_rows.clone()))?;

        let movements = IntGauge::new("movements", "Movements scanned by the last audit")?;
        registry.register(Box::new(movements.clone()))?;

        let reconcile_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_latency_seconds",
                "Wall time of one reconciliation audit in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(reconcile_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            points_credited_total,
            points_debited_total,
            redemptions_total,
            reconcile_runs_total,
            inconsistent_balances,
            balance_rows,
            movements,
            reconcile_latency_seconds,
        })
    }

    pub fn observe_reconcile(&self, report: &ReconcileReport, elapsed_secs: f64) {
        self.reconcile_runs_total.inc();
        self.reconcile_latency_seconds.observe(elapsed_secs);
        self.inconsistent_balances
            .set(report.discrepancies.len() as i64);
        self.balance_rows.set(report.keys_checked as i64);
        self.movements.set(report.movements_scanned as i64);
    }

    fn observe_movement(&self, amount: i64) {
        if amount >= 0 {
            self.points_credited_total.inc_by(amount.unsigned_abs());
        } else {
            self.points_debited_total.inc_by(amount.unsigned_abs());
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<LedgerMetrics>;

/// Event sink that logs each event and counts it.
#[derive(Clone)]
pub struct MetricsSink {
    metrics: SharedMetrics,
}

impl MetricsSink {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self { metrics }
    }
}

impl EventSink<LedgerEvent> for MetricsSink {
    fn publish(&self, envelope: Envelope<LedgerEvent>) {
        self.metrics.observe_movement(envelope.event.movement().amount);
        TracingSink.publish(envelope);
    }
}

impl EventSink<RedemptionEvent> for MetricsSink {
    fn publish(&self, envelope: Envelope<RedemptionEvent>) {
        let outcome = match &envelope.event {
            RedemptionEvent::Requested { .. } => "requested",
            RedemptionEvent::Completed { .. } => "completed",
        };
        self.metrics.redemptions_total.with_label_values(&[outcome]).inc();
        TracingSink.publish(envelope);
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_engine::{BalanceKey, MovementKind, NewMovement, OpContext};

    fn ledger_event(kind: MovementKind, amount: i64) -> Envelope<LedgerEvent> {
        let movement = NewMovement::new(BalanceKey::new(1, 1), kind, amount).into_movement(1);
        let event = LedgerEvent::for_movement(&movement).unwrap();
        Envelope::new(&OpContext::new(), event)
    }

    #[test]
    fn sink_counts_credits_and_debits() {
        let metrics = Arc::new(LedgerMetrics::new().unwrap());
        let sink = MetricsSink::new(metrics.clone());
        sink.publish(ledger_event(MovementKind::Accrual, 300));
        sink.publish(ledger_event(MovementKind::Adjustment, -120));

        assert_eq!(metrics.points_credited_total.get(), 300);
        assert_eq!(metrics.points_debited_total.get(), 120);
    }

    #[test]
    fn reconcile_report_sets_gauges() {
        let metrics = LedgerMetrics::new().unwrap();
        let report = ReconcileReport {
            keys_checked: 4,
            movements_scanned: 17,
            discrepancies: Vec::new(),
        };
        metrics.observe_reconcile(&report, 0.02);
        assert_eq!(metrics.reconcile_runs_total.get(), 1);
        assert_eq!(metrics.balance_rows.get(), 4);
        assert_eq!(metrics.inconsistent_balances.get(), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("loyalty_reconcile_runs_total 1"));
        assert!(text.contains("loyalty_movements 17"));
    }
}
