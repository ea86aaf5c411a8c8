use prometheus::{opts, IntCounter, IntCounterVec, Registry, TextEncoder};
use skyledger_core::Amount;

/// Prometheus collectors for ledger traffic, on a registry of their own.
pub struct ApiMetrics {
    registry: Registry,
    operations: IntCounterVec,
    bookings: IntCounter,
    disbursed: IntCounter,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            opts!("skyledger_operations_total", "Ledger operations by outcome"),
            &["operation", "outcome"],
        )?;
        let bookings = IntCounter::new("skyledger_bookings_total", "Committed bookings")?;
        let disbursed = IntCounter::new(
            "skyledger_disbursed_units_total",
            "Currency units paid out to airline owners",
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(bookings.clone()))?;
        registry.register(Box::new(disbursed.clone()))?;

        Ok(Self {
            registry,
            operations,
            bookings,
            disbursed,
        })
    }

    /// Outcome is `ok` or the error kind.
    pub fn record<T>(&self, operation: &str, result: &Result<T, skyledger_core::LedgerError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        self.operations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_booking(&self, total: Amount) {
        self.bookings.inc();
        self.disbursed.inc_by(u64::try_from(total).unwrap_or(u64::MAX));
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyledger_core::LedgerError;

    #[test]
    fn test_render_includes_outcomes() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.record("add_airline", &Ok::<(), LedgerError>(()));
        metrics.record::<()>("add_airline", &Err(LedgerError::SystemPaused));
        metrics.record_booking(1_500);

        let text = metrics.render().unwrap();

        assert!(text.contains(r#"skyledger_operations_total{operation="add_airline",outcome="ok"} 1"#));
        assert!(text.contains(r#"outcome="SYSTEM_PAUSED""#));
        assert!(text.contains("skyledger_disbursed_units_total 1500"));
    }
}
