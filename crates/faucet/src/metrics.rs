//! Prometheus metrics for the faucet

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FaucetMetrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub send_duration: HistogramVec,
    pub admission_entries: IntGaugeVec,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            opts!("faucet_claims_total", "Claims by network and terminal outcome"),
            &["network", "outcome"],
        )?;
        let send_duration = HistogramVec::new(
            histogram_opts!(
                "faucet_send_duration_seconds",
                "Time spent submitting payout transactions"
            ),
            &["network"],
        )?;
        let admission_entries = IntGaugeVec::new(
            opts!("faucet_admission_entries", "Cooldown entries held per pool"),
            &["network"],
        )?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(send_duration.clone()))?;
        registry.register(Box::new(admission_entries.clone()))?;

        Ok(Self {
            registry,
            claims_total,
            send_duration,
            admission_entries,
        })
    }

    pub fn record_claim(&self, network: &str, outcome: &str) {
        self.claims_total.with_label_values(&[network, outcome]).inc();
    }

    pub fn record_send(&self, network: &str, elapsed: Duration) {
        self.send_duration
            .with_label_values(&[network])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_admission_entries(&self, network: &str, entries: usize) {
        self.admission_entries
            .with_label_values(&[network])
            .set(entries as i64);
    }

    /// Text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
