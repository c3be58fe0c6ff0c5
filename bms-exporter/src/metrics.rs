//! Metrics sink holding the latest BMS sample as Prometheus gauges.

use std::sync::Arc;

use bms_common::DecodedSample;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Failure kinds tracked by `bms_exporter_poll_failures_total`.
pub const FAILURE_KINDS: [&str; 3] = ["connection", "protocol", "transport"];

/// Content type of [`MetricsSink::render`] output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CellLabels {
    cell_index: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SensorLabels {
    sensor_index: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FailureLabels {
    kind: String,
}

/// Latest-value store for the BMS gauges.
///
/// Values are only written by [`record`](Self::record); a failed poll
/// leaves every gauge at its previous value.
pub struct MetricsSink {
    registry: Registry,
    cell_voltage: Family<CellLabels, Gauge>,
    current: Gauge,
    temperature: Family<SensorLabels, Gauge>,
    last_success: Gauge,
    polls: Counter,
    poll_failures: Family<FailureLabels, Counter>,
    latest: RwLock<Option<DecodedSample>>,
}

/// Shared handle to the metrics sink.
pub type SharedMetrics = Arc<MetricsSink>;

impl MetricsSink {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let cell_voltage = Family::<CellLabels, Gauge>::default();
        registry.register(
            "bms_cell_voltage_mv",
            "Voltage of individual cells in mV",
            cell_voltage.clone(),
        );

        let current = Gauge::default();
        registry.register("bms_current_ma", "System current in mA", current.clone());

        let temperature = Family::<SensorLabels, Gauge>::default();
        registry.register(
            "bms_temperature_c",
            "System temperatures in Celsius",
            temperature.clone(),
        );

        let last_success = Gauge::default();
        registry.register(
            "bms_last_success_timestamp_seconds",
            "Unix time of the last successful poll",
            last_success.clone(),
        );

        let polls = Counter::default();
        registry.register(
            "bms_exporter_polls",
            "Poll attempts made against the BMS",
            polls.clone(),
        );

        let poll_failures = Family::<FailureLabels, Counter>::default();
        registry.register(
            "bms_exporter_poll_failures",
            "Failed poll attempts by failure kind",
            poll_failures.clone(),
        );
        for kind in FAILURE_KINDS {
            poll_failures
                .get_or_create(&FailureLabels {
                    kind: kind.to_string(),
                })
                .inc_by(0);
        }

        Self {
            registry,
            cell_voltage,
            current,
            temperature,
            last_success,
            polls,
            poll_failures,
            latest: RwLock::new(None),
        }
    }

    /// Overwrite every BMS gauge with the values of `sample`.
    pub fn record(&self, sample: &DecodedSample) {
        let mut latest = self.latest.write();

        for (i, mv) in sample.cell_voltages_mv.iter().enumerate() {
            self.cell_voltage
                .get_or_create(&CellLabels {
                    cell_index: (i + 1).to_string(),
                })
                .set(i64::from(*mv));
        }

        self.current.set(i64::from(sample.current_ma));

        for (i, t) in sample.temperatures_c.iter().enumerate() {
            self.temperature
                .get_or_create(&SensorLabels {
                    sensor_index: (i + 1).to_string(),
                })
                .set(i64::from(*t));
        }

        self.last_success.set(chrono::Utc::now().timestamp());
        *latest = Some(*sample);
    }

    /// Count one poll attempt.
    pub fn record_attempt(&self) {
        self.polls.inc();
    }

    /// Count one failed poll attempt of the given kind.
    pub fn record_failure(&self, kind: &str) {
        self.poll_failures
            .get_or_create(&FailureLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// The most recently recorded sample, if any poll has succeeded yet.
    pub fn latest(&self) -> Option<DecodedSample> {
        *self.latest.read()
    }

    /// Number of poll attempts so far.
    pub fn attempts(&self) -> u64 {
        self.polls.get()
    }

    /// Number of failed poll attempts of the given kind.
    pub fn failures(&self, kind: &str) -> u64 {
        self.poll_failures
            .get(&FailureLabels {
                kind: kind.to_string(),
            })
            .map_or(0, |counter| counter.get())
    }

    /// Render metrics in the OpenMetrics text format.
    pub fn render(&self) -> String {
        // Hold the sample lock so a scrape never sees half of a record().
        let _latest = self.latest.read();
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        output
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}
