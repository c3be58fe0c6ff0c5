//! Prometheus exporter for a Modbus RTU battery management system.
//!
//! Polls seven input registers from the BMS on a fixed interval, decodes
//! them into cell voltages, pack current and temperatures, and exposes the
//! latest values via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  RegisterSource │────>│    BmsPoller    │────>│   MetricsSink   │────>│   HTTP Server   │
//! │ (RTU/simulated) │     │ (decode + log)  │     │  (last value)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Exposed metrics
//!
//! - `bms_cell_voltage_mv{cell_index="1".."4"}`
//! - `bms_current_ma`
//! - `bms_temperature_c{sensor_index="1".."2"}`
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod simulator;
pub mod transport;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use metrics::{MetricsSink, SharedMetrics};
pub use poller::BmsPoller;
pub use simulator::SimulatedBms;
pub use transport::{ReadError, RegisterSource, RtuTransport};
