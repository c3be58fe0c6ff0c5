//! BMS polling loop.

use std::time::Duration;

use bms_common::{DecodedSample, decode};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::DeviceConfig;
use crate::metrics::SharedMetrics;
use crate::transport::{ReadError, RegisterSource};

/// Polls one BMS on a fixed interval and feeds the metrics sink.
pub struct BmsPoller<S> {
    source: S,
    metrics: SharedMetrics,
    device_name: String,
    interval: Duration,
}

impl<S: RegisterSource> BmsPoller<S> {
    /// Create a new poller for a device.
    pub fn new(source: S, metrics: SharedMetrics, device: &DeviceConfig) -> Self {
        Self {
            source,
            metrics,
            device_name: device.name.clone(),
            interval: device.poll_interval(),
        }
    }

    /// Perform a single read/decode/update cycle.
    ///
    /// On failure the gauges keep their previous values; only the
    /// attempt and failure counters move.
    pub async fn poll_once(&mut self) -> Result<DecodedSample, ReadError> {
        self.metrics.record_attempt();

        match self.source.read_frame().await {
            Ok(frame) => {
                let sample = decode(&frame);
                self.metrics.record(&sample);
                info!(
                    device = %self.device_name,
                    "Logged: V1={}mV, I={}mA, T1={}C",
                    sample.cell_voltages_mv[0], sample.current_ma, sample.temperatures_c[0]
                );
                Ok(sample)
            }
            Err(e) => {
                self.metrics.record_failure(e.kind());
                error!(device = %self.device_name, kind = e.kind(), "{}", e);
                Err(e)
            }
        }
    }

    /// Run the polling loop until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting BMS poller for '{}' on {} (interval: {:?})",
            self.device_name,
            self.source.describe(),
            self.interval
        );

        while !*shutdown.borrow() {
            // Failures are already logged and counted.
            let _ = self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("BMS poller for '{}' stopped", self.device_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use async_trait::async_trait;
    use bms_common::RegisterFrame;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays a fixed script of read results.
    struct ScriptedSource {
        script: VecDeque<Result<RegisterFrame, ReadError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<RegisterFrame, ReadError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl RegisterSource for ScriptedSource {
        async fn read_frame(&mut self) -> Result<RegisterFrame, ReadError> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(ReadError::Transport("script exhausted".to_string())))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn poller(script: Vec<Result<RegisterFrame, ReadError>>) -> BmsPoller<ScriptedSource> {
        BmsPoller::new(
            ScriptedSource::new(script),
            Arc::new(MetricsSink::new()),
            &DeviceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_successful_poll_updates_metrics() {
        let mut poller = poller(vec![Ok([3300, 3310, 3295, 3298, 65436, 250, 260])]);

        let sample = poller.poll_once().await.unwrap();

        assert_eq!(sample.current_ma, -100);
        assert_eq!(poller.metrics.latest(), Some(sample));
        assert_eq!(poller.metrics.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_leaves_metrics_unset() {
        let mut poller = poller(vec![Err(ReadError::Connection {
            port: "/dev/ttyUSB0".to_string(),
            reason: "No such file or directory".to_string(),
        })]);

        let err = poller.poll_once().await.unwrap_err();

        assert_eq!(err.kind(), "connection");
        assert!(poller.metrics.latest().is_none());
        assert!(!poller.metrics.render().contains("cell_index="));
        assert_eq!(poller.metrics.failures("connection"), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_sample() {
        let mut poller = poller(vec![
            Ok([3300, 3310, 3295, 3298, 150, 250, 260]),
            Err(ReadError::Exception("IllegalDataAddress".to_string())),
        ]);

        let first = poller.poll_once().await.unwrap();
        assert!(poller.poll_once().await.is_err());

        assert_eq!(poller.metrics.latest(), Some(first));
        assert!(poller.metrics.render().contains("bms_current_ma 150"));
        assert_eq!(poller.metrics.failures("protocol"), 1);
        assert_eq!(poller.metrics.attempts(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let poller = poller(vec![]);
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), poller.run(rx))
            .await
            .expect("poller should stop once shutdown sender is gone");
    }
}
