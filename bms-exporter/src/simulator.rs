//! Simulated BMS for demo mode.
//!
//! Produces slowly drifting cell voltages, current and temperatures so the
//! exporter can be tried without a serial adapter attached.

use async_trait::async_trait;
use bms_common::{CELL_COUNT, DecodedSample, RegisterFrame, TEMPERATURE_COUNT};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::transport::{ReadError, RegisterSource};

const BASE_CELL_VOLTAGE: f64 = 3400.0;
const VOLTAGE_VARIATION: f64 = 150.0;
const VOLTAGE_DRIFT: i32 = 5;
const CURRENT_BASE: f64 = 2000.0;
const CURRENT_VARIATION: f64 = 3000.0;
const TEMP_BASE: f64 = 25.0;
const TEMP_VARIATION: f64 = 10.0;

/// A BMS whose readings follow a bounded random walk.
pub struct SimulatedBms {
    rng: SmallRng,
    cell_voltages: [f64; CELL_COUNT],
    voltage_targets: [f64; CELL_COUNT],
    current: f64,
    current_target: f64,
    temperatures: [f64; TEMPERATURE_COUNT],
    temp_targets: [f64; TEMPERATURE_COUNT],
}

impl SimulatedBms {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// Deterministic simulator, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        let cells = [
            BASE_CELL_VOLTAGE,
            BASE_CELL_VOLTAGE + 10.0,
            BASE_CELL_VOLTAGE - 5.0,
            BASE_CELL_VOLTAGE + 5.0,
        ];
        let temps = [TEMP_BASE, TEMP_BASE + 1.0];

        Self {
            rng,
            cell_voltages: cells,
            voltage_targets: cells,
            current: CURRENT_BASE,
            current_target: CURRENT_BASE,
            temperatures: temps,
            temp_targets: temps,
        }
    }

    /// Advance the simulation by one tick and return the new reading.
    pub fn step(&mut self) -> DecodedSample {
        for i in 0..CELL_COUNT {
            let drift = self.rng.random_range(-VOLTAGE_DRIFT..=VOLTAGE_DRIFT) as f64;
            self.voltage_targets[i] = (self.voltage_targets[i] + drift).clamp(
                BASE_CELL_VOLTAGE - VOLTAGE_VARIATION,
                BASE_CELL_VOLTAGE + VOLTAGE_VARIATION,
            );
            self.cell_voltages[i] = (self.cell_voltages[i] * 9.0 + self.voltage_targets[i]) / 10.0
                + self.rng.random_range(-2.0..=2.0);
        }

        self.current_target = (self.current_target + self.rng.random_range(-50.0..=50.0)).clamp(
            CURRENT_BASE - CURRENT_VARIATION,
            CURRENT_BASE + CURRENT_VARIATION,
        );
        self.current = (self.current * 8.0 + self.current_target) / 9.0
            + self.rng.random_range(-10.0..=10.0);

        for i in 0..TEMPERATURE_COUNT {
            self.temp_targets[i] = (self.temp_targets[i] + self.rng.random_range(-0.1..=0.1))
                .clamp(TEMP_BASE - TEMP_VARIATION, TEMP_BASE + TEMP_VARIATION);
            self.temperatures[i] = (self.temperatures[i] * 9.0 + self.temp_targets[i]) / 10.0;
        }

        self.sample()
    }

    fn sample(&self) -> DecodedSample {
        DecodedSample {
            cell_voltages_mv: self.cell_voltages.map(|v| v.round() as u16),
            current_ma: self.current.round() as i16,
            temperatures_c: self.temperatures.map(|t| t.round() as i16),
        }
    }

    /// Force the current target, e.g. to exercise the charge (negative) path.
    pub fn set_current_target(&mut self, milliamps: f64) {
        self.current_target = milliamps;
        self.current = milliamps;
    }
}

impl Default for SimulatedBms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterSource for SimulatedBms {
    async fn read_frame(&mut self) -> Result<RegisterFrame, ReadError> {
        Ok(self.step().to_frame())
    }

    fn describe(&self) -> String {
        "simulated BMS".to_string()
    }
}
