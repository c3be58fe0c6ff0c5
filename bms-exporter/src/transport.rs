//! Modbus RTU transport to the BMS.

use async_trait::async_trait;
use bms_common::{REGISTER_COUNT, RegisterFrame};
use tokio_modbus::client::{Client, Context};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::config::{DeviceConfig, Parity, SerialConfig};

/// Failure while reading a register frame.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The serial port could not be opened.
    #[error("Failed to connect to {port}: {reason}")]
    Connection { port: String, reason: String },
    /// The device answered with a Modbus exception response.
    #[error("Modbus read error: {0}")]
    Exception(String),
    /// I/O failure, timeout or malformed response.
    #[error("Error during polling: {0}")]
    Transport(String),
}

impl ReadError {
    /// Failure kind label used by the poll failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ReadError::Connection { .. } => "connection",
            ReadError::Exception(_) => "protocol",
            ReadError::Transport(_) => "transport",
        }
    }
}

/// Something that can produce one BMS register frame per call.
#[async_trait]
pub trait RegisterSource: Send {
    /// Read the full register frame.
    async fn read_frame(&mut self) -> Result<RegisterFrame, ReadError>;

    /// Short description used in log lines.
    fn describe(&self) -> String;
}

/// Reads the frame over a serial Modbus RTU line.
///
/// The port is opened for every read and closed again afterwards, so a
/// replugged adapter is picked up on the next tick.
pub struct RtuTransport {
    serial: SerialConfig,
    unit_id: u8,
    start_address: u16,
}

impl RtuTransport {
    pub fn new(serial: SerialConfig, device: &DeviceConfig) -> Self {
        Self {
            serial,
            unit_id: device.unit_id,
            start_address: device.start_address,
        }
    }

    fn connect(&self) -> Result<Context, ReadError> {
        let parity = match self.serial.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let stop_bits = match self.serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&self.serial.port, self.serial.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .timeout(self.serial.timeout());

        let serial =
            tokio_serial::SerialStream::open(&builder).map_err(|e| ReadError::Connection {
                port: self.serial.port.clone(),
                reason: e.to_string(),
            })?;

        Ok(rtu::attach_slave(serial, Slave(self.unit_id)))
    }

    async fn read_registers(&self, ctx: &mut Context) -> Result<Vec<u16>, ReadError> {
        let read = ctx.read_input_registers(self.start_address, REGISTER_COUNT as u16);

        tokio::time::timeout(self.serial.timeout(), read)
            .await
            .map_err(|_| {
                ReadError::Transport(format!(
                    "no response within {}ms",
                    self.serial.timeout_ms
                ))
            })?
            .map_err(|e| ReadError::Transport(e.to_string()))?
            .map_err(|e| ReadError::Exception(format!("{:?}", e)))
    }
}

#[async_trait]
impl RegisterSource for RtuTransport {
    async fn read_frame(&mut self) -> Result<RegisterFrame, ReadError> {
        let mut ctx = self.connect()?;

        let result = self.read_registers(&mut ctx).await;

        if let Err(e) = ctx.disconnect().await {
            debug!("Failed to close {}: {}", self.serial.port, e);
        }

        frame_from_registers(result?)
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud, unit {}",
            self.serial.port, self.serial.baud_rate, self.unit_id
        )
    }
}

/// Convert the register vector returned by the client into a fixed frame.
pub fn frame_from_registers(registers: Vec<u16>) -> Result<RegisterFrame, ReadError> {
    let actual = registers.len();
    registers.try_into().map_err(|_| {
        ReadError::Transport(format!(
            "expected {} registers, got {}",
            REGISTER_COUNT, actual
        ))
    })
}
