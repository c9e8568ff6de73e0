//! Modbus TCP client for AC meters
//!
//! Reads single power values from meters such as the Carlo Gavazzi ET112
//! (through a Modbus TCP gateway) with connection and operation timeouts,
//! and reconnects transparently after transport failures.

use crate::config::{ModbusSourceConfig, RegisterEncoding, RegisterType};
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Modbus TCP client bound to one endpoint
pub struct ModbusClient {
    client: Option<tokio_modbus::client::Context>,
    ip: String,
    port: u16,
    connection_timeout: Duration,
    operation_timeout: Duration,
    logger: StructuredLogger,
}

impl ModbusClient {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            client: None,
            ip: ip.to_string(),
            port,
            connection_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_millis(700),
            logger: get_logger("modbus"),
        }
    }

    pub fn with_timeouts(mut self, connection: Duration, operation: Duration) -> Self {
        self.connection_timeout = connection;
        self.operation_timeout = operation;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Connect to the Modbus server
    pub async fn connect(&mut self) -> Result<()> {
        let address = self.address();
        self.logger
            .info(&format!("Connecting to Modbus server at {}", address));

        let socket_addr: std::net::SocketAddr = address
            .parse()
            .map_err(|e| BridgeError::modbus(format!("Invalid socket address: {}", e)))?;

        match timeout(self.connection_timeout, tcp::connect(socket_addr)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::modbus(format!(
                "Connection to {} failed: {}",
                address, e
            ))),
            Err(_) => Err(BridgeError::timeout(format!(
                "Connection to {} timed out",
                address
            ))),
        }
    }

    pub fn disconnect(&mut self) {
        if self.client.take().is_some() {
            self.logger.debug("Dropped Modbus connection");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Read `count` registers from the given table
    pub async fn read_registers(
        &mut self,
        unit_id: u8,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let timeout_duration = self.operation_timeout;
        self.logger.trace(&format!(
            "Reading {} {:?} registers from {} on unit {}",
            count, register_type, address, unit_id
        ));

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| BridgeError::modbus("Not connected to Modbus server"))?;
        client.set_slave(Slave(unit_id));

        let response = match register_type {
            RegisterType::Holding => {
                timeout(timeout_duration, client.read_holding_registers(address, count)).await
            }
            RegisterType::Input => {
                timeout(timeout_duration, client.read_input_registers(address, count)).await
            }
        };

        // Transport errors and Modbus exceptions arrive in separate layers
        match response {
            Ok(Ok(Ok(words))) => Ok(words),
            Ok(Ok(Err(exception))) => Err(BridgeError::modbus(format!(
                "Device exception at register {}: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(BridgeError::modbus(format!(
                "Connection error reading register {}: {}",
                address, e
            ))),
            Err(_) => Err(BridgeError::timeout(format!(
                "Read of register {} timed out",
                address
            ))),
        }
    }
}

/// Number of registers an encoding spans
pub fn register_count(encoding: RegisterEncoding) -> u16 {
    match encoding {
        RegisterEncoding::I32LswFirst | RegisterEncoding::I32 | RegisterEncoding::F32 => 2,
        RegisterEncoding::I16 | RegisterEncoding::U16 => 1,
    }
}

/// Decode a raw register value (before scaling)
pub fn decode_value(registers: &[u16], encoding: RegisterEncoding) -> Result<f64> {
    let needed = register_count(encoding) as usize;
    if registers.len() < needed {
        return Err(BridgeError::modbus(format!(
            "Expected {} registers, got {}",
            needed,
            registers.len()
        )));
    }
    let value = match encoding {
        RegisterEncoding::I32LswFirst => {
            (((registers[1] as u32) << 16) | registers[0] as u32) as i32 as f64
        }
        RegisterEncoding::I32 => (((registers[0] as u32) << 16) | registers[1] as u32) as i32 as f64,
        RegisterEncoding::F32 => decode_32bit_float(registers)? as f64,
        RegisterEncoding::I16 => registers[0] as i16 as f64,
        RegisterEncoding::U16 => registers[0] as f64,
    };
    Ok(value)
}

/// Decode 32-bit float from two 16-bit registers (big-endian)
pub fn decode_32bit_float(registers: &[u16]) -> Result<f32> {
    if registers.len() < 2 {
        return Err(BridgeError::modbus(
            "Insufficient registers for 32-bit float",
        ));
    }

    let bytes = [
        (registers[0] >> 8) as u8,
        (registers[0] & 0xFF) as u8,
        (registers[1] >> 8) as u8,
        (registers[1] & 0xFF) as u8,
    ];
    Ok(f32::from_be_bytes(bytes))
}

/// Connection manager with automatic reconnection
pub struct ModbusConnectionManager {
    client: ModbusClient,
    max_retry_attempts: u32,
    retry_delay: Duration,
    logger: StructuredLogger,
}

impl ModbusConnectionManager {
    pub fn new(client: ModbusClient, max_retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retry_attempts: max_retry_attempts.max(1),
            retry_delay,
            logger: get_logger("modbus_manager"),
        }
    }

    pub fn client(&self) -> &ModbusClient {
        &self.client
    }

    /// Read and scale one value, reconnecting after transport failures
    pub async fn read_value(&mut self, source: &ModbusSourceConfig) -> Result<f64> {
        let count = register_count(source.encoding);
        let mut attempts = 0;

        loop {
            if !self.client.is_connected()
                && let Err(e) = self.client.connect().await
            {
                attempts += 1;
                if attempts >= self.max_retry_attempts {
                    return Err(e);
                }
                self.logger
                    .warn(&format!("Connection attempt {} failed: {}", attempts, e));
                sleep(self.retry_delay).await;
                continue;
            }

            match self
                .client
                .read_registers(source.unit_id, source.register_type, source.register, count)
                .await
            {
                Ok(words) => return Ok(decode_value(&words, source.encoding)? * source.scale),
                Err(e) if Self::is_connection_error(&e) => {
                    self.logger
                        .warn(&format!("Read failed due to connection error: {}", e));
                    self.client.disconnect();
                    attempts += 1;
                    if attempts >= self.max_retry_attempts {
                        return Err(e);
                    }
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_connection_error(error: &BridgeError) -> bool {
        match error {
            BridgeError::Modbus { message } => {
                message.contains("Connection")
                    || message.contains("connection")
                    || message.contains("Not connected")
            }
            BridgeError::Timeout { .. } => true,
            _ => false,
        }
    }
}
