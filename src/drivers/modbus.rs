// Modbus TCP client implementation
// Connection management plus the five read/write operations against a single remote unit

use crate::config::ClientConfig;
use crate::drivers::transport::{Connector, Link, TcpConnector};
use crate::types::{BitMap, ConnectionInfo, Operation, ReadRange, RegisterSpace, WordMap};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_modbus::{ExceptionCode, Request, Response};

/// Modbus communication error type
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("Not connected to a Modbus server")]
    NotConnected,
    #[error("Device rejected {operation}: {code:?}")]
    Protocol {
        operation: Operation,
        code: ExceptionCode,
    },
    #[error("Connection dropped during {operation}: {source}")]
    TransportDropped {
        operation: Operation,
        source: io::Error,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Address range starting at {start} with {count} entries exceeds address 65535")]
    InvalidRange { start: u16, count: u16 },
}

impl ModbusError {
    /// Exception code reported by the device, if this is a protocol error
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            ModbusError::Protocol { code, .. } => Some(u8::from(*code)),
            _ => None,
        }
    }
}

struct Connection<L> {
    info: ConnectionInfo,
    link: L,
}

/// Everything guarded by the client's lock
struct Session<L> {
    connection: Option<Connection<L>>,
    config: ClientConfig,
}

impl<L: Link> Session<L> {
    /// Drops the live link, if any. Returns the endpoint that was closed.
    fn close(&mut self) -> Option<ConnectionInfo> {
        self.connection.take().map(|connection| connection.info)
    }
}

/// Modbus TCP client
///
/// Holds at most one live connection. All operations take `&self` and are
/// serialized by an internal lock, so one client can be shared between threads
/// through an `Arc`; at most one request is on the wire at any time.
pub struct ModbusClient<C: Connector = TcpConnector> {
    connector: C,
    session: Mutex<Session<C::Link>>,
}

impl ModbusClient<TcpConnector> {
    /// Create a TCP client with default configuration
    ///
    /// # Returns
    /// A disconnected client with 5 second timeouts and 0..16 default read ranges
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a TCP client with custom configuration
    ///
    /// # Arguments
    /// * `config` - Timeouts and default read ranges
    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }
}

impl Default for ModbusClient<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ModbusClient<C> {
    /// Create a client that opens its links through `connector`
    ///
    /// # Arguments
    /// * `connector` - Source of links (TCP, or an in-memory device in tests)
    /// * `config` - Timeouts and default read ranges
    pub fn with_connector(connector: C, config: ClientConfig) -> Self {
        Self {
            connector,
            session: Mutex::new(Session {
                connection: None,
                config,
            }),
        }
    }

    // The session is left consistent on every exit path, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, Session<C::Link>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to a Modbus server
    ///
    /// An existing connection is closed before the new one is opened.
    ///
    /// # Arguments
    /// * `host` - IP address or hostname
    /// * `port` - TCP port (usually 502)
    /// * `unit_id` - Unit identifier sent with every request
    ///
    /// # Returns
    /// Ok(()) once connected; `ConnectionFailed` otherwise, leaving the client disconnected
    pub fn connect(&self, host: &str, port: u16, unit_id: u8) -> Result<(), ModbusError> {
        let mut session = self.lock();
        if let Some(previous) = session.close() {
            log::info!("Closing connection to {} before reconnecting", previous);
        }

        match self.connector.open(host, port, unit_id, &session.config) {
            Ok(link) => {
                let info = ConnectionInfo {
                    host: host.to_string(),
                    port,
                    unit_id,
                };
                log::info!("Connected to Modbus server at {}", info);
                session.connection = Some(Connection { info, link });
                Ok(())
            }
            Err(source) => {
                log::error!("Failed to connect to Modbus server at {}:{} (unit {}): {}", host, port, unit_id, source);
                Err(ModbusError::ConnectionFailed {
                    host: host.to_string(),
                    port,
                    source,
                })
            }
        }
    }

    /// Disconnect from the Modbus server. Does nothing when already disconnected.
    pub fn disconnect(&self) {
        if let Some(info) = self.lock().close() {
            log::info!("Disconnected from Modbus server at {}", info);
        }
    }

    /// Check whether a connection is established
    pub fn is_connected(&self) -> bool {
        self.lock().connection.is_some()
    }

    /// Endpoint and unit of the live connection
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.lock().connection.as_ref().map(|connection| connection.info.clone())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ClientConfig {
        self.lock().config.clone()
    }

    /// Default read range for `space`
    pub fn read_range(&self, space: RegisterSpace) -> ReadRange {
        self.lock().config.range(space)
    }

    /// Change the default read range for `space`
    ///
    /// Applies to the `*_default` read operations of this client only.
    pub fn set_read_range(&self, space: RegisterSpace, range: ReadRange) {
        self.lock().config.set_range(space, range);
    }

    /// Read discrete inputs
    ///
    /// # Arguments
    /// * `start` - First input address
    /// * `count` - Number of inputs to read (0 is sent to the device as-is)
    ///
    /// # Returns
    /// Map of exactly `count` ascending addresses starting at `start`
    pub fn read_discrete_inputs(&self, start: u16, count: u16) -> Result<BitMap, ModbusError> {
        let range = ReadRange::new(start, count);
        let operation = Operation::ReadDiscreteInputs;
        match self.execute(operation, Some(range), Request::ReadDiscreteInputs(start, count))? {
            Response::ReadDiscreteInputs(bits) => bit_map(range, bits),
            other => Err(unexpected(operation, other)),
        }
    }

    /// Read coils
    ///
    /// # Arguments
    /// * `start` - First coil address
    /// * `count` - Number of coils to read (0 is sent to the device as-is)
    ///
    /// # Returns
    /// Map of exactly `count` ascending addresses starting at `start`
    pub fn read_coils(&self, start: u16, count: u16) -> Result<BitMap, ModbusError> {
        let range = ReadRange::new(start, count);
        let operation = Operation::ReadCoils;
        match self.execute(operation, Some(range), Request::ReadCoils(start, count))? {
            Response::ReadCoils(bits) => bit_map(range, bits),
            other => Err(unexpected(operation, other)),
        }
    }

    /// Read holding registers
    ///
    /// # Arguments
    /// * `start` - First register address
    /// * `count` - Number of registers to read (0 is sent to the device as-is)
    ///
    /// # Returns
    /// Map of exactly `count` ascending addresses starting at `start`
    pub fn read_holding_registers(&self, start: u16, count: u16) -> Result<WordMap, ModbusError> {
        let range = ReadRange::new(start, count);
        let operation = Operation::ReadHoldingRegisters;
        match self.execute(operation, Some(range), Request::ReadHoldingRegisters(start, count))? {
            Response::ReadHoldingRegisters(words) if words.len() == usize::from(count) => {
                Ok(range.addresses().zip(words).collect())
            }
            Response::ReadHoldingRegisters(words) => Err(ModbusError::InvalidResponse(format!(
                "expected {} registers, device returned {}",
                count,
                words.len()
            ))),
            other => Err(unexpected(operation, other)),
        }
    }

    /// Read the configured default block of discrete inputs
    pub fn read_discrete_inputs_default(&self) -> Result<BitMap, ModbusError> {
        let range = self.read_range(RegisterSpace::DiscreteInput);
        self.read_discrete_inputs(range.start, range.count)
    }

    /// Read the configured default block of coils
    pub fn read_coils_default(&self) -> Result<BitMap, ModbusError> {
        let range = self.read_range(RegisterSpace::Coil);
        self.read_coils(range.start, range.count)
    }

    /// Read the configured default block of holding registers
    pub fn read_holding_registers_default(&self) -> Result<WordMap, ModbusError> {
        let range = self.read_range(RegisterSpace::HoldingRegister);
        self.read_holding_registers(range.start, range.count)
    }

    /// Write a single coil
    ///
    /// # Arguments
    /// * `address` - Coil address
    /// * `value` - New state
    ///
    /// # Returns
    /// Ok(()) once the device has echoed the write
    pub fn write_coil(&self, address: u16, value: bool) -> Result<(), ModbusError> {
        let operation = Operation::WriteCoil;
        match self.execute(operation, None, Request::WriteSingleCoil(address, value))? {
            Response::WriteSingleCoil(echo_address, echo_value) if echo_address == address && echo_value == value => {
                log::info!("Coil {} set to {}", address, value);
                Ok(())
            }
            other => Err(unexpected(operation, other)),
        }
    }

    /// Write a single holding register
    ///
    /// # Arguments
    /// * `address` - Register address
    /// * `value` - New value
    ///
    /// # Returns
    /// Ok(()) once the device has echoed the write
    pub fn write_register(&self, address: u16, value: u16) -> Result<(), ModbusError> {
        let operation = Operation::WriteRegister;
        match self.execute(operation, None, Request::WriteSingleRegister(address, value))? {
            Response::WriteSingleRegister(echo_address, echo_value) if echo_address == address && echo_value == value => {
                log::info!("Register {} set to {}", address, value);
                Ok(())
            }
            other => Err(unexpected(operation, other)),
        }
    }

    /// One request/response round-trip under the session lock
    fn execute(
        &self,
        operation: Operation,
        range: Option<ReadRange>,
        request: Request<'static>,
    ) -> Result<Response, ModbusError> {
        let mut session = self.lock();
        let connection = session.connection.as_mut().ok_or(ModbusError::NotConnected)?;

        if let Some(range) = range {
            if !range.fits_address_space() {
                return Err(ModbusError::InvalidRange {
                    start: range.start,
                    count: range.count,
                });
            }
        }

        log::debug!("{} on {}: {:?}", operation, connection.info, request);
        match connection.link.call(request) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(code)) => {
                log::warn!("{} on {} rejected with {:?}", operation, connection.info, code);
                Err(ModbusError::Protocol { operation, code })
            }
            Err(tokio_modbus::Error::Transport(source)) => {
                log::error!("Transport failure during {} on {}: {}", operation, connection.info, source);
                session.close();
                Err(ModbusError::TransportDropped { operation, source })
            }
            Err(other) => {
                log::error!("{} on {} failed: {}", operation, connection.info, other);
                Err(ModbusError::InvalidResponse(other.to_string()))
            }
        }
    }
}

// Devices pad bit replies to whole bytes
fn bit_map(range: ReadRange, mut bits: Vec<bool>) -> Result<BitMap, ModbusError> {
    let count = usize::from(range.count);
    if bits.len() < count {
        return Err(ModbusError::InvalidResponse(format!(
            "expected {} bits, device returned {}",
            count,
            bits.len()
        )));
    }
    bits.truncate(count);
    Ok(range.addresses().zip(bits).collect())
}

fn unexpected(operation: Operation, response: Response) -> ModbusError {
    ModbusError::InvalidResponse(format!("unexpected reply to {}: {:?}", operation, response))
}

impl<C: Connector> Drop for ModbusClient<C> {
    /// Close the link when the client goes away
    fn drop(&mut self) {
        self.disconnect();
    }
}
