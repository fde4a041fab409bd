// Communication drivers module
//
// Everything needed to talk to a remote unit over Modbus TCP: the link seam
// and the client built on top of it.

/// Modbus TCP communication driver
/// Client with connection management and typed read/write operations
pub mod modbus;

/// Links to remote units
/// Connector/Link traits and the tokio-modbus TCP implementation
pub mod transport;

pub use modbus::{ModbusClient, ModbusError};
pub use transport::{Connector, Link, TcpConnector};
