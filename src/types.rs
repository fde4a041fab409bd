// Shared data types
// Register spaces, read ranges and connection details used by the client and the naming store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bit values keyed by address, ascending.
pub type BitMap = BTreeMap<u16, bool>;

/// Register values keyed by address, ascending.
pub type WordMap = BTreeMap<u16, u16>;

/// The three addressable spaces of a remote unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegisterSpace {
    /// Read-only single bit
    DiscreteInput,
    /// Read/write single bit
    Coil,
    /// Read/write 16-bit unsigned value
    HoldingRegister,
}

impl RegisterSpace {
    pub const ALL: [RegisterSpace; 3] = [
        RegisterSpace::DiscreteInput,
        RegisterSpace::Coil,
        RegisterSpace::HoldingRegister,
    ];
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterSpace::DiscreteInput => write!(f, "discrete inputs"),
            RegisterSpace::Coil => write!(f, "coils"),
            RegisterSpace::HoldingRegister => write!(f, "holding registers"),
        }
    }
}

/// Contiguous block of addresses `[start, start + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRange {
    pub start: u16,
    pub count: u16,
}

impl ReadRange {
    pub const fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    /// Returns false when the block would run past address 65535.
    pub fn fits_address_space(&self) -> bool {
        self.count == 0 || u32::from(self.start) + u32::from(self.count) - 1 <= u32::from(u16::MAX)
    }

    /// Addresses of the block in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        (0..self.count).map(move |offset| start.wrapping_add(offset))
    }
}

impl Default for ReadRange {
    fn default() -> Self {
        Self::new(0, 16)
    }
}

/// Endpoint and unit of the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (unit {})", self.host, self.port, self.unit_id)
    }
}

/// The five requests the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadDiscreteInputs,
    ReadCoils,
    ReadHoldingRegisters,
    WriteCoil,
    WriteRegister,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ReadDiscreteInputs => "read discrete inputs",
            Operation::ReadCoils => "read coils",
            Operation::ReadHoldingRegisters => "read holding registers",
            Operation::WriteCoil => "write single coil",
            Operation::WriteRegister => "write single register",
        };
        f.write_str(name)
    }
}
