// Client and naming-store configuration

use crate::types::{ReadRange, RegisterSpace};
use std::path::PathBuf;
use std::time::Duration;

/// Default Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Default unit identifier
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Default snapshot location for address labels
pub const DEFAULT_NAMES_FILE: &str = "modbus_names.json";

/// Per-instance settings for [`crate::drivers::modbus::ModbusClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Read/write timeout applied to every request on the socket
    pub io_timeout: Duration,
    /// Default block for discrete input reads
    pub input_range: ReadRange,
    /// Default block for coil reads
    pub coil_range: ReadRange,
    /// Default block for holding register reads
    pub register_range: ReadRange,
}

impl ClientConfig {
    /// Default configuration with `timeout` used for both connect and I/O
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            io_timeout: timeout,
            ..Self::default()
        }
    }

    /// Default read range for `space`
    pub fn range(&self, space: RegisterSpace) -> ReadRange {
        match space {
            RegisterSpace::DiscreteInput => self.input_range,
            RegisterSpace::Coil => self.coil_range,
            RegisterSpace::HoldingRegister => self.register_range,
        }
    }

    /// Replace the default read range for `space`
    pub fn set_range(&mut self, space: RegisterSpace, range: ReadRange) {
        match space {
            RegisterSpace::DiscreteInput => self.input_range = range,
            RegisterSpace::Coil => self.coil_range = range,
            RegisterSpace::HoldingRegister => self.register_range = range,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            input_range: ReadRange::default(),
            coil_range: ReadRange::default(),
            register_range: ReadRange::default(),
        }
    }
}

/// Settings for [`crate::names::NamesManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamesConfig {
    pub path: PathBuf,
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_NAMES_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_first_sixteen_addresses() {
        let config = ClientConfig::default();
        for space in RegisterSpace::ALL {
            assert_eq!(config.range(space), ReadRange::new(0, 16));
        }
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn ranges_are_independent() {
        let mut config = ClientConfig::with_timeout(Duration::from_millis(250));
        config.set_range(RegisterSpace::Coil, ReadRange::new(100, 8));
        assert_eq!(config.coil_range, ReadRange::new(100, 8));
        assert_eq!(config.input_range, ReadRange::default());
        assert_eq!(config.register_range, ReadRange::default());
        assert_eq!(config.io_timeout, Duration::from_millis(250));
    }

    #[test]
    fn names_file_defaults_to_working_directory() {
        assert_eq!(NamesConfig::default().path, PathBuf::from("modbus_names.json"));
    }
}
