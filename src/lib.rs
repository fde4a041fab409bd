//! Modbus TCP console core
//!
//! A blocking Modbus TCP client for inspecting and changing the I/O map of a
//! single remote unit, plus a persistent store of human-readable labels for
//! its addresses.
//!
//! ```no_run
//! use modbus_console::{ModbusClient, NamesManager};
//!
//! let client = ModbusClient::new();
//! client.connect("192.168.1.10", 502, 1)?;
//! let names = NamesManager::open("modbus_names.json");
//! for (address, value) in client.read_coils(0, 8)? {
//!     println!("{} = {}", names.get_name("coils", address)?, value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod drivers;
pub mod names;
pub mod simulator;
pub mod types;

pub use config::{ClientConfig, NamesConfig};
pub use drivers::{ModbusClient, ModbusError};
pub use names::{Category, NameTable, NamesError, NamesManager};
pub use types::{BitMap, ConnectionInfo, Operation, ReadRange, RegisterSpace, WordMap};
