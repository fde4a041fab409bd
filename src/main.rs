// Command-line front end
// Connects to one Modbus TCP unit, reads/writes its I/O map and manages address labels

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use modbus_console::config::{DEFAULT_NAMES_FILE, DEFAULT_PORT, DEFAULT_UNIT_ID};
use modbus_console::simulator::{self, SimulatedDevice};
use modbus_console::{Category, ClientConfig, ModbusClient, NamesManager, ReadRange, RegisterSpace};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "modbus-console")]
#[command(about = "Inspect and change a Modbus TCP device, with named addresses", long_about = None)]
struct Cli {
    /// Device host name or IP address
    #[arg(long, env = "MODBUS_HOST", default_value = "localhost", global = true)]
    host: String,

    /// Device TCP port
    #[arg(long, env = "MODBUS_PORT", default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Unit identifier
    #[arg(long, env = "MODBUS_UNIT_ID", default_value_t = DEFAULT_UNIT_ID, global = true)]
    unit_id: u8,

    /// Address label snapshot
    #[arg(long, env = "MODBUS_NAMES_FILE", default_value = DEFAULT_NAMES_FILE, global = true)]
    names_file: PathBuf,

    /// Connect and I/O timeout in milliseconds
    #[arg(long, env = "MODBUS_TIMEOUT_MS", default_value_t = 5000, global = true)]
    timeout_ms: u64,

    /// Log filter, e.g. `info` or `modbus_console=debug`
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one or all register spaces, labeled
    Read {
        #[arg(value_enum, default_value = "all")]
        space: SpaceArg,

        /// First address (defaults to the configured range)
        #[arg(long)]
        start: Option<u16>,

        /// Number of addresses (defaults to the configured range)
        #[arg(long)]
        count: Option<u16>,
    },

    /// Write a single coil
    WriteCoil {
        address: u16,
        #[arg(value_enum)]
        value: CoilValue,
    },

    /// Write a single holding register
    WriteRegister { address: u16, value: u16 },

    /// Manage address labels
    Names {
        #[command(subcommand)]
        action: NamesAction,
    },

    /// Serve an in-memory device over Modbus TCP
    Simulate {
        #[arg(long, default_value = "127.0.0.1:5020")]
        bind: String,

        /// Addresses per register space
        #[arg(long, default_value_t = 1024)]
        size: usize,
    },
}

#[derive(Subcommand)]
enum NamesAction {
    /// Print every label
    List,
    /// Set the label of one address
    Set {
        category: String,
        address: u16,
        label: String,
    },
    /// Remove the label of one address
    Remove { category: String, address: u16 },
    /// Restore the default labels
    Reset,
    /// Export all labels as JSON
    Export { path: PathBuf },
    /// Replace all labels from a JSON export
    Import { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum SpaceArg {
    Inputs,
    Coils,
    Registers,
    All,
}

impl SpaceArg {
    fn spaces(self) -> Vec<RegisterSpace> {
        match self {
            SpaceArg::Inputs => vec![RegisterSpace::DiscreteInput],
            SpaceArg::Coils => vec![RegisterSpace::Coil],
            SpaceArg::Registers => vec![RegisterSpace::HoldingRegister],
            SpaceArg::All => RegisterSpace::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CoilValue {
    On,
    Off,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new().parse_filters(&cli.log_level).init();

    let names = NamesManager::open(cli.names_file.clone());
    let endpoint = Endpoint {
        host: cli.host,
        port: cli.port,
        unit_id: cli.unit_id,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    match cli.command {
        Commands::Read { space, start, count } => {
            let client = endpoint.connect()?;
            for space in space.spaces() {
                let default = client.read_range(space);
                let range = ReadRange::new(start.unwrap_or(default.start), count.unwrap_or(default.count));
                print_space(&client, &names, space, range)?;
            }
            client.disconnect();
        }
        Commands::WriteCoil { address, value } => {
            let client = endpoint.connect()?;
            client
                .write_coil(address, matches!(value, CoilValue::On))
                .with_context(|| format!("writing coil {}", address))?;
            println!("{} ({}) written", names.label(Category::Coils, address), address);
        }
        Commands::WriteRegister { address, value } => {
            let client = endpoint.connect()?;
            client
                .write_register(address, value)
                .with_context(|| format!("writing register {}", address))?;
            println!("{} ({}) written", names.label(Category::Registers, address), address);
        }
        Commands::Names { action } => run_names(&names, action)?,
        Commands::Simulate { bind, size } => {
            // The client side stays blocking, so only the simulator gets a runtime
            let runtime = tokio::runtime::Runtime::new().context("starting simulator runtime")?;
            runtime.block_on(async {
                let listener = tokio::net::TcpListener::bind(bind.as_str())
                    .await
                    .with_context(|| format!("binding {}", bind))?;
                simulator::serve(listener, SimulatedDevice::with_size(size))
                    .await
                    .context("simulator stopped")
            })?;
        }
    }
    Ok(())
}

struct Endpoint {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl Endpoint {
    fn connect(&self) -> Result<ModbusClient> {
        let client = ModbusClient::with_config(ClientConfig::with_timeout(self.timeout));
        client.connect(&self.host, self.port, self.unit_id)?;
        Ok(client)
    }
}

fn print_space(client: &ModbusClient, names: &NamesManager, space: RegisterSpace, range: ReadRange) -> Result<()> {
    let category = Category::from(space);
    let context = || format!("reading {}", space);
    println!("== {} ==", space);
    match space {
        RegisterSpace::DiscreteInput => {
            for (address, value) in client.read_discrete_inputs(range.start, range.count).with_context(context)? {
                println!("{:<24} {:>5} = {}", names.label(category, address), address, value);
            }
        }
        RegisterSpace::Coil => {
            for (address, value) in client.read_coils(range.start, range.count).with_context(context)? {
                println!("{:<24} {:>5} = {}", names.label(category, address), address, value);
            }
        }
        RegisterSpace::HoldingRegister => {
            for (address, value) in client.read_holding_registers(range.start, range.count).with_context(context)? {
                println!("{:<24} {:>5} = {}", names.label(category, address), address, value);
            }
        }
    }
    Ok(())
}

fn run_names(names: &NamesManager, action: NamesAction) -> Result<()> {
    match action {
        NamesAction::List => {
            let table = names.get_all_names();
            for category in Category::ALL {
                println!("== {} ==", category);
                for (address, label) in table.category(category) {
                    println!("{:>5} {}", address, label);
                }
            }
        }
        NamesAction::Set {
            category,
            address,
            label,
        } => names.set_name(&category, address, &label)?,
        NamesAction::Remove { category, address } => {
            if !names.remove_name(&category, address)? {
                println!("No label stored for {} {}", category, address);
            }
        }
        NamesAction::Reset => names.reset_to_defaults()?,
        NamesAction::Export { path } => names.export_to_file(&path)?,
        NamesAction::Import { path } => names.import_from_file(&path)?,
    }
    Ok(())
}
