// Simulated Modbus device
// In-memory register bank served through tokio-modbus, usable in place of a real unit

use crate::config::ClientConfig;
use crate::drivers::transport::{Connector, Link};
use futures::future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::{Address, ExceptionCode, Quantity, Request, Response};

/// Largest quantity of bits one read may ask for
pub const MAX_READ_BITS: Quantity = 2000;

/// Largest quantity of registers one read may ask for
pub const MAX_READ_REGISTERS: Quantity = 125;

/// Link lifecycle as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened { host: String, port: u16 },
    Closed,
}

#[derive(Debug)]
struct DeviceState {
    discrete_inputs: Vec<bool>,
    coils: Vec<bool>,
    holding_registers: Vec<u16>,
    events: Vec<LinkEvent>,
    request_count: usize,
    last_unit_id: Option<u8>,
    refuse_connections: bool,
    reject_zero_quantity: bool,
    busy: bool,
    drop_next: bool,
}

impl DeviceState {
    fn handle(&mut self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        self.request_count += 1;
        if self.busy {
            return Err(ExceptionCode::ServerDeviceBusy);
        }
        let reject_zero = self.reject_zero_quantity;
        match request {
            Request::ReadCoils(addr, cnt) => {
                read_block(&self.coils, addr, cnt, MAX_READ_BITS, reject_zero).map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(addr, cnt) => {
                read_block(&self.discrete_inputs, addr, cnt, MAX_READ_BITS, reject_zero)
                    .map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                read_block(&self.holding_registers, addr, cnt, MAX_READ_REGISTERS, reject_zero)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteSingleCoil(addr, value) => {
                let slot = self
                    .coils
                    .get_mut(usize::from(addr))
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                *slot = value;
                Ok(Response::WriteSingleCoil(addr, value))
            }
            Request::WriteSingleRegister(addr, value) => {
                let slot = self
                    .holding_registers
                    .get_mut(usize::from(addr))
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                *slot = value;
                Ok(Response::WriteSingleRegister(addr, value))
            }
            other => {
                log::warn!("Simulator: unimplemented function in request {:?}", other);
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

fn read_block<V: Copy>(
    bank: &[V],
    addr: Address,
    cnt: Quantity,
    max: Quantity,
    reject_zero: bool,
) -> Result<Vec<V>, ExceptionCode> {
    if cnt > max || (reject_zero && cnt == 0) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = usize::from(addr);
    let end = start + usize::from(cnt);
    bank.get(start..end)
        .map(<[V]>::to_vec)
        .ok_or(ExceptionCode::IllegalDataAddress)
}

/// A Modbus device held in memory.
///
/// Clones share the same state, so a test can keep one handle for assertions
/// while the client owns links opened through [`SimulatedDevice::connector`]
/// or a TCP server started with [`spawn_tcp`].
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Device with 1024 addresses in each space, all zero.
    pub fn new() -> Self {
        Self::with_size(1024)
    }

    /// Device with `size` addresses in each space; anything beyond is an illegal address.
    pub fn with_size(size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                discrete_inputs: vec![false; size],
                coils: vec![false; size],
                holding_registers: vec![0; size],
                events: Vec::new(),
                request_count: 0,
                last_unit_id: None,
                refuse_connections: false,
                reject_zero_quantity: false,
                busy: false,
                drop_next: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector whose links call straight into this device, without a socket
    pub fn connector(&self) -> SimulatorConnector {
        SimulatorConnector { device: self.clone() }
    }

    /// Set one discrete input; addresses outside the bank are ignored
    pub fn set_discrete_input(&self, address: u16, value: bool) {
        if let Some(slot) = self.lock().discrete_inputs.get_mut(usize::from(address)) {
            *slot = value;
        }
    }

    /// Set one coil; addresses outside the bank are ignored
    pub fn set_coil(&self, address: u16, value: bool) {
        if let Some(slot) = self.lock().coils.get_mut(usize::from(address)) {
            *slot = value;
        }
    }

    /// Set one holding register; addresses outside the bank are ignored
    pub fn set_holding_register(&self, address: u16, value: u16) {
        if let Some(slot) = self.lock().holding_registers.get_mut(usize::from(address)) {
            *slot = value;
        }
    }

    /// Current coil state, `None` outside the bank
    pub fn coil(&self, address: u16) -> Option<bool> {
        self.lock().coils.get(usize::from(address)).copied()
    }

    /// Current register value, `None` outside the bank
    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.lock().holding_registers.get(usize::from(address)).copied()
    }

    /// Make every following in-memory connection attempt fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Answer zero-quantity reads with `IllegalDataValue`, as strict devices do.
    pub fn reject_zero_quantity(&self, reject: bool) {
        self.lock().reject_zero_quantity = reject;
    }

    /// Answer every request with `ServerDeviceBusy`.
    pub fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
    }

    /// Fail the next request on any in-memory link with `ConnectionReset`.
    pub fn drop_next_request(&self) {
        self.lock().drop_next = true;
    }

    /// Every link open and close seen so far, oldest first
    pub fn events(&self) -> Vec<LinkEvent> {
        self.lock().events.clone()
    }

    /// Number of in-memory links opened
    pub fn opened_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| matches!(event, LinkEvent::Opened { .. }))
            .count()
    }

    /// Number of in-memory links closed
    pub fn closed_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| matches!(event, LinkEvent::Closed))
            .count()
    }

    /// Number of requests the device has answered, exceptions included
    pub fn request_count(&self) -> usize {
        self.lock().request_count
    }

    /// Unit id of the most recent in-memory request
    pub fn last_unit_id(&self) -> Option<u8> {
        self.lock().last_unit_id
    }

    /// Answer one request against the register banks
    ///
    /// # Returns
    /// The response, or the exception a real unit would send back
    pub fn handle(&self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        self.lock().handle(request)
    }
}

impl tokio_modbus::server::Service for SimulatedDevice {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

/// Connector whose links talk to a [`SimulatedDevice`]
#[derive(Debug, Clone)]
pub struct SimulatorConnector {
    device: SimulatedDevice,
}

impl Connector for SimulatorConnector {
    type Link = SimulatedLink;

    fn open(&self, host: &str, port: u16, unit_id: u8, _config: &ClientConfig) -> io::Result<SimulatedLink> {
        let mut state = self.device.lock();
        if state.refuse_connections {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{}:{} refused the connection", host, port),
            ));
        }
        state.events.push(LinkEvent::Opened {
            host: host.to_string(),
            port,
        });
        Ok(SimulatedLink {
            device: self.device.clone(),
            unit_id,
        })
    }
}

/// In-memory link; records [`LinkEvent::Closed`] when dropped
#[derive(Debug)]
pub struct SimulatedLink {
    device: SimulatedDevice,
    unit_id: u8,
}

impl Link for SimulatedLink {
    fn call(&mut self, request: Request<'static>) -> tokio_modbus::Result<Response> {
        let mut state = self.device.lock();
        if state.drop_next {
            state.drop_next = false;
            return Err(tokio_modbus::Error::Transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        state.last_unit_id = Some(self.unit_id);
        Ok(state.handle(request))
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.device.lock().events.push(LinkEvent::Closed);
    }
}

/// Serves `device` over Modbus TCP until the listener fails.
pub async fn serve(listener: TcpListener, device: SimulatedDevice) -> io::Result<()> {
    log::info!("Simulator listening on {}", listener.local_addr()?);
    let server = Server::new(listener);
    let new_service = |socket_addr: SocketAddr| {
        log::debug!("Simulator accepted {}", socket_addr);
        Ok(Some(device.clone()))
    };
    let on_connected = |stream, socket_addr| async move { accept_tcp_connection(stream, socket_addr, new_service) };
    let on_process_error = |err| {
        log::debug!("Simulator connection ended: {}", err);
    };
    server.serve(&on_connected, on_process_error).await
}

/// Binds `addr` and serves `device` from a background thread with its own runtime.
///
/// # Returns
/// The bound address, which carries the real port when `addr` asked for port 0
pub fn spawn_tcp(addr: SocketAddr, device: SimulatedDevice) -> io::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::spawn(move || {
        let result = runtime.block_on(async move {
            let listener = TcpListener::from_std(listener)?;
            serve(listener, device).await
        });
        if let Err(e) = result {
            log::error!("Simulator on {} stopped: {}", local, e);
        }
    });
    Ok(local)
}
