// Links underneath the Modbus client
// A Connector opens a Link to one unit; production code uses the tokio-modbus synchronous TCP context

use crate::config::ClientConfig;
use std::io;
use std::net::ToSocketAddrs;
use tokio_modbus::client::sync;
use tokio_modbus::slave::Slave;
use tokio_modbus::{Request, Response};

/// A live request/response channel to one remote unit.
///
/// Dropping the link closes it.
pub trait Link: Send {
    /// Sends one request and blocks for its reply.
    ///
    /// The outer error is a transport or framing failure; the inner one is an
    /// exception reported by the device.
    fn call(&mut self, request: Request<'static>) -> tokio_modbus::Result<Response>;
}

impl Link for sync::Context {
    fn call(&mut self, request: Request<'static>) -> tokio_modbus::Result<Response> {
        sync::Client::call(self, request)
    }
}

/// Opens links to `host:port`.
pub trait Connector: Send + Sync {
    type Link: Link;

    /// Open a link addressed to `unit_id`
    ///
    /// # Arguments
    /// * `host` - IP address or hostname
    /// * `port` - TCP port
    /// * `unit_id` - Unit identifier stamped on every request
    /// * `config` - Connect and I/O timeouts
    fn open(&self, host: &str, port: u16, unit_id: u8, config: &ClientConfig) -> io::Result<Self::Link>;
}

/// Connector for plain Modbus TCP sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Link = sync::Context;

    /// Resolve `host` and try each address in turn
    ///
    /// # Returns
    /// The first context that connects within `config.connect_timeout`, with
    /// `config.io_timeout` applied to every later request
    fn open(&self, host: &str, port: u16, unit_id: u8, config: &ClientConfig) -> io::Result<sync::Context> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match sync::tcp::connect_slave_with_timeout(addr, Slave(unit_id), Some(config.connect_timeout)) {
                Ok(mut context) => {
                    context.set_timeout(Some(config.io_timeout));
                    return Ok(context);
                }
                Err(e) => {
                    log::debug!("Connect attempt to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}:{} did not resolve to any address", host, port),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn refused_connection_is_an_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::with_timeout(Duration::from_millis(500));
        assert!(TcpConnector.open("127.0.0.1", port, 1, &config).is_err());
    }

    #[test]
    fn unresolvable_host_is_an_error() {
        let config = ClientConfig::with_timeout(Duration::from_millis(500));
        assert!(TcpConnector.open("no-such-host.invalid", 502, 1, &config).is_err());
    }

    #[test]
    fn connects_to_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig::with_timeout(Duration::from_secs(2));
        let context = TcpConnector.open("127.0.0.1", port, 1, &config);
        assert!(context.is_ok());
    }
}
