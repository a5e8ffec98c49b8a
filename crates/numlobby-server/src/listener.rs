use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};

use crate::config::LobbyConfig;
use crate::error::LobbyError;

/// Bind a listener on the first free port of the configured range.
/// A `port_range_start` of `0` binds an OS-assigned port instead.
pub fn bind_first_available(config: &LobbyConfig) -> Result<TcpListener, LobbyError> {
    let ip: IpAddr = config
        .bind_addr
        .parse()
        .map_err(|_| LobbyError::InvalidAddress(config.bind_addr.clone()))?;

    if config.port_range_start == 0 {
        return bind(SocketAddr::new(ip, 0), config.backlog).map_err(LobbyError::from);
    }

    for port in config.port_range_start..config.port_range_end {
        match bind(SocketAddr::new(ip, port), config.backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::trace!(port, error = %e, "Port unavailable"),
        }
    }

    Err(LobbyError::NoAvailablePort {
        start: config.port_range_start,
        end: config.port_range_end,
    })
}

fn bind(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(addr)?;
    socket.listen(backlog)
}
