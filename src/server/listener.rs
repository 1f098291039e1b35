use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};

/// Binds a non-blocking listening socket.
pub fn bind(addr: &str) -> ServerResult<TcpListener> {
    let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    listener.set_nonblocking(true).map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    if let Ok(local) = listener.local_addr() {
        info!("Listening on {}", local);
    }
    Ok(listener)
}

/// Accepts one pending connection.
///
/// With `local_only` set, peers that are neither loopback nor the
/// listener's own address are dropped on the spot.
pub fn accept(
    listener: &TcpListener,
    local_only: bool,
) -> ServerResult<Option<(TcpStream, SocketAddr)>> {
    let (stream, peer) = match listener.accept() {
        Ok(conn) => conn,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionAborted
            ) =>
        {
            return Ok(None);
        }
        Err(e) => return Err(ServerError::Accept(e)),
    };

    if local_only && !is_local(listener, &peer) {
        warn!(peer = %peer, "rejected non-local client");
        return Ok(None);
    }
    info!(peer = %peer, "Accepted connection");
    Ok(Some((stream, peer)))
}

fn is_local(listener: &TcpListener, peer: &SocketAddr) -> bool {
    peer.ip().is_loopback()
        || listener
            .local_addr()
            .is_ok_and(|local| local.ip() == peer.ip())
}
