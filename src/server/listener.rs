use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam::channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::server::connection::Connection;
use crate::server::stats::EngineStats;

const LISTEN_BACKLOG: i32 = 1024;

/// Back-off after an accept failure, so a full fd table does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Opens the listening socket with `SO_REUSEADDR` set.
pub fn bind(listen_addr: &str) -> anyhow::Result<TcpListener> {
    let addr = listen_addr
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve listen address {listen_addr}"))?
        .next()
        .with_context(|| format!("listen address {listen_addr} resolves to nothing"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("cannot bind {addr}"))?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Accepts connections on its own thread and feeds them, numbered, to the
/// dispatcher.
///
/// Ids start at 1 and increase by one per accepted socket.
pub struct ConnectionAccepter {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ConnectionAccepter {
    pub fn start(
        name: &str,
        listener: TcpListener,
        intake: Sender<Connection>,
        stats: Arc<EngineStats>,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(format!("{name}-ConnectionAccepter"))
            .spawn(move || accept_loop(listener, intake, flag, stats))?;

        info!(addr = %local_addr, "Listening");
        Ok(Self {
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes the listening socket. Connections already
    /// handed over are left alone.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);

        // accept() only returns on a new connection, so make one.
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr {
                SocketAddr::V4(_) => [127, 0, 0, 1].into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, Duration::from_secs(1)) {
            warn!(error = %e, "Failed to wake accepter");
        }

        if thread.join().is_err() {
            warn!("Accepter thread panicked");
        }
        info!(addr = %self.local_addr, "Stopped listening");
    }
}

impl Drop for ConnectionAccepter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    intake: Sender<Connection>,
    running: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
) {
    let mut next_id: u64 = 1;

    while running.load(Ordering::Acquire) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    warn!(error = %e, "Accept failed");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
                continue;
            }
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        let id = next_id;
        next_id += 1;

        let conn = match Connection::new(id, stream) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(conn = id, peer = %peer, error = %e, "Failed to prepare connection");
                continue;
            }
        };

        stats.connection_accepted();
        info!(conn = id, peer = %peer, "Connection accepted");

        if intake.send(conn).is_err() {
            warn!("Intake queue closed, accepter stopping");
            break;
        }
    }
}
