//! A single in-flight connection attempt.
use super::Outcome;
use crate::error::{SweepError, SweepResult};
use log::debug;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::SocketAddr;

/// What happened when the non-blocking connect was issued.
#[derive(Debug)]
pub(crate) enum Initiation {
    /// The handshake is under way (or already done); wait for writability.
    InProgress(Probe),
    /// The kernel rejected the connect synchronously. The socket is already closed.
    ImmediateError(io::Error),
}

/// Pairs an endpoint with its non-blocking socket until the connect resolves.
#[derive(Debug)]
pub(crate) struct Probe {
    endpoint: SocketAddr,
    stream: TcpStream,
}

impl Probe {
    /// Opens a non-blocking socket for `endpoint` and starts connecting.
    ///
    /// Failing to obtain the socket is fatal for the sweep, while a connect
    /// that fails on the spot only fails this probe.
    pub(crate) fn initiate(endpoint: SocketAddr) -> SweepResult<Initiation> {
        let socket =
            open_socket(endpoint).map_err(|source| SweepError::Socket { endpoint, source })?;

        match socket.connect(&SockAddr::from(endpoint)) {
            Ok(()) => debug!("Connect to {endpoint} completed synchronously"),
            Err(err) if connect_in_progress(&err) => {}
            Err(err) => return Ok(Initiation::ImmediateError(err)),
        }

        Ok(Initiation::InProgress(Self {
            endpoint,
            stream: TcpStream::from_std(socket.into()),
        }))
    }

    pub(crate) const fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.stream, token, Interest::WRITABLE)
    }

    /// Reads the connect result off a socket that was reported ready.
    ///
    /// Returns `None` for a wakeup that neither failed nor connected the
    /// socket; the probe then stays pending. `hangup` tells whether the
    /// poller flagged an error or a closed write half with the event.
    pub(crate) fn classify(&self, hangup: bool) -> Option<Outcome> {
        match self.stream.take_error() {
            Ok(Some(err)) | Err(err) => return Some(Outcome::Failed(err)),
            Ok(None) => {}
        }

        match self.stream.peer_addr() {
            Ok(peer) => Some(Outcome::Succeeded { peer }),
            Err(err) if !hangup && not_yet_connected(&err) => None,
            Err(err) => Some(Outcome::Failed(err)),
        }
    }

    /// Removes the socket from the poller and closes it.
    pub(crate) fn close(mut self, registry: &Registry) {
        if let Err(err) = registry.deregister(&mut self.stream) {
            debug!("Deregistering {} failed: {err}", self.endpoint);
        }
    }
}

fn open_socket(endpoint: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(
        Domain::for_address(endpoint),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// The "operation in progress" family of connect errors.
#[cfg(unix)]
fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn not_yet_connected(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[cfg(unix)]
    #[test]
    fn einprogress_is_expected() {
        let err = io::Error::from_raw_os_error(libc::EINPROGRESS);
        assert!(connect_in_progress(&err));
    }

    #[test]
    fn would_block_is_expected() {
        assert!(connect_in_progress(&io::Error::from(io::ErrorKind::WouldBlock)));
    }

    #[test]
    fn refused_is_not_in_progress() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(!connect_in_progress(&err));
    }

    #[test]
    fn not_connected_keeps_probe_pending() {
        assert!(not_yet_connected(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(!not_yet_connected(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    /// Linux drops SYNs to a listener whose accept queue is full.
    #[cfg(target_os = "linux")]
    fn saturated_listener() -> (Socket, Vec<std::net::TcpStream>, SocketAddr) {
        use std::time::Duration;

        let listener = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        listener
            .bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into())
            .unwrap();
        listener.listen(0).unwrap();
        let addr = listener.local_addr().unwrap().as_socket().unwrap();

        let mut queued = Vec::new();
        for _ in 0..8 {
            match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
                Ok(stream) => queued.push(stream),
                Err(_) => return (listener, queued, addr),
            }
        }
        panic!("accept queue of {addr} never filled");
    }

    #[cfg(target_os = "linux")]
    fn pending_probe(endpoint: SocketAddr) -> Probe {
        match Probe::initiate(endpoint).unwrap() {
            Initiation::InProgress(probe) => probe,
            Initiation::ImmediateError(err) => panic!("unexpected connect error {err}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn wakeup_before_handshake_keeps_probe_pending() {
        let (_listener, _queued, endpoint) = saturated_listener();
        let probe = pending_probe(endpoint);

        assert!(probe.classify(false).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hangup_before_handshake_fails_probe() {
        let (_listener, _queued, endpoint) = saturated_listener();
        let probe = pending_probe(endpoint);

        assert!(matches!(probe.classify(true), Some(Outcome::Failed(_))));
    }

    #[test]
    fn initiate_against_listener_is_in_progress() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap();

        let initiation = Probe::initiate(endpoint).unwrap();
        match initiation {
            Initiation::InProgress(probe) => assert_eq!(probe.endpoint(), endpoint),
            Initiation::ImmediateError(err) => panic!("unexpected connect error {err}"),
        }
    }
}
