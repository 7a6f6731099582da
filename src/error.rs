//! Fatal sweep errors.
//!
//! Per-endpoint connect failures are not errors: they are reported as
//! [`Outcome::Failed`](crate::sweeper::Outcome::Failed). Only failures of the
//! sweep machinery itself end up here.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure of the sweep as a whole.
#[derive(Error, Debug)]
pub enum SweepError {
    /// A socket for `endpoint` could not be created or configured.
    #[error("cannot open socket for {endpoint}: {source}")]
    Socket {
        /// Endpoint whose probe needed the socket.
        endpoint: SocketAddr,
        /// Error from `socket(2)` or from switching to non-blocking mode.
        #[source]
        source: io::Error,
    },

    /// The readiness poller could not be created.
    #[error("cannot create readiness poller: {0}")]
    Poll(#[source] io::Error),

    /// A socket could not be added to the readiness poller.
    #[error("cannot register socket for {endpoint}: {source}")]
    Register {
        /// Endpoint whose socket was being registered.
        endpoint: SocketAddr,
        /// Error from the poller.
        #[source]
        source: io::Error,
    },

    /// The readiness wait itself failed.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

impl SweepError {
    /// The underlying I/O error.
    #[must_use]
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::Socket { source, .. } | Self::Register { source, .. } => source,
            Self::Poll(source) | Self::Wait(source) => source,
        }
    }

    /// Whether the error comes from running out of descriptors or kernel memory.
    ///
    /// This is what a caller sees when more endpoints are swept at once than
    /// the open file limit allows.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        is_exhaustion(self.io_error())
    }
}

#[cfg(unix)]
fn is_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_exhaustion(err: &io::Error) -> bool {
    // WSAEMFILE, WSAENOBUFS
    matches!(err.raw_os_error(), Some(10024 | 10055)) || err.kind() == io::ErrorKind::OutOfMemory
}

/// Result type alias for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:80".parse().unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn emfile_is_resource_exhaustion() {
        let err = SweepError::Socket {
            endpoint: endpoint(),
            source: io::Error::from_raw_os_error(libc::EMFILE),
        };
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn refused_is_not_resource_exhaustion() {
        let err = SweepError::Register {
            endpoint: endpoint(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn display_names_endpoint() {
        let err = SweepError::Socket {
            endpoint: endpoint(),
            source: io::Error::other("boom"),
        };
        assert_eq!(err.to_string(), "cannot open socket for 127.0.0.1:80: boom");
    }
}
