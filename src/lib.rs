//! This crate exposes the internals of the `tcpsweep` endpoint prober.
//!
//! `tcpsweep` finds out which of a list of TCP endpoints accept connections.
//! It connects to all of them at once from a single thread: every endpoint
//! gets a non-blocking socket, one readiness poller watches all sockets for
//! the writability that marks a finished connect, and each finished socket is
//! classified by its pending socket error.
//!
//! ## Architecture Overview
//!
//! 1. **Input Processing**: [`input`] reads options and the config file,
//!    [`address`] expands IPs, CIDRs, hosts and host files and crosses them
//!    with the port list into endpoints.
//! 2. **Sweeping**: [`sweeper::Sweeper`] opens one probe per endpoint and
//!    drives them to a terminal [`sweeper::Outcome`].
//! 3. **Result Processing**: open endpoints are printed as they are found,
//!    then grouped per address or dumped as a JSON [`sweeper::SweepReport`].
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use std::net::{SocketAddr, TcpListener};
//! use std::time::Duration;
//!
//! use tcpsweep::sweeper::Sweeper;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:0")?;
//!     let open = listener.local_addr()?;
//!
//!     let closed = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
//!
//!     let up = Sweeper::new()
//!         .with_deadline(Duration::from_secs(5))
//!         .sweep(&[open, closed])?;
//!
//!     assert_eq!(up, vec![open]);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! A refused, reset or unreachable endpoint is an ordinary
//! [`sweeper::Outcome::Failed`]. Only failures of the sweep itself, such as
//! running out of file descriptors, surface as [`error::SweepError`].
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod error;

pub mod input;

pub mod address;

pub mod sweeper;
