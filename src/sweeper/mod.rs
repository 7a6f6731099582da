//! Core functionality for actual sweeping behaviour.
//!
//! Every endpoint gets its own non-blocking socket and connect attempt up
//! front. A single [`mio::Poll`] then waits for the sockets to turn writable,
//! which is how the kernel signals that a pending connect finished, and each
//! finished socket is classified by its `SO_ERROR` value. Everything runs on
//! the calling thread.
mod probe;

use crate::error::{SweepError, SweepResult};
use log::{debug, trace};
use mio::{Events, Poll, Token};
use probe::{Initiation, Probe};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::iter::FusedIterator;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default number of readiness events fetched per wait.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Terminal state of one probe.
#[derive(Debug)]
pub enum Outcome {
    /// The handshake completed.
    Succeeded {
        /// Read back from the connected socket.
        peer: SocketAddr,
    },
    /// The connect was refused, reset, unreachable or otherwise failed.
    Failed(io::Error),
    /// The sweep deadline passed before the connect finished.
    TimedOut,
}

impl Outcome {
    /// Whether the endpoint accepted the connection.
    #[must_use]
    pub const fn is_up(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// The endpoint a probe was started for, and how it ended.
#[derive(Debug)]
pub struct Resolution {
    /// The endpoint as it was handed to [`Sweeper::start`].
    pub endpoint: SocketAddr,
    /// How the probe ended.
    pub outcome: Outcome,
}

impl Resolution {
    /// Peer address of a successful probe.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        match self.outcome {
            Outcome::Succeeded { peer } => Some(peer),
            _ => None,
        }
    }
}

/// Counts and open endpoints of a finished sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Probes resolved, one per endpoint.
    pub total: usize,
    /// Peer addresses of the probes that connected, in resolution order.
    pub open: Vec<SocketAddr>,
    /// Probes refused, reset, unreachable or otherwise failed.
    pub failed: usize,
    /// Probes still pending when the deadline passed.
    pub timed_out: usize,
}

impl SweepReport {
    /// Counts one resolved probe.
    pub fn record(&mut self, resolution: &Resolution) {
        self.total += 1;
        match resolution.outcome {
            Outcome::Succeeded { peer } => self.open.push(peer),
            Outcome::Failed(_) => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
    }
}

/// The sweeper.
///
/// Holds the settings shared by every sweep: an optional deadline for the
/// whole readiness phase and the size of the event buffer handed to the
/// poller. A sweeper without a deadline waits for as long as the kernel keeps
/// a connect pending, which for a silently dropping target can be minutes.
#[derive(Debug, Clone)]
pub struct Sweeper {
    deadline: Option<Duration>,
    event_capacity: usize,
}

impl Default for Sweeper {
    fn default() -> Self {
        Self {
            deadline: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Sweeper {
    /// A sweeper without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the sweep. Probes still pending once `deadline` has elapsed
    /// since the sweep started resolve as [`Outcome::TimedOut`].
    #[must_use]
    pub fn with_deadline(mut self, deadline: impl Into<Option<Duration>>) -> Self {
        self.deadline = deadline.into();
        self
    }

    /// Maximum number of readiness events handled per wait. Clamped to at least 1.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Starts a connect for every endpoint and returns the running sweep.
    ///
    /// The returned [`Sweep`] yields one [`Resolution`] per endpoint as the
    /// probes finish. Running out of sockets while starting is reported here
    /// and closes every socket opened so far.
    ///
    /// ```no_run
    /// use tcpsweep::sweeper::Sweeper;
    /// use std::net::SocketAddr;
    /// use std::time::Duration;
    ///
    /// let endpoints: Vec<SocketAddr> = vec!["127.0.0.1:22".parse().unwrap()];
    /// let sweep = Sweeper::new()
    ///     .with_deadline(Duration::from_secs(2))
    ///     .start(&endpoints)?;
    /// for resolution in sweep {
    ///     let resolution = resolution?;
    ///     println!("{} -> {:?}", resolution.endpoint, resolution.outcome);
    /// }
    /// # Ok::<(), tcpsweep::error::SweepError>(())
    /// ```
    pub fn start(&self, endpoints: &[SocketAddr]) -> SweepResult<Sweep> {
        let started = Instant::now();
        let poll = Poll::new().map_err(SweepError::Poll)?;
        let mut pending = HashMap::with_capacity(endpoints.len());
        let mut resolved = VecDeque::new();

        for (index, &endpoint) in endpoints.iter().enumerate() {
            match Probe::initiate(endpoint)? {
                Initiation::InProgress(mut probe) => {
                    let token = Token(index);
                    probe
                        .register(poll.registry(), token)
                        .map_err(|source| SweepError::Register { endpoint, source })?;
                    pending.insert(token, probe);
                }
                Initiation::ImmediateError(err) => {
                    debug!("Connect to {endpoint} failed immediately: {err}");
                    resolved.push_back(Resolution {
                        endpoint,
                        outcome: Outcome::Failed(err),
                    });
                }
            }
        }

        debug!(
            "Started sweep.\nEndpoints {}\nIn progress {}\nDeadline {:?}",
            endpoints.len(),
            pending.len(),
            self.deadline
        );

        Ok(Sweep {
            poll,
            events: Events::with_capacity(self.event_capacity.min(endpoints.len()).max(1)),
            pending,
            resolved,
            // a deadline past the end of representable time is no deadline
            deadline: self.deadline.and_then(|deadline| started.checked_add(deadline)),
        })
    }

    /// Sweeps `endpoints` and returns the peer addresses that accepted a connection.
    pub fn sweep(&self, endpoints: &[SocketAddr]) -> SweepResult<Vec<SocketAddr>> {
        let mut open = Vec::new();
        for resolution in self.start(endpoints)? {
            if let Some(peer) = resolution?.peer() {
                open.push(peer);
            }
        }

        debug!("Open sockets found: {open:?}");
        Ok(open)
    }

    /// Like [`Sweeper::sweep`], but also counts failed and timed out probes.
    pub fn sweep_report(&self, endpoints: &[SocketAddr]) -> SweepResult<SweepReport> {
        let mut report = SweepReport::default();
        for resolution in self.start(endpoints)? {
            report.record(&resolution?);
        }
        Ok(report)
    }
}

/// A sweep in progress.
///
/// Iterating drives the readiness loop: each call to `next` hands out an
/// already resolved probe or blocks in the poller until at least one more
/// probe resolves. A fatal error is yielded once and ends the iteration.
#[derive(Debug)]
pub struct Sweep {
    poll: Poll,
    events: Events,
    pending: HashMap<Token, Probe>,
    resolved: VecDeque<Resolution>,
    deadline: Option<Instant>,
}

impl Sweep {
    /// Number of probes whose connect has not resolved yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// One readiness wait and classification of everything it reported.
    ///
    /// Once the deadline has passed, the poller is drained without blocking
    /// before the remaining probes expire, so a connect that finished while
    /// nobody was waiting still counts.
    fn poll_round(&mut self) -> SweepResult<()> {
        let Some(deadline) = self.deadline else {
            return self.wait(None);
        };

        let now = Instant::now();
        if now < deadline {
            return self.wait(Some(deadline - now));
        }

        // a full batch may leave more ready sockets behind
        loop {
            self.wait(Some(Duration::ZERO))?;
            if self.events.iter().count() < self.events.capacity() {
                break;
            }
        }
        self.expire();
        Ok(())
    }

    /// Waits up to `timeout` for readiness and classifies what was reported.
    fn wait(&mut self, timeout: Option<Duration>) -> SweepResult<()> {
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(SweepError::Wait(err));
        }

        for event in &self.events {
            let token = event.token();
            let Some(probe) = self.pending.get(&token) else {
                continue;
            };
            let Some(outcome) = probe.classify(event.is_error() || event.is_write_closed()) else {
                trace!("Spurious readiness for {}", probe.endpoint());
                continue;
            };
            if let Some(probe) = self.pending.remove(&token) {
                let endpoint = probe.endpoint();
                debug!("Probe {endpoint} resolved: {outcome:?}");
                probe.close(self.poll.registry());
                self.resolved.push_back(Resolution { endpoint, outcome });
            }
        }

        Ok(())
    }

    /// Resolves everything still pending as timed out.
    fn expire(&mut self) {
        let mut expired = self.pending.drain().collect::<Vec<_>>();
        expired.sort_unstable_by_key(|(token, _)| token.0);
        debug!("Deadline passed with {} probes pending", expired.len());

        for (_, probe) in expired {
            let endpoint = probe.endpoint();
            probe.close(self.poll.registry());
            self.resolved.push_back(Resolution {
                endpoint,
                outcome: Outcome::TimedOut,
            });
        }
    }
}

impl Iterator for Sweep {
    type Item = SweepResult<Resolution>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(resolution) = self.resolved.pop_front() {
                return Some(Ok(resolution));
            }
            if self.pending.is_empty() {
                return None;
            }
            if let Err(err) = self.poll_round() {
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let ready = self.resolved.len();
        (ready, Some(ready + self.pending.len()))
    }
}

impl FusedIterator for Sweep {}
