use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
#[cfg(target_os = "linux")]
use std::net::TcpStream;
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
use socket2::{Domain, Socket, Type};
use tcpsweep::sweeper::{Outcome, Sweeper};

fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn closed() -> SocketAddr {
    listen().1
}

fn sweeper() -> Sweeper {
    Sweeper::new().with_deadline(Duration::from_secs(10))
}

#[test]
fn open_port_is_up_and_closed_port_is_not() {
    let (_listener, open) = listen();
    let closed = closed();

    let result = sweeper().sweep(&[open, closed]).unwrap();

    assert_eq!(result, vec![open]);
}

#[test]
fn empty_input_returns_empty_result() {
    let started = Instant::now();
    let result = Sweeper::new().sweep(&[]).unwrap();

    assert!(result.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn result_is_never_larger_than_input() {
    let listeners = (0..8).map(|_| listen()).collect::<Vec<_>>();
    let mut endpoints = listeners.iter().map(|(_, addr)| *addr).collect::<Vec<_>>();
    endpoints.extend((0..24).map(|_| closed()));

    let result = sweeper().sweep(&endpoints).unwrap();

    assert!(result.len() <= endpoints.len());
    let expected = listeners.iter().map(|(_, addr)| *addr).collect::<HashSet<_>>();
    assert_eq!(result.into_iter().collect::<HashSet<_>>(), expected);
}

#[test]
fn sweep_is_idempotent() {
    let (_a, first) = listen();
    let (_b, second) = listen();
    let endpoints = [first, closed(), second];

    let mut once = sweeper().sweep(&endpoints).unwrap();
    let mut twice = sweeper().sweep(&endpoints).unwrap();
    once.sort();
    twice.sort();

    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

#[test]
fn duplicate_endpoints_are_probed_independently() {
    let (_listener, open) = listen();

    let result = sweeper().sweep(&[open, open, open]).unwrap();

    assert_eq!(result, vec![open, open, open]);
}

#[test]
fn stream_resolves_every_endpoint_once() {
    let (_listener, open) = listen();
    let endpoints = [open, closed(), closed()];

    let sweep = sweeper().start(&endpoints).unwrap();
    assert!(sweep.pending() <= endpoints.len());

    let mut seen = Vec::new();
    for resolution in sweep {
        let resolution = resolution.unwrap();
        match resolution.outcome {
            Outcome::Succeeded { peer } => assert_eq!(peer, open),
            Outcome::Failed(_) => assert_ne!(resolution.endpoint, open),
            Outcome::TimedOut => panic!("{} timed out on loopback", resolution.endpoint),
        }
        seen.push(resolution.endpoint);
    }

    seen.sort();
    let mut expected = endpoints.to_vec();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn report_counts_every_probe() {
    let (_listener, open) = listen();

    let report = sweeper().sweep_report(&[open, closed(), closed()]).unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.open, vec![open]);
    assert_eq!(report.failed, 2);
    assert_eq!(report.timed_out, 0);
}

#[test]
fn ipv6_loopback_listener_is_up() {
    let Ok(listener) = TcpListener::bind("[::1]:0") else {
        // no IPv6 on this host
        return;
    };
    let open = listener.local_addr().unwrap();

    let result = sweeper().sweep(&[open]).unwrap();

    assert_eq!(result, vec![open]);
}

#[cfg(target_os = "linux")]
#[test]
fn unanswered_connect_times_out_at_deadline() {
    let (_listener, _queued, silent) = saturated_listener();
    let (_open_listener, open) = listen();
    let deadline = Duration::from_millis(300);

    let started = Instant::now();
    let report = Sweeper::new()
        .with_deadline(deadline)
        .sweep_report(&[silent, open])
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.open, vec![open]);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failed, 0);
    assert!(elapsed >= deadline, "returned after {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_secs(2), "returned after {elapsed:?}");
}

/// A loopback listener with a full accept queue. Linux drops further SYNs
/// to it, so a connect stays pending until the client gives up.
#[cfg(target_os = "linux")]
fn saturated_listener() -> (Socket, Vec<TcpStream>, SocketAddr) {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    listener
        .bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into())
        .unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap().as_socket().unwrap();

    let mut queued = Vec::new();
    for _ in 0..8 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => queued.push(stream),
            Err(_) => return (listener, queued, addr),
        }
    }
    panic!("accept queue of {addr} never filled");
}
