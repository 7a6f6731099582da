use tcpsweep::address::{endpoints, parse_addresses};
use tcpsweep::error::SweepError;
use tcpsweep::input::{Config, Opts};
use tcpsweep::sweeper::{SweepReport, Sweeper};
use tcpsweep::{detail, output, warning};

use anyhow::Context;
use colored::Colorize;
use log::debug;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Descriptors kept free for stdio, the poller and the resolver.
const RESERVED_DESCRIPTORS: u64 = 16;

#[derive(Debug, Clone, Copy)]
struct Printing {
    greppable: bool,
    accessible: bool,
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let printing = Printing {
        greppable: opts.greppable,
        accessible: opts.accessible,
        json: opts.json,
    };
    let quiet = printing.greppable || printing.json;

    let ips: Vec<IpAddr> = parse_addresses(&opts).await;
    if ips.is_empty() {
        warning!("No IPs could be resolved, aborting sweep.", quiet, opts.accessible);
        std::process::exit(1);
    }

    let ports = opts.port_list();
    let endpoints = endpoints(&ips, &ports);

    let limit = adjust_ulimit_size(&opts);
    if endpoints.len() as u64 + RESERVED_DESCRIPTORS > limit {
        warning!(
            format!(
                "{} endpoints exceed the open file limit of {limit}. Use --ulimit or sweep fewer targets.",
                endpoints.len()
            ),
            quiet,
            opts.accessible
        );
    }

    detail!(
        format!(
            "Sweeping {} endpoints on {} addresses",
            endpoints.len(),
            ips.len()
        ),
        quiet,
        opts.accessible
    );

    let sweeper = Sweeper::new().with_deadline(opts.deadline());
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || run_sweep(&sweeper, &endpoints, printing))
        .await
        .context("sweep thread panicked")?;

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_resource_exhaustion() => {
            return Err(anyhow::Error::new(e).context(
                "Too many open files. Raise the limit with --ulimit or sweep fewer endpoints.",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    debug!("Sweep finished in {:?}", started.elapsed());

    if printing.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if printing.greppable {
        for (ip, ports) in group_by_ip(&report.open) {
            println!("{ip} -> [{}]", ports.iter().map(u16::to_string).collect::<Vec<_>>().join(","));
        }
    } else {
        output!(
            format!(
                "{} open, {} failed, {} timed out of {} endpoints in {:.2?}",
                report.open.len(),
                report.failed,
                report.timed_out,
                report.total,
                started.elapsed()
            ),
            false,
            opts.accessible
        );
    }

    Ok(())
}

/// Drives the sweep, printing open endpoints as they come in.
fn run_sweep(
    sweeper: &Sweeper,
    endpoints: &[SocketAddr],
    printing: Printing,
) -> Result<SweepReport, SweepError> {
    let mut report = SweepReport::default();
    for resolution in sweeper.start(endpoints)? {
        let resolution = resolution?;
        if let Some(peer) = resolution.peer() {
            fmt_open(peer, printing);
        }
        report.record(&resolution);
    }
    Ok(report)
}

fn fmt_open(peer: SocketAddr, printing: Printing) {
    if !printing.greppable && !printing.json {
        if printing.accessible {
            println!("Open {peer}");
        } else {
            println!("Open {}", peer.to_string().purple());
        }
    }
}

fn group_by_ip(open: &[SocketAddr]) -> BTreeMap<IpAddr, Vec<u16>> {
    let mut grouped: BTreeMap<IpAddr, Vec<u16>> = BTreeMap::new();
    for peer in open {
        grouped.entry(peer.ip()).or_default().push(peer.port());
    }
    for ports in grouped.values_mut() {
        ports.sort_unstable();
    }
    grouped
}

/// Raises the open file limit when asked to and returns the soft limit in effect.
#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable || opts.json,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable || opts.json,
                opts.accessible
            );
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(e) => {
            debug!("Cannot read the open file limit: {e}");
            u64::MAX
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts) -> u64 {
    u64::MAX
}

#[cfg(test)]
mod tests {
    use super::group_by_ip;
    use std::net::SocketAddr;

    #[test]
    fn group_sorts_ports_per_ip() {
        let open: Vec<SocketAddr> = ["10.0.0.2:80", "10.0.0.1:443", "10.0.0.1:22"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        let grouped = group_by_ip(&open);
        let rendered = grouped
            .iter()
            .map(|(ip, ports)| format!("{ip} -> {ports:?}"))
            .collect::<Vec<_>>();

        assert_eq!(rendered, ["10.0.0.1 -> [22, 443]", "10.0.0.2 -> [80]"]);
    }
}
