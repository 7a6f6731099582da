//! Provides functions to turn input IP addresses, CIDRs, hosts or files into endpoints.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use cidr_utils::cidr::IpCidr;
use futures::stream::{self, StreamExt};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::debug;
use tokio::{fs, io};

use crate::input::Opts;
use crate::warning;

/// Parses the string(s) into IP addresses.
///
/// Goes through all possible IP inputs (files or via argparsing), drops the
/// excluded ones and removes duplicates while keeping the input order.
///
/// ```rust
/// # use tcpsweep::input::Opts;
/// # use tcpsweep::address::parse_addresses;
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mut opts = Opts::default();
/// opts.addresses = vec!["192.168.0.0/30".to_owned()];
///
/// let ips = parse_addresses(&opts).await;
/// assert_eq!(ips.len(), 4);
/// # });
/// ```
pub async fn parse_addresses(input: &Opts) -> Vec<IpAddr> {
    let resolver = &get_resolver(&input.resolver).await;

    let ips = expand(&input.addresses, resolver, input).await;

    let excluded = match &input.exclude_addresses {
        Some(excluded) => expand(excluded, resolver, input).await,
        None => Vec::new(),
    }
    .into_iter()
    .collect::<HashSet<_>>();

    ips.into_iter()
        .filter(|ip| !excluded.contains(ip))
        .unique()
        .collect()
}

/// Crosses every address with every port, address-major.
///
/// ```rust
/// # use tcpsweep::address::endpoints;
/// # use std::net::IpAddr;
/// let ips: [IpAddr; 1] = ["127.0.0.1".parse().unwrap()];
/// let endpoints = endpoints(&ips, &[22, 80]);
/// assert_eq!(endpoints[1].to_string(), "127.0.0.1:80");
/// ```
#[must_use]
pub fn endpoints(ips: &[IpAddr], ports: &[u16]) -> Vec<SocketAddr> {
    ips.iter()
        .cartesian_product(ports)
        .map(|(&ip, &port)| SocketAddr::new(ip, port))
        .collect()
}

async fn expand(items: &[String], resolver: &TokioAsyncResolver, input: &Opts) -> Vec<IpAddr> {
    stream::iter(items)
        .map(|item| async move {
            if fs::metadata(item).await.is_ok_and(|meta| meta.is_file()) {
                return match read_ips_from_file(item, resolver).await {
                    Ok(ips) => ips,
                    Err(e) => {
                        warning!(
                            format!("Host file {item:?} could not be read: {e}"),
                            input.greppable,
                            input.accessible
                        );
                        Vec::new()
                    }
                };
            }

            let ips = parse_address(item, resolver).await;
            if ips.is_empty() {
                warning!(
                    format!("Host {item:?} could not be resolved."),
                    input.greppable,
                    input.accessible
                );
            }
            ips
        })
        .buffered(10)
        .concat()
        .await
}

/// Given a string, parse it as a host, IP address, or CIDR.
///
/// If the address is a domain, we resolve it locally first and fall back
/// to the given resolver.
pub async fn parse_address(address: &str, resolver: &TokioAsyncResolver) -> Vec<IpAddr> {
    match IpCidr::from_str(address) {
        Ok(cidr) => cidr.iter().map(|c| c.address()).collect(),
        Err(_) => resolve_ips_from_host(address, resolver).await,
    }
}

/// Uses DNS to get the IPs associated with host
async fn resolve_ips_from_host(source: &str, backup_resolver: &TokioAsyncResolver) -> Vec<IpAddr> {
    if let Ok(addrs) = tokio::net::lookup_host((source, 80)).await {
        addrs.map(|addr| addr.ip()).collect()
    } else if let Ok(addrs) = backup_resolver.lookup_ip(source).await {
        addrs.iter().collect()
    } else {
        debug!("No address found for {source}");
        Vec::new()
    }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver (default
///       behaviour).
pub async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

/// Parses a newline-delimited file of IPs, CIDRs or hosts.
async fn read_ips_from_file(path: &str, resolver: &TokioAsyncResolver) -> io::Result<Vec<IpAddr>> {
    let content = fs::read_to_string(path).await?;

    let ips = stream::iter(content.lines().map(str::trim).filter(|line| !line.is_empty()))
        .map(|line| parse_address(line, resolver))
        .buffered(4)
        .concat()
        .await;

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{endpoints, get_resolver, parse_address, parse_addresses, Opts};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

    #[tokio::test]
    async fn parse_correct_addresses() {
        let opts = Opts {
            addresses: vec!["127.0.0.1".to_owned(), "192.168.0.0/30".to_owned()],
            ..Opts::default()
        };
        let ips = parse_addresses(&opts).await;

        assert_eq!(
            ips,
            [
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(192, 168, 0, 0),
                Ipv4Addr::new(192, 168, 0, 1),
                Ipv4Addr::new(192, 168, 0, 2),
                Ipv4Addr::new(192, 168, 0, 3)
            ]
        );
    }

    #[tokio::test]
    async fn parse_ipv6_address() {
        let resolver = get_resolver(&None).await;
        let ips = parse_address("::1", &resolver).await;

        assert_eq!(ips, [IpAddr::V6(Ipv6Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn duplicates_are_removed() {
        let opts = Opts {
            addresses: vec!["10.0.0.1".to_owned(), "10.0.0.0/31".to_owned()],
            ..Opts::default()
        };
        let ips = parse_addresses(&opts).await;

        assert_eq!(ips, [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 0)]);
    }

    #[tokio::test]
    async fn excluded_addresses_are_dropped() {
        let opts = Opts {
            addresses: vec!["192.168.0.0/30".to_owned()],
            exclude_addresses: Some(vec!["192.168.0.0/31".to_owned()]),
            ..Opts::default()
        };
        let ips = parse_addresses(&opts).await;

        assert_eq!(
            ips,
            [Ipv4Addr::new(192, 168, 0, 2), Ipv4Addr::new(192, 168, 0, 3)]
        );
    }

    #[tokio::test]
    async fn parse_hosts_file() {
        let opts = Opts {
            addresses: vec!["fixtures/hosts.txt".to_owned()],
            ..Opts::default()
        };
        let ips = parse_addresses(&opts).await;

        assert_eq!(
            ips,
            [
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(10, 1, 0, 0),
                Ipv4Addr::new(10, 1, 0, 1)
            ]
        );
    }

    #[tokio::test]
    async fn parse_empty_hosts_file() {
        let opts = Opts {
            addresses: vec!["fixtures/empty_hosts.txt".to_owned()],
            ..Opts::default()
        };
        let ips = parse_addresses(&opts).await;
        assert!(ips.is_empty());
    }

    #[tokio::test]
    async fn resolver_from_file() {
        let resolver = Some("fixtures/resolvers.txt".to_owned());
        // only has to build; lookups would need the network
        let _resolver = get_resolver(&resolver).await;
    }

    #[test]
    fn endpoints_cross_product() {
        let ips = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        let result = endpoints(&ips, &[22, 443]);

        let expected: Vec<SocketAddr> = vec![
            "127.0.0.1:22".parse().unwrap(),
            "127.0.0.1:443".parse().unwrap(),
            "[::1]:22".parse().unwrap(),
            "[::1]:443".parse().unwrap(),
        ];
        assert_eq!(result, expected);
    }

    #[test]
    fn endpoints_without_ports_is_empty() {
        let ips = [IpAddr::V4(Ipv4Addr::LOCALHOST)];
        assert!(endpoints(&ips, &[]).is_empty());
    }
}
