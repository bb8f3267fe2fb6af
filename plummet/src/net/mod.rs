//! Network-related code, i.e. actually sending queries and receiving answers.
//!
//! Every transport implements [`Resolver`]; [`load_resolver()`] picks one from the options and
//! brings the server address into the form that transport expects.

use std::fmt::{self, Display};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use plummet_proto::Message;
use tracing::debug;

use crate::error::TransportError;
use crate::options::{Options, TransportKind};

pub mod dnscrypt;
pub mod https;
pub mod quic;
pub mod standard;
mod tls;

pub use dnscrypt::DnsCryptResolver;
pub use https::HttpsResolver;
pub use quic::QuicResolver;
pub use standard::{NetExchanger, StandardResolver};

/// A reply and how long it took to arrive.
#[derive(Clone, Debug)]
pub struct Response {
    pub message: Message,
    pub rtt: Duration,
}

/// One way of getting a reply for a query.
pub trait Resolver {
    fn look_up(&mut self, query: &Message) -> Result<Response, TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
}

/// Restricts which addresses of a server are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

/// Protocol plus address family, displayed like `udp`, `tcp4` or `tcp6-tls`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Network {
    pub protocol: Protocol,
    pub family: Family,
}

impl Network {
    /// TLS wins over TCP, TCP over UDP.
    pub fn from_options(opts: &Options) -> Self {
        let protocol = if opts.transport.tls {
            Protocol::Tls
        } else if opts.transport.tcp {
            Protocol::Tcp
        } else {
            Protocol::Udp
        };
        Self {
            protocol,
            family: Family::from_options(opts),
        }
    }

    /// The same network over plain TCP.
    pub fn with_tcp(self) -> Self {
        Self {
            protocol: Protocol::Tcp,
            ..self
        }
    }
}

impl Family {
    pub fn from_options(opts: &Options) -> Self {
        if opts.transport.ipv4 {
            Family::V4
        } else if opts.transport.ipv6 {
            Family::V6
        } else {
            Family::Any
        }
    }

    fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.protocol {
            Protocol::Udp => "udp",
            Protocol::Tcp | Protocol::Tls => "tcp",
        };
        let family = match self.family {
            Family::Any => "",
            Family::V4 => "4",
            Family::V6 => "6",
        };
        let tls = if self.protocol == Protocol::Tls { "-tls" } else { "" };
        write!(f, "{}{}{}", base, family, tls)
    }
}

/// Picks the transport for `opts` and normalizes `opts.request.server` for it. Calling this
/// again with the same options changes nothing.
pub fn load_resolver(opts: &mut Options) -> Result<Box<dyn Resolver>, TransportError> {
    let kind = opts.transport_kind();
    debug!("Using the {:?} transport.", kind);
    let server = &mut opts.request.server;
    match kind {
        TransportKind::Https => {
            if !server.starts_with("https://") {
                server.insert_str(0, "https://");
            }
            let endpoint = &opts.transport.https_endpoint;
            if !server.ends_with(endpoint.as_str()) {
                let trimmed = server.trim_end_matches('/').len();
                server.truncate(trimmed);
                server.push_str(endpoint);
            }
            Ok(Box::new(HttpsResolver::new(opts)?))
        }
        TransportKind::Quic => {
            ensure_port(server, opts.request.port);
            Ok(Box::new(QuicResolver::new(opts)?))
        }
        TransportKind::DnsCrypt => {
            if !server.starts_with("sdns://") {
                server.insert_str(0, "sdns://");
            }
            Ok(Box::new(DnsCryptResolver::new(opts)?))
        }
        TransportKind::Standard => {
            ensure_port(server, opts.request.port);
            Ok(Box::new(StandardResolver::new(opts)?))
        }
    }
}

fn ensure_port(server: &mut String, port: u16) {
    if split_host_port(server).is_none() {
        *server = join_host_port(server, port);
    }
}

/// Formats `host:port`, bracketing IPv6 addresses.
pub fn join_host_port(host: &str, port: u16) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Splits `host:port` or `[v6]:port`. Returns [`None`] if there is no port; a bare IPv6 address
/// has none.
pub fn split_host_port(server: &str) -> Option<(&str, u16)> {
    if server.parse::<IpAddr>().is_ok() {
        return None;
    }
    let (host, port) = server.rsplit_once(':')?;
    let port = port.parse().ok()?;
    match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(v6) => Some((v6, port)),
        None if host.contains(':') || host.is_empty() => None,
        None => Some((host, port)),
    }
}

/// Resolves `host:port` to the first address of the wanted family.
pub fn resolve(server: &str, family: Family) -> Result<SocketAddr, TransportError> {
    let (host, port) =
        split_host_port(server).ok_or_else(|| TransportError::InvalidServer(server.to_string()))?;
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::Resolve(host.to_string()))?;
    addrs
        .into_iter()
        .find(|addr| family.matches(addr))
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{join_host_port, load_resolver, split_host_port, Family, Network, Protocol};
    use crate::error::TransportError;
    use crate::options::Options;

    #[test]
    fn network_names() {
        let mut opts = Options::default();
        assert_eq!(Network::from_options(&opts).to_string(), "udp");
        opts.transport.ipv4 = true;
        assert_eq!(Network::from_options(&opts).with_tcp().to_string(), "tcp4");
        opts.transport.ipv4 = false;
        opts.transport.ipv6 = true;
        opts.transport.tls = true;
        let network = Network::from_options(&opts);
        assert_eq!(network.protocol, Protocol::Tls);
        assert_eq!(network.family, Family::V6);
        assert_eq!(network.to_string(), "tcp6-tls");
    }

    #[test]
    fn host_port_handling() {
        assert_eq!(join_host_port("192.0.2.1", 53), "192.0.2.1:53");
        assert_eq!(join_host_port("2001:db8::1", 853), "[2001:db8::1]:853");
        assert_eq!(join_host_port("[2001:db8::1]", 53), "[2001:db8::1]:53");

        assert_eq!(split_host_port("192.0.2.1:5353"), Some(("192.0.2.1", 5353)));
        assert_eq!(split_host_port("[2001:db8::1]:53"), Some(("2001:db8::1", 53)));
        assert_eq!(split_host_port("dns.example:853"), Some(("dns.example", 853)));
        assert_eq!(split_host_port("2001:db8::53"), None);
        assert_eq!(split_host_port("dns.example"), None);
    }

    #[test]
    fn standard_server_gets_port_once() {
        let mut opts = Options::default();
        opts.request.server = "1.1.1.1".into();
        opts.finalize();
        load_resolver(&mut opts).unwrap();
        assert_eq!(opts.request.server, "1.1.1.1:53");
        load_resolver(&mut opts).unwrap();
        assert_eq!(opts.request.server, "1.1.1.1:53");
    }

    #[test]
    fn https_server_gets_scheme_and_endpoint() {
        let mut opts = Options::default();
        opts.transport.https = true;
        opts.request.server = "dns.example".into();
        opts.finalize();
        load_resolver(&mut opts).unwrap();
        assert_eq!(opts.request.server, "https://dns.example/dns-query");
        load_resolver(&mut opts).unwrap();
        assert_eq!(opts.request.server, "https://dns.example/dns-query");
    }

    #[test]
    fn malformed_server_is_a_selection_error() {
        let mut opts = Options::default();
        opts.transport.https = true;
        opts.request.server = "https://[::1".into();
        opts.finalize();
        assert!(matches!(
            load_resolver(&mut opts),
            Err(TransportError::InvalidServer(_))
        ));
    }
}
