//! The configuration of a single lookup, split into cohesive parts. It is filled in by the
//! argument parser and the dig argument classifier, then only read.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use hickory_proto::rr::{DNSClass, RecordType};
use plummet_proto::edns::{ClientSubnet, DEFAULT_UDP_SIZE};

use crate::error::ClassifyError;

/// Default DoH path.
pub const DEFAULT_HTTPS_ENDPOINT: &str = "/dns-query";

const MIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub request: Request,
    pub transport: Transport,
    pub flags: HeaderFlags,
    pub edns: EdnsConfig,
    pub display: Display,
    pub format: OutputFormat,
    /// Turn the name into its reverse lookup form (`in-addr.arpa`, `ip6.arpa` or `e164.arpa`).
    pub reverse: bool,
    /// Resolve iteratively, starting from a root server.
    pub trace: bool,
}

/// What to ask and whom.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Bare host, `host:port`, URL or DNSCrypt stamp. Empty until a default is chosen.
    pub server: String,
    pub name: String,
    /// [`None`] until a type token is seen or the default is applied.
    pub qtype: Option<RecordType>,
    pub qclass: DNSClass,
    /// 0 means "the default for the transport".
    pub port: u16,
    pub timeout: Duration,
    pub retries: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transport {
    pub tcp: bool,
    pub tls: bool,
    pub https: bool,
    pub quic: bool,
    pub dnscrypt: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub tls_no_verify: bool,
    /// Server name to verify and send as SNI instead of the one in the server address.
    pub tls_host: Option<String>,
    pub https_endpoint: String,
    pub https_get: bool,
    /// Keep truncated UDP replies instead of retrying over TCP.
    pub ignore_truncation: bool,
    /// Keep BADCOOKIE replies instead of retrying with the server cookie.
    pub ignore_bad_cookie: bool,
}

/// Header bits to set on the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderFlags {
    pub aa: bool,
    pub ad: bool,
    pub cd: bool,
    pub qr: bool,
    pub rd: bool,
    pub ra: bool,
    pub tc: bool,
    pub z: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EdnsConfig {
    pub enabled: bool,
    pub cookie: bool,
    pub dnssec: bool,
    pub expire: bool,
    pub keep_open: bool,
    pub nsid: bool,
    pub padding: bool,
    pub buf_size: u16,
    pub version: u8,
    /// The fifteen flag bits after DO.
    pub z_flag: u16,
    pub subnet: Option<ClientSubnet>,
}

/// Which parts of a response are shown, and how.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Display {
    pub comments: bool,
    pub question: bool,
    pub opt: bool,
    pub answer: bool,
    pub authority: bool,
    pub additional: bool,
    pub statistics: bool,
    pub ttl: bool,
    pub human_ttl: bool,
    pub show_class: bool,
    /// Print the query before sending it.
    pub show_query: bool,
    /// Convert punycode names back to Unicode.
    pub ucode_translate: bool,
    /// With `short`: name the server and round trip time.
    pub identify: bool,
    pub short: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Xml,
    Yaml,
}

/// The strategy used to talk to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Https,
    Quic,
    DnsCrypt,
    /// UDP, TCP or TLS.
    Standard,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            request: Request::default(),
            transport: Transport {
                https_endpoint: DEFAULT_HTTPS_ENDPOINT.to_string(),
                ..Transport::default()
            },
            flags: HeaderFlags::default(),
            edns: EdnsConfig::default(),
            display: Display::default(),
            format: OutputFormat::Text,
            reverse: false,
            trace: false,
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self {
            server: String::new(),
            name: String::new(),
            qtype: None,
            qclass: DNSClass::IN,
            port: 0,
            timeout: Duration::from_secs(5),
            retries: 2,
        }
    }
}

impl Default for HeaderFlags {
    fn default() -> Self {
        Self {
            aa: false,
            ad: false,
            cd: false,
            qr: false,
            rd: true,
            ra: false,
            tc: false,
            z: false,
        }
    }
}

impl Default for EdnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie: true,
            dnssec: false,
            expire: false,
            keep_open: false,
            nsid: false,
            padding: false,
            buf_size: DEFAULT_UDP_SIZE,
            version: 0,
            z_flag: 0,
            subnet: None,
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self {
            comments: true,
            question: true,
            opt: true,
            answer: true,
            authority: true,
            additional: true,
            statistics: true,
            ttl: true,
            human_ttl: false,
            show_class: true,
            show_query: false,
            ucode_translate: true,
            identify: false,
            short: false,
        }
    }
}

impl Display {
    /// Toggles every section at once.
    pub fn set_all(&mut self, on: bool) {
        self.comments = on;
        self.question = on;
        self.opt = on;
        self.answer = on;
        self.authority = on;
        self.additional = on;
        self.statistics = on;
    }
}

impl Options {
    /// The active transport strategy. HTTPS wins over QUIC, which wins over DNSCrypt; everything
    /// else is plain DNS over UDP, TCP or TLS.
    pub fn transport_kind(&self) -> TransportKind {
        if self.transport.https {
            TransportKind::Https
        } else if self.transport.quic {
            TransportKind::Quic
        } else if self.transport.dnscrypt {
            TransportKind::DnsCrypt
        } else {
            TransportKind::Standard
        }
    }

    /// The port to use when the server address does not carry one.
    pub fn default_port(&self) -> u16 {
        if self.transport.tls || self.transport.quic {
            853
        } else {
            53
        }
    }

    /// Applies the port default and clamps timeout and retries to their minimums.
    pub fn finalize(&mut self) {
        if self.request.port == 0 {
            self.request.port = self.default_port();
        }
        if self.request.timeout < MIN_TIMEOUT {
            self.request.timeout = MIN_TIMEOUT;
        }
        if self.request.retries < 0 {
            self.request.retries = 0;
        }
    }

    /// The query type, or A if none was chosen yet.
    pub fn qtype(&self) -> RecordType {
        self.request.qtype.unwrap_or(RecordType::A)
    }
}

/// Parses an EDNS client subnet in CIDR notation. The literal `0` stands for `0.0.0.0/0`, i.e.
/// "do not use my subnet".
pub fn parse_subnet(subnet: &str) -> Result<ClientSubnet, ClassifyError> {
    if subnet == "0" {
        return Ok(ClientSubnet::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
    }
    let invalid = || ClassifyError::Subnet(subnet.to_string());

    let (address, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max_prefix = if address.is_ipv4() { 32 } else { 128 };
    if prefix > max_prefix {
        return Err(invalid());
    }
    Ok(ClientSubnet::new(address, prefix))
}

/// Parses the EDNS Z flag value. Accepts decimal, `0x` hex and `0o` octal. The DO bit is
/// masked off.
pub fn parse_zflag(value: &str) -> Result<u16, ClassifyError> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else if let Some(oct) = value.strip_prefix("0o") {
        u16::from_str_radix(oct, 8)
    } else {
        value.parse()
    };
    parsed
        .map(|z| z & 0x7FFF)
        .map_err(|_| ClassifyError::ZFlag(value.to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::{parse_subnet, parse_zflag, Options, TransportKind};

    #[test]
    fn subnet_families() {
        let subnet = parse_subnet("127.0.0.1/32").unwrap();
        assert_eq!(subnet.family, 1);
        assert_eq!(subnet.source_prefix, 32);

        let zero = parse_subnet("0").unwrap();
        assert_eq!(zero.family, 1);
        assert_eq!(zero.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(zero.source_prefix, 0);

        assert_eq!(parse_subnet("::/0").unwrap().family, 2);
    }

    #[test]
    fn malformed_subnets_are_rejected() {
        for bad in ["", "127.0.0.1", "127.0.0.1/33", "::/129", "example/8", "10.0.0.0/x"] {
            assert!(parse_subnet(bad).is_err(), "{} was accepted", bad);
        }
    }

    #[test]
    fn zflag_bases_and_mask() {
        assert_eq!(parse_zflag("0x8001").unwrap(), 1);
        assert_eq!(parse_zflag("0o17").unwrap(), 15);
        assert_eq!(parse_zflag("42").unwrap(), 42);
        assert!(parse_zflag("forty-two").is_err());
    }

    #[test]
    fn finalize_applies_floors_and_port() {
        let mut opts = Options::default();
        opts.request.timeout = Duration::from_millis(10);
        opts.request.retries = -3;
        opts.finalize();
        assert_eq!(opts.request.timeout, Duration::from_millis(500));
        assert_eq!(opts.request.retries, 0);
        assert_eq!(opts.request.port, 53);

        let mut tls = Options::default();
        tls.transport.tls = true;
        tls.finalize();
        assert_eq!(tls.request.port, 853);
    }

    #[test]
    fn transport_precedence() {
        let mut opts = Options::default();
        assert_eq!(opts.transport_kind(), TransportKind::Standard);
        opts.transport.dnscrypt = true;
        assert_eq!(opts.transport_kind(), TransportKind::DnsCrypt);
        opts.transport.quic = true;
        assert_eq!(opts.transport_kind(), TransportKind::Quic);
        opts.transport.https = true;
        assert_eq!(opts.transport_kind(), TransportKind::Https);
    }
}
