//! Classification of free-form dig-style tokens (`@server`, names, types and `+switches`) and the
//! defaults applied afterwards.

use std::net::IpAddr;
use std::str::FromStr;

use hickory_proto::rr::RecordType;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::conf::NameserverSource;
use crate::dig;
use crate::error::ClassifyError;
use crate::options::Options;
use crate::reverse::reverse_name;

/// AdGuard's public DNSCrypt resolver.
pub(crate) const DEFAULT_DNSCRYPT_SERVER: &str = "sdns://AQMAAAAAAAAAETk0LjE0MC4xNC4xNDo1NDQzINErR_JS3PLCu_iZEIbq95zkSV2LFsigxDIuUso_OQhzIjIuZG5zY3J5cHQuZGVmYXVsdC5uczEuYWRndWFyZC5jb20";
const DEFAULT_TLS_SERVER: &str = "dns.google";
const DEFAULT_HTTPS_SERVER: &str = "https://dns.cloudflare.com";
const DEFAULT_QUIC_SERVER: &str = "dns.adguard-dns.com";
/// Used when the system configuration has no usable nameserver.
const FALLBACK_SERVER: &str = "127.0.0.1";
const FALLBACK_SERVER_V6: &str = "::1";

/// Classifies every token, mutating `opts`, then fills in whatever is still unset. Later tokens
/// overwrite earlier ones.
pub fn classify<S: AsRef<str>>(
    tokens: &[S],
    opts: &mut Options,
    nameservers: &dyn NameserverSource,
) -> Result<(), ClassifyError> {
    for token in tokens {
        let token = token.as_ref();
        if let Some(server) = token.strip_prefix('@') {
            debug!("{} detected as a server.", server);
            set_server(server, opts);
        } else if let Some(switch) = token.strip_prefix('+') {
            debug!("{} detected as a dig switch.", token);
            dig::parse_switch(&switch.to_lowercase(), opts)?;
        } else if token.contains('.') {
            debug!("{} detected as a domain name.", token);
            opts.request.name = to_ascii(token)?;
        } else if let Ok(qtype) = RecordType::from_str(&token.to_uppercase()) {
            debug!("{} detected as a type.", token);
            opts.request.qtype = Some(qtype);
        } else {
            debug!("{} is unknown, assuming a domain name.", token);
            opts.request.name = to_ascii(token)?;
        }
    }

    apply_defaults(opts, nameservers)?;
    opts.finalize();
    Ok(())
}

fn set_server(server: &str, opts: &mut Options) {
    let transport = &mut opts.transport;
    if let Some(host) = server.strip_prefix("tls://") {
        transport.tls = true;
        opts.request.server = host.to_string();
    } else if server.starts_with("https://") {
        transport.https = true;
        opts.request.server = server.to_string();
        if let Ok(url) = url::Url::parse(server) {
            if url.path() != "/" && !url.path().is_empty() {
                transport.https_endpoint = url.path().to_string();
            }
        }
    } else if let Some(host) = server.strip_prefix("quic://") {
        transport.quic = true;
        opts.request.server = host.to_string();
    } else if server.starts_with("sdns://") {
        transport.dnscrypt = true;
        opts.request.server = server.to_string();
    } else if let Some(host) = server.strip_prefix("tcp://") {
        transport.tcp = true;
        opts.request.server = host.to_string();
    } else if let Some(host) = server.strip_prefix("udp://") {
        transport.tcp = false;
        opts.request.server = host.to_string();
    } else if transport.https {
        match server.split_once('/') {
            Some((host, endpoint)) => {
                opts.request.server = host.to_string();
                transport.https_endpoint = format!("/{}", endpoint);
            }
            None => opts.request.server = server.to_string(),
        }
    } else {
        opts.request.server = server.to_string();
    }
}

/// Converts a name to its ASCII (punycode) form. Addresses and the root pass through unchanged.
pub(crate) fn to_ascii(name: &str) -> Result<String, ClassifyError> {
    if name == "." || name.parse::<IpAddr>().is_ok() {
        return Ok(name.to_string());
    }
    idna::domain_to_ascii(name).map_err(|e| ClassifyError::Idna {
        name: name.to_string(),
        reason: format!("{:?}", e),
    })
}

fn apply_defaults(
    opts: &mut Options,
    nameservers: &dyn NameserverSource,
) -> Result<(), ClassifyError> {
    let request = &mut opts.request;
    if request.name.is_empty() {
        info!("No name given, querying the root.");
        request.name = ".".to_string();
        request.qtype.get_or_insert(RecordType::NS);
    } else if request.qtype.is_none() {
        request.qtype = Some(RecordType::A);
    }

    if opts.request.server.is_empty() {
        opts.request.server = default_server(opts, nameservers);
        info!("No server given, using {}.", opts.request.server);
    }

    if opts.reverse {
        if opts.request.qtype == Some(RecordType::A) {
            opts.request.qtype = Some(RecordType::PTR);
        }
        opts.request.name = reverse_name(&opts.request.name, opts.qtype())?;
    }

    if !opts.request.name.ends_with('.') {
        opts.request.name.push('.');
    }
    Ok(())
}

fn default_server(opts: &Options, nameservers: &dyn NameserverSource) -> String {
    let transport = &opts.transport;
    if transport.dnscrypt {
        return DEFAULT_DNSCRYPT_SERVER.to_string();
    } else if transport.tls {
        return DEFAULT_TLS_SERVER.to_string();
    } else if transport.https {
        return DEFAULT_HTTPS_SERVER.to_string();
    } else if transport.quic {
        return DEFAULT_QUIC_SERVER.to_string();
    }

    let fallback = if transport.ipv6 {
        FALLBACK_SERVER_V6
    } else {
        FALLBACK_SERVER
    };
    let servers = match nameservers.nameservers() {
        Ok(servers) => servers,
        Err(e) => {
            warn!("Could not get the system's nameservers, using {}: {}", fallback, e);
            return fallback.to_string();
        }
    };

    let chosen = if transport.ipv4 {
        servers.iter().find(|ip| ip.is_ipv4())
    } else if transport.ipv6 {
        servers.iter().find(|ip| ip.is_ipv6())
    } else {
        servers.choose(&mut rand::thread_rng())
    };
    match chosen {
        Some(ip) => ip.to_string(),
        None => {
            warn!("No usable nameserver configured, using {}.", fallback);
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use hickory_proto::rr::RecordType;

    use super::classify;
    use crate::error::ClassifyError;
    use crate::options::{Options, TransportKind};

    fn system() -> Vec<IpAddr> {
        vec!["192.0.2.53".parse().unwrap()]
    }

    fn classified(tokens: &[&str]) -> Options {
        let mut opts = Options::default();
        classify(tokens, &mut opts, &system()).unwrap();
        opts
    }

    #[test]
    fn name_and_type_in_any_order() {
        for tokens in [["example.com", "MX"], ["mx", "example.com"]] {
            let opts = classified(&tokens);
            assert_eq!(opts.request.name, "example.com.");
            assert_eq!(opts.request.qtype, Some(RecordType::MX));
        }
    }

    #[test]
    fn defaults_without_name_or_type() {
        let opts = classified(&[]);
        assert_eq!(opts.request.name, ".");
        assert_eq!(opts.request.qtype, Some(RecordType::NS));
        assert_eq!(opts.request.server, "192.0.2.53");

        let opts = classified(&["example.org"]);
        assert_eq!(opts.request.qtype, Some(RecordType::A));
    }

    #[test]
    fn idna_names_become_punycode() {
        let opts = classified(&["bücher.example"]);
        assert_eq!(opts.request.name, "xn--bcher-kva.example.");
    }

    #[test]
    fn undotted_unknown_token_is_a_name() {
        let opts = classified(&["localhost"]);
        assert_eq!(opts.request.name, "localhost.");
        assert_eq!(opts.request.qtype, Some(RecordType::A));
    }

    #[test]
    fn last_token_wins() {
        let opts = classified(&["example.com", "example.net", "A", "TXT", "@192.0.2.1", "@192.0.2.2"]);
        assert_eq!(opts.request.name, "example.net.");
        assert_eq!(opts.request.qtype, Some(RecordType::TXT));
        assert_eq!(opts.request.server, "192.0.2.2");
    }

    #[test]
    fn server_schemes_select_transport() {
        let opts = classified(&["@tls://dns.example"]);
        assert!(opts.transport.tls);
        assert_eq!(opts.request.server, "dns.example");
        assert_eq!(opts.request.port, 853);

        let opts = classified(&["@quic://dns.example"]);
        assert_eq!(opts.transport_kind(), TransportKind::Quic);
        assert_eq!(opts.request.server, "dns.example");

        let opts = classified(&["@tcp://192.0.2.1"]);
        assert!(opts.transport.tcp);

        let opts = classified(&["@sdns://AQcAAAAAAAAA"]);
        assert_eq!(opts.transport_kind(), TransportKind::DnsCrypt);
        assert_eq!(opts.request.server, "sdns://AQcAAAAAAAAA");
    }

    #[test]
    fn https_server_keeps_endpoint() {
        let opts = classified(&["@https://dns.example/dns-query", "example.com"]);
        assert_eq!(opts.transport_kind(), TransportKind::Https);
        assert_eq!(opts.request.server, "https://dns.example/dns-query");
        assert_eq!(opts.transport.https_endpoint, "/dns-query");
        assert_eq!(opts.request.qtype, Some(RecordType::A));

        let opts = classified(&["+https", "@dns.example/custom"]);
        assert_eq!(opts.request.server, "dns.example");
        assert_eq!(opts.transport.https_endpoint, "/custom");
    }

    #[test]
    fn transport_defaults_for_server() {
        assert_eq!(classified(&["+tls"]).request.server, "dns.google");
        assert_eq!(
            classified(&["+https"]).request.server,
            "https://dns.cloudflare.com"
        );
        assert!(classified(&["+dnscrypt"]).request.server.starts_with("sdns://"));
    }

    #[test]
    fn address_family_filters_system_servers() {
        let servers: Vec<IpAddr> = vec!["192.0.2.53".parse().unwrap(), "2001:db8::53".parse().unwrap()];
        let mut opts = Options::default();
        opts.transport.ipv6 = true;
        classify(&["example.com"], &mut opts, &servers).unwrap();
        assert_eq!(opts.request.server, "2001:db8::53");

        let mut opts = Options::default();
        opts.transport.ipv4 = true;
        classify(&["example.com"], &mut opts, &servers).unwrap();
        assert_eq!(opts.request.server, "192.0.2.53");

        let mut opts = Options::default();
        opts.transport.ipv6 = true;
        classify(&["example.com"], &mut opts, &system()).unwrap();
        assert_eq!(opts.request.server, "::1");
    }

    #[test]
    fn reverse_switches_a_to_ptr() {
        let mut opts = Options::default();
        opts.reverse = true;
        classify(&["8.8.4.4"], &mut opts, &system()).unwrap();
        assert_eq!(opts.request.name, "4.4.8.8.in-addr.arpa.");
        assert_eq!(opts.request.qtype, Some(RecordType::PTR));

        let mut opts = Options::default();
        opts.reverse = true;
        classify(&["2606:4700:4700::1111"], &mut opts, &system()).unwrap();
        assert!(opts.request.name.ends_with(".ip6.arpa."));

        let mut opts = Options::default();
        opts.reverse = true;
        classify(&["1-800-555-1234", "NAPTR"], &mut opts, &system()).unwrap();
        assert_eq!(opts.request.name, "4.3.2.1.5.5.5.0.0.8.1.e164.arpa.");

        let mut opts = Options::default();
        opts.reverse = true;
        assert!(matches!(
            classify(&["example.com"], &mut opts, &system()),
            Err(ClassifyError::Reverse { .. })
        ));
    }

    #[test]
    fn bad_switch_aborts() {
        let mut opts = Options::default();
        let err = classify(&["example.com", "+bogus", "MX"], &mut opts, &system()).unwrap_err();
        assert!(matches!(err, ClassifyError::UnknownSwitch(s) if s == "bogus"));
    }

    #[test]
    fn switches_are_case_insensitive() {
        let opts = classified(&["+NoRD", "+DNSSEC"]);
        assert!(!opts.flags.rd);
        assert!(opts.edns.dnssec);
    }

    #[test]
    fn classification_is_repeatable() {
        let tokens = ["@1.1.1.1", "example.com", "AAAA", "+nsid", "+subnet=192.0.2.0/24"];
        assert_eq!(classified(&tokens), classified(&tokens));
    }
}
