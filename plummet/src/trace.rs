//! Iterative resolution (`+trace`): start at a root server and follow delegations until a server
//! answers the question itself.

use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::{Name, RData, Record, RecordType};
use lazy_static::lazy_static;
use owo_colors::{OwoColorize, Stream};
use plummet_proto::Message;
use rand::seq::IteratorRandom;
use tracing::{debug, warn};

use crate::error::{Error, RenderError, TransportError};
use crate::net::{join_host_port, Resolver, Response, StandardResolver};
use crate::options::Options;
use crate::print;
use crate::query::build_query;

/// Upper bound on the number of queries a single trace may send, nested address lookups included.
pub const MAX_HOPS: usize = 32;

const DNS_PORT: u16 = 53;

/// A server that was (or will be) asked during a trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nameserver {
    pub ip: IpAddr,
    pub hostname: Option<String>,
    pub port: u16,
}

impl Nameserver {
    /// `ip:port`, the form the transports expect.
    pub fn address(&self) -> String {
        join_host_port(&self.ip.to_string(), self.port)
    }
}

impl Display for Nameserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(hostname) => write!(f, "{} ({})", self.address(), hostname),
            None => write!(f, "{}", self.address()),
        }
    }
}

lazy_static! {
    /// IPv6 addresses of the root servers ({a,b,c,d,e,f,g,h,i,j,k,l,m}.root-servers.net).
    static ref ROOT_IPV6: Vec<Nameserver> = root_servers([
        Ipv6Addr::new(0x2001, 0x503, 0xba3e, 0, 0, 0, 0x2, 0x30),
        Ipv6Addr::new(0x2801, 0x1b8, 0x10, 0, 0, 0, 0, 0xb),
        Ipv6Addr::new(0x2001, 0x500, 0x2, 0, 0, 0, 0, 0xc),
        Ipv6Addr::new(0x2001, 0x500, 0x2d, 0, 0, 0, 0, 0xd),
        Ipv6Addr::new(0x2001, 0x500, 0xa8, 0, 0, 0, 0, 0xe),
        Ipv6Addr::new(0x2001, 0x500, 0x2f, 0, 0, 0, 0, 0xf),
        Ipv6Addr::new(0x2001, 0x500, 0x12, 0, 0, 0, 0, 0xd0d),
        Ipv6Addr::new(0x2001, 0x500, 0x1, 0, 0, 0, 0, 0x53),
        Ipv6Addr::new(0x2001, 0x7fe, 0, 0, 0, 0, 0, 0x53),
        Ipv6Addr::new(0x2001, 0x503, 0xc27, 0, 0, 0, 0x2, 0x30),
        Ipv6Addr::new(0x2001, 0x7fd, 0, 0, 0, 0, 0, 0x1),
        Ipv6Addr::new(0x2001, 0x500, 0x9f, 0, 0, 0, 0, 0x42),
        Ipv6Addr::new(0x2001, 0xdc3, 0, 0, 0, 0, 0, 0x35),
    ].map(IpAddr::V6));

    /// IPv4 addresses of the root servers ({a,b,c,d,e,f,g,h,i,j,k,l,m}.root-servers.net).
    static ref ROOT_IPV4: Vec<Nameserver> = root_servers([
        Ipv4Addr::new(198, 41, 0, 4),
        Ipv4Addr::new(170, 247, 170, 2),
        Ipv4Addr::new(192, 33, 4, 12),
        Ipv4Addr::new(199, 7, 91, 13),
        Ipv4Addr::new(192, 203, 230, 10),
        Ipv4Addr::new(192, 5, 5, 241),
        Ipv4Addr::new(192, 112, 36, 4),
        Ipv4Addr::new(198, 97, 190, 53),
        Ipv4Addr::new(192, 36, 148, 17),
        Ipv4Addr::new(192, 58, 128, 30),
        Ipv4Addr::new(193, 0, 14, 129),
        Ipv4Addr::new(199, 7, 83, 42),
        Ipv4Addr::new(202, 12, 27, 33),
    ].map(IpAddr::V4));
}

fn root_servers(ips: [IpAddr; 13]) -> Vec<Nameserver> {
    ('a'..='m')
        .zip(ips)
        .map(|(letter, ip)| Nameserver {
            ip,
            hostname: Some(format!("{}.root-servers.net.", letter)),
            port: DNS_PORT,
        })
        .collect()
}

/// One step of a trace: which server was asked, for which zone, and what it said.
#[derive(Clone, Debug)]
pub struct Hop {
    pub zone: Name,
    pub nameserver: Nameserver,
    pub response: Response,
}

/// Traces the query described by `opts` over UDP or TCP, starting at a random root server. IPv6
/// is tried first unless `-4` is given; if that fails, the trace is repeated over IPv4.
pub fn trace(opts: &Options) -> Result<Vec<Hop>, Error> {
    trace_with(opts, |opts| {
        Ok(Box::new(StandardResolver::new(opts)?) as Box<dyn Resolver>)
    })
}

/// Like [`trace()`], but with a custom way of creating the resolver for each hop.
pub fn trace_with<F>(opts: &Options, load: F) -> Result<Vec<Hop>, Error>
where
    F: FnMut(&Options) -> Result<Box<dyn Resolver>, TransportError>,
{
    let name = opts.request.name.clone();
    let qtype = opts.qtype();
    let mut tracer = Tracer::new(opts, load);
    let mut rng = rand::thread_rng();

    if !opts.transport.ipv4 {
        if let Some(root) = ROOT_IPV6.iter().choose(&mut rng) {
            match tracer.resolve(&name, qtype, root) {
                Ok((_, hops)) => return Ok(hops),
                Err(e) if opts.transport.ipv6 => return Err(e),
                Err(e) => warn!("Tracing via IPv6 failed, retrying via IPv4: {}", e),
            }
        }
        tracer.sent = 0;
    }

    let root = ROOT_IPV4
        .iter()
        .choose(&mut rng)
        .ok_or_else(|| TransportError::Resolve("the root zone".into()))?;
    tracer.resolve(&name, qtype, root).map(|(_, hops)| hops)
}

struct Tracer<F> {
    /// Options every hop starts from: plain DNS, no recursion.
    base: Options,
    load: F,
    sent: usize,
}

impl<F> Tracer<F>
where
    F: FnMut(&Options) -> Result<Box<dyn Resolver>, TransportError>,
{
    fn new(opts: &Options, load: F) -> Self {
        let mut base = opts.clone();
        base.flags.rd = false;
        base.transport.tls = false;
        base.transport.https = false;
        base.transport.quic = false;
        base.transport.dnscrypt = false;
        base.display.show_query = false;
        Self {
            base,
            load,
            sent: 0,
        }
    }

    fn ask(&mut self, name: &str, qtype: RecordType, server: &Nameserver) -> Result<Response, Error> {
        self.sent += 1;
        if self.sent > MAX_HOPS {
            return Err(TransportError::TooManyHops(MAX_HOPS).into());
        }
        let mut opts = self.base.clone();
        opts.request.name = name.to_string();
        opts.request.qtype = Some(qtype);
        opts.request.server = server.address();

        debug!("Asking {} for {} {}.", server, name, qtype);
        let query = build_query(&opts)?;
        let mut resolver = (self.load)(&opts)?;
        Ok(resolver.look_up(&query)?)
    }

    /// Follows delegations from `root` until a server has an answer, is authoritative or knows
    /// nothing further. Returns the matching record, if any, and every hop taken.
    fn resolve(
        &mut self,
        name: &str,
        qtype: RecordType,
        root: &Nameserver,
    ) -> Result<(Option<Record>, Vec<Hop>), Error> {
        let qname = Name::from_ascii(name).map_err(|_| TransportError::Resolve(name.to_string()))?;
        let use_ipv6 = root.ip.is_ipv6();
        let mut nameserver = root.clone();
        let mut zone = Name::root();
        let mut hops = Vec::new();

        loop {
            let response = self.ask(name, qtype, &nameserver)?;
            let reply = response.message.clone();
            hops.push(Hop {
                zone: zone.clone(),
                nameserver: nameserver.clone(),
                response,
            });

            if let Some(answer) = find_answer(&reply, &qname, qtype) {
                return Ok((Some(answer.clone()), hops));
            }
            if reply.header.aa {
                return Ok((None, hops));
            }

            if let Some((next_zone, hostname, ip)) = find_glue(use_ipv6, &reply) {
                nameserver = Nameserver {
                    ip,
                    hostname: Some(hostname.to_string()),
                    port: DNS_PORT,
                };
                zone = next_zone.clone();
            } else if let Some((hostname, next_zone)) = select_ns(&reply) {
                let hostname = hostname.to_ascii();
                let ip = self.resolve_address(&hostname, use_ipv6, root)?;
                nameserver = Nameserver {
                    ip,
                    hostname: Some(hostname),
                    port: DNS_PORT,
                };
                zone = next_zone.clone();
            } else {
                return Ok((None, hops));
            }
        }
    }

    /// Looks up the address of a nameserver that came without glue, starting from the root again.
    /// With IPv6, AAAA is tried before A.
    fn resolve_address(
        &mut self,
        hostname: &str,
        use_ipv6: bool,
        root: &Nameserver,
    ) -> Result<IpAddr, Error> {
        let qtypes: &[RecordType] = if use_ipv6 {
            &[RecordType::AAAA, RecordType::A]
        } else {
            &[RecordType::A]
        };
        for &qtype in qtypes {
            if let (Some(record), _) = self.resolve(hostname, qtype, root)? {
                if let Some(ip) = address_of(&record) {
                    return Ok(ip);
                }
            }
        }
        Err(TransportError::Resolve(hostname.to_string()).into())
    }
}

fn address_of(record: &Record) -> Option<IpAddr> {
    match record.data()? {
        RData::A(a) => Some(IpAddr::V4(a.0)),
        RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
        _ => None,
    }
}

fn find_answer<'a>(reply: &'a Message, qname: &Name, qtype: RecordType) -> Option<&'a Record> {
    reply
        .answers
        .iter()
        .find(|rec| rec.name() == qname && rec.record_type() == qtype)
}

/// Returns (zone name, nameserver hostname, nameserver ip) for the first delegation that comes
/// with a glue record.
fn find_glue(prefer_ipv6: bool, reply: &Message) -> Option<(&Name, &Name, IpAddr)> {
    // nameserver hostname and the zone it serves
    let nameservers: Vec<(&Name, &Name)> = delegations(reply).collect();
    let find_glue_with_type = |rtype: RecordType| {
        reply.additional.iter().find_map(|rec| {
            if rec.record_type() != rtype {
                return None;
            }
            let (ns, zone) = nameservers.iter().find(|(ns, _)| *ns == rec.name())?;
            Some((*zone, *ns, address_of(rec)?))
        })
    };
    if prefer_ipv6 {
        return find_glue_with_type(RecordType::AAAA)
            .or_else(|| find_glue_with_type(RecordType::A));
    }
    find_glue_with_type(RecordType::A)
}

/// Randomly chooses one of the delegated nameservers, returning its hostname and the zone.
fn select_ns(reply: &Message) -> Option<(&Name, &Name)> {
    delegations(reply).choose(&mut rand::thread_rng())
}

/// (nameserver hostname, zone) for every NS record in the authority section.
fn delegations(reply: &Message) -> impl Iterator<Item = (&Name, &Name)> {
    reply.authority.iter().filter_map(|rec| match rec.data()? {
        RData::NS(ns) => Some((&ns.0, rec.name())),
        _ => None,
    })
}

/// Renders every hop, each under a headline naming the zone and the server that answered.
pub fn render(hops: &[Hop], opts: &Options) -> Result<String, RenderError> {
    let headline_style = owo_colors::style().bold().blue();
    let mut out = Vec::with_capacity(hops.len());
    for hop in hops {
        let zone = if hop.zone.is_root() {
            "root".to_string()
        } else {
            hop.zone.to_ascii()
        };
        let headline = format!(
            ";; Received response from {} nameservers ({})",
            zone, hop.nameserver
        );

        let mut hop_opts = opts.clone();
        hop_opts.request.server = hop.nameserver.address();
        out.push(format!(
            "{}\n{}",
            headline.if_supports_color(Stream::Stdout, |text| text.style(headline_style)),
            print::render(&hop.response, &hop_opts)?
        ));
    }
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::str::FromStr;
    use std::time::Duration;

    use hickory_proto::rr::rdata::{A, NS};
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use plummet_proto::Message;

    use super::{render, trace_with, Nameserver, MAX_HOPS, ROOT_IPV4};
    use crate::error::{Error, TransportError};
    use crate::net::{Resolver, Response};
    use crate::options::Options;

    /// Answers by server address: a delegation map plus the final answers.
    #[derive(Clone)]
    struct Zones {
        replies: HashMap<String, Message>,
    }

    struct ZoneResolver {
        reply: Option<Message>,
    }

    impl Resolver for ZoneResolver {
        fn look_up(&mut self, query: &Message) -> Result<Response, TransportError> {
            assert!(!query.header.rd);
            let mut message = self.reply.clone().ok_or(TransportError::Timeout)?;
            message.header.id = query.header.id;
            message.queries = query.queries.clone();
            Ok(Response {
                message,
                rtt: Duration::from_millis(1),
            })
        }
    }

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn delegation(zone: &str, ns: &str, glue: Option<Ipv4Addr>) -> Message {
        let mut msg = Message::default();
        msg.header.qr = true;
        msg.authority.push(Record::from_rdata(
            name(zone),
            172800,
            RData::NS(NS(name(ns))),
        ));
        if let Some(ip) = glue {
            msg.additional
                .push(Record::from_rdata(name(ns), 172800, RData::A(A(ip))));
        }
        msg
    }

    fn answer(owner: &str, ip: Ipv4Addr) -> Message {
        let mut msg = Message::default();
        msg.header.qr = true;
        msg.header.aa = true;
        msg.answers
            .push(Record::from_rdata(name(owner), 300, RData::A(A(ip))));
        msg
    }

    fn options() -> Options {
        let mut opts = Options::default();
        opts.request.name = "www.example.com.".into();
        opts.request.qtype = Some(RecordType::A);
        opts.transport.ipv4 = true;
        opts
    }

    fn run(zones: Zones, opts: &Options) -> Result<Vec<super::Hop>, Error> {
        trace_with(opts, move |opts| {
            let server = &opts.request.server;
            let reply = if ROOT_IPV4.iter().any(|root| &root.address() == server) {
                zones.replies.get("root").cloned()
            } else {
                zones.replies.get(server).cloned()
            };
            Ok(Box::new(ZoneResolver { reply }) as Box<dyn Resolver>)
        })
    }

    #[test]
    fn follows_glue_to_the_answer() {
        let mut replies = HashMap::new();
        replies.insert(
            "root".to_string(),
            delegation("com.", "a.gtld.test.", Some(Ipv4Addr::new(192, 0, 2, 10))),
        );
        replies.insert(
            "192.0.2.10:53".to_string(),
            delegation("example.com.", "ns.example.com.", Some(Ipv4Addr::new(192, 0, 2, 20))),
        );
        replies.insert(
            "192.0.2.20:53".to_string(),
            answer("www.example.com.", Ipv4Addr::new(192, 0, 2, 80)),
        );

        let hops = run(Zones { replies }, &options()).unwrap();
        assert_eq!(hops.len(), 3);
        assert!(hops[0].zone.is_root());
        assert_eq!(hops[1].zone, name("com."));
        assert_eq!(hops[2].zone, name("example.com."));
        assert_eq!(hops[2].nameserver.address(), "192.0.2.20:53");
        assert_eq!(hops[2].nameserver.hostname.as_deref(), Some("ns.example.com."));

        let out = render(&hops, &options()).unwrap();
        assert!(out.contains(";; Received response from root nameservers ("));
        assert!(out.contains(
            ";; Received response from example.com. nameservers (192.0.2.20:53 (ns.example.com.))"
        ));
        assert!(out.contains(";; SERVER: 192.0.2.20:53 (UDP)"));
    }

    #[test]
    fn resolves_nameservers_without_glue() {
        let mut replies = HashMap::new();
        // the root delegates com. with glue, com. delegates example.com. without
        replies.insert(
            "root".to_string(),
            delegation("com.", "a.gtld.test.", Some(Ipv4Addr::new(192, 0, 2, 10))),
        );
        let mut com = delegation("example.com.", "ns.example.net.", None);
        // the same server also knows the address of the out-of-bailiwick nameserver
        com.answers.push(Record::from_rdata(
            name("ns.example.net."),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 30))),
        ));
        replies.insert("192.0.2.10:53".to_string(), com);
        replies.insert(
            "192.0.2.30:53".to_string(),
            answer("www.example.com.", Ipv4Addr::new(192, 0, 2, 80)),
        );

        let hops = run(Zones { replies }, &options()).unwrap();
        let last = hops.last().unwrap();
        assert_eq!(last.nameserver.ip, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 30)));
        assert_eq!(last.zone, name("example.com."));
    }

    #[test]
    fn delegation_loops_are_cut_off() {
        let mut replies = HashMap::new();
        replies.insert(
            "root".to_string(),
            delegation("com.", "a.gtld.test.", Some(Ipv4Addr::new(192, 0, 2, 10))),
        );
        replies.insert(
            "192.0.2.10:53".to_string(),
            delegation("com.", "a.gtld.test.", Some(Ipv4Addr::new(192, 0, 2, 10))),
        );
        let res = run(Zones { replies }, &options());
        assert!(matches!(
            res,
            Err(Error::Transport(TransportError::TooManyHops(MAX_HOPS)))
        ));
    }

    #[test]
    fn stops_without_further_delegation() {
        let mut replies = HashMap::new();
        replies.insert("root".to_string(), Message::default());
        let hops = run(Zones { replies }, &options()).unwrap();
        assert_eq!(hops.len(), 1);
    }

    #[test]
    fn nameserver_display() {
        let ns = Nameserver {
            ip: "2001:db8::1".parse().unwrap(),
            hostname: Some("ns.example.".into()),
            port: 53,
        };
        assert_eq!(ns.to_string(), "[2001:db8::1]:53 (ns.example.)");
    }
}
