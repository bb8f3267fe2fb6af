//! Command line flags. Everything that is not a flag is handed to the dig-style classifier.

use std::ffi::OsString;
use std::str::FromStr;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use hickory_proto::rr::{DNSClass, RecordType};
use tracing::{debug, info};

use crate::classify::{classify, to_ascii};
use crate::conf::NameserverSource;
use crate::error::{ClassifyError, Error};
use crate::options::{parse_subnet, parse_zflag, Options, OutputFormat};

/// A dig-like DNS client.
///
/// Free-form arguments may appear in any order, mixed with flags: a domain name, an IP address
/// (with -x), a record type, `@server` and dig-style `+[no]switches`.
#[derive(Clone, Debug, Parser)]
#[command(name = "plummet", version, about, long_about = None)]
pub struct Cli {
    /// Port to send the query to [default: 53, or 853 for TLS and QUIC]
    #[arg(short, long, default_value_t = 0, hide_default_value = true)]
    pub port: u16,

    /// Domain name to query [default: .]
    #[arg(short, long)]
    pub query: Option<String>,

    /// Class to query
    #[arg(short, long, default_value = "IN")]
    pub class: String,

    /// Type to query [default: A]
    #[arg(short = 't', long = "qtype", value_name = "TYPE")]
    pub qtype: Option<String>,

    /// Only use IPv4
    #[arg(short = '4', long = "ipv4")]
    pub ipv4: bool,

    /// Only use IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Do a reverse lookup
    #[arg(short = 'x', long)]
    pub reverse: bool,

    /// Timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 5.0)]
    pub timeout: f64,

    /// Number of times to retry
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    pub retries: i32,

    /// Disable EDNS entirely
    #[arg(long)]
    pub no_edns: bool,

    /// EDNS version
    #[arg(long, value_name = "VERSION", default_value_t = 0)]
    pub edns_ver: u8,

    /// Request DNSSEC records
    #[arg(short = 'D', long)]
    pub dnssec: bool,

    /// Send the EDNS expire option
    #[arg(long)]
    pub expire: bool,

    /// Send the EDNS NSID option
    #[arg(short, long)]
    pub nsid: bool,

    /// Do not send an EDNS cookie
    #[arg(long)]
    pub no_cookie: bool,

    /// Send the EDNS TCP keepalive option
    #[arg(long)]
    pub keep_alive: bool,

    /// EDNS UDP buffer size
    #[arg(short, long, value_name = "SIZE", default_value_t = 1232)]
    pub buffer_size: u16,

    /// EDNS Z flag value (decimal, 0x hex or 0o octal)
    #[arg(long, value_name = "VALUE", default_value = "0")]
    pub zflag: String,

    /// EDNS client subnet in CIDR notation, or 0 to opt out
    #[arg(long, value_name = "SUBNET")]
    pub subnet: Option<String>,

    /// Send the EDNS padding option
    #[arg(long)]
    pub pad: bool,

    /// Keep BADCOOKIE replies instead of retrying with the server's cookie
    #[arg(long)]
    pub no_bad_cookie: bool,

    /// Keep truncated replies instead of retrying over TCP
    #[arg(long)]
    pub no_truncate: bool,

    /// Use TCP
    #[arg(long)]
    pub tcp: bool,

    /// Use DNSCrypt
    #[arg(long)]
    pub dnscrypt: bool,

    /// Use DNS over TLS
    #[arg(short = 'T', long)]
    pub tls: bool,

    /// Use DNS over HTTPS
    #[arg(short = 'H', long)]
    pub https: bool,

    /// Use DNS over QUIC
    #[arg(short = 'Q', long)]
    pub quic: bool,

    /// Server name to use for TLS verification
    #[arg(long, value_name = "HOST")]
    pub tls_host: Option<String>,

    /// Do not verify the server's TLS certificate
    #[arg(long)]
    pub tls_no_verify: bool,

    /// Use GET instead of POST for DNS over HTTPS
    #[arg(long)]
    pub https_get: bool,

    /// Set the AA (authoritative answer) bit
    #[arg(long)]
    pub aa: bool,

    /// Set the AD (authenticated data) bit
    #[arg(long)]
    pub ad: bool,

    /// Set the CD (checking disabled) bit
    #[arg(long)]
    pub cd: bool,

    /// Set the QR (response) bit
    #[arg(long)]
    pub qr: bool,

    /// Set the RD (recursion desired) bit [default]
    #[arg(long, overrides_with = "no_rd")]
    pub rd: bool,

    /// Clear the RD (recursion desired) bit
    #[arg(long, overrides_with = "rd")]
    pub no_rd: bool,

    /// Set the RA (recursion available) bit
    #[arg(long)]
    pub ra: bool,

    /// Set the TC (truncated) bit
    #[arg(long)]
    pub tc: bool,

    /// Set the Z (zero) bit
    #[arg(short = 'z')]
    pub z: bool,

    /// Only print the answers' data
    #[arg(short, long)]
    pub short: bool,

    /// Print as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Print as XML
    #[arg(short = 'X', long)]
    pub xml: bool,

    /// Print as YAML
    #[arg(short, long)]
    pub yaml: bool,

    /// Hide the comments
    #[arg(long)]
    pub no_comments: bool,

    /// Hide the question section
    #[arg(long)]
    pub no_question: bool,

    /// Hide the OPT pseudo-section
    #[arg(long)]
    pub no_opt: bool,

    /// Hide the answer section
    #[arg(long)]
    pub no_answer: bool,

    /// Hide the authority section
    #[arg(long)]
    pub no_authority: bool,

    /// Hide the additional section
    #[arg(long)]
    pub no_additional: bool,

    /// Hide the statistics
    #[arg(long)]
    pub no_statistics: bool,

    /// Resolve iteratively, starting at a root server
    #[arg(long)]
    pub trace: bool,

    /// Log level: 0 errors, 1 warnings, 2 info, 3 debug
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        default_value_t = 1,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "2"
    )]
    pub verbosity: u8,

    /// Name, type, class, @server and +switches, in any order
    #[arg(value_name = "ARGS")]
    pub tokens: Vec<String>,
}

/// Parses the command line. If help or version output was requested, it is printed and
/// [`Error::NotAnError`] is returned.
pub fn parse_from<I, T>(args: I) -> Result<Cli, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(cli),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            Err(Error::NotAnError)
        }
        Err(e) => {
            let rendered = e.render().to_string();
            let first = rendered.lines().next().unwrap_or_default();
            Err(ClassifyError::Arguments(
                first.strip_prefix("error: ").unwrap_or(first).to_string(),
            )
            .into())
        }
    }
}

impl Cli {
    /// Builds the options from the flags, then classifies the free-form arguments on top of
    /// them.
    pub fn into_options(self, nameservers: &dyn NameserverSource) -> Result<Options, ClassifyError> {
        let mut opts = Options::default();

        let request = &mut opts.request;
        request.port = self.port;
        request.qclass = DNSClass::from_str(&self.class.to_uppercase())
            .map_err(|_| ClassifyError::Class(self.class.clone()))?;
        if let Some(qtype) = &self.qtype {
            request.qtype = Some(
                RecordType::from_str(&qtype.to_uppercase())
                    .map_err(|_| ClassifyError::Type(qtype.clone()))?,
            );
        }
        if let Some(name) = &self.query {
            request.name = to_ascii(name)?;
        }
        // negative and non-finite values end up at the timeout floor
        request.timeout = Duration::try_from_secs_f64(self.timeout).unwrap_or_default();
        request.retries = self.retries;

        let transport = &mut opts.transport;
        transport.ipv4 = self.ipv4;
        transport.ipv6 = self.ipv6;
        transport.tcp = self.tcp;
        transport.dnscrypt = self.dnscrypt;
        transport.tls = self.tls;
        transport.https = self.https;
        transport.quic = self.quic;
        transport.tls_host = self.tls_host;
        transport.tls_no_verify = self.tls_no_verify;
        transport.https_get = self.https_get;
        transport.ignore_truncation = self.no_truncate;
        transport.ignore_bad_cookie = self.no_bad_cookie;

        let flags = &mut opts.flags;
        flags.aa = self.aa;
        flags.ad = self.ad;
        flags.cd = self.cd;
        flags.qr = self.qr;
        flags.rd = !self.no_rd;
        flags.ra = self.ra;
        flags.tc = self.tc;
        flags.z = self.z;

        let edns = &mut opts.edns;
        edns.enabled = !self.no_edns;
        edns.cookie = !self.no_cookie;
        edns.dnssec = self.dnssec;
        edns.expire = self.expire;
        edns.keep_open = self.keep_alive;
        edns.nsid = self.nsid;
        edns.padding = self.pad;
        edns.buf_size = self.buffer_size;
        edns.version = self.edns_ver;
        edns.z_flag = parse_zflag(&self.zflag)?;
        if let Some(subnet) = &self.subnet {
            edns.subnet = Some(parse_subnet(subnet)?);
        }

        let display = &mut opts.display;
        display.comments = !self.no_comments;
        display.question = !self.no_question;
        display.opt = !self.no_opt;
        display.answer = !self.no_answer;
        display.authority = !self.no_authority;
        display.additional = !self.no_additional;
        display.statistics = !self.no_statistics;
        display.short = self.short;

        opts.format = if self.json {
            OutputFormat::Json
        } else if self.xml {
            OutputFormat::Xml
        } else if self.yaml {
            OutputFormat::Yaml
        } else {
            OutputFormat::Text
        };
        opts.reverse = self.reverse;
        opts.trace = self.trace;

        info!("Flags parsed.");
        debug!("{:?}", opts);

        classify(&self.tokens, &mut opts, nameservers)?;

        info!("Options fully populated.");
        debug!("{:?}", opts);
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use clap::CommandFactory;
    use hickory_proto::rr::{DNSClass, RecordType};

    use super::{parse_from, Cli};
    use crate::error::{ClassifyError, Error};
    use crate::options::{Options, OutputFormat};

    fn options(args: &[&str]) -> Result<Options, Error> {
        let system: Vec<IpAddr> = vec!["192.0.2.53".parse().unwrap()];
        let cli = parse_from(std::iter::once("plummet").chain(args.iter().copied()))?;
        Ok(cli.into_options(&system)?)
    }

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let opts = options(&["example.com"]).unwrap();
        assert_eq!(opts.request.name, "example.com.");
        assert_eq!(opts.request.qtype, Some(RecordType::A));
        assert_eq!(opts.request.qclass, DNSClass::IN);
        assert_eq!(opts.request.server, "192.0.2.53");
        assert_eq!(opts.request.port, 53);
        assert_eq!(opts.request.timeout, Duration::from_secs(5));
        assert_eq!(opts.request.retries, 2);
        assert!(opts.flags.rd);
        assert!(opts.edns.enabled && opts.edns.cookie);
        assert_eq!(opts.edns.buf_size, 1232);
        assert_eq!(opts.format, OutputFormat::Text);
    }

    #[test]
    fn flags_and_free_form_arguments_mix() {
        let opts = options(&[
            "-t", "mx", "example.org", "--tcp", "+nocomments", "-D", "--no-rd", "-j",
        ])
        .unwrap();
        assert_eq!(opts.request.qtype, Some(RecordType::MX));
        assert_eq!(opts.request.name, "example.org.");
        assert!(opts.transport.tcp);
        assert!(!opts.display.comments);
        assert!(opts.edns.dnssec);
        assert!(!opts.flags.rd);
        assert_eq!(opts.format, OutputFormat::Json);
    }

    #[test]
    fn edns_flags() {
        let opts = options(&[
            "--no-cookie",
            "--nsid",
            "--zflag",
            "0x8003",
            "--subnet",
            "192.0.2.0/24",
            "-b",
            "4096",
            "--edns-ver",
            "1",
        ])
        .unwrap();
        assert!(!opts.edns.cookie);
        assert!(opts.edns.nsid);
        assert_eq!(opts.edns.z_flag, 3);
        assert_eq!(opts.edns.subnet.unwrap().source_prefix, 24);
        assert_eq!(opts.edns.buf_size, 4096);
        assert_eq!(opts.edns.version, 1);
    }

    #[test]
    fn floors_apply_after_parsing() {
        let opts = options(&["--timeout", "0.1", "--retries", "-1", "-T"]).unwrap();
        assert_eq!(opts.request.timeout, Duration::from_millis(500));
        assert_eq!(opts.request.retries, 0);
        assert_eq!(opts.request.port, 853);
        assert_eq!(opts.request.server, "dns.google");
    }

    #[test]
    fn verbosity_levels() {
        let cli = parse_from(["plummet", "example.com"]).unwrap();
        assert_eq!(cli.verbosity, 1);
        let cli = parse_from(["plummet", "-v", "example.com"]).unwrap();
        assert_eq!(cli.verbosity, 2);
        assert_eq!(cli.tokens, vec!["example.com"]);
        let cli = parse_from(["plummet", "--verbosity=3"]).unwrap();
        assert_eq!(cli.verbosity, 3);
    }

    #[test]
    fn reverse_flag() {
        let opts = options(&["-x", "192.0.2.1"]).unwrap();
        assert_eq!(opts.request.name, "1.2.0.192.in-addr.arpa.");
        assert_eq!(opts.request.qtype, Some(RecordType::PTR));
    }

    #[test]
    fn bad_values_are_classification_errors() {
        assert!(matches!(
            options(&["-c", "bogus"]),
            Err(Error::Classify(ClassifyError::Class(_)))
        ));
        assert!(matches!(
            options(&["-t", "bogus"]),
            Err(Error::Classify(ClassifyError::Type(_)))
        ));
        assert!(matches!(
            options(&["--subnet", "192.0.2.0"]),
            Err(Error::Classify(ClassifyError::Subnet(_)))
        ));
        match options(&["--frobnicate"]) {
            Err(Error::Classify(ClassifyError::Arguments(msg))) => {
                assert!(msg.contains("--frobnicate"), "{}", msg)
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn version_is_not_an_error() {
        assert!(matches!(
            parse_from(["plummet", "--version"]),
            Err(Error::NotAnError)
        ));
    }
}
