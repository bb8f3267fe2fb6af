//! Building the query message from the options and sending it, retrying failed attempts.

use hickory_proto::rr::Name;
use plummet_proto::edns::{code, Edns, EdnsOption, DEFAULT_UDP_SIZE};
use plummet_proto::Message;
use tracing::{debug, warn};

use crate::error::{Error, QueryError, TransportError};
use crate::net::{self, Resolver, Response};
use crate::options::Options;
use crate::print;

/// Number of random bytes in a client cookie.
const CLIENT_COOKIE_LEN: usize = 8;

/// Builds the query described by `opts`: one question, the requested header bits and, unless
/// disabled, an OPT record with the requested EDNS options.
pub fn build_query(opts: &Options) -> Result<Message, QueryError> {
    let name = Name::from_ascii(&opts.request.name)
        .map_err(|e| QueryError::Name(format!("{} ({})", opts.request.name, e)))?;
    let mut msg = Message::query(name, opts.qtype(), opts.request.qclass);

    let flags = &opts.flags;
    let header = &mut msg.header;
    header.aa = flags.aa;
    header.ad = flags.ad;
    header.cd = flags.cd;
    header.qr = flags.qr;
    header.rd = flags.rd;
    header.ra = flags.ra;
    header.tc = flags.tc;
    header.z = flags.z;

    let config = &opts.edns;
    if config.enabled {
        let mut edns = Edns::new(config.buf_size);
        edns.version = config.version;
        // the top bit is DO, which is only set by the dnssec toggle
        edns.z = config.z_flag & 0x7FFF;
        edns.dnssec_ok = config.dnssec;

        if config.cookie {
            let cookie: [u8; CLIENT_COOKIE_LEN] = rand::random();
            edns.options.push(EdnsOption::new(code::COOKIE, cookie.to_vec()));
        }
        if config.expire {
            edns.options.push(EdnsOption::new(code::EXPIRE, Vec::new()));
        }
        if config.keep_open {
            edns.options
                .push(EdnsOption::new(code::TCP_KEEPALIVE, Vec::new()));
        }
        if config.nsid {
            edns.options.push(EdnsOption::new(code::NSID, Vec::new()));
        }
        if config.padding {
            edns.options.push(EdnsOption::new(code::PADDING, Vec::new()));
        }
        if let Some(subnet) = &config.subnet {
            edns.options
                .push(EdnsOption::new(code::SUBNET, subnet.encode()));
        }
        msg.edns = Some(edns);
    } else if config.dnssec {
        debug!("DNSSEC requested without EDNS, adding a minimal OPT record.");
        let mut edns = Edns::new(DEFAULT_UDP_SIZE);
        edns.dnssec_ok = true;
        msg.edns = Some(edns);
    }

    Ok(msg)
}

/// Builds the query, echoes it if requested and sends it once via `resolver`.
pub fn create_query(opts: &mut Options, resolver: &mut dyn Resolver) -> Result<Response, Error> {
    let query = build_query(opts)?;

    if opts.display.show_query && !opts.display.short {
        print!("{}", print::render_query(&query, opts)?);
        // retries must not echo the query again
        opts.display.show_query = false;
    }

    Ok(resolver.look_up(&query)?)
}

/// Looks up what `opts` describes, making up to `1 + retries` attempts.
pub fn lookup(opts: &mut Options) -> Result<Response, Error> {
    lookup_with(opts, net::load_resolver)
}

/// Like [`lookup()`], but with a custom way of picking the transport.
pub fn lookup_with<F>(opts: &mut Options, mut load: F) -> Result<Response, Error>
where
    F: FnMut(&mut Options) -> Result<Box<dyn Resolver>, TransportError>,
{
    let attempts = opts.request.retries.max(0) as usize + 1;
    let mut attempt = 1;
    loop {
        let mut resolver = load(opts)?;
        match create_query(opts, resolver.as_mut()) {
            Err(Error::Transport(e)) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Attempt {} of {} failed: {}",
                    attempt,
                    attempts,
                    error_chain(&e)
                );
                attempt += 1;
            }
            res => return res,
        }
    }
}

/// The error followed by its sources, for one-line log messages.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(&format!(" ({})", cause));
        source = cause.source();
    }
    msg
}
