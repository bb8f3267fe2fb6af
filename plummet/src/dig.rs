//! Parsing of dig-style `+[no]switch[=value]` arguments.

use std::collections::HashMap;
use std::time::Duration;

use lazy_static::lazy_static;
use tracing::debug;

use crate::error::ClassifyError;
use crate::options::{parse_subnet, parse_zflag, Options, OutputFormat};

/// Sets one switch. The flag is `false` for the `no` form.
type Setter = fn(&mut Options, bool);

lazy_static! {
    /// Every boolean switch, including aliases.
    static ref SWITCHES: HashMap<&'static str, Setter> = {
        let table: &[(&'static str, Setter)] = &[
            // header bits
            ("aa", |o, on| o.flags.aa = on),
            ("aaflag", |o, on| o.flags.aa = on),
            ("aaonly", |o, on| o.flags.aa = on),
            ("ad", |o, on| o.flags.ad = on),
            ("adflag", |o, on| o.flags.ad = on),
            ("cd", |o, on| o.flags.cd = on),
            ("cdflag", |o, on| o.flags.cd = on),
            ("qrflag", |o, on| o.flags.qr = on),
            ("ra", |o, on| o.flags.ra = on),
            ("raflag", |o, on| o.flags.ra = on),
            ("rd", |o, on| o.flags.rd = on),
            ("rdflag", |o, on| o.flags.rd = on),
            ("recurse", |o, on| o.flags.rd = on),
            ("tc", |o, on| o.flags.tc = on),
            ("tcflag", |o, on| o.flags.tc = on),
            ("z", |o, on| o.flags.z = on),
            ("zflag", |o, on| o.flags.z = on),
            // record formatting
            ("qr", |o, on| o.display.show_query = on),
            ("ttlunits", |o, on| o.display.human_ttl = on),
            ("ttl", |o, on| o.display.ttl = on),
            ("ttlid", |o, on| o.display.ttl = on),
            ("class", |o, on| o.display.show_class = on),
            // EDNS
            ("dnssec", |o, on| o.edns.dnssec = on),
            ("do", |o, on| o.edns.dnssec = on),
            ("expire", |o, on| o.edns.expire = on),
            ("cookie", |o, on| o.edns.cookie = on),
            ("keepopen", |o, on| o.edns.keep_open = on),
            ("keepalive", |o, on| o.edns.keep_open = on),
            ("nsid", |o, on| o.edns.nsid = on),
            ("padding", |o, on| o.edns.padding = on),
            // transports
            ("tcp", |o, on| o.transport.tcp = on),
            ("vc", |o, on| o.transport.tcp = on),
            ("ignore", |o, on| o.transport.ignore_truncation = on),
            ("badcookie", |o, on| o.transport.ignore_bad_cookie = !on),
            ("tls", |o, on| o.transport.tls = on),
            ("dnscrypt", |o, on| o.transport.dnscrypt = on),
            ("https", |o, on| o.transport.https = on),
            ("https-get", |o, on| {
                o.transport.https_get = on;
                o.transport.https |= on;
            }),
            ("https-post", |o, on| {
                o.transport.https_get = !on;
                o.transport.https |= on;
            }),
            ("quic", |o, on| o.transport.quic = on),
            ("trace", |o, on| o.trace = on),
            // output
            ("short", |o, on| o.display.short = on),
            ("identify", |o, on| o.display.identify = on),
            ("json", |o, on| set_format(o, OutputFormat::Json, on)),
            ("xml", |o, on| set_format(o, OutputFormat::Xml, on)),
            ("yaml", |o, on| set_format(o, OutputFormat::Yaml, on)),
            ("comments", |o, on| o.display.comments = on),
            ("question", |o, on| o.display.question = on),
            ("opt", |o, on| o.display.opt = on),
            ("answer", |o, on| o.display.answer = on),
            ("authority", |o, on| o.display.authority = on),
            ("additional", |o, on| o.display.additional = on),
            ("stats", |o, on| o.display.statistics = on),
            ("all", |o, on| o.display.set_all(on)),
            ("idnin", |o, on| o.display.ucode_translate = on),
            ("idnout", |o, on| o.display.ucode_translate = on),
            // switches that also take a value, in their bare form
            ("edns", |o, on| {
                o.edns.enabled = on;
                o.edns.version = 0;
            }),
            ("ednsflags", |o, _| o.edns.z_flag = 0),
        ];
        table.iter().copied().collect()
    };
}

/// Switches that require a value.
const VALUE_SWITCHES: [&str; 6] = ["time", "timeout", "retry", "tries", "bufsize", "subnet"];

fn set_format(opts: &mut Options, format: OutputFormat, on: bool) {
    if on {
        opts.format = format;
    } else if opts.format == format {
        opts.format = OutputFormat::Text;
    }
}

/// Applies a single lower-cased dig switch (without the leading `+`) to `opts`.
pub fn parse_switch(switch: &str, opts: &mut Options) -> Result<(), ClassifyError> {
    let (on, name) = match switch.strip_prefix("no") {
        Some(rest) if !SWITCHES.contains_key(switch) => (false, rest),
        _ => (true, switch),
    };
    debug!("Setting dig switch {} to {}.", name, on);

    match name.split_once('=') {
        Some((name, value)) => parse_value(name, value, on, opts),
        None if VALUE_SWITCHES.contains(&name) => Err(ClassifyError::MissingValue(name.into())),
        None => match SWITCHES.get(name) {
            Some(set) => {
                set(opts, on);
                Ok(())
            }
            None => Err(ClassifyError::UnknownSwitch(switch.into())),
        },
    }
}

fn parse_value(name: &str, value: &str, on: bool, opts: &mut Options) -> Result<(), ClassifyError> {
    let invalid = || ClassifyError::InvalidValue {
        switch: name.into(),
        value: value.into(),
    };
    let required = || {
        if value.is_empty() {
            Err(ClassifyError::MissingValue(name.into()))
        } else {
            Ok(value)
        }
    };

    match name {
        "time" | "timeout" => {
            let secs: f64 = required()?.parse().map_err(|_| invalid())?;
            opts.request.timeout = Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| invalid())?;
        }
        "retry" | "tries" => {
            let count: i32 = required()?.parse().map_err(|_| invalid())?;
            // tries counts the first attempt, retries do not
            opts.request.retries = if name == "tries" { count.saturating_sub(1) } else { count };
        }
        "bufsize" => {
            opts.edns.buf_size = required()?.parse().map_err(|_| invalid())?;
        }
        "ednsflags" => {
            opts.edns.z_flag = if value.is_empty() { 0 } else { parse_zflag(value)? };
        }
        "edns" => {
            opts.edns.enabled = on;
            opts.edns.version = if value.is_empty() {
                0
            } else {
                value.parse().map_err(|_| invalid())?
            };
        }
        "subnet" => {
            opts.edns.subnet = Some(parse_subnet(required()?)?);
        }
        "https" | "https-get" | "https-post" => {
            opts.transport.https = on;
            opts.transport.https_get = name == "https-get";
            if !value.is_empty() {
                opts.transport.https_endpoint = if value.starts_with('/') {
                    value.to_string()
                } else {
                    format!("/{}", value)
                };
            }
        }
        _ => return Err(ClassifyError::UnknownSwitch(format!("{}={}", name, value))),
    }
    Ok(())
}
