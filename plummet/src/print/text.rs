//! dig-like plain text output.

use std::fmt::Write;

use chrono::Local;
use plummet_proto::present::{question_line, rdata_string, record_line};
use plummet_proto::Message;

use super::{human_ttl, to_unicode};
use crate::error::RenderError;
use crate::net::Response;
use crate::options::{Options, TransportKind};

/// RFC 1123 with a numeric zone, as in `Mon, 02 Jan 2006 15:04:05 -0700`.
pub(crate) const WHEN_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

pub fn to_string(res: &Response, opts: &Options) -> Result<String, RenderError> {
    if opts.display.short {
        return Ok(short(res, opts));
    }

    let msg = &res.message;
    let display = &opts.display;
    let mut s = String::new();

    if display.comments {
        s += &header(msg);
        if let (Some(edns), true) = (&msg.edns, display.opt) {
            s += "\n";
            s += &edns.to_string();
        }
    }

    if display.question && !msg.queries.is_empty() {
        if display.comments {
            s += "\n;; QUESTION SECTION:\n";
        }
        for query in &msg.queries {
            s += &translate_name(question_line(query), opts)?;
            s += "\n";
        }
    }

    for (shown, title, records) in [
        (display.answer, "ANSWER", &msg.answers),
        (display.authority, "AUTHORITY", &msg.authority),
        (display.additional, "ADDITIONAL", &msg.additional),
    ] {
        if !shown || records.is_empty() {
            continue;
        }
        if display.comments {
            let _ = write!(s, "\n;; {} SECTION:\n", title);
        }
        for record in records {
            s += &record_columns(&record_line(record), opts)?;
            s += "\n";
        }
    }

    if display.statistics {
        s += &statistics(res, opts)?;
    }

    Ok(s)
}

/// Status line plus flags and section counts.
fn header(msg: &Message) -> String {
    format!(
        "{}\n;; flags: {}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}\n",
        msg.status_line(),
        msg.header.flag_names().join(" "),
        msg.queries.len(),
        msg.answers.len(),
        msg.authority.len(),
        msg.additional_count()
    )
}

/// Drops the TTL and class columns as requested and formats the TTL for humans.
fn record_columns(line: &str, opts: &Options) -> Result<String, RenderError> {
    // name, ttl, class, type, rdata
    let mut columns: Vec<String> = line.splitn(5, '\t').map(str::to_string).collect();
    let display = &opts.display;

    if columns.len() == 5 {
        if !display.show_class {
            columns.remove(2);
        }
        if !display.ttl {
            columns.remove(1);
        } else if display.human_ttl {
            if let Ok(ttl) = columns[1].parse() {
                columns[1] = human_ttl(ttl);
            }
        }
    }

    translate_name(columns.join("\t"), opts)
}

/// Converts the name in the first column to Unicode, keeping a leading `;`.
fn translate_name(line: String, opts: &Options) -> Result<String, RenderError> {
    if !opts.display.ucode_translate {
        return Ok(line);
    }
    let (name, rest) = match line.split_once('\t') {
        Some((name, rest)) => (name, Some(rest)),
        None => (line.as_str(), None),
    };
    let (semi, name) = match name.strip_prefix(';') {
        Some(name) => (";", name),
        None => ("", name),
    };
    let name = to_unicode(name)?;
    Ok(match rest {
        Some(rest) => format!("{}{}\t{}", semi, name, rest),
        None => format!("{}{}", semi, name),
    })
}

fn statistics(res: &Response, opts: &Options) -> Result<String, RenderError> {
    let size = res.message.wire_len().map_err(RenderError::Size)?;
    Ok(format!(
        "\n;; Query time: {:?}\n;; SERVER: {}{}\n;; WHEN: {}\n;; MSG SIZE  rcvd: {}\n",
        res.rtt,
        opts.request.server,
        transport_suffix(opts),
        Local::now().format(WHEN_FORMAT),
        size
    ))
}

/// The annotation after the server address; none for HTTPS and DNSCrypt, whose server strings
/// already say what they are.
pub fn transport_suffix(opts: &Options) -> &'static str {
    match opts.transport_kind() {
        TransportKind::Https | TransportKind::DnsCrypt => "",
        TransportKind::Quic => " (QUIC)",
        TransportKind::Standard if opts.transport.tls => " (TLS)",
        TransportKind::Standard if opts.transport.tcp => " (TCP)",
        TransportKind::Standard => " (UDP)",
    }
}

/// Only the RDATA of each answer, one per line.
fn short(res: &Response, opts: &Options) -> String {
    res.message
        .answers
        .iter()
        .map(|record| {
            let rdata = rdata_string(record);
            if opts.display.identify {
                format!(
                    "{} from server {} in {:?}",
                    rdata, opts.request.server, res.rtt
                )
            } else {
                rdata
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
