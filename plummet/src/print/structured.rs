//! JSON, XML and YAML output. All three serialize the same [`Printable`] model.

use chrono::Local;
use data_encoding::HEXLOWER;
use hickory_proto::rr::Record;
use plummet_proto::edns::{Edns, OptionValue};
use plummet_proto::present::{class_name, rdata_len, rdata_string, type_name};
use plummet_proto::{opcode_name, rcode_name, Message};
use serde::Serialize;

use super::{human_ttl, to_unicode};
use crate::error::RenderError;
use crate::net::Response;
use crate::options::{Options, OutputFormat};

/// A DNS message with names and codes spelled out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Printable {
    pub header: Header,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub opt: Vec<OptEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub question: Vec<Question>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub answer: Vec<Answer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authority: Vec<Answer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub id: u16,
    pub response: bool,
    pub opcode: String,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub zero: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub rcode: String,
}

/// One line of the OPT pseudo-section.
#[derive(Debug, Serialize)]
pub struct OptEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct Question {
    pub name: String,
    pub class: String,
    #[serde(rename = "type")]
    pub qtype: String,
}

#[derive(Debug, Serialize)]
pub struct Answer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    pub class: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub rdlength: usize,
    pub rdata: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub query_time: String,
    pub server: String,
    pub when: String,
    pub msg_size: usize,
}

impl Statistics {
    pub fn new(res: &Response, opts: &Options) -> Result<Self, RenderError> {
        Ok(Self {
            query_time: format!("{:?}", res.rtt),
            server: format!(
                "{}{}",
                opts.request.server,
                super::text::transport_suffix(opts)
            ),
            when: Local::now().format(super::text::WHEN_FORMAT).to_string(),
            msg_size: res.message.wire_len().map_err(RenderError::Size)?,
        })
    }
}

/// Builds the printable model of `msg`. The OPT record is only included if enabled in the
/// display options.
pub fn make_printable(
    msg: &Message,
    stats: Option<Statistics>,
    opts: &Options,
) -> Result<Printable, RenderError> {
    let translate = |name: String| {
        if opts.display.ucode_translate {
            to_unicode(&name)
        } else {
            Ok(name)
        }
    };

    let question = msg
        .queries
        .iter()
        .map(|query| {
            Ok(Question {
                name: translate(query.name().to_ascii())?,
                class: class_name(query.query_class()),
                qtype: type_name(query.query_type()),
            })
        })
        .collect::<Result<_, RenderError>>()?;

    let answers = |records: &[Record]| {
        records
            .iter()
            .map(|record| {
                Ok(Answer {
                    name: translate(record.name().to_ascii())?,
                    ttl: opts.display.ttl.then(|| {
                        if opts.display.human_ttl {
                            human_ttl(record.ttl())
                        } else {
                            record.ttl().to_string()
                        }
                    }),
                    class: class_name(record.dns_class()),
                    rtype: type_name(record.record_type()),
                    rdlength: rdata_len(record),
                    rdata: rdata_string(record),
                })
            })
            .collect::<Result<Vec<_>, RenderError>>()
    };

    let opt = match (&msg.edns, opts.display.opt) {
        (Some(edns), true) => opt_entries(edns),
        _ => Vec::new(),
    };

    let header = &msg.header;
    Ok(Printable {
        header: Header {
            id: header.id,
            response: header.qr,
            opcode: opcode_name(header.opcode),
            authoritative: header.aa,
            truncated: header.tc,
            recursion_desired: header.rd,
            recursion_available: header.ra,
            zero: header.z,
            authenticated_data: header.ad,
            checking_disabled: header.cd,
            rcode: rcode_name(msg.rcode()),
        },
        opt,
        question,
        answer: answers(&msg.answers)?,
        authority: answers(&msg.authority)?,
        additional: answers(&msg.additional)?,
        statistics: stats,
    })
}

fn opt_entries(edns: &Edns) -> Vec<OptEntry> {
    let entry = |name: &str, value: String| OptEntry {
        name: name.to_string(),
        value,
    };
    let mut entries = vec![
        entry("Version", edns.version.to_string()),
        entry("Flags", if edns.dnssec_ok { "do" } else { "" }.to_string()),
    ];
    if edns.z != 0 {
        entries.push(entry("MBZ", format!("0x{:04x}", edns.z)));
    }
    entries.push(entry("UDP Buffer Size", edns.udp_size.to_string()));

    for option in &edns.options {
        let value = match option.decode() {
            Ok(value) => value,
            Err(_) => {
                entries.push(OptEntry {
                    name: format!("OPT={}", option.code),
                    value: format!("{} (malformed)", HEXLOWER.encode(&option.data)),
                });
                continue;
            }
        };
        let name = match &value {
            OptionValue::Nsid(_) => "NSID",
            OptionValue::Subnet(subnet) => {
                let value = format!("{} (family {})", value.value_string(), subnet.family);
                entries.push(entry("Subnet", value));
                continue;
            }
            OptionValue::Esu(_) => "ESU",
            OptionValue::Cookie { .. } => "Cookie",
            OptionValue::Expire(_) => "Expire",
            OptionValue::TcpKeepalive(_) => "TCP Keepalive",
            OptionValue::UpdateLease { .. } => "Update Lease",
            OptionValue::Llq(_) => "Long Lived Queries",
            OptionValue::Dau(_) => "DNSSEC Algorithm Understood",
            OptionValue::Dhu(_) => "DS Hash Understood",
            OptionValue::N3u(_) => "NSEC3 Hash Understood",
            OptionValue::Local { .. } => "Local OPT",
            OptionValue::Padding(_) => "Padding",
            OptionValue::ExtendedError(_) => "EDE",
            OptionValue::Unknown { .. } => continue,
        };
        entries.push(entry(name, value.value_string()));
    }
    entries
}

/// Serializes `msg` in the structured format selected in `opts`.
pub fn to_string(
    msg: &Message,
    stats: Option<Statistics>,
    opts: &Options,
) -> Result<String, RenderError> {
    let printable = make_printable(msg, stats, opts)?;
    let serialize_error = |e: &dyn std::fmt::Display| RenderError::Serialize(e.to_string());

    match opts.format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&printable).map_err(|e| serialize_error(&e))
        }
        OutputFormat::Xml => {
            let mut xml = String::new();
            let mut serializer = quick_xml::se::Serializer::with_root(&mut xml, Some("message"))
                .map_err(|e| serialize_error(&e))?;
            serializer.indent(' ', 2);
            printable
                .serialize(serializer)
                .map_err(|e| serialize_error(&e))?;
            Ok(xml)
        }
        OutputFormat::Yaml => serde_yaml::to_string(&printable).map_err(|e| serialize_error(&e)),
        OutputFormat::Text => Err(RenderError::FormatNotRecognized),
    }
}
