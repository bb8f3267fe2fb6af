//! The OPT pseudo-record [\[RFC 6891\]](https://www.rfc-editor.org/rfc/rfc6891) and the EDNS
//! options carried inside it.
//!
//! Options are stored as raw `(code, data)` pairs in the order they appeared, so an OPT record can
//! be copied from a response into the next query verbatim. [`EdnsOption::decode()`] turns a raw
//! option into an [`OptionValue`] for display.

use std::fmt::{self, Display};
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{NetworkEndian, ReadBytesExt};
use data_encoding::HEXLOWER;
use hickory_proto::error::ProtoResult;
use hickory_proto::serialize::binary::BinEncoder;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::WireError;
use crate::OPT_TYPE;

/// The UDP payload size used when nothing else is configured. See
/// [DNS Flag Day 2020](https://www.dnsflagday.net/2020/).
pub const DEFAULT_UDP_SIZE: u16 = 1232;

/// The DO ("DNSSEC OK") bit in the OPT record's TTL field.
const DO_BIT: u32 = 0x8000;

/// EDNS option codes, see the
/// [IANA registry](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-11).
pub mod code {
    pub const LLQ: u16 = 1;
    pub const UPDATE_LEASE: u16 = 2;
    pub const NSID: u16 = 3;
    /// ENUM Source-URI, from an expired draft but still seen in the wild.
    pub const ESU: u16 = 4;
    pub const DAU: u16 = 5;
    pub const DHU: u16 = 6;
    pub const N3U: u16 = 7;
    pub const SUBNET: u16 = 8;
    pub const EXPIRE: u16 = 9;
    pub const COOKIE: u16 = 10;
    pub const TCP_KEEPALIVE: u16 = 11;
    pub const PADDING: u16 = 12;
    pub const EDE: u16 = 15;
    /// Start of the range reserved for local/experimental use.
    pub const LOCAL_START: u16 = 65001;
    pub const LOCAL_END: u16 = 65534;
}

/// The OPT pseudo-record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edns {
    /// Requestor's UDP payload size (the CLASS field of the record).
    pub udp_size: u16,
    /// Upper eight bits of the response code.
    pub ext_rcode: u8,
    pub version: u8,
    pub dnssec_ok: bool,
    /// The fifteen flag bits following DO. Must be zero unless experimenting.
    pub z: u16,
    pub options: Vec<EdnsOption>,
}

/// A single raw EDNS option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl Edns {
    /// Creates an empty OPT record (version 0, no flags, no options).
    pub fn new(udp_size: u16) -> Self {
        Self {
            udp_size,
            ext_rcode: 0,
            version: 0,
            dnssec_ok: false,
            z: 0,
            options: Vec::new(),
        }
    }

    /// The record's TTL field: extended rcode, version, DO and the remaining flag bits.
    pub fn ttl(&self) -> u32 {
        let mut ttl = (self.ext_rcode as u32) << 24 | (self.version as u32) << 16;
        if self.dnssec_ok {
            ttl |= DO_BIT;
        }
        ttl | (self.z as u32 & 0x7FFF)
    }

    /// Returns the first option with the given code.
    pub fn option(&self, code: u16) -> Option<&EdnsOption> {
        self.options.iter().find(|opt| opt.code == code)
    }

    pub(crate) fn emit(&self, encoder: &mut BinEncoder<'_>) -> ProtoResult<()> {
        // root name
        encoder.emit(0)?;
        encoder.emit_u16(OPT_TYPE)?;
        encoder.emit_u16(self.udp_size)?;
        encoder.emit_u32(self.ttl())?;
        let rdlen: usize = self.options.iter().map(|opt| 4 + opt.data.len()).sum();
        encoder.emit_u16(rdlen as u16)?;
        for opt in &self.options {
            encoder.emit_u16(opt.code)?;
            encoder.emit_u16(opt.data.len() as u16)?;
            encoder.emit_vec(&opt.data)?;
        }
        Ok(())
    }

    /// Parses an OPT record starting at the beginning of `bytes` (which must be the root name).
    /// Returns the record and the number of bytes it occupies.
    pub(crate) fn parse(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut cursor = Cursor::new(bytes);
        // root name and type, already checked by the caller
        cursor.set_position(3);
        let udp_size = cursor.read_u16::<NetworkEndian>()?;
        let ttl = cursor.read_u32::<NetworkEndian>()?;
        let rdlen = cursor.read_u16::<NetworkEndian>()? as usize;

        let start = cursor.position() as usize;
        let rdata = bytes
            .get(start..start + rdlen)
            .ok_or(WireError::Truncated("OPT RDATA"))?;

        let mut options = Vec::new();
        let mut rdata = Cursor::new(rdata);
        while (rdata.position() as usize) < rdlen {
            let code = rdata.read_u16::<NetworkEndian>()?;
            let len = rdata.read_u16::<NetworkEndian>()? as usize;
            let mut data = vec![0; len];
            rdata
                .read_exact(&mut data)
                .map_err(|_| WireError::Truncated("EDNS option"))?;
            options.push(EdnsOption { code, data });
        }

        let edns = Self {
            udp_size,
            ext_rcode: (ttl >> 24) as u8,
            version: (ttl >> 16) as u8,
            dnssec_ok: ttl & DO_BIT != 0,
            z: (ttl & 0x7FFF) as u16,
            options,
        };
        Ok((edns, start + rdlen))
    }
}

impl Display for Edns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ";; OPT PSEUDOSECTION:")?;
        write!(f, "; EDNS: version {}; flags:", self.version)?;
        if self.dnssec_ok {
            write!(f, " do")?;
        }
        write!(f, ";")?;
        if self.z != 0 {
            write!(f, " MBZ: 0x{:04x},", self.z)?;
        }
        writeln!(f, " udp: {}", self.udp_size)?;
        for opt in &self.options {
            match opt.decode() {
                Ok(value) => writeln!(f, "; {}", value)?,
                Err(_) => writeln!(f, "; OPT={}: {} (malformed)", opt.code, HEXLOWER.encode(&opt.data))?,
            }
        }
        Ok(())
    }
}

/// EDNS Client Subnet [\[RFC 7871\]](https://www.rfc-editor.org/rfc/rfc7871).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ClientSubnet {
    /// 1 for IPv4, 2 for IPv6.
    pub family: u16,
    pub source_prefix: u8,
    pub scope_prefix: u8,
    pub address: IpAddr,
}

impl ClientSubnet {
    /// Creates a subnet option for a query (scope prefix zero). The family follows the address.
    pub fn new(address: IpAddr, source_prefix: u8) -> Self {
        Self {
            family: if address.is_ipv4() { 1 } else { 2 },
            source_prefix,
            scope_prefix: 0,
            address,
        }
    }

    /// Encodes the option data. Only as many address bytes as the source prefix covers are sent,
    /// with the bits beyond the prefix cleared.
    pub fn encode(&self) -> Vec<u8> {
        let octets = match self.address {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let prefix = (self.source_prefix as usize).min(octets.len() * 8);
        let len = (prefix + 7) / 8;

        let mut data = Vec::with_capacity(4 + len);
        data.extend_from_slice(&self.family.to_be_bytes());
        data.push(self.source_prefix);
        data.push(self.scope_prefix);
        data.extend_from_slice(&octets[..len]);
        if prefix % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFF << (8 - prefix % 8);
            }
        }
        data
    }

    fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(data);
        let family = cursor.read_u16::<NetworkEndian>()?;
        let source_prefix = cursor.read_u8()?;
        let scope_prefix = cursor.read_u8()?;
        let rest = &data[4..];
        let address = match family {
            1 if rest.len() <= 4 => {
                let mut octets = [0; 4];
                octets[..rest.len()].copy_from_slice(rest);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            2 if rest.len() <= 16 => {
                let mut octets = [0; 16];
                octets[..rest.len()].copy_from_slice(rest);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Err(WireError::InvalidOption(code::SUBNET)),
        };
        Ok(Self {
            family,
            source_prefix,
            scope_prefix,
            address,
        })
    }
}

/// Long-Lived Queries [\[RFC 8764\]](https://www.rfc-editor.org/rfc/rfc8764).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Llq {
    pub version: u16,
    pub opcode: u16,
    pub error: u16,
    pub id: u64,
    pub lease: u32,
}

/// Extended DNS Error [\[RFC 8914\]](https://www.rfc-editor.org/rfc/rfc8914).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ExtendedError {
    pub code: u16,
    pub purpose: String,
    pub text: String,
}

/// Human-readable name of an Extended DNS Error info code.
pub fn ede_purpose(code: u16) -> &'static str {
    match code {
        0 => "Other",
        1 => "Unsupported DNSKEY Algorithm",
        2 => "Unsupported DS Digest Type",
        3 => "Stale Answer",
        4 => "Forged Answer",
        5 => "DNSSEC Indeterminate",
        6 => "DNSSEC Bogus",
        7 => "Signature Expired",
        8 => "Signature Not Yet Valid",
        9 => "DNSKEY Missing",
        10 => "RRSIGs Missing",
        11 => "No Zone Key Bit Set",
        12 => "NSEC Missing",
        13 => "Cached Error",
        14 => "Not Ready",
        15 => "Blocked",
        16 => "Censored",
        17 => "Filtered",
        18 => "Prohibited",
        19 => "Stale NXDOMAIN Answer",
        20 => "Not Authoritative",
        21 => "Not Supported",
        22 => "No Reachable Authority",
        23 => "Network Error",
        24 => "Invalid Data",
        25 => "Signature Expired before Valid",
        26 => "Too Early",
        27 => "Unsupported NSEC3 Iterations Value",
        28 => "Unable to conform to policy",
        29 => "Synthesized",
        _ => "Unknown",
    }
}

/// A decoded EDNS option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    /// Name Server Identifier [\[RFC 5001\]](https://www.rfc-editor.org/rfc/rfc5001).
    Nsid(Vec<u8>),
    Subnet(ClientSubnet),
    /// The URI an ENUM query originated from.
    Esu(String),
    /// Client cookie, optionally followed by the server cookie.
    Cookie {
        client: Vec<u8>,
        server: Vec<u8>,
    },
    /// EDNS EXPIRE [\[RFC 7314\]](https://www.rfc-editor.org/rfc/rfc7314). Empty in queries.
    Expire(Option<u32>),
    /// edns-tcp-keepalive [\[RFC 7828\]](https://www.rfc-editor.org/rfc/rfc7828), in units of
    /// 100 milliseconds. Empty in queries.
    TcpKeepalive(Option<u16>),
    Llq(Llq),
    /// Dynamic DNS update lease in seconds, optionally with a separate key lease.
    UpdateLease {
        lease: u32,
        key_lease: Option<u32>,
    },
    /// DNSSEC algorithms the client understands [\[RFC 6975\]](https://www.rfc-editor.org/rfc/rfc6975).
    Dau(Vec<u8>),
    Dhu(Vec<u8>),
    N3u(Vec<u8>),
    /// Padding [\[RFC 7830\]](https://www.rfc-editor.org/rfc/rfc7830).
    Padding(Vec<u8>),
    ExtendedError(ExtendedError),
    Local {
        code: u16,
        data: Vec<u8>,
    },
    Unknown {
        code: u16,
        data: Vec<u8>,
    },
}

impl EdnsOption {
    pub fn new(code: u16, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    /// Decodes the option's data according to its code.
    pub fn decode(&self) -> Result<OptionValue, WireError> {
        let data = &self.data[..];
        let mut cursor = Cursor::new(data);
        let invalid = |_| WireError::InvalidOption(self.code);

        let value = match self.code {
            code::NSID => OptionValue::Nsid(data.to_vec()),
            code::SUBNET => OptionValue::Subnet(ClientSubnet::decode(data)?),
            code::ESU => OptionValue::Esu(String::from_utf8_lossy(data).into_owned()),
            code::COOKIE => {
                if !(data.len() == 8 || (16..=40).contains(&data.len())) {
                    return Err(WireError::InvalidOption(self.code));
                }
                OptionValue::Cookie {
                    client: data[..8].to_vec(),
                    server: data[8..].to_vec(),
                }
            }
            code::EXPIRE => OptionValue::Expire(match data.len() {
                0 => None,
                _ => Some(cursor.read_u32::<NetworkEndian>().map_err(invalid)?),
            }),
            code::TCP_KEEPALIVE => OptionValue::TcpKeepalive(match data.len() {
                0 => None,
                _ => Some(cursor.read_u16::<NetworkEndian>().map_err(invalid)?),
            }),
            code::LLQ => OptionValue::Llq(Llq {
                version: cursor.read_u16::<NetworkEndian>().map_err(invalid)?,
                opcode: cursor.read_u16::<NetworkEndian>().map_err(invalid)?,
                error: cursor.read_u16::<NetworkEndian>().map_err(invalid)?,
                id: cursor.read_u64::<NetworkEndian>().map_err(invalid)?,
                lease: cursor.read_u32::<NetworkEndian>().map_err(invalid)?,
            }),
            code::UPDATE_LEASE => OptionValue::UpdateLease {
                lease: cursor.read_u32::<NetworkEndian>().map_err(invalid)?,
                key_lease: match data.len() {
                    8 => Some(cursor.read_u32::<NetworkEndian>().map_err(invalid)?),
                    _ => None,
                },
            },
            code::DAU => OptionValue::Dau(data.to_vec()),
            code::DHU => OptionValue::Dhu(data.to_vec()),
            code::N3U => OptionValue::N3u(data.to_vec()),
            code::PADDING => OptionValue::Padding(data.to_vec()),
            code::EDE => {
                let info_code = cursor.read_u16::<NetworkEndian>().map_err(invalid)?;
                OptionValue::ExtendedError(ExtendedError {
                    code: info_code,
                    purpose: ede_purpose(info_code).to_string(),
                    text: String::from_utf8_lossy(&data[2..]).into_owned(),
                })
            }
            code::LOCAL_START..=code::LOCAL_END => OptionValue::Local {
                code: self.code,
                data: data.to_vec(),
            },
            _ => OptionValue::Unknown {
                code: self.code,
                data: data.to_vec(),
            },
        };
        Ok(value)
    }
}

impl OptionValue {
    /// Label used for this option in the OPT pseudo-section.
    pub fn label(&self) -> String {
        match self {
            OptionValue::Nsid(_) => "NSID".to_string(),
            OptionValue::Subnet(_) => "SUBNET".to_string(),
            OptionValue::Esu(_) => "ESU".to_string(),
            OptionValue::Cookie { .. } => "COOKIE".to_string(),
            OptionValue::Expire(_) => "EXPIRE".to_string(),
            OptionValue::TcpKeepalive(_) => "KEEPALIVE".to_string(),
            OptionValue::Llq(_) => "LLQ".to_string(),
            OptionValue::UpdateLease { .. } => "UPDATE LEASE".to_string(),
            OptionValue::Dau(_) => "DAU".to_string(),
            OptionValue::Dhu(_) => "DHU".to_string(),
            OptionValue::N3u(_) => "N3U".to_string(),
            OptionValue::Padding(_) => "PADDING".to_string(),
            OptionValue::ExtendedError(_) => "EDE".to_string(),
            OptionValue::Local { code, .. } => format!("LOCAL OPT {}", code),
            OptionValue::Unknown { code, .. } => format!("OPT={}", code),
        }
    }

    /// The option's value rendered as text, without the label.
    pub fn value_string(&self) -> String {
        let list = |algs: &[u8]| {
            algs.iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            OptionValue::Nsid(data) => nsid_string(data),
            OptionValue::Subnet(subnet) => format!(
                "{}/{}/{}",
                subnet.address, subnet.source_prefix, subnet.scope_prefix
            ),
            OptionValue::Esu(uri) => uri.clone(),
            OptionValue::Cookie { client, server } => {
                format!("{}{}", HEXLOWER.encode(client), HEXLOWER.encode(server))
            }
            OptionValue::Expire(None) | OptionValue::TcpKeepalive(None) => String::new(),
            OptionValue::Expire(Some(secs)) => secs.to_string(),
            OptionValue::TcpKeepalive(Some(timeout)) => {
                format!("{:.1} secs", *timeout as f64 / 10.0)
            }
            OptionValue::Llq(llq) => format!(
                "version {}, opcode {}, error {}, id {}, lease {}",
                llq.version, llq.opcode, llq.error, llq.id, llq.lease
            ),
            OptionValue::UpdateLease { lease, key_lease } => match key_lease {
                Some(key_lease) => format!("{}, key lease {}", lease, key_lease),
                None => lease.to_string(),
            },
            OptionValue::Dau(algs) | OptionValue::Dhu(algs) | OptionValue::N3u(algs) => list(algs),
            OptionValue::Padding(data)
            | OptionValue::Local { data, .. }
            | OptionValue::Unknown { data, .. } => HEXLOWER.encode(data),
            OptionValue::ExtendedError(ede) => {
                if ede.text.is_empty() {
                    format!("{} ({})", ede.code, ede.purpose)
                } else {
                    format!("{} ({}): ({})", ede.code, ede.purpose, ede.text)
                }
            }
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.value_string())
    }
}

/// NSID data as dig shows it: hex, followed by the printable text in parentheses.
pub fn nsid_string(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    format!("{} ({})", HEXLOWER.encode(data), nsid_text(data))
}

/// The NSID as text, with non-printable bytes replaced by `.`.
pub fn nsid_text(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
