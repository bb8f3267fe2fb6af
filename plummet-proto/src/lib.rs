//! `plummet-proto` is the message layer underneath [`plummet`]. Record data, names and questions
//! are handled by [`hickory_proto`]; this crate adds what a dig-style client needs on top of that:
//! every header bit (including the reserved Z bit), a lossless OPT pseudo-record whose version,
//! flags and options survive a round trip unchanged, decoders for the EDNS options a client is
//! likely to see, and dig-style presentation strings.
//!
//! # Basic usage example
//! ```rust
//! use hickory_proto::rr::{DNSClass, RecordType};
//! use plummet_proto::{Edns, Message};
//!
//! let mut msg = Message::query("example.com.".parse().unwrap(), RecordType::A, DNSClass::IN);
//! msg.header.rd = true;
//! msg.edns = Some(Edns::new(1232));
//! let encoded = msg.to_vec().unwrap();
//! let decoded = Message::from_vec(&encoded).unwrap();
//! assert_eq!(decoded.queries, msg.queries);
//! ```
//!
//! [`plummet`]: https://docs.rs/plummet

use std::fmt::{self, Display};
use std::io::Cursor;

use byteorder::{NetworkEndian, ReadBytesExt};
use hickory_proto::op::Query;
use hickory_proto::rr::{DNSClass, Name, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};
use rand::Rng;

pub mod edns;
pub mod error;
pub mod present;

pub use edns::{Edns, EdnsOption};
pub use error::WireError;

/// The record type number of the OPT pseudo-record.
const OPT_TYPE: u16 = 41;

/// The fixed-size section at the start of every DNS message.
///
/// Unlike most DNS libraries, all 16 bits of the flags word are kept, so a query can be sent with
/// the reserved Z bit set and a response that has it set can be shown as such.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Supplied by questioner and reflected back unchanged by responder.
    pub id: u16,
    /// False for queries, true for responses.
    pub qr: bool,
    pub opcode: u8,
    /// authoritative answer
    pub aa: bool,
    /// truncated
    pub tc: bool,
    /// recursion desired
    pub rd: bool,
    /// recursion available
    pub ra: bool,
    /// reserved, must be zero in normal operation
    pub z: bool,
    /// authentic data [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub ad: bool,
    /// checking disabled [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub cd: bool,
    /// The lower four bits of the response code. The upper eight bits live in the OPT record, see
    /// [`Message::rcode()`].
    pub rcode: u8,
}

impl Header {
    /// Length of the header on the wire.
    pub const LEN: usize = 12;

    /// Assembles the second 16-bit word of the header.
    pub fn flags(&self) -> u16 {
        let mut flags = ((self.opcode as u16 & 0xF) << 11) | (self.rcode as u16 & 0xF);
        for (set, bit) in [
            (self.qr, 0x8000),
            (self.aa, 0x0400),
            (self.tc, 0x0200),
            (self.rd, 0x0100),
            (self.ra, 0x0080),
            (self.z, 0x0040),
            (self.ad, 0x0020),
            (self.cd, 0x0010),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }

    /// Creates a `Header` from a message ID and the flags word as it appears on the wire.
    pub fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0xF) as u8,
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            z: flags & 0x0040 != 0,
            ad: flags & 0x0020 != 0,
            cd: flags & 0x0010 != 0,
            rcode: (flags & 0xF) as u8,
        }
    }

    /// Lists the names of all set flags in the order dig prints them.
    pub fn flag_names(&self) -> Vec<&'static str> {
        [
            (self.qr, "qr"),
            (self.aa, "aa"),
            (self.tc, "tc"),
            (self.rd, "rd"),
            (self.ra, "ra"),
            (self.z, "z"),
            (self.ad, "ad"),
            (self.cd, "cd"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// A complete DNS message.
///
/// The OPT pseudo-record is kept out of `additional` and stored in `edns` instead; it is written
/// as the last record of the additional section.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub header: Header,
    pub queries: Vec<Query>,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
    pub edns: Option<Edns>,
}

impl Message {
    /// Creates a query for a single question with a random message ID and all flags cleared.
    pub fn query(name: Name, qtype: RecordType, qclass: DNSClass) -> Self {
        let mut query = Query::query(name, qtype);
        query.set_query_class(qclass);
        Self {
            header: Header {
                id: rand::thread_rng().gen(),
                ..Header::default()
            },
            queries: vec![query],
            ..Self::default()
        }
    }

    /// The full 12-bit response code, combining the header's four bits with the extended bits from
    /// the OPT record (if there is one).
    pub fn rcode(&self) -> u16 {
        let ext = self.edns.as_ref().map_or(0, |edns| edns.ext_rcode as u16);
        (ext << 4) | self.header.rcode as u16
    }

    /// Sets the response code, spreading it over the header and the OPT record. Codes above 15
    /// need an OPT record; one is added if necessary.
    pub fn set_rcode(&mut self, rcode: u16) {
        self.header.rcode = (rcode & 0xF) as u8;
        let ext = (rcode >> 4) as u8;
        match &mut self.edns {
            Some(edns) => edns.ext_rcode = ext,
            None if ext != 0 => {
                let mut edns = Edns::new(edns::DEFAULT_UDP_SIZE);
                edns.ext_rcode = ext;
                self.edns = Some(edns);
            }
            None => {}
        }
    }

    /// Number of records in the additional section as sent on the wire, i.e. including OPT.
    pub fn additional_count(&self) -> usize {
        self.additional.len() + usize::from(self.edns.is_some())
    }

    /// Encodes the message into its wire format.
    pub fn to_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(512);
        let mut encoder = BinEncoder::new(&mut buf);

        encoder.emit_u16(self.header.id)?;
        encoder.emit_u16(self.header.flags())?;
        for count in [
            self.queries.len(),
            self.answers.len(),
            self.authority.len(),
            self.additional_count(),
        ] {
            let count = u16::try_from(count).map_err(|_| WireError::TooManyRecords(count))?;
            encoder.emit_u16(count)?;
        }

        for query in &self.queries {
            query.emit(&mut encoder)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            record.emit(&mut encoder)?;
        }
        if let Some(edns) = &self.edns {
            edns.emit(&mut encoder)?;
        }

        Ok(buf)
    }

    /// Length of the message in wire format.
    pub fn wire_len(&self) -> Result<usize, WireError> {
        Ok(self.to_vec()?.len())
    }

    /// Decodes a message from its wire format.
    ///
    /// An OPT record in the additional section is parsed by hand so its TTL field (extended
    /// rcode, version, DO bit and the remaining flag bits) and its options arrive unchanged.
    pub fn from_vec(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < Header::LEN {
            return Err(WireError::ShortHeader(bytes.len()));
        }
        let mut cursor = Cursor::new(bytes);
        let id = cursor.read_u16::<NetworkEndian>()?;
        let flags = cursor.read_u16::<NetworkEndian>()?;
        let qdcount = cursor.read_u16::<NetworkEndian>()?;
        let ancount = cursor.read_u16::<NetworkEndian>()?;
        let nscount = cursor.read_u16::<NetworkEndian>()?;
        let arcount = cursor.read_u16::<NetworkEndian>()?;

        let mut decoder = BinDecoder::new(bytes);
        decoder
            .read_slice(Header::LEN)
            .map_err(|e| WireError::Malformed(e.to_string()))?;

        let mut msg = Self {
            header: Header::from_flags(id, flags),
            ..Self::default()
        };
        for _ in 0..qdcount {
            msg.queries.push(Query::read(&mut decoder)?);
        }
        for _ in 0..ancount {
            msg.answers.push(Record::read(&mut decoder)?);
        }
        for _ in 0..nscount {
            msg.authority.push(Record::read(&mut decoder)?);
        }
        for _ in 0..arcount {
            let offset = decoder.index();
            if is_opt_at(bytes, offset) {
                if msg.edns.is_some() {
                    return Err(WireError::DuplicateOpt);
                }
                let (edns, len) = Edns::parse(&bytes[offset..])?;
                decoder
                    .read_slice(len)
                    .map_err(|e| WireError::Malformed(e.to_string()))?;
                msg.edns = Some(edns);
            } else {
                msg.additional.push(Record::read(&mut decoder)?);
            }
        }

        Ok(msg)
    }

    /// The one-line summary dig prints above the flags: opcode, status and ID.
    pub fn status_line(&self) -> String {
        format!(
            ";; opcode: {}, status: {}, id: {}",
            opcode_name(self.header.opcode),
            rcode_name(self.rcode()),
            self.header.id
        )
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.status_line())?;
        writeln!(
            f,
            ";; flags: {}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}",
            self.header.flag_names().join(" "),
            self.queries.len(),
            self.answers.len(),
            self.authority.len(),
            self.additional_count()
        )?;
        if let Some(edns) = &self.edns {
            write!(f, "\n{}", edns)?;
        }
        if !self.queries.is_empty() {
            writeln!(f, "\n;; QUESTION SECTION:")?;
            for query in &self.queries {
                writeln!(f, "{}", present::question_line(query))?;
            }
        }
        for (title, records) in [
            ("ANSWER", &self.answers),
            ("AUTHORITY", &self.authority),
            ("ADDITIONAL", &self.additional),
        ] {
            if !records.is_empty() {
                writeln!(f, "\n;; {} SECTION:", title)?;
                for record in records {
                    writeln!(f, "{}", present::record_line(record))?;
                }
            }
        }
        Ok(())
    }
}

/// Checks whether the resource record starting at `offset` is an OPT record, i.e. has the root
/// name and type 41.
fn is_opt_at(bytes: &[u8], offset: usize) -> bool {
    matches!(bytes.get(offset..offset + 3), Some([0, hi, lo]) if u16::from_be_bytes([*hi, *lo]) == OPT_TYPE)
}

/// Mnemonic for a response code as dig prints it, e.g. `NXDOMAIN`.
pub fn rcode_name(rcode: u16) -> String {
    let name = match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        6 => "YXDOMAIN",
        7 => "YXRRSET",
        8 => "NXRRSET",
        9 => "NOTAUTH",
        10 => "NOTZONE",
        11 => "DSOTYPENI",
        16 => "BADVERS",
        17 => "BADKEY",
        18 => "BADTIME",
        19 => "BADMODE",
        20 => "BADNAME",
        21 => "BADALG",
        22 => "BADTRUNC",
        23 => "BADCOOKIE",
        _ => return format!("RCODE{}", rcode),
    };
    name.to_string()
}

/// Mnemonic for an opcode, e.g. `QUERY`.
pub fn opcode_name(opcode: u8) -> String {
    let name = match opcode {
        0 => "QUERY",
        1 => "IQUERY",
        2 => "STATUS",
        4 => "NOTIFY",
        5 => "UPDATE",
        6 => "DSO",
        _ => return format!("OPCODE{}", opcode),
    };
    name.to_string()
}

/// The BADCOOKIE response code [\[RFC 7873\]](https://www.rfc-editor.org/rfc/rfc7873).
pub const RCODE_BADCOOKIE: u16 = 23;
