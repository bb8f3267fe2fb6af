//! Presentation format of questions and records, one per line with tab-separated columns:
//! `name ttl class type rdata` for records and `;name class type` for questions.

use hickory_proto::op::Query;
use hickory_proto::rr::{DNSClass, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;

/// Mnemonic for a record type, falling back to the `TYPE123` form for unknown types.
pub fn type_name(rtype: RecordType) -> String {
    match rtype {
        RecordType::Unknown(code) => format!("TYPE{}", code),
        _ => rtype.to_string(),
    }
}

/// Mnemonic for a class, falling back to the `CLASS123` form for unknown classes.
pub fn class_name(class: DNSClass) -> String {
    match class {
        DNSClass::Unknown(code) => format!("CLASS{}", code),
        DNSClass::OPT(size) => format!("CLASS{}", size),
        _ => class.to_string(),
    }
}

/// The RDATA of a record in presentation format. Empty for records without data (e.g. in
/// dynamic update prerequisites).
pub fn rdata_string(record: &Record) -> String {
    record.data().map(ToString::to_string).unwrap_or_default()
}

/// Length of the record's RDATA in wire format.
pub fn rdata_len(record: &Record) -> usize {
    record
        .data()
        .and_then(|data| data.to_bytes().ok())
        .map_or(0, |bytes| bytes.len())
}

/// Owner names stay in their ASCII (punycode) form; converting them is up to the caller.
pub fn record_line(record: &Record) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        record.name().to_ascii(),
        record.ttl(),
        class_name(record.dns_class()),
        type_name(record.record_type()),
        rdata_string(record)
    )
}

pub fn question_line(query: &Query) -> String {
    format!(
        ";{}\t{}\t{}",
        query.name().to_ascii(),
        class_name(query.query_class()),
        type_name(query.query_type())
    )
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::MX;
    use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};

    use super::{question_line, rdata_len, record_line, type_name};

    #[test]
    fn record_columns_are_tab_separated() {
        let name = Name::from_str("example.com.").unwrap();
        let mx = MX::new(10, Name::from_str("mail.example.com.").unwrap());
        let record = Record::from_rdata(name, 3600, RData::MX(mx));
        assert_eq!(
            record_line(&record),
            "example.com.\t3600\tIN\tMX\t10 mail.example.com."
        );
        assert!(rdata_len(&record) > 2);
    }

    #[test]
    fn question_starts_with_semicolon() {
        let mut query = Query::query(Name::from_str("example.org.").unwrap(), RecordType::TXT);
        query.set_query_class(DNSClass::CH);
        assert_eq!(question_line(&query), ";example.org.\tCH\tTXT");
    }

    #[test]
    fn names_stay_in_punycode() {
        let query = Query::query(Name::from_str("xn--bcher-kva.example.").unwrap(), RecordType::A);
        assert_eq!(question_line(&query), ";xn--bcher-kva.example.\tIN\tA");
    }

    #[test]
    fn unknown_types_use_generic_form() {
        assert_eq!(type_name(RecordType::Unknown(65280)), "TYPE65280");
        assert_eq!(type_name(RecordType::AAAA), "AAAA");
    }
}
