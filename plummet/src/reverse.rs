//! Reverse lookup names.

use std::net::IpAddr;

use hickory_proto::rr::RecordType;

use crate::error::ClassifyError;

/// Turns an address into the name to query for a reverse lookup.
///
/// For PTR queries, IPv4 addresses become `in-addr.arpa` names and IPv6 addresses become nibble
/// reversed `ip6.arpa` names. For NAPTR queries, the digits of a phone number are reversed under
/// `e164.arpa` ([\[RFC 6116\]](https://www.rfc-editor.org/rfc/rfc6116)).
pub fn reverse_name(address: &str, qtype: RecordType) -> Result<String, ClassifyError> {
    let error = || ClassifyError::Reverse {
        address: address.to_string(),
        qtype: qtype.to_string(),
    };
    match qtype {
        RecordType::PTR => match address.trim_end_matches('.').parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => {
                let octets = addr.octets();
                Ok(format!(
                    "{}.{}.{}.{}.in-addr.arpa.",
                    octets[3], octets[2], octets[1], octets[0]
                ))
            }
            Ok(IpAddr::V6(addr)) => {
                let mut name = String::with_capacity(73);
                for segment in addr.segments().iter().rev() {
                    for c in format!("{:04x}", segment).chars().rev() {
                        name.push(c);
                        name.push('.');
                    }
                }
                name.push_str("ip6.arpa.");
                Ok(name)
            }
            Err(_) => Err(error()),
        },
        RecordType::NAPTR => {
            let digits: String = address
                .trim_end_matches('.')
                .chars()
                .filter(|c| !matches!(c, '+' | ' ' | '-'))
                .collect();
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(error());
            }
            let mut name = String::with_capacity(digits.len() * 2 + 10);
            for digit in digits.chars().rev() {
                name.push(digit);
                name.push('.');
            }
            name.push_str("e164.arpa.");
            Ok(name)
        }
        _ => Err(error()),
    }
}

#[cfg(test)]
mod tests {
    use hickory_proto::rr::RecordType;

    use super::reverse_name;

    #[test]
    fn ipv4() {
        assert_eq!(
            reverse_name("8.8.4.4", RecordType::PTR).unwrap(),
            "4.4.8.8.in-addr.arpa."
        );
    }

    #[test]
    fn ipv6() {
        assert_eq!(
            reverse_name("2606:4700:4700::1111", RecordType::PTR).unwrap(),
            "1.1.1.1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.7.4.0.0.7.4.6.0.6.2.ip6.arpa."
        );
    }

    #[test]
    fn phone_number() {
        assert_eq!(
            reverse_name("1-800-555-1234", RecordType::NAPTR).unwrap(),
            "4.3.2.1.5.5.5.0.0.8.1.e164.arpa."
        );
        assert_eq!(
            reverse_name("+1 800 555 1234", RecordType::NAPTR).unwrap(),
            "4.3.2.1.5.5.5.0.0.8.1.e164.arpa."
        );
    }

    #[test]
    fn mismatches_fail() {
        assert!(reverse_name("example.com", RecordType::PTR).is_err());
        assert!(reverse_name("1-800-FLOWERS", RecordType::NAPTR).is_err());
        assert!(reverse_name("8.8.4.4", RecordType::MX).is_err());
    }
}
