//! Minimal DNS wire handling.
//!
//! The nameserver only needs to read a query's id and first question
//! and to build an authoritative A answer; everything else is forwarded
//! as raw bytes. No compression support is needed on the query path
//! because stub resolvers do not compress question names.

use std::net::Ipv4Addr;

use thiserror::Error;

/// QTYPE for an IPv4 host address record.
pub const QTYPE_A: u16 = 1;

/// QCLASS for the Internet.
pub const QCLASS_IN: u16 = 1;

/// Response flags for a local answer: QR | AA | RD | RA.
pub const ANSWER_FLAGS: u16 = 0x8580;

/// TTL for locally answered records, in seconds.
pub const ANSWER_TTL: u32 = 300;

/// Fixed size of the DNS message header.
const HEADER_LEN: usize = 12;

/// Errors decoding a DNS query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DnsError {
    /// The datagram ended before the question did.
    #[error("truncated DNS query")]
    Truncated,
    /// The question name uses compression, which queries never should.
    #[error("compressed name in question")]
    CompressedName,
}

/// The parts of a query the responder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsQuery {
    /// Transaction id, echoed in the response.
    pub id: u16,
    /// First question name, dotted, original case preserved.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Offset just past the question section.
    question_end: usize,
}

/// Parse the header and first question of a query datagram.
pub fn parse_query(buf: &[u8]) -> Result<DnsQuery, DnsError> {
    if buf.len() < HEADER_LEN {
        return Err(DnsError::Truncated);
    }
    let id = u16::from_be_bytes([buf[0], buf[1]]);
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
    if qdcount == 0 {
        return Err(DnsError::Truncated);
    }

    let mut labels = Vec::new();
    let mut pos = HEADER_LEN;
    loop {
        let len = *buf.get(pos).ok_or(DnsError::Truncated)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xc0 == 0xc0 {
            return Err(DnsError::CompressedName);
        }
        let label = buf
            .get(pos + 1..pos + 1 + len)
            .ok_or(DnsError::Truncated)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len;
    }

    let qtype_bytes = buf.get(pos..pos + 2).ok_or(DnsError::Truncated)?;
    let qclass_bytes = buf.get(pos + 2..pos + 4).ok_or(DnsError::Truncated)?;
    let qtype = u16::from_be_bytes([qtype_bytes[0], qtype_bytes[1]]);
    let qclass = u16::from_be_bytes([qclass_bytes[0], qclass_bytes[1]]);

    Ok(DnsQuery {
        id,
        name: labels.join("."),
        qtype,
        qclass,
        question_end: pos + 4,
    })
}

/// Build an authoritative A answer for a parsed query.
///
/// The question section is echoed verbatim from the query bytes and the
/// answer name is a pointer back to it.
pub fn build_a_response(query: &DnsQuery, raw_query: &[u8], addr: Ipv4Addr) -> Vec<u8> {
    let mut out = Vec::with_capacity(query.question_end + 16);

    out.extend_from_slice(&query.id.to_be_bytes());
    out.extend_from_slice(&ANSWER_FLAGS.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&1u16.to_be_bytes()); // ancount
    out.extend_from_slice(&0u16.to_be_bytes()); // nscount
    out.extend_from_slice(&0u16.to_be_bytes()); // arcount

    // Question section, byte for byte.
    out.extend_from_slice(&raw_query[HEADER_LEN..query.question_end]);

    // Answer: pointer to the question name at offset 12.
    out.extend_from_slice(&[0xc0, 0x0c]);
    out.extend_from_slice(&QTYPE_A.to_be_bytes());
    out.extend_from_slice(&QCLASS_IN.to_be_bytes());
    out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes()); // rdlength
    out.extend_from_slice(&addr.octets());

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a plain query datagram for tests.
    fn query_bytes(id: u16, name: &str, qtype: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
        out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out.extend_from_slice(&qtype.to_be_bytes());
        out.extend_from_slice(&QCLASS_IN.to_be_bytes());
        out
    }

    #[test]
    fn parses_the_first_question() {
        let raw = query_bytes(0xbeef, "myhub.example-iot.net", QTYPE_A);
        let query = parse_query(&raw).unwrap();
        assert_eq!(query.id, 0xbeef);
        assert_eq!(query.name, "myhub.example-iot.net");
        assert_eq!(query.qtype, QTYPE_A);
        assert_eq!(query.qclass, QCLASS_IN);
    }

    #[test]
    fn every_truncated_prefix_errors_cleanly() {
        let raw = query_bytes(1, "a.b", QTYPE_A);
        for end in 0..raw.len() {
            assert_eq!(
                parse_query(&raw[..end]),
                Err(DnsError::Truncated),
                "prefix of {end} bytes"
            );
        }
        assert!(parse_query(&raw).is_ok());
    }

    #[test]
    fn compression_pointers_are_rejected() {
        let mut raw = query_bytes(1, "a", QTYPE_A);
        raw[HEADER_LEN] = 0xc0;
        assert_eq!(parse_query(&raw), Err(DnsError::CompressedName));
    }

    #[test]
    fn a_answers_carry_flags_ttl_and_address() {
        let raw = query_bytes(0x1234, "myhub.example-iot.net", QTYPE_A);
        let query = parse_query(&raw).unwrap();
        let response = build_a_response(&query, &raw, Ipv4Addr::new(10, 20, 30, 40));

        assert_eq!(&response[0..2], &0x1234u16.to_be_bytes());
        assert_eq!(&response[2..4], &ANSWER_FLAGS.to_be_bytes());
        assert_eq!(&response[4..6], &1u16.to_be_bytes(), "qdcount");
        assert_eq!(&response[6..8], &1u16.to_be_bytes(), "ancount");

        // Question echoed verbatim.
        assert_eq!(&response[12..raw.len()], &raw[12..]);

        // Answer record fields.
        let answer = &response[raw.len()..];
        assert_eq!(&answer[0..2], &[0xc0, 0x0c]);
        assert_eq!(&answer[2..4], &QTYPE_A.to_be_bytes());
        assert_eq!(&answer[4..6], &QCLASS_IN.to_be_bytes());
        assert_eq!(&answer[6..10], &ANSWER_TTL.to_be_bytes());
        assert_eq!(&answer[10..12], &4u16.to_be_bytes());
        assert_eq!(&answer[12..16], &[10, 20, 30, 40]);
    }

    #[test]
    fn zero_question_queries_are_rejected() {
        let mut raw = query_bytes(1, "a", QTYPE_A);
        raw[4] = 0;
        raw[5] = 0;
        assert!(parse_query(&raw).is_err());
    }
}
