//! DNS message parsing and construction.
//!
//! Only the parts of the wire format the resolver needs: the header, the
//! first question, and A/AAAA/PTR answers. Forwarded responses are relayed as
//! raw bytes and only ever inspected through [`message_id`] and
//! [`response_rcode`].

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

/// Largest response sent over UDP without truncation.
pub const MAX_UDP_RESPONSE: usize = 512;

/// TTL of locally synthesized answers.
pub const LOCAL_TTL: u32 = 600;

const CLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_MASK: u16 = 0x7800;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Other(u16),
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Other(code) => code,
        }
    }
}

impl From<u16> for RecordType {
    fn from(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            6 => RecordType::Soa,
            12 => RecordType::Ptr,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            other => RecordType::Other(other),
        }
    }
}

/// Response code carried in the low four bits of the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl Rcode {
    pub fn code(self) -> u8 {
        match self {
            Rcode::NoError => 0,
            Rcode::FormErr => 1,
            Rcode::ServFail => 2,
            Rcode::NxDomain => 3,
            Rcode::NotImp => 4,
            Rcode::Refused => 5,
            Rcode::Other(code) => code & 0x0F,
        }
    }

    fn from_flags(flags: u16) -> Self {
        match (flags & 0x000F) as u8 {
            0 => Rcode::NoError,
            1 => Rcode::FormErr,
            2 => Rcode::ServFail,
            3 => Rcode::NxDomain,
            4 => Rcode::NotImp,
            5 => Rcode::Refused,
            other => Rcode::Other(other),
        }
    }
}

/// A parsed DNS query.
///
/// `domain` is in presentation form: labels joined by `.`, with `.` and `\\`
/// inside a label escaped by a backslash and any other byte outside printable
/// ASCII written as `\DDD`. It keeps the letter case the client sent and has
/// no trailing dot; the root name is the empty string.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub flags: u16,
    pub domain: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

impl DnsQuery {
    /// Build a standard recursive query for `domain`.
    pub fn new(id: u16, domain: &str, qtype: RecordType) -> Self {
        Self {
            id,
            flags: FLAG_RD,
            domain: strip_root(domain).to_string(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    /// Parse a DNS query from raw bytes. Only the first question is read.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Malformed("message shorter than header"));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]);

        if flags & FLAG_QR != 0 {
            return Err(Error::Malformed("response received as query"));
        }
        if qdcount == 0 {
            return Err(Error::Malformed("no question"));
        }

        // Nothing precedes the first question, so it cannot hold a pointer.
        let (domain, pos) = read_name(data, HEADER_LEN)?;
        if pos + 4 > data.len() {
            return Err(Error::Malformed("question truncated"));
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Ok(Self {
            id,
            flags,
            domain,
            qtype: qtype.into(),
            qclass,
        })
    }

    /// Name used for registry lookups.
    pub fn lookup_name(&self) -> String {
        self.domain.to_ascii_lowercase()
    }

    /// Encode the query to wire format bytes.
    ///
    /// Fails if `domain` is not a valid name.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.domain.len() + 6);

        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        encode_domain(&mut data, &self.domain)?;
        data.extend_from_slice(&self.qtype.code().to_be_bytes());
        data.extend_from_slice(&self.qclass.to_be_bytes());

        Ok(data)
    }
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

/// A DNS resource record.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Raw(Vec<u8>),
}

impl DnsResponse {
    /// Start a response to `query` with the given response code.
    ///
    /// Copies the id, opcode and RD bit and echoes the question.
    pub fn for_query(query: &DnsQuery, rcode: Rcode) -> Self {
        let flags = FLAG_QR
            | FLAG_RA
            | (query.flags & (OPCODE_MASK | FLAG_RD))
            | u16::from(rcode.code());

        Self {
            id: query.id,
            flags,
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype,
                qclass: query.qclass,
            }],
            answers: Vec::new(),
        }
    }

    /// FORMERR for a message that could not be parsed.
    ///
    /// The id is echoed when the message is long enough to carry one.
    pub fn format_error(raw: &[u8]) -> Self {
        let id = message_id(raw).unwrap_or(0);
        let opcode_rd = if raw.len() >= 4 {
            u16::from_be_bytes([raw[2], raw[3]]) & (OPCODE_MASK | FLAG_RD)
        } else {
            0
        };

        Self {
            id,
            flags: FLAG_QR | FLAG_RA | opcode_rd | u16::from(Rcode::FormErr.code()),
            questions: Vec::new(),
            answers: Vec::new(),
        }
    }

    pub fn rcode(&self) -> Rcode {
        Rcode::from_flags(self.flags)
    }

    /// The header alone, with `rcode` and empty sections. Never fails.
    pub fn header_bytes(&self, rcode: Rcode) -> Vec<u8> {
        let flags = (self.flags & !(0x000F | FLAG_AA | FLAG_TC)) | u16::from(rcode.code());
        let mut data = Vec::with_capacity(HEADER_LEN);
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&flags.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        data
    }

    pub fn is_authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    pub fn set_authoritative(&mut self) {
        self.flags |= FLAG_AA;
    }

    /// Append an A or AAAA answer for the first question's name.
    pub fn push_address(&mut self, ip: IpAddr) {
        let name = self.answer_name();
        let (rtype, rdata) = match ip {
            IpAddr::V4(v4) => (RecordType::A, RecordData::A(v4)),
            IpAddr::V6(v6) => (RecordType::Aaaa, RecordData::Aaaa(v6)),
        };
        self.answers.push(DnsRecord {
            name,
            rtype,
            class: CLASS_IN,
            ttl: LOCAL_TTL,
            rdata,
        });
    }

    /// Append a PTR answer pointing at `target`.
    ///
    /// Fails, leaving the response unchanged, if `target` is not a valid name.
    pub fn push_ptr(&mut self, target: &str) -> Result<()> {
        let target = strip_root(target);
        encode_domain(&mut Vec::with_capacity(target.len() + 2), target)?;

        let name = self.answer_name();
        self.answers.push(DnsRecord {
            name,
            rtype: RecordType::Ptr,
            class: CLASS_IN,
            ttl: LOCAL_TTL,
            rdata: RecordData::Ptr(target.to_string()),
        });
        Ok(())
    }

    fn answer_name(&self) -> String {
        self.questions
            .first()
            .map(|q| q.domain.clone())
            .unwrap_or_default()
    }

    /// Drop answers until the encoded message fits in `max` bytes.
    ///
    /// Sets TC when anything was dropped.
    pub fn truncate_to(&mut self, max: usize) {
        let fits = |response: &Self| response.to_bytes().is_ok_and(|b| b.len() <= max);
        if fits(self) {
            return;
        }
        while !fits(self) && self.answers.pop().is_some() {}
        self.flags |= FLAG_TC;
    }

    /// Encode the response to wire format bytes.
    ///
    /// Fails if a question or record carries an invalid name.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(MAX_UDP_RESPONSE);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        for q in &self.questions {
            encode_domain(&mut data, &q.domain)?;
            data.extend_from_slice(&q.qtype.code().to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        for a in &self.answers {
            self.encode_answer(&mut data, a)?;
        }

        Ok(data)
    }

    fn encode_answer(&self, data: &mut Vec<u8>, a: &DnsRecord) -> Result<()> {
        // Use compression pointer if this is the first question's domain
        if !self.questions.is_empty() && a.name == self.questions[0].domain {
            data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
        } else {
            encode_domain(data, &a.name)?;
        }
        data.extend_from_slice(&a.rtype.code().to_be_bytes());
        data.extend_from_slice(&a.class.to_be_bytes());
        data.extend_from_slice(&a.ttl.to_be_bytes());

        let mut rdata = Vec::new();
        match &a.rdata {
            RecordData::A(v4) => rdata.extend_from_slice(&v4.octets()),
            RecordData::Aaaa(v6) => rdata.extend_from_slice(&v6.octets()),
            RecordData::Ptr(target) => encode_domain(&mut rdata, target)?,
            RecordData::Raw(raw) => rdata.extend_from_slice(raw),
        }
        data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rdata);
        Ok(())
    }

    /// Parse a complete response, following compression pointers.
    ///
    /// Authority and additional sections are skipped.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Malformed("message shorter than header"));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]);
        let ancount = u16::from_be_bytes([data[6], data[7]]);

        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            let (domain, next) = read_name(data, pos)?;
            if next + 4 > data.len() {
                return Err(Error::Malformed("question truncated"));
            }
            questions.push(DnsQuestion {
                domain,
                qtype: u16::from_be_bytes([data[next], data[next + 1]]).into(),
                qclass: u16::from_be_bytes([data[next + 2], data[next + 3]]),
            });
            pos = next + 4;
        }

        let mut answers = Vec::with_capacity(ancount as usize);
        for _ in 0..ancount {
            let (name, next) = read_name(data, pos)?;
            if next + 10 > data.len() {
                return Err(Error::Malformed("record header truncated"));
            }
            let rtype = RecordType::from(u16::from_be_bytes([data[next], data[next + 1]]));
            let class = u16::from_be_bytes([data[next + 2], data[next + 3]]);
            let ttl = u32::from_be_bytes([
                data[next + 4],
                data[next + 5],
                data[next + 6],
                data[next + 7],
            ]);
            let rdlength = u16::from_be_bytes([data[next + 8], data[next + 9]]) as usize;
            let start = next + 10;
            if start + rdlength > data.len() {
                return Err(Error::Malformed("rdata truncated"));
            }
            let raw = &data[start..start + rdlength];

            let rdata = match (rtype, rdlength) {
                (RecordType::A, 4) => RecordData::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
                (RecordType::Aaaa, 16) => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(raw);
                    RecordData::Aaaa(Ipv6Addr::from(octets))
                }
                (RecordType::Ptr, _) => RecordData::Ptr(read_name(data, start)?.0),
                _ => RecordData::Raw(raw.to_vec()),
            };

            answers.push(DnsRecord {
                name,
                rtype,
                class,
                ttl,
                rdata,
            });
            pos = start + rdlength;
        }

        Ok(Self {
            id,
            flags,
            questions,
            answers,
        })
    }
}

/// Transaction id of a raw message.
pub fn message_id(data: &[u8]) -> Option<u16> {
    (data.len() >= 2).then(|| u16::from_be_bytes([data[0], data[1]]))
}

/// Response code of a raw message, `None` if it has no complete header.
pub fn response_rcode(data: &[u8]) -> Option<Rcode> {
    (data.len() >= HEADER_LEN).then(|| Rcode::from_flags(u16::from_be_bytes([data[2], data[3]])))
}

/// Decode an `in-addr.arpa` or `ip6.arpa` name into the address it names.
pub fn parse_reverse_name(name: &str) -> Option<IpAddr> {
    let name = name.trim_end_matches('.').to_ascii_lowercase();

    if let Some(rest) = name.strip_suffix(".in-addr.arpa") {
        let mut octets = [0u8; 4];
        let labels: Vec<&str> = rest.split('.').collect();
        if labels.len() != 4 {
            return None;
        }
        for (i, label) in labels.iter().rev().enumerate() {
            octets[i] = label.parse().ok()?;
        }
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }

    if let Some(rest) = name.strip_suffix(".ip6.arpa") {
        let nibbles: Vec<&str> = rest.split('.').collect();
        if nibbles.len() != 32 {
            return None;
        }
        let mut octets = [0u8; 16];
        for (i, nibble) in nibbles.iter().rev().enumerate() {
            if nibble.len() != 1 {
                return None;
            }
            let value = u8::from_str_radix(nibble, 16).ok()?;
            octets[i / 2] |= if i % 2 == 0 { value << 4 } else { value };
        }
        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
    }

    None
}

/// The reverse lookup name for `ip`, without trailing dot.
pub fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0F, byte >> 4);
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

/// Read a possibly compressed name starting at `start`.
///
/// Returns the name in presentation form and the offset just past it in the
/// original byte stream. A compression pointer must refer to an earlier
/// position than the one it was read from, which also rules out loops.
fn read_name(data: &[u8], start: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut wire_len = 1;
    let mut pos = start;
    let mut limit = start;
    let mut end = None;

    loop {
        let Some(&len) = data.get(pos) else {
            return Err(Error::Malformed("name runs past end of message"));
        };

        match len {
            0 => {
                pos += 1;
                break;
            }
            l if l & 0xC0 == 0xC0 => {
                let Some(&low) = data.get(pos + 1) else {
                    return Err(Error::Malformed("truncated compression pointer"));
                };
                let target = (usize::from(l & 0x3F) << 8) | usize::from(low);
                if target < HEADER_LEN || target >= limit {
                    return Err(Error::Malformed("compression pointer does not point backwards"));
                }
                end.get_or_insert(pos + 2);
                limit = target;
                pos = target;
            }
            l if l & 0xC0 != 0 => return Err(Error::Malformed("unsupported label type")),
            l => {
                let label_start = pos + 1;
                let label_end = label_start + usize::from(l);
                if label_end > data.len() {
                    return Err(Error::Malformed("label runs past end of message"));
                }
                wire_len += 1 + usize::from(l);
                if wire_len > MAX_NAME_LEN {
                    return Err(Error::Malformed("name longer than 255 bytes"));
                }
                if !name.is_empty() {
                    name.push('.');
                }
                escape_label(&mut name, &data[label_start..label_end]);
                pos = label_end;
            }
        }
    }

    Ok((name, end.unwrap_or(pos)))
}

fn escape_label(out: &mut String, label: &[u8]) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x21..=0x7E => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\{b:03}");
            }
        }
    }
}

/// Encode a presentation-form name as wire labels, undoing the escapes
/// [`read_name`] produces.
fn encode_domain(buf: &mut Vec<u8>, domain: &str) -> Result<()> {
    let start = buf.len();
    let mut label = Vec::with_capacity(MAX_LABEL_LEN);
    let mut bytes = domain.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'\\' => match bytes.next() {
                Some(d) if d.is_ascii_digit() => {
                    let mut value = u16::from(d - b'0');
                    for _ in 0..2 {
                        match bytes.next() {
                            Some(d) if d.is_ascii_digit() => value = value * 10 + u16::from(d - b'0'),
                            _ => return Err(Error::Malformed("short decimal escape")),
                        }
                    }
                    let value = u8::try_from(value).map_err(|_| Error::Malformed("decimal escape above 255"))?;
                    label.push(value);
                }
                Some(c) => label.push(c),
                None => return Err(Error::Malformed("trailing backslash")),
            },
            b'.' => {
                if label.is_empty() {
                    return Err(Error::Malformed("empty label"));
                }
                push_label(buf, &label)?;
                label.clear();
            }
            _ => label.push(b),
        }
    }
    if !label.is_empty() {
        push_label(buf, &label)?;
    }
    buf.push(0);

    if buf.len() - start > MAX_NAME_LEN {
        return Err(Error::Malformed("name longer than 255 bytes"));
    }
    Ok(())
}

fn push_label(buf: &mut Vec<u8>, label: &[u8]) -> Result<()> {
    if label.len() > MAX_LABEL_LEN {
        return Err(Error::Malformed("label longer than 63 bytes"));
    }
    buf.push(label.len() as u8);
    buf.extend_from_slice(label);
    Ok(())
}

/// Drop the trailing root dot, unless it is escaped.
fn strip_root(name: &str) -> &str {
    match name.strip_suffix('.') {
        Some(rest) if rest.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 0 => rest,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_keeps_case_and_strips_root() {
        let bytes = DnsQuery::new(0x1234, "NaMe1.", RecordType::A).to_bytes().unwrap();

        let query = DnsQuery::parse(&bytes).unwrap();

        assert_eq!(query.id, 0x1234);
        assert_eq!(query.domain, "NaMe1");
        assert_eq!(query.lookup_name(), "name1");
        assert_eq!(query.qtype, RecordType::A);
        assert_eq!(query.qclass, CLASS_IN);
    }

    #[test]
    fn parse_rejects_short_and_questionless_messages() {
        assert!(matches!(DnsQuery::parse(&[0x12]), Err(Error::Malformed(_))));

        let mut bytes = DnsQuery::new(1, "a", RecordType::A).to_bytes().unwrap();
        bytes[5] = 0;
        assert!(matches!(DnsQuery::parse(&bytes), Err(Error::Malformed(_))));
    }

    #[test]
    fn parse_rejects_label_past_end() {
        let mut bytes = DnsQuery::new(1, "example", RecordType::A).to_bytes().unwrap();
        bytes.truncate(HEADER_LEN + 4);

        assert!(DnsQuery::parse(&bytes).is_err());
    }

    fn raw_query(name: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x2A, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        bytes
    }

    #[test]
    fn parse_rejects_pointer_in_question() {
        // Points at itself.
        let looped = raw_query(&[0xC0, 0x0C]);
        assert!(matches!(DnsQuery::parse(&looped), Err(Error::Malformed(_))));

        // Points past itself at a valid name.
        let mut forward = raw_query(&[0xC0, 0x12]);
        forward.extend_from_slice(&[5, b'n', b'a', b'm', b'e', b'1', 0]);
        assert!(matches!(DnsQuery::parse(&forward), Err(Error::Malformed(_))));
    }

    #[test]
    fn binary_labels_are_escaped_and_round_trip() {
        let wire = [2, 0xFF, 0xFE, 3, b'c', b'o', b'm', 0];
        let bytes = raw_query(&wire);

        let query = DnsQuery::parse(&bytes).unwrap();

        assert_eq!(query.domain, "\\255\\254.com");
        assert_eq!(query.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn dot_inside_label_stays_one_label() {
        let wire = [6, b'n', b'a', b'm', b'e', b'1', b'.', 0];
        let bytes = raw_query(&wire);

        let query = DnsQuery::parse(&bytes).unwrap();
        assert_eq!(query.domain, "name1\\.");
        assert_ne!(query.lookup_name(), "name1");

        let echoed = DnsResponse::for_query(&query, Rcode::ServFail).to_bytes().unwrap();
        assert_eq!(&echoed[HEADER_LEN..], &bytes[HEADER_LEN..]);
        assert_eq!(DnsQuery::new(1, "name1\\.", RecordType::A).domain, "name1\\.");
    }

    #[test]
    fn encode_rejects_oversized_labels_and_names() {
        let long_label = "a".repeat(64);
        assert!(DnsQuery::new(1, &long_label, RecordType::A).to_bytes().is_err());
        assert!(DnsQuery::new(1, &"a".repeat(63), RecordType::A).to_bytes().is_ok());

        let long_name = vec!["abcdefgh"; 40].join(".");
        assert!(DnsQuery::new(1, &long_name, RecordType::A).to_bytes().is_err());

        let mut response = DnsResponse::for_query(&DnsQuery::new(1, "x", RecordType::Ptr), Rcode::NoError);
        assert!(response.push_ptr(&long_label).is_err());
        assert!(response.answers.is_empty());
    }

    #[test]
    fn response_echoes_question_and_compresses_answers() {
        let query = DnsQuery::new(7, "web.local", RecordType::A);
        let mut response = DnsResponse::for_query(&query, Rcode::NoError);
        response.set_authoritative();
        response.push_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        let bytes = response.to_bytes().unwrap();
        let parsed = DnsResponse::parse(&bytes).unwrap();

        assert_eq!(parsed.id, 7);
        assert!(parsed.is_authoritative());
        assert_eq!(parsed.rcode(), Rcode::NoError);
        assert_eq!(parsed.questions[0].domain, "web.local");
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].name, "web.local");
        assert_eq!(parsed.answers[0].ttl, LOCAL_TTL);
        assert_eq!(parsed.answers[0].rdata, RecordData::A(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(&bytes[bytes.len() - 16..bytes.len() - 14], &[0xC0, 0x0C]);
    }

    #[test]
    fn format_error_keeps_id_when_available() {
        let response = DnsResponse::format_error(&[0xAB, 0xCD, 0x01]);

        assert_eq!(response.id, 0xABCD);
        assert_eq!(response.rcode(), Rcode::FormErr);
        assert_eq!(response_rcode(&response.to_bytes().unwrap()), Some(Rcode::FormErr));
    }

    #[test]
    fn truncate_sets_tc_and_fits() {
        let query = DnsQuery::new(1, "anycast", RecordType::A);
        let mut response = DnsResponse::for_query(&query, Rcode::NoError);
        for i in 0..60u8 {
            response.push_address(IpAddr::V4(Ipv4Addr::new(10, 0, 1, i)));
        }

        response.truncate_to(MAX_UDP_RESPONSE);

        assert!(response.is_truncated());
        assert!(response.to_bytes().unwrap().len() <= MAX_UDP_RESPONSE);
        assert!(response.answers.len() < 60);
    }

    #[test]
    fn truncate_leaves_small_responses_alone() {
        let query = DnsQuery::new(1, "one", RecordType::A);
        let mut response = DnsResponse::for_query(&query, Rcode::NoError);
        response.push_address(IpAddr::V4(Ipv4Addr::LOCALHOST));

        response.truncate_to(MAX_UDP_RESPONSE);

        assert!(!response.is_truncated());
        assert_eq!(response.answers.len(), 1);
    }

    #[test]
    fn reverse_names() {
        let v4: IpAddr = "192.168.0.1".parse().unwrap();
        assert_eq!(reverse_name(v4), "1.0.168.192.in-addr.arpa");
        assert_eq!(parse_reverse_name("1.0.168.192.IN-ADDR.ARPA."), Some(v4));

        let v6: IpAddr = "2001:db8::567:89ab".parse().unwrap();
        assert_eq!(parse_reverse_name(&reverse_name(v6)), Some(v6));

        assert_eq!(parse_reverse_name("1.2.3.in-addr.arpa"), None);
        assert_eq!(parse_reverse_name("name1"), None);
    }

    #[test]
    fn record_type_codes() {
        assert_eq!(RecordType::from(28), RecordType::Aaaa);
        assert_eq!(RecordType::from(15), RecordType::Mx);
        assert_eq!(RecordType::from(99).code(), 99);
    }
}
