//! Captive DNS responder.
//!
//! Every A query is answered with the access point address, so whatever
//! host a client looks up lands on the portal. Other query types get an
//! empty NOERROR answer, which makes clients fall back to IPv4.
//!
//! # Wire format
//!
//! ```text
//! header   [id:2][flags:2][qdcount:2][ancount:2][nscount:2][arcount:2]
//! question [labels...][0][qtype:2][qclass:2]
//! answer   [0xC00C][type A:2][class IN:2][ttl:4][rdlength=4:2][ipv4:4]
//! ```

use log::{debug, info};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// TTL of the synthesized A record, in seconds.
pub const ANSWER_TTL_SECS: u32 = 60;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const MAX_PACKET: usize = 512;

/// Why a packet was not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsError {
    /// Shorter than a header, or the question runs past the end.
    Truncated,
    /// A response, or an opcode other than standard query.
    NotQuery,
    /// No question present.
    NoQuestion,
    /// Compressed or oversized label in the question.
    BadName,
}

impl std::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated packet"),
            Self::NotQuery => write!(f, "not a standard query"),
            Self::NoQuestion => write!(f, "no question"),
            Self::BadName => write!(f, "malformed name"),
        }
    }
}

impl std::error::Error for DnsError {}

/// The parts of a query needed to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery<'a> {
    pub id: u16,
    pub recursion_desired: bool,
    /// Dotted name, for logging.
    pub name: String,
    pub qtype: u16,
    /// Raw bytes of the first question, copied into the answer.
    pub question: &'a [u8],
}

fn read_u16(packet: &[u8], at: usize) -> Result<u16, DnsError> {
    packet
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(DnsError::Truncated)
}

/// Parse the header and first question of a query.
pub fn parse_query(packet: &[u8]) -> Result<DnsQuery<'_>, DnsError> {
    if packet.len() < HEADER_LEN {
        return Err(DnsError::Truncated);
    }
    let id = read_u16(packet, 0)?;
    let flags = read_u16(packet, 2)?;
    let is_response = flags & 0x8000 != 0;
    let opcode = (flags >> 11) & 0x0F;
    if is_response || opcode != 0 {
        return Err(DnsError::NotQuery);
    }
    if read_u16(packet, 4)? == 0 {
        return Err(DnsError::NoQuestion);
    }

    let mut labels: Vec<String> = Vec::new();
    let mut at = HEADER_LEN;
    loop {
        let len = *packet.get(at).ok_or(DnsError::Truncated)? as usize;
        at += 1;
        if len == 0 {
            break;
        }
        // Queries never need compression pointers
        if len > 63 {
            return Err(DnsError::BadName);
        }
        let label = packet.get(at..at + len).ok_or(DnsError::Truncated)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        at += len;
    }
    let qtype = read_u16(packet, at)?;
    read_u16(packet, at + 2)?;
    let end = at + 4;

    Ok(DnsQuery {
        id,
        recursion_desired: flags & 0x0100 != 0,
        name: labels.join("."),
        qtype,
        question: &packet[HEADER_LEN..end],
    })
}

/// Build the answer to `packet`, pointing A queries at `address`.
pub fn build_response(packet: &[u8], address: Ipv4Addr) -> Result<Vec<u8>, DnsError> {
    let query = parse_query(packet)?;
    let answer_a = query.qtype == TYPE_A;

    let mut out = Vec::with_capacity(HEADER_LEN + query.question.len() + 16);
    out.extend_from_slice(&query.id.to_be_bytes());
    // QR=1, AA=1, RD copied, RCODE=0
    let mut flags: u16 = 0x8400;
    if query.recursion_desired {
        flags |= 0x0100;
    }
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&u16::from(answer_a).to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(query.question);

    if answer_a {
        out.extend_from_slice(&[0xC0, 0x0C]);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&address.octets());
    }
    Ok(out)
}

/// Non-blocking UDP responder.
pub struct DnsResponder {
    socket: UdpSocket,
    address: Ipv4Addr,
}

impl DnsResponder {
    /// Bind on `bind:port` and answer with `address`.
    pub fn bind(bind: Ipv4Addr, port: u16, address: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(bind, port))?;
        socket.set_nonblocking(true)?;
        info!("Captive DNS listening on {}:{}", bind, port);
        Ok(Self { socket, address })
    }

    /// Local socket address.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Answer every datagram waiting on the socket. Returns how many were answered.
    pub fn poll(&self) -> io::Result<usize> {
        let mut buf = [0u8; MAX_PACKET];
        let mut answered = 0;
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(answered),
                Err(e) => return Err(e),
            };
            match build_response(&buf[..len], self.address) {
                Ok(response) => {
                    if let Ok(query) = parse_query(&buf[..len]) {
                        debug!("DNS {} (type {}) from {}", query.name, query.qtype, peer);
                    }
                    self.socket.send_to(&response, peer)?;
                    answered += 1;
                }
                Err(e) => debug!("Dropped DNS packet from {}: {}", peer, e),
            }
        }
    }
}
