// NSDP message codec
//
// A message is a fixed 32-byte header followed by a sequence of TLVs and an
// end-of-message marker. All integers are big-endian.
//
//   0      version (always 1)
//   1      operation
//   2..4   result code
//   8..14  host MAC
//   14..20 device MAC
//   22..24 sequence number
//   24..28 signature "NSDP"

use std::net::Ipv4Addr;

use super::{MacAddr, NsdpError};

pub const HEADER_LEN: usize = 32;
const VERSION: u8 = 1;
const SIGNATURE: &[u8; 4] = b"NSDP";
const END_OF_MESSAGE: u16 = 0xFFFF;

/// Message operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteResponse,
}

impl Op {
    fn code(self) -> u8 {
        match self {
            Op::ReadRequest => 1,
            Op::ReadResponse => 2,
            Op::WriteRequest => 3,
            Op::WriteResponse => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Op::ReadRequest),
            2 => Some(Op::ReadResponse),
            3 => Some(Op::WriteRequest),
            4 => Some(Op::WriteResponse),
            _ => None,
        }
    }
}

/// Record tags understood by the exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    HostName,
    HostIp,
    PortLinkStatus,
    PortStatistics,
}

impl Tag {
    pub fn code(self) -> u16 {
        match self {
            Tag::HostName => 0x0003,
            Tag::HostIp => 0x0006,
            Tag::PortLinkStatus => 0x0C00,
            Tag::PortStatistics => 0x1000,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0003 => Some(Tag::HostName),
            0x0006 => Some(Tag::HostIp),
            0x0C00 => Some(Tag::PortLinkStatus),
            0x1000 => Some(Tag::PortStatistics),
            _ => None,
        }
    }

    /// Tag name as used in logs
    pub fn name(self) -> &'static str {
        match self {
            Tag::HostName => "host_name",
            Tag::HostIp => "ip",
            Tag::PortLinkStatus => "port_link_status",
            Tag::PortStatistics => "port_statistics",
        }
    }
}

/// Link state of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Raw link speed code (0 = down, 1 = 10M half, ..., 5 = 1G)
    pub speed: u8,
    pub flags: u8,
}

/// Traffic counters of one port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounters {
    pub received: u64,
    pub sent: u64,
    pub packets: u64,
    pub broadcast: u64,
    pub multicast: u64,
    pub errors: u64,
}

/// One fact from a discovery response
///
/// The port number carried on the wire is dropped: the position of a port
/// record within a response is its port index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    HostName(String),
    HostIp(Ipv4Addr),
    PortLinkStatus(LinkStatus),
    PortStatistics(PortCounters),
}

impl RawRecord {
    pub fn tag(&self) -> Tag {
        match self {
            RawRecord::HostName(_) => Tag::HostName,
            RawRecord::HostIp(_) => Tag::HostIp,
            RawRecord::PortLinkStatus(_) => Tag::PortLinkStatus,
            RawRecord::PortStatistics(_) => Tag::PortStatistics,
        }
    }
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub op: Op,
    pub result: u16,
    pub host_mac: MacAddr,
    pub device_mac: MacAddr,
    pub sequence: u16,
}

/// Encodes a read request asking for `tags`
pub fn encode_read_request(host_mac: MacAddr, sequence: u16, tags: &[Tag]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    buf[0] = VERSION;
    buf[1] = Op::ReadRequest.code();
    buf[8..14].copy_from_slice(&host_mac.octets());
    buf[22..24].copy_from_slice(&sequence.to_be_bytes());
    buf[24..28].copy_from_slice(SIGNATURE);

    for tag in tags {
        buf.extend_from_slice(&tag.code().to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
    }

    buf.extend_from_slice(&END_OF_MESSAGE.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf
}

fn malformed(reason: impl Into<String>) -> NsdpError {
    NsdpError::Malformed(reason.into())
}

fn mac_at(buf: &[u8], offset: usize) -> MacAddr {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&buf[offset..offset + 6]);
    MacAddr::new(octets)
}

fn u64_at(value: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&value[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// Decodes the header of a message
pub fn decode_header(buf: &[u8]) -> Result<Header, NsdpError> {
    if buf.len() < HEADER_LEN {
        return Err(malformed(format!("{} byte message is shorter than the header", buf.len())));
    }
    if buf[0] != VERSION {
        return Err(malformed(format!("unsupported version {}", buf[0])));
    }
    if &buf[24..28] != SIGNATURE {
        return Err(malformed("missing NSDP signature"));
    }

    let op = Op::from_code(buf[1]).ok_or_else(|| malformed(format!("unknown operation {}", buf[1])))?;

    Ok(Header {
        op,
        result: u16::from_be_bytes([buf[2], buf[3]]),
        host_mac: mac_at(buf, 8),
        device_mac: mac_at(buf, 14),
        sequence: u16::from_be_bytes([buf[22], buf[23]]),
    })
}

/// Decodes a whole message into its header and the known records
///
/// Records with unknown tags are skipped. A missing end-of-message marker
/// is tolerated as long as the last TLV is complete.
pub fn decode_message(buf: &[u8]) -> Result<(Header, Vec<RawRecord>), NsdpError> {
    let header = decode_header(buf)?;
    let mut records = Vec::new();
    let mut rest = &buf[HEADER_LEN..];

    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(malformed("truncated record header"));
        }

        let code = u16::from_be_bytes([rest[0], rest[1]]);
        let len = usize::from(u16::from_be_bytes([rest[2], rest[3]]));
        if code == END_OF_MESSAGE {
            break;
        }
        if rest.len() < 4 + len {
            return Err(malformed(format!(
                "record 0x{code:04x} claims {len} bytes, {} left",
                rest.len() - 4
            )));
        }

        let value = &rest[4..4 + len];
        if let Some(tag) = Tag::from_code(code) {
            records.push(decode_record(tag, value)?);
        }

        rest = &rest[4 + len..];
    }

    Ok((header, records))
}

fn decode_record(tag: Tag, value: &[u8]) -> Result<RawRecord, NsdpError> {
    let require = |min: usize| -> Result<(), NsdpError> {
        if value.len() < min {
            Err(malformed(format!(
                "{} record is {} bytes, expected at least {}",
                tag.name(),
                value.len(),
                min
            )))
        } else {
            Ok(())
        }
    };

    match tag {
        Tag::HostName => {
            let name = String::from_utf8_lossy(value);
            Ok(RawRecord::HostName(name.trim_end_matches('\0').trim().to_string()))
        }
        Tag::HostIp => {
            require(4)?;
            Ok(RawRecord::HostIp(Ipv4Addr::new(value[0], value[1], value[2], value[3])))
        }
        Tag::PortLinkStatus => {
            require(3)?;
            Ok(RawRecord::PortLinkStatus(LinkStatus {
                speed: value[1],
                flags: value[2],
            }))
        }
        Tag::PortStatistics => {
            require(49)?;
            Ok(RawRecord::PortStatistics(PortCounters {
                received: u64_at(value, 1),
                sent: u64_at(value, 9),
                packets: u64_at(value, 17),
                broadcast: u64_at(value, 25),
                multicast: u64_at(value, 33),
                errors: u64_at(value, 41),
            }))
        }
    }
}
