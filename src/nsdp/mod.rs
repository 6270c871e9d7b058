// NSDP module - Netgear Switch Discovery Protocol client
//
// Netgear "smart" switches answer UDP broadcast read requests with a list
// of typed records describing themselves. One request reaches every switch
// on the segment, so a query may collect several response datagrams.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::NetgearConfig;

pub mod codec;

pub use codec::{LinkStatus, PortCounters, RawRecord, Tag};
use codec::{decode_message, encode_read_request, Op};

/// Largest datagram accepted from a switch
const RECV_BUFFER: usize = 8192;

/// Errors raised by the discovery client
#[derive(Error, Debug)]
pub enum NsdpError {
    #[error("NSDP socket error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed NSDP message: {0}")]
    Malformed(String),

    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),
}

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = NsdpError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NsdpError::InvalidMac(s.to_string());
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(MacAddr(octets))
    }
}

/// Something that can run a discovery query
///
/// The query returns the records of every response received in the
/// receive window, concatenated in arrival order.
#[async_trait]
pub trait DiscoveryClient: Send {
    async fn query(&mut self, tags: &[Tag]) -> Result<Vec<RawRecord>, NsdpError>;
}

/// UDP broadcast discovery client
pub struct NsdpClient {
    socket: UdpSocket,
    target: SocketAddr,
    host_mac: MacAddr,
    window: Duration,
    sequence: u16,
}

impl NsdpClient {
    /// Binds the discovery socket
    ///
    /// # Errors
    /// Fails when the socket cannot be bound or switched to broadcast, or
    /// when a configured address or MAC does not parse.
    pub async fn bind(config: &NetgearConfig) -> Result<Self, NsdpError> {
        let bind_ip: Ipv4Addr = config
            .bind_address
            .parse()
            .map_err(|_| NsdpError::Io(invalid_input(&config.bind_address)))?;
        let target_ip: Ipv4Addr = config
            .target_address
            .parse()
            .map_err(|_| NsdpError::Io(invalid_input(&config.target_address)))?;

        let host_mac = host_mac(config)?;
        if host_mac.is_zero() {
            warn!("No host MAC configured; sending discovery requests from {}", host_mac);
        }

        let socket = UdpSocket::bind(SocketAddr::from((bind_ip, config.host_port))).await?;
        socket.set_broadcast(true)?;

        info!(
            "NSDP client bound to {}:{} as {}",
            bind_ip, config.host_port, host_mac
        );

        Ok(NsdpClient {
            socket,
            target: SocketAddr::from((target_ip, config.device_port)),
            host_mac,
            window: Duration::from_secs(config.timeout),
            sequence: 0,
        })
    }

    fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }
}

fn invalid_input(address: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid IPv4 address {address:?}"),
    )
}

/// Resolves the MAC placed in the request header
///
/// Switches answer to any host MAC, but some firmware ignores requests from
/// the all-zero address.
fn host_mac(config: &NetgearConfig) -> Result<MacAddr, NsdpError> {
    if let Some(mac) = &config.host_mac {
        return mac.parse();
    }

    if let Some(iface) = &config.interface {
        let path = format!("/sys/class/net/{iface}/address");
        match std::fs::read_to_string(&path) {
            Ok(text) => return text.parse(),
            Err(e) => warn!("Could not read MAC of interface {}: {}", iface, e),
        }
    }

    Ok(MacAddr::default())
}

#[async_trait]
impl DiscoveryClient for NsdpClient {
    async fn query(&mut self, tags: &[Tag]) -> Result<Vec<RawRecord>, NsdpError> {
        let sequence = self.next_sequence();
        let request = encode_read_request(self.host_mac, sequence, tags);
        self.socket.send_to(&request, self.target).await?;

        let deadline = Instant::now() + self.window;
        let mut buf = vec![0u8; RECV_BUFFER];
        let mut records = Vec::new();
        let mut responses = 0usize;

        loop {
            let (len, peer) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };

            match decode_message(&buf[..len]) {
                Ok((header, body)) if header.op == Op::ReadResponse && header.sequence == sequence => {
                    debug!(
                        "NSDP response from {} ({}): result {}, {} records",
                        peer,
                        header.device_mac,
                        header.result,
                        body.len()
                    );
                    responses += 1;
                    records.extend(body);
                }
                // Our own broadcast request or a late answer to an older query
                Ok(_) => {}
                Err(e) => warn!("Discarding datagram from {}: {}", peer, e),
            }
        }

        debug!(
            "NSDP query {} finished: {} responses, {} records",
            sequence,
            responses,
            records.len()
        );

        Ok(records)
    }
}
