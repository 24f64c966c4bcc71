//! Peer identity and bucket hashing

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Identifies the peer a cached connection leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey {
    /// IPv4 address as a host-order integer
    pub addr: u32,
    /// Peer port
    pub port: u16,
    /// Connection kind tag (transport flavour, e.g. UDP vs TCP)
    pub kind: u8,
}

impl PeerKey {
    /// Build a key from raw parts
    pub fn new(addr: u32, port: u16, kind: u8) -> Self {
        Self { addr, port, kind }
    }

    /// Build a key from a socket address
    pub fn from_socket(socket: SocketAddrV4, kind: u8) -> Self {
        Self::new(u32::from(*socket.ip()), socket.port(), kind)
    }

    /// Bucket index for `bucket_count` buckets
    ///
    /// Sums the two address halves, the port and the kind, then reduces
    /// modulo the bucket count. `bucket_count` must be non-zero.
    pub fn bucket(&self, bucket_count: usize) -> usize {
        let sum = (self.addr >> 16) as usize
            + (self.addr & 0xFFFF) as usize
            + self.port as usize
            + self.kind as usize;
        sum % bucket_count
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", Ipv4Addr::from(self.addr), self.port, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_formula() {
        let key = PeerKey::new(0x0A00_0001, 6030, 1);
        // 0x0A00 + 0x0001 + 6030 + 1
        assert_eq!(key.bucket(usize::MAX), 2560 + 1 + 6030 + 1);
        assert_eq!(key.bucket(100), (2560 + 1 + 6030 + 1) % 100);
    }

    #[test]
    fn test_bucket_is_deterministic() {
        let key = PeerKey::new(0xC0A8_0102, 7000, 0);
        assert_eq!(key.bucket(37), key.bucket(37));
        assert!(key.bucket(37) < 37);
    }

    #[test]
    fn test_from_socket() {
        let socket = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 7000);
        let key = PeerKey::from_socket(socket, 2);
        assert_eq!(key, PeerKey::new(0xC0A8_0102, 7000, 2));
        assert_eq!(key.to_string(), "192.168.1.2:7000/2");
    }

    #[test]
    fn test_colliding_peers_share_bucket() {
        // Swapping address halves does not change the sum
        let a = PeerKey::new(0x0001_0002, 80, 0);
        let b = PeerKey::new(0x0002_0001, 80, 0);
        assert_ne!(a, b);
        assert_eq!(a.bucket(64), b.bucket(64));
    }
}
