//! HAProxy PROXY protocol: parsing the header in front of inbound
//! connections and writing a v2 header to backends.

use ppp::v2::{self, Builder, Command, Version};
use ppp::{v1, HeaderResult};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// v2 headers carrying TLVs can be longer than this, but not from any
/// load balancer fronting a Minecraft proxy.
const MAX_HEADER: usize = 4096;

#[derive(Debug)]
pub struct ProxyHeader {
    /// The original client, if the header carried one.
    pub source: Option<SocketAddr>,
    /// Bytes read past the header, the start of the Minecraft stream.
    pub rest: Vec<u8>,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Parse a complete header at the start of `buf`. `Ok(None)` asks for more
/// bytes.
pub fn parse(buf: &[u8]) -> io::Result<Option<(Option<SocketAddr>, usize)>> {
    let result = HeaderResult::parse(buf);
    if result.is_incomplete() {
        return Ok(None);
    }
    match result {
        HeaderResult::V1(Ok(header)) => {
            let source = match header.addresses {
                v1::Addresses::Tcp4(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
                v1::Addresses::Tcp6(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
                v1::Addresses::Unknown => None,
            };
            Ok(Some((source, header.header.len())))
        }
        HeaderResult::V2(Ok(header)) => {
            let source = match header.addresses {
                v2::Addresses::IPv4(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
                v2::Addresses::IPv6(a) => Some(SocketAddr::from((a.source_address, a.source_port))),
                _ => None,
            };
            Ok(Some((source, header.header.len())))
        }
        HeaderResult::V1(Err(_)) | HeaderResult::V2(Err(_)) => Err(invalid("malformed PROXY header")),
    }
}

/// Read a PROXY header from a freshly accepted stream.
pub async fn read_header(stream: &mut TcpStream, timeout: Duration) -> io::Result<ProxyHeader> {
    let mut buf = Vec::with_capacity(256);
    let mut tmp = [0u8; 512];
    loop {
        let n = match tokio::time::timeout(timeout, stream.read(&mut tmp)).await {
            Ok(read) => read?,
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "PROXY header timed out")),
        };
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some((source, len)) = parse(&buf)? {
            return Ok(ProxyHeader {
                source,
                rest: buf.split_off(len),
            });
        }
        if buf.len() > MAX_HEADER {
            return Err(invalid("PROXY header too long"));
        }
    }
}

pub fn v2_header(source: SocketAddr, destination: SocketAddr) -> io::Result<Vec<u8>> {
    Builder::with_addresses(
        Version::Two | Command::Proxy,
        v2::Protocol::Stream,
        (source, destination),
    )
    .build()
}

/// Announce `source` to a backend before any Minecraft bytes.
pub async fn write_header(stream: &mut TcpStream, source: SocketAddr) -> io::Result<()> {
    let destination = stream.peer_addr()?;
    let header = v2_header(source, destination)?;
    stream.write_all(&header).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_v1() {
        let data = b"PROXY TCP4 203.0.113.9 192.0.2.1 51000 25565\r\n\x10\x00";
        let (source, len) = parse(data).unwrap().unwrap();
        assert_eq!(source, Some("203.0.113.9:51000".parse().unwrap()));
        assert_eq!(&data[len..], b"\x10\x00");
    }

    #[test]
    fn test_parse_v2_round_trip() {
        let src: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        let dst: SocketAddr = "192.0.2.1:25565".parse().unwrap();
        let mut data = v2_header(src, dst).unwrap();
        let header_len = data.len();
        data.extend_from_slice(&[1, 2, 3]);
        let (source, len) = parse(&data).unwrap().unwrap();
        assert_eq!(source, Some(src));
        assert_eq!(len, header_len);
    }

    #[test]
    fn test_partial_and_garbage() {
        assert!(parse(b"PROXY TCP4 203.0").unwrap().is_none());
        assert!(parse(b"\x10\x00\xf5\x05hello world, not a proxy header\r\n").is_err());
    }

    #[tokio::test]
    async fn test_read_header_keeps_rest() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            write_header(&mut stream, "198.51.100.4:40000".parse().unwrap()).await.unwrap();
            stream.write_all(&[9, 9]).await.unwrap();
            stream
        });
        let (mut accepted, _) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();
        let mut header = read_header(&mut accepted, Duration::from_secs(5)).await.unwrap();
        assert_eq!(header.source, Some("198.51.100.4:40000".parse().unwrap()));
        // the trailing bytes may arrive in a later segment
        let missing = 2 - header.rest.len();
        let mut tmp = vec![0u8; missing];
        accepted.read_exact(&mut tmp).await.unwrap();
        header.rest.extend_from_slice(&tmp);
        assert_eq!(header.rest, vec![9, 9]);
    }
}
