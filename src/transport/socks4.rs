//! SOCKS4 / SOCKS4a client handshake.
//!
//! ```text
//! request: VN(4) CD(1) DSTPORT(2, BE) DSTIP(4) USERID NUL [HOSTNAME NUL]
//! reply:   VN(0) CD(1) DSTPORT(2) DSTIP(4)
//! ```
//!
//! IPv4 literals use plain SOCKS4. Host names use SOCKS4a: DSTIP is set to
//! `0.0.0.1` and the proxy resolves the trailing host name.

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};

const SOCKS4_VERSION: u8 = 4;
const COMMAND_CONNECT: u8 = 1;
const REPLY_VERSION: u8 = 0;
const REQUEST_GRANTED: u8 = 0x5A;
const REPLY_LEN: usize = 8;
const SOCKS4A_MARKER_IP: [u8; 4] = [0, 0, 0, 1];

/// Build the CONNECT request for `target`.
pub(crate) fn connect_request(target: &Endpoint) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(10 + target.host().len());
    request.push(SOCKS4_VERSION);
    request.push(COMMAND_CONNECT);
    request.extend_from_slice(&target.port().to_be_bytes());

    match target.host().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.extend_from_slice(&ip.octets());
            request.push(0); // empty user id
        }
        Ok(IpAddr::V6(_)) => {
            return Err(MuxError::ConnectFailed {
                endpoint: target.to_string(),
                reason: "SOCKS4 cannot reach IPv6 targets".to_string(),
            });
        }
        Err(_) => {
            request.extend_from_slice(&SOCKS4A_MARKER_IP);
            request.push(0);
            request.extend_from_slice(target.host().as_bytes());
            request.push(0);
        }
    }
    Ok(request)
}

/// Ask the proxy on the other end of `stream` to connect to `target`.
pub(crate) async fn handshake<S>(stream: &mut S, target: &Endpoint) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let failed = |reason: String| MuxError::ConnectFailed {
        endpoint: target.to_string(),
        reason,
    };

    stream.write_all(&connect_request(target)?).await?;
    stream.flush().await?;

    let mut reply = [0u8; REPLY_LEN];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| failed(format!("SOCKS4 proxy closed during handshake: {}", e)))?;

    if reply[0] != REPLY_VERSION {
        return Err(failed(format!(
            "malformed SOCKS4 reply version {:#04x}",
            reply[0]
        )));
    }
    if reply[1] != REQUEST_GRANTED {
        return Err(failed(format!(
            "SOCKS4 proxy rejected request with code {:#04x}",
            reply[1]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_ipv4_request() {
        let request = connect_request(&Endpoint::new("10.1.2.3", 8080)).unwrap();
        assert_eq!(request, vec![4, 1, 0x1F, 0x90, 10, 1, 2, 3, 0]);
    }

    #[test]
    fn test_hostname_uses_socks4a() {
        let request = connect_request(&Endpoint::new("localhost", 80)).unwrap();
        let mut expected = vec![4, 1, 0, 80, 0, 0, 0, 1, 0];
        expected.extend_from_slice(b"localhost\0");
        assert_eq!(request, expected);
    }

    #[test]
    fn test_ipv6_rejected() {
        assert!(matches!(
            connect_request(&Endpoint::new("::1", 80)),
            Err(MuxError::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_granted() {
        let (mut client, mut proxy) = duplex(256);
        let target = Endpoint::new("127.0.0.1", 9000);

        let proxy_task = tokio::spawn(async move {
            let mut request = [0u8; 9];
            proxy.read_exact(&mut request).await.unwrap();
            proxy
                .write_all(&[0, REQUEST_GRANTED, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            request
        });

        handshake(&mut client, &target).await.unwrap();
        assert_eq!(proxy_task.await.unwrap()[..4], [4, 1, 0x23, 0x28]);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (mut client, mut proxy) = duplex(256);
        tokio::spawn(async move {
            let mut request = [0u8; 9];
            proxy.read_exact(&mut request).await.unwrap();
            proxy.write_all(&[0, 0x5B, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let result = handshake(&mut client, &Endpoint::new("127.0.0.1", 1)).await;
        match result {
            Err(MuxError::ConnectFailed { reason, .. }) => assert!(reason.contains("0x5b")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_proxy_hangs_up() {
        let (mut client, mut proxy) = duplex(256);
        tokio::spawn(async move {
            let mut request = [0u8; 9];
            proxy.read_exact(&mut request).await.unwrap();
        });

        let result = handshake(&mut client, &Endpoint::new("127.0.0.1", 1)).await;
        assert!(matches!(result, Err(MuxError::ConnectFailed { .. })));
    }
}
